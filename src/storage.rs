use hashbrown::HashMap;
use serde_json::Value;
use std::cell::RefCell;

/// Last merged version of each entity, per locale, for this page session.
///
/// Lets merges build on earlier merges rather than on the original render, and lets remounted subscribers start from the latest edit.
#[derive(Debug, Default)]
pub struct StorageCache {
	entries: RefCell<HashMap<(String, String), Value>>,
}

impl StorageCache {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn get(&self, id: &str, locale: &str) -> Option<Value> {
		self.entries.borrow().get(&(id.to_owned(), locale.to_owned())).cloned()
	}

	/// Last write wins.
	pub fn set(&self, id: &str, locale: &str, entity: Value) {
		self.entries.borrow_mut().insert((id.to_owned(), locale.to_owned()), entity);
	}

	pub fn clear(&self) {
		self.entries.borrow_mut().clear();
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.borrow().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.borrow().is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn keyed_by_id_and_locale() {
		let cache = StorageCache::new();
		cache.set("1", "en-US", json!({ "title": "Hello" }));
		cache.set("1", "de", json!({ "title": "Hallo" }));
		cache.set("1", "de", json!({ "title": "Servus" }));

		assert_eq!(cache.get("1", "en-US"), Some(json!({ "title": "Hello" })));
		assert_eq!(cache.get("1", "de"), Some(json!({ "title": "Servus" })));
		assert_eq!(cache.get("2", "de"), None);
		assert_eq!(cache.len(), 2);

		cache.clear();
		assert!(cache.is_empty());
	}
}
