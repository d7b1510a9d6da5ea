//! Data shape detection for subscribed trees.

use crate::{error::ShapeError, query::QueryParams};
use serde_json::Value;
use std::rc::Rc;
use tracing::instrument;

/// The result of walking a value once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
	/// A `fields` key is reachable.
	pub is_rest: bool,
	/// A `__typename` key is reachable.
	pub is_gql: bool,
	/// Every reachable `sys.id`, deduplicated in first-seen order.
	pub sys_ids: Vec<String>,
	/// The walk stopped at the depth bound. Everything found above it is still reported.
	pub depth_exceeded: bool,
}

/// How entities in a subscribed tree are laid out, decided once per root.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityShape {
	/// `{ sys, fields: { … } }`
	Rest,
	/// `{ __typename, sys, …flattened fields }`, optionally with the aliases of the query that produced it.
	GraphQL(Option<Rc<QueryParams>>),
}

impl EntityShape {
	#[must_use]
	pub fn kind(&self) -> ShapeKind {
		match self {
			EntityShape::Rest => ShapeKind::Rest,
			EntityShape::GraphQL(_) => ShapeKind::GraphQL,
		}
	}
}

/// Payload-free view of [`EntityShape`], as reported to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ShapeKind {
	#[serde(rename = "REST")]
	Rest,
	#[serde(rename = "GQL")]
	GraphQL,
}

/// Walks `value` up to `max_depth` levels deep.
#[must_use]
#[instrument(skip(value))]
pub fn classify(value: &Value, max_depth: usize) -> Classification {
	let mut classification = Classification::default();
	walk(value, max_depth, &mut classification);
	if classification.depth_exceeded {
		diagnostic!(warn, max_depth, "Depth limit reached while classifying subscribed data; results may be incomplete");
	}
	classification
}

fn walk(value: &Value, depth_limit: usize, into: &mut Classification) {
	if depth_limit == 0 {
		into.depth_exceeded = true;
		return;
	}

	match value {
		Value::Array(items) => {
			for item in items {
				walk(item, depth_limit - 1, into);
			}
		}
		Value::Object(object) => {
			into.is_rest |= object.contains_key("fields");
			into.is_gql |= object.contains_key("__typename");
			if let Some(id) = sys_id(value) {
				if !into.sys_ids.iter().any(|known| known == id) {
					into.sys_ids.push(id.to_owned());
				}
			}
			for child in object.values() {
				if child.is_object() || child.is_array() {
					walk(child, depth_limit - 1, into);
				}
			}
		}
		_ => (),
	}
}

impl Classification {
	/// Decides the shape of a subscribed root.
	///
	/// GraphQL takes precedence when both markers are present, since GraphQL responses may legitimately contain a field named `fields`.
	///
	/// # Errors
	///
	/// [`ShapeError::MissingSysId`] if no entity was found,
	/// [`ShapeError::Indeterminate`] if entities were found but no shape marker.
	pub fn shape(&self, query: Option<Rc<QueryParams>>) -> Result<EntityShape, ShapeError> {
		if self.sys_ids.is_empty() {
			return Err(ShapeError::MissingSysId);
		}
		match (self.is_gql, self.is_rest) {
			(true, rest) => {
				if rest {
					diagnostic!(warn, sys_ids = ?self.sys_ids, "Data has both `__typename` and `fields`; treating it as GraphQL");
				}
				Ok(EntityShape::GraphQL(query))
			}
			(false, true) => Ok(EntityShape::Rest),
			(false, false) => Err(ShapeError::Indeterminate { sys_ids: self.sys_ids.clone() }),
		}
	}
}

/// `value.sys.id`, if it's a string.
#[must_use]
pub fn sys_id(value: &Value) -> Option<&str> {
	value.get("sys")?.get("id")?.as_str()
}

/// Whether `value` is an unresolved reference (`sys.type == "Link"`).
#[must_use]
pub fn is_link(value: &Value) -> bool {
	value.get("sys").and_then(|sys| sys.get("type")).and_then(Value::as_str) == Some("Link")
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn rest_entry() {
		let classification = classify(&json!({ "sys": { "id": "1" }, "fields": { "title": "x" } }), 10);
		assert!(classification.is_rest);
		assert!(!classification.is_gql);
		assert_eq!(classification.sys_ids, ["1"]);
		assert_eq!(classification.shape(None), Ok(EntityShape::Rest));
	}

	#[test]
	fn graphql_collection_ids_in_first_seen_order() {
		let data = json!({
			"postCollection": { "items": [
				{ "__typename": "Post", "sys": { "id": "b" }, "author": { "__typename": "Author", "sys": { "id": "a" } } },
				{ "__typename": "Post", "sys": { "id": "a" } },
			] }
		});
		let classification = classify(&data, 10);
		assert!(classification.is_gql);
		assert_eq!(classification.sys_ids, ["b", "a"]);
		assert_eq!(classification.shape(None), Ok(EntityShape::GraphQL(None)));
	}

	#[test]
	fn graphql_wins_when_both_markers_present() {
		let classification = classify(&json!({ "__typename": "Page", "sys": { "id": "1" }, "fields": [] }), 10);
		assert!(classification.is_rest && classification.is_gql);
		assert_eq!(classification.shape(None).map(|shape| shape.kind()), Ok(ShapeKind::GraphQL));
	}

	#[test]
	fn distinguishes_missing_id_from_indeterminate_shape() {
		assert_eq!(classify(&json!({ "title": "x" }), 10).shape(None), Err(ShapeError::MissingSysId));
		assert_eq!(
			classify(&json!({ "sys": { "id": "1" }, "title": "x" }), 10).shape(None),
			Err(ShapeError::Indeterminate { sys_ids: vec!["1".to_owned()] })
		);
	}

	#[test]
	fn stops_at_depth_bound_and_keeps_partial_results() {
		let data = json!({ "sys": { "id": "outer" }, "fields": { "a": { "b": { "c": { "sys": { "id": "deep" } } } } } });
		let classification = classify(&data, 3);
		assert!(classification.depth_exceeded);
		assert_eq!(classification.sys_ids, ["outer"]);
		assert!(classification.is_rest);
	}
}
