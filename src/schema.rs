//! Content type schemas, as sent alongside each update by the editor.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentType {
	#[serde(default)]
	pub sys: ContentTypeSys,
	#[serde(default)]
	pub fields: Vec<ContentTypeField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeSys {
	#[serde(default)]
	pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeField {
	/// Stable key of the field in entries, as opposed to its display `name`.
	#[serde(default)]
	pub api_name: Option<String>,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub name: String,
	#[serde(rename = "type")]
	pub field_type: FieldType,
	#[serde(default)]
	pub link_type: Option<LinkType>,
	#[serde(default)]
	pub items: Option<FieldItems>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldItems {
	#[serde(rename = "type")]
	pub item_type: FieldType,
	#[serde(default)]
	pub link_type: Option<LinkType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
	Symbol,
	Text,
	Integer,
	Number,
	Boolean,
	Date,
	Location,
	Object,
	Array,
	Link,
	RichText,
	File,
	ResourceLink,
	#[serde(other)]
	Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
	Entry,
	Asset,
}

/// Which updater handles a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
	Primitive,
	SingleReference,
	MultiReference,
	RichText,
	/// Cross-space links and unknown types. Left untouched.
	Unsupported,
}

impl ContentTypeField {
	/// The key under which entries store this field.
	#[must_use]
	pub fn key(&self) -> &str {
		self.api_name.as_deref().or(self.id.as_deref()).unwrap_or(&self.name)
	}

	#[must_use]
	pub fn kind(&self) -> FieldKind {
		match self.field_type {
			FieldType::Symbol
			| FieldType::Text
			| FieldType::Integer
			| FieldType::Number
			| FieldType::Boolean
			| FieldType::Date
			| FieldType::Location
			| FieldType::Object
			| FieldType::File => FieldKind::Primitive,
			FieldType::Link => FieldKind::SingleReference,
			FieldType::RichText => FieldKind::RichText,
			FieldType::Array => match self.items.as_ref().map(|items| items.item_type) {
				Some(FieldType::Link) => FieldKind::MultiReference,
				Some(FieldType::ResourceLink) => FieldKind::Unsupported,
				_ => FieldKind::Primitive,
			},
			FieldType::ResourceLink | FieldType::Unknown => FieldKind::Unsupported,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn field_kinds() {
		let content_type: ContentType = serde_json::from_value(json!({
			"sys": { "id": "post" },
			"fields": [
				{ "apiName": "title", "name": "Title", "type": "Symbol" },
				{ "id": "tags", "name": "Tags", "type": "Array", "items": { "type": "Symbol" } },
				{ "apiName": "author", "name": "Author", "type": "Link", "linkType": "Entry" },
				{ "apiName": "related", "name": "Related", "type": "Array", "items": { "type": "Link", "linkType": "Entry" } },
				{ "apiName": "body", "name": "Body", "type": "RichText" },
				{ "apiName": "elsewhere", "name": "Elsewhere", "type": "ResourceLink" },
				{ "apiName": "future", "name": "Future", "type": "Hologram" },
			]
		}))
		.unwrap();

		let kinds: Vec<_> = content_type.fields.iter().map(|field| (field.key(), field.kind())).collect();
		assert_eq!(
			kinds,
			[
				("title", FieldKind::Primitive),
				("tags", FieldKind::Primitive),
				("author", FieldKind::SingleReference),
				("related", FieldKind::MultiReference),
				("body", FieldKind::RichText),
				("elsewhere", FieldKind::Unsupported),
				("future", FieldKind::Unsupported),
			]
		);
	}
}
