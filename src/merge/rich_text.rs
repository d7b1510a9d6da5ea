//! Embedded references in rich text documents.

use crate::{channel::EntityKind, classify::sys_id};
use serde_json::{json, Value};

/// Rich text documents nest far less than this in practice.
const MAX_NODE_DEPTH: usize = 32;

/// Which `links` list of a GraphQL rich text response an embed shows up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Bucket {
	EntryBlock,
	EntryInline,
	EntryHyperlink,
	AssetBlock,
	AssetHyperlink,
}

impl Bucket {
	fn of(node_type: &str) -> Option<Self> {
		Some(match node_type {
			"embedded-entry-block" => Bucket::EntryBlock,
			"embedded-entry-inline" => Bucket::EntryInline,
			"entry-hyperlink" => Bucket::EntryHyperlink,
			"embedded-asset-block" => Bucket::AssetBlock,
			"asset-hyperlink" => Bucket::AssetHyperlink,
			_ => return None,
		})
	}

	pub(super) fn kind(self) -> EntityKind {
		match self {
			Bucket::EntryBlock | Bucket::EntryInline | Bucket::EntryHyperlink => EntityKind::Entry,
			Bucket::AssetBlock | Bucket::AssetHyperlink => EntityKind::Asset,
		}
	}

	fn path(self) -> (&'static str, &'static str) {
		match self {
			Bucket::EntryBlock => ("entries", "block"),
			Bucket::EntryInline => ("entries", "inline"),
			Bucket::EntryHyperlink => ("entries", "hyperlink"),
			Bucket::AssetBlock => ("assets", "block"),
			Bucket::AssetHyperlink => ("assets", "hyperlink"),
		}
	}
}

/// An embed node's target, by JSON pointer into the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Embed {
	pub target_pointer: String,
	pub bucket: Bucket,
	pub id: String,
}

/// Every embed in `document`, in document order.
pub(super) fn embeds(document: &Value) -> Vec<Embed> {
	let mut found = Vec::new();
	collect(document, String::new(), 0, &mut found);
	found
}

fn collect(node: &Value, pointer: String, depth: usize, found: &mut Vec<Embed>) {
	if depth >= MAX_NODE_DEPTH {
		return diagnostic!(warn, %pointer, "Rich text nests too deeply; ignoring embeds below");
	}

	if let Some(node_type) = node.get("nodeType").and_then(Value::as_str) {
		if let Some(bucket) = Bucket::of(node_type) {
			match node.pointer("/data/target").and_then(sys_id) {
				Some(id) => found.push(Embed {
					target_pointer: format!("{}/data/target", pointer),
					bucket,
					id: id.to_owned(),
				}),
				None => diagnostic!(warn, %pointer, node_type, "Embed without target id"),
			}
		} else if node_type.starts_with("embedded-resource") || node_type == "resource-hyperlink" {
			diagnostic!(warn, %pointer, node_type, "Cross-space rich text embeds are not supported; leaving it as is");
		}
	}

	if let Some(Value::Array(content)) = node.get("content") {
		for (i, child) in content.iter().enumerate() {
			collect(child, format!("{}/content/{}", pointer, i), depth + 1, found);
		}
	}
}

/// The empty `links` object of a GraphQL rich text field.
pub(super) fn empty_links() -> Value {
	json!({
		"entries": { "block": [], "inline": [], "hyperlink": [] },
		"assets": { "block": [], "hyperlink": [] },
	})
}

/// Adds `entity` to its bucket, once per id.
pub(super) fn push_link(links: &mut Value, bucket: Bucket, entity: Value) {
	let (group, list) = bucket.path();
	if let Some(Value::Array(items)) = links.get_mut(group).and_then(|group| group.get_mut(list)) {
		let id = sys_id(&entity).map(str::to_owned);
		if id.is_none() || !items.iter().any(|item| sys_id(item) == id.as_deref()) {
			items.push(entity);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn finds_embeds_in_document_order() {
		let document = json!({
			"nodeType": "document",
			"data": {},
			"content": [
				{ "nodeType": "paragraph", "data": {}, "content": [
					{ "nodeType": "text", "value": "See ", "marks": [], "data": {} },
					{ "nodeType": "entry-hyperlink", "data": { "target": { "sys": { "id": "e1", "type": "Link", "linkType": "Entry" } } }, "content": [] },
					{ "nodeType": "embedded-entry-inline", "data": { "target": { "sys": { "id": "e2", "type": "Link", "linkType": "Entry" } } }, "content": [] },
				] },
				{ "nodeType": "embedded-asset-block", "data": { "target": { "sys": { "id": "a1", "type": "Link", "linkType": "Asset" } } }, "content": [] },
				{ "nodeType": "embedded-resource-block", "data": { "target": { "sys": { "urn": "crn:…", "type": "ResourceLink" } } }, "content": [] },
			]
		});

		let found = embeds(&document);
		assert_eq!(
			found.iter().map(|embed| (embed.id.as_str(), embed.bucket)).collect::<Vec<_>>(),
			[("e1", Bucket::EntryHyperlink), ("e2", Bucket::EntryInline), ("a1", Bucket::AssetBlock)]
		);
		assert_eq!(found[1].target_pointer, "/content/0/content/2/data/target");
		assert_eq!(document.pointer(&found[2].target_pointer).and_then(sys_id), Some("a1"));
		assert_eq!(found[2].bucket.kind(), EntityKind::Asset);
	}

	#[test]
	fn links_are_bucketed_once_per_id() {
		let mut links = empty_links();
		push_link(&mut links, Bucket::EntryBlock, json!({ "sys": { "id": "1" } }));
		push_link(&mut links, Bucket::EntryBlock, json!({ "sys": { "id": "1" } }));
		push_link(&mut links, Bucket::AssetHyperlink, json!({ "sys": { "id": "1" } }));

		assert_eq!(links["entries"]["block"].as_array().unwrap().len(), 1);
		assert_eq!(links["assets"]["hyperlink"].as_array().unwrap().len(), 1);
		assert_eq!(links["entries"]["inline"], json!([]));
	}
}
