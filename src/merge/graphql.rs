//! Field updater for GraphQL shaped data: `{ __typename, sys, …fields, [field]Collection: { items } }`.

use super::{is_link_array, is_rich_text, localize_fields, localized, rich_text, Resolution, Update};
use crate::{
	channel::EntityKind,
	classify::{is_link, sys_id},
	query::QueryParams,
	resolver::Resolved,
	schema::FieldKind,
};
use futures::{future::LocalBoxFuture, FutureExt};
use serde_json::{json, Map, Value};

/// Keys of a GraphQL `Asset`, and where they live in a management-API asset's localized fields.
const ASSET_KEYS: &[(&str, &str)] = &[
	("title", "/title"),
	("description", "/description"),
	("url", "/file/url"),
	("fileName", "/file/fileName"),
	("contentType", "/file/contentType"),
	("size", "/file/details/size"),
	("width", "/file/details/image/width"),
	("height", "/file/details/image/height"),
];

/// Rewrites every field the content type declares (and the query selected) on `target` from the update,
/// then copies each written value to the aliases the query used for it.
pub(super) async fn update_entity(resolution: &Resolution<'_>, query: Option<&QueryParams>, update: Update<'_>, target: &mut Value) {
	let type_name = target.get("__typename").and_then(Value::as_str).unwrap_or_default().to_owned();
	let target = match target {
		Value::Object(target) => target,
		_ => return,
	};

	if type_name == "Asset" {
		let fresh = Value::Object(localize_fields(update.entity, resolution.locale));
		for &(key, pointer) in ASSET_KEYS {
			if target.contains_key(key) || query.map_or(false, |query| query.get("Asset").map_or(false, |selection| selection.fields.contains(key))) {
				target.insert(key.to_owned(), fresh.pointer(pointer).cloned().unwrap_or(Value::Null));
				mirror_aliases(query, &type_name, key, target);
			}
		}
		return;
	}

	for field in &update.content_type.fields {
		let key = field.key();
		let collection_key = format!("{}Collection", key);
		if let Some(query) = query {
			if !query.is_selected(&type_name, key) && !query.is_selected(&type_name, &collection_key) {
				continue;
			}
		}

		let fresh = localized(update.entity, key, resolution.locale);
		match field.kind() {
			FieldKind::Primitive => {
				target.insert(key.to_owned(), fresh.cloned().unwrap_or(Value::Null));
				mirror_aliases(query, &type_name, key, target);
			}
			FieldKind::SingleReference => {
				let value = match fresh {
					Some(link) => match target.get(key) {
						Some(existing) if is_resolved_as(existing, link) => existing.clone(),
						_ => resolution.graphql_reference(link, 0).await.unwrap_or_else(|| link.clone()),
					},
					None => Value::Null,
				};
				target.insert(key.to_owned(), value);
				mirror_aliases(query, &type_name, key, target);
			}
			FieldKind::MultiReference => {
				let links = fresh.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
				let mut collection = match target.get(&collection_key) {
					Some(Value::Object(collection)) => collection.clone(),
					_ => Map::new(),
				};
				let existing = collection.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
				let mut items = Vec::with_capacity(links.len());
				for link in links {
					if let Some(kept) = existing.iter().find(|item| is_resolved_as(item, link)) {
						items.push(kept.clone());
					} else if let Some(resolved) = resolution.graphql_reference(link, 0).await {
						items.push(resolved);
					}
				}
				if collection.contains_key("total") {
					collection.insert("total".to_owned(), Value::from(items.len()));
				}
				collection.insert("items".to_owned(), Value::Array(items));
				target.insert(collection_key.clone(), Value::Object(collection));
				mirror_aliases(query, &type_name, &collection_key, target);
			}
			FieldKind::RichText => {
				let value = match fresh {
					Some(document) => {
						let mut rich_text = match target.get(key) {
							Some(Value::Object(existing)) => existing.clone(),
							_ => Map::new(),
						};
						if let Value::Object(fresh) = resolution.graphql_rich_text(document, 0).await {
							rich_text.extend(fresh);
						}
						Value::Object(rich_text)
					}
					None => Value::Null,
				};
				target.insert(key.to_owned(), value);
				mirror_aliases(query, &type_name, key, target);
			}
			FieldKind::Unsupported => {
				diagnostic!(warn, field = key, field_type = ?field.field_type, "Field type is not supported by live updates; leaving it as rendered");
			}
		}
	}
}

fn mirror_aliases(query: Option<&QueryParams>, type_name: &str, key: &str, target: &mut Map<String, Value>) {
	let query = match query {
		Some(query) => query,
		None => return,
	};
	if let Some(value) = target.get(key).cloned() {
		for alias in query.aliases(type_name, key) {
			target.insert(alias.clone(), value.clone());
		}
	}
}

/// `existing` is already a resolved (`__typename`-carrying) version of what `link` points at.
fn is_resolved_as(existing: &Value, link: &Value) -> bool {
	existing.get("__typename").is_some() && sys_id(existing).is_some() && sys_id(existing) == sys_id(link)
}

impl<'a> Resolution<'a> {
	/// Resolves a link into a GraphQL shaped entity.
	///
	/// Past the reference depth limit the link is returned unresolved. [`None`] only if the editor couldn't provide the entity.
	pub(super) fn graphql_reference<'b>(&'b self, link: &'b Value, depth: usize) -> LocalBoxFuture<'b, Option<Value>> {
		async move {
			if depth >= self.limits.max_reference_depth {
				diagnostic!(warn, id = ?sys_id(link), depth, "Reference depth limit reached; leaving the reference unresolved");
				return Some(link.clone());
			}
			let resolved = self.fetch(link).await?;
			Some(self.graphql_entity(resolved, Some(depth + 1), 0).await)
		}
		.boxed_local()
	}

	fn graphql_entity(&self, resolved: Resolved, reference_depth: Option<usize>, rich_text_depth: usize) -> LocalBoxFuture<'_, Value> {
		async move {
			let fields = localize_fields(&resolved.entity, self.locale);
			let mut entity = Map::new();
			entity.insert("__typename".to_owned(), Value::from(resolved.type_name.as_str()));
			entity.insert("sys".to_owned(), json!({ "id": sys_id(&resolved.entity) }));

			if resolved.type_name == "Asset" {
				let fields = Value::Object(fields);
				for &(key, pointer) in ASSET_KEYS {
					entity.insert(key.to_owned(), fields.pointer(pointer).cloned().unwrap_or(Value::Null));
				}
				return Value::Object(entity);
			}

			for (key, value) in fields {
				if let (Some(depth), true) = (reference_depth, is_link(&value)) {
					let nested = self.graphql_reference(&value, depth).await.unwrap_or(Value::Null);
					entity.insert(key, nested);
				} else if let (Some(depth), true) = (reference_depth, is_link_array(&value)) {
					let mut items = Vec::new();
					for link in value.as_array().into_iter().flatten() {
						if let Some(nested) = self.graphql_reference(link, depth).await {
							items.push(nested);
						}
					}
					entity.insert(format!("{}Collection", key), json!({ "items": items }));
				} else if is_rich_text(&value) {
					let rich_text = self.graphql_rich_text(&value, rich_text_depth).await;
					entity.insert(key, rich_text);
				} else {
					entity.insert(key, value);
				}
			}
			Value::Object(entity)
		}
		.boxed_local()
	}

	/// `{ json, links }` for `document`. The document itself is kept as sent; embedded entities go into `links`.
	pub(super) fn graphql_rich_text<'b>(&'b self, document: &'b Value, depth: usize) -> LocalBoxFuture<'b, Value> {
		async move {
			let mut links = rich_text::empty_links();
			for embed in rich_text::embeds(document) {
				if depth >= self.limits.max_rich_text_depth {
					diagnostic!(warn, id = %embed.id, depth, "Rich text depth limit reached; leaving the embed unresolved");
					continue;
				}
				let target = match document.pointer(&embed.target_pointer) {
					Some(target) => target,
					None => continue,
				};
				let resolved = match self.fetch(target).await {
					Some(resolved) if embed.bucket.kind() == EntityKind::Asset => Resolved {
						type_name: "Asset".to_owned(),
						..resolved
					},
					Some(resolved) => resolved,
					None => continue,
				};
				let entity = self.graphql_entity(resolved, None, depth + 1).await;
				rich_text::push_link(&mut links, embed.bucket, entity);
			}
			json!({ "json": document, "links": links })
		}
		.boxed_local()
	}
}
