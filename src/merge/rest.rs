//! Field updater for REST (delivery API) shaped data: `{ sys, fields: { [field]: value } }`, already localized.

use super::{is_link_array, is_rich_text, localize_fields, localized, rich_text, Resolution, Update};
use crate::{
	classify::{is_link, sys_id},
	error::MergeError,
	resolver::Resolved,
	schema::FieldKind,
};
use futures::{future::LocalBoxFuture, FutureExt};
use serde_json::{json, Map, Value};

/// Rewrites every field the content type declares on `target` from the update.
pub(super) async fn update_entity(resolution: &Resolution<'_>, update: Update<'_>, target: &mut Value) -> Result<(), MergeError> {
	let entity_id = sys_id(target).unwrap_or_default().to_owned();
	let fields = match target {
		Value::Object(object) => object.entry("fields").or_insert_with(|| Value::Object(Map::new())),
		_ => return Ok(()),
	};
	let fields = match fields {
		Value::Object(fields) => fields,
		_ => {
			return Err(MergeError::MalformedFields {
				entity_id,
				field: "fields".to_owned(),
			})
		}
	};

	for field in &update.content_type.fields {
		let key = field.key();
		let fresh = localized(update.entity, key, resolution.locale);
		match field.kind() {
			FieldKind::Primitive => {
				fields.insert(key.to_owned(), fresh.cloned().unwrap_or(Value::Null));
			}
			FieldKind::SingleReference => match fresh {
				Some(link) => {
					let value = match fields.get(key) {
						Some(existing) if is_resolved_as(existing, link) => existing.clone(),
						_ => resolution.rest_reference(link, 0).await.unwrap_or_else(|| link.clone()),
					};
					fields.insert(key.to_owned(), value);
				}
				None => {
					fields.remove(key);
				}
			},
			FieldKind::MultiReference => match fresh.and_then(Value::as_array) {
				Some(links) => {
					let existing = fields.get(key).and_then(Value::as_array).cloned().unwrap_or_default();
					let mut items = Vec::with_capacity(links.len());
					for link in links {
						if let Some(kept) = existing.iter().find(|item| is_resolved_as(item, link)) {
							items.push(kept.clone());
						} else if let Some(resolved) = resolution.rest_reference(link, 0).await {
							items.push(resolved);
						}
					}
					fields.insert(key.to_owned(), Value::Array(items));
				}
				None => {
					fields.remove(key);
				}
			},
			FieldKind::RichText => {
				let value = match fresh {
					Some(document) => {
						let mut document = document.clone();
						resolution.rest_rich_text(&mut document, 0).await;
						document
					}
					None => Value::Null,
				};
				fields.insert(key.to_owned(), value);
			}
			FieldKind::Unsupported => {
				diagnostic!(warn, field = key, field_type = ?field.field_type, "Field type is not supported by live updates; leaving it as rendered");
			}
		}
	}
	Ok(())
}

/// `existing` is already a resolved (`fields`-carrying) version of what `link` points at.
fn is_resolved_as(existing: &Value, link: &Value) -> bool {
	existing.get("fields").is_some() && !is_link(existing) && sys_id(existing).is_some() && sys_id(existing) == sys_id(link)
}

impl<'a> Resolution<'a> {
	/// Resolves a link into a localized REST entity.
	///
	/// Past the reference depth limit the link is returned unresolved. [`None`] only if the editor couldn't provide the entity.
	pub(super) fn rest_reference<'b>(&'b self, link: &'b Value, depth: usize) -> LocalBoxFuture<'b, Option<Value>> {
		async move {
			if depth >= self.limits.max_reference_depth {
				diagnostic!(warn, id = ?sys_id(link), depth, "Reference depth limit reached; leaving the reference unresolved");
				return Some(link.clone());
			}
			let resolved = self.fetch(link).await?;
			Some(self.rest_entity(resolved, Some(depth + 1), 0).await)
		}
		.boxed_local()
	}

	/// Localizes `resolved` and resolves its references at `reference_depth` (if any) and its rich text at `rich_text_depth`.
	fn rest_entity(&self, resolved: Resolved, reference_depth: Option<usize>, rich_text_depth: usize) -> LocalBoxFuture<'_, Value> {
		async move {
			let mut fields = localize_fields(&resolved.entity, self.locale);
			for value in fields.values_mut() {
				if let (Some(depth), true) = (reference_depth, is_link(value)) {
					if let Some(nested) = self.rest_reference(value, depth).await {
						*value = nested;
					}
				} else if let (Some(depth), true) = (reference_depth, is_link_array(value)) {
					let mut items = Vec::new();
					for link in value.as_array().into_iter().flatten() {
						if let Some(nested) = self.rest_reference(link, depth).await {
							items.push(nested);
						}
					}
					*value = Value::Array(items);
				} else if is_rich_text(value) {
					self.rest_rich_text(value, rich_text_depth).await;
				}
			}

			let sys = resolved.entity.get("sys").cloned().unwrap_or_else(|| json!({}));
			json!({ "sys": sys, "fields": fields })
		}
		.boxed_local()
	}

	/// Replaces each embed's `data.target` link in `document` with the localized entity it points at.
	pub(super) fn rest_rich_text<'b>(&'b self, document: &'b mut Value, depth: usize) -> LocalBoxFuture<'b, ()> {
		async move {
			for embed in rich_text::embeds(document) {
				let target = match document.pointer(&embed.target_pointer) {
					Some(target) if is_link(target) => target.clone(),
					_ => continue,
				};
				if depth >= self.limits.max_rich_text_depth {
					diagnostic!(warn, id = %embed.id, depth, "Rich text depth limit reached; leaving the embed unresolved");
					continue;
				}
				let resolved = match self.fetch(&target).await {
					Some(resolved) => resolved,
					None => continue,
				};
				// Embedded entities keep their own references as links; only their rich text is expanded further.
				let entity = self.rest_entity(resolved, None, depth + 1).await;
				if let Some(slot) = document.pointer_mut(&embed.target_pointer) {
					*slot = entity;
				}
			}
		}
		.boxed_local()
	}
}
