//! Merging one updated entity into an arbitrary rendered data tree.
//!
//! A merge pass searches the tree for every placement of the updated entity (`SEARCHING`).
//! Each match (`MATCHED`) is rebuilt by the field updater for the tree's [`EntityShape`], on top of the last merged version of that entity if one is cached.
//! The pass ends `MERGED` if anything changed, `EXHAUSTED` if the entity wasn't found, and `MATCHED` if it was found but already up to date.
//!
//! Input trees are never modified. Changed subtrees are rebuilt, unchanged ones are cloned as they are.

use crate::{
	channel::EntityKind,
	classify::{is_link, sys_id, EntityShape},
	config::Limits,
	error::MergeError,
	resolver::{ReferenceResolver, Resolved},
	schema::ContentType,
	storage::StorageCache,
};
use core::cell::Cell;
use futures::{future::LocalBoxFuture, FutureExt};
use serde_json::{Map, Value};
use tracing::{instrument, trace};

mod graphql;
mod rest;
mod rich_text;

/// One entity as edited, with everything needed to merge it.
#[derive(Debug, Clone, Copy)]
pub struct Update<'a> {
	/// Management-API shaped: `{ sys, fields: { [field]: { [locale]: value } } }`.
	pub entity: &'a Value,
	pub content_type: &'a ContentType,
	/// Entities the update references that the editor sent along, by id.
	pub reference_map: &'a Map<String, Value>,
}

/// Everything a merge pass reads besides the tree and the update.
#[derive(Clone, Copy)]
pub struct MergeContext<'a> {
	pub resolver: &'a ReferenceResolver,
	pub cache: &'a StorageCache,
	pub limits: Limits,
	pub locale: &'a str,
	pub shape: &'a EntityShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
	Searching,
	/// Found, but merging changed nothing.
	Matched,
	Merged,
	/// Not found.
	Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
	pub data: Value,
	/// Whether `data` differs from the input tree.
	pub updated: bool,
	pub state: MergeState,
}

/// Merges `update` into every placement of its entity in `tree`.
///
/// # Errors
///
/// [`MergeError::MissingUpdateId`] if the update has no `sys.id`.
#[instrument(skip_all, fields(id = ?sys_id(update.entity), locale = context.locale))]
pub async fn merge(context: MergeContext<'_>, tree: &Value, update: Update<'_>) -> Result<Merged, MergeError> {
	let id = sys_id(update.entity).ok_or(MergeError::MissingUpdateId)?;
	let merger = Merger {
		context,
		update,
		id,
		kind: entity_kind(update.entity),
		state: Cell::new(MergeState::Searching),
		resolution: Resolution {
			resolver: context.resolver,
			reference_map: update.reference_map,
			locale: context.locale,
			limits: context.limits,
		},
	};

	let changed = merger.search(tree, 0).await?;
	let state = match (merger.state.get(), &changed) {
		(MergeState::Searching, _) => MergeState::Exhausted,
		(_, Some(_)) => MergeState::Merged,
		(state, None) => state,
	};
	trace!(?state, "Merge pass done");
	Ok(match changed {
		Some(data) => Merged { data, updated: true, state },
		None => Merged {
			data: tree.clone(),
			updated: false,
			state,
		},
	})
}

struct Merger<'a> {
	context: MergeContext<'a>,
	update: Update<'a>,
	id: &'a str,
	kind: EntityKind,
	state: Cell<MergeState>,
	resolution: Resolution<'a>,
}

impl<'a> Merger<'a> {
	/// Returns the rebuilt subtree iff something below `node` changed.
	fn search<'b>(&'b self, node: &'b Value, depth: usize) -> LocalBoxFuture<'b, Result<Option<Value>, MergeError>> {
		async move {
			if depth >= self.context.limits.max_tree_depth {
				diagnostic!(warn, depth, "Depth limit reached while searching for the updated entity; not descending further");
				return Ok(None);
			}

			match node {
				Value::Object(object) => {
					if self.is_match(node) {
						self.state.set(MergeState::Matched);
						return self.merge_entity(node).await;
					}

					let mut rebuilt: Option<Map<String, Value>> = None;
					for (key, child) in object {
						if !(child.is_object() || child.is_array()) {
							continue;
						}
						if let Some(child) = self.search(child, depth + 1).await? {
							rebuilt.get_or_insert_with(|| object.clone()).insert(key.clone(), child);
						}
					}
					Ok(rebuilt.map(Value::Object))
				}
				Value::Array(items) => {
					let mut rebuilt: Option<Vec<Value>> = None;
					for (i, item) in items.iter().enumerate() {
						if !(item.is_object() || item.is_array()) {
							continue;
						}
						if let Some(item) = self.search(item, depth + 1).await? {
							rebuilt.get_or_insert_with(|| items.clone())[i] = item;
						}
					}
					Ok(rebuilt.map(Value::Array))
				}
				_ => Ok(None),
			}
		}
		.boxed_local()
	}

	fn is_match(&self, node: &Value) -> bool {
		sys_id(node) == Some(self.id) && !is_link(node) && node_kind(node).map_or(true, |kind| kind == self.kind)
	}

	#[instrument(skip(self, node), fields(id = self.id))]
	async fn merge_entity(&self, node: &Value) -> Result<Option<Value>, MergeError> {
		let locale = self.context.locale;
		let mut entity = node.clone();
		if let Some(cached) = self.context.cache.get(self.id, locale) {
			overlay_cached(&mut entity, &cached);
		}

		match self.context.shape {
			EntityShape::Rest => rest::update_entity(&self.resolution, self.update, &mut entity).await?,
			EntityShape::GraphQL(query) => graphql::update_entity(&self.resolution, query.as_deref(), self.update, &mut entity).await,
		}

		self.context.cache.set(self.id, locale, entity.clone());
		Ok(if entity == *node { None } else { Some(entity) })
	}
}

/// Copies keys of `cached` onto `entity`, but only those `entity` already has, so the rendered shape (and query selection) is kept.
pub(crate) fn overlay_cached(entity: &mut Value, cached: &Value) {
	match (entity.get("__typename"), cached.get("__typename")) {
		(Some(rendered), Some(stored)) if rendered == stored => overlay_keys(entity, cached),
		(None, None) => {
			if let (Some(target), Some(source)) = (entity.get_mut("fields"), cached.get("fields")) {
				overlay_keys(target, source);
			}
		}
		_ => (),
	}
}

fn overlay_keys(target: &mut Value, source: &Value) {
	if let (Value::Object(target), Value::Object(source)) = (target, source) {
		for (key, value) in target.iter_mut() {
			if let Some(cached) = source.get(key) {
				*value = cached.clone();
			}
		}
	}
}

/// Kind of an entity node, if it says. Updates are matched against same-kind nodes only, since asset and entry ids may collide.
fn node_kind(node: &Value) -> Option<EntityKind> {
	match (node.pointer("/sys/type").and_then(Value::as_str), node.get("__typename").and_then(Value::as_str)) {
		(Some("Asset"), _) | (_, Some("Asset")) => Some(EntityKind::Asset),
		(Some("Entry"), _) | (_, Some(_)) => Some(EntityKind::Entry),
		_ => None,
	}
}

fn entity_kind(entity: &Value) -> EntityKind {
	node_kind(entity).unwrap_or(EntityKind::Entry)
}

/// `Asset` for asset links, `Entry` otherwise.
pub(crate) fn link_kind(link: &Value) -> EntityKind {
	match link.pointer("/sys/linkType").and_then(Value::as_str) {
		Some("Asset") => EntityKind::Asset,
		_ => EntityKind::Entry,
	}
}

/// The value of `fields[key][locale]`, treating JSON `null` as absent.
pub(crate) fn localized<'v>(entity: &'v Value, key: &str, locale: &str) -> Option<&'v Value> {
	entity.get("fields")?.get(key)?.get(locale).filter(|value| !value.is_null())
}

/// All fields of a management-API entity in one locale. Fields without a value in that locale are left out.
pub(crate) fn localize_fields(entity: &Value, locale: &str) -> Map<String, Value> {
	let mut localized = Map::new();
	if let Some(Value::Object(fields)) = entity.get("fields") {
		for (key, value) in fields {
			match value {
				Value::Object(by_locale) => {
					if let Some(value) = by_locale.get(locale).filter(|value| !value.is_null()) {
						localized.insert(key.clone(), value.clone());
					}
				}
				other => {
					localized.insert(key.clone(), other.clone());
				}
			}
		}
	}
	localized
}

pub(crate) fn is_rich_text(value: &Value) -> bool {
	value.get("nodeType").and_then(Value::as_str) == Some("document")
}

pub(crate) fn is_link_array(value: &Value) -> bool {
	matches!(value, Value::Array(items) if !items.is_empty() && items.iter().all(is_link))
}

/// Reference lookups shared by both field updaters.
pub(crate) struct Resolution<'a> {
	pub resolver: &'a ReferenceResolver,
	pub reference_map: &'a Map<String, Value>,
	pub locale: &'a str,
	pub limits: Limits,
}

impl<'a> Resolution<'a> {
	/// [`None`] for malformed links and references the editor couldn't provide.
	pub async fn fetch(&self, link: &Value) -> Option<Resolved> {
		let id = sys_id(link)?;
		let resolved = self.resolver.resolve(id, link_kind(link), self.locale, self.reference_map).await;
		if resolved.is_none() {
			diagnostic!(warn, id, "Reference could not be resolved; leaving it out");
		}
		resolved
	}
}
