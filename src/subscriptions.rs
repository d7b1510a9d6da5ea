//! Subscribed data trees and their fan-out of editor updates.

use crate::{
	channel::{EditorMessage, ListenerId, MessageBus, PreviewMessage, SubscriptionReport},
	classify::{classify, is_link, sys_id, EntityShape},
	config::Limits,
	error::ShapeError,
	merge::{merge, overlay_cached, MergeContext, Update},
	query::QueryParams,
	resolver::ReferenceResolver,
	runtime::Runtime,
	schema::ContentType,
	storage::StorageCache,
};
use core::{
	cell::{Cell, RefCell},
	time::Duration,
};
use futures::{
	channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
	FutureExt, StreamExt,
};
use hashbrown::HashMap;
use serde_json::{Map, Value};
use std::rc::{Rc, Weak};
use tracing::{instrument, trace};

/// Reported as `event` in `SUBSCRIBED`/`UNSUBSCRIBED`.
const EVENT: &str = "edit";

pub type Callback = Rc<dyn Fn(Value)>;

/// What to keep up to date, and whom to tell.
#[derive(Clone)]
pub struct SubscriptionConfig {
	pub data: Value,
	/// Defaults to the locale the SDK was initialized with.
	pub locale: Option<String>,
	pub callback: Callback,
	/// The GraphQL query that produced `data`, to learn its aliases and selections.
	pub query: Option<String>,
}

impl core::fmt::Debug for SubscriptionConfig {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("SubscriptionConfig")
			.field("data", &self.data)
			.field("locale", &self.locale)
			.field("query", &self.query)
			.finish_non_exhaustive()
	}
}

/// One editor change, as delivered by `ENTRY_UPDATED`.
#[derive(Debug, Clone)]
pub struct EntryUpdate {
	pub entity: Value,
	pub content_type: ContentType,
	pub reference_map: Map<String, Value>,
}

struct Subscription {
	id: u64,
	data: RefCell<Value>,
	locale: String,
	shape: EntityShape,
	sys_ids: Vec<String>,
	callback: Callback,
	live: Cell<bool>,
	/// Updates not yet merged into `data`, oldest first.
	pending: UnboundedSender<Rc<EntryUpdate>>,
}

impl Subscription {
	fn report(&self) -> SubscriptionReport {
		SubscriptionReport {
			shape: self.shape.kind(),
			locale: self.locale.clone(),
			sys_ids: self.sys_ids.clone(),
			event: EVENT,
		}
	}

	/// Stores `data` and calls back, unless unsubscribed in the meantime.
	fn deliver(&self, data: Value) {
		if !self.live.get() {
			return trace!(subscription = self.id, "Dropping result for a cancelled subscription");
		}
		*self.data.borrow_mut() = data.clone();
		(self.callback)(data);
	}
}

struct Inner {
	bus: Rc<MessageBus>,
	runtime: Rc<dyn Runtime>,
	resolver: Rc<ReferenceResolver>,
	cache: Rc<StorageCache>,
	limits: Limits,
	default_locale: String,
	subscriptions: RefCell<HashMap<u64, Rc<Subscription>>>,
	next_id: Cell<u64>,
}

/// Keeps every subscribed tree in sync with `ENTRY_UPDATED` messages.
///
/// Each subscription has its own queue, so it sees its updates in the order the editor sent them,
/// while a slow merge (for example one waiting for a referenced entity) never holds up other subscriptions.
pub struct SubscriptionRegistry {
	inner: Rc<Inner>,
	listener: ListenerId,
}

impl core::fmt::Debug for SubscriptionRegistry {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("SubscriptionRegistry")
			.field("subscriptions", &self.inner.subscriptions.borrow().len())
			.finish_non_exhaustive()
	}
}

impl SubscriptionRegistry {
	/// Starts listening to `bus` for `ENTRY_UPDATED`. Merges run on `runtime`.
	#[must_use]
	pub fn new(
		bus: Rc<MessageBus>,
		runtime: Rc<dyn Runtime>,
		resolver: Rc<ReferenceResolver>,
		cache: Rc<StorageCache>,
		limits: Limits,
		default_locale: impl Into<String>,
	) -> Self {
		let inner = Rc::new(Inner {
			bus: Rc::clone(&bus),
			runtime,
			resolver,
			cache,
			limits,
			default_locale: default_locale.into(),
			subscriptions: RefCell::new(HashMap::new()),
			next_id: Cell::new(0),
		});

		let weak = Rc::downgrade(&inner);
		let listener = bus.subscribe_filtered(
			|message| matches!(message, EditorMessage::EntryUpdated { .. }),
			move |message| {
				if let EditorMessage::EntryUpdated {
					entity,
					content_type,
					entity_reference_map,
				} = message
				{
					let update = EntryUpdate {
						entity: entity.clone(),
						content_type: content_type.clone(),
						reference_map: entity_reference_map.clone(),
					};
					match weak.upgrade() {
						Some(inner) => inner.enqueue(update),
						None => trace!("Registry is gone; dropping update"),
					}
				}
			},
		);

		Self { inner, listener }
	}

	/// Registers `config` and returns the handle that cancels it.
	///
	/// Data that is no entity tree (not an object or array, no `sys.id`, or no recognizable shape) is rejected with a diagnostic,
	/// and the returned handle does nothing.
	#[instrument(skip(self, config))]
	pub fn subscribe(&self, config: SubscriptionConfig) -> Unsubscribe {
		let inner = &self.inner;
		let query = config.query.as_deref().and_then(|query| match QueryParams::parse(query) {
			Ok(params) => Some(Rc::new(params)),
			Err(error) => {
				diagnostic!(warn, %error, "Couldn't parse the subscription's GraphQL query; aliases won't be updated");
				None
			}
		});

		let classification = classify(&config.data, inner.limits.max_classify_depth);
		let shape = match container(&config.data).and_then(|()| classification.shape(query)) {
			Ok(shape) => shape,
			Err(error) => {
				diagnostic!(error, %error, "Invalid subscription data; it won't receive live updates");
				return Unsubscribe::noop();
			}
		};

		let id = inner.next_id.get();
		inner.next_id.set(id + 1);
		let (pending, queue) = mpsc::unbounded();
		let subscription = Rc::new(Subscription {
			id,
			data: RefCell::new(config.data),
			locale: config.locale.unwrap_or_else(|| inner.default_locale.clone()),
			shape,
			sys_ids: classification.sys_ids,
			callback: config.callback,
			live: Cell::new(true),
			pending,
		});
		inner.subscriptions.borrow_mut().insert(id, Rc::clone(&subscription));
		inner.spawn_worker(&subscription, queue);
		inner.bus.send(&PreviewMessage::Subscribed(subscription.report()));
		inner.schedule_restore(&subscription);

		Unsubscribe {
			registration: Some((Rc::downgrade(inner), id)),
		}
	}

	/// Queues `update` for every subscription. Equivalent to receiving it as `ENTRY_UPDATED`.
	pub fn handle_entry_updated(&self, update: EntryUpdate) {
		self.inner.enqueue(update);
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.inner.subscriptions.borrow().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.inner.subscriptions.borrow().is_empty()
	}

	/// Whether any live subscription's data contains the entity `id`.
	#[must_use]
	pub fn contains_entity(&self, id: &str) -> bool {
		self.inner.subscriptions.borrow().values().any(|subscription| subscription.sys_ids.iter().any(|known| known == id))
	}

	/// Current data of every subscription.
	#[must_use]
	pub fn snapshot(&self) -> Vec<Value> {
		self.inner.subscriptions.borrow().values().map(|subscription| subscription.data.borrow().clone()).collect()
	}
}

impl Drop for SubscriptionRegistry {
	fn drop(&mut self) {
		self.inner.bus.unsubscribe(self.listener);
		for (_, subscription) in self.inner.subscriptions.borrow_mut().drain() {
			subscription.live.set(false);
		}
	}
}

impl Inner {
	fn enqueue(&self, update: EntryUpdate) {
		let update = Rc::new(update);
		for subscription in self.subscriptions.borrow().values() {
			if subscription.pending.unbounded_send(Rc::clone(&update)).is_err() {
				trace!(subscription = subscription.id, "Worker is gone; dropping update");
			}
		}
	}

	/// Merges `subscription`'s queued updates one after another, until it is dropped.
	fn spawn_worker(self: &Rc<Self>, subscription: &Rc<Subscription>, mut queue: UnboundedReceiver<Rc<EntryUpdate>>) {
		let inner = Rc::downgrade(self);
		let subscription = Rc::downgrade(subscription);
		self.runtime.spawn(
			async move {
				while let Some(update) = queue.next().await {
					let (registry, live) = match (inner.upgrade(), subscription.upgrade()) {
						(Some(registry), Some(live)) if live.live.get() => (registry, live),
						_ => break,
					};
					registry.apply_to(&live, &update).await;
				}
				trace!("Subscription worker stopped");
			}
			.boxed_local(),
		);
	}

	/// Hands the subscriber any newer cached versions of its entities, on the next turn.
	fn schedule_restore(&self, subscription: &Rc<Subscription>) {
		let subscription = Rc::downgrade(subscription);
		let cache = Rc::clone(&self.cache);
		let max_depth = self.limits.max_tree_depth;
		let yield_once = self.runtime.sleep(Duration::ZERO);
		self.runtime.spawn(
			async move {
				yield_once.await;
				let subscription = match subscription.upgrade() {
					Some(subscription) if subscription.live.get() => subscription,
					_ => return,
				};
				let restored = restore_from_cache(&subscription.data.borrow(), &cache, &subscription.locale, max_depth);
				if let Some(restored) = restored {
					trace!(subscription = subscription.id, "Restored from cache");
					subscription.deliver(restored);
				}
			}
			.boxed_local(),
		);
	}

	#[instrument(skip_all, fields(subscription = subscription.id, id = ?sys_id(&update.entity)))]
	async fn apply_to(&self, subscription: &Subscription, update: &EntryUpdate) {
		let tree = subscription.data.borrow().clone();
		let context = MergeContext {
			resolver: &self.resolver,
			cache: &self.cache,
			limits: self.limits,
			locale: &subscription.locale,
			shape: &subscription.shape,
		};
		let update = Update {
			entity: &update.entity,
			content_type: &update.content_type,
			reference_map: &update.reference_map,
		};
		match merge(context, &tree, update).await {
			Ok(merged) if merged.updated => subscription.deliver(merged.data),
			Ok(merged) => trace!(subscription = subscription.id, state = ?merged.state, "Nothing changed"),
			Err(error) => diagnostic!(error, subscription = subscription.id, %error, "Failed to merge an update"),
		}
	}

	fn remove(&self, id: u64) {
		let removed = self.subscriptions.borrow_mut().remove(&id);
		if let Some(subscription) = removed {
			subscription.live.set(false);
			self.bus.send(&PreviewMessage::Unsubscribed(subscription.report()));
		}
	}
}

fn container(data: &Value) -> Result<(), ShapeError> {
	if data.is_object() || data.is_array() {
		Ok(())
	} else {
		Err(ShapeError::NotAContainer)
	}
}

/// Replaces each entity in `tree` that has a cached version with that version, keeping the rendered keys.
/// [`None`] if nothing changed.
fn restore_from_cache(tree: &Value, cache: &StorageCache, locale: &str, depth_limit: usize) -> Option<Value> {
	if depth_limit == 0 {
		return None;
	}
	match tree {
		Value::Object(object) => {
			if let (Some(id), false) = (sys_id(tree), is_link(tree)) {
				if let Some(cached) = cache.get(id, locale) {
					let mut restored = tree.clone();
					overlay_cached(&mut restored, &cached);
					return (restored != *tree).then_some(restored);
				}
			}
			let mut rebuilt: Option<Map<String, Value>> = None;
			for (key, child) in object {
				if let Some(child) = restore_from_cache(child, cache, locale, depth_limit - 1) {
					rebuilt.get_or_insert_with(|| object.clone()).insert(key.clone(), child);
				}
			}
			rebuilt.map(Value::Object)
		}
		Value::Array(items) => {
			let mut rebuilt: Option<Vec<Value>> = None;
			for (i, item) in items.iter().enumerate() {
				if let Some(item) = restore_from_cache(item, cache, locale, depth_limit - 1) {
					rebuilt.get_or_insert_with(|| items.clone())[i] = item;
				}
			}
			rebuilt.map(Value::Array)
		}
		_ => None,
	}
}

/// Cancels a subscription. Results of work already in flight are discarded.
#[derive(Debug)]
#[must_use = "dropping an `Unsubscribe` keeps the subscription alive for the registry's lifetime"]
pub struct Unsubscribe {
	registration: Option<(Weak<Inner>, u64)>,
}

impl Unsubscribe {
	/// A handle for a subscription that was never registered.
	pub fn noop() -> Self {
		Self { registration: None }
	}

	#[must_use]
	pub fn is_noop(&self) -> bool {
		self.registration.is_none()
	}

	pub fn unsubscribe(self) {
		if let Some((inner, id)) = self.registration {
			if let Some(inner) = inner.upgrade() {
				inner.remove(id);
			}
		}
	}
}
