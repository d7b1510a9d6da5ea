//! Looks up referenced entities: locally if the editor already sent them along, otherwise by asking the editor.

use crate::{
	channel::{EditorMessage, EntityKind, ListenerId, MessageBus, PreviewMessage},
	claims::ClaimMap,
	classify::sys_id,
	config::Timing,
	query::capitalize,
	runtime::Runtime,
};
use futures::{
	channel::oneshot,
	future::{self, Either, LocalBoxFuture, Shared},
	FutureExt,
};
use serde_json::{Map, Value};
use std::{
	cell::RefCell,
	rc::{Rc, Weak},
};
use tracing::{error, instrument, trace};

type Lookup = Shared<LocalBoxFuture<'static, Option<Value>>>;
type InFlight = ClaimMap<(EntityKind, String), Lookup>;

/// A fully fetched entity and the GraphQL type name it would have.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
	pub entity: Value,
	pub type_name: String,
}

impl Resolved {
	#[must_use]
	pub fn new(entity: Value, kind: EntityKind) -> Self {
		let type_name = match kind {
			EntityKind::Asset => "Asset".to_owned(),
			EntityKind::Entry => type_name_of(&entity),
		};
		Self { entity, type_name }
	}
}

/// `sys.contentType.sys.id` with its first letter upper-cased (`"post"` → `"Post"`).
#[must_use]
pub fn type_name_of(entity: &Value) -> String {
	entity
		.pointer("/sys/contentType/sys/id")
		.and_then(Value::as_str)
		.map(capitalize)
		.or_else(|| entity.get("__typename").and_then(Value::as_str).map(str::to_owned))
		.unwrap_or_default()
}

pub struct ReferenceResolver {
	bus: Rc<MessageBus>,
	runtime: Rc<dyn Runtime>,
	in_flight: Rc<RefCell<InFlight>>,
	timing: Timing,
}

impl core::fmt::Debug for ReferenceResolver {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("ReferenceResolver")
			.field("in_flight", &self.in_flight.borrow().len())
			.field("timing", &self.timing)
			.finish_non_exhaustive()
	}
}

impl ReferenceResolver {
	#[must_use]
	pub fn new(bus: Rc<MessageBus>, runtime: Rc<dyn Runtime>, timing: Timing) -> Self {
		Self {
			bus,
			runtime,
			in_flight: Rc::default(),
			timing,
		}
	}

	/// Resolves to [`None`] if the editor doesn't answer within the request timeout.
	///
	/// Concurrent calls for the same entity share one request. A settled request stays shareable for the cleanup delay,
	/// so near-simultaneous duplicates don't ask the editor twice.
	#[instrument(skip(self, reference_map))]
	pub fn resolve(&self, id: &str, kind: EntityKind, locale: &str, reference_map: &Map<String, Value>) -> LocalBoxFuture<'static, Option<Resolved>> {
		if let Some(entity) = reference_map.get(id).filter(|entity| !entity.is_null()) {
			trace!("Found in reference map");
			return future::ready(Some(Resolved::new(entity.clone(), kind))).boxed_local();
		}

		let key = (kind, id.to_owned());
		let lookup = match self.in_flight.borrow_mut().claim(key.clone(), || self.request(id, kind, locale)) {
			Ok(lookup) => lookup.clone(),
			Err(_) => {
				error!("Too many concurrent lookups of the same entity");
				return future::ready(None).boxed_local();
			}
		};

		let waiter = Waiter {
			in_flight: Rc::clone(&self.in_flight),
			runtime: Rc::clone(&self.runtime),
			cleanup_delay: self.timing.cleanup_delay(),
			key,
		};
		async move {
			let entity = lookup.await;
			drop(waiter);
			entity.map(|entity| Resolved::new(entity, kind))
		}
		.boxed_local()
	}

	#[must_use]
	pub fn in_flight_count(&self) -> usize {
		self.in_flight.borrow().len()
	}

	fn request(&self, id: &str, kind: EntityKind, locale: &str) -> Lookup {
		let (sender, receiver) = oneshot::channel::<Value>();
		let sender = RefCell::new(Some(sender));
		let wanted = id.to_owned();
		let listener = self.bus.subscribe_filtered(
			|message| matches!(message, EditorMessage::RequestedEntities { .. }),
			move |message| {
				if let EditorMessage::RequestedEntities { entities } = message {
					if let Some(entity) = entities.iter().find(|entity| sys_id(entity) == Some(&wanted) && is_kind(entity, kind)) {
						if let Some(sender) = sender.borrow_mut().take() {
							let _ = sender.send(entity.clone());
						}
					}
				}
			},
		);

		self.bus.send(&PreviewMessage::RequestEntities {
			entity_ids: vec![id.to_owned()],
			entity_type: kind,
			locale: locale.to_owned(),
		});

		let listening = Listening {
			bus: Rc::downgrade(&self.bus),
			listener,
		};
		let timeout = self.runtime.sleep(self.timing.request_timeout());
		let id = id.to_owned();
		async move {
			let _listening = listening;
			let entity = match future::select(receiver, timeout).await {
				Either::Left((Ok(entity), _)) => Some(entity),
				Either::Left((Err(oneshot::Canceled), _)) => None,
				Either::Right(((), _)) => {
					diagnostic!(warn, %id, ?kind, "Editor didn't send the requested entity in time");
					None
				}
			};
			entity
		}
		.boxed_local()
		.shared()
	}
}

/// Entities without `sys.type` are accepted for either kind.
fn is_kind(entity: &Value, kind: EntityKind) -> bool {
	match entity.pointer("/sys/type").and_then(Value::as_str) {
		Some("Asset") => kind == EntityKind::Asset,
		Some("Entry") => kind == EntityKind::Entry,
		_ => true,
	}
}

/// Keeps a lookup's `REQUESTED_ENTITIES` listener registered until the lookup settles or is dropped unsettled.
struct Listening {
	bus: Weak<MessageBus>,
	listener: ListenerId,
}

impl Drop for Listening {
	fn drop(&mut self) {
		if let Some(bus) = self.bus.upgrade() {
			bus.unsubscribe(self.listener);
		}
	}
}

/// One caller's claim on an in-flight lookup. Releasing the last claim schedules eviction after the cleanup delay.
struct Waiter {
	in_flight: Rc<RefCell<InFlight>>,
	runtime: Rc<dyn Runtime>,
	cleanup_delay: core::time::Duration,
	key: (EntityKind, String),
}

impl Drop for Waiter {
	fn drop(&mut self) {
		match self.in_flight.borrow_mut().release(&self.key) {
			Ok(true) => (),
			Ok(false) => return,
			Err(error) => return error!("{}", error),
		}
		let in_flight = Rc::clone(&self.in_flight);
		let delay = self.runtime.sleep(self.cleanup_delay);
		self.runtime.spawn(
			async move {
				delay.await;
				let evicted = in_flight.borrow_mut().evict_unclaimed().count();
				trace!("Evicted {} settled lookup(s)", evicted);
			}
			.boxed_local(),
		);
	}
}
