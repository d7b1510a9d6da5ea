//! The typed message protocol between the preview and the editor, and a transport-agnostic bus for it.

use crate::{classify::ShapeKind, error::ChannelError, schema::ContentType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
	cell::{Cell, RefCell},
	rc::Rc,
};
use tracing::{error, instrument, trace, trace_span};

pub mod window;

/// Value of the `from` field on everything this crate sends.
pub const FROM: &str = "live-preview";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
	Entry,
	Asset,
}

/// Messages sent to the editor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreviewMessage {
	#[serde(rename_all = "camelCase")]
	RequestEntities { entity_ids: Vec<String>, entity_type: EntityKind, locale: String },
	Subscribed(SubscriptionReport),
	Unsubscribed(SubscriptionReport),
	TaggedElements(TaggedElementsReport),
	#[serde(rename_all = "camelCase")]
	Connected {
		connected: bool,
		tagged_element_count: usize,
		locale: String,
		is_inspector_enabled: bool,
		is_live_updates_enabled: bool,
	},
	TaggedFieldClicked(FieldReference),
	DebugModeEnabled {},
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionReport {
	#[serde(rename = "type")]
	pub shape: ShapeKind,
	pub locale: String,
	pub sys_ids: Vec<String>,
	pub event: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedElementsReport {
	pub elements: Vec<TaggedElementReport>,
	pub counts: TagCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedElementReport {
	pub attributes: FieldReference,
	pub coordinates: Coordinates,
	pub is_visible: bool,
	pub is_hovered: bool,
}

/// Where rendered output came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
	pub field_id: String,
	pub entity_id: String,
	pub entity_type: EntityKind,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub locale: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub space: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub environment: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Coordinates {
	pub left: f64,
	pub top: f64,
	pub width: f64,
	pub height: f64,
}

impl Coordinates {
	#[must_use]
	pub fn right(&self) -> f64 {
		self.left + self.width
	}

	#[must_use]
	pub fn bottom(&self) -> f64 {
		self.top + self.height
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagCounts {
	pub total: usize,
	pub with_source_maps: usize,
	pub visible: usize,
}

/// Messages received from the editor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditorMessage {
	RequestedEntities {
		#[serde(default)]
		entities: Vec<Value>,
	},
	#[serde(rename_all = "camelCase")]
	EntryUpdated {
		entity: Value,
		content_type: ContentType,
		/// Entities the editor already knows the update references, by id.
		#[serde(default)]
		entity_reference_map: Map<String, Value>,
	},
	#[serde(rename_all = "camelCase")]
	EntrySaved {
		entity: Value,
		#[serde(default)]
		content_type: Option<ContentType>,
	},
	#[serde(rename_all = "camelCase")]
	InspectorModeChanged { is_inspector_active: bool },
	#[serde(other)]
	Unknown,
}

/// Where serialized outbound messages go.
pub trait Transport {
	/// # Errors
	///
	/// Iff the message could not be handed to the underlying channel.
	fn post(&self, message: &Value) -> Result<(), ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Rc<dyn Fn(&EditorMessage)>;

/// Duplex editor channel: typed `send` on one side, fan-out of parsed inbound messages on the other.
///
/// Inbound messages enter through [`dispatch`](`MessageBus::dispatch`), which a [`Transport`] implementation
/// (or a test) calls with the raw message data.
pub struct MessageBus {
	transport: Rc<dyn Transport>,
	source: String,
	listeners: RefCell<Vec<(ListenerId, Listener)>>,
	next_id: Cell<u64>,
}

impl core::fmt::Debug for MessageBus {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("MessageBus")
			.field("source", &self.source)
			.field("listeners", &self.listeners.borrow().len())
			.finish_non_exhaustive()
	}
}

impl MessageBus {
	/// `source` identifies this preview to the editor, usually the page URL.
	#[must_use]
	pub fn new(transport: Rc<dyn Transport>, source: impl Into<String>) -> Self {
		Self {
			transport,
			source: source.into(),
			listeners: RefCell::new(Vec::new()),
			next_id: Cell::new(0),
		}
	}

	/// Wraps `message` in the `{ method, from, source }` envelope and posts it.
	#[instrument(skip(self))]
	pub fn send(&self, message: &PreviewMessage) {
		if let Err(error) = self.try_send(message) {
			error!("{}", error);
		}
	}

	/// # Errors
	///
	/// Iff serialization or the transport fails.
	pub fn try_send(&self, message: &PreviewMessage) -> Result<(), ChannelError> {
		let mut envelope = serde_json::to_value(message).map_err(ChannelError::Serialize)?;
		if let Value::Object(fields) = &mut envelope {
			fields.insert("from".to_owned(), Value::from(FROM));
			fields.insert("source".to_owned(), Value::from(self.source.as_str()));
		}
		self.transport.post(&envelope)
	}

	pub fn subscribe(&self, handler: impl 'static + Fn(&EditorMessage)) -> ListenerId {
		let id = ListenerId(self.next_id.get());
		self.next_id.set(id.0 + 1);
		self.listeners.borrow_mut().push((id, Rc::new(handler)));
		id
	}

	/// Like [`subscribe`](`MessageBus::subscribe`), but only forwards messages matching `predicate`.
	pub fn subscribe_filtered(&self, predicate: impl 'static + Fn(&EditorMessage) -> bool, handler: impl 'static + Fn(&EditorMessage)) -> ListenerId {
		self.subscribe(move |message| {
			if predicate(message) {
				handler(message);
			}
		})
	}

	/// Does nothing if the listener is already gone.
	pub fn unsubscribe(&self, id: ListenerId) {
		self.listeners.borrow_mut().retain(|(listener_id, _)| *listener_id != id);
	}

	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.listeners.borrow().len()
	}

	/// Parses one inbound message and hands it to every listener.
	///
	/// Listeners may (un)subscribe while being called; changes take effect with the next message.
	///
	/// # Errors
	///
	/// Iff `raw` isn't a valid [`EditorMessage`]. No listener is called in that case.
	pub fn dispatch(&self, raw: Value) -> Result<(), ChannelError> {
		let message: EditorMessage = serde_json::from_value(raw).map_err(ChannelError::Deserialize)?;
		self.dispatch_message(&message);
		Ok(())
	}

	pub fn dispatch_message(&self, message: &EditorMessage) {
		if *message == EditorMessage::Unknown {
			return trace!("Ignoring unknown editor message");
		}

		let span = trace_span!("Dispatching editor message", ?message);
		let _enter = span.enter();
		let listeners: Vec<Listener> = self.listeners.borrow().iter().map(|(_, listener)| Rc::clone(listener)).collect();
		for listener in listeners {
			listener(message);
		}
	}
}

#[cfg(test)]
pub(crate) mod testing {
	use super::{ChannelError, Transport};
	use serde_json::Value;
	use std::cell::RefCell;

	/// Remembers everything posted through it.
	#[derive(Debug, Default)]
	pub struct RecordingTransport {
		pub sent: RefCell<Vec<Value>>,
	}

	impl RecordingTransport {
		pub fn methods(&self) -> Vec<String> {
			self.sent
				.borrow()
				.iter()
				.filter_map(|message| message.get("method").and_then(Value::as_str).map(str::to_owned))
				.collect()
		}

		pub fn last(&self, method: &str) -> Option<Value> {
			self.sent.borrow().iter().rev().find(|message| message["method"] == method).cloned()
		}
	}

	impl Transport for RecordingTransport {
		fn post(&self, message: &Value) -> Result<(), ChannelError> {
			self.sent.borrow_mut().push(message.clone());
			Ok(())
		}
	}
}
