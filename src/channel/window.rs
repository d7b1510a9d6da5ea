//! [`postMessage`](https://developer.mozilla.org/en-US/docs/Web/API/Window/postMessage) transport between the preview iframe and the editor window.

use super::{MessageBus, Transport};
use crate::error::ChannelError;
use serde::Serialize;
use serde_json::Value;
use std::rc::Weak;
use tracing::{error, instrument, trace, warn};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};

/// Posts to the parent window (or the opener, for previews in their own tab), once per allowed origin.
#[derive(Debug)]
pub struct WindowTransport {
	target: web_sys::Window,
	target_origins: Vec<String>,
}

impl WindowTransport {
	/// Returns [`None`] if the page isn't embedded in or opened by another window.
	#[must_use]
	pub fn to_editor(window: &web_sys::Window, target_origins: Vec<String>) -> Option<Self> {
		let parent = window.parent().ok().flatten().filter(|parent| {
			let (parent, window): (&JsValue, &JsValue) = (parent.as_ref(), window.as_ref());
			!parent.loose_eq(window)
		});
		let target = parent.or_else(|| window.opener().ok().filter(|opener| !opener.is_null() && !opener.is_undefined()).map(JsCast::unchecked_into));
		target.map(|target| Self { target, target_origins })
	}
}

impl Transport for WindowTransport {
	fn post(&self, message: &Value) -> Result<(), ChannelError> {
		let message = message
			.serialize(&serde_wasm_bindgen::Serializer::json_compatible())
			.map_err(|error| ChannelError::Post(error.to_string()))?;
		for origin in &self.target_origins {
			self.target.post_message(&message, origin).map_err(|error| ChannelError::Post(format!("{:?}", error)))?;
		}
		Ok(())
	}
}

/// Feeds `message` events from allowed origins into a [`MessageBus`]. Stops listening when dropped.
#[derive(Debug)]
pub struct WindowListener {
	window: web_sys::Window,
	handler: Closure<dyn Fn(web_sys::MessageEvent)>,
}

impl WindowListener {
	#[must_use]
	#[instrument(skip(window, bus))]
	pub fn attach(window: &web_sys::Window, bus: Weak<MessageBus>, allowed_origins: Vec<String>) -> Self {
		let handler = Closure::wrap(Box::new(move |event: web_sys::MessageEvent| {
			let origin = event.origin();
			if !allowed_origins.iter().any(|allowed| *allowed == origin) {
				return trace!("Ignoring message from {:?}", origin);
			}
			let bus = match bus.upgrade() {
				Some(bus) => bus,
				None => return,
			};
			let raw: Value = match serde_wasm_bindgen::from_value(event.data()) {
				Ok(raw) => raw,
				Err(error) => return warn!("Unreadable message from {:?}: {}", origin, error),
			};
			if let Err(error) = bus.dispatch(raw) {
				warn!("{}", error);
			}
		}) as Box<dyn Fn(web_sys::MessageEvent)>);

		if let Err(error) = window.add_event_listener_with_callback("message", handler.as_ref().unchecked_ref()) {
			error!("Failed to listen for editor messages: {:?}", error);
		}

		Self { window: window.clone(), handler }
	}
}

impl Drop for WindowListener {
	fn drop(&mut self) {
		if let Err(error) = self.window.remove_event_listener_with_callback("message", self.handler.as_ref().unchecked_ref()) {
			error!("Failed to stop listening for editor messages: {:?}", error);
		}
	}
}
