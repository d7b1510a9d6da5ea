//! The SDK handle.

use crate::{
	channel::{
		window::{WindowListener, WindowTransport},
		EditorMessage, ListenerId, MessageBus, PreviewMessage, Transport,
	},
	classify::sys_id,
	config::LivePreviewConfig,
	debug,
	error::ConfigError,
	inspector::Inspector,
	resolver::ReferenceResolver,
	runtime::{BrowserRuntime, Runtime},
	scan,
	storage::StorageCache,
	subscriptions::{SubscriptionConfig, SubscriptionRegistry, Unsubscribe},
	tagging::{self, TagSpec},
};
use core::cell::{Cell, RefCell};
use serde_json::Value;
use std::rc::{Rc, Weak};
use tracing::{info, instrument};

pub type SaveCallback = Rc<dyn Fn(&Value)>;

struct Shared {
	subscriptions: SubscriptionRegistry,
	inspector: RefCell<Option<Inspector>>,
	on_saved: RefCell<Vec<(u64, SaveCallback)>>,
	next_save_id: Cell<u64>,
}

impl Shared {
	fn entry_list(&self) -> Vec<String> {
		match &*self.inspector.borrow() {
			Some(inspector) => {
				inspector.refresh();
				scan::entry_ids(&inspector.tagged_elements())
			}
			None => Vec::new(),
		}
	}

	/// Whether `id` is shown on this page, as far as tags and live subscriptions tell.
	fn shows(&self, id: &str) -> bool {
		self.subscriptions.contains_entity(id) || self.entry_list().iter().any(|entry| entry == id)
	}

	fn entry_saved(&self, entity: &Value) {
		let id = match sys_id(entity) {
			Some(id) => id,
			None => return diagnostic!(warn, "Saved entity has no id"),
		};
		if !self.shows(id) {
			return diagnostic!(debug, id, "Saved entry isn't on this page");
		}
		let callbacks: Vec<SaveCallback> = self.on_saved.borrow().iter().map(|(_, callback)| Rc::clone(callback)).collect();
		for callback in callbacks {
			callback(entity);
		}
	}
}

/// One live preview connection.
///
/// Create it once per page with [`init_in_window`](`LivePreview::init_in_window`), or with [`create`](`LivePreview::create`) for any other [`MessageBus`].
/// Dropping it (or calling [`teardown`](`LivePreview::teardown`)) stops all listening and reporting.
pub struct LivePreview {
	config: LivePreviewConfig,
	bus: Rc<MessageBus>,
	cache: Rc<StorageCache>,
	shared: Rc<Shared>,
	bus_listener: ListenerId,
	window_listener: Option<WindowListener>,
	debug_mode: Option<debug::DebugMode>,
}

impl core::fmt::Debug for LivePreview {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("LivePreview")
			.field("config", &self.config)
			.field("bus", &self.bus)
			.field("subscriptions", &self.shared.subscriptions)
			.field("in_window", &self.window_listener.is_some())
			.field("debug_mode", &self.debug_mode.is_some())
			.finish_non_exhaustive()
	}
}

impl LivePreview {
	/// Connects to the editor over `bus`, announcing this preview with `CONNECTED`.
	///
	/// # Errors
	///
	/// Iff `config` is invalid.
	#[instrument(skip(config, bus, runtime), fields(locale = %config.locale))]
	pub fn create(config: LivePreviewConfig, bus: Rc<MessageBus>, runtime: Rc<dyn Runtime>) -> Result<Self, ConfigError> {
		Self::connect(config, bus, runtime, |_| None)
	}

	/// Sets up the whole SDK in the current browser window: messaging with the editor frame, the inspector, and console logging in debug mode.
	///
	/// # Errors
	///
	/// Iff `config` is invalid, there is no window, or the page isn't embedded in (or opened by) another window.
	pub fn init_in_window(config: LivePreviewConfig) -> Result<Self, ConfigError> {
		config.validate()?;
		if config.debug_mode {
			debug::install_browser_subscriber();
		}
		let window = web_sys::window().ok_or(ConfigError::NoWindow)?;
		let transport = WindowTransport::to_editor(&window, config.target_origin.clone()).ok_or(ConfigError::NotEmbedded)?;
		let source = window.location().href().unwrap_or_default();
		let bus = Rc::new(MessageBus::new(Rc::new(transport) as Rc<dyn Transport>, source));
		let runtime: Rc<dyn Runtime> = Rc::new(BrowserRuntime::new(window.clone()));

		let window_listener = WindowListener::attach(&window, Rc::downgrade(&bus), config.target_origin.clone());
		let mut preview = Self::connect(config, bus, runtime, |parts| {
			parts
				.config
				.enable_inspector_mode
				.then(|| Inspector::attach(&window, Rc::clone(parts.bus), Rc::clone(parts.runtime), parts.config.timing, parts.config.ignore_manual_tagging))
				.flatten()
		})?;
		preview.window_listener = Some(window_listener);
		Ok(preview)
	}

	fn connect(
		config: LivePreviewConfig,
		bus: Rc<MessageBus>,
		runtime: Rc<dyn Runtime>,
		inspector: impl FnOnce(Parts<'_>) -> Option<Inspector>,
	) -> Result<Self, ConfigError> {
		config.validate()?;
		let debug_mode = config.debug_mode.then(debug::DebugMode::enable);

		let cache = Rc::new(StorageCache::new());
		let resolver = Rc::new(ReferenceResolver::new(Rc::clone(&bus), Rc::clone(&runtime), config.timing));
		let subscriptions = SubscriptionRegistry::new(Rc::clone(&bus), Rc::clone(&runtime), resolver, Rc::clone(&cache), config.limits, config.locale.clone());
		let inspector = inspector(Parts {
			config: &config,
			bus: &bus,
			runtime: &runtime,
		});
		let tagged_element_count = inspector.as_ref().map_or(0, |inspector| inspector.tagged_elements().len());
		let shared = Rc::new(Shared {
			subscriptions,
			inspector: RefCell::new(inspector),
			on_saved: RefCell::new(Vec::new()),
			next_save_id: Cell::new(0),
		});

		let weak: Weak<Shared> = Rc::downgrade(&shared);
		let bus_listener = bus.subscribe_filtered(
			|message| matches!(message, EditorMessage::EntrySaved { .. }),
			move |message| {
				if let (EditorMessage::EntrySaved { entity, .. }, Some(shared)) = (message, weak.upgrade()) {
					shared.entry_saved(entity);
				}
			},
		);

		bus.send(&PreviewMessage::Connected {
			connected: true,
			tagged_element_count,
			locale: config.locale.clone(),
			is_inspector_enabled: config.enable_inspector_mode,
			is_live_updates_enabled: config.enable_live_updates,
		});
		if config.debug_mode {
			bus.send(&PreviewMessage::DebugModeEnabled {});
		}
		info!("Live preview connected");

		Ok(Self {
			config,
			bus,
			cache,
			shared,
			bus_listener,
			window_listener: None,
			debug_mode,
		})
	}

	#[must_use]
	pub fn config(&self) -> &LivePreviewConfig {
		&self.config
	}

	#[must_use]
	pub fn bus(&self) -> &Rc<MessageBus> {
		&self.bus
	}

	#[must_use]
	pub fn cache(&self) -> &StorageCache {
		&self.cache
	}

	/// Keeps `config.data` up to date with edits. See [`SubscriptionRegistry::subscribe`].
	///
	/// Does nothing if live updates are disabled.
	pub fn subscribe(&self, config: SubscriptionConfig) -> Unsubscribe {
		if !self.config.enable_live_updates {
			diagnostic!(info, "Live updates are disabled; not subscribing");
			return Unsubscribe::noop();
		}
		self.shared.subscriptions.subscribe(config)
	}

	/// Attributes that tag an element as rendering `spec`'s field. See [`tagging::get_props`].
	///
	/// The space and environment default to the configured ones.
	#[must_use]
	pub fn get_props(&self, spec: &TagSpec) -> Option<Vec<(&'static str, String)>> {
		let spec = TagSpec {
			space: spec.space.clone().or_else(|| self.config.space.clone()),
			environment: spec.environment.clone().or_else(|| self.config.environment.clone()),
			..spec.clone()
		};
		tagging::get_props(&spec, self.config.enable_inspector_mode)
	}

	/// Ids of the entries currently tagged on the page, in document order.
	#[must_use]
	pub fn get_entry_list(&self) -> Vec<String> {
		self.shared.entry_list()
	}

	/// Calls `callback` with each `ENTRY_SAVED` entity that is shown on this page.
	pub fn on_entry_saved(&self, callback: impl 'static + Fn(&Value)) -> SaveListener {
		let id = self.shared.next_save_id.get();
		self.shared.next_save_id.set(id + 1);
		self.shared.on_saved.borrow_mut().push((id, Rc::new(callback)));
		SaveListener {
			shared: Rc::downgrade(&self.shared),
			id,
		}
	}

	/// Stops listening to the editor and the page.
	pub fn teardown(self) {
		drop(self);
	}
}

impl Drop for LivePreview {
	fn drop(&mut self) {
		self.bus.unsubscribe(self.bus_listener);
		self.shared.inspector.borrow_mut().take();
		self.shared.on_saved.borrow_mut().clear();
		info!("Live preview disconnected");
	}
}

/// What an inspector is built from.
struct Parts<'a> {
	config: &'a LivePreviewConfig,
	bus: &'a Rc<MessageBus>,
	runtime: &'a Rc<dyn Runtime>,
}

/// Registration of an [`on_entry_saved`](`LivePreview::on_entry_saved`) callback.
#[derive(Debug)]
#[must_use = "dropping a `SaveListener` keeps the callback registered"]
pub struct SaveListener {
	shared: Weak<Shared>,
	id: u64,
}

impl SaveListener {
	pub fn remove(self) {
		if let Some(shared) = self.shared.upgrade() {
			shared.on_saved.borrow_mut().retain(|(id, _)| *id != self.id);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{channel::testing::RecordingTransport, runtime::testing::ManualRuntime};
	use serde_json::json;

	fn start(config: LivePreviewConfig) -> (Rc<RecordingTransport>, Rc<ManualRuntime>, Result<LivePreview, ConfigError>) {
		let transport = Rc::new(RecordingTransport::default());
		let bus = Rc::new(MessageBus::new(Rc::clone(&transport) as Rc<dyn Transport>, "http://localhost:3000/"));
		let runtime = Rc::new(ManualRuntime::new());
		let preview = LivePreview::create(config, bus, Rc::clone(&runtime) as Rc<dyn Runtime>);
		(transport, runtime, preview)
	}

	#[test]
	fn announces_itself() {
		let (transport, _runtime, preview) = start(LivePreviewConfig::new("en-US"));
		let _preview = preview.unwrap();

		let connected = transport.last("CONNECTED").unwrap();
		assert_eq!(connected["connected"], true);
		assert_eq!(connected["taggedElementCount"], 0);
		assert_eq!(connected["locale"], "en-US");
		assert_eq!(connected["isInspectorEnabled"], true);
		assert_eq!(connected["isLiveUpdatesEnabled"], true);
		assert_eq!(connected["source"], "http://localhost:3000/");
		assert_eq!(transport.methods(), ["CONNECTED"]);
	}

	#[test]
	fn debug_mode_is_announced_too() {
		let (transport, _runtime, preview) = start(LivePreviewConfig {
			debug_mode: true,
			..LivePreviewConfig::new("de")
		});
		let preview = preview.unwrap();
		assert!(debug::is_enabled());
		drop(preview);
		assert!(!debug::is_enabled());

		assert_eq!(transport.methods(), ["CONNECTED", "DEBUG_MODE_ENABLED"]);
	}

	#[test]
	fn quiet_instances_leave_debug_mode_of_others_alone() {
		let (_transport, _runtime, verbose) = start(LivePreviewConfig {
			debug_mode: true,
			..LivePreviewConfig::new("en-US")
		});
		let verbose = verbose.unwrap();
		let (_transport, _runtime, quiet) = start(LivePreviewConfig::new("en-US"));
		let quiet = quiet.unwrap();
		assert!(debug::is_enabled());

		verbose.teardown();
		assert!(!debug::is_enabled());
		drop(quiet);
	}

	#[test]
	fn invalid_config_is_rejected() {
		let (transport, _runtime, preview) = start(LivePreviewConfig::default());
		assert_eq!(preview.unwrap_err(), ConfigError::MissingLocale);
		assert!(transport.sent.borrow().is_empty());
	}

	#[test]
	fn props_respect_inspector_mode_and_defaults() {
		let (_transport, _runtime, preview) = start(LivePreviewConfig {
			space: Some("s".to_owned()),
			..LivePreviewConfig::new("en-US")
		});
		let preview = preview.unwrap();
		let props = preview.get_props(&TagSpec::entry("e1", "title")).unwrap();
		assert!(props.contains(&(tagging::SPACE, "s".to_owned())));

		let (_transport, _runtime, disabled) = start(LivePreviewConfig {
			enable_inspector_mode: false,
			..LivePreviewConfig::new("en-US")
		});
		assert_eq!(disabled.unwrap().get_props(&TagSpec::entry("e1", "title")), None);
	}

	#[test]
	fn live_updates_can_be_disabled() {
		let (transport, _runtime, preview) = start(LivePreviewConfig {
			enable_live_updates: false,
			..LivePreviewConfig::new("en-US")
		});
		let preview = preview.unwrap();
		let unsubscribe = preview.subscribe(SubscriptionConfig {
			data: json!({ "sys": { "id": "1" }, "fields": {} }),
			locale: None,
			callback: Rc::new(|_: Value| panic!("must not be called")),
			query: None,
		});
		assert!(unsubscribe.is_noop());
		assert_eq!(transport.methods(), ["CONNECTED"]);
	}

	#[test]
	fn saves_are_delivered_for_entries_on_the_page() {
		let (_transport, runtime, preview) = start(LivePreviewConfig::new("en-US"));
		let preview = preview.unwrap();
		let _unsubscribe = preview.subscribe(SubscriptionConfig {
			data: json!({ "sys": { "id": "shown" }, "fields": {} }),
			locale: None,
			callback: Rc::new(|_: Value| ()),
			query: None,
		});
		let saved: Rc<RefCell<Vec<Value>>> = Rc::default();
		let listener = preview.on_entry_saved({
			let saved = Rc::clone(&saved);
			move |entity: &Value| saved.borrow_mut().push(entity.clone())
		});

		for id in ["shown", "elsewhere"] {
			preview.bus().dispatch(json!({ "method": "ENTRY_SAVED", "entity": { "sys": { "id": id } } })).unwrap();
		}
		runtime.tick();
		assert_eq!(*saved.borrow(), [json!({ "sys": { "id": "shown" } })]);

		listener.remove();
		preview.bus().dispatch(json!({ "method": "ENTRY_SAVED", "entity": { "sys": { "id": "shown" } } })).unwrap();
		assert_eq!(saved.borrow().len(), 1);
	}

	#[test]
	fn teardown_stops_listening() {
		let (transport, runtime, preview) = start(LivePreviewConfig::new("en-US"));
		let preview = preview.unwrap();
		let bus = Rc::clone(preview.bus());
		let calls = Rc::new(Cell::new(0));
		let _unsubscribe = preview.subscribe(SubscriptionConfig {
			data: json!({ "sys": { "id": "1" }, "fields": { "title": "old" } }),
			locale: None,
			callback: Rc::new({
				let calls = Rc::clone(&calls);
				move |_: Value| calls.set(calls.get() + 1)
			}),
			query: None,
		});

		preview.teardown();
		assert_eq!(bus.listener_count(), 0);
		bus.dispatch(json!({
			"method": "ENTRY_UPDATED",
			"entity": { "sys": { "id": "1" }, "fields": { "title": { "en-US": "new" } } },
			"contentType": { "sys": { "id": "post" }, "fields": [{ "apiName": "title", "name": "Title", "type": "Symbol" }] },
		}))
		.unwrap();
		runtime.tick();

		assert_eq!(calls.get(), 0);
		assert_eq!(transport.methods(), ["CONNECTED", "SUBSCRIBED"]);
	}
}
