//! Reporting tagged elements to the editor, and clicks on them.

use crate::{
	channel::{EditorMessage, ListenerId, MessageBus, PreviewMessage},
	config::Timing,
	runtime::Runtime,
	scan::{self, TaggedElement, Viewport},
	tagging::{self, FIELD_ID},
};
use core::{
	cell::{Cell, RefCell},
	time::Duration,
};
use futures::FutureExt;
use std::rc::{Rc, Weak};
use tracing::{error, instrument, trace};
use wasm_bindgen::{closure::Closure, JsCast};
use web_sys::{AddEventListenerOptions, Document, Element, Event, EventTarget};

/// Runs only the last of a burst of triggers, once things have been quiet for a while.
#[derive(Debug, Clone, Default)]
pub struct Debouncer {
	generation: Rc<Cell<u64>>,
}

impl Debouncer {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Schedules `action` after `delay`, cancelling whatever was scheduled before and hasn't run yet.
	pub fn trigger(&self, runtime: &dyn Runtime, delay: Duration, action: impl 'static + FnOnce()) {
		let generation = self.generation.get().wrapping_add(1);
		self.generation.set(generation);
		let current = Rc::clone(&self.generation);
		let sleep = runtime.sleep(delay);
		runtime.spawn(
			async move {
				sleep.await;
				if current.get() == generation {
					action();
				}
			}
			.boxed_local(),
		);
	}

	/// Drops whatever is scheduled.
	pub fn cancel(&self) {
		self.generation.set(self.generation.get().wrapping_add(1));
	}
}

/// An event listener that is removed again when dropped.
struct DomListener {
	target: EventTarget,
	event: &'static str,
	capture: bool,
	handler: Closure<dyn Fn(Event)>,
}

impl DomListener {
	fn attach(target: &EventTarget, event: &'static str, capture: bool, passive: bool, handler: impl 'static + Fn(Event)) -> Self {
		let handler = Closure::wrap(Box::new(handler) as Box<dyn Fn(Event)>);
		let options = AddEventListenerOptions::new();
		options.set_capture(capture);
		options.set_passive(passive);
		if let Err(error) = target.add_event_listener_with_callback_and_add_event_listener_options(event, handler.as_ref().unchecked_ref(), &options) {
			error!(event, ?error, "Failed to add event listener");
		}
		Self {
			target: target.clone(),
			event,
			capture,
			handler,
		}
	}
}

impl Drop for DomListener {
	fn drop(&mut self) {
		if let Err(error) = self
			.target
			.remove_event_listener_with_callback_and_bool(self.event, self.handler.as_ref().unchecked_ref(), self.capture)
		{
			error!(event = self.event, ?error, "Failed to remove event listener");
		}
	}
}

struct State {
	window: web_sys::Window,
	document: Document,
	bus: Rc<MessageBus>,
	runtime: Rc<dyn Runtime>,
	timing: Timing,
	ignore_manual_tagging: bool,
	/// Whether the editor currently shows its inspector overlay.
	active: Cell<bool>,
	hovered: RefCell<Option<Element>>,
	tagged: RefCell<Vec<TaggedElement>>,
	rescan: Debouncer,
	stopped: Cell<bool>,
}

impl State {
	fn scan(&self) -> Vec<TaggedElement> {
		let viewport = Viewport::of(&self.window, self.hovered.borrow().clone());
		scan::get_all_tagged_elements(&self.document, self.document.as_ref(), &viewport, self.ignore_manual_tagging)
	}

	/// Rescans, and reports to the editor if the inspector is active and anything changed (or `force`).
	#[instrument(skip(self))]
	fn refresh(&self, force: bool) {
		if self.stopped.get() {
			return;
		}
		let current = self.scan();
		let changed = scan::has_changed(&self.tagged.borrow(), &current);
		if self.active.get() && (changed || force) {
			self.bus.send(&PreviewMessage::TaggedElements(scan::report(&current)));
		} else {
			trace!(changed, active = self.active.get(), "Not reporting tagged elements");
		}
		*self.tagged.borrow_mut() = current;
	}

	fn schedule_refresh(self: &Rc<Self>) {
		let state = Rc::downgrade(self);
		self.rescan.trigger(&*self.runtime, Duration::from_millis(self.timing.debounce_ms.into()), move || {
			if let Some(state) = state.upgrade() {
				state.refresh(false);
			}
		});
	}

	fn on_click(&self, event: &Event) {
		if !self.active.get() {
			return;
		}
		let tagged = event
			.target()
			.and_then(|target| target.dyn_into::<Element>().ok())
			.and_then(|target| target.closest(&format!("[{}]", FIELD_ID)).ok().flatten());
		let element = match tagged {
			Some(element) => element,
			None => return,
		};
		match tagging::read_attributes(|name| element.get_attribute(name)) {
			Some(reference) => {
				event.prevent_default();
				event.stop_propagation();
				self.bus.send(&PreviewMessage::TaggedFieldClicked(reference));
			}
			None => diagnostic!(warn, "Clicked element is tagged incompletely"),
		}
	}

	fn on_mouse_move(self: &Rc<Self>, event: &Event) {
		let target = event.target().and_then(|target| target.dyn_into::<Element>().ok());
		if *self.hovered.borrow() == target {
			return;
		}
		*self.hovered.borrow_mut() = target;
		if self.active.get() {
			self.schedule_refresh();
		}
	}
}

/// Keeps the editor informed about tagged elements while attached to a window.
///
/// Rescans on scroll and resize (debounced), on a fixed interval, and when the editor activates its inspector.
/// Detaches everything when dropped.
pub struct Inspector {
	state: Rc<State>,
	_listeners: Vec<DomListener>,
	bus_listener: ListenerId,
}

impl core::fmt::Debug for Inspector {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Inspector")
			.field("active", &self.state.active.get())
			.field("tagged", &self.state.tagged.borrow().len())
			.finish_non_exhaustive()
	}
}

impl Inspector {
	/// [`None`] if `window` has no document.
	#[must_use]
	pub fn attach(window: &web_sys::Window, bus: Rc<MessageBus>, runtime: Rc<dyn Runtime>, timing: Timing, ignore_manual_tagging: bool) -> Option<Self> {
		let document = window.document()?;
		let state = Rc::new(State {
			window: window.clone(),
			document,
			bus: Rc::clone(&bus),
			runtime: Rc::clone(&runtime),
			timing,
			ignore_manual_tagging,
			active: Cell::new(false),
			hovered: RefCell::new(None),
			tagged: RefCell::new(Vec::new()),
			rescan: Debouncer::new(),
			stopped: Cell::new(false),
		});
		*state.tagged.borrow_mut() = state.scan();

		let target: &EventTarget = window.as_ref();
		let listener = |event: &'static str, capture: bool, passive: bool, handler: fn(&Rc<State>, &Event)| {
			let state = Rc::downgrade(&state);
			DomListener::attach(target, event, capture, passive, move |event| {
				if let Some(state) = state.upgrade() {
					handler(&state, &event);
				}
			})
		};
		let listeners = vec![
			// Capturing, to also see scrolling inside overflowing containers.
			listener("scroll", true, true, |state, _| state.schedule_refresh()),
			listener("resize", false, true, |state, _| state.schedule_refresh()),
			listener("click", true, false, |state, event| state.on_click(event)),
			listener("mousemove", false, true, State::on_mouse_move),
		];

		let weak = Rc::downgrade(&state);
		let bus_listener = bus.subscribe_filtered(
			|message| matches!(message, EditorMessage::InspectorModeChanged { .. }),
			move |message| {
				if let (EditorMessage::InspectorModeChanged { is_inspector_active }, Some(state)) = (message, weak.upgrade()) {
					state.active.set(*is_inspector_active);
					if *is_inspector_active {
						state.refresh(true);
					} else {
						state.rescan.cancel();
					}
				}
			},
		);

		spawn_poll(&state);
		Some(Self {
			state,
			_listeners: listeners,
			bus_listener,
		})
	}

	/// Tagged elements as of the latest scan.
	#[must_use]
	pub fn tagged_elements(&self) -> Vec<TaggedElement> {
		self.state.tagged.borrow().clone()
	}

	/// Rescans now, reporting changes if the inspector is active.
	pub fn refresh(&self) {
		self.state.refresh(false);
	}

	#[must_use]
	pub fn is_active(&self) -> bool {
		self.state.active.get()
	}
}

impl Drop for Inspector {
	fn drop(&mut self) {
		self.state.stopped.set(true);
		self.state.rescan.cancel();
		self.state.bus.unsubscribe(self.bus_listener);
	}
}

fn spawn_poll(state: &Rc<State>) {
	let weak: Weak<State> = Rc::downgrade(state);
	let runtime = Rc::clone(&state.runtime);
	let interval = Duration::from_millis(state.timing.poll_interval_ms.into());
	state.runtime.spawn(
		async move {
			loop {
				runtime.sleep(interval).await;
				match weak.upgrade() {
					Some(state) if !state.stopped.get() => state.refresh(false),
					_ => break,
				}
			}
			trace!("Stopped polling");
		}
		.boxed_local(),
	);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::runtime::testing::ManualRuntime;

	#[test]
	fn debouncer_runs_the_last_trigger_once() {
		let runtime = ManualRuntime::new();
		let debouncer = Debouncer::new();
		let runs = Rc::new(RefCell::new(Vec::new()));

		for i in 0..3 {
			let runs = Rc::clone(&runs);
			debouncer.trigger(&runtime, Duration::from_millis(150), move || runs.borrow_mut().push(i));
			runtime.advance(Duration::from_millis(100));
		}
		assert!(runs.borrow().is_empty());

		runtime.advance(Duration::from_millis(50));
		assert_eq!(*runs.borrow(), [2]);

		let cancelled = Rc::clone(&runs);
		debouncer.trigger(&runtime, Duration::from_millis(150), move || cancelled.borrow_mut().push(3));
		debouncer.cancel();
		runtime.advance(Duration::from_secs(1));
		assert_eq!(*runs.borrow(), [2]);
	}
}
