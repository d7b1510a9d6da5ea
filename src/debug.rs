//! The single diagnostic sink.
//!
//! Every warning this crate emits about bad input (untaggable fields, ambiguous data shapes, unresolved references…)
//! goes through [`diagnostic!`](crate::diagnostic), which forwards to [`tracing`] only while debug mode is enabled on the current thread.
//! Production consoles stay clean unless the page opts in.
//!
//! Each [`LivePreview`](crate::LivePreview) in debug mode holds a [`DebugMode`] for its lifetime,
//! so instances created without debug mode don't silence ones created with it.

use core::marker::PhantomData;
use std::cell::Cell;

thread_local! {
	static FORCED: Cell<bool> = Cell::new(false);
	static HOLDERS: Cell<usize> = Cell::new(0);
	static SUBSCRIBER_INSTALLED: Cell<bool> = Cell::new(false);
}

/// Forces diagnostics on (or stops forcing them) for the current thread, regardless of any [`DebugMode`] holders.
pub fn set_enabled(enabled: bool) {
	FORCED.with(|cell| cell.set(enabled));
}

#[must_use]
pub fn is_enabled() -> bool {
	FORCED.with(Cell::get) || HOLDERS.with(Cell::get) > 0
}

/// Keeps diagnostics enabled on the current thread until dropped.
#[derive(Debug)]
#[must_use = "diagnostics are disabled again as soon as the `DebugMode` is dropped"]
pub struct DebugMode {
	_thread_bound: PhantomData<*const ()>,
}

impl DebugMode {
	pub fn enable() -> Self {
		HOLDERS.with(|holders| holders.set(holders.get() + 1));
		Self { _thread_bound: PhantomData }
	}
}

impl Drop for DebugMode {
	fn drop(&mut self) {
		HOLDERS.with(|holders| holders.set(holders.get().saturating_sub(1)));
	}
}

/// Installs [`tracing_wasm`] as global default subscriber, at most once per thread.
///
/// Only meaningful on `wasm32`, where nothing else would print [`tracing`] events to the browser console.
pub fn install_browser_subscriber() {
	SUBSCRIBER_INSTALLED.with(|installed| {
		if !installed.replace(true) {
			tracing_wasm::set_as_global_default();
		}
	});
}

/// Emits a [`tracing`] event at the given level if diagnostics are enabled.
///
/// ```ignore
/// diagnostic!(warn, entry_id, "Missing field id");
/// ```
#[macro_export]
macro_rules! diagnostic {
	($level:ident, $($arg:tt)+) => {
		if $crate::debug::is_enabled() {
			::tracing::$level!($($arg)+);
		}
	};
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn toggles_per_thread() {
		set_enabled(true);
		assert!(is_enabled());
		std::thread::spawn(|| assert!(!is_enabled())).join().unwrap();
		set_enabled(false);
		assert!(!is_enabled());
	}

	#[test]
	fn stays_enabled_while_any_holder_lives() {
		let first = DebugMode::enable();
		let second = DebugMode::enable();
		assert!(is_enabled());

		drop(first);
		assert!(is_enabled());
		set_enabled(false);
		assert!(is_enabled(), "unforcing doesn't override holders");

		drop(second);
		assert!(!is_enabled());
	}
}
