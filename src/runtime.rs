//! Task spawning and timers.
//!
//! Everything in this crate runs on one thread. Async work (entity requests, deferred cache restores, the update worker)
//! is spawned through a [`Runtime`] so the browser event loop and tests can drive it differently.

use core::time::Duration;
use futures::future::LocalBoxFuture;
use tracing::error;
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;

pub trait Runtime {
	/// Runs `task` to completion in the background.
	fn spawn(&self, task: LocalBoxFuture<'static, ()>);

	/// Completes once `duration` has passed. Zero yields to the event loop once.
	fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// [`Runtime`] on top of the browser event loop.
#[derive(Debug, Clone)]
pub struct BrowserRuntime {
	window: web_sys::Window,
}

impl BrowserRuntime {
	#[must_use]
	pub fn new(window: web_sys::Window) -> Self {
		Self { window }
	}
}

impl Runtime for BrowserRuntime {
	fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
		wasm_bindgen_futures::spawn_local(task);
	}

	fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
		let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
		let window = self.window.clone();
		let promise = js_sys::Promise::new(&mut |resolve, _reject| {
			if let Err(error) = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis) {
				error!("setTimeout failed, not waiting: {:?}", error);
				let _ = resolve.call0(&JsValue::UNDEFINED);
			}
		});
		Box::pin(async move {
			let _ = JsFuture::from(promise).await;
		})
	}
}

#[cfg(test)]
pub(crate) mod testing {
	use super::Runtime;
	use core::time::Duration;
	use futures::{
		channel::oneshot,
		executor::{LocalPool, LocalSpawner},
		future::LocalBoxFuture,
		task::LocalSpawnExt,
	};
	use std::cell::{Cell, RefCell};

	/// Single-threaded executor with a virtual clock that only moves when told to.
	pub struct ManualRuntime {
		pool: RefCell<LocalPool>,
		spawner: LocalSpawner,
		now: Cell<Duration>,
		timers: RefCell<Vec<(Duration, oneshot::Sender<()>)>>,
	}

	impl ManualRuntime {
		pub fn new() -> Self {
			let pool = LocalPool::new();
			let spawner = pool.spawner();
			Self {
				pool: RefCell::new(pool),
				spawner,
				now: Cell::new(Duration::ZERO),
				timers: RefCell::new(Vec::new()),
			}
		}

		/// Runs every task as far as it gets without the clock moving.
		pub fn run_until_stalled(&self) {
			self.pool.borrow_mut().run_until_stalled();
		}

		/// Fires due timers (including zero-length sleeps) and runs tasks until stalled.
		pub fn tick(&self) {
			self.advance(Duration::ZERO);
		}

		/// Moves the clock forward, firing timers in deadline order and running tasks in between.
		pub fn advance(&self, by: Duration) {
			let target = self.now.get() + by;
			loop {
				self.run_until_stalled();
				let next = self.timers.borrow().iter().map(|(deadline, _)| *deadline).filter(|deadline| *deadline <= target).min();
				let deadline = match next {
					Some(deadline) => deadline,
					None => break,
				};
				self.now.set(deadline);
				let due: Vec<_> = {
					let mut timers = self.timers.borrow_mut();
					let (due, pending): (Vec<_>, Vec<_>) = timers.drain(..).partition(|(at, _)| *at <= deadline);
					*timers = pending;
					due
				};
				for (_, sender) in due {
					let _ = sender.send(());
				}
			}
			self.now.set(target);
			self.run_until_stalled();
		}

		pub fn pending_timers(&self) -> usize {
			self.timers.borrow().len()
		}
	}

	impl Runtime for ManualRuntime {
		fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
			self.spawner.spawn_local(task).expect("executor shut down");
		}

		fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
			let (sender, receiver) = oneshot::channel();
			self.timers.borrow_mut().push((self.now.get() + duration, sender));
			Box::pin(async move {
				let _ = receiver.await;
			})
		}
	}

	#[test]
	fn timers_fire_in_order() {
		use std::rc::Rc;

		let runtime = Rc::new(ManualRuntime::new());
		let log = Rc::new(RefCell::new(Vec::new()));
		for (name, millis) in [("late", 20), ("early", 10), ("now", 0)] {
			let sleep = runtime.sleep(Duration::from_millis(millis));
			let log = Rc::clone(&log);
			runtime.spawn(Box::pin(async move {
				sleep.await;
				log.borrow_mut().push(name);
			}));
		}

		runtime.run_until_stalled();
		assert!(log.borrow().is_empty());
		runtime.tick();
		assert_eq!(*log.borrow(), ["now"]);
		runtime.advance(Duration::from_millis(15));
		assert_eq!(*log.borrow(), ["now", "early"]);
		runtime.advance(Duration::from_millis(5));
		assert_eq!(*log.borrow(), ["now", "early", "late"]);
		assert_eq!(runtime.pending_timers(), 0);
	}
}
