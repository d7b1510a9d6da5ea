#![doc(html_root_url = "https://docs.rs/live-preview/0.0.1")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Live preview for pages rendering content from a headless CMS.
//!
//! Two halves share one [`MessageBus`](channel::MessageBus) to the editor window:
//!
//! - Live updates: [`LivePreview::subscribe`] keeps rendered data trees (REST or GraphQL shaped) in sync with unsaved edits,
//!   see [`merge`] and [`subscriptions`].
//! - Inspector: [`LivePreview::get_props`] tags rendered fields, and the [`inspector`] reports them to the editor
//!   so clicks can be traced back to the field that produced them.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

#[macro_use]
pub mod debug;

pub mod channel;
mod claims;
pub mod classify;
pub mod config;
pub mod error;
pub mod inspector;
mod live_preview;
pub mod merge;
pub mod query;
pub mod resolver;
pub mod runtime;
pub mod scan;
pub mod schema;
pub mod stega;
pub mod storage;
pub mod subscriptions;
pub mod tagging;

pub use config::LivePreviewConfig;
pub use error::{ConfigError, ShapeError};
pub use live_preview::{LivePreview, SaveCallback, SaveListener};
pub use subscriptions::{SubscriptionConfig, Unsubscribe};
pub use tagging::TagSpec;
