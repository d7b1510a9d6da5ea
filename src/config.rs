use crate::error::ConfigError;
use core::time::Duration;
use serde::Deserialize;
use wasm_bindgen::JsValue;

pub const DEFAULT_TARGET_ORIGINS: &[&str] = &["https://app.contentful.com", "https://app.eu.contentful.com"];

/// Options for a [`LivePreview`](crate::LivePreview) instance.
///
/// Deserializes from the camelCase object a page passes to `init`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivePreviewConfig {
	/// Default locale for subscriptions and tags that don't name their own.
	pub locale: String,
	pub debug_mode: bool,
	pub enable_inspector_mode: bool,
	pub enable_live_updates: bool,
	/// Origins the editor may live on. Messages from anywhere else are dropped.
	pub target_origin: Vec<String>,
	pub space: Option<String>,
	pub environment: Option<String>,
	/// Only honor provenance decoded from content source maps, not `data-contentful-*` attributes.
	pub ignore_manual_tagging: bool,
	pub limits: Limits,
	pub timing: Timing,
}

impl Default for LivePreviewConfig {
	fn default() -> Self {
		Self {
			locale: String::new(),
			debug_mode: false,
			enable_inspector_mode: true,
			enable_live_updates: true,
			target_origin: DEFAULT_TARGET_ORIGINS.iter().map(|&origin| origin.to_owned()).collect(),
			space: None,
			environment: None,
			ignore_manual_tagging: false,
			limits: Limits::default(),
			timing: Timing::default(),
		}
	}
}

impl LivePreviewConfig {
	#[must_use]
	pub fn new(locale: impl Into<String>) -> Self {
		Self {
			locale: locale.into(),
			..Self::default()
		}
	}

	/// Reads the configuration from a JS object.
	///
	/// # Errors
	///
	/// Iff the object doesn't have the expected shape or fails [`validate`](`LivePreviewConfig::validate`).
	pub fn from_js(value: JsValue) -> Result<Self, ConfigError> {
		let config: Self = serde_wasm_bindgen::from_value(value).map_err(|error| ConfigError::Invalid { message: error.to_string() })?;
		config.validate()?;
		Ok(config)
	}

	/// # Errors
	///
	/// [`ConfigError::MissingLocale`] for an empty locale,
	/// [`ConfigError::InvalidTargetOrigin`] for origins that aren't `http(s)://host[:port]`.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.locale.trim().is_empty() {
			return Err(ConfigError::MissingLocale);
		}
		for origin in &self.target_origin {
			let host = origin.strip_prefix("https://").or_else(|| origin.strip_prefix("http://"));
			match host {
				Some(host) if !host.is_empty() && !host.contains('/') => (),
				_ => return Err(ConfigError::InvalidTargetOrigin { origin: origin.clone() }),
			}
		}
		Ok(())
	}
}

/// Recursion bounds. All of them truncate with a diagnostic instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Limits {
	pub max_reference_depth: usize,
	pub max_rich_text_depth: usize,
	pub max_tree_depth: usize,
	pub max_classify_depth: usize,
}

impl Default for Limits {
	fn default() -> Self {
		Self {
			max_reference_depth: 5,
			max_rich_text_depth: 4,
			max_tree_depth: 64,
			max_classify_depth: 10,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timing {
	/// How long an entity request waits for the editor before giving up.
	pub request_timeout_ms: u32,
	/// How long settled entity requests stay shareable.
	pub cleanup_delay_ms: u32,
	/// Quiet period after scrolling or resizing before the DOM is rescanned.
	pub debounce_ms: u32,
	pub poll_interval_ms: u32,
}

impl Default for Timing {
	fn default() -> Self {
		Self {
			request_timeout_ms: 5000,
			cleanup_delay_ms: 300,
			debounce_ms: 150,
			poll_interval_ms: 1000,
		}
	}
}

impl Timing {
	#[must_use]
	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms.into())
	}

	#[must_use]
	pub fn cleanup_delay(&self) -> Duration {
		Duration::from_millis(self.cleanup_delay_ms.into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn deserializes_camel_case_with_defaults() {
		let config: LivePreviewConfig = serde_json::from_value(json!({
			"locale": "en-US",
			"debugMode": true,
			"limits": { "maxReferenceDepth": 3 },
		}))
		.unwrap();

		assert_eq!(config.locale, "en-US");
		assert!(config.debug_mode);
		assert!(config.enable_inspector_mode);
		assert_eq!(config.limits.max_reference_depth, 3);
		assert_eq!(config.limits.max_tree_depth, 64);
		assert_eq!(config.timing, Timing::default());
		assert!(config.validate().is_ok());
	}

	#[test]
	fn missing_locale_fails_fast() {
		assert_eq!(LivePreviewConfig::default().validate(), Err(ConfigError::MissingLocale));
		assert_eq!(LivePreviewConfig::new("  ").validate(), Err(ConfigError::MissingLocale));
	}

	#[test]
	fn rejects_origins_with_paths() {
		let mut config = LivePreviewConfig::new("en-US");
		config.target_origin = vec!["https://app.contentful.com/spaces".to_owned()];
		assert_eq!(
			config.validate(),
			Err(ConfigError::InvalidTargetOrigin {
				origin: "https://app.contentful.com/spaces".to_owned()
			})
		);

		config.target_origin = vec!["http://localhost:3000".to_owned()];
		assert!(config.validate().is_ok());
	}
}
