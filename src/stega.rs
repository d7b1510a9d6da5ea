//! Invisible metadata in plain text.
//!
//! A payload is serialized to JSON, and each UTF-8 byte written as four base-4 digits,
//! each digit one of four zero-width characters. Four zero-width spaces mark the start of a payload.
//! The result can be appended to any string without changing how it renders.

use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{borrow::Cow, sync::OnceLock};

const DIGITS: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];
const PREFIX: &str = "\u{200B}\u{200B}\u{200B}\u{200B}";

/// The payload content source maps attach to string values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapHint {
	pub origin: String,
	pub href: String,
}

fn hidden_runs() -> &'static Regex {
	static HIDDEN_RUNS: OnceLock<Regex> = OnceLock::new();
	HIDDEN_RUNS.get_or_init(|| Regex::new("[\u{200B}\u{200C}\u{200D}\u{FEFF}]{4,}").expect("valid pattern"))
}

/// `metadata` as an invisible string.
///
/// # Errors
///
/// Iff `metadata` can't be serialized to JSON.
pub fn encode<T: Serialize>(metadata: &T) -> Result<String, serde_json::Error> {
	let json = serde_json::to_vec(metadata)?;
	let mut encoded = String::with_capacity(PREFIX.len() + json.len() * 4 * 3);
	encoded.push_str(PREFIX);
	for byte in json {
		for shift in [6, 4, 2, 0] {
			encoded.push(DIGITS[usize::from((byte >> shift) & 0b11)]);
		}
	}
	Ok(encoded)
}

/// `text` with `metadata` hidden at its end.
///
/// # Errors
///
/// Iff `metadata` can't be serialized to JSON.
pub fn combine<T: Serialize>(text: &str, metadata: &T) -> Result<String, serde_json::Error> {
	Ok(format!("{}{}", text, encode(metadata)?))
}

/// The first payload hidden in `text` that deserializes as `T`.
#[must_use]
pub fn decode<T: DeserializeOwned>(text: &str) -> Option<T> {
	hidden_runs().find_iter(text).find_map(|run| decode_run(run.as_str()))
}

fn decode_run<T: DeserializeOwned>(run: &str) -> Option<T> {
	let digits = run.strip_prefix(PREFIX)?;
	let digits: Vec<u8> = digits
		.chars()
		.map(|c| DIGITS.iter().position(|&digit| digit == c).and_then(|digit| u8::try_from(digit).ok()))
		.collect::<Option<_>>()?;
	if digits.len() % 4 != 0 {
		return None;
	}
	let bytes: Vec<u8> = digits.chunks_exact(4).map(|chunk| chunk.iter().fold(0, |byte, digit| byte << 2 | digit)).collect();
	serde_json::from_slice(&bytes).ok()
}

/// `text` without any hidden payloads.
#[must_use]
pub fn strip(text: &str) -> Cow<'_, str> {
	hidden_runs().replace_all(text, "")
}

/// Whether `text` carries anything invisible at all.
#[must_use]
pub fn has_hidden(text: &str) -> bool {
	hidden_runs().is_match(text)
}
