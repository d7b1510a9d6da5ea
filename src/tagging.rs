//! Provenance attributes on rendered elements, and where to find them again.

use crate::{
	channel::{EntityKind, FieldReference},
	error::ProvenanceError,
	stega::SourceMapHint,
};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

pub const FIELD_ID: &str = "data-contentful-field-id";
pub const ENTRY_ID: &str = "data-contentful-entry-id";
pub const ASSET_ID: &str = "data-contentful-asset-id";
pub const LOCALE: &str = "data-contentful-locale";
pub const SPACE: &str = "data-contentful-space";
pub const ENVIRONMENT: &str = "data-contentful-environment";

/// Every attribute a tagged element may carry.
pub const ATTRIBUTES: [&str; 6] = [FIELD_ID, ENTRY_ID, ASSET_ID, LOCALE, SPACE, ENVIRONMENT];

/// Marks attributes the scanner synthesized from a source map hint, as opposed to ones the page rendered.
pub const SOURCE_MAPPED: &str = "data-contentful-source-mapped";

/// Origin of hints that point into the editor.
pub const HINT_ORIGIN: &str = "contentful.com";

/// What a rendered field shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TagSpec {
	pub field_id: String,
	pub entry_id: Option<String>,
	pub asset_id: Option<String>,
	pub locale: Option<String>,
	pub space: Option<String>,
	pub environment: Option<String>,
}

impl TagSpec {
	#[must_use]
	pub fn entry(entry_id: impl Into<String>, field_id: impl Into<String>) -> Self {
		Self {
			field_id: field_id.into(),
			entry_id: Some(entry_id.into()),
			..Self::default()
		}
	}

	#[must_use]
	pub fn asset(asset_id: impl Into<String>, field_id: impl Into<String>) -> Self {
		Self {
			field_id: field_id.into(),
			asset_id: Some(asset_id.into()),
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_locale(self, locale: impl Into<String>) -> Self {
		Self {
			locale: Some(locale.into()),
			..self
		}
	}
}

/// The attributes to put on an element rendering `spec`'s field.
///
/// [`None`] (with a diagnostic) if the field id is missing or the spec doesn't name exactly one of entry or asset,
/// and quietly if `inspector_enabled` is off.
#[must_use]
pub fn get_props(spec: &TagSpec, inspector_enabled: bool) -> Option<Vec<(&'static str, String)>> {
	if !inspector_enabled {
		return None;
	}

	let non_empty = |value: &Option<String>| value.as_deref().filter(|value| !value.is_empty()).map(str::to_owned);
	if spec.field_id.is_empty() {
		diagnostic!(warn, entry_id = ?spec.entry_id, asset_id = ?spec.asset_id, "Missing field id; not tagging");
		return None;
	}
	let entity = match (non_empty(&spec.entry_id), non_empty(&spec.asset_id)) {
		(Some(entry_id), None) => (ENTRY_ID, entry_id),
		(None, Some(asset_id)) => (ASSET_ID, asset_id),
		(None, None) => {
			diagnostic!(warn, field_id = %spec.field_id, "Missing entry or asset id; not tagging");
			return None;
		}
		(Some(_), Some(_)) => {
			diagnostic!(warn, field_id = %spec.field_id, "Both entry and asset id given; not tagging");
			return None;
		}
	};

	let mut props = vec![(FIELD_ID, spec.field_id.clone()), entity];
	for (attribute, value) in [(LOCALE, &spec.locale), (SPACE, &spec.space), (ENVIRONMENT, &spec.environment)] {
		if let Some(value) = non_empty(value) {
			props.push((attribute, value));
		}
	}
	Some(props)
}

/// Reads a [`FieldReference`] back from element attributes.
///
/// [`None`] if the attributes wouldn't have been produced by [`get_props`].
pub fn read_attributes(attribute: impl Fn(&str) -> Option<String>) -> Option<FieldReference> {
	let present = |name: &str| attribute(name).filter(|value| !value.is_empty());
	let field_id = present(FIELD_ID)?;
	let (entity_id, entity_type) = match (present(ENTRY_ID), present(ASSET_ID)) {
		(Some(entry_id), None) => (entry_id, EntityKind::Entry),
		(None, Some(asset_id)) => (asset_id, EntityKind::Asset),
		_ => return None,
	};
	Some(FieldReference {
		field_id,
		entity_id,
		entity_type,
		locale: present(LOCALE),
		space: present(SPACE),
		environment: present(ENVIRONMENT),
	})
}

/// The attributes for `reference`, as [`get_props`] would produce them.
#[must_use]
pub fn attributes_of(reference: &FieldReference) -> Vec<(&'static str, String)> {
	let entity = match reference.entity_type {
		EntityKind::Entry => ENTRY_ID,
		EntityKind::Asset => ASSET_ID,
	};
	let mut attributes = vec![(FIELD_ID, reference.field_id.clone()), (entity, reference.entity_id.clone())];
	for (attribute, value) in [(LOCALE, &reference.locale), (SPACE, &reference.space), (ENVIRONMENT, &reference.environment)] {
		if let Some(value) = value {
			attributes.push((attribute, value.clone()));
		}
	}
	attributes
}

fn entity_path() -> &'static Regex {
	static ENTITY_PATH: OnceLock<Regex> = OnceLock::new();
	ENTITY_PATH.get_or_init(|| {
		Regex::new(r"/spaces/(?P<space>[^/?#]+)/environments/(?P<environment>[^/?#]+)(?:/(?P<kind>entries|assets)(?:/(?P<id>[^/?#]+))?)?").expect("valid pattern")
	})
}

/// Turns an editor deep link (`/spaces/{s}/environments/{e}/(entries|assets)/{id}/?focusedField=…&focusedLocale=…`)
/// into the field it focuses.
///
/// # Errors
///
/// Names the first missing piece, in the order origin, space and environment, entity, field, locale.
pub fn parse_hint(hint: &SourceMapHint) -> Result<FieldReference, ProvenanceError> {
	if hint.origin != HINT_ORIGIN {
		return Err(ProvenanceError::ForeignOrigin { origin: hint.origin.clone() });
	}
	let href = &hint.href;
	let path = entity_path().captures(href).ok_or_else(|| ProvenanceError::MissingSpaceEnvironment { href: href.clone() })?;
	let (entity_id, entity_type) = match (path.name("kind").map(|kind| kind.as_str()), path.name("id")) {
		(Some("entries"), Some(id)) => (decode_segment(id.as_str()), EntityKind::Entry),
		(Some("assets"), Some(id)) => (decode_segment(id.as_str()), EntityKind::Asset),
		_ => return Err(ProvenanceError::MissingEntity { href: href.clone() }),
	};

	let query = href.split_once('?').map_or("", |(_, query)| query);
	let query = query.split_once('#').map_or(query, |(query, _)| query);
	let parameter = |wanted: &str| {
		query.split('&').find_map(|pair| {
			let (key, value) = pair.split_once('=')?;
			(key == wanted).then(|| urlencoding::decode(value).map(|value| value.into_owned()).ok()).flatten().filter(|value| !value.is_empty())
		})
	};
	let field_id = parameter("focusedField").ok_or_else(|| ProvenanceError::MissingField { href: href.clone() })?;
	let locale = parameter("focusedLocale").ok_or_else(|| ProvenanceError::MissingLocale { href: href.clone() })?;

	Ok(FieldReference {
		field_id,
		entity_id,
		entity_type,
		locale: Some(locale),
		space: Some(decode_segment(&path["space"])),
		environment: Some(decode_segment(&path["environment"])),
	})
}

/// Percent-decodes a path segment. Segments that don't decode to UTF-8 are kept as written.
fn decode_segment(segment: &str) -> String {
	urlencoding::decode(segment).map_or_else(|_| segment.to_owned(), |decoded| decoded.into_owned())
}

/// The deep link [`parse_hint`] reads.
#[must_use]
pub fn hint_for(reference: &FieldReference) -> SourceMapHint {
	let kind = match reference.entity_type {
		EntityKind::Entry => "entries",
		EntityKind::Asset => "assets",
	};
	let mut href = format!(
		"https://app.contentful.com/spaces/{}/environments/{}/{}/{}/?focusedField={}",
		urlencoding::encode(reference.space.as_deref().unwrap_or_default()),
		urlencoding::encode(reference.environment.as_deref().unwrap_or("master")),
		kind,
		urlencoding::encode(&reference.entity_id),
		urlencoding::encode(&reference.field_id),
	);
	if let Some(locale) = &reference.locale {
		href.push_str("&focusedLocale=");
		href.push_str(&urlencoding::encode(locale));
	}
	SourceMapHint {
		origin: HINT_ORIGIN.to_owned(),
		href,
	}
}
