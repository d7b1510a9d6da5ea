//! Finding tagged elements in the rendered document.

use crate::{
	channel::{Coordinates, EntityKind, FieldReference, TagCounts, TaggedElementReport, TaggedElementsReport},
	stega::{self, SourceMapHint},
	tagging::{self, FIELD_ID, SOURCE_MAPPED},
};
use tracing::{instrument, trace};
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, Node, Text};

/// `NodeFilter.SHOW_ELEMENT`
const SHOW_ELEMENT: u32 = 0x1;
/// `NodeFilter.SHOW_TEXT`
const SHOW_TEXT: u32 = 0x4;

/// One tagged element as of the latest scan.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedElement {
	pub element: Element,
	pub attributes: FieldReference,
	pub coordinates: Coordinates,
	pub is_visible: bool,
	pub is_hovered: bool,
	/// Tagged through hidden text rather than attributes written by the page.
	pub from_source_map: bool,
}

impl TaggedElement {
	#[must_use]
	pub fn report(&self) -> TaggedElementReport {
		TaggedElementReport {
			attributes: self.attributes.clone(),
			coordinates: self.coordinates,
			is_visible: self.is_visible,
			is_hovered: self.is_hovered,
		}
	}
}

/// What a scan pass sees of the page besides the DOM.
#[derive(Debug, Clone, Default)]
pub struct Viewport {
	pub width: f64,
	pub height: f64,
	pub hovered: Option<Element>,
}

impl Viewport {
	#[must_use]
	pub fn of(window: &web_sys::Window, hovered: Option<Element>) -> Self {
		let dimension = |value: Result<wasm_bindgen::JsValue, wasm_bindgen::JsValue>| value.ok().and_then(|value| value.as_f64()).unwrap_or_default();
		Self {
			width: dimension(window.inner_width()),
			height: dimension(window.inner_height()),
			hovered,
		}
	}
}

/// Walks `root` once, in document order, and returns each tagged element once.
///
/// Elements are tagged either by attributes (see [`tagging::get_props`]) or by a source map hint hidden in one of their text nodes.
/// Hints are written onto their parent element as attributes (marked with [`SOURCE_MAPPED`]), so later clicks can be traced back too.
/// Those synthesized attributes are not read back as manual tags, and never replace attributes the page rendered itself.
/// With `ignore_manual_tagging`, only hint-tagged elements are reported.
#[instrument(skip(document, root, viewport))]
pub fn get_all_tagged_elements(document: &Document, root: &Node, viewport: &Viewport, ignore_manual_tagging: bool) -> Vec<TaggedElement> {
	let walker = match document.create_tree_walker_with_what_to_show(root, SHOW_ELEMENT | SHOW_TEXT) {
		Ok(walker) => walker,
		Err(error) => {
			diagnostic!(error, ?error, "Couldn't walk the document");
			return Vec::new();
		}
	};

	let mut found: Vec<(Element, FieldReference, bool)> = Vec::new();
	let mut current = Some(root.clone());
	while let Some(node) = current {
		if let Some(element) = node.dyn_ref::<Element>() {
			if !ignore_manual_tagging && element.has_attribute(FIELD_ID) && !element.has_attribute(SOURCE_MAPPED) {
				match tagging::read_attributes(|name| element.get_attribute(name)) {
					Some(reference) => found.push((element.clone(), reference, false)),
					None => diagnostic!(warn, field_id = ?element.get_attribute(FIELD_ID), "Element is tagged with a field id but not exactly one entry or asset id; skipping it"),
				}
			}
		} else if let Some(text) = node.dyn_ref::<Text>() {
			if let Some((parent, reference)) = source_mapped(text) {
				if !found.iter().any(|(element, _, _)| *element == parent) {
					synthesize_attributes(&parent, &reference);
					found.push((parent, reference, true));
				}
			}
		}
		current = walker.next_node().ok().flatten();
	}

	found
		.into_iter()
		.map(|(element, attributes, from_source_map)| {
			let rect = element.get_bounding_client_rect();
			let coordinates = Coordinates {
				left: rect.left(),
				top: rect.top(),
				width: rect.width(),
				height: rect.height(),
			};
			let is_hovered = viewport.hovered.as_ref().map_or(false, |hovered| {
				let (node, hovered): (&Node, &Node) = (element.as_ref(), hovered.as_ref());
				node.contains(Some(hovered))
			});
			TaggedElement {
				is_visible: is_fully_visible(&coordinates, viewport.width, viewport.height),
				element,
				attributes,
				coordinates,
				is_hovered,
				from_source_map,
			}
		})
		.collect()
}

/// The parent of `text` and the field a hint hidden in `text` points at.
fn source_mapped(text: &Text) -> Option<(Element, FieldReference)> {
	let data = text.data();
	if !stega::has_hidden(&data) {
		return None;
	}
	let hint: SourceMapHint = stega::decode(&data)?;
	let reference = match tagging::parse_hint(&hint) {
		Ok(reference) => reference,
		Err(error) => {
			diagnostic!(warn, href = %hint.href, %error, "Malformed source map hint; skipping it");
			return None;
		}
	};
	let node: &Node = text.as_ref();
	let parent = node.parent_element()?;
	Some((parent, reference))
}

/// Writes `reference` onto `element` unless the page tagged it by hand.
fn synthesize_attributes(element: &Element, reference: &FieldReference) {
	if element.has_attribute(FIELD_ID) && !element.has_attribute(SOURCE_MAPPED) {
		return trace!(field_id = ?element.get_attribute(FIELD_ID), "Keeping manual tag");
	}
	for attribute in tagging::ATTRIBUTES {
		if let Err(error) = element.remove_attribute(attribute) {
			trace!(?error, attribute, "Couldn't clear synthesized attribute");
		}
	}
	for (attribute, value) in tagging::attributes_of(reference).into_iter().chain([(SOURCE_MAPPED, String::new())]) {
		if let Err(error) = element.set_attribute(attribute, &value) {
			trace!(?error, attribute, "Couldn't write synthesized attribute");
		}
	}
}

/// Whether `rect` lies entirely within `[0, width] × [0, height]`.
#[must_use]
pub fn is_fully_visible(rect: &Coordinates, width: f64, height: f64) -> bool {
	rect.left >= 0. && rect.top >= 0. && rect.right() <= width && rect.bottom() <= height
}

/// Whether two scans differ in anything the editor displays.
///
/// Elements are compared by identity and position in the list, then by what is reported about them.
#[must_use]
pub fn has_changed(previous: &[TaggedElement], current: &[TaggedElement]) -> bool {
	previous.len() != current.len()
		|| previous.iter().zip(current).any(|(previous, current)| {
			previous.element != current.element
				|| previous.attributes != current.attributes
				|| previous.coordinates != current.coordinates
				|| previous.is_visible != current.is_visible
				|| previous.is_hovered != current.is_hovered
				|| previous.from_source_map != current.from_source_map
		})
}

/// The `TAGGED_ELEMENTS` payload for a scan.
#[must_use]
pub fn report(elements: &[TaggedElement]) -> TaggedElementsReport {
	TaggedElementsReport {
		elements: elements.iter().map(TaggedElement::report).collect(),
		counts: TagCounts {
			total: elements.len(),
			with_source_maps: elements.iter().filter(|element| element.from_source_map).count(),
			visible: elements.iter().filter(|element| element.is_visible).count(),
		},
	}
}

/// Ids of the entries tagged on the page, deduplicated in document order.
#[must_use]
pub fn entry_ids(elements: &[TaggedElement]) -> Vec<String> {
	let mut ids: Vec<String> = Vec::new();
	for element in elements {
		if element.attributes.entity_type == EntityKind::Entry && !ids.contains(&element.attributes.entity_id) {
			ids.push(element.attributes.entity_id.clone());
		}
	}
	ids
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rect(left: f64, top: f64, width: f64, height: f64) -> Coordinates {
		Coordinates { left, top, width, height }
	}

	#[test]
	fn visibility_requires_the_whole_rect() {
		assert!(is_fully_visible(&rect(0., 0., 100., 50.), 100., 50.));
		assert!(is_fully_visible(&rect(10., 10., 20., 20.), 100., 50.));
		assert!(!is_fully_visible(&rect(-1., 10., 20., 20.), 100., 50.));
		assert!(!is_fully_visible(&rect(10., 40., 20., 20.), 100., 50.));
		assert!(!is_fully_visible(&rect(90., 10., 20., 20.), 100., 50.));
		assert!(!is_fully_visible(&rect(0., 0., 0., 0.), -1., 50.));
	}
}
