use live_preview::{
	channel::EntityKind,
	scan::{entry_ids, get_all_tagged_elements, has_changed, report, Viewport},
	stega,
	tagging::{self, TagSpec, ASSET_ID, ENTRY_ID, FIELD_ID, LOCALE},
};
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};
use web_sys::{window, Document, Element};

wasm_bindgen_test_configure!(run_in_browser);

/// A fresh container in the body, removed again when dropped.
struct Fixture {
	document: Document,
	root: Element,
}

impl Fixture {
	fn new() -> Self {
		live_preview::debug::install_browser_subscriber();
		live_preview::debug::set_enabled(true);

		let document = window().unwrap().document().unwrap();
		let root = document.create_element("section").unwrap();
		document.body().unwrap().append_child(&root).unwrap();
		Self { document, root }
	}

	fn add(&self, tag: &str, attributes: &[(&str, String)], text: &str) -> Element {
		let element = self.document.create_element(tag).unwrap();
		for (name, value) in attributes {
			element.set_attribute(name, value).unwrap();
		}
		element.append_child(&self.document.create_text_node(text)).unwrap();
		self.root.append_child(&element).unwrap();
		element
	}

	fn viewport(&self) -> Viewport {
		Viewport::of(&window().unwrap(), None)
	}

	fn scan(&self, ignore_manual_tagging: bool) -> Vec<live_preview::scan::TaggedElement> {
		get_all_tagged_elements(&self.document, &self.root, &self.viewport(), ignore_manual_tagging)
	}
}

impl Drop for Fixture {
	fn drop(&mut self) {
		self.root.remove();
	}
}

fn stega_text(text: &str, entry_id: &str, field_id: &str) -> String {
	let reference = tagging::read_attributes(|name| match name {
		FIELD_ID => Some(field_id.to_owned()),
		ENTRY_ID => Some(entry_id.to_owned()),
		LOCALE => Some("en-US".to_owned()),
		_ => None,
	})
	.unwrap();
	let hint = tagging::hint_for(&live_preview::channel::FieldReference {
		space: Some("s".to_owned()),
		environment: Some("master".to_owned()),
		..reference
	});
	stega::combine(text, &hint).unwrap()
}

#[wasm_bindgen_test]
fn attribute_tags_are_found_in_document_order() {
	let fixture = Fixture::new();
	let first = fixture.add("h1", &tagging::get_props(&TagSpec::entry("e1", "title").with_locale("en-US"), true).unwrap(), "Title");
	fixture.add("p", &[], "Untagged");
	fixture.add("figure", &tagging::get_props(&TagSpec::asset("a1", "file"), true).unwrap(), "");
	fixture.add("p", &[(FIELD_ID, "body".to_owned())], "Incomplete");

	let tagged = fixture.scan(false);

	assert_eq!(tagged.len(), 2);
	assert_eq!(tagged[0].element, first);
	assert_eq!(tagged[0].attributes.entity_id, "e1");
	assert_eq!(tagged[0].attributes.field_id, "title");
	assert_eq!(tagged[0].attributes.locale.as_deref(), Some("en-US"));
	assert!(!tagged[0].from_source_map);
	assert_eq!(tagged[1].attributes.entity_type, EntityKind::Asset);
	assert_eq!(entry_ids(&tagged), ["e1"]);
}

#[wasm_bindgen_test]
fn hidden_hints_tag_their_parent() {
	let fixture = Fixture::new();
	let paragraph = fixture.add("p", &[], &stega_text("Hello", "e2", "body"));

	let tagged = fixture.scan(false);

	assert_eq!(tagged.len(), 1);
	assert!(tagged[0].from_source_map);
	assert_eq!(tagged[0].element, paragraph);
	assert_eq!(tagged[0].attributes.entity_id, "e2");
	assert_eq!(tagged[0].attributes.field_id, "body");
	assert_eq!(paragraph.get_attribute(ENTRY_ID).as_deref(), Some("e2"));
	assert_eq!(paragraph.get_attribute(FIELD_ID).as_deref(), Some("body"));
	assert_eq!(paragraph.get_attribute(ASSET_ID), None);
	assert!(paragraph.has_attribute(tagging::SOURCE_MAPPED));
	assert_eq!(report(&tagged).counts.with_source_maps, 1);
}

#[wasm_bindgen_test]
fn hidden_hints_stay_hints_across_scans() {
	let fixture = Fixture::new();
	fixture.add("p", &[], &stega_text("Hello", "e2", "body"));
	fixture.add("h1", &tagging::get_props(&TagSpec::entry("e1", "title"), true).unwrap(), "Title");

	let first = fixture.scan(false);
	let second = fixture.scan(false);

	assert_eq!(report(&first).counts.with_source_maps, 1);
	assert_eq!(report(&second).counts.with_source_maps, 1);
	assert_eq!(report(&second).counts.total, 2);
	assert!(second[0].from_source_map);
	assert!(!has_changed(&first, &second));
}

#[wasm_bindgen_test]
fn hints_never_overwrite_manual_tags() {
	let fixture = Fixture::new();
	let paragraph = fixture.add("p", &tagging::get_props(&TagSpec::entry("e1", "title"), true).unwrap(), &stega_text("Hello", "e2", "body"));

	let tagged = fixture.scan(true);

	assert_eq!(tagged.len(), 1);
	assert!(tagged[0].from_source_map);
	assert_eq!(tagged[0].attributes.entity_id, "e2");
	assert_eq!(paragraph.get_attribute(ENTRY_ID).as_deref(), Some("e1"));
	assert_eq!(paragraph.get_attribute(FIELD_ID).as_deref(), Some("title"));
	assert!(!paragraph.has_attribute(tagging::SOURCE_MAPPED));

	let tagged = fixture.scan(false);
	assert_eq!(tagged.len(), 1);
	assert!(!tagged[0].from_source_map);
	assert_eq!(tagged[0].attributes.entity_id, "e1");
}

#[wasm_bindgen_test]
fn manual_tagging_can_be_ignored() {
	let fixture = Fixture::new();
	fixture.add("h1", &tagging::get_props(&TagSpec::entry("e1", "title"), true).unwrap(), "Title");
	fixture.add("p", &[], &stega_text("Hello", "e2", "body"));

	let tagged = fixture.scan(true);

	assert_eq!(tagged.len(), 1);
	assert_eq!(tagged[0].attributes.entity_id, "e2");
}

#[wasm_bindgen_test]
fn each_element_is_reported_once() {
	let fixture = Fixture::new();
	let element = fixture.add("p", &tagging::get_props(&TagSpec::entry("e1", "title"), true).unwrap(), &stega_text("Hello", "e1", "title"));
	element.append_child(&fixture.document.create_text_node(&stega_text(" again", "e1", "title"))).unwrap();

	let tagged = fixture.scan(false);

	assert_eq!(tagged.len(), 1);
	assert!(!tagged[0].from_source_map);
}

#[wasm_bindgen_test]
fn malformed_hints_are_skipped() {
	let fixture = Fixture::new();
	let hint = stega::SourceMapHint {
		origin: tagging::HINT_ORIGIN.to_owned(),
		href: "https://app.contentful.com/spaces/s/environments/master/entries/e1/?focusedLocale=en-US".to_owned(),
	};
	let paragraph = fixture.add("p", &[], &stega::combine("No field", &hint).unwrap());

	assert!(fixture.scan(false).is_empty());
	assert_eq!(paragraph.get_attribute(FIELD_ID), None);
}

#[wasm_bindgen_test]
fn visibility_and_changes() {
	let fixture = Fixture::new();
	let props = tagging::get_props(&TagSpec::entry("e1", "title"), true).unwrap();
	let visible = fixture.add("div", &props, "On screen");
	visible.set_attribute("style", "position: fixed; left: 0; top: 0; width: 10px; height: 10px;").unwrap();
	let hidden = fixture.add("div", &props, "Off screen");
	hidden.set_attribute("style", "position: fixed; left: -500px; top: 0; width: 10px; height: 10px;").unwrap();

	let before = fixture.scan(false);
	assert!(before[0].is_visible);
	assert!(!before[1].is_visible);
	assert_eq!(report(&before).counts.visible, 1);
	assert!(!has_changed(&before, &fixture.scan(false)));

	hidden.set_attribute("style", "position: fixed; left: 20px; top: 0; width: 10px; height: 10px;").unwrap();
	let after = fixture.scan(false);
	assert!(after[1].is_visible);
	assert!(has_changed(&before, &after));
}
