use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use esp32_event_counter::config::{
    ConfigMedium, ConfigStore, DeviceConfig, DEFAULT_BUTTON_TAG, DEFAULT_DEVICE_NAME,
};
use esp32_event_counter::console::{dispatch, Request, Response};
use esp32_event_counter::report::{ReportEvent, ReportTarget};

#[derive(Clone, Default)]
struct RamMedium {
    doc: Rc<RefCell<Option<Vec<u8>>>>,
}

impl RamMedium {
    fn stored_json(&self) -> Value {
        let doc = self.doc.borrow();
        serde_json::from_slice(doc.as_deref().expect("nothing was stored"))
            .expect("stored document should parse")
    }

    fn has_document(&self) -> bool {
        self.doc.borrow().is_some()
    }
}

impl ConfigMedium for RamMedium {
    type Error = &'static str;

    fn read_document(&mut self) -> Result<Vec<u8>, Self::Error> {
        self.doc.borrow().clone().ok_or("no document")
    }

    fn write_document(&mut self, doc: &[u8]) -> Result<(), Self::Error> {
        *self.doc.borrow_mut() = Some(doc.to_vec());
        Ok(())
    }
}

/// The pieces a live console request touches, wired up the way the
/// firmware wires them.
struct Console {
    config: DeviceConfig,
    store: ConfigStore<RamMedium>,
    target: ReportTarget,
    medium: RamMedium,
}

impl Console {
    fn new() -> Self {
        let medium = RamMedium::default();
        let handle = medium.clone();
        let mut store = ConfigStore::new(medium);
        let config = store.load();
        let target = ReportTarget::new(&config);
        Self {
            config,
            store,
            target,
            medium: handle,
        }
    }

    fn get(&mut self, head: &str) -> Response {
        let request = Request::parse(head).expect("request should parse");
        dispatch(
            &request,
            &mut self.config,
            &mut self.store,
            &mut self.target,
            "10.0.0.17",
        )
    }
}

fn html(response: Response) -> String {
    match response {
        Response::Html(body) => body,
        other => panic!("expected an html response, got {:?}", other),
    }
}

#[test]
fn index_shows_the_current_configuration() {
    let mut console = Console::new();
    let body = html(console.get("GET / HTTP/1.1\r\nHost: counter\r\n\r\n"));

    assert!(body.contains(DEFAULT_DEVICE_NAME));
    assert!(body.contains(DEFAULT_BUTTON_TAG));
    assert!(body.contains("10.0.0.17"));
    assert!(body.contains("not configured"));
}

#[test]
fn stylesheet_route_serves_css() {
    let mut console = Console::new();
    match console.get("GET /style.css HTTP/1.1\r\n\r\n") {
        Response::Css(css) => assert!(css.contains("body")),
        other => panic!("expected the stylesheet, got {:?}", other),
    }
}

#[test]
fn unknown_routes_get_a_404() {
    let mut console = Console::new();
    let response = console.get("GET /favicon.ico HTTP/1.1\r\n\r\n");
    assert!(matches!(response, Response::NotFound));
}

#[test]
fn non_get_methods_are_rejected() {
    let mut console = Console::new();
    let response = console.get("POST / HTTP/1.1\r\n\r\n");
    assert!(matches!(response, Response::NotFound));
}

#[test]
fn set_button_updates_and_persists_the_tag() {
    let mut console = Console::new();
    let body = html(console.get("GET /setButton?but_1=espresso HTTP/1.1\r\n\r\n"));

    assert_eq!(console.config.button_tag(1), Some("espresso"));
    assert_eq!(console.config.button_tag(2), Some(DEFAULT_BUTTON_TAG));
    assert!(body.contains("espresso"));
    assert_eq!(console.medium.stored_json()["button_1_tag"], "espresso");
}

#[test]
fn set_button_takes_both_parameters_at_once() {
    let mut console = Console::new();
    console.get("GET /setButton?but_1=coffee&but_2=tea HTTP/1.1\r\n\r\n");

    assert_eq!(console.config.button_tag(1), Some("coffee"));
    assert_eq!(console.config.button_tag(2), Some("tea"));
    let doc = console.medium.stored_json();
    assert_eq!(doc["button_1_tag"], "coffee");
    assert_eq!(doc["button_2_tag"], "tea");
}

#[test]
fn empty_button_parameters_keep_the_current_tags() {
    let mut console = Console::new();
    console.get("GET /setButton?but_1=&but_2= HTTP/1.1\r\n\r\n");

    assert_eq!(console.config.button_tag(1), Some(DEFAULT_BUTTON_TAG));
    assert_eq!(console.config.button_tag(2), Some(DEFAULT_BUTTON_TAG));
    assert!(!console.medium.has_document());

    // A mixed request rejects the empty tag and applies the other.
    console.get("GET /setButton?but_1=&but_2=tea HTTP/1.1\r\n\r\n");
    assert_eq!(console.config.button_tag(1), Some(DEFAULT_BUTTON_TAG));
    assert_eq!(console.config.button_tag(2), Some("tea"));
    assert_eq!(console.medium.stored_json()["button_2_tag"], "tea");
}

#[test]
fn form_encoded_values_are_decoded() {
    let mut console = Console::new();
    console.get("GET /setButton?but_1=Coffee+corner%2F2 HTTP/1.1\r\n\r\n");

    assert_eq!(console.config.button_tag(1), Some("Coffee corner/2"));
}

#[test]
fn set_script_id_rebuilds_the_report_target() {
    let mut console = Console::new();
    assert!(!console.target.is_configured());

    let body = html(console.get("GET /setGscriptID?gscriptID=AKfycbNewDeploy HTTP/1.1\r\n\r\n"));

    assert_eq!(console.config.script_id, "AKfycbNewDeploy");
    assert!(console.target.is_configured());
    let path = console
        .target
        .request_path(&ReportEvent::press("dev", "tag"));
    assert!(path.starts_with("/macros/s/AKfycbNewDeploy/exec?"));
    assert_eq!(console.medium.stored_json()["gscript_ID"], "AKfycbNewDeploy");
    assert!(!body.contains("not configured"));
}

#[test]
fn empty_script_id_is_refused() {
    let mut console = Console::new();
    console.get("GET /setGscriptID?gscriptID= HTTP/1.1\r\n\r\n");

    assert_eq!(console.config.script_id, "");
    assert!(!console.target.is_configured());
    assert!(!console.medium.has_document());
}

#[test]
fn set_device_name_updates_and_persists() {
    let mut console = Console::new();
    console.get("GET /setDeviceName?device_name=Meeting+room HTTP/1.1\r\n\r\n");

    assert_eq!(console.config.device_name, "Meeting room");
    assert_eq!(console.medium.stored_json()["device_name"], "Meeting room");
}

#[test]
fn configuration_routes_rerender_the_page() {
    let mut console = Console::new();
    let body = html(console.get("GET /setDeviceName?device_name=Lab HTTP/1.1\r\n\r\n"));
    assert!(body.contains("Lab"));
}
