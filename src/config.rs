use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use crate::constants;

pub const DEFAULT_AP_SSID: &str = "ESP WiFi";
pub const DEFAULT_AP_IP: &str = "10.0.1.1";
pub const DEFAULT_AP_GATEWAY: &str = "10.0.1.1";
pub const DEFAULT_AP_NETMASK: &str = "255.255.255.0";
pub const DEFAULT_DEVICE_NAME: &str = "ESP thing";
pub const DEFAULT_BUTTON_TAG: &str = "no_tag";

pub const KEY_VERSION: &str = "version";
pub const KEY_DEVICE_NAME: &str = "device_name";
pub const KEY_AP_SSID: &str = "ap_ssid";
pub const KEY_AP_IP: &str = "ap_ip";
pub const KEY_AP_GATEWAY: &str = "ap_gateway";
// The stored format keeps the netmask under `ap_path`; documents already
// on devices depend on that key.
pub const KEY_AP_NETMASK: &str = "ap_path";
pub const KEY_SCRIPT_ID: &str = "gscript_ID";
pub const KEY_BUTTON_TAGS: [&str; 2] = ["button_1_tag", "button_2_tag"];

#[derive(Debug)]
pub enum Error {
    /// Button index outside the two physical buttons.
    InvalidButton(usize),
}

/// Runtime device configuration. One instance exists for the lifetime of
/// the firmware; fields are overwritten from the stored document at boot
/// and individually mutated through the console afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    // Firmware version, baked in at compile time
    pub version: &'static str,

    // Build timestamp, baked in at compile time
    pub compiled_at: &'static str,

    // SSID advertised by the provisioning portal
    pub ap_ssid: heapless::String<64>,

    // Static address of the provisioning portal
    pub ap_ip: heapless::String<20>,

    // Gateway advertised by the provisioning portal
    pub ap_gateway: heapless::String<20>,

    // Netmask advertised by the provisioning portal
    pub ap_netmask: heapless::String<20>,

    // Human-readable identifier; DHCP hostname and reported device id
    pub device_name: String,

    // Apps Script deployment id the reports target; empty until configured
    pub script_id: String,

    // Free-text labels reported with each button's events
    pub button_tags: [String; 2],
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version: constants::VERSION,
            compiled_at: constants::BUILD_TIMESTAMP,
            ap_ssid: truncated(DEFAULT_AP_SSID),
            ap_ip: truncated(DEFAULT_AP_IP),
            ap_gateway: truncated(DEFAULT_AP_GATEWAY),
            ap_netmask: truncated(DEFAULT_AP_NETMASK),
            device_name: String::from(DEFAULT_DEVICE_NAME),
            script_id: String::new(),
            button_tags: [
                String::from(DEFAULT_BUTTON_TAG),
                String::from(DEFAULT_BUTTON_TAG),
            ],
        }
    }
}

impl DeviceConfig {
    /// Replaces the tag reported for a button. Indices are 1-based, as
    /// labelled on the enclosure; anything outside 1..=2 is rejected
    /// without touching either tag.
    pub fn set_button_tag(&mut self, index: usize, tag: &str) -> Result<(), Error> {
        match index {
            1 | 2 => {
                self.button_tags[index - 1] = String::from(tag);
                Ok(())
            }
            _ => Err(Error::InvalidButton(index)),
        }
    }

    pub fn button_tag(&self, index: usize) -> Option<&str> {
        match index {
            1 | 2 => Some(self.button_tags[index - 1].as_str()),
            _ => None,
        }
    }

    /// Whether a remote script id has been configured yet.
    pub fn script_configured(&self) -> bool {
        !self.script_id.is_empty()
    }
}

/// Where the configuration document lives. The firmware backs this with a
/// region of internal flash; tests back it with RAM.
pub trait ConfigMedium {
    type Error: core::fmt::Debug;

    fn read_document(&mut self) -> Result<Vec<u8>, Self::Error>;
    fn write_document(&mut self, doc: &[u8]) -> Result<(), Self::Error>;
}

/// Loads and saves the single JSON configuration document.
///
/// None of the operations here fail from the caller's point of view: a
/// missing, unreadable or corrupt document degrades to defaults (load) or
/// leaves the stored copy untouched (save), with a logged diagnostic.
pub struct ConfigStore<M: ConfigMedium> {
    medium: M,
}

impl<M: ConfigMedium> ConfigStore<M> {
    pub fn new(medium: M) -> Self {
        Self { medium }
    }

    /// Builds a `DeviceConfig` from the stored document. Every key falls
    /// back independently to its compiled-in default, so a partial or
    /// corrupt document degrades field by field rather than all-or-nothing.
    /// Unknown keys are ignored here but survive `save` untouched.
    pub fn load(&mut self) -> DeviceConfig {
        let mut config = DeviceConfig::default();
        let doc = match self.read_parsed() {
            Some(doc) => doc,
            None => {
                info!("Using default configuration");
                return config;
            }
        };

        if let Some(ssid) = doc.get(KEY_AP_SSID).and_then(Value::as_str) {
            config.ap_ssid = truncated(ssid);
        }
        if let Some(ip) = doc.get(KEY_AP_IP).and_then(Value::as_str) {
            config.ap_ip = truncated(ip);
        }
        if let Some(gateway) = doc.get(KEY_AP_GATEWAY).and_then(Value::as_str) {
            config.ap_gateway = truncated(gateway);
        }
        if let Some(netmask) = doc.get(KEY_AP_NETMASK).and_then(Value::as_str) {
            config.ap_netmask = truncated(netmask);
        }
        if let Some(name) = doc.get(KEY_DEVICE_NAME).and_then(Value::as_str) {
            config.device_name = String::from(name);
        }
        if let Some(id) = doc.get(KEY_SCRIPT_ID).and_then(Value::as_str) {
            config.script_id = String::from(id);
        }
        for (slot, key) in config.button_tags.iter_mut().zip(KEY_BUTTON_TAGS) {
            if let Some(tag) = doc.get(key).and_then(Value::as_str) {
                *slot = String::from(tag);
            }
        }

        config
    }

    /// Read-modify-write of one key. The stored document holds the whole
    /// record, so overwriting it with only the changed field would lose
    /// its siblings; instead the existing document (or an empty one, if
    /// nothing parses) is patched and rewritten in full. Every save also
    /// stamps the writing firmware's version into the document.
    pub fn save(&mut self, key: &str, value: &str) {
        let mut doc = match self.read_parsed() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        doc.insert(String::from(key), Value::String(String::from(value)));
        doc.insert(
            String::from(KEY_VERSION),
            Value::String(String::from(constants::VERSION)),
        );

        let rendered = match serde_json::to_vec(&Value::Object(doc)) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to serialize configuration: {e:?}");
                return;
            }
        };
        match self.medium.write_document(&rendered) {
            Ok(()) => debug!("Saved configuration key {key}"),
            Err(e) => error!("Failed to write configuration: {e:?}"),
        }
    }

    /// Dumps the raw stored document to the log. Diagnostic aid only.
    pub fn render(&mut self) {
        match self.medium.read_document() {
            Ok(raw) => match core::str::from_utf8(&raw) {
                Ok(doc) => info!("Stored configuration: {doc}"),
                Err(_) => warn!("Stored configuration is not valid utf-8"),
            },
            Err(e) => warn!("Failed to read stored configuration: {e:?}"),
        }
    }

    fn read_parsed(&mut self) -> Option<Value> {
        let raw = match self.medium.read_document() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read configuration: {e:?}");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!("Failed to parse configuration: {e:?}");
                None
            }
        }
    }
}

/// Bounded copy. Values longer than the field capacity lose their tail.
fn truncated<const N: usize>(value: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in value.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::truncated;

    #[test]
    fn truncated_drops_the_tail() {
        let s: heapless::String<4> = truncated("abcdef");
        assert_eq!(s.as_str(), "abcd");
        let s: heapless::String<8> = truncated("abc");
        assert_eq!(s.as_str(), "abc");
    }
}
