#![allow(async_fn_in_trait)]

use alloc::format;
use alloc::string::String;

use log::{debug, error, info, warn};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::config::DeviceConfig;
use crate::constants;

/// One tagged button event. Built on a press, handed to the client once,
/// discarded whatever the outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEvent {
    pub device_id: String,
    pub tag: String,
    pub count: i32,
    pub battery: f32,
}

impl ReportEvent {
    /// A single press of the button labelled `tag`. Each event counts one
    /// press; there is no battery sense hardware, so a fixed full reading
    /// goes out with every event.
    pub fn press(device_id: &str, tag: &str) -> Self {
        Self {
            device_id: String::from(device_id),
            tag: String::from(tag),
            count: 1,
            battery: 1.0,
        }
    }
}

/// Where reports go: fixed host and port, plus the request path base
/// derived from the configured script id.
#[derive(Debug, Clone)]
pub struct ReportTarget {
    host: &'static str,
    port: u16,
    base_path: String,
    configured: bool,
}

impl ReportTarget {
    pub fn new(config: &DeviceConfig) -> Self {
        let mut target = Self {
            host: constants::REPORT_HOST,
            port: constants::REPORT_PORT,
            base_path: String::new(),
            configured: false,
        };
        target.rebuild(config);
        target
    }

    /// Recomputes the base path from the configured script id. Must be
    /// called again after every mutation of that field; a stale base would
    /// silently keep reporting to the previous deployment.
    pub fn rebuild(&mut self, config: &DeviceConfig) {
        self.base_path.clear();
        self.base_path.push_str(constants::SCRIPT_PATH_PREFIX);
        self.base_path.push_str(&config.script_id);
        self.base_path.push_str(constants::SCRIPT_PATH_SUFFIX);
        self.configured = config.script_configured();
        if self.configured {
            debug!("Report base path: {}", self.base_path);
        } else {
            warn!("No script id configured; reports will target an incomplete path");
        }
    }

    pub fn host(&self) -> &'static str {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Full request path for one event. The free-text fields are
    /// percent-encoded; count and battery are numeric.
    pub fn request_path(&self, event: &ReportEvent) -> String {
        format!(
            "{}?deviceID={}&tag={}&value={}&bat={:.2}",
            self.base_path,
            utf8_percent_encode(&event.device_id, NON_ALPHANUMERIC),
            utf8_percent_encode(&event.tag, NON_ALPHANUMERIC),
            event.count,
            event.battery,
        )
    }
}

/// Transport seam under the reporting client: an encrypted connection
/// that can be (re)opened and carry plain GET requests. The firmware
/// backs this with a TLS session; tests script it.
pub trait ReportLink {
    type Error: core::fmt::Debug;

    /// Opens (or reopens) the connection, including the handshake.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Whether the link still looks usable.
    fn is_connected(&self) -> bool;

    /// SHA-1 fingerprint of the peer certificate, if the transport can
    /// produce one.
    fn peer_fingerprint(&self) -> Option<String>;

    /// Issues `GET path` and returns the response status code.
    async fn get(&mut self, path: &str) -> Result<u16, Self::Error>;
}

/// Lifecycle of the reporting connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected and the pinned fingerprint matched.
    Verified,
    /// Connected but identity could not be confirmed. Reporting continues
    /// regardless; see [`ReportingClient::verify`].
    Unverified,
}

impl LinkState {
    fn is_up(self) -> bool {
        matches!(
            self,
            LinkState::Connected | LinkState::Verified | LinkState::Unverified
        )
    }
}

/// Owns the one long-lived reporting connection.
pub struct ReportingClient<L: ReportLink> {
    link: L,
    state: LinkState,
    /// The most recent report was rejected or lost. Cleared by the next
    /// successful connect or delivery.
    degraded: bool,
}

impl<L: ReportLink> ReportingClient<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            state: LinkState::Disconnected,
            degraded: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Liveness sample for the status indicator: the link must look
    /// usable and the last report must have gone through. Collapses the
    /// state back to `Disconnected` when the link has gone away
    /// underneath us; never reconnects (that happens lazily inside
    /// [`Self::report`]).
    pub fn is_healthy(&mut self) -> bool {
        if !self.link.is_connected() {
            self.state = LinkState::Disconnected;
        }
        self.state.is_up() && !self.degraded
    }

    async fn connect(&mut self) -> Result<(), L::Error> {
        self.state = LinkState::Connecting;
        match self.link.connect().await {
            Ok(()) => {
                self.state = LinkState::Connected;
                self.degraded = false;
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                Err(e)
            }
        }
    }

    /// Startup connect loop: a fixed number of attempts, stopping at the
    /// first success. Exhaustion leaves the client disconnected and the
    /// rest of the system carries on without reporting.
    pub async fn connect_with_retries(&mut self) -> bool {
        for attempt in 1..=constants::CONNECT_ATTEMPTS {
            match self.connect().await {
                Ok(()) => {
                    info!(
                        "Connected to {} (attempt {})",
                        constants::REPORT_HOST,
                        attempt
                    );
                    return true;
                }
                Err(e) => warn!(
                    "Connection attempt {}/{} failed: {:?}",
                    attempt,
                    constants::CONNECT_ATTEMPTS,
                    e
                ),
            }
        }
        error!(
            "Could not connect to {}; continuing without reporting",
            constants::REPORT_HOST
        );
        false
    }

    /// Advisory identity check against the pinned certificate fingerprint.
    /// A mismatch, or a transport that cannot produce a fingerprint at
    /// all, is logged and the connection stays in use. Reports keep
    /// flowing either way; this check never blocks anything.
    pub fn verify(&mut self) {
        if !self.state.is_up() {
            return;
        }
        match self.link.peer_fingerprint() {
            Some(observed) if observed.eq_ignore_ascii_case(constants::REPORT_FINGERPRINT) => {
                info!("Certificate match");
                self.state = LinkState::Verified;
            }
            Some(observed) => {
                warn!(
                    "Certificate mismatch: expected {}, got {}",
                    constants::REPORT_FINGERPRINT,
                    observed
                );
                self.state = LinkState::Unverified;
            }
            None => {
                warn!("Peer certificate fingerprint unavailable; continuing unverified");
                self.state = LinkState::Unverified;
            }
        }
    }

    /// Sends one event, at most once. Reconnects inline if the link has
    /// dropped since the last call; on any failure the event is gone and
    /// the outcome only drives the status indicator.
    pub async fn report(&mut self, target: &ReportTarget, event: &ReportEvent) -> bool {
        if !self.link.is_connected() {
            self.state = LinkState::Disconnected;
            info!("Connecting to {} again", target.host());
            if let Err(e) = self.connect().await {
                warn!("Reconnect failed, event for {} dropped: {:?}", event.tag, e);
                self.degraded = true;
                return false;
            }
        }

        if !target.is_configured() {
            warn!("Reporting without a script id; the endpoint will reject this");
        }

        let path = target.request_path(event);
        debug!("GET {}", path);
        match self.link.get(&path).await {
            Ok(status) if (200..400).contains(&status) => {
                info!("Reported {} for {} ({})", event.count, event.tag, status);
                self.degraded = false;
                true
            }
            Ok(status) => {
                warn!("Report for {} rejected with status {}", event.tag, status);
                self.degraded = true;
                false
            }
            Err(e) => {
                warn!("Report for {} failed: {:?}", event.tag, e);
                self.state = LinkState::Disconnected;
                self.degraded = true;
                false
            }
        }
    }
}
