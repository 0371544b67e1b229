use std::cell::RefCell;
use std::rc::Rc;

use embassy_futures::block_on;

use esp32_event_counter::config::DeviceConfig;
use esp32_event_counter::constants::{CONNECT_ATTEMPTS, INDICATOR_UNHEALTHY_MS, REPORT_FINGERPRINT};
use esp32_event_counter::report::{
    LinkState, ReportEvent, ReportLink, ReportTarget, ReportingClient,
};
use esp32_event_counter::status::Indicator;

#[derive(Default)]
struct Calls {
    connects: usize,
    gets: usize,
    paths: Vec<String>,
}

/// Scripted transport: connect and request outcomes are played back in
/// order (exhausted scripts succeed), with every call recorded for the
/// assertions.
#[derive(Default)]
struct ScriptedLink {
    connect_script: Vec<Result<(), &'static str>>,
    get_script: Vec<Result<u16, &'static str>>,
    fingerprint: Option<String>,
    connected: bool,
    calls: Rc<RefCell<Calls>>,
}

impl ReportLink for ScriptedLink {
    type Error = &'static str;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.calls.borrow_mut().connects += 1;
        let outcome = if self.connect_script.is_empty() {
            Ok(())
        } else {
            self.connect_script.remove(0)
        };
        self.connected = outcome.is_ok();
        outcome
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn peer_fingerprint(&self) -> Option<String> {
        self.fingerprint.clone()
    }

    async fn get(&mut self, path: &str) -> Result<u16, Self::Error> {
        let mut calls = self.calls.borrow_mut();
        calls.gets += 1;
        calls.paths.push(String::from(path));
        let outcome = if self.get_script.is_empty() {
            Ok(200)
        } else {
            self.get_script.remove(0)
        };
        if outcome.is_err() {
            self.connected = false;
        }
        outcome
    }
}

fn configured() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.script_id = String::from("AKfycbTestDeployment");
    config
}

#[test]
fn startup_stops_at_the_first_successful_attempt() {
    block_on(async {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let link = ScriptedLink {
            connect_script: vec![Err("refused"), Err("refused"), Ok(())],
            calls: calls.clone(),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);

        assert!(client.connect_with_retries().await);
        assert_eq!(client.state(), LinkState::Connected);
        assert_eq!(calls.borrow().connects, 3);
    });
}

#[test]
fn startup_gives_up_after_the_attempt_budget() {
    block_on(async {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let link = ScriptedLink {
            connect_script: vec![Err("refused"); 10],
            calls: calls.clone(),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);

        assert!(!client.connect_with_retries().await);
        assert_eq!(client.state(), LinkState::Disconnected);
        assert_eq!(calls.borrow().connects, CONNECT_ATTEMPTS as usize);
    });
}

#[test]
fn broken_handshake_never_reaches_connected() {
    block_on(async {
        // An endpoint that answers the dial but cannot negotiate
        // encryption fails every attempt; connect includes the handshake.
        let link = ScriptedLink {
            connect_script: vec![Err("handshake timeout"); 10],
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);

        assert!(!client.connect_with_retries().await);
        assert_eq!(client.state(), LinkState::Disconnected);

        // Nothing was negotiated, so there is nothing to verify.
        client.verify();
        assert_eq!(client.state(), LinkState::Disconnected);
        assert!(!client.is_healthy());
    });
}

#[test]
fn verify_confirms_a_matching_fingerprint() {
    block_on(async {
        let link = ScriptedLink {
            fingerprint: Some(REPORT_FINGERPRINT.to_lowercase()),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        client.connect_with_retries().await;

        client.verify();
        assert_eq!(client.state(), LinkState::Verified);
    });
}

#[test]
fn fingerprint_mismatch_is_advisory() {
    block_on(async {
        let link = ScriptedLink {
            fingerprint: Some(String::from(
                "00 11 22 33 44 55 66 77 88 99 AA BB CC DD EE FF 00 11 22 33",
            )),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        client.connect_with_retries().await;

        client.verify();
        assert_eq!(client.state(), LinkState::Unverified);

        // Reporting keeps working in the unverified state.
        let target = ReportTarget::new(&configured());
        let event = ReportEvent::press("dev", "tag");
        assert!(client.report(&target, &event).await);
    });
}

#[test]
fn missing_fingerprint_is_advisory() {
    block_on(async {
        let mut client = ReportingClient::new(ScriptedLink::default());
        client.connect_with_retries().await;

        client.verify();
        assert_eq!(client.state(), LinkState::Unverified);
    });
}

#[test]
fn verify_without_a_connection_does_nothing() {
    let mut client = ReportingClient::new(ScriptedLink::default());
    client.verify();
    assert_eq!(client.state(), LinkState::Disconnected);
}

#[test]
fn report_issues_one_request_per_event() {
    block_on(async {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let link = ScriptedLink {
            connected: true,
            calls: calls.clone(),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        let target = ReportTarget::new(&configured());
        let event = ReportEvent::press("Kitchen corner", "espresso");

        assert!(client.report(&target, &event).await);

        let calls = calls.borrow();
        assert_eq!(calls.gets, 1);
        assert_eq!(calls.connects, 0);
        let path = &calls.paths[0];
        assert!(path.starts_with("/macros/s/AKfycbTestDeployment/exec?"));
        assert!(path.contains("deviceID=Kitchen%20corner"));
        assert!(path.contains("tag=espresso"));
        assert!(path.contains("value=1"));
        assert!(path.contains("bat=1.00"));
    });
}

#[test]
fn dropped_link_reconnects_inline() {
    block_on(async {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let link = ScriptedLink {
            connect_script: vec![Ok(())],
            calls: calls.clone(),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        let target = ReportTarget::new(&configured());
        let event = ReportEvent::press("dev", "coffee");

        assert!(client.report(&target, &event).await);
        assert_eq!(calls.borrow().connects, 1);
        assert_eq!(calls.borrow().gets, 1);
    });
}

#[test]
fn failed_reconnect_drops_the_event() {
    block_on(async {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let link = ScriptedLink {
            connect_script: vec![Err("network down")],
            calls: calls.clone(),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        let target = ReportTarget::new(&configured());
        let event = ReportEvent::press("dev", "coffee");

        assert!(!client.report(&target, &event).await);
        assert_eq!(calls.borrow().connects, 1);
        assert_eq!(calls.borrow().gets, 0);
    });
}

#[test]
fn failed_request_is_not_retried() {
    block_on(async {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let link = ScriptedLink {
            connected: true,
            get_script: vec![Err("broken pipe")],
            calls: calls.clone(),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        let target = ReportTarget::new(&configured());

        let lost = ReportEvent::press("dev", "espresso");
        assert!(!client.report(&target, &lost).await);
        assert_eq!(calls.borrow().gets, 1);
        assert_eq!(client.state(), LinkState::Disconnected);

        // The next event reconnects and goes out; the lost one is gone.
        let next = ReportEvent::press("dev", "tea");
        assert!(client.report(&target, &next).await);
        assert_eq!(calls.borrow().connects, 1);
        assert_eq!(calls.borrow().gets, 2);
    });
}

#[test]
fn redirect_statuses_count_as_delivered() {
    block_on(async {
        let link = ScriptedLink {
            get_script: vec![Ok(302), Ok(399)],
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        client.connect_with_retries().await;
        let target = ReportTarget::new(&configured());

        assert!(client.report(&target, &ReportEvent::press("dev", "a")).await);
        assert!(client.report(&target, &ReportEvent::press("dev", "b")).await);
    });
}

#[test]
fn error_statuses_count_as_rejected() {
    block_on(async {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let link = ScriptedLink {
            get_script: vec![Ok(404)],
            calls: calls.clone(),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        client.connect_with_retries().await;
        let target = ReportTarget::new(&configured());

        assert!(!client.report(&target, &ReportEvent::press("dev", "a")).await);
        // A rejection is not a transport failure; the connection stays up.
        assert_eq!(client.state(), LinkState::Connected);
        assert_eq!(calls.borrow().gets, 1);
    });
}

#[test]
fn empty_script_id_reports_and_turns_unhealthy() {
    block_on(async {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let link = ScriptedLink {
            get_script: vec![Ok(404), Ok(200)],
            calls: calls.clone(),
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        client.connect_with_retries().await;
        assert!(client.is_healthy());

        // The request still goes out with the blank id in the path; the
        // endpoint rejects it and the indicator turns unhealthy.
        let target = ReportTarget::new(&DeviceConfig::default());
        let event = ReportEvent::press("dev", "a");
        assert!(!client.report(&target, &event).await);
        assert_eq!(calls.borrow().gets, 1);
        assert!(calls.borrow().paths[0].starts_with("/macros/s//exec?"));
        assert!(!client.is_healthy());

        // A delivered report clears the condition.
        assert!(client.report(&ReportTarget::new(&configured()), &event).await);
        assert!(client.is_healthy());
    });
}

#[test]
fn health_sample_tracks_the_link() {
    block_on(async {
        let link = ScriptedLink {
            connected: true,
            get_script: vec![Err("broken pipe")],
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        client.connect_with_retries().await;
        assert!(client.is_healthy());

        let target = ReportTarget::new(&configured());
        client.report(&target, &ReportEvent::press("dev", "a")).await;
        assert!(!client.is_healthy());
    });
}

#[test]
fn failed_report_tightens_the_indicator_cadence() {
    block_on(async {
        let link = ScriptedLink {
            connected: true,
            get_script: vec![Err("broken pipe")],
            ..ScriptedLink::default()
        };
        let mut client = ReportingClient::new(link);
        client.connect_with_retries().await;

        let mut indicator = Indicator::new();
        indicator.record(0, client.is_healthy());
        assert!(indicator.is_healthy());

        let target = ReportTarget::new(&configured());
        client.report(&target, &ReportEvent::press("dev", "a")).await;

        // The next sample picks the failure up and the recheck period
        // drops to the fast one, which also bounds how long the LED can
        // stay lit after a failed report.
        indicator.record(1_000, client.is_healthy());
        assert!(!indicator.is_healthy());
        assert!(!indicator.due(1_000 + INDICATOR_UNHEALTHY_MS - 1));
        assert!(indicator.due(1_000 + INDICATOR_UNHEALTHY_MS));
    });
}

#[test]
fn target_rebuild_follows_a_script_id_change() {
    let mut config = configured();
    let mut target = ReportTarget::new(&config);
    let event = ReportEvent::press("dev", "t");
    assert!(target.request_path(&event).contains("AKfycbTestDeployment"));

    config.script_id = String::from("AKfycbReplacement");
    target.rebuild(&config);

    let path = target.request_path(&event);
    assert!(path.contains("AKfycbReplacement"));
    assert!(!path.contains("AKfycbTestDeployment"));
}

#[test]
fn unconfigured_target_knows_it() {
    let target = ReportTarget::new(&DeviceConfig::default());
    assert!(!target.is_configured());
    assert_eq!(target.host(), "script.google.com");
    assert_eq!(target.port(), 443);
}
