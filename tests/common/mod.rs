#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hrm_bridge::ant::pages::RawPage;
use hrm_bridge::ant::{AntChannelConfig, AntTransport};
use hrm_bridge::ble::{BleHostEvent, BleServiceState, BleTransport, ClientId};
use hrm_bridge::errors::{AntError, BleError};
use tokio::sync::mpsc;

/// Scripted ANT+ transport: the test injects pages through [`AntProbe`]
/// and observes channel open/release counts.
pub struct ScriptedAntTransport {
    fail_open: bool,
    pages: Option<mpsc::Receiver<RawPage>>,
    opens: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

pub struct AntProbe {
    pub pages: mpsc::Sender<RawPage>,
    pub opens: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

pub fn scripted_ant(fail_open: bool) -> (ScriptedAntTransport, AntProbe) {
    let (page_tx, page_rx) = mpsc::channel(32);
    let opens = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));
    (
        ScriptedAntTransport {
            fail_open,
            pages: Some(page_rx),
            opens: Arc::clone(&opens),
            releases: Arc::clone(&releases),
        },
        AntProbe {
            pages: page_tx,
            opens,
            releases,
        },
    )
}

impl AntTransport for ScriptedAntTransport {
    fn open_channel(
        &mut self,
        _config: &AntChannelConfig,
    ) -> Result<mpsc::Receiver<RawPage>, AntError> {
        if self.fail_open {
            return Err(AntError::DeviceUnavailable("scripted open failure".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.pages
            .take()
            .ok_or_else(|| AntError::ChannelConfigRejected("channel already open".into()))
    }

    fn close_channel(&mut self) {
        // Release at most once, no matter how often we're closed.
        if self.opens.load(Ordering::SeqCst) > self.releases.load(Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Scripted BLE host: the test drives subscriptions through [`BleProbe`],
/// reads back every notified payload, and can make chosen clients fail.
pub struct ScriptedBleTransport {
    fail_start: bool,
    events: Option<mpsc::Receiver<BleHostEvent>>,
    sent: Arc<Mutex<Vec<(ClientId, Vec<u8>)>>>,
    failing: Arc<Mutex<BTreeSet<ClientId>>>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

pub struct BleProbe {
    pub events: mpsc::Sender<BleHostEvent>,
    pub sent: Arc<Mutex<Vec<(ClientId, Vec<u8>)>>>,
    pub failing: Arc<Mutex<BTreeSet<ClientId>>>,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

pub fn scripted_ble(fail_start: bool) -> (ScriptedBleTransport, BleProbe) {
    let (event_tx, event_rx) = mpsc::channel(32);
    let sent = Arc::new(Mutex::new(Vec::new()));
    let failing = Arc::new(Mutex::new(BTreeSet::new()));
    let starts = Arc::new(AtomicUsize::new(0));
    let stops = Arc::new(AtomicUsize::new(0));
    (
        ScriptedBleTransport {
            fail_start,
            events: Some(event_rx),
            sent: Arc::clone(&sent),
            failing: Arc::clone(&failing),
            starts: Arc::clone(&starts),
            stops: Arc::clone(&stops),
        },
        BleProbe {
            events: event_tx,
            sent,
            failing,
            starts,
            stops,
        },
    )
}

impl BleTransport for ScriptedBleTransport {
    fn start(
        &mut self,
        _service: &BleServiceState,
    ) -> Result<mpsc::Receiver<BleHostEvent>, BleError> {
        if self.fail_start {
            return Err(BleError::AdapterUnavailable("scripted start failure".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.events
            .take()
            .ok_or_else(|| BleError::RegistrationRejected("service already registered".into()))
    }

    fn notify(&mut self, client: ClientId, payload: &[u8]) -> Result<(), BleError> {
        if self.failing.lock().unwrap().contains(&client) {
            return Err(BleError::NotifyFailed(format!("client {client:?} is gone")));
        }
        self.sent.lock().unwrap().push((client, payload.to_vec()));
        Ok(())
    }

    fn stop(&mut self) {
        if self.starts.load(Ordering::SeqCst) > self.stops.load(Ordering::SeqCst) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A well-formed HRM default data page carrying the given computed HR.
pub fn hrm_page(device_id: u16, bpm: u8) -> RawPage {
    RawPage {
        device_id,
        data: [0x04, 0xFF, 0xFF, 0xFF, 0x20, 0x4E, 0x01, bpm],
    }
}

/// A page outside the HRM page family; the receiver must reject it.
pub fn unknown_page(device_id: u16) -> RawPage {
    RawPage {
        device_id,
        data: [0x59, 0, 0, 0, 0, 0, 0, 99],
    }
}
