pub mod encoding;

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::BridgeUpdate;
use crate::errors::BleError;
use crate::measurement::{HeartRateSample, MeasurementReader};

pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// Opaque handle the transport assigns to a connected central.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

/// Connection events surfaced by the BLE host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleHostEvent {
    Subscribed(ClientId),
    Unsubscribed(ClientId),
    AdapterLost,
    AdapterRestored,
}

/// GATT layout plus live subscription state. Mutated only by
/// [`BlePeripheral`] in response to host events.
#[derive(Debug)]
pub struct BleServiceState {
    pub device_name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub subscribers: BTreeSet<ClientId>,
    pub advertising: bool,
}

impl BleServiceState {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            service_uuid: HEART_RATE_SERVICE_UUID,
            characteristic_uuid: HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID,
            subscribers: BTreeSet::new(),
            advertising: false,
        }
    }
}

/// The BLE transport collaborator. Implementations own adapter access,
/// GATT registration and advertising; the bridge only sees subscription
/// events and a raw notify primitive.
pub trait BleTransport: Send + 'static {
    /// Registers the service/characteristic and starts advertising,
    /// returning the stream of host events.
    fn start(&mut self, service: &BleServiceState) -> Result<mpsc::Receiver<BleHostEvent>, BleError>;

    /// Pushes a characteristic notification to one subscribed client.
    fn notify(&mut self, client: ClientId, payload: &[u8]) -> Result<(), BleError>;

    /// Stops advertising and unregisters the service. Idempotent.
    fn stop(&mut self);
}

/// Exposes the Heart Rate service, tracks subscribers, and turns shared-slot
/// samples into characteristic notifications, triggered by the new-data
/// signal or the fallback tick, whichever fires first.
pub struct BlePeripheral<T: BleTransport> {
    transport: T,
    service: BleServiceState,
    events: mpsc::Receiver<BleHostEvent>,
    reader: MeasurementReader,
    tick_interval: Duration,
    forward_zero_bpm: bool,
    adapter_ok: bool,
    updates: mpsc::UnboundedSender<BridgeUpdate>,
    cancel_token: CancellationToken,
}

impl<T: BleTransport> BlePeripheral<T> {
    pub fn start(
        mut transport: T,
        device_name: impl Into<String>,
        tick_interval: Duration,
        forward_zero_bpm: bool,
        reader: MeasurementReader,
        updates: mpsc::UnboundedSender<BridgeUpdate>,
        cancel_token: CancellationToken,
    ) -> Result<Self, BleError> {
        let mut service = BleServiceState::new(device_name);
        let events = transport.start(&service)?;
        service.advertising = true;
        info!(
            "BLE peripheral started and advertising as \"{}\"",
            service.device_name
        );
        Ok(Self {
            transport,
            service,
            events,
            reader,
            tick_interval,
            forward_zero_bpm,
            adapter_ok: true,
            updates,
            cancel_token,
        })
    }

    /// Notify loop. A fresh sample is pushed as soon as it lands; the tick
    /// re-sends the latest value so clients keep seeing updates between
    /// ANT+ pages. A fresh push resets the tick phase to hold the cadence
    /// near one notification per interval.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.reader.fresh() => {
                    if let Some(sample) = self.reader.take_fresh() {
                        self.notify_subscribers(&sample);
                        tick.reset();
                    }
                }
                _ = tick.tick() => {
                    if let Some(sample) = self.reader.read_latest() {
                        self.notify_subscribers(&sample);
                    }
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_host_event(event),
                    None => {
                        error!("BLE transport closed its event stream!");
                        self.cancel_token.cancelled().await;
                        break;
                    }
                },
                _ = self.cancel_token.cancelled() => {
                    info!("Shutting down BLE peripheral");
                    break;
                }
            }
        }
        self.service.advertising = false;
        self.service.subscribers.clear();
        self.transport.stop();
    }

    fn handle_host_event(&mut self, event: BleHostEvent) {
        match event {
            // No notification is sent from the subscribe itself; the next
            // trigger serves the client the latest sample.
            BleHostEvent::Subscribed(client) => {
                self.service.subscribers.insert(client);
                info!(
                    "Client {:?} subscribed ({} total)",
                    client,
                    self.service.subscribers.len()
                );
            }
            BleHostEvent::Unsubscribed(client) => {
                self.service.subscribers.remove(&client);
                info!(
                    "Client {:?} unsubscribed ({} left)",
                    client,
                    self.service.subscribers.len()
                );
            }
            BleHostEvent::AdapterLost => {
                error!("BLE adapter lost, pausing notifications");
                self.adapter_ok = false;
                let _ = self.updates.send(BridgeUpdate::BleAdapterLost);
            }
            BleHostEvent::AdapterRestored => {
                info!("BLE adapter restored");
                self.adapter_ok = true;
                let _ = self.updates.send(BridgeUpdate::BleAdapterRestored);
            }
        }
    }

    fn notify_subscribers(&mut self, sample: &HeartRateSample) {
        if !self.adapter_ok || self.service.subscribers.is_empty() {
            return;
        }
        if sample.bpm == 0 && !self.forward_zero_bpm {
            debug!("Suppressing zero-bpm notification (seq {})", sample.sequence);
            return;
        }
        let payload = encoding::encode_measurement(sample.bpm);
        for client in &self.service.subscribers {
            // A slow or gone client only costs itself its notification.
            if let Err(e) = self.transport.notify(*client, &payload) {
                warn!("Failed to notify client {client:?}: {e}");
            }
        }
        debug!(
            "Notified {} subscriber(s): {} BPM (seq {})",
            self.service.subscribers.len(),
            sample.bpm,
            sample.sequence
        );
    }
}
