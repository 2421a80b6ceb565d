//! Simulated transports: an ANT+ sensor sweeping between two bpm bounds and
//! a loopback BLE host with one fake subscriber. Selected with `--simulate`
//! or `dummy.enabled`; also what keeps the binary usable on machines with
//! no ANT+ stick at all.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ant::pages::{RawPage, PAGE_TOGGLE_MASK};
use crate::ant::{AntChannelConfig, AntTransport};
use crate::ble::{BleHostEvent, BleServiceState, BleTransport, ClientId};
use crate::errors::{AntError, BleError};
use crate::settings::DummySettings;

/// HRM broadcast cadence: 8070/32768 counts, a hair over 4 Hz.
const PAGE_PERIOD: Duration = Duration::from_millis(246);

pub struct DummyAntTransport {
    settings: DummySettings,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DummyAntTransport {
    pub fn new(settings: DummySettings) -> Self {
        Self {
            settings,
            stop: CancellationToken::new(),
            task: None,
        }
    }
}

impl AntTransport for DummyAntTransport {
    fn open_channel(
        &mut self,
        config: &AntChannelConfig,
    ) -> Result<mpsc::Receiver<RawPage>, AntError> {
        let (page_tx, page_rx) = mpsc::channel(16);
        let settings = self.settings.clone();
        let stop = self.stop.clone();
        let device_id = config.device_id;
        info!("Simulated ANT+ sensor up as device {device_id}");
        self.task = Some(tokio::spawn(page_task(page_tx, settings, device_id, stop)));
        Ok(page_rx)
    }

    fn close_channel(&mut self) {
        self.stop.cancel();
        let _ = self.task.take();
    }
}

async fn page_task(
    page_tx: mpsc::Sender<RawPage>,
    settings: DummySettings,
    device_id: u16,
    stop: CancellationToken,
) {
    let low_bpm = settings.low_bpm.min(settings.high_bpm);
    let high_bpm = settings.high_bpm.max(settings.low_bpm.saturating_add(1));
    let mut page_interval = tokio::time::interval(PAGE_PERIOD);

    let mut rng = rand::rngs::StdRng::from_entropy();
    let mut bpm = low_bpm;
    let mut positive_direction = true;
    let mut sweep_phase: f32 = 0.0;
    let mut beat_phase: f32 = 0.0;
    let mut beat_count: u8 = 0;
    let mut beat_time: u16 = 0;
    let mut message_count: u32 = 0;

    loop {
        tokio::select! {
            _ = page_interval.tick() => {
                sweep_phase += PAGE_PERIOD.as_secs_f32() * settings.bpm_speed;
                while sweep_phase >= 1.0 {
                    sweep_phase -= 1.0;
                    if positive_direction {
                        bpm = bpm.saturating_add(1);
                        if bpm >= high_bpm { positive_direction = false; }
                    } else {
                        bpm = bpm.saturating_sub(1);
                        if bpm <= low_bpm { positive_direction = true; }
                    }
                }
                let jitter: i16 = rng.gen_range(-1..=1);
                let sent_bpm = (bpm as i16 + jitter).clamp(low_bpm as i16, high_bpm as i16) as u8;

                // Advance the simulated beat clock (1/1024 s units).
                beat_phase += PAGE_PERIOD.as_secs_f32() * sent_bpm.max(1) as f32 / 60.0;
                while beat_phase >= 1.0 {
                    beat_phase -= 1.0;
                    beat_count = beat_count.wrapping_add(1);
                    beat_time = beat_time.wrapping_add((60.0 / sent_bpm.max(1) as f32 * 1024.0) as u16);
                }

                // Default data page, toggle bit flipping every 4th message.
                let toggle = if (message_count / 4) % 2 == 1 { PAGE_TOGGLE_MASK } else { 0 };
                message_count += 1;
                let data = [
                    0x04 | toggle,
                    0xFF,
                    0xFF,
                    0xFF,
                    (beat_time & 0xFF) as u8,
                    (beat_time >> 8) as u8,
                    beat_count,
                    sent_bpm,
                ];
                if page_tx.send(RawPage { device_id, data }).await.is_err() {
                    break;
                }
            }
            _ = stop.cancelled() => {
                info!("Shutting down simulated ANT+ sensor");
                break;
            }
        }
    }
}

pub struct DummyBleTransport {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DummyBleTransport {
    pub fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            task: None,
        }
    }
}

impl Default for DummyBleTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BleTransport for DummyBleTransport {
    fn start(
        &mut self,
        service: &BleServiceState,
    ) -> Result<mpsc::Receiver<BleHostEvent>, BleError> {
        let (event_tx, event_rx) = mpsc::channel(8);
        let stop = self.stop.clone();
        info!(
            "Simulated BLE adapter registered \"{}\", faking one subscriber",
            service.device_name
        );
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = event_tx.send(BleHostEvent::Subscribed(ClientId(1))).await;
            stop.cancelled().await;
        }));
        Ok(event_rx)
    }

    fn notify(&mut self, client: ClientId, payload: &[u8]) -> Result<(), BleError> {
        match payload {
            [flags, bpm] => info!("[sim] notify {client:?}: {bpm} BPM (flags {flags:#04x})"),
            other => warn!("[sim] notify {client:?}: unexpected payload {other:02X?}"),
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.cancel();
        let _ = self.task.take();
    }
}
