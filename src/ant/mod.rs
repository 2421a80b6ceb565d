pub mod pages;

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::BridgeUpdate;
use crate::errors::AntError;
use crate::measurement::{HeartRateSample, MeasurementWriter};
use self::pages::RawPage;

/// ANT+ heart-rate profile constants, fixed by the device profile spec.
pub const HRM_DEVICE_TYPE: u8 = 120;
pub const HRM_TRANSMISSION_TYPE: u8 = 0;
pub const HRM_CHANNEL_PERIOD: u16 = 8070;
pub const HRM_RF_FREQUENCY: u8 = 57;

/// The well-known ANT+ public network key.
pub const ANT_PLUS_NETWORK_KEY: [u8; 8] = [0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45];

/// Channel parameters for one heart-rate sensor. Immutable after construction.
#[derive(Debug, Clone)]
pub struct AntChannelConfig {
    pub device_id: u16,
    pub device_type: u8,
    pub transmission_type: u8,
    pub network_key: [u8; 8],
    pub channel_period: u16,
    pub rf_frequency: u8,
}

impl AntChannelConfig {
    /// Heart-rate profile channel bound to one device ID, on the public
    /// ANT+ network.
    pub fn for_device(device_id: u16) -> Self {
        Self {
            device_id,
            device_type: HRM_DEVICE_TYPE,
            transmission_type: HRM_TRANSMISSION_TYPE,
            network_key: ANT_PLUS_NETWORK_KEY,
            channel_period: HRM_CHANNEL_PERIOD,
            rf_frequency: HRM_RF_FREQUENCY,
        }
    }
}

/// The ANT+ transport collaborator. Implementations own USB claim, network
/// key burn, and channel search/track; the bridge only sees the page stream.
pub trait AntTransport: Send + 'static {
    /// Opens a slave channel with the given parameters and returns the
    /// stream of received broadcast pages.
    fn open_channel(&mut self, config: &AntChannelConfig) -> Result<mpsc::Receiver<RawPage>, AntError>;

    /// Closes the channel and releases the radio. Idempotent.
    fn close_channel(&mut self);
}

/// Owns the ANT+ channel lifecycle: filters for the configured device,
/// decodes heart-rate pages, publishes accepted samples into the shared
/// slot, and reports dropout to the supervisor.
pub struct AntReceiver<T: AntTransport> {
    transport: T,
    config: AntChannelConfig,
    dropout_timeout: Duration,
    pages: mpsc::Receiver<RawPage>,
    writer: MeasurementWriter,
    updates: mpsc::UnboundedSender<BridgeUpdate>,
    cancel_token: CancellationToken,
    sequence: u64,
    stale: bool,
    last_accepted: tokio::time::Instant,
}

impl<T: AntTransport> AntReceiver<T> {
    /// Opens the channel. Fails fast with the transport's startup error;
    /// the returned receiver is ready to [`run`](Self::run).
    pub fn start(
        mut transport: T,
        config: AntChannelConfig,
        dropout_timeout: Duration,
        writer: MeasurementWriter,
        updates: mpsc::UnboundedSender<BridgeUpdate>,
        cancel_token: CancellationToken,
    ) -> Result<Self, AntError> {
        let pages = transport.open_channel(&config)?;
        info!(
            "ANT+ channel open: device {} type {} period {} rf {} key {:02X}..",
            config.device_id,
            config.device_type,
            config.channel_period,
            config.rf_frequency,
            config.network_key[0],
        );
        Ok(Self {
            transport,
            config,
            dropout_timeout,
            pages,
            writer,
            updates,
            cancel_token,
            sequence: 0,
            stale: false,
            last_accepted: tokio::time::Instant::now(),
        })
    }

    /// Closes the channel without entering the receive loop. Used to roll
    /// back a half-started bridge.
    pub fn stop(mut self) {
        self.transport.close_channel();
    }

    /// Receive loop. Marks the channel stale after `dropout_timeout` without
    /// an accepted page but keeps receiving, since the transport's channel
    /// search resumes on its own when the signal returns.
    ///
    /// The deadline is anchored to the last *accepted* page, so rejected
    /// traffic (foreign devices, unknown page IDs) cannot postpone it.
    pub async fn run(mut self) {
        info!("Listening for ANT+ HRM with device ID: {}", self.config.device_id);
        self.last_accepted = tokio::time::Instant::now();
        loop {
            tokio::select! {
                page = self.pages.recv() => match page {
                    Some(page) => self.handle_page(page),
                    None => {
                        error!("ANT+ transport closed the page stream!");
                        self.mark_stale();
                        self.cancel_token.cancelled().await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(self.last_accepted + self.dropout_timeout), if !self.stale => {
                    warn!(
                        "No accepted ANT+ page in {}s, channel is stale",
                        self.dropout_timeout.as_secs()
                    );
                    self.mark_stale();
                }
                _ = self.cancel_token.cancelled() => {
                    info!("Shutting down ANT+ receiver");
                    break;
                }
            }
        }
        self.transport.close_channel();
    }

    fn handle_page(&mut self, page: RawPage) {
        // The channel is ID-bound, so this should never trip. Defensive.
        if page.device_id != self.config.device_id {
            warn!(
                "Ignoring page from unexpected device {} (want {})",
                page.device_id, self.config.device_id
            );
            return;
        }
        match pages::decode_hrm(&page.data) {
            Ok(bpm) => {
                self.sequence += 1;
                self.last_accepted = tokio::time::Instant::now();
                self.writer.write(HeartRateSample {
                    bpm,
                    observed_at: Instant::now(),
                    sequence: self.sequence,
                });
                if self.stale {
                    info!("ANT+ signal recovered");
                    self.stale = false;
                }
                debug!("Heart rate received: {bpm} BPM (seq {})", self.sequence);
                let _ = self.updates.send(BridgeUpdate::SampleAccepted {
                    sequence: self.sequence,
                    bpm,
                });
            }
            Err(rejection) => debug!("Rejected ANT+ page: {rejection}"),
        }
    }

    fn mark_stale(&mut self) {
        if !self.stale {
            self.stale = true;
            let _ = self.updates.send(BridgeUpdate::AntDropout);
        }
    }
}
