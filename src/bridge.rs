use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ant::{AntChannelConfig, AntReceiver, AntTransport};
use crate::ble::{BlePeripheral, BleTransport};
use crate::errors::AppError;
use crate::measurement::SharedMeasurement;

/// How long each actor gets to release its transport on shutdown before
/// being aborted.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything the supervisor needs, decoupled from the settings file so
/// tests can construct it directly.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub channel: AntChannelConfig,
    pub dropout_timeout: Duration,
    pub tick_interval: Duration,
    pub forward_zero_bpm: bool,
    pub device_name: String,
}

impl BridgeConfig {
    pub fn new(channel: AntChannelConfig) -> Self {
        Self {
            channel,
            dropout_timeout: Duration::from_secs(8),
            tick_interval: Duration::from_secs(1),
            forward_zero_bpm: true,
            device_name: "HRM-Bridge".into(),
        }
    }
}

/// Why the bridge is degraded but still serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    AntDropout,
    BleAdapterLost,
}

/// Bridge lifecycle. Degraded keeps advertising and connections alive but
/// produces no fresh notifications until the cause clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Starting,
    Running,
    Degraded(DegradedReason),
    Stopping,
    Stopped,
}

/// Runtime events both actors report to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeUpdate {
    SampleAccepted { sequence: u64, bpm: u8 },
    AntDropout,
    BleAdapterLost,
    BleAdapterRestored,
}

/// Starts both state machines, wires the ANT+ new-sample signal to the BLE
/// notify trigger through the shared slot, and owns shutdown and error
/// propagation policy.
pub struct BridgeSupervisor {
    config: BridgeConfig,
    shutdown: CancellationToken,
    state_tx: watch::Sender<BridgeState>,
}

impl BridgeSupervisor {
    /// The returned watch channel observes every state transition; the
    /// token cancels the whole bridge.
    pub fn new(
        config: BridgeConfig,
        shutdown: CancellationToken,
    ) -> (Self, watch::Receiver<BridgeState>) {
        let (state_tx, state_rx) = watch::channel(BridgeState::Idle);
        (
            Self {
                config,
                shutdown,
                state_tx,
            },
            state_rx,
        )
    }

    /// Runs the bridge to completion: start both sides (rolling back the
    /// first if the second fails), relay updates, then stop both within the
    /// grace period. Startup failures abort the whole bridge; runtime
    /// events only move the state machine.
    pub async fn run<A, B>(mut self, ant_transport: A, ble_transport: B) -> Result<(), AppError>
    where
        A: AntTransport,
        B: BleTransport,
    {
        if self.config.channel.device_id == 0 {
            self.set_state(BridgeState::Stopped);
            return Err(AppError::Config(
                "ant.device_id is required and must be non-zero".into(),
            ));
        }
        self.set_state(BridgeState::Starting);

        let (writer, reader) = SharedMeasurement::new_pair();
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
        let cancel_actors = self.shutdown.child_token();

        let receiver = match AntReceiver::start(
            ant_transport,
            self.config.channel.clone(),
            self.config.dropout_timeout,
            writer,
            updates_tx.clone(),
            cancel_actors.clone(),
        ) {
            Ok(receiver) => receiver,
            Err(e) => {
                self.set_state(BridgeState::Stopped);
                return Err(e.into());
            }
        };

        let peripheral = match BlePeripheral::start(
            ble_transport,
            self.config.device_name.clone(),
            self.config.tick_interval,
            self.config.forward_zero_bpm,
            reader,
            updates_tx,
            cancel_actors.clone(),
        ) {
            Ok(peripheral) => peripheral,
            Err(e) => {
                // No partial bridge: release the ANT+ channel before
                // surfacing the fatal error.
                receiver.stop();
                self.set_state(BridgeState::Stopped);
                return Err(e.into());
            }
        };

        let ant_task = tokio::spawn(receiver.run());
        let ble_task = tokio::spawn(peripheral.run());
        self.set_state(BridgeState::Running);

        loop {
            tokio::select! {
                Some(update) = updates_rx.recv() => self.handle_update(update),
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.set_state(BridgeState::Stopping);
        cancel_actors.cancel();
        join_with_grace("ANT+ receiver", ant_task).await;
        join_with_grace("BLE peripheral", ble_task).await;
        self.set_state(BridgeState::Stopped);
        Ok(())
    }

    fn handle_update(&mut self, update: BridgeUpdate) {
        match update {
            BridgeUpdate::SampleAccepted { sequence, bpm } => {
                debug!("Sample accepted: {bpm} BPM (seq {sequence})");
                if matches!(*self.state_tx.borrow(), BridgeState::Degraded(_)) {
                    self.set_state(BridgeState::Running);
                }
            }
            BridgeUpdate::AntDropout => {
                // Supersedes an adapter-loss degradation: the latest cause
                // wins, and only an accepted sample clears a dropout.
                if matches!(
                    *self.state_tx.borrow(),
                    BridgeState::Running | BridgeState::Degraded(_)
                ) {
                    self.set_state(BridgeState::Degraded(DegradedReason::AntDropout));
                }
            }
            BridgeUpdate::BleAdapterLost => {
                if matches!(
                    *self.state_tx.borrow(),
                    BridgeState::Running | BridgeState::Degraded(_)
                ) {
                    self.set_state(BridgeState::Degraded(DegradedReason::BleAdapterLost));
                }
            }
            BridgeUpdate::BleAdapterRestored => {
                if *self.state_tx.borrow()
                    == BridgeState::Degraded(DegradedReason::BleAdapterLost)
                {
                    self.set_state(BridgeState::Running);
                }
            }
        }
    }

    fn set_state(&mut self, next: BridgeState) {
        let prev = *self.state_tx.borrow();
        if prev != next {
            info!("Bridge state: {prev:?} -> {next:?}");
            let _ = self.state_tx.send(next);
        }
    }
}

/// Waits for a stopping actor, aborting it if it misses the grace period.
/// Stop-path failures are logged, never escalated.
async fn join_with_grace(name: &str, task: JoinHandle<()>) {
    let abort = task.abort_handle();
    match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("{name} task failed during shutdown: {e}"),
        Err(_elapsed) => {
            warn!("{name}: {}", AppError::ShutdownTimeout(SHUTDOWN_GRACE));
            abort.abort();
        }
    }
}
