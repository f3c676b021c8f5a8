//! Reload supervisor: the relay's main loop.
//!
//! ## States
//!
//! - `NoConfig`: no usable device configuration. Every tick retries the load
//!   and otherwise waits the idle backoff. No devices are processed.
//! - `Running`: a snapshot is held. Every tick compares the source
//!   fingerprint with the snapshot's and reloads on mismatch (or when the
//!   previous reload failed), then runs fetch -> map -> publish for each
//!   device in order.
//!
//! A failed reload keeps the previous snapshot and marks it for recheck so
//! the next tick tries again even if the fingerprint did not change.
//!
//! Devices are processed strictly one after another. A failure (or panic)
//! while handling one device is logged and the tick moves on to the next.

use crate::config_store::{ConfigSource, ConfigStore};
use crate::device::{ConfigSnapshot, DeviceConfig};
use crate::fetcher::TelemetrySource;
use crate::mapper::map_reading;
use crate::publisher::MessagePublisher;
use crate::settings::Schedule;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

/// Supervisor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    NoConfig,
    Running {
        snapshot: ConfigSnapshot,
        /// Last reload attempt failed; reload next tick regardless of fingerprint
        needs_recheck: bool,
    },
}

/// Short name of a state, for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    NoConfig,
    Running,
}

impl SupervisorState {
    pub fn kind(&self) -> StateKind {
        match self {
            SupervisorState::NoConfig => StateKind::NoConfig,
            SupervisorState::Running { .. } => StateKind::Running,
        }
    }

    pub fn snapshot(&self) -> Option<&ConfigSnapshot> {
        match self {
            SupervisorState::NoConfig => None,
            SupervisorState::Running { snapshot, .. } => Some(snapshot),
        }
    }
}

/// What happened to the configuration during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadAction {
    /// Fingerprint unchanged, nothing loaded
    NotNeeded,
    /// A new snapshot was loaded
    Reloaded { devices: usize },
    /// A load was attempted and failed
    Failed,
}

/// Result of processing one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Published,
    FetchFailed { kind: &'static str },
    PublishFailed { kind: &'static str },
    Panicked,
}

/// Per-device entry of a [`TickReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOutcome {
    pub device: String,
    pub topic: String,
    pub status: DeviceStatus,
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub reload: ReloadAction,
    /// State after the tick
    pub state: StateKind,
    pub devices: Vec<DeviceOutcome>,
}

impl TickReport {
    pub fn published(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Published)
            .count()
    }
}

/// Owns the configuration state and drives the fetch/publish cycle.
pub struct Supervisor<S> {
    store: ConfigStore<S>,
    fetcher: Box<dyn TelemetrySource>,
    publisher: Box<dyn MessagePublisher>,
    schedule: Schedule,
    state: SupervisorState,
}

impl<S: ConfigSource> Supervisor<S> {
    /// Create a supervisor and make the initial load attempt.
    pub fn new(
        store: ConfigStore<S>,
        fetcher: Box<dyn TelemetrySource>,
        publisher: Box<dyn MessagePublisher>,
        schedule: Schedule,
    ) -> Self {
        let state = match store.load() {
            Ok(snapshot) => {
                info!(
                    category = "config",
                    devices = snapshot.len(),
                    "Initial configuration loaded"
                );
                SupervisorState::Running {
                    snapshot,
                    needs_recheck: false,
                }
            }
            Err(e) => {
                warn!(
                    category = "config",
                    "No valid configuration at startup: {}", e
                );
                SupervisorState::NoConfig
            }
        };

        Self {
            store,
            fetcher,
            publisher,
            schedule,
            state,
        }
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    /// Run forever.
    pub async fn run(&mut self) {
        loop {
            let report = self.tick().await;
            let pause = match report.state {
                StateKind::NoConfig => self.schedule.idle_backoff(),
                StateKind::Running => self.schedule.cycle_delay(),
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// One staleness check plus one pass over all devices.
    pub async fn tick(&mut self) -> TickReport {
        let reload = self.refresh_config();

        let snapshot = match self.state.snapshot() {
            Some(snapshot) if !snapshot.is_empty() => snapshot.clone(),
            _ => {
                self.state = SupervisorState::NoConfig;
                return self.idle_report(reload);
            }
        };

        let mut devices = Vec::with_capacity(snapshot.len());
        for (index, device) in snapshot.devices().iter().enumerate() {
            if index > 0 && !self.schedule.device_delay().is_zero() {
                tokio::time::sleep(self.schedule.device_delay()).await;
            }
            devices.push(self.process_guarded(device).await);
        }

        TickReport {
            reload,
            state: StateKind::Running,
            devices,
        }
    }

    fn idle_report(&self, reload: ReloadAction) -> TickReport {
        info!(
            category = "config",
            source = %self.store.source().describe(),
            "No active configurations, waiting for a valid devices file"
        );
        TickReport {
            reload,
            state: StateKind::NoConfig,
            devices: Vec::new(),
        }
    }

    /// Check the source and reload if it changed (or must be rechecked).
    fn refresh_config(&mut self) -> ReloadAction {
        let current = self.store.current_fingerprint();

        let stale = match &self.state {
            SupervisorState::NoConfig => true,
            SupervisorState::Running {
                snapshot,
                needs_recheck,
            } => *needs_recheck || current != Some(snapshot.fingerprint()),
        };
        if !stale {
            return ReloadAction::NotNeeded;
        }

        if current.is_none() && matches!(self.state, SupervisorState::NoConfig) {
            return ReloadAction::Failed;
        }

        info!(
            category = "config",
            source = %self.store.source().describe(),
            "Configuration changed or re-appeared, reloading"
        );
        match self.store.load() {
            Ok(snapshot) => {
                let devices = snapshot.len();
                info!(category = "config", devices, "Reloaded configurations");
                self.state = SupervisorState::Running {
                    snapshot,
                    needs_recheck: false,
                };
                ReloadAction::Reloaded { devices }
            }
            Err(e) => {
                if let SupervisorState::Running { needs_recheck, .. } = &mut self.state {
                    *needs_recheck = true;
                    warn!(
                        category = "config",
                        "Failed to reload configurations, keeping previous: {}", e
                    );
                } else {
                    warn!(category = "config", "Failed to load configurations: {}", e);
                }
                ReloadAction::Failed
            }
        }
    }

    /// Process one device, turning a panic into a logged outcome.
    async fn process_guarded(&self, device: &DeviceConfig) -> DeviceOutcome {
        let status = match AssertUnwindSafe(self.process_device(device))
            .catch_unwind()
            .await
        {
            Ok(status) => status,
            Err(_) => {
                error!(
                    device = %device.token_prefix(),
                    topic = %device.mqtt_topic,
                    "Unexpected failure while processing device"
                );
                DeviceStatus::Panicked
            }
        };

        DeviceOutcome {
            device: device.token_prefix(),
            topic: device.mqtt_topic.clone(),
            status,
        }
    }

    async fn process_device(&self, device: &DeviceConfig) -> DeviceStatus {
        let prefix = device.token_prefix();

        let reading = match self.fetcher.fetch(device).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(device = %prefix, kind = e.kind(), "Failed to fetch data: {}", e);
                return DeviceStatus::FetchFailed { kind: e.kind() };
            }
        };

        let message = map_reading(&reading, &device.parameter_map);
        let payload = message.to_payload();
        info!(device = %prefix, topic = %device.mqtt_topic, "Extracted parameters: {}", payload);

        match self.publisher.publish(&device.mqtt_topic, &payload).await {
            Ok(()) => DeviceStatus::Published,
            Err(e) => {
                warn!(
                    device = %prefix,
                    topic = %device.mqtt_topic,
                    kind = e.kind(),
                    "Failed to publish: {}",
                    e
                );
                DeviceStatus::PublishFailed { kind: e.kind() }
            }
        }
    }
}
