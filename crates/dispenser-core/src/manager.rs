//! Connection management.
//!
//! The [`ConnectionManager`] owns the single selected device. It scans for
//! dispensers within a bounded window, connects to one, hands out a
//! [`DeviceHandle`] for it and releases it again. State transitions are
//! published on a `watch` channel and scan/connection events on a
//! `broadcast` channel.
//!
//! ```text
//! Idle ──scan──▶ Scanning ──window/stop──▶ Idle (or Connected)
//!   │                                │
//!   └──connect──▶ Connecting ◀──connect┘
//!                    │ ok            │ err
//!                    ▼               ▼
//!                Connected ──disconnect──▶ Idle
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dispenser_types::uuids::{MAX_LEVEL, MIN_LEVEL};
use dispenser_types::{Command, ConnectionState, LinkStatus, ParseError};

use crate::error::{Error, Result};
use crate::events::{DeviceEvent, DeviceId, DisconnectReason, EventDispatcher, EventReceiver};
use crate::handle::DeviceHandle;
use crate::scan::ScanOptions;
use crate::traits::{DiscoveredDevice, Radio};

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Scan window and name filter.
    pub scan_options: ScanOptions,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scan_options: ScanOptions::default(),
            event_capacity: 100,
        }
    }
}

/// Level thresholds read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Thresholds {
    /// Maximum level, `None` when the characteristic is empty.
    pub max: Option<u32>,
    /// Minimum level, `None` when the characteristic is empty.
    pub min: Option<u32>,
}

struct ScanTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    radio: Arc<dyn Radio>,
    config: ManagerConfig,
    state: watch::Sender<ConnectionState>,
    selected: RwLock<Option<DeviceHandle>>,
    discovered: RwLock<Vec<DiscoveredDevice>>,
    scan: Mutex<Option<ScanTask>>,
    events: EventDispatcher,
}

/// Manager for the single selected dispenser.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.inner.state.borrow())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager over a radio with default configuration.
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        Self::with_config(radio, ManagerConfig::default())
    }

    /// Create a manager with full configuration.
    pub fn with_config(radio: Arc<dyn Radio>, config: ManagerConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                radio,
                events: EventDispatcher::new(config.event_capacity),
                config,
                state,
                selected: RwLock::new(None),
                discovered: RwLock::new(Vec::new()),
                scan: Mutex::new(None),
            }),
        }
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to manager events.
    pub fn events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// The selected device, if any.
    pub async fn selected(&self) -> Option<DeviceHandle> {
        self.inner.selected.read().await.clone()
    }

    /// Online while a device is selected.
    pub async fn status(&self) -> LinkStatus {
        if self.inner.selected.read().await.is_some() {
            LinkStatus::Online
        } else {
            LinkStatus::Offline
        }
    }

    /// Devices found by the current or last scan, in discovery order.
    pub async fn discovered(&self) -> Vec<DiscoveredDevice> {
        self.inner.discovered.read().await.clone()
    }

    // --- Scanning ---

    /// Open a scan window.
    ///
    /// Clears the discovered list and returns once scanning has started.
    /// Matching devices show up in [`discovered`](Self::discovered) and as
    /// [`DeviceEvent::Discovered`] events. The window closes by itself after
    /// the configured duration.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn scan(&self) -> Result<()> {
        let previous = self.inner.begin(ConnectionState::Scanning)?;
        self.inner.discovered.write().await.clear();

        let rx = match self.inner.radio.start_scan().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Failed to start scan: {}", e);
                self.inner.state.send_replace(previous);
                self.inner.events.send(DeviceEvent::Error {
                    device: None,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        info!(
            "Scanning for devices named {}* for {:?}",
            self.inner.config.scan_options.name_prefix, self.inner.config.scan_options.duration
        );
        self.inner.events.send(DeviceEvent::ScanStarted);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.inner.clone().run_scan(rx, cancel.clone()));
        *self.inner.scan.lock().await = Some(ScanTask { cancel, handle });

        Ok(())
    }

    /// Close the scan window early. No-op when no scan is running.
    pub async fn stop_scan(&self) {
        let task = self.inner.scan.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("Scan task failed: {}", e);
            }
        }
    }

    /// Wait until the current scan window closes and return what it found.
    pub async fn wait_for_scan(&self) -> Vec<DiscoveredDevice> {
        let mut state = self.inner.state.subscribe();
        // The sender lives in `inner`, so this only fails if we are torn down.
        let _ = state
            .wait_for(|s| *s != ConnectionState::Scanning)
            .await;
        self.discovered().await
    }

    // --- Connection ---

    /// Connect to a device and select it.
    ///
    /// A running scan is stopped first. On success the previously selected
    /// device (if any) is released and its session cancelled. On failure the
    /// manager returns to `Idle` with no device selected.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn connect(&self, id: &str) -> Result<DeviceHandle> {
        self.stop_scan().await;
        self.inner.begin(ConnectionState::Connecting)?;

        // No locks are held while the radio connects
        let result = self.inner.radio.connect(id).await;

        match result {
            Ok(channel) => {
                let handle = DeviceHandle::new(channel);
                let previous = self.inner.selected.write().await.replace(handle.clone());

                if let Some(previous) = previous {
                    self.inner
                        .release(previous, DisconnectReason::Superseded, Some(handle.id()))
                        .await;
                }

                self.inner.state.send_replace(ConnectionState::Connected);
                self.inner.events.send(DeviceEvent::Connected {
                    device: device_id(&handle),
                });
                info!("Connected to {}", handle.label());
                Ok(handle)
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", id, e);
                let previous = self.inner.selected.write().await.take();
                if let Some(previous) = previous {
                    self.inner
                        .release(previous, DisconnectReason::Superseded, None)
                        .await;
                }

                self.inner.state.send_replace(ConnectionState::Idle);
                self.inner.events.send(DeviceEvent::Error {
                    device: Some(DeviceId::new(id)),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Release the selected device. No-op when nothing is selected.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let Some(handle) = self.inner.selected.write().await.take() else {
            debug!("Nothing to disconnect");
            return Ok(());
        };

        handle.invalidate();
        let result = handle.channel().disconnect().await;

        // A running scan settles the state itself when its window closes
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Idle;
                true
            } else {
                false
            }
        });

        self.inner.events.send(DeviceEvent::Disconnected {
            device: device_id(&handle),
            reason: DisconnectReason::UserRequested,
        });

        if let Err(e) = &result {
            warn!("Transport disconnect failed: {}", e);
        }
        info!("Disconnected from {}", handle.label());
        result
    }

    /// Stop scanning and release the selected device.
    pub async fn shutdown(&self) {
        self.stop_scan().await;
        let handle = self.inner.selected.write().await.take();
        if let Some(handle) = handle {
            self.inner
                .release(handle, DisconnectReason::Shutdown, None)
                .await;
        }
        self.inner.state.send_replace(ConnectionState::Idle);
    }

    // --- Commands ---

    /// Write a user command to the selected device.
    pub async fn send_command(&self, command: Command) -> Result<()> {
        let handle = self.selected().await.ok_or(Error::NotConnected)?;

        match handle.send(&command).await {
            Ok(()) => {
                self.inner.events.send(DeviceEvent::CommandSent {
                    device: device_id(&handle),
                    command: command.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                warn!("Command {} failed: {}", command, e);
                self.inner.events.send(DeviceEvent::Error {
                    device: Some(device_id(&handle)),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Read the level thresholds from the selected device.
    pub async fn read_thresholds(&self) -> Result<Thresholds> {
        let handle = self.selected().await.ok_or(Error::NotConnected)?;

        let max = handle.read_text(MAX_LEVEL).await?;
        let min = handle.read_text(MIN_LEVEL).await?;

        Ok(Thresholds {
            max: max.as_deref().map(parse_level).transpose()?,
            min: min.as_deref().map(parse_level).transpose()?,
        })
    }
}

fn parse_level(text: &str) -> Result<u32> {
    text.trim().parse::<u32>().map_err(|_| {
        Error::Decode(ParseError::InvalidValue(format!(
            "threshold is not an integer: {text:?}"
        )))
    })
}

fn device_id(handle: &DeviceHandle) -> DeviceId {
    DeviceId::with_name(handle.id(), handle.name().map(str::to_string))
}

impl Inner {
    /// Atomically move to `next` unless a scan or connect is in progress.
    fn begin(&self, next: ConnectionState) -> Result<ConnectionState> {
        let mut result = Ok(ConnectionState::Idle);
        self.state.send_if_modified(|state| match *state {
            ConnectionState::Scanning => {
                result = Err(Error::busy("scan"));
                false
            }
            ConnectionState::Connecting => {
                result = Err(Error::busy("connect"));
                false
            }
            previous => {
                result = Ok(previous);
                *state = next;
                true
            }
        });
        result
    }

    async fn run_scan(
        self: Arc<Self>,
        mut advertisements: mpsc::Receiver<DiscoveredDevice>,
        cancel: CancellationToken,
    ) {
        let window = tokio::time::sleep(self.config.scan_options.duration);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Scan stopped early");
                    break;
                }
                _ = &mut window => {
                    debug!("Scan window elapsed");
                    break;
                }
                advertisement = advertisements.recv() => match advertisement {
                    Some(device) => self.record(device).await,
                    None => {
                        debug!("Advertisement source closed");
                        break;
                    }
                },
            }
        }

        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
            self.events.send(DeviceEvent::Error {
                device: None,
                error: e.to_string(),
            });
        }

        let found = self.discovered.read().await.len();
        let next = if self.selected.read().await.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Idle
        };
        self.state.send_replace(next);
        self.events.send(DeviceEvent::ScanFinished { found });
        info!("Scan complete. Found {} device(s)", found);
    }

    async fn record(&self, device: DiscoveredDevice) {
        if !self.config.scan_options.matches(&device) {
            return;
        }

        {
            let mut discovered = self.discovered.write().await;
            if discovered.iter().any(|d| d.id == device.id) {
                return;
            }
            discovered.push(device.clone());
        }

        debug!("Discovered {}", device.display_name());
        self.events.send(DeviceEvent::Discovered {
            device: DeviceId::with_name(device.id, device.name),
            rssi: device.rssi,
        });
    }

    /// Invalidate a handle and tear down its transport.
    ///
    /// The transport is left alone when the replacement is the same device.
    async fn release(&self, handle: DeviceHandle, reason: DisconnectReason, keep_id: Option<&str>) {
        handle.invalidate();
        if keep_id != Some(handle.id())
            && let Err(e) = handle.channel().disconnect().await
        {
            debug!("Best-effort disconnect of {} failed: {}", handle.id(), e);
        }
        self.events.send(DeviceEvent::Disconnected {
            device: device_id(&handle),
            reason,
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut scan) = self.inner.scan.try_lock()
            && let Some(task) = scan.take()
        {
            task.cancel.cancel();
        }

        let Ok(mut selected) = self.inner.selected.try_write() else {
            return;
        };
        let Some(handle) = selected.take() else {
            return;
        };
        handle.invalidate();

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = handle.channel().disconnect().await {
                    debug!("Best-effort disconnect failed: {}", e);
                }
            });
        }
    }
}
