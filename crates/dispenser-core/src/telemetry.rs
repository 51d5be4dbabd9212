//! Live telemetry for the selected dispenser.
//!
//! A [`TelemetryMonitor`] attaches to a [`DeviceHandle`], reads the mode
//! once and follows the sensor stream. It is the only writer of the
//! [`TelemetrySnapshot`]; everyone else reads it through a `watch` channel.
//!
//! When the handle's session ends (disconnect or another device selected)
//! the snapshot falls back to the disconnected defaults.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dispenser_types::uuids::{MODE, SENSOR_STREAM};
use dispenser_types::{DeviceMode, TelemetrySnapshot};

use crate::error::{Error, Result};
use crate::handle::DeviceHandle;
use crate::subscription::Subscription;

struct Attachment {
    handle: DeviceHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Follows the sensor stream of one device at a time.
pub struct TelemetryMonitor {
    snapshot: Arc<watch::Sender<TelemetrySnapshot>>,
    attachment: Mutex<Option<Attachment>>,
}

impl Default for TelemetryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TelemetryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryMonitor")
            .field("snapshot", &*self.snapshot.borrow())
            .finish_non_exhaustive()
    }
}

impl TelemetryMonitor {
    /// Create a detached monitor.
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(TelemetrySnapshot::default());
        Self {
            snapshot: Arc::new(snapshot),
            attachment: Mutex::new(None),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.snapshot.subscribe()
    }

    /// Whether the monitor follows a live session.
    pub async fn is_attached(&self) -> bool {
        self.attachment
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| a.handle.is_active() && !a.task.is_finished())
    }

    /// Start following a device, replacing any previous attachment.
    ///
    /// The mode is read once; an empty or unreadable mode counts as manual.
    /// Fails only when the sensor stream cannot be subscribed, in which case
    /// the snapshot stays at its disconnected defaults.
    #[tracing::instrument(level = "info", skip_all, fields(device = %handle.label()))]
    pub async fn attach(&self, handle: DeviceHandle) -> Result<()> {
        let mut attachment = self.attachment.lock().await;
        if let Some(previous) = attachment.take() {
            stop(previous).await;
        }
        self.snapshot.send_replace(TelemetrySnapshot::default());

        let mode = read_mode(&handle).await;

        let subscription = match handle.subscribe(SENSOR_STREAM).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Failed to subscribe to sensor stream: {}", e);
                return Err(e);
            }
        };

        self.snapshot
            .send_replace(TelemetrySnapshot::online(handle.label(), mode));
        info!("Following sensor stream (mode {})", mode);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(follow(
            self.snapshot.clone(),
            handle.clone(),
            subscription,
            cancel.clone(),
        ));

        *attachment = Some(Attachment {
            handle,
            cancel,
            task,
        });
        Ok(())
    }

    /// Stop following and reset the snapshot.
    pub async fn detach(&self) {
        if let Some(previous) = self.attachment.lock().await.take() {
            stop(previous).await;
        }
        self.snapshot.send_replace(TelemetrySnapshot::default());
    }

    /// Flip the mode and write the new mode command.
    ///
    /// The local mode is flipped before the write and stays flipped if the
    /// write fails; the error is still returned.
    pub async fn toggle_mode(&self) -> Result<DeviceMode> {
        let handle = self.active_handle().await?;

        let mut next = DeviceMode::Manual;
        self.snapshot.send_modify(|snapshot| {
            next = snapshot.mode.unwrap_or(DeviceMode::Manual).toggled();
            snapshot.mode = Some(next);
        });

        debug!("Mode toggled locally to {}", next);
        handle.send(&next.command()).await?;
        Ok(next)
    }

    /// Set the mode explicitly, with the same semantics as [`toggle_mode`](Self::toggle_mode).
    pub async fn set_mode(&self, mode: DeviceMode) -> Result<()> {
        let handle = self.active_handle().await?;
        self.snapshot.send_modify(|snapshot| snapshot.mode = Some(mode));
        handle.send(&mode.command()).await
    }

    async fn active_handle(&self) -> Result<DeviceHandle> {
        self.attachment
            .lock()
            .await
            .as_ref()
            .map(|a| a.handle.clone())
            .filter(DeviceHandle::is_active)
            .ok_or(Error::NotConnected)
    }
}

impl Drop for TelemetryMonitor {
    fn drop(&mut self) {
        if let Ok(mut attachment) = self.attachment.try_lock()
            && let Some(attachment) = attachment.take()
        {
            attachment.cancel.cancel();
        }
    }
}

async fn read_mode(handle: &DeviceHandle) -> DeviceMode {
    match handle.read_text(MODE).await {
        Ok(Some(token)) => DeviceMode::from_token(&token),
        Ok(None) => {
            warn!("Mode not available, assuming manual");
            DeviceMode::Manual
        }
        Err(e) => {
            warn!("Failed to read mode, assuming manual: {}", e);
            DeviceMode::Manual
        }
    }
}

async fn stop(attachment: Attachment) {
    attachment.cancel.cancel();
    if let Err(e) = attachment.task.await {
        warn!("Telemetry task failed: {}", e);
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

async fn follow(
    snapshot: Arc<watch::Sender<TelemetrySnapshot>>,
    handle: DeviceHandle,
    mut subscription: Subscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Telemetry detached");
                return;
            }
            _ = handle.cancelled() => break,
            notification = subscription.next_notification() => match notification {
                Some(Ok(value)) => {
                    debug!(value = %value, "Sensor notification");
                    snapshot.send_modify(|s| {
                        s.latest = Some(value);
                        s.last_updated = Some(now());
                    });
                }
                Some(Err(e)) => warn!("Sensor notification error: {}", e),
                None => break,
            },
        }
    }

    // Session over or stream closed by the transport
    info!("Sensor stream for {} ended", handle.label());
    snapshot.send_replace(TelemetrySnapshot::default());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::MockDevice;
    use dispenser_types::LinkStatus;
    use dispenser_types::uuids::COMMAND_SINK;

    async fn attached(device: &Arc<MockDevice>) -> (TelemetryMonitor, DeviceHandle) {
        let monitor = TelemetryMonitor::new();
        let handle = DeviceHandle::new(device.clone());
        monitor.attach(handle.clone()).await.unwrap();
        (monitor, handle)
    }

    async fn wait_for_latest(monitor: &TelemetryMonitor, expected: &str) {
        let mut rx = monitor.subscribe();
        tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|s| s.latest.as_deref() == Some(expected)),
        )
        .await
        .expect("timed out waiting for notification")
        .unwrap();
    }

    async fn wait_for_offline(monitor: &TelemetryMonitor) {
        let mut rx = monitor.subscribe();
        tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|s| s.status == LinkStatus::Offline),
        )
        .await
        .expect("timed out waiting for reset")
        .unwrap();
    }

    #[test]
    fn test_new_monitor_is_disconnected() {
        let monitor = TelemetryMonitor::new();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot, TelemetrySnapshot::default());
        assert_eq!(snapshot.device, "Not connected");
        assert_eq!(snapshot.latest_display(), "N/A");
    }

    #[tokio::test]
    async fn test_attach_reads_mode() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        device.set_value(MODE, "AUTO").await;
        let (monitor, _handle) = attached(&device).await;

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, LinkStatus::Online);
        assert_eq!(snapshot.device, "ESP32_Kitchen");
        assert_eq!(snapshot.mode, Some(DeviceMode::Auto));
        assert!(snapshot.latest.is_none());
        assert!(monitor.is_attached().await);
    }

    #[tokio::test]
    async fn test_unknown_or_missing_mode_is_manual() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        device.set_value(MODE, "auto").await;
        let (monitor, _handle) = attached(&device).await;
        assert_eq!(monitor.snapshot().mode, Some(DeviceMode::Manual));

        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        let (monitor, _handle) = attached(&device).await;
        assert_eq!(monitor.snapshot().mode, Some(DeviceMode::Manual));
    }

    #[tokio::test]
    async fn test_mode_read_failure_is_manual() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        device.set_value(MODE, "AUTO").await;
        device.set_read_failure(true, Some("gatt error")).await;
        let (monitor, _handle) = attached(&device).await;
        assert_eq!(monitor.snapshot().mode, Some(DeviceMode::Manual));
    }

    #[tokio::test]
    async fn test_notifications_update_latest() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        let (monitor, _handle) = attached(&device).await;

        device.notify(SENSOR_STREAM, "42.5");
        wait_for_latest(&monitor, "42.5").await;
        let first = monitor.snapshot().last_updated.unwrap();

        device.notify(SENSOR_STREAM, "43.0");
        wait_for_latest(&monitor, "43.0").await;
        assert!(monitor.snapshot().last_updated.unwrap() >= first);
    }

    #[tokio::test]
    async fn test_notification_error_keeps_stream() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        let (monitor, _handle) = attached(&device).await;

        device.notify_error(SENSOR_STREAM, "link noise");
        device.notify_raw(SENSOR_STREAM, bytes::Bytes::from_static(&[0xff, 0xfe]));
        device.notify(SENSOR_STREAM, "12");

        wait_for_latest(&monitor, "12").await;
        assert_eq!(monitor.snapshot().status, LinkStatus::Online);
    }

    #[tokio::test]
    async fn test_session_end_resets_snapshot() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        let (monitor, handle) = attached(&device).await;
        device.notify(SENSOR_STREAM, "42");
        wait_for_latest(&monitor, "42").await;

        handle.invalidate();
        wait_for_offline(&monitor).await;

        assert_eq!(monitor.snapshot(), TelemetrySnapshot::default());
        assert!(!monitor.is_attached().await);
    }

    #[tokio::test]
    async fn test_reattach_replaces_previous() {
        let first = Arc::new(MockDevice::new("ESP32_First"));
        let second = Arc::new(MockDevice::new("ESP32_Second"));
        let (monitor, _first_handle) = attached(&first).await;

        monitor
            .attach(DeviceHandle::new(second.clone()))
            .await
            .unwrap();
        assert_eq!(monitor.snapshot().device, "ESP32_Second");

        // Old device no longer feeds the snapshot
        first.notify(SENSOR_STREAM, "1");
        second.notify(SENSOR_STREAM, "2");
        wait_for_latest(&monitor, "2").await;
        assert_eq!(monitor.snapshot().device, "ESP32_Second");
    }

    #[tokio::test]
    async fn test_detach_resets() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        let (monitor, _handle) = attached(&device).await;
        monitor.detach().await;
        assert_eq!(monitor.snapshot(), TelemetrySnapshot::default());
        assert!(!monitor.is_attached().await);
    }

    #[tokio::test]
    async fn test_attach_with_dead_handle_fails() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        let handle = DeviceHandle::new(device.clone());
        handle.invalidate();

        let monitor = TelemetryMonitor::new();
        assert!(matches!(
            monitor.attach(handle).await,
            Err(Error::NotConnected)
        ));
        assert_eq!(monitor.snapshot(), TelemetrySnapshot::default());
    }

    #[tokio::test]
    async fn test_toggle_mode_writes_command() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        device.set_value(MODE, "AUTO").await;
        let (monitor, _handle) = attached(&device).await;

        assert_eq!(monitor.toggle_mode().await.unwrap(), DeviceMode::Manual);
        assert_eq!(monitor.toggle_mode().await.unwrap(), DeviceMode::Auto);

        assert_eq!(device.written_text().await, vec!["MANUAL", "AUTO"]);
        assert!(device.writes().await.iter().all(|(a, _)| *a == COMMAND_SINK));
    }

    #[tokio::test]
    async fn test_toggle_mode_failure_keeps_local_flip() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        device.set_value(MODE, "AUTO").await;
        let (monitor, _handle) = attached(&device).await;
        device.set_write_failure(true, None).await;

        assert!(monitor.toggle_mode().await.is_err());
        assert_eq!(monitor.snapshot().mode, Some(DeviceMode::Manual));
    }

    #[tokio::test]
    async fn test_toggle_mode_detached() {
        let monitor = TelemetryMonitor::new();
        assert!(matches!(
            monitor.toggle_mode().await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_set_mode() {
        let device = Arc::new(MockDevice::new("ESP32_Kitchen"));
        let (monitor, _handle) = attached(&device).await;

        monitor.set_mode(DeviceMode::Auto).await.unwrap();
        assert_eq!(monitor.snapshot().mode, Some(DeviceMode::Auto));
        assert_eq!(device.written_text().await, vec!["AUTO"]);
    }
}
