//! The selected device, as handed out by the connection manager.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use dispenser_types::codec::{decode_payload, encode_command};
use dispenser_types::{CharacteristicAddress, Command};

use crate::error::{Error, Result};
use crate::subscription::Subscription;
use crate::traits::DeviceChannel;

/// A connected device together with its session.
///
/// Cloning a handle shares the same session. Every subscription opened
/// through a handle is bound to a child of the session token, so when the
/// manager disconnects or selects another device all of them end and
/// further operations through the handle fail with
/// [`Error::NotConnected`].
#[derive(Clone)]
pub struct DeviceHandle {
    id: String,
    name: Option<String>,
    channel: Arc<dyn DeviceChannel>,
    session: CancellationToken,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl DeviceHandle {
    /// Wrap a connected channel in a fresh session.
    pub fn new(channel: Arc<dyn DeviceChannel>) -> Self {
        Self {
            id: channel.id().to_string(),
            name: channel.name().map(str::to_string),
            channel,
            session: CancellationToken::new(),
        }
    }

    /// Device identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Advertised name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name if advertised, otherwise the identifier.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Underlying channel.
    pub fn channel(&self) -> &Arc<dyn DeviceChannel> {
        &self.channel
    }

    /// Whether the session is still current.
    pub fn is_active(&self) -> bool {
        !self.session.is_cancelled()
    }

    /// Resolves once the session ends.
    pub async fn cancelled(&self) {
        self.session.cancelled().await;
    }

    pub(crate) fn invalidate(&self) {
        self.session.cancel();
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Write a command to the characteristic it is routed to.
    pub async fn send(&self, command: &Command) -> Result<()> {
        self.ensure_active()?;
        let text = command.to_string();
        debug!(device = %self.id, command = %text, characteristic = command.address().label(), "Sending command");
        self.channel
            .write(command.address(), encode_command(&text))
            .await
    }

    /// Read a characteristic once and decode it as text.
    ///
    /// An empty value yields `Ok(None)`.
    pub async fn read_text(&self, address: CharacteristicAddress) -> Result<Option<String>> {
        self.ensure_active()?;
        match self.channel.read_once(address).await? {
            Some(payload) => Ok(Some(decode_payload(&payload)?)),
            None => Ok(None),
        }
    }

    /// Subscribe to notifications for the lifetime of the session.
    pub async fn subscribe(&self, address: CharacteristicAddress) -> Result<Subscription> {
        self.ensure_active()?;
        self.channel
            .subscribe(address, self.session.child_token())
            .await
    }
}
