//! Notification subscriptions.
//!
//! A [`Subscription`] owns one background task that pulls raw notification
//! payloads from the transport, decodes them to text and forwards them over
//! an mpsc channel. Delivery and decode failures are forwarded as `Err`
//! items and do not end the subscription. It ends when it is cancelled
//! (directly, through its session, or by a disconnect) or when the transport
//! closes the notification source. Once cancelled, buffered items are
//! discarded rather than delivered.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dispenser_types::CharacteristicAddress;
use dispenser_types::codec::decode_payload;

use crate::error::{Error, Result};

/// Buffer size for the notification channel.
const NOTIFICATION_BUFFER: usize = 32;

/// Result type for subscription items.
pub type NotificationResult = Result<String>;

/// Record a subscription token, dropping tokens that are already cancelled.
pub(crate) fn track_token(tokens: &mut Vec<CancellationToken>, token: CancellationToken) {
    tokens.retain(|t| !t.is_cancelled());
    tokens.push(token);
}

/// A live notification subscription on one characteristic.
///
/// Dropping the subscription cancels it.
pub struct Subscription {
    address: CharacteristicAddress,
    receiver: mpsc::Receiver<NotificationResult>,
    handle: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("address", &self.address.label())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Spawn the delivery task for a raw payload source.
    ///
    /// The task stops when `cancel_token` is cancelled, when `source` ends,
    /// or when the subscription is dropped.
    pub fn spawn<S>(address: CharacteristicAddress, source: S, cancel_token: CancellationToken) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let task_token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut source = Box::pin(source);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!(characteristic = address.label(), "Subscription cancelled");
                        break;
                    }
                    item = source.next() => {
                        let Some(item) = item else {
                            debug!(characteristic = address.label(), "Notification source closed");
                            break;
                        };

                        let delivered = match item {
                            Ok(payload) => decode_payload(&payload).map_err(Error::from),
                            Err(e) => Err(e),
                        };

                        if let Err(e) = &delivered {
                            warn!(characteristic = address.label(), error = %e, "Notification delivery error");
                        }

                        if tx.send(delivered).await.is_err() {
                            debug!("Subscription receiver dropped, stopping");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            address,
            receiver: rx,
            handle,
            cancel_token,
        }
    }

    /// Characteristic this subscription listens on.
    pub fn address(&self) -> CharacteristicAddress {
        self.address
    }

    /// Receive the next notification.
    ///
    /// Returns `None` once the subscription has been cancelled, even if
    /// items are still buffered. When the source closes on its own the
    /// buffer is drained first.
    pub async fn next_notification(&mut self) -> Option<NotificationResult> {
        if self.close_if_cancelled() {
            return None;
        }
        let cancel_token = self.cancel_token.clone();
        let item = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => None,
            item = self.receiver.recv() => item,
        };
        // Cancellation may race the final recv
        if self.close_if_cancelled() { None } else { item }
    }

    /// Close the channel once cancelled so buffered items are never handed out.
    fn close_if_cancelled(&mut self) -> bool {
        if self.cancel_token.is_cancelled() {
            self.receiver.close();
            true
        } else {
            false
        }
    }

    /// Cancel the subscription. Calling this more than once is a no-op.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the subscription has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether the delivery task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Stream for Subscription {
    type Item = NotificationResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.close_if_cancelled() {
            return Poll::Ready(None);
        }
        let polled = self.receiver.poll_recv(cx);
        if polled.is_ready() && self.close_if_cancelled() {
            return Poll::Ready(None);
        }
        polled
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
