//! Push-channel registry keyed by client id
//!
//! [`ClientChannelRegistry`] holds at most one live channel per [`ClientId`].
//! Jobs publish into it without knowing whether anybody listens; the push
//! endpoint registers a channel and holds the returned [`ChannelHandle`] for
//! as long as the subscriber stays connected.
//!
//! All mutation happens under one mutex, so register, unregister and publish
//! are atomic with respect to each other and events for a given id reach the
//! channel in publish order.
//!
//! Registration is last-writer-wins: registering an id that already has a
//! channel replaces it, and the displaced subscriber sees its stream end.
//! Every registration carries a generation number so that a displaced
//! handle being dropped later does not remove its replacement.
//!
//! Channels are bounded by [`CHANNEL_CAPACITY`]. When a stalled subscriber
//! lets its channel fill up, further progress events for it are dropped; a
//! terminal event that does not fit evicts the subscriber so its stream ends
//! instead of waiting for an event that never comes.

use crate::types::{ClientId, Event};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Events buffered per channel before a slow subscriber starts losing them
pub const CHANNEL_CAPACITY: usize = 1000;

type ChannelMap = HashMap<ClientId, Registration>;

struct Registration {
    generation: u64,
    sender: mpsc::Sender<Event>,
}

/// Registry of live push channels
#[derive(Default)]
pub struct ClientChannelRegistry {
    channels: Arc<Mutex<ChannelMap>>,
    next_generation: AtomicU64,
}

impl ClientChannelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel for `client_id`, replacing any existing one
    ///
    /// The channel stays registered until the returned handle is dropped,
    /// [`unregister`](Self::unregister) is called, or a later registration
    /// for the same id displaces it.
    pub fn register(&self, client_id: ClientId) -> ChannelHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        let replaced = lock(&self.channels)
            .insert(client_id.clone(), Registration { generation, sender })
            .is_some();

        if replaced {
            tracing::debug!(client_id = %client_id, "push channel replaced by newer subscriber");
        } else {
            tracing::debug!(client_id = %client_id, "push channel registered");
        }

        ChannelHandle {
            client_id,
            generation,
            receiver,
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Remove the channel for `client_id`, if any
    ///
    /// The subscriber's stream ends once it has drained already-queued events.
    pub fn unregister(&self, client_id: &ClientId) {
        if lock(&self.channels).remove(client_id).is_some() {
            tracing::debug!(client_id = %client_id, "push channel unregistered");
        }
    }

    /// Deliver `event` to the channel registered for `client_id`
    ///
    /// Publishing to an id without a channel is a silent no-op. A channel
    /// whose subscriber has gone away is removed on the spot. Never waits on
    /// a slow subscriber: see the module docs for what happens when its
    /// channel is full.
    ///
    /// Returns `true` if the event was handed to a live channel.
    pub fn publish(&self, client_id: &ClientId, event: Event) -> bool {
        let mut channels = lock(&self.channels);

        let Some(registration) = channels.get(client_id) else {
            tracing::trace!(client_id = %client_id, status = event.status(), "no subscriber, event dropped");
            return false;
        };

        match registration.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) if !event.is_terminal() => {
                tracing::debug!(client_id = %client_id, status = event.status(), "subscriber lagging, event dropped");
                false
            }
            Err(TrySendError::Full(event)) => {
                channels.remove(client_id);
                tracing::warn!(client_id = %client_id, status = event.status(), "subscriber lagging, push channel evicted");
                false
            }
            Err(TrySendError::Closed(_)) => {
                channels.remove(client_id);
                tracing::debug!(client_id = %client_id, "subscriber gone, push channel removed");
                false
            }
        }
    }

    /// Remove every channel, ending all subscriber streams
    ///
    /// Used on shutdown so long-lived push connections do not hold the
    /// server open.
    pub fn close_all(&self) {
        let mut channels = lock(&self.channels);
        if !channels.is_empty() {
            tracing::info!(count = channels.len(), "closing push channels");
        }
        channels.clear();
    }

    /// Whether a channel is currently registered for `client_id`
    pub fn is_registered(&self, client_id: &ClientId) -> bool {
        lock(&self.channels).contains_key(client_id)
    }

    /// Number of registered channels
    pub fn len(&self) -> usize {
        lock(&self.channels).len()
    }

    /// Whether no channel is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Subscriber side of a registered push channel
///
/// Yields events in publish order; ends when the registration is removed or
/// replaced. Dropping the handle unregisters the channel unless a newer
/// registration has taken its place.
pub struct ChannelHandle {
    client_id: ClientId,
    generation: u64,
    receiver: mpsc::Receiver<Event>,
    channels: Weak<Mutex<ChannelMap>>,
}

impl ChannelHandle {
    /// The client id this channel was registered for
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Receive the next event; `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

impl Stream for ChannelHandle {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = lock(&channels);
        let owned = channels
            .get(&self.client_id)
            .is_some_and(|r| r.generation == self.generation);
        if owned {
            channels.remove(&self.client_id);
            tracing::debug!(client_id = %self.client_id, "subscriber disconnected, push channel removed");
        }
    }
}

fn lock(channels: &Mutex<ChannelMap>) -> MutexGuard<'_, ChannelMap> {
    // A panic while holding the lock cannot leave the map half-updated
    channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
