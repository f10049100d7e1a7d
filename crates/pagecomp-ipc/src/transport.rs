// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Request/response messaging between execution contexts.
//!
//! Every context owns an [`Inbox`] and hands out cloneable [`Port`]s. Sending
//! enqueues immediately (so messages from one sender arrive in order) and
//! yields a [`PendingReply`]. A destination that is gone, drops the request
//! without answering, or stays silent past the timeout is reported as
//! [`Unreachable`]; callers treat that as non-fatal.

use crate::protocol::MessageSender;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};
use uuid::Uuid;

/// How long a caller waits for a reply before giving up.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(2);

/// The destination context could not take the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unreachable {
    #[error("destination context is closed")]
    Closed,
    #[error("no listener answered")]
    NoListener,
    #[error("no response within {0:?}")]
    TimedOut(Duration),
}

/// Marker for a message the destination acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered;

/// Outcome of a best-effort push.
pub type PushOutcome = Result<Delivered, Unreachable>;

/// Reply handle travelling with a request.
#[derive(Debug)]
pub struct Responder<R> {
    id: Uuid,
    tx: oneshot::Sender<R>,
}

impl<R> Responder<R> {
    pub fn respond(self, reply: R) {
        if self.tx.send(reply).is_err() {
            debug!("Requester for {} went away before the reply", self.id);
        }
    }
}

/// A request in flight: payload, sender identity and reply handle.
#[derive(Debug)]
pub struct Envelope<M, R> {
    pub id: Uuid,
    pub sender: MessageSender,
    pub message: M,
    pub responder: Responder<R>,
}

/// Receiving side of a context.
pub type Inbox<M, R> = mpsc::UnboundedReceiver<Envelope<M, R>>;

/// Cloneable sending side of a context.
#[derive(Debug)]
pub struct Port<M, R> {
    tx: mpsc::UnboundedSender<Envelope<M, R>>,
    sender: MessageSender,
    timeout: Duration,
}

impl<M, R> Clone for Port<M, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            sender: self.sender.clone(),
            timeout: self.timeout,
        }
    }
}

/// Create a context's inbox and its first port.
pub fn channel<M, R>(timeout: Duration) -> (Port<M, R>, Inbox<M, R>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let port = Port {
        tx,
        sender: MessageSender::extension(),
        timeout,
    };
    (port, rx)
}

impl<M, R> Port<M, R> {
    /// A port that stamps its requests with `sender`.
    pub fn with_sender(&self, sender: MessageSender) -> Self {
        Self {
            sender,
            ..self.clone()
        }
    }

    pub fn sender(&self) -> &MessageSender {
        &self.sender
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the destination context has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both ports lead to the same context.
    pub fn same_destination(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Enqueue a message without waiting for the reply.
    pub fn send(&self, message: M) -> Result<PendingReply<R>, Unreachable> {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let envelope = Envelope {
            id,
            sender: self.sender.clone(),
            message,
            responder: Responder { id, tx },
        };

        self.tx.send(envelope).map_err(|_| Unreachable::Closed)?;
        trace!("Enqueued request {}", id);

        Ok(PendingReply {
            id,
            rx,
            timeout: self.timeout,
        })
    }

    /// Send and wait for the reply.
    pub async fn request(&self, message: M) -> Result<R, Unreachable> {
        self.send(message)?.wait().await
    }
}

/// A reply that has not arrived yet.
#[derive(Debug)]
pub struct PendingReply<R> {
    id: Uuid,
    rx: oneshot::Receiver<R>,
    timeout: Duration,
}

impl<R> PendingReply<R> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(self) -> Result<R, Unreachable> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Unreachable::NoListener),
            Err(_) => Err(Unreachable::TimedOut(self.timeout)),
        }
    }

    /// Wait for the acknowledgement only.
    pub async fn delivered(self) -> PushOutcome {
        self.wait().await.map(|_| Delivered)
    }
}
