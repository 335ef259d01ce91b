use std::{
    pin::Pin,
    sync::Weak,
    task::{Context, Poll},
};

use futures_util::Stream;
use shared::models::Frame;
use tokio::sync::mpsc;

use super::session::Session;

/// One item delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Text starting at `Frame::offset`, trimmed to the subscription's start.
    Frame(Frame),
    /// Always the last delivery.
    Terminated {
        /// Final length of the session.
        offset: usize,
    },
}

/// A reader attached to one session.
///
/// Backlog frames are queued at attach time; live frames and the termination
/// notice follow. Dropping the subscription detaches it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    session: Weak<Session>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        receiver: mpsc::UnboundedReceiver<Delivery>,
        session: Weak<Session>,
    ) -> Self {
        Self {
            id,
            receiver,
            session,
        }
    }

    /// Identifier of this reader within its session.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next delivery. `None` once the termination notice has
    /// been consumed, or when the session was dropped without completing.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Returns a delivery that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Detaches from the session. Safe to call at any point, including after
    /// termination.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.detach(self.id);
        }
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
