// ── Connection sessions ──
//
// One sign's duplex channel as the hub sees it. The socket task owns the
// `SessionOutbox` and writes whatever arrives there to the wire; the
// registry owns the `SessionHandle`. Dropping the handle drains and then
// closes the outbox, which tells the socket task to hang up.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use cityarray_proto::SignCommand;
use tokio::sync::mpsc;

use crate::error::CoreError;
use crate::model::SignId;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Distinguishes successive sessions of the same sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sending half of a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    sign_id: SignId,
    tx: mpsc::UnboundedSender<SignCommand>,
}

/// Receiving half of a session, held by the socket task.
#[derive(Debug)]
pub struct SessionOutbox {
    id: SessionId,
    rx: mpsc::UnboundedReceiver<SignCommand>,
}

impl SessionHandle {
    /// Create a fresh session pair for `sign_id`.
    pub fn open(sign_id: SignId) -> (Self, SessionOutbox) {
        let id = SessionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, sign_id, tx }, SessionOutbox { id, rx })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn sign_id(&self) -> &SignId {
        &self.sign_id
    }

    /// Queue a command for the wire. Returns immediately; fails with
    /// [`CoreError::SessionClosed`] once the socket side is gone.
    pub fn send(&self, command: SignCommand) -> Result<(), CoreError> {
        self.tx.send(command).map_err(|_| CoreError::SessionClosed {
            sign_id: self.sign_id.clone(),
        })
    }
}

impl SessionOutbox {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next command to write. `None` once the hub has dropped the session.
    pub async fn recv(&mut self) -> Option<SignCommand> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<SignCommand> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<SignCommand> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn send_reaches_outbox_in_order() {
        let (handle, mut outbox) = SessionHandle::open("s1".into());
        assert_eq!(handle.id(), outbox.id());

        handle.send(SignCommand::Ping).unwrap();
        handle.send(SignCommand::RequestStatus).unwrap();
        assert_eq!(
            outbox.drain(),
            vec![SignCommand::Ping, SignCommand::RequestStatus]
        );
        assert!(outbox.try_recv().is_none());
    }

    #[test]
    fn send_fails_after_outbox_dropped() {
        let (handle, outbox) = SessionHandle::open("s1".into());
        drop(outbox);
        assert!(matches!(
            handle.send(SignCommand::Ping),
            Err(CoreError::SessionClosed { .. })
        ));
    }

    #[test]
    fn session_ids_are_distinct() {
        let (a, _oa) = SessionHandle::open("s1".into());
        let (b, _ob) = SessionHandle::open("s1".into());
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn outbox_ends_when_handle_dropped() {
        let (handle, mut outbox) = SessionHandle::open("s1".into());
        handle.send(SignCommand::Ping).unwrap();
        drop(handle);
        assert_eq!(outbox.recv().await, Some(SignCommand::Ping));
        assert_eq!(outbox.recv().await, None);
    }
}
