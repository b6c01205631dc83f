// ── Sign status streams ──
//
// Read side of the registry for dashboards and the binary: a snapshot of
// every sign plus change notification, without touching registry locks.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{Sign, SignId, SignStatus, ZoneId};

type Snapshot = Arc<Vec<Arc<Sign>>>;

/// A subscription to every sign's status record.
pub struct SignStream {
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl SignStream {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot as of creation or the last [`changed`](Self::changed).
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn get(&self, id: &SignId) -> Option<&Arc<Sign>> {
        self.current.iter().find(|s| s.id == *id)
    }

    pub fn in_zone<'a>(&'a self, zone: &'a ZoneId) -> impl Iterator<Item = &'a Arc<Sign>> + 'a {
        self.current.iter().filter(move |s| s.zone == *zone)
    }

    /// Signs per reported status, in `connecting, online, warning,
    /// offline` order.
    pub fn tally(&self) -> [usize; 4] {
        let mut counts = [0; 4];
        for sign in self.current.iter() {
            let slot = match sign.status() {
                SignStatus::Connecting => 0,
                SignStatus::Online => 1,
                SignStatus::Warning => 2,
                SignStatus::Offline => 3,
            };
            if let Some(count) = counts.get_mut(slot) {
                *count += 1;
            }
        }
        counts
    }

    /// Wait for the next registry change. Returns `None` once the
    /// registry has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        self.current = self.receiver.borrow_and_update().clone();
        Some(Arc::clone(&self.current))
    }

    /// Every snapshot from now on, starting with the current one.
    pub fn into_stream(self) -> WatchStream<Snapshot> {
        WatchStream::new(self.receiver)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio_test::{assert_pending, assert_ready, task};

    fn sign(id: &str, zone: &str) -> Arc<Sign> {
        Arc::new(Sign::new(id.into(), zone.into(), None, Utc::now()))
    }

    #[test]
    fn changed_waits_for_a_publish() {
        let (tx, rx) = watch::channel(Arc::new(vec![sign("s1", "A")]));
        let mut stream = SignStream::new(rx);
        assert!(stream.get(&"s1".into()).is_some());

        {
            let mut next = task::spawn(stream.changed());
            assert_pending!(next.poll());

            tx.send_replace(Arc::new(vec![sign("s1", "A"), sign("s2", "B")]));
            assert!(next.is_woken());
            let snap = assert_ready!(next.poll()).unwrap();
            assert_eq!(snap.len(), 2);
        }

        assert_eq!(stream.in_zone(&"B".into()).count(), 1);
        // New records start offline until a session opens
        assert_eq!(stream.tally(), [0, 0, 0, 2]);

        drop(tx);
        let mut closed = task::spawn(stream.changed());
        assert!(assert_ready!(closed.poll()).is_none());
    }
}
