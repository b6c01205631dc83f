// ── Message delivery channel ──
//
// Ordered, acknowledged delivery of messages to signs. Every (sign,
// message) pair gets its own record that moves through
// queued → sent → acknowledged, or ends expired. Signs are independent:
// one sign's retries, queue and expiry never touch another's.
//
// A sign holds at most one outstanding record. Delivering newer content
// expires the older record as superseded, so a reconnecting sign is
// handed only what is current.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::HubConfig;
use crate::convert::command_for;
use crate::error::CoreError;
use crate::event::DashboardEvent;
use crate::model::message::after;
use crate::model::{ExpiryReason, Lifecycle, Message, MessageId, SignId};
use crate::store::SignRegistry;

/// One message's delivery state on one sign.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub message: Arc<Message>,
    pub state: Lifecycle,
    /// Times the message has been written to the sign's session.
    pub attempts: u32,
    pub ack_deadline: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub reason: Option<ExpiryReason>,
}

impl DeliveryRecord {
    fn new(message: Arc<Message>, now: DateTime<Utc>) -> Self {
        let expires_at = message.expires_at();
        Self {
            message,
            state: Lifecycle::Queued,
            attempts: 0,
            ack_deadline: None,
            expires_at,
            updated_at: now,
            reason: None,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message.id
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub retried: usize,
    pub queued: usize,
    pub expired: usize,
    pub purged: usize,
}

/// Pending-ack bookkeeping applied to the registry after record locks
/// are released.
enum PendingChange {
    Add(SignId, MessageId),
    Remove(SignId, MessageId),
    Displayed(SignId, MessageId),
}

pub struct DeliveryChannel {
    records: DashMap<SignId, Vec<DeliveryRecord>>,
    registry: Arc<SignRegistry>,
    events: broadcast::Sender<Arc<DashboardEvent>>,
    ack_timeout: Duration,
    max_retries: u32,
    retention: Duration,
}

impl DeliveryChannel {
    pub fn new(
        registry: Arc<SignRegistry>,
        events: broadcast::Sender<Arc<DashboardEvent>>,
        config: &HubConfig,
    ) -> Self {
        Self {
            records: DashMap::new(),
            registry,
            events,
            ack_timeout: config.ack_timeout,
            max_retries: config.max_retries,
            retention: config.record_retention,
        }
    }

    // ── Delivery ─────────────────────────────────────────────────────

    /// Deliver `message` to one sign. Sends immediately if the sign has
    /// a session, otherwise queues for reconnection. Returns the record's
    /// resulting state.
    ///
    /// Delivering a message the sign already acknowledged re-sends it
    /// without reopening the record.
    pub fn deliver(&self, sign: &SignId, message: Arc<Message>, now: DateTime<Utc>) -> Lifecycle {
        let mut changes = Vec::new();
        let state = {
            let mut entry = self.records.entry(sign.clone()).or_default();
            let records = entry.value_mut();

            if let Some(pos) = records.iter().position(|r| r.message.id == message.id) {
                match records[pos].state {
                    Lifecycle::Acknowledged => {
                        if let Some(session) = self.registry.session(sign) {
                            let _ = session.send(command_for(&message));
                        }
                        return Lifecycle::Acknowledged;
                    }
                    state @ (Lifecycle::Queued | Lifecycle::Sent) => return state,
                    Lifecycle::Expired => {
                        records.remove(pos);
                    }
                }
            }

            for record in records.iter_mut().filter(|r| !r.state.is_terminal()) {
                self.expire(sign, record, ExpiryReason::Superseded, now, &mut changes);
            }

            let mut record = DeliveryRecord::new(message, now);
            if self.transmit(sign, &mut record, now) {
                changes.push(PendingChange::Add(sign.clone(), record.message_id()));
            }
            let state = record.state;
            records.push(record);
            state
        };
        self.apply(changes);
        state
    }

    /// Record an ack. Returns `false` for unknown messages and for acks
    /// of records that already finished, which are ignored.
    pub fn acknowledge(&self, sign: &SignId, message_id: MessageId, now: DateTime<Utc>) -> bool {
        {
            let Some(mut entry) = self.records.get_mut(sign) else {
                debug!(sign_id = %sign, %message_id, "ack for sign with no deliveries");
                return false;
            };
            let Some(record) = entry.iter_mut().find(|r| r.message.id == message_id) else {
                debug!(sign_id = %sign, %message_id, "ack for unknown message");
                return false;
            };
            if record.state.is_terminal() {
                debug!(sign_id = %sign, %message_id, state = %record.state, "ignoring repeated ack");
                return false;
            }

            record.state = Lifecycle::Acknowledged;
            record.ack_deadline = None;
            record.updated_at = now;
        }

        self.emit(DashboardEvent::MessageAck {
            sign_id: sign.clone(),
            message_id,
        });
        self.apply(vec![PendingChange::Displayed(sign.clone(), message_id)]);
        true
    }

    /// Send everything queued for a sign that just came back. Each
    /// flushed record gets a fresh retry budget.
    pub fn flush(&self, sign: &SignId, now: DateTime<Utc>) -> usize {
        let mut changes = Vec::new();
        let mut sent = 0;
        if let Some(mut entry) = self.records.get_mut(sign) {
            for record in entry
                .iter_mut()
                .filter(|r| r.state == Lifecycle::Queued)
            {
                record.attempts = 0;
                if self.transmit(sign, record, now) {
                    changes.push(PendingChange::Add(sign.clone(), record.message_id()));
                    sent += 1;
                }
            }
        }
        self.apply(changes);
        sent
    }

    /// Move a sign's in-flight records back to the queue after its
    /// session went away.
    pub fn requeue(&self, sign: &SignId, now: DateTime<Utc>) -> usize {
        let Some(mut entry) = self.records.get_mut(sign) else {
            return 0;
        };
        let mut moved = 0;
        for record in entry.iter_mut().filter(|r| r.state == Lifecycle::Sent) {
            record.state = Lifecycle::Queued;
            record.ack_deadline = None;
            record.updated_at = now;
            moved += 1;
        }
        moved
    }

    /// Expire a message's outstanding record on one sign because its
    /// override ended.
    pub fn cancel(&self, sign: &SignId, message_id: MessageId, now: DateTime<Utc>) -> bool {
        let mut changes = Vec::new();
        let cancelled = self.records.get_mut(sign).is_some_and(|mut entry| {
            match entry
                .iter_mut()
                .find(|r| r.message.id == message_id && !r.state.is_terminal())
            {
                Some(record) => {
                    self.expire(sign, record, ExpiryReason::Cancelled, now, &mut changes);
                    true
                }
                None => false,
            }
        });
        self.apply(changes);
        cancelled
    }

    // ── Periodic sweep ───────────────────────────────────────────────

    /// Expire, retry, re-queue and purge records as of `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut changes = Vec::new();

        for mut entry in self.records.iter_mut() {
            let sign = entry.key().clone();
            let records = entry.value_mut();

            for record in records.iter_mut() {
                if record.state.is_terminal() {
                    continue;
                }

                if record.expires_at.is_some_and(|at| at <= now) {
                    let err = CoreError::DeliveryExpired {
                        sign_id: sign.clone(),
                        message_id: record.message_id().to_string(),
                    };
                    warn!(error = %err, "delivery expired");
                    self.expire(&sign, record, ExpiryReason::DurationElapsed, now, &mut changes);
                    report.expired += 1;
                    continue;
                }

                if record.state != Lifecycle::Sent
                    || record.ack_deadline.is_none_or(|deadline| deadline > now)
                {
                    continue;
                }

                let err = CoreError::AckTimeout {
                    sign_id: sign.clone(),
                    message_id: record.message_id().to_string(),
                };
                debug!(error = %err, attempts = record.attempts, "ack deadline passed");
                if record.attempts <= self.max_retries && self.transmit(&sign, record, now) {
                    report.retried += 1;
                } else {
                    record.state = Lifecycle::Queued;
                    record.ack_deadline = None;
                    record.updated_at = now;
                    report.queued += 1;
                }
            }

            let before = records.len();
            let retention = self.retention;
            records.retain(|r| {
                !r.state.is_terminal() || after(r.updated_at, retention).is_none_or(|t| t > now)
            });
            report.purged += before - records.len();
        }

        self.apply(changes);
        report
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Every retained record for a sign, oldest first.
    pub fn records(&self, sign: &SignId) -> Vec<DeliveryRecord> {
        self.records
            .get(sign)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn state_of(&self, sign: &SignId, message_id: MessageId) -> Option<Lifecycle> {
        self.records.get(sign).and_then(|r| {
            r.iter()
                .rev()
                .find(|rec| rec.message.id == message_id)
                .map(|rec| rec.state)
        })
    }

    /// The sign's queued or in-flight record, if any.
    pub fn outstanding(&self, sign: &SignId) -> Option<DeliveryRecord> {
        self.records
            .get(sign)
            .and_then(|r| r.iter().find(|rec| !rec.state.is_terminal()).cloned())
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Write the record's command to the sign's session. On success the
    /// record is `Sent` with a fresh ack deadline; otherwise it is queued.
    fn transmit(&self, sign: &SignId, record: &mut DeliveryRecord, now: DateTime<Utc>) -> bool {
        record.updated_at = now;
        let sent = match self.registry.session(sign) {
            Some(session) => match session.send(command_for(&record.message)) {
                Ok(()) => true,
                Err(e) => {
                    debug!(sign_id = %sign, error = %e, "session gone, queueing");
                    false
                }
            },
            None => false,
        };

        if sent {
            record.state = Lifecycle::Sent;
            record.attempts += 1;
            record.ack_deadline = after(now, self.ack_timeout);
            self.emit(DashboardEvent::MessageSent {
                sign_id: sign.clone(),
                message_id: record.message_id(),
                attempt: record.attempts,
            });
        } else {
            record.state = Lifecycle::Queued;
            record.ack_deadline = None;
        }
        sent
    }

    fn expire(
        &self,
        sign: &SignId,
        record: &mut DeliveryRecord,
        reason: ExpiryReason,
        now: DateTime<Utc>,
        changes: &mut Vec<PendingChange>,
    ) {
        record.state = Lifecycle::Expired;
        record.reason = Some(reason);
        record.ack_deadline = None;
        record.updated_at = now;
        changes.push(PendingChange::Remove(sign.clone(), record.message_id()));
        self.emit(DashboardEvent::MessageExpired {
            sign_id: sign.clone(),
            message_id: record.message_id(),
            reason,
        });
    }

    fn apply(&self, changes: Vec<PendingChange>) {
        for change in changes {
            match change {
                PendingChange::Add(sign, id) => {
                    self.registry.update(&sign, |s| {
                        s.pending_acks.insert(id);
                    });
                }
                PendingChange::Remove(sign, id) => {
                    self.registry.update(&sign, |s| {
                        s.pending_acks.remove(&id);
                    });
                }
                PendingChange::Displayed(sign, id) => {
                    self.registry.update(&sign, |s| {
                        s.pending_acks.remove(&id);
                        s.current_message = Some(id);
                    });
                }
            }
        }
    }

    fn emit(&self, event: DashboardEvent) {
        // No receivers is fine: nobody is watching the dashboard.
        let _ = self.events.send(Arc::new(event));
    }
}
