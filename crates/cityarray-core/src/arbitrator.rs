// ── Override arbitrator ──
//
// Decides, per sign, whether scheduled content or an operator override
// owns the display. Each sign has one slot holding every active override
// that reaches it plus the latest normal content; the slot's winner is
// the only thing ever handed to the delivery channel for that sign.
//
// Precedence: Emergency over everything, then role rank, then the most
// recently issued. Losing overrides stay in the slot and regain the sign
// if they are still active when the winner ends.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cityarray_proto::SignCommand;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::collaborators::{Alerting, Persistence};
use crate::config::HubConfig;
use crate::delivery::DeliveryChannel;
use crate::display::{Decision, DecisionSource, DisplayDecider};
use crate::error::CoreError;
use crate::event::DashboardEvent;
use crate::model::message::after;
use crate::model::{
    ArbiterState, Message, MessageId, MessageSource, Override, OverrideId, OverrideMode,
    OverrideRequest, Priority, Sign, SignId, Targets,
};
use crate::store::SignRegistry;

/// Default priority of a non-emergency override.
const OVERRIDE_PRIORITY: u8 = 80;

/// One sign's display slot.
#[derive(Debug, Default)]
struct SignSlot {
    /// Active overrides that reach this sign.
    contenders: Vec<Arc<Override>>,
    /// Latest normal content (schedule output or a direct message).
    normal: Option<Arc<Message>>,
    /// What was last handed to the delivery channel.
    showing: Option<Arc<Message>>,
    /// Cancellations the sign missed while it had no session.
    missed_cancels: Vec<(OverrideId, MessageId)>,
}

impl SignSlot {
    fn winner(&self) -> Option<&Arc<Override>> {
        self.contenders.iter().max_by_key(|o| o.precedence())
    }

    fn is_winning(&self, id: OverrideId) -> bool {
        self.winner().is_some_and(|w| w.id == id)
    }

    /// What the sign should be showing given the current contenders.
    fn pick(&self) -> Option<Arc<Message>> {
        match self.winner() {
            Some(ov) => self
                .showing
                .clone()
                .filter(|m| m.override_id() == Some(ov.id))
                .or_else(|| Some(Arc::new(ov.message.clone()))),
            None => self.normal.clone(),
        }
    }
}

pub struct Arbitrator {
    slots: DashMap<SignId, SignSlot>,
    overrides: DashMap<OverrideId, Arc<Override>>,
    seq: AtomicU64,
    registry: Arc<SignRegistry>,
    delivery: Arc<DeliveryChannel>,
    alerting: Arc<dyn Alerting>,
    persistence: Arc<dyn Persistence>,
    events: broadcast::Sender<Arc<DashboardEvent>>,
    default_insert: Duration,
}

impl Arbitrator {
    pub fn new(
        registry: Arc<SignRegistry>,
        delivery: Arc<DeliveryChannel>,
        alerting: Arc<dyn Alerting>,
        persistence: Arc<dyn Persistence>,
        events: broadcast::Sender<Arc<DashboardEvent>>,
        config: &HubConfig,
    ) -> Self {
        Self {
            slots: DashMap::new(),
            overrides: DashMap::new(),
            seq: AtomicU64::new(0),
            registry,
            delivery,
            alerting,
            persistence,
            events,
            default_insert: config.default_insert_duration,
        }
    }

    // ── Overrides ────────────────────────────────────────────────────

    /// Admit an override and put it on every sign where it wins.
    pub fn issue(
        &self,
        request: OverrideRequest,
        now: DateTime<Utc>,
    ) -> Result<Arc<Override>, CoreError> {
        let ov = Arc::new(self.admit(request, now)?);
        self.overrides.insert(ov.id, Arc::clone(&ov));
        self.persistence.record_message(&ov.message);

        let mut signs = Vec::new();
        for sign in self.registry.snapshot().iter() {
            if !ov.applies_to(&sign.id, &sign.zone) {
                continue;
            }
            let mut slot = self.slots.entry(sign.id.clone()).or_default();
            if !slot.contenders.iter().any(|c| c.id == ov.id) {
                slot.contenders.push(Arc::clone(&ov));
            }
            if slot.is_winning(ov.id) {
                self.show(&sign.id, &mut slot, Arc::new(ov.message.clone()), now);
                signs.push(sign.id.clone());
            } else {
                debug!(sign_id = %sign.id, override_id = %ov.id, "override outranked on sign");
            }
        }

        if ov.mode == OverrideMode::Emergency {
            warn!(override_id = %ov.id, role = ov.role.name(), signs = signs.len(), "emergency override issued");
            self.alerting.emergency_override(&ov);
        } else {
            info!(override_id = %ov.id, mode = %ov.mode, role = ov.role.name(), signs = signs.len(), "override issued");
        }

        self.emit(DashboardEvent::OverrideActivated {
            override_id: ov.id,
            mode: ov.mode,
            role: ov.role.name().to_owned(),
            content: ov.message.content.clone(),
            signs,
        });
        Ok(ov)
    }

    /// Withdraw an override. Cancelling an unknown or already-ended
    /// override does nothing and returns `false`.
    pub fn cancel(&self, id: OverrideId, now: DateTime<Utc>) -> bool {
        let Some((_, ov)) = self.overrides.remove(&id) else {
            debug!(override_id = %id, "cancel of inactive override ignored");
            return false;
        };
        let signs = self.withdraw(&ov, now);
        info!(override_id = %id, signs = signs.len(), "override cancelled");
        self.emit(DashboardEvent::OverrideCancelled {
            override_id: id,
            signs,
        });
        true
    }

    /// End every override whose duration has run out.
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<OverrideId> {
        let due: Vec<OverrideId> = self
            .overrides
            .iter()
            .filter(|o| o.is_expired(now))
            .map(|o| o.id)
            .collect();

        let mut expired = Vec::new();
        for id in due {
            let Some((_, ov)) = self.overrides.remove(&id) else {
                continue;
            };
            let signs = self.withdraw(&ov, now);
            debug!(override_id = %id, signs = signs.len(), "override expired");
            self.emit(DashboardEvent::OverrideExpired {
                override_id: id,
                signs,
            });
            expired.push(id);
        }
        expired
    }

    pub fn get(&self, id: OverrideId) -> Option<Arc<Override>> {
        self.overrides.get(&id).map(|o| Arc::clone(o.value()))
    }

    /// Active overrides, oldest first.
    pub fn active(&self) -> Vec<Arc<Override>> {
        let mut out: Vec<_> = self.overrides.iter().map(|o| Arc::clone(o.value())).collect();
        out.sort_by_key(|o| o.seq);
        out
    }

    // ── Normal content ───────────────────────────────────────────────

    /// Offer normal content to a sign. It is delivered now unless an
    /// override holds the sign, in which case it waits in the slot.
    pub fn offer(&self, sign: &SignId, message: Arc<Message>, now: DateTime<Utc>) -> bool {
        let mut slot = self.slots.entry(sign.clone()).or_default();
        slot.normal = Some(Arc::clone(&message));
        if let Some(winner) = slot.winner() {
            debug!(sign_id = %sign, override_id = %winner.id, "normal content held back");
            return false;
        }
        self.show(sign, &mut slot, message, now);
        true
    }

    // ── Sign attachment ──────────────────────────────────────────────

    /// Enter active overrides into the slot of a sign that just
    /// connected. Covers signs registered after an override was issued.
    /// `normal` seeds the slot's normal content if it has none yet.
    pub fn attach(&self, sign: &Sign, normal: Option<Arc<Message>>) {
        let mut slot = self.slots.entry(sign.id.clone()).or_default();
        if slot.normal.is_none() {
            slot.normal = normal;
        }
        for ov in self.overrides.iter() {
            if ov.applies_to(&sign.id, &sign.zone) && !slot.contenders.iter().any(|c| c.id == ov.id)
            {
                slot.contenders.push(Arc::clone(ov.value()));
            }
        }
    }

    /// Re-deliver whatever the sign should be showing. Used when a sign
    /// reconnects with nothing queued, so the server's view wins.
    pub fn resume(&self, sign: &SignId, now: DateTime<Utc>) -> bool {
        let mut slot = self.slots.entry(sign.clone()).or_default();

        if !slot.missed_cancels.is_empty() {
            if let Some(session) = self.registry.session(sign) {
                for (override_id, message_id) in std::mem::take(&mut slot.missed_cancels) {
                    let _ = session.send(cancel_command(override_id, message_id));
                }
            }
        }

        let Some(mut desired) = slot.pick() else {
            return false;
        };
        // Normal content whose display duration ran out while the sign was
        // away goes out again under a fresh id, or the sweep would expire
        // it straight after delivery.
        if desired.override_id().is_none() && desired.expires_at().is_some_and(|at| at <= now) {
            let fresh = Arc::new(desired.reissue(now));
            slot.normal = Some(Arc::clone(&fresh));
            desired = fresh;
        }
        self.show(sign, &mut slot, desired, now);
        true
    }

    /// Arbitration state of one sign.
    pub fn state(&self, sign: &SignId) -> ArbiterState {
        self.slots
            .get(sign)
            .and_then(|slot| slot.winner().map(|w| ArbiterState::from(w.mode)))
            .unwrap_or(ArbiterState::Normal)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn admit(&self, request: OverrideRequest, now: DateTime<Utc>) -> Result<Override, CoreError> {
        let OverrideRequest {
            role,
            mode,
            content,
            targets,
            duration,
            priority,
        } = request;

        if content.trim().is_empty() {
            return Err(CoreError::invalid("override content is empty"));
        }
        let emergency = mode == OverrideMode::Emergency;
        if !emergency && targets.is_empty() {
            return Err(CoreError::invalid("override targets no signs or zones"));
        }

        let priority = if emergency {
            priority
                .unwrap_or(Priority::MAX)
                .max(Priority::EMERGENCY_FLOOR)
        } else {
            match priority {
                Some(p) => p,
                None => Priority::new(OVERRIDE_PRIORITY)?,
            }
        };
        let duration = match mode {
            OverrideMode::Insert => Some(duration.unwrap_or(self.default_insert)),
            OverrideMode::Replace | OverrideMode::Emergency => duration,
        };
        let targets = if emergency { Targets::All } else { targets };

        let id = OverrideId::new();
        Ok(Override {
            id,
            role,
            mode,
            targets: targets.clone(),
            message: Message {
                id: MessageId::new(),
                content,
                priority,
                targets,
                duration,
                template_id: None,
                source: MessageSource::Override { id, mode },
                issued_at: now,
            },
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            issued_at: now,
            expires_at: duration.and_then(|d| after(now, d)),
        })
    }

    /// Remove `ov` from every slot. Where it was winning, tell the sign,
    /// drop its undelivered copy and put the next content up. Returns
    /// the signs it was showing on.
    fn withdraw(&self, ov: &Override, now: DateTime<Utc>) -> Vec<SignId> {
        let mut affected = Vec::new();
        for mut entry in self.slots.iter_mut() {
            let sign = entry.key().clone();
            let slot = entry.value_mut();
            let Some(pos) = slot.contenders.iter().position(|c| c.id == ov.id) else {
                continue;
            };
            let was_winning = slot.is_winning(ov.id);
            slot.contenders.remove(pos);
            if !was_winning {
                continue;
            }

            let shown_id = slot
                .showing
                .as_ref()
                .filter(|m| m.override_id() == Some(ov.id))
                .map_or(ov.message.id, |m| m.id);
            self.delivery.cancel(&sign, shown_id, now);

            let sent = self
                .registry
                .session(&sign)
                .is_some_and(|s| s.send(cancel_command(ov.id, shown_id)).is_ok());
            if !sent {
                slot.missed_cancels.push((ov.id, shown_id));
            }

            // Content regaining the sign goes out under a fresh id so the
            // sign does not take it for a repeat.
            let next = match slot.winner() {
                Some(w) => Some(Arc::new(w.message.reissue(now))),
                None => slot.normal.as_ref().map(|m| Arc::new(m.reissue(now))),
            };
            if let Some(next) = next {
                if next.override_id().is_none() {
                    slot.normal = Some(Arc::clone(&next));
                }
                self.show(&sign, slot, next, now);
            } else {
                slot.showing = None;
            }
            affected.push(sign);
        }
        affected
    }

    fn show(&self, sign: &SignId, slot: &mut SignSlot, message: Arc<Message>, now: DateTime<Utc>) {
        slot.showing = Some(Arc::clone(&message));
        let state = self.delivery.deliver(sign, message, now);
        debug!(sign_id = %sign, %state, "display slot updated");
    }

    fn emit(&self, event: DashboardEvent) {
        let _ = self.events.send(Arc::new(event));
    }
}

fn cancel_command(override_id: OverrideId, message_id: MessageId) -> SignCommand {
    SignCommand::OverrideCancelled {
        override_id: override_id.to_string(),
        message_id: message_id.to_string(),
    }
}

impl DisplayDecider for Arbitrator {
    fn decide(&self, sign: &SignId, _now: DateTime<Utc>) -> Option<Decision> {
        let slot = self.slots.get(sign)?;
        let message = slot.showing.as_ref()?;
        let source = match &message.source {
            MessageSource::Schedule { .. } => DecisionSource::Schedule,
            MessageSource::Override { mode, .. } => DecisionSource::Override { mode: *mode },
            MessageSource::Direct => DecisionSource::Operator,
        };
        Some(Decision {
            message_id: Some(message.id),
            content: message.content.clone(),
            priority: message.priority,
            source,
        })
    }
}
