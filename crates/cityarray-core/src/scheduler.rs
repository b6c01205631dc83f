// ── Priority scheduler ──
//
// Time-driven: on every tick, picks the single schedule entry that
// should be active in each zone and hands newly active content to the
// arbitrator for every sign in the zone. The schedule itself lives in an
// `ArcSwap` so ticks read a consistent snapshot without blocking edits.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, FixedOffset, Utc};
use cityarray_proto::wire::{CachePayload, SchedulePayload, TemplatePayload, WindowPayload};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::arbitrator::Arbitrator;
use crate::collaborators::Collaborators;
use crate::error::CoreError;
use crate::model::message::after;
use crate::model::{
    Blackout, Message, MessageId, MessageSource, ScheduleEntry, ScheduleId, Targets, ZoneId,
    select_active,
};
use crate::store::SignRegistry;

/// Everything the scheduler evaluates, swapped as a unit.
#[derive(Debug, Clone, Default)]
struct ScheduleBook {
    entries: BTreeMap<ScheduleId, ScheduleEntry>,
    blackouts: Vec<Blackout>,
}

/// Per-zone memory between ticks.
#[derive(Debug, Default)]
struct ZoneState {
    active: Option<ScheduleId>,
    last_emit: Option<DateTime<Utc>>,
    message: Option<Arc<Message>>,
}

/// One emission made by a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub zone: ZoneId,
    pub entry: ScheduleId,
    pub message_id: MessageId,
    /// Signs the message was delivered to right away. The rest are held
    /// by an override.
    pub delivered: usize,
}

pub struct Scheduler {
    book: ArcSwap<ScheduleBook>,
    zones: DashMap<ZoneId, ZoneState>,
    registry: Arc<SignRegistry>,
    arbitrator: Arc<Arbitrator>,
    collaborators: Collaborators,
    offset: FixedOffset,
}

impl Scheduler {
    pub fn new(
        registry: Arc<SignRegistry>,
        arbitrator: Arc<Arbitrator>,
        collaborators: Collaborators,
        offset: FixedOffset,
    ) -> Self {
        Self {
            book: ArcSwap::from_pointee(ScheduleBook::default()),
            zones: DashMap::new(),
            registry,
            arbitrator,
            collaborators,
            offset,
        }
    }

    // ── Schedule edits ───────────────────────────────────────────────

    /// Add or replace an entry. Invalid entries are rejected.
    pub fn upsert(&self, entry: ScheduleEntry) -> Result<(), CoreError> {
        entry.validate()?;
        self.collaborators.persistence.record_schedule(&entry);
        info!(entry = %entry.id, template = %entry.template_id, priority = entry.priority.value(), "schedule entry saved");
        self.book.rcu(|book| {
            let mut next = ScheduleBook::clone(book);
            next.entries.insert(entry.id.clone(), entry.clone());
            next
        });
        Ok(())
    }

    pub fn remove(&self, id: &ScheduleId) -> Result<ScheduleEntry, CoreError> {
        let removed = self
            .book
            .load()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ScheduleNotFound {
                schedule_id: id.clone(),
            })?;
        self.book.rcu(|book| {
            let mut next = ScheduleBook::clone(book);
            next.entries.remove(id);
            next
        });
        info!(entry = %id, "schedule entry removed");
        Ok(removed)
    }

    pub fn set_blackouts(&self, blackouts: Vec<Blackout>) {
        debug!(count = blackouts.len(), "blackouts replaced");
        self.book.rcu(|book| ScheduleBook {
            entries: book.entries.clone(),
            blackouts: blackouts.clone(),
        });
    }

    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.book.load().entries.values().cloned().collect()
    }

    pub fn blackouts(&self) -> Vec<Blackout> {
        self.book.load().blackouts.clone()
    }

    // ── Evaluation ───────────────────────────────────────────────────

    /// Evaluate every zone that has signs as of `now`. A zone emits when
    /// its active entry changes, or when the entry's rotation period has
    /// passed. A zone with nothing active keeps its last content.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<Emission> {
        let local = now.with_timezone(&self.offset).naive_local();
        let book = self.book.load();
        let mut emissions = Vec::new();

        for zone in self.registry.zones() {
            let active = select_active(book.entries.values(), &book.blackouts, &zone, local);

            let (entry, message) = {
                let mut state = self.zones.entry(zone.clone()).or_default();
                let Some(entry) = active else {
                    if let Some(previous) = state.active.take() {
                        debug!(%zone, entry = %previous, "no entry active, keeping last content");
                    }
                    continue;
                };

                let changed = state.active.as_ref() != Some(&entry.id);
                let rotation_due = entry.frequency.is_some_and(|period| {
                    state
                        .last_emit
                        .and_then(|t| after(t, period))
                        .is_none_or(|next| next <= now)
                });
                if !changed && !rotation_due {
                    continue;
                }

                state.active = Some(entry.id.clone());
                state.last_emit = Some(now);
                match self.render(entry, &zone, now) {
                    Ok(message) => {
                        state.message = Some(Arc::clone(&message));
                        (entry.id.clone(), message)
                    }
                    Err(e) => {
                        warn!(%zone, entry = %entry.id, error = %e, "could not render schedule entry");
                        continue;
                    }
                }
            };

            self.collaborators.persistence.record_message(&message);
            let delivered = self
                .registry
                .signs_in_zone(&zone)
                .iter()
                .filter(|sign| self.arbitrator.offer(&sign.id, Arc::clone(&message), now))
                .count();

            debug!(%zone, %entry, delivered, "schedule content emitted");
            emissions.push(Emission {
                zone,
                entry,
                message_id: message.id,
                delivered,
            });
        }
        emissions
    }

    /// The last content emitted for `zone`.
    pub fn current(&self, zone: &ZoneId) -> Option<Arc<Message>> {
        self.zones.get(zone).and_then(|s| s.message.clone())
    }

    /// Templates, entries and bindings a sign in `zone` needs to keep
    /// its schedule running while offline. Zone blackouts are folded
    /// into each entry.
    pub fn cache_for(&self, zone: &ZoneId) -> CachePayload {
        let book = self.book.load();
        let zone_blackouts: Vec<WindowPayload> = book
            .blackouts
            .iter()
            .filter(|b| b.zones.applies_to(zone))
            .map(|b| WindowPayload::from(&b.window))
            .collect();

        let mut templates = BTreeMap::new();
        let mut schedule = Vec::new();
        for entry in book
            .entries
            .values()
            .filter(|e| e.enabled && e.zones.applies_to(zone))
        {
            if let Some(body) = self.collaborators.renderer.body(&entry.template_id) {
                templates.insert(entry.template_id.to_string(), body);
            }
            let mut payload = SchedulePayload::from(entry);
            payload.blackouts.extend(zone_blackouts.iter().cloned());
            schedule.push(payload);
        }

        CachePayload {
            templates: templates
                .into_iter()
                .map(|(id, body)| TemplatePayload {
                    id,
                    body,
                    category: None,
                })
                .collect(),
            schedule,
            bindings: self.collaborators.feed.bindings(zone),
        }
    }

    fn render(
        &self,
        entry: &ScheduleEntry,
        zone: &ZoneId,
        now: DateTime<Utc>,
    ) -> Result<Arc<Message>, CoreError> {
        let bindings = self.collaborators.feed.bindings(zone);
        let content = self
            .collaborators
            .renderer
            .render(&entry.template_id, &bindings)?;
        Ok(Arc::new(Message {
            id: MessageId::new(),
            content,
            priority: entry.priority,
            targets: Targets::zones([zone.clone()]),
            duration: Some(entry.duration),
            template_id: Some(entry.template_id.clone()),
            source: MessageSource::Schedule {
                entry: entry.id.clone(),
            },
            issued_at: now,
        }))
    }
}
