// ── Sign-side display deciders ──
//
// While the link is up the sign mirrors whatever the hub last told it.
// Once it goes autonomous it decides from its cache: a local emergency
// first, then the cached schedule, then the last server message.

use chrono::{DateTime, FixedOffset, Utc};
use cityarray_core::{
    Decision, DecisionSource, DisplayDecider, MessageId, OverrideMode, Priority, ScheduleEntry,
    SignId, ZoneId, fill_placeholders, select_active,
};
use cityarray_proto::wire::MessagePayload;
use tracing::debug;

use crate::cache::CacheContents;
use crate::emergency::LocalCommand;

/// Decision for a message the hub sent.
pub fn server_decision(payload: &MessagePayload, mode: Option<OverrideMode>) -> Decision {
    let source = match mode {
        Some(mode) => DecisionSource::Override { mode },
        None if payload.template_id.is_some() => DecisionSource::Schedule,
        None => DecisionSource::Operator,
    };
    Decision {
        message_id: payload.id.parse::<MessageId>().ok(),
        content: payload.content.clone(),
        priority: Priority::saturating(payload.priority),
        source,
    }
}

// ── ServerMirror ─────────────────────────────────────────────────────

/// The hub's last word for this sign.
#[derive(Debug, Clone, Default)]
pub struct ServerMirror {
    current: Option<(String, Decision)>,
}

impl ServerMirror {
    pub fn accept(&mut self, payload: &MessagePayload, mode: Option<OverrideMode>) {
        self.current = Some((payload.id.clone(), server_decision(payload, mode)));
    }

    /// Drop the current content if it is `message_id`.
    pub fn withdraw(&mut self, message_id: &str) -> bool {
        if self.current.as_ref().is_some_and(|(id, _)| id == message_id) {
            self.current = None;
            true
        } else {
            false
        }
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|(id, _)| id.as_str())
    }
}

impl DisplayDecider for ServerMirror {
    fn decide(&self, _sign: &SignId, _now: DateTime<Utc>) -> Option<Decision> {
        self.current.as_ref().map(|(_, d)| d.clone())
    }
}

// ── AutonomousDecider ────────────────────────────────────────────────

/// Offline decisions from the local cache.
pub struct AutonomousDecider<'a> {
    pub cache: &'a CacheContents,
    pub zone: &'a ZoneId,
    pub offset: FixedOffset,
    pub emergency: Option<LocalCommand>,
}

impl AutonomousDecider<'_> {
    fn from_schedule(&self, now: DateTime<Utc>) -> Option<Decision> {
        let entries: Vec<ScheduleEntry> = self
            .cache
            .schedule
            .iter()
            .filter_map(|p| match ScheduleEntry::try_from(p) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(entry = %p.id, error = %e, "skipping unusable cached entry");
                    None
                }
            })
            .collect();

        let local = now.with_timezone(&self.offset).naive_local();
        let entry = select_active(&entries, &[], self.zone, local)?;
        let template = self.cache.templates.get(entry.template_id.as_str())?;
        Some(Decision {
            message_id: None,
            content: fill_placeholders(&template.body, &self.cache.bindings),
            priority: entry.priority,
            source: DecisionSource::OfflineCache,
        })
    }

    fn from_last_message(&self) -> Option<Decision> {
        self.cache.last_message.as_ref().map(|m| Decision {
            source: DecisionSource::OfflineCache,
            ..server_decision(m, None)
        })
    }
}

impl DisplayDecider for AutonomousDecider<'_> {
    fn decide(&self, _sign: &SignId, now: DateTime<Utc>) -> Option<Decision> {
        if let Some(template) = self.emergency.and_then(LocalCommand::template) {
            return Some(Decision {
                message_id: None,
                content: template.content.to_owned(),
                priority: template.priority,
                source: DecisionSource::LocalEmergency,
            });
        }
        self.from_schedule(now).or_else(|| self.from_last_message())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cityarray_proto::wire::{SchedulePayload, TemplatePayload};
    use pretty_assertions::assert_eq;

    fn at(hh: u32, mm: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 4, hh, mm, 0).unwrap()
    }

    fn payload(id: &str, content: &str, template: Option<&str>) -> MessagePayload {
        MessagePayload {
            id: id.into(),
            content: content.into(),
            priority: 40,
            duration_secs: None,
            template_id: template.map(Into::into),
            issued_at: at(18, 0),
        }
    }

    fn cache() -> CacheContents {
        let mut cache = CacheContents::default();
        cache.templates.insert(
            "sponsor".into(),
            TemplatePayload {
                id: "sponsor".into(),
                body: "Brought to you by {sponsor}".into(),
                category: None,
            },
        );
        cache.schedule.push(SchedulePayload {
            id: "loop".into(),
            template_id: "sponsor".into(),
            zones: vec!["A".into()],
            start_time: "18:00".into(),
            end_time: "23:00".into(),
            frequency_minutes: 0,
            duration_secs: 30,
            priority: 5,
            enabled: true,
            active_days: None,
            blackouts: Vec::new(),
        });
        cache.bindings.insert("sponsor".into(), "Acme".into());
        cache
    }

    #[test]
    fn mirror_tracks_the_latest_server_message() {
        let sign = SignId::from("s1");
        let mut mirror = ServerMirror::default();
        assert!(mirror.decide(&sign, at(18, 0)).is_none());

        mirror.accept(&payload("m-1", "Welcome", Some("welcome")), None);
        let d = mirror.decide(&sign, at(18, 0)).unwrap();
        assert_eq!(d.content, "Welcome");
        assert_eq!(d.source, DecisionSource::Schedule);

        assert!(!mirror.withdraw("m-2"));
        assert!(mirror.withdraw("m-1"));
        assert!(mirror.current_id().is_none());
    }

    #[test]
    fn override_source_carries_mode() {
        let d = server_decision(
            &payload("m-1", "Hold", None),
            Some(OverrideMode::Replace),
        );
        assert_eq!(
            d.source,
            DecisionSource::Override {
                mode: OverrideMode::Replace
            }
        );
    }

    #[test]
    fn local_emergency_beats_cached_schedule() {
        let cache = cache();
        let zone = ZoneId::from("A");
        let decider = AutonomousDecider {
            cache: &cache,
            zone: &zone,
            offset: FixedOffset::east_opt(0).unwrap(),
            emergency: Some(LocalCommand::Medical),
        };
        let d = decider.decide(&"s1".into(), at(19, 0)).unwrap();
        assert_eq!(d.source, DecisionSource::LocalEmergency);
        assert_eq!(d.priority.value(), 90);
    }

    #[test]
    fn cached_schedule_renders_with_bindings() {
        let cache = cache();
        let zone = ZoneId::from("A");
        let decider = AutonomousDecider {
            cache: &cache,
            zone: &zone,
            offset: FixedOffset::east_opt(0).unwrap(),
            emergency: None,
        };
        let d = decider.decide(&"s1".into(), at(19, 0)).unwrap();
        assert_eq!(d.content, "Brought to you by Acme");
        assert_eq!(d.source, DecisionSource::OfflineCache);
    }

    #[test]
    fn outside_every_window_falls_back_to_last_message() {
        let mut cache = cache();
        let zone = ZoneId::from("A");
        let decider = AutonomousDecider {
            cache: &cache,
            zone: &zone,
            offset: FixedOffset::east_opt(0).unwrap(),
            emergency: None,
        };
        assert!(decider.decide(&"s1".into(), at(9, 0)).is_none());

        cache.last_message = Some(payload("m-9", "Gates open at 17:00", None));
        let decider = AutonomousDecider {
            cache: &cache,
            zone: &zone,
            offset: FixedOffset::east_opt(0).unwrap(),
            emergency: None,
        };
        assert_eq!(
            decider.decide(&"s1".into(), at(9, 0)).unwrap().content,
            "Gates open at 17:00"
        );
    }
}
