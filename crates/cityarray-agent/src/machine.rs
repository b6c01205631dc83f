// ── Agent state machine ──
//
// Everything the sign decides, with no I/O beyond the cache file. The
// runtime feeds it link events, hub commands and console input with an
// explicit `now`, and carries out the returned `Outcome`.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use cityarray_core::{Decision, DisplayDecider, OverrideMode, SignId, ZoneId};
use cityarray_proto::wire::MessagePayload;
use cityarray_proto::{ReconnectConfig, SignCommand, SignEvent, backoff_seed, calculate_backoff};
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::config::AgentConfig;
use crate::decider::{AutonomousDecider, ServerMirror};
use crate::emergency::LocalCommand;
use crate::state::LinkState;

/// What the physical display should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Keep,
    Show(Decision),
    Blank,
}

/// Side effects requested by one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub screen: Screen,
    /// Message id to acknowledge to the hub.
    pub ack: Option<String>,
    /// The hub asked for a status heartbeat.
    pub status_requested: bool,
    /// Drop any backoff wait and dial the hub now.
    pub reconnect_now: bool,
}

impl Outcome {
    fn screen(screen: Screen) -> Self {
        Self {
            screen,
            ack: None,
            status_requested: false,
            reconnect_now: false,
        }
    }
}

pub struct AgentCore {
    sign_id: SignId,
    zone: ZoneId,
    offset: FixedOffset,
    reconnect: ReconnectConfig,
    jitter_seed: u32,
    offline_after: u32,
    state: LinkState,
    cache: LocalCache,
    server: ServerMirror,
    emergency: Option<LocalCommand>,
    showing: Option<Decision>,
}

impl AgentCore {
    pub fn new(config: &AgentConfig, cache: LocalCache) -> Self {
        Self {
            sign_id: config.sign_id.clone(),
            zone: config.effective_zone(),
            offset: config.utc_offset(),
            reconnect: config.reconnect.clone(),
            jitter_seed: backoff_seed(config.sign_id.as_str()),
            offline_after: config.offline_after,
            state: LinkState::Reconnecting { attempt: 0 },
            cache,
            server: ServerMirror::default(),
            emergency: None,
            showing: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn showing(&self) -> Option<&Decision> {
        self.showing.as_ref()
    }

    pub fn local_emergency(&self) -> Option<LocalCommand> {
        self.emergency
    }

    /// Hub message id currently mirrored, reported in heartbeats.
    pub fn current_message_id(&self) -> Option<String> {
        self.server.current_id().map(ToOwned::to_owned)
    }

    /// Delay before the next connect attempt.
    pub fn backoff(&self) -> Duration {
        calculate_backoff(self.state.attempt(), self.jitter_seed, &self.reconnect)
    }

    // ── Link events ──────────────────────────────────────────────────

    /// The hub link came up. Returns the queued offline reports to send
    /// first; confirm them with [`reports_delivered`](Self::reports_delivered).
    pub fn connected(&mut self, now: DateTime<Utc>) -> Vec<SignEvent> {
        let was = self.state;
        self.state = LinkState::Connected;
        info!(sign_id = %self.sign_id, previous = %was, %now, "hub link up");
        self.pending_reports()
    }

    /// Queued offline reports as frames, oldest first.
    pub fn pending_reports(&self) -> Vec<SignEvent> {
        self.cache
            .pending_reports()
            .iter()
            .map(|r| SignEvent::OfflineReport {
                content: r.content.clone(),
                occurred_at: Some(r.occurred_at),
            })
            .collect()
    }

    pub fn reports_delivered(&mut self, count: usize) {
        if count > 0 {
            self.cache.drop_reports(count);
            self.persist();
        }
    }

    /// An established session ended. The screen keeps whatever the hub
    /// last sent.
    pub fn session_lost(&mut self, now: DateTime<Utc>) {
        warn!(sign_id = %self.sign_id, %now, "hub link lost");
        self.state = LinkState::Reconnecting { attempt: 0 };
    }

    /// A connect attempt failed. Past the ceiling the sign goes
    /// autonomous and re-decides from its cache.
    pub fn connect_failed(&mut self, now: DateTime<Utc>) -> Screen {
        let attempt = self.state.attempt().saturating_add(1);
        if attempt < self.offline_after {
            self.state = LinkState::Reconnecting { attempt };
            return Screen::Keep;
        }
        let entering = !self.state.is_autonomous();
        self.state = LinkState::OfflineAutonomous { attempt };
        if entering {
            warn!(sign_id = %self.sign_id, attempt, "hub unreachable, serving from local cache");
            self.refresh(now)
        } else {
            Screen::Keep
        }
    }

    // ── Hub commands ─────────────────────────────────────────────────

    pub fn handle(&mut self, command: SignCommand, now: DateTime<Utc>) -> Outcome {
        match command {
            SignCommand::Connected { message } => {
                info!(sign_id = %self.sign_id, %message, "hub welcome");
                Outcome::screen(Screen::Keep)
            }
            SignCommand::NewMessage { data } => self.accept(data, None, now),
            SignCommand::Override { data } => self.accept(data.message, Some(data.mode.into()), now),
            SignCommand::OverrideCancelled {
                override_id,
                message_id,
            } => {
                debug!(sign_id = %self.sign_id, %override_id, "override cancelled by hub");
                // The cache must not bring it back once the link drops
                let forgotten = self.cache.forget(&message_id);
                if forgotten {
                    self.persist();
                }
                if self.server.withdraw(&message_id) || forgotten {
                    Outcome::screen(self.refresh(now))
                } else {
                    Outcome::screen(Screen::Keep)
                }
            }
            SignCommand::Ping | SignCommand::RequestStatus => Outcome {
                status_requested: true,
                ..Outcome::screen(Screen::Keep)
            },
            SignCommand::CacheSync { data } => {
                debug!(
                    sign_id = %self.sign_id,
                    templates = data.templates.len(),
                    entries = data.schedule.len(),
                    "cache sync"
                );
                self.cache.apply_sync(data, now);
                self.persist();
                Outcome::screen(Screen::Keep)
            }
        }
    }

    /// Take a hub message as the sign's content. The server wins: any
    /// local emergency ends here. A repeat of what is already on screen
    /// is acknowledged without redisplay.
    fn accept(
        &mut self,
        payload: MessagePayload,
        mode: Option<OverrideMode>,
        now: DateTime<Utc>,
    ) -> Outcome {
        let ack = Some(payload.id.clone());
        if self.emergency.is_none() && self.server.current_id() == Some(payload.id.as_str()) {
            debug!(sign_id = %self.sign_id, message_id = %payload.id, "repeat delivery");
            return Outcome {
                ack,
                ..Outcome::screen(Screen::Keep)
            };
        }

        if let Some(cmd) = self.emergency.take() {
            info!(sign_id = %self.sign_id, local = %cmd, "hub content replaces local emergency");
        }
        self.server.accept(&payload, mode);
        self.cache.remember(payload);
        self.persist();
        Outcome {
            ack,
            ..Outcome::screen(self.refresh(now))
        }
    }

    // ── Console commands ─────────────────────────────────────────────

    pub fn local(&mut self, command: LocalCommand, now: DateTime<Utc>) -> Outcome {
        match command {
            LocalCommand::Reconnect => {
                if !self.state.is_connected() {
                    self.state = LinkState::Reconnecting { attempt: 0 };
                }
                info!(sign_id = %self.sign_id, "manual reconnect");
                Outcome {
                    reconnect_now: true,
                    ..Outcome::screen(Screen::Keep)
                }
            }
            LocalCommand::Clear => {
                self.emergency = None;
                Outcome::screen(self.refresh(now))
            }
            cmd => {
                warn!(sign_id = %self.sign_id, command = %cmd, "local emergency triggered");
                self.emergency = Some(cmd);
                self.cache.queue_report(cmd.report(), now);
                self.persist();
                Outcome::screen(self.refresh(now))
            }
        }
    }

    // ── Decisions ────────────────────────────────────────────────────

    /// Periodic re-evaluation. Only autonomous signs change content on
    /// their own.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Screen {
        if self.state.is_autonomous() {
            self.refresh(now)
        } else {
            Screen::Keep
        }
    }

    /// What the sign should show now, from the decider its link state
    /// selects. A local emergency holds in every state until cleared or
    /// replaced by hub content.
    pub fn decide(&self, now: DateTime<Utc>) -> Option<Decision> {
        if self.state.is_autonomous() || self.emergency.is_some() {
            let decider = AutonomousDecider {
                cache: self.cache.contents(),
                zone: &self.zone,
                offset: self.offset,
                emergency: self.emergency,
            };
            decider.decide(&self.sign_id, now)
        } else {
            self.server.decide(&self.sign_id, now)
        }
    }

    /// Re-decide and report whether the screen changes.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Screen {
        let next = self.decide(now);
        if next == self.showing {
            return Screen::Keep;
        }
        self.showing.clone_from(&next);
        match next {
            Some(decision) => Screen::Show(decision),
            None => Screen::Blank,
        }
    }

    fn persist(&self) {
        if let Err(e) = self.cache.save() {
            warn!(error = %e, "failed to persist offline cache");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cityarray_core::DecisionSource;
    use cityarray_proto::wire::{CachePayload, OverridePayload, TemplatePayload, WireMode};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn at(hh: u32, mm: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 4, hh, mm, 0).unwrap()
    }

    fn core() -> (AgentCore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            sign_id: "s1".into(),
            zone: Some("A".into()),
            offline_after: 2,
            cache_path: dir.path().join("cache.json"),
            ..AgentConfig::default()
        };
        let cache = LocalCache::open(&config.cache_path).unwrap();
        (AgentCore::new(&config, cache), dir)
    }

    fn message(id: &str, content: &str) -> MessagePayload {
        MessagePayload {
            id: id.into(),
            content: content.into(),
            priority: 30,
            duration_secs: None,
            template_id: None,
            issued_at: at(18, 0),
        }
    }

    fn shown(screen: &Screen) -> &str {
        match screen {
            Screen::Show(d) => &d.content,
            other => panic!("expected content, got {other:?}"),
        }
    }

    #[test]
    fn new_message_is_shown_and_acked() {
        let (mut core, _dir) = core();
        core.connected(at(18, 0));
        let out = core.handle(
            SignCommand::NewMessage {
                data: message("m-1", "Lot C full"),
            },
            at(18, 0),
        );
        assert_eq!(shown(&out.screen), "Lot C full");
        assert_eq!(out.ack.as_deref(), Some("m-1"));
        assert_eq!(core.current_message_id().as_deref(), Some("m-1"));
    }

    #[test]
    fn repeat_delivery_is_acked_without_redisplay() {
        let (mut core, _dir) = core();
        core.connected(at(18, 0));
        let cmd = SignCommand::NewMessage {
            data: message("m-1", "Lot C full"),
        };
        core.handle(cmd.clone(), at(18, 0));
        let again = core.handle(cmd, at(18, 1));
        assert_eq!(again.screen, Screen::Keep);
        assert_eq!(again.ack.as_deref(), Some("m-1"));
    }

    #[test]
    fn override_then_cancel_blanks_when_nothing_follows() {
        let (mut core, _dir) = core();
        core.connected(at(18, 0));
        core.handle(
            SignCommand::Override {
                data: OverridePayload {
                    override_id: "o-1".into(),
                    mode: WireMode::Replace,
                    message: message("m-2", "Gate 3 closed"),
                },
            },
            at(18, 0),
        );
        assert_eq!(
            core.showing().unwrap().source,
            DecisionSource::Override {
                mode: OverrideMode::Replace
            }
        );

        let out = core.handle(
            SignCommand::OverrideCancelled {
                override_id: "o-1".into(),
                message_id: "m-2".into(),
            },
            at(18, 5),
        );
        assert_eq!(out.screen, Screen::Blank);
    }

    #[test]
    fn cancelled_emergency_stays_gone_when_autonomous() {
        let (mut core, _dir) = core();
        core.connected(at(18, 0));
        core.handle(
            SignCommand::Override {
                data: OverridePayload {
                    override_id: "o-9".into(),
                    mode: WireMode::Emergency,
                    message: message("m-2", "EVACUATE VIA GATE 3"),
                },
            },
            at(18, 0),
        );
        let out = core.handle(
            SignCommand::OverrideCancelled {
                override_id: "o-9".into(),
                message_id: "m-2".into(),
            },
            at(18, 5),
        );
        assert_eq!(out.screen, Screen::Blank);
        assert!(core.cache().contents().last_message.is_none());

        core.session_lost(at(18, 6));
        core.connect_failed(at(18, 6));
        assert_eq!(core.connect_failed(at(18, 7)), Screen::Keep);
        assert!(core.state().is_autonomous());
        assert!(core.decide(at(18, 7)).is_none());

        // Nor after a restart from the persisted cache
        let reloaded = LocalCache::open(core.cache().path()).unwrap();
        assert!(reloaded.contents().last_message.is_none());
    }

    #[test]
    fn cancel_for_other_message_keeps_cached_content() {
        let (mut core, _dir) = core();
        core.connected(at(18, 0));
        core.handle(
            SignCommand::NewMessage {
                data: message("m-1", "Welcome"),
            },
            at(18, 0),
        );
        let out = core.handle(
            SignCommand::OverrideCancelled {
                override_id: "o-3".into(),
                message_id: "m-3".into(),
            },
            at(18, 1),
        );
        assert_eq!(out.screen, Screen::Keep);
        assert_eq!(
            core.cache().contents().last_message.as_ref().map(|m| m.id.as_str()),
            Some("m-1")
        );
    }

    #[test]
    fn ping_requests_status() {
        let (mut core, _dir) = core();
        assert!(core.handle(SignCommand::Ping, at(18, 0)).status_requested);
        assert!(core.handle(SignCommand::RequestStatus, at(18, 0)).status_requested);
    }

    #[test]
    fn goes_autonomous_after_ceiling() {
        let (mut core, _dir) = core();
        core.connected(at(18, 0));
        core.handle(
            SignCommand::NewMessage {
                data: message("m-1", "Welcome"),
            },
            at(18, 0),
        );

        core.session_lost(at(18, 1));
        assert_eq!(core.state(), LinkState::Reconnecting { attempt: 0 });
        assert_eq!(core.connect_failed(at(18, 1)), Screen::Keep);
        assert_eq!(core.state(), LinkState::Reconnecting { attempt: 1 });

        core.connect_failed(at(18, 2));
        assert_eq!(core.state(), LinkState::OfflineAutonomous { attempt: 2 });
        assert!(core.backoff() > Duration::ZERO);
        // Cache has no schedule, so the last hub message carries on
        assert_eq!(core.decide(at(18, 2)).unwrap().content, "Welcome");
    }

    #[test]
    fn autonomous_sign_follows_cached_schedule() {
        let (mut core, _dir) = core();
        core.connected(at(18, 0));
        core.handle(
            SignCommand::CacheSync {
                data: CachePayload {
                    templates: vec![TemplatePayload {
                        id: "late".into(),
                        body: "Last shuttle 23:30".into(),
                        category: None,
                    }],
                    schedule: vec![cityarray_proto::wire::SchedulePayload {
                        id: "late".into(),
                        template_id: "late".into(),
                        zones: Vec::new(),
                        start_time: "22:00".into(),
                        end_time: "23:30".into(),
                        frequency_minutes: 0,
                        duration_secs: 30,
                        priority: 10,
                        enabled: true,
                        active_days: None,
                        blackouts: Vec::new(),
                    }],
                    ..CachePayload::default()
                },
            },
            at(18, 0),
        );
        core.session_lost(at(21, 0));
        core.connect_failed(at(21, 0));
        // Nothing cached for 21:00 and nothing shown yet
        assert_eq!(core.connect_failed(at(21, 0)), Screen::Keep);
        assert!(core.state().is_autonomous());

        assert_eq!(core.tick(at(21, 30)), Screen::Keep);
        assert_eq!(shown(&core.tick(at(22, 0))), "Last shuttle 23:30");
    }

    #[test]
    fn local_emergency_is_queued_and_server_wins_on_reconnect() {
        let (mut core, _dir) = core();
        core.session_lost(at(18, 0));

        let out = core.local(LocalCommand::Evacuate, at(18, 1));
        assert!(shown(&out.screen).contains("EVACUATE NOW"));
        assert_eq!(core.cache().pending_reports().len(), 1);

        let reports = core.connected(at(18, 5));
        assert_eq!(
            reports,
            vec![SignEvent::OfflineReport {
                content: "OFFLINE: evacuate".into(),
                occurred_at: Some(at(18, 1)),
            }]
        );
        core.reports_delivered(reports.len());
        assert!(core.cache().pending_reports().is_empty());

        // Emergency holds until the hub speaks
        assert_eq!(core.decide(at(18, 5)).unwrap().source, DecisionSource::LocalEmergency);
        let out = core.handle(
            SignCommand::NewMessage {
                data: message("m-7", "All clear, enjoy the show"),
            },
            at(18, 5),
        );
        assert_eq!(shown(&out.screen), "All clear, enjoy the show");
        assert!(core.local_emergency().is_none());
    }

    #[test]
    fn clear_drops_local_emergency() {
        let (mut core, _dir) = core();
        core.local(LocalCommand::Shelter, at(18, 0));
        assert_eq!(core.local(LocalCommand::Clear, at(18, 1)).screen, Screen::Blank);
        assert_eq!(core.cache().pending_reports().len(), 1);
    }

    #[test]
    fn reconnect_resets_attempts() {
        let (mut core, _dir) = core();
        core.connect_failed(at(18, 0));
        core.connect_failed(at(18, 0));
        core.connect_failed(at(18, 0));
        assert!(core.state().is_autonomous());

        let out = core.local(LocalCommand::Reconnect, at(18, 1));
        assert!(out.reconnect_now);
        assert_eq!(core.state(), LinkState::Reconnecting { attempt: 0 });
    }
}
