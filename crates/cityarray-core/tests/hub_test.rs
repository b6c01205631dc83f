#![allow(clippy::unwrap_used)]
// End-to-end scenarios driven through `Hub` with in-process sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde_json::json;
use tokio::sync::broadcast;

use cityarray_core::{
    ArbiterState, BraceRenderer, Collaborators, Command, CommandResult, CoreError,
    DashboardEvent, DisplayDecider, Hub, HubConfig, Lifecycle, MemoryPersistence, OverrideMode,
    OverrideRequest, Priority, Role, ScheduleEntry, SessionOutbox, SignId, SignStatus, Targets,
    TimeWindow, ZoneId, ZoneSelector,
};
use cityarray_proto::SignCommand;
use cityarray_proto::wire::HeartbeatData;

// ── Helpers ─────────────────────────────────────────────────────────

fn at(hh: u32, mm: u32) -> DateTime<Utc> {
    format!("2026-07-04T{hh:02}:{mm:02}:00Z").parse().unwrap()
}

fn t0() -> DateTime<Utc> {
    at(18, 0)
}

fn setup() -> (Hub, Arc<MemoryPersistence>) {
    let persistence = Arc::new(MemoryPersistence::default());
    let collaborators = Collaborators {
        renderer: Arc::new(BraceRenderer::new([
            ("sponsor", "Brought to you by Acme"),
            ("weather", "Severe weather approaching"),
        ])),
        persistence: persistence.clone(),
        ..Collaborators::default()
    };
    let hub = Hub::with_collaborators(HubConfig::default(), collaborators).unwrap();
    (hub, persistence)
}

fn connect(hub: &Hub, sign: &str, zone: &str, now: DateTime<Utc>) -> SessionOutbox {
    hub.open_session(&sign.into(), Some(zone.into()), None, now)
}

fn heartbeat(hub: &Hub, sign: &str, outbox: &SessionOutbox, battery: u8, now: DateTime<Utc>) {
    hub.handle_event(
        &sign.into(),
        outbox.id(),
        cityarray_proto::SignEvent::Heartbeat {
            data: HeartbeatData {
                battery: Some(battery),
                signal_strength: Some(75),
                ..HeartbeatData::default()
            },
        },
        now,
    )
    .unwrap();
}

/// Message ids of every content command waiting in the outbox.
fn delivered_ids(outbox: &mut SessionOutbox) -> Vec<String> {
    outbox
        .drain()
        .into_iter()
        .filter_map(|cmd| match cmd {
            SignCommand::NewMessage { data } => Some(data.id),
            SignCommand::Override { data } => Some(data.message.id),
            _ => None,
        })
        .collect()
}

fn count(rx: &mut broadcast::Receiver<Arc<DashboardEvent>>, kind: &str) -> usize {
    std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| e.kind() == kind)
        .count()
}

fn request(role: Role, mode: OverrideMode, content: &str) -> OverrideRequest {
    OverrideRequest {
        role,
        mode,
        content: content.into(),
        targets: Targets::zones([ZoneId::from("A")]),
        duration: None,
        priority: None,
    }
}

fn zone_a(mut entry: ScheduleEntry) -> ScheduleEntry {
    entry.zones = ZoneSelector::from_names(["A"]);
    entry
}

// ── Sessions and liveness ───────────────────────────────────────────

#[test]
fn new_session_gets_welcome_and_cache() {
    let (hub, _) = setup();
    let mut outbox = connect(&hub, "gate-1", "A", t0());

    let commands = outbox.drain();
    assert!(matches!(commands[0], SignCommand::Connected { .. }));
    assert!(matches!(commands[1], SignCommand::CacheSync { .. }));
    assert_eq!(
        hub.sign(&"gate-1".into()).unwrap().status(),
        SignStatus::Connecting
    );
}

#[test]
fn silent_sign_goes_offline_once_per_episode() {
    let (hub, _) = setup();
    let mut events = hub.events();
    let outbox = connect(&hub, "s1", "A", t0());
    heartbeat(&hub, "s1", &outbox, 80, t0());

    assert!(hub.sweep(t0() + TimeDelta::seconds(29)).offline.is_empty());
    assert_eq!(
        hub.sweep(t0() + TimeDelta::seconds(30)).offline,
        vec![SignId::from("s1")]
    );
    assert!(hub.sweep(t0() + TimeDelta::seconds(90)).offline.is_empty());
    assert_eq!(count(&mut events, "sign_offline"), 1);
    assert_eq!(hub.sign(&"s1".into()).unwrap().status(), SignStatus::Offline);

    let back = t0() + TimeDelta::seconds(100);
    let outbox = connect(&hub, "s1", "A", back);
    heartbeat(&hub, "s1", &outbox, 80, back);
    assert_eq!(hub.sign(&"s1".into()).unwrap().status(), SignStatus::Online);
}

#[test]
fn low_battery_warns_once_per_crossing() {
    let (hub, _) = setup();
    let mut events = hub.events();
    let outbox = connect(&hub, "s1", "A", t0());

    heartbeat(&hub, "s1", &outbox, 9, t0());
    heartbeat(&hub, "s1", &outbox, 9, t0() + TimeDelta::seconds(5));
    heartbeat(&hub, "s1", &outbox, 7, t0() + TimeDelta::seconds(10));

    assert_eq!(count(&mut events, "warning"), 1);
    let sign = hub.sign(&"s1".into()).unwrap();
    assert_eq!(sign.status(), SignStatus::Warning);
    assert!(sign.health.battery_low);
}

#[test]
fn raw_frames_are_decoded() {
    let (hub, _) = setup();
    let outbox = connect(&hub, "s1", "A", t0());
    let frame = json!({"type": "heartbeat", "data": {"battery": 64, "crowd_count": 120}});

    hub.handle_frame(&"s1".into(), outbox.id(), &frame.to_string(), t0())
        .unwrap();
    let sign = hub.sign(&"s1".into()).unwrap();
    assert_eq!(sign.battery, Some(64));
    assert_eq!(sign.crowd_count, Some(120));

    assert!(hub
        .handle_frame(&"s1".into(), outbox.id(), "{not json", t0())
        .is_err());
    let bad_ack = json!({"type": "ack", "message_id": "nope"}).to_string();
    assert!(matches!(
        hub.handle_frame(&"s1".into(), outbox.id(), &bad_ack, t0()),
        Err(CoreError::Protocol { .. })
    ));
}

#[test]
fn offline_report_is_audited() {
    let (hub, persistence) = setup();
    let mut events = hub.events();
    let outbox = connect(&hub, "s1", "A", t0());
    let frame = json!({
        "type": "offline_message_report",
        "content": "OFFLINE: evacuate",
        "occurred_at": "2026-07-04T17:55:00Z",
    });

    hub.handle_frame(&"s1".into(), outbox.id(), &frame.to_string(), t0())
        .unwrap();

    let audit = persistence.audit();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].detail, "OFFLINE: evacuate");
    assert_eq!(audit[0].at, at(17, 55));
    assert_eq!(count(&mut events, "offline_activity"), 1);
}

// ── Delivery ────────────────────────────────────────────────────────

#[test]
fn message_queued_offline_is_acknowledged_exactly_once() {
    let (hub, _) = setup();
    let mut events = hub.events();
    let first = connect(&hub, "s1", "A", t0());
    hub.close_session(&"s1".into(), first.id(), t0());

    let (message_id, delivered) = hub
        .send_message(
            "Lot C is full".into(),
            Targets::signs([SignId::from("s1")]),
            Priority::new(40).unwrap(),
            None,
            t0(),
        )
        .unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(hub.deliveries(&"s1".into())[0].state, Lifecycle::Queued);

    let later = t0() + TimeDelta::minutes(5);
    let mut outbox = connect(&hub, "s1", "A", later);
    assert_eq!(delivered_ids(&mut outbox), vec![message_id.to_string()]);

    let ack = json!({"type": "ack", "message_id": message_id.to_string()}).to_string();
    hub.handle_frame(&"s1".into(), outbox.id(), &ack, later).unwrap();
    hub.handle_frame(&"s1".into(), outbox.id(), &ack, later).unwrap();

    assert_eq!(count(&mut events, "message_ack"), 1);
    let sign = hub.sign(&"s1".into()).unwrap();
    assert_eq!(sign.current_message, Some(message_id));
    assert!(sign.pending_acks.is_empty());
}

#[test]
fn reconnect_gets_only_current_content() {
    let (hub, _) = setup();
    let first = connect(&hub, "s1", "A", t0());
    hub.close_session(&"s1".into(), first.id(), t0());

    let target = || Targets::signs([SignId::from("s1")]);
    let p = Priority::new(20).unwrap();
    hub.send_message("old".into(), target(), p, None, t0()).unwrap();
    let (latest, _) = hub.send_message("new".into(), target(), p, None, t0()).unwrap();

    let mut outbox = connect(&hub, "s1", "A", t0() + TimeDelta::seconds(10));
    assert_eq!(delivered_ids(&mut outbox), vec![latest.to_string()]);
}

#[test]
fn stale_schedule_content_is_reissued_on_reconnect() {
    let (hub, _) = setup();
    let mut events = hub.events();
    hub.upsert_schedule(zone_a(ScheduleEntry::new(
        "sponsor",
        "sponsor",
        TimeWindow::parse("18:00", "23:00").unwrap(),
        Priority::new(1).unwrap(),
    )))
    .unwrap();
    let first = connect(&hub, "s1", "A", t0());
    hub.close_session(&"s1".into(), first.id(), t0());

    // Emitted while the sign is away, then outlives its display duration
    hub.tick_schedule(t0());
    let queued = hub.deliveries(&"s1".into())[0].message.id;
    hub.sweep(at(18, 1));
    assert_eq!(hub.deliveries(&"s1".into())[0].state, Lifecycle::Expired);

    let back = at(18, 5);
    let mut outbox = connect(&hub, "s1", "A", back);
    let resent = delivered_ids(&mut outbox);
    assert_eq!(resent.len(), 1);
    assert_ne!(resent[0], queued.to_string());

    let shortly = back + TimeDelta::milliseconds(500);
    assert_eq!(hub.sweep(shortly).delivery.expired, 0);

    let ack = json!({"type": "ack", "message_id": resent[0]}).to_string();
    hub.handle_frame(&"s1".into(), outbox.id(), &ack, shortly).unwrap();
    assert_eq!(count(&mut events, "message_ack"), 1);
    let sign = hub.sign(&"s1".into()).unwrap();
    assert_eq!(
        sign.current_message.map(|id| id.to_string()),
        Some(resent[0].clone())
    );
}

#[test]
fn sibling_delivery_is_independent() {
    let (hub, _) = setup();
    let mut live = connect(&hub, "s1", "A", t0());
    let gone = connect(&hub, "s2", "A", t0());
    hub.close_session(&"s2".into(), gone.id(), t0());
    live.drain();

    hub.send_message(
        "Shuttle boarding".into(),
        Targets::zones([ZoneId::from("A")]),
        Priority::new(30).unwrap(),
        Some(Duration::from_secs(60)),
        t0(),
    )
    .unwrap();

    assert_eq!(delivered_ids(&mut live).len(), 1);
    assert_eq!(hub.deliveries(&"s1".into())[0].state, Lifecycle::Sent);
    assert_eq!(hub.deliveries(&"s2".into())[0].state, Lifecycle::Queued);

    // s2 never came back; its copy expires without touching s1's
    let report = hub.sweep(t0() + TimeDelta::seconds(60)).delivery;
    assert_eq!(report.expired, 2);
    assert_eq!(hub.deliveries(&"s2".into())[0].state, Lifecycle::Expired);
}

// ── Overrides ───────────────────────────────────────────────────────

#[test]
fn emergency_stays_active_through_lower_overrides() {
    let (hub, _) = setup();
    let sign = SignId::from("s1");
    let _outbox = connect(&hub, "s1", "A", t0());

    hub.issue_override(
        request(Role::ZoneLead { zone: "A".into() }, OverrideMode::Replace, "Gate 3 closed"),
        t0(),
    )
    .unwrap();
    hub.issue_override(
        request(Role::Admin, OverrideMode::Emergency, "EVACUATE NOW"),
        t0(),
    )
    .unwrap();
    assert_eq!(hub.arbiter_state(&sign), ArbiterState::Emergency);

    hub.issue_override(
        request(Role::Staff { zone: "A".into() }, OverrideMode::Insert, "Free water"),
        t0(),
    )
    .unwrap();
    assert_eq!(hub.arbiter_state(&sign), ArbiterState::Emergency);
    assert_eq!(hub.decide(&sign, t0()).unwrap().content, "EVACUATE NOW");

    // Insert runs out underneath; emergency still holds
    hub.sweep(t0() + TimeDelta::seconds(31));
    assert_eq!(hub.decide(&sign, t0()).unwrap().content, "EVACUATE NOW");
}

#[test]
fn cancelling_twice_yields_one_event() {
    let (hub, _) = setup();
    let mut events = hub.events();
    let _outbox = connect(&hub, "s1", "A", t0());
    let ov = hub
        .issue_override(
            request(Role::EventManager, OverrideMode::Replace, "Hold"),
            t0(),
        )
        .unwrap();

    assert!(hub.cancel_override(ov.id, t0()));
    assert!(!hub.cancel_override(ov.id, t0()));
    assert_eq!(count(&mut events, "override_cancelled"), 1);
}

#[test]
fn at_most_one_outstanding_delivery_per_sign() {
    let (hub, _) = setup();
    hub.upsert_schedule(zone_a(ScheduleEntry::new(
        "sponsor",
        "sponsor",
        TimeWindow::parse("18:00", "23:00").unwrap(),
        Priority::new(1).unwrap(),
    )))
    .unwrap();
    let sign = SignId::from("s1");
    let _outbox = connect(&hub, "s1", "A", t0());

    let mut now = t0();
    hub.tick_schedule(now);
    let replace = hub
        .issue_override(request(Role::EventManager, OverrideMode::Replace, "Hold"), now)
        .unwrap();
    now += TimeDelta::minutes(1);
    hub.send_message("direct".into(), Targets::All, Priority::new(5).unwrap(), None, now)
        .unwrap();
    hub.issue_override(request(Role::Admin, OverrideMode::Insert, "Quick note"), now)
        .unwrap();
    now += TimeDelta::minutes(1);
    hub.cancel_override(replace.id, now);
    now += TimeDelta::minutes(1);
    hub.sweep(now);

    let outstanding = hub
        .deliveries(&sign)
        .iter()
        .filter(|r| !r.state.is_terminal())
        .count();
    assert_eq!(outstanding, 1);
    assert_eq!(hub.arbiter_state(&sign), ArbiterState::Normal);
    assert_eq!(hub.decide(&sign, now).unwrap().content, "direct");
}

// ── Scheduling ──────────────────────────────────────────────────────

#[test]
fn weather_alert_interrupts_sponsor_rotation() {
    let (hub, _) = setup();
    let mut sponsor = zone_a(ScheduleEntry::new(
        "sponsor",
        "sponsor",
        TimeWindow::parse("18:00", "23:00").unwrap(),
        Priority::new(1).unwrap(),
    ));
    sponsor.frequency = Some(Duration::from_secs(600));
    let weather = zone_a(ScheduleEntry::new(
        "weather-alert",
        "weather",
        TimeWindow::starting_at(
            NaiveTime::from_hms_opt(19, 12, 0).unwrap(),
            Duration::from_secs(300),
        ),
        Priority::new(80).unwrap(),
    ));
    hub.upsert_schedule(sponsor).unwrap();
    hub.upsert_schedule(weather).unwrap();

    let sign = SignId::from("s1");
    let _outbox = connect(&hub, "s1", "A", at(19, 0));

    hub.tick_schedule(at(19, 0));
    assert_eq!(hub.decide(&sign, at(19, 0)).unwrap().content, "Brought to you by Acme");

    hub.tick_schedule(at(19, 12));
    assert_eq!(
        hub.decide(&sign, at(19, 12)).unwrap().content,
        "Severe weather approaching"
    );

    hub.tick_schedule(at(19, 20));
    assert_eq!(hub.decide(&sign, at(19, 20)).unwrap().content, "Brought to you by Acme");
}

#[test]
fn replace_suppresses_schedule_output() {
    let (hub, _) = setup();
    hub.upsert_schedule(zone_a(ScheduleEntry::new(
        "sponsor",
        "sponsor",
        TimeWindow::parse("18:00", "23:00").unwrap(),
        Priority::new(1).unwrap(),
    )))
    .unwrap();
    let sign = SignId::from("s1");
    let _outbox = connect(&hub, "s1", "A", t0());

    hub.issue_override(request(Role::EventManager, OverrideMode::Replace, "Hold"), t0())
        .unwrap();
    let emitted = hub.tick_schedule(t0());
    assert_eq!(emitted[0].delivered, 0);
    assert_eq!(hub.decide(&sign, t0()).unwrap().content, "Hold");
}

// ── Command processor ───────────────────────────────────────────────

#[tokio::test]
async fn execute_requires_running_hub() {
    let (hub, _) = setup();
    let ping = || Command::Ping {
        sign: "s1".into(),
    };
    assert!(matches!(hub.execute(ping()).await, Err(CoreError::HubStopped)));

    hub.start().await;
    assert!(matches!(
        hub.execute(ping()).await,
        Err(CoreError::SignNotFound { .. })
    ));

    let entry = ScheduleEntry::new(
        "welcome",
        "sponsor",
        TimeWindow::parse("00:00", "00:00").unwrap(),
        Priority::new(5).unwrap(),
    );
    assert!(matches!(
        hub.execute(Command::UpsertSchedule(entry)).await,
        Ok(CommandResult::Ok)
    ));
    assert_eq!(hub.schedule().len(), 1);

    hub.shutdown().await;
    assert!(matches!(hub.execute(ping()).await, Err(CoreError::HubStopped)));
}
