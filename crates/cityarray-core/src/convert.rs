// ── Wire ↔ domain conversion ──
//
// Bridges `cityarray-proto` frame types and the canonical model. Inbound
// conversions validate and may fail; outbound ones never do.

use std::time::Duration;

use cityarray_proto::SignCommand;
use cityarray_proto::wire::{
    HeartbeatData, MessagePayload, OverridePayload, SchedulePayload, WindowPayload, WireMode,
};
use chrono::Weekday;

use crate::error::CoreError;
use crate::model::{
    Message, MessageSource, OverrideMode, Priority, ScheduleEntry, Sign, TimeWindow, ZoneSelector,
};

// ── Messages ─────────────────────────────────────────────────────────

impl From<OverrideMode> for WireMode {
    fn from(mode: OverrideMode) -> Self {
        match mode {
            OverrideMode::Insert => Self::Insert,
            OverrideMode::Replace => Self::Replace,
            OverrideMode::Emergency => Self::Emergency,
        }
    }
}

impl From<WireMode> for OverrideMode {
    fn from(mode: WireMode) -> Self {
        match mode {
            WireMode::Insert => Self::Insert,
            WireMode::Replace => Self::Replace,
            WireMode::Emergency => Self::Emergency,
        }
    }
}

impl From<&Message> for MessagePayload {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.to_string(),
            content: m.content.clone(),
            priority: m.priority.value(),
            duration_secs: m.duration.map(|d| d.as_secs()),
            template_id: m.template_id.as_ref().map(ToString::to_string),
            issued_at: m.issued_at,
        }
    }
}

/// The command that carries `message` to a sign.
pub fn command_for(message: &Message) -> SignCommand {
    let payload = MessagePayload::from(message);
    match &message.source {
        MessageSource::Override { id, mode } => SignCommand::Override {
            data: OverridePayload {
                override_id: id.to_string(),
                mode: (*mode).into(),
                message: payload,
            },
        },
        MessageSource::Schedule { .. } | MessageSource::Direct => {
            SignCommand::NewMessage { data: payload }
        }
    }
}

// ── Schedule ─────────────────────────────────────────────────────────

impl From<&TimeWindow> for WindowPayload {
    fn from(w: &TimeWindow) -> Self {
        Self {
            start: w.start.format("%H:%M").to_string(),
            end: w.end.format("%H:%M").to_string(),
        }
    }
}

impl TryFrom<&WindowPayload> for TimeWindow {
    type Error = CoreError;

    fn try_from(w: &WindowPayload) -> Result<Self, Self::Error> {
        TimeWindow::parse(&w.start, &w.end)
    }
}

impl From<&ScheduleEntry> for SchedulePayload {
    fn from(e: &ScheduleEntry) -> Self {
        let window = WindowPayload::from(&e.window);
        Self {
            id: e.id.to_string(),
            template_id: e.template_id.to_string(),
            zones: e.zones.names(),
            start_time: window.start,
            end_time: window.end,
            frequency_minutes: e
                .frequency
                .map_or(0, |f| u32::try_from(f.as_secs() / 60).unwrap_or(u32::MAX)),
            duration_secs: e.duration.as_secs(),
            priority: e.priority.value(),
            enabled: e.enabled,
            active_days: e.active_days.as_ref().map(|days| {
                days.iter()
                    .map(|d| d.to_string().to_lowercase())
                    .collect()
            }),
            blackouts: e.blackouts.iter().map(WindowPayload::from).collect(),
        }
    }
}

impl TryFrom<&SchedulePayload> for ScheduleEntry {
    type Error = CoreError;

    fn try_from(p: &SchedulePayload) -> Result<Self, Self::Error> {
        let active_days = p
            .active_days
            .as_ref()
            .map(|days| {
                days.iter()
                    .map(|d| {
                        d.parse::<Weekday>().map_err(|_| {
                            CoreError::invalid(format!("schedule entry {}: unknown day '{d}'", p.id))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let entry = ScheduleEntry {
            id: p.id.as_str().into(),
            template_id: p.template_id.as_str().into(),
            zones: ZoneSelector::from_names(&p.zones),
            window: TimeWindow::parse(&p.start_time, &p.end_time)?,
            frequency: (p.frequency_minutes > 0)
                .then(|| Duration::from_secs(u64::from(p.frequency_minutes) * 60)),
            duration: Duration::from_secs(p.duration_secs),
            priority: Priority::new(p.priority)?,
            enabled: p.enabled,
            active_days,
            blackouts: p
                .blackouts
                .iter()
                .map(TimeWindow::try_from)
                .collect::<Result<_, _>>()?,
        };
        entry.validate()?;
        Ok(entry)
    }
}

// ── Heartbeats ───────────────────────────────────────────────────────

/// Copy every reading the heartbeat carries onto the sign record.
pub(crate) fn apply_heartbeat(sign: &mut Sign, data: &HeartbeatData) {
    if let Some(battery) = data.battery {
        sign.battery = Some(battery.min(100));
    }
    if let Some(signal) = data.signal_strength {
        sign.signal_strength = Some(signal);
    }
    if let Some(density) = data.crowd_density {
        sign.crowd_density = Some(density);
    }
    if let Some(count) = data.crowd_count {
        sign.crowd_count = Some(count);
    }
    if let Some(network) = &data.network_type {
        sign.network_type = Some(network.clone());
    }
    if let Some(uptime) = data.uptime_seconds {
        sign.uptime_seconds = Some(uptime);
    }
    if let Some(current) = data.current_message_id.as_deref() {
        if let Ok(id) = current.parse() {
            sign.current_message = Some(id);
        }
    }
}
