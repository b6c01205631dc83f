// ── Schedule domain types ──
//
// Schedule entries are recurring rules evaluated against the venue's local
// wall-clock time. Windows are `HH:MM` times of day; a window whose end
// precedes its start runs past midnight.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use super::ids::{ScheduleId, TemplateId, ZoneId};
use super::message::Priority;
use crate::error::CoreError;

const SECONDS_PER_DAY: i64 = 86_400;

// ── TimeWindow ──────────────────────────────────────────────────────

/// A daily window `[start, end)`. Equal bounds cover the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse two `HH:MM` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, CoreError> {
        Ok(Self::new(parse_hhmm(start)?, parse_hhmm(end)?))
    }

    /// A window of `length` starting at `start`, wrapping if needed.
    pub fn starting_at(start: NaiveTime, length: Duration) -> Self {
        let secs = i64::try_from(length.as_secs()).unwrap_or(SECONDS_PER_DAY);
        let (end, _) = start.overflowing_add_signed(chrono::TimeDelta::seconds(
            secs.clamp(60, SECONDS_PER_DAY - 60),
        ));
        Self::new(start, end)
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        match self.start.cmp(&self.end) {
            Ordering::Equal => true,
            Ordering::Less => self.start <= t && t < self.end,
            Ordering::Greater => t >= self.start || t < self.end,
        }
    }

    /// Seconds since the window last opened, as seen at `t`.
    fn since_start(&self, t: NaiveTime) -> i64 {
        t.signed_duration_since(self.start)
            .num_seconds()
            .rem_euclid(SECONDS_PER_DAY)
    }
}

/// Parse an `HH:MM` time of day.
pub fn parse_hhmm(raw: &str) -> Result<NaiveTime, CoreError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| CoreError::invalid(format!("invalid time of day '{raw}': {e}")))
}

// ── Zone selection ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneSelector {
    All,
    Zones(BTreeSet<ZoneId>),
}

impl ZoneSelector {
    /// `"all"` (or an empty list) selects every zone.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut zones = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            if name.eq_ignore_ascii_case("all") {
                return Self::All;
            }
            zones.insert(ZoneId::from(name));
        }
        if zones.is_empty() {
            Self::All
        } else {
            Self::Zones(zones)
        }
    }

    pub fn applies_to(&self, zone: &ZoneId) -> bool {
        match self {
            Self::All => true,
            Self::Zones(zones) => zones.contains(zone),
        }
    }

    pub fn names(&self) -> Vec<String> {
        match self {
            Self::All => Vec::new(),
            Self::Zones(zones) => zones.iter().map(ToString::to_string).collect(),
        }
    }
}

// ── ScheduleEntry ───────────────────────────────────────────────────

/// A recurring content rule. Read by the scheduler; never touched by signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: ScheduleId,
    pub template_id: TemplateId,
    pub zones: ZoneSelector,
    pub window: TimeWindow,
    /// Re-emit period while active. `None` emits once per activation.
    pub frequency: Option<Duration>,
    /// Display duration of each emitted message.
    pub duration: Duration,
    pub priority: Priority,
    pub enabled: bool,
    /// Weekdays the entry runs on. `None` means every day.
    pub active_days: Option<Vec<Weekday>>,
    /// Windows in which this entry is held back.
    pub blackouts: Vec<TimeWindow>,
}

impl ScheduleEntry {
    /// An enabled entry for every zone, emitted once per activation and
    /// shown for 30 seconds.
    pub fn new(
        id: impl Into<ScheduleId>,
        template_id: impl Into<TemplateId>,
        window: TimeWindow,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            template_id: template_id.into(),
            zones: ZoneSelector::All,
            window,
            frequency: None,
            duration: Duration::from_secs(30),
            priority,
            enabled: true,
            active_days: None,
            blackouts: Vec::new(),
        }
    }

    /// Admission check run before an entry reaches the scheduler.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.as_str().is_empty() {
            return Err(CoreError::invalid("schedule entry id is empty"));
        }
        if self.template_id.as_str().is_empty() {
            return Err(CoreError::invalid(format!(
                "schedule entry {} names no template",
                self.id
            )));
        }
        if self.duration.is_zero() {
            return Err(CoreError::invalid(format!(
                "schedule entry {} has a zero display duration",
                self.id
            )));
        }
        if self.frequency.is_some_and(|f| f.is_zero()) {
            return Err(CoreError::invalid(format!(
                "schedule entry {} has a zero frequency",
                self.id
            )));
        }
        if let ZoneSelector::Zones(zones) = &self.zones {
            if zones.is_empty() {
                return Err(CoreError::invalid(format!(
                    "schedule entry {} targets no zones",
                    self.id
                )));
            }
        }
        if self.active_days.as_ref().is_some_and(Vec::is_empty) {
            return Err(CoreError::invalid(format!(
                "schedule entry {} is active on no days",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether the entry's own rules admit it at local time `local`.
    /// Zone-level blackouts are checked separately.
    pub fn is_active_at(&self, local: NaiveDateTime) -> bool {
        let t = local.time();
        if !self.enabled || !self.window.contains(t) {
            return false;
        }

        if let Some(days) = &self.active_days {
            // The after-midnight tail of a wrapping window belongs to the
            // day it opened on.
            let opened_on = if self.window.wraps_midnight() && t < self.window.end {
                local.date().pred_opt().unwrap_or(local.date()).weekday()
            } else {
                local.date().weekday()
            };
            if !days.contains(&opened_on) {
                return false;
            }
        }

        self.priority.is_emergency() || !self.blackouts.iter().any(|b| b.contains(t))
    }
}

// ── Blackout ────────────────────────────────────────────────────────

/// A zone-scoped window in which non-emergency entries are held back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blackout {
    pub zones: ZoneSelector,
    pub window: TimeWindow,
}

impl Blackout {
    pub fn suppresses(&self, entry: &ScheduleEntry, zone: &ZoneId, t: NaiveTime) -> bool {
        !entry.priority.is_emergency() && self.zones.applies_to(zone) && self.window.contains(t)
    }
}

// ── Selection ───────────────────────────────────────────────────────

/// The entry that should be showing in `zone` at local time `local`.
///
/// Highest priority wins; ties go to the most recently opened window,
/// then to the lexically smallest id.
pub fn select_active<'a, I>(
    entries: I,
    blackouts: &[Blackout],
    zone: &ZoneId,
    local: NaiveDateTime,
) -> Option<&'a ScheduleEntry>
where
    I: IntoIterator<Item = &'a ScheduleEntry>,
{
    let t = local.time();
    entries
        .into_iter()
        .filter(|e| e.zones.applies_to(zone) && e.is_active_at(local))
        .filter(|e| !blackouts.iter().any(|b| b.suppresses(e, zone, t)))
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.window.since_start(t).cmp(&a.window.since_start(t)))
                .then_with(|| b.id.cmp(&a.id))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at(hh: u32, mm: u32) -> NaiveDateTime {
        // 2026-07-04 is a Saturday
        NaiveDate::from_ymd_opt(2026, 7, 4)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    fn entry(id: &str, start: &str, end: &str, priority: u8) -> ScheduleEntry {
        ScheduleEntry::new(
            id,
            id,
            TimeWindow::parse(start, end).unwrap(),
            Priority::new(priority).unwrap(),
        )
    }

    #[test]
    fn window_contains_is_half_open() {
        let w = TimeWindow::parse("18:00", "23:00").unwrap();
        assert!(w.contains(at(18, 0).time()));
        assert!(w.contains(at(22, 59).time()));
        assert!(!w.contains(at(23, 0).time()));
        assert!(!w.contains(at(17, 59).time()));
    }

    #[test]
    fn window_wraps_midnight() {
        let w = TimeWindow::parse("22:00", "02:00").unwrap();
        assert!(w.wraps_midnight());
        assert!(w.contains(at(23, 30).time()));
        assert!(w.contains(at(1, 0).time()));
        assert!(!w.contains(at(2, 0).time()));
        assert!(!w.contains(at(12, 0).time()));
    }

    #[test]
    fn equal_bounds_cover_the_day() {
        let w = TimeWindow::parse("00:00", "00:00").unwrap();
        assert!(w.contains(at(0, 0).time()));
        assert!(w.contains(at(13, 37).time()));
    }

    #[test]
    fn window_from_start_and_length() {
        let w = TimeWindow::starting_at(parse_hhmm("19:12").unwrap(), Duration::from_secs(300));
        assert_eq!(w.end, parse_hhmm("19:17").unwrap());
        let w = TimeWindow::starting_at(parse_hhmm("23:58").unwrap(), Duration::from_secs(300));
        assert!(w.wraps_midnight());
    }

    #[test]
    fn bad_time_is_rejected() {
        assert!(parse_hhmm("25:00").is_err());
        assert!(parse_hhmm("noon").is_err());
    }

    #[test]
    fn highest_priority_wins() {
        let sponsor = entry("sponsor", "18:00", "23:00", 1);
        let weather = entry("weather-alert", "19:12", "19:17", 80);
        let entries = [sponsor, weather];
        let zone = ZoneId::from("A");

        let pick = |hh, mm| select_active(&entries, &[], &zone, at(hh, mm)).map(|e| e.id.as_str());
        assert_eq!(pick(19, 12), Some("weather-alert"));
        assert_eq!(pick(19, 20), Some("sponsor"));
        assert_eq!(pick(17, 0), None);
    }

    #[test]
    fn equal_priority_prefers_most_recent_start() {
        let early = entry("early", "18:00", "23:00", 10);
        let late = entry("late", "20:00", "23:00", 10);
        let entries = [early, late];
        let zone = ZoneId::from("A");

        assert_eq!(
            select_active(&entries, &[], &zone, at(21, 0)).unwrap().id.as_str(),
            "late"
        );
        assert_eq!(
            select_active(&entries, &[], &zone, at(19, 0)).unwrap().id.as_str(),
            "early"
        );
    }

    #[test]
    fn full_tie_resolves_by_id() {
        let entries = [entry("b", "18:00", "23:00", 10), entry("a", "18:00", "23:00", 10)];
        let zone = ZoneId::from("A");
        assert_eq!(
            select_active(&entries, &[], &zone, at(19, 0)).unwrap().id.as_str(),
            "a"
        );
    }

    #[test]
    fn zone_blackout_holds_back_non_emergency() {
        let info = entry("info", "18:00", "23:00", 50);
        let alarm = entry("alarm", "18:00", "23:00", 95);
        let blackout = Blackout {
            zones: ZoneSelector::from_names(["A"]),
            window: TimeWindow::parse("20:00", "21:00").unwrap(),
        };
        let zone_a = ZoneId::from("A");
        let zone_b = ZoneId::from("B");

        let only_info = [info.clone()];
        assert!(select_active(&only_info, std::slice::from_ref(&blackout), &zone_a, at(20, 30)).is_none());
        assert!(select_active(&only_info, std::slice::from_ref(&blackout), &zone_b, at(20, 30)).is_some());

        let both = [info, alarm];
        assert_eq!(
            select_active(&both, &[blackout], &zone_a, at(20, 30))
                .unwrap()
                .id
                .as_str(),
            "alarm"
        );
    }

    #[test]
    fn entry_blackout_and_disabled() {
        let mut e = entry("promo", "18:00", "23:00", 5);
        e.blackouts.push(TimeWindow::parse("19:00", "19:30").unwrap());
        assert!(!e.is_active_at(at(19, 15)));
        assert!(e.is_active_at(at(19, 45)));

        e.enabled = false;
        assert!(!e.is_active_at(at(19, 45)));
    }

    #[test]
    fn active_days_follow_window_opening_day() {
        let mut e = entry("late-show", "22:00", "02:00", 5);
        e.active_days = Some(vec![Weekday::Fri]);
        // Saturday 01:00 is the tail of Friday's window
        assert!(e.is_active_at(at(1, 0)));
        // Saturday 22:30 opens on Saturday
        assert!(!e.is_active_at(at(22, 30)));
    }

    #[test]
    fn zone_selection_restricts_entries() {
        let mut e = entry("north-only", "00:00", "00:00", 5);
        e.zones = ZoneSelector::from_names(["north"]);
        let entries = [e];
        assert!(select_active(&entries, &[], &"north".into(), at(12, 0)).is_some());
        assert!(select_active(&entries, &[], &"south".into(), at(12, 0)).is_none());
        assert_eq!(ZoneSelector::from_names(["all"]), ZoneSelector::All);
    }

    #[test]
    fn validation_rejects_bad_entries() {
        let mut e = entry("x", "18:00", "19:00", 5);
        assert!(e.validate().is_ok());

        e.duration = Duration::ZERO;
        assert!(e.validate().is_err());

        let mut e = entry("x", "18:00", "19:00", 5);
        e.frequency = Some(Duration::ZERO);
        assert!(e.validate().is_err());

        let mut e = entry("x", "18:00", "19:00", 5);
        e.zones = ZoneSelector::Zones(BTreeSet::new());
        assert!(e.validate().is_err());
    }
}
