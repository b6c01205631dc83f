// ── Runtime hub configuration ──
//
// Timing and threshold knobs for the hub. Built by the binary from the
// config crate and handed in; core never reads config files.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::error::CoreError;

/// Configuration for a running [`Hub`](crate::Hub).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Interval signs are expected to heartbeat at.
    pub heartbeat_interval: Duration,
    /// Missed intervals tolerated before a sign is declared offline.
    pub timeout_multiplier: u32,
    /// How long a sent message may wait for its ack.
    pub ack_timeout: Duration,
    /// Re-sends attempted after an ack timeout while the sign is live.
    pub max_retries: u32,
    /// Cadence of the liveness and delivery sweeps.
    pub sweep_interval: Duration,
    /// Cadence of the priority scheduler.
    pub scheduler_tick: Duration,
    /// Battery percentage below which a sign is flagged.
    pub battery_threshold_pct: u8,
    /// Signal strength below which a sign is flagged.
    pub signal_floor: i32,
    /// Offset of the venue's local time from UTC, in minutes. Schedule
    /// windows are evaluated in this time.
    pub utc_offset_minutes: i32,
    /// Display duration for Insert overrides that name none.
    pub default_insert_duration: Duration,
    /// How long acknowledged or expired delivery records are kept.
    pub record_retention: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            timeout_multiplier: 6,
            ack_timeout: Duration::from_secs(10),
            max_retries: 3,
            sweep_interval: Duration::from_secs(1),
            scheduler_tick: Duration::from_secs(10),
            battery_threshold_pct: 10,
            signal_floor: 20,
            utc_offset_minutes: 0,
            default_insert_duration: Duration::from_secs(30),
            record_retention: Duration::from_secs(3600),
        }
    }
}

impl HubConfig {
    /// Silence after which a sign is declared offline.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.timeout_multiplier
    }

    /// The venue's fixed UTC offset.
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }

    /// Reject configurations the periodic tasks cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.heartbeat_interval.is_zero() {
            return Err(CoreError::invalid("heartbeat_interval must be positive"));
        }
        if self.timeout_multiplier == 0 {
            return Err(CoreError::invalid("timeout_multiplier must be at least 1"));
        }
        if self.ack_timeout.is_zero() {
            return Err(CoreError::invalid("ack_timeout must be positive"));
        }
        if self.sweep_interval.is_zero() || self.scheduler_tick.is_zero() {
            return Err(CoreError::invalid("sweep and scheduler intervals must be positive"));
        }
        if self.battery_threshold_pct > 100 {
            return Err(CoreError::invalid("battery_threshold_pct must be within 0-100"));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(CoreError::invalid("utc_offset_minutes must be within one day"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_thirty_seconds() {
        let config = HubConfig::default();
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_multiplier_is_rejected() {
        let config = HubConfig {
            timeout_multiplier: 0,
            ..HubConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::ConfigInvalid { .. })));
    }

    #[test]
    fn utc_offset_in_minutes() {
        let config = HubConfig {
            utc_offset_minutes: -420,
            ..HubConfig::default()
        };
        assert_eq!(config.utc_offset().local_minus_utc(), -420 * 60);
    }
}
