// ── Liveness tracker ──
//
// Drives sign connection state from session events and heartbeats.
// Missing heartbeats for longer than the configured timeout is the only
// way a connected sign is declared offline. Health (battery, signal) is
// tracked on its own axis and never changes the connection state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cityarray_proto::wire::HeartbeatData;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::collaborators::Alerting;
use crate::config::HubConfig;
use crate::convert::apply_heartbeat;
use crate::delivery::DeliveryChannel;
use crate::event::{DashboardEvent, WarningKind};
use crate::model::message::after;
use crate::model::{ConnectionState, Sign, SignId, ZoneId};
use crate::session::{SessionHandle, SessionId, SessionOutbox};
use crate::store::SignRegistry;

/// A health threshold the latest heartbeat crossed downward.
enum Crossing {
    Battery(u8),
    Signal(i32),
}

pub struct LivenessTracker {
    registry: Arc<SignRegistry>,
    delivery: Arc<DeliveryChannel>,
    alerting: Arc<dyn Alerting>,
    events: broadcast::Sender<Arc<DashboardEvent>>,
    timeout: Duration,
    battery_threshold: u8,
    signal_floor: i32,
}

impl LivenessTracker {
    pub fn new(
        registry: Arc<SignRegistry>,
        delivery: Arc<DeliveryChannel>,
        alerting: Arc<dyn Alerting>,
        events: broadcast::Sender<Arc<DashboardEvent>>,
        config: &HubConfig,
    ) -> Self {
        Self {
            registry,
            delivery,
            alerting,
            events,
            timeout: config.heartbeat_timeout(),
            battery_threshold: config.battery_threshold_pct,
            signal_floor: config.signal_floor,
        }
    }

    // ── Session events ───────────────────────────────────────────────

    /// Register the sign if needed and bind a fresh session to it. The
    /// sign is `connecting` until its first heartbeat. A session still
    /// bound from an earlier connection is replaced.
    pub fn open(
        &self,
        sign_id: &SignId,
        zone: Option<ZoneId>,
        name: Option<String>,
        now: DateTime<Utc>,
    ) -> (Arc<Sign>, SessionOutbox) {
        let registered = self.registry.register(sign_id, zone, name, now);
        let (handle, outbox) = SessionHandle::open(sign_id.clone());
        let session = handle.id();

        if let Some(replaced) = self.registry.bind(handle) {
            debug!(sign_id = %sign_id, old = %replaced.id(), new = %session, "session replaced");
            // Anything in flight on the old socket goes out again on the new one.
            self.delivery.requeue(sign_id, now);
        }

        let sign = self
            .registry
            .update(sign_id, |s| {
                s.connection = ConnectionState::Connecting;
                s.connected_at = Some(now);
            })
            .unwrap_or(registered);

        info!(sign_id = %sign_id, zone = %sign.zone, %session, "sign connected");
        self.emit(DashboardEvent::SignConnected {
            sign_id: sign_id.clone(),
            zone: sign.zone.clone(),
            at: now,
        });
        (sign, outbox)
    }

    /// Handle a session's socket closing. A close from a session that was
    /// already replaced is ignored.
    pub fn close(&self, sign_id: &SignId, session: SessionId, now: DateTime<Utc>) -> bool {
        if !self.registry.unbind(sign_id, session) {
            debug!(sign_id = %sign_id, %session, "ignoring close of stale session");
            return false;
        }
        self.emit(DashboardEvent::SignDisconnected {
            sign_id: sign_id.clone(),
            at: now,
        });
        self.mark_offline(sign_id, now);
        true
    }

    /// Apply a heartbeat. Returns the updated record, or `None` when the
    /// heartbeat came from a session that is no longer current.
    pub fn heartbeat(
        &self,
        sign_id: &SignId,
        session: SessionId,
        data: &HeartbeatData,
        now: DateTime<Utc>,
    ) -> Option<Arc<Sign>> {
        if !self.registry.is_current(sign_id, session) {
            debug!(sign_id = %sign_id, %session, "heartbeat from stale session");
            return None;
        }

        let battery_threshold = self.battery_threshold;
        let signal_floor = self.signal_floor;
        let mut crossings = Vec::new();
        let mut came_online = false;

        let sign = self.registry.update(sign_id, |s| {
            apply_heartbeat(s, data);
            s.last_heartbeat = Some(now);
            came_online = s.connection != ConnectionState::Online;
            s.connection = ConnectionState::Online;

            if let Some(battery) = s.battery {
                let low = battery < battery_threshold;
                if low && !s.health.battery_low {
                    crossings.push(Crossing::Battery(battery));
                }
                s.health.battery_low = low;
            }
            if let Some(signal) = s.signal_strength {
                let weak = signal < signal_floor;
                if weak && !s.health.signal_weak {
                    crossings.push(Crossing::Signal(signal));
                }
                s.health.signal_weak = weak;
            }
        })?;

        if came_online {
            info!(sign_id = %sign_id, "sign online");
        }

        for crossing in crossings {
            match crossing {
                Crossing::Battery(value) => {
                    self.emit(DashboardEvent::Warning {
                        sign_id: sign_id.clone(),
                        kind: WarningKind::BatteryLow,
                        value: i32::from(value),
                        threshold: i32::from(battery_threshold),
                    });
                    self.alerting.battery_critical(&sign);
                }
                Crossing::Signal(value) => {
                    self.emit(DashboardEvent::Warning {
                        sign_id: sign_id.clone(),
                        kind: WarningKind::SignalWeak,
                        value,
                        threshold: signal_floor,
                    });
                }
            }
        }

        self.emit(DashboardEvent::SignUpdate {
            sign: (*sign).clone(),
        });
        Some(sign)
    }

    // ── Timeout sweep ────────────────────────────────────────────────

    /// Close every session that has been silent past the heartbeat
    /// timeout. Returns the signs taken offline.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<SignId> {
        let mut offline = Vec::new();
        for sign in self.registry.snapshot().iter().filter(|s| !s.is_offline()) {
            let Some(seen) = sign.last_seen() else {
                continue;
            };
            if after(seen, self.timeout).is_none_or(|deadline| deadline > now) {
                continue;
            }

            if let Some(handle) = self.registry.unbind_any(&sign.id) {
                debug!(sign_id = %sign.id, session = %handle.id(), "closing silent session");
            }
            if self.mark_offline(&sign.id, now) {
                offline.push(sign.id.clone());
            }
        }
        offline
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Transition to offline. Only the first call of an episode reports.
    fn mark_offline(&self, sign_id: &SignId, now: DateTime<Utc>) -> bool {
        let mut transitioned = false;
        let Some(sign) = self.registry.update(sign_id, |s| {
            if s.connection != ConnectionState::Offline {
                s.connection = ConnectionState::Offline;
                transitioned = true;
            }
        }) else {
            return false;
        };
        if !transitioned {
            return false;
        }

        let requeued = self.delivery.requeue(sign_id, now);
        info!(sign_id = %sign_id, requeued, "sign offline");
        self.emit(DashboardEvent::SignOffline {
            sign_id: sign_id.clone(),
            last_seen: sign.last_seen(),
            at: now,
        });
        self.alerting.sign_offline(&sign);
        true
    }

    fn emit(&self, event: DashboardEvent) {
        let _ = self.events.send(Arc::new(event));
    }
}
