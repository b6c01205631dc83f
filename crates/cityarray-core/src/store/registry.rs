// ── Sign registry ──
//
// Indexed table of every sign: the status record (reactive collection)
// plus the live session handle, both keyed by sign id. Status records are
// only ever marked offline, never removed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::collection::EntityCollection;
use crate::model::{Sign, SignId, ZoneId};
use crate::session::{SessionHandle, SessionId};
use crate::stream::SignStream;

pub struct SignRegistry {
    signs: EntityCollection<SignId, Sign>,
    sessions: DashMap<SignId, SessionHandle>,
}

impl SignRegistry {
    pub fn new() -> Self {
        Self {
            signs: EntityCollection::new(),
            sessions: DashMap::new(),
        }
    }

    // ── Status records ───────────────────────────────────────────────

    /// Register a sign, or return the existing record. A sign's zone is
    /// fixed at first registration.
    pub fn register(
        &self,
        id: &SignId,
        zone: Option<ZoneId>,
        name: Option<String>,
        now: DateTime<Utc>,
    ) -> Arc<Sign> {
        let (sign, created) = self.signs.get_or_insert_with(id.clone(), || {
            Sign::new(
                id.clone(),
                zone.clone().unwrap_or_else(ZoneId::unassigned),
                name.clone(),
                now,
            )
        });
        if created {
            debug!(sign_id = %id, zone = %sign.zone, "sign registered");
            return sign;
        }

        if let Some(requested) = zone.as_ref().filter(|z| **z != sign.zone) {
            debug!(sign_id = %id, zone = %sign.zone, %requested, "ignoring zone change on re-registration");
        }
        if name.is_some() && name != sign.name {
            if let Some(updated) = self.update(id, |s| s.name = name) {
                return updated;
            }
        }
        sign
    }

    pub fn get(&self, id: &SignId) -> Option<Arc<Sign>> {
        self.signs.get(id)
    }

    /// Mutate a sign's record in place, returning the updated record.
    pub fn update(&self, id: &SignId, f: impl FnOnce(&mut Sign)) -> Option<Arc<Sign>> {
        self.signs.update(id, f)?;
        self.signs.get(id)
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<Sign>>> {
        self.signs.snapshot()
    }

    pub fn subscribe(&self) -> SignStream {
        SignStream::new(self.signs.subscribe())
    }

    pub fn len(&self) -> usize {
        self.signs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn signs_in_zone(&self, zone: &ZoneId) -> Vec<Arc<Sign>> {
        self.snapshot()
            .iter()
            .filter(|s| &s.zone == zone)
            .cloned()
            .collect()
    }

    /// Every zone with at least one registered sign.
    pub fn zones(&self) -> BTreeSet<ZoneId> {
        self.snapshot().iter().map(|s| s.zone.clone()).collect()
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Bind a session to its sign, returning the session it replaced.
    pub fn bind(&self, handle: SessionHandle) -> Option<SessionHandle> {
        self.sessions.insert(handle.sign_id().clone(), handle)
    }

    /// Drop the sign's session if it is still `session`. A late close
    /// from a replaced session leaves the newer one alone.
    pub fn unbind(&self, id: &SignId, session: SessionId) -> bool {
        self.sessions
            .remove_if(id, |_, handle| handle.id() == session)
            .is_some()
    }

    /// Drop whatever session the sign has.
    pub fn unbind_any(&self, id: &SignId) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, handle)| handle)
    }

    pub fn session(&self, id: &SignId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|r| r.value().clone())
    }

    pub fn is_current(&self, id: &SignId, session: SessionId) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|handle| handle.id() == session)
    }
}

impl Default for SignRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-07-04T18:00:00Z".parse().unwrap()
    }

    #[test]
    fn register_is_idempotent_and_keeps_zone() {
        let reg = SignRegistry::new();
        let id = SignId::from("s1");
        let first = reg.register(&id, Some("A".into()), None, now());
        assert_eq!(first.zone, ZoneId::from("A"));

        let again = reg.register(&id, Some("B".into()), Some("Gate 1".into()), now());
        assert_eq!(again.zone, ZoneId::from("A"));
        assert_eq!(again.name.as_deref(), Some("Gate 1"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn register_without_zone_is_unassigned() {
        let reg = SignRegistry::new();
        let sign = reg.register(&"s1".into(), None, None, now());
        assert_eq!(sign.zone, ZoneId::unassigned());
    }

    #[test]
    fn zone_queries() {
        let reg = SignRegistry::new();
        reg.register(&"s1".into(), Some("A".into()), None, now());
        reg.register(&"s2".into(), Some("A".into()), None, now());
        reg.register(&"s3".into(), Some("B".into()), None, now());

        assert_eq!(reg.signs_in_zone(&"A".into()).len(), 2);
        assert_eq!(
            reg.zones().into_iter().collect::<Vec<_>>(),
            vec![ZoneId::from("A"), ZoneId::from("B")]
        );
    }

    #[test]
    fn stale_unbind_leaves_newer_session() {
        let reg = SignRegistry::new();
        let id = SignId::from("s1");
        let (old, _old_out) = SessionHandle::open(id.clone());
        let (new, _new_out) = SessionHandle::open(id.clone());
        let old_id = old.id();
        let new_id = new.id();

        assert!(reg.bind(old).is_none());
        let replaced = reg.bind(new).unwrap();
        assert_eq!(replaced.id(), old_id);

        assert!(!reg.unbind(&id, old_id));
        assert!(reg.is_current(&id, new_id));
        assert!(reg.unbind(&id, new_id));
        assert!(reg.session(&id).is_none());
    }
}
