// ── External collaborators ──
//
// Narrow interfaces to everything outside the synchronization core:
// template rendering, persistence, alerting and live data feeds. Each
// has a default implementation good enough to run the hub standalone.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::model::{Message, Override, ScheduleEntry, Sign, SignId, TemplateId, ZoneId};

// ── Template rendering ───────────────────────────────────────────────

pub trait TemplateRenderer: Send + Sync {
    /// Render `template` with `bindings` substituted.
    fn render(
        &self,
        template: &TemplateId,
        bindings: &BTreeMap<String, String>,
    ) -> Result<String, CoreError>;

    /// Raw template body, shipped to signs for offline use.
    fn body(&self, template: &TemplateId) -> Option<String>;
}

/// Replace `{name}` placeholders with their bindings. Unknown names and
/// stray braces are left as written.
pub fn fill_placeholders(body: &str, bindings: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        match tail.find('}') {
            Some(close) if is_placeholder_name(&tail[..close]) => {
                let key = &tail[..close];
                match bindings.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &tail[close + 1..];
            }
            _ => {
                out.push('{');
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_placeholder_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// In-memory templates with `{name}` substitution.
#[derive(Default)]
pub struct BraceRenderer {
    templates: DashMap<TemplateId, String>,
}

impl BraceRenderer {
    pub fn new<I, K, V>(templates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<TemplateId>,
        V: Into<String>,
    {
        Self {
            templates: templates
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert(&self, id: impl Into<TemplateId>, body: impl Into<String>) {
        self.templates.insert(id.into(), body.into());
    }
}

impl TemplateRenderer for BraceRenderer {
    fn render(
        &self,
        template: &TemplateId,
        bindings: &BTreeMap<String, String>,
    ) -> Result<String, CoreError> {
        let body = self
            .templates
            .get(template)
            .ok_or_else(|| CoreError::TemplateNotFound {
                template_id: template.clone(),
            })?;
        Ok(fill_placeholders(body.value(), bindings))
    }

    fn body(&self, template: &TemplateId) -> Option<String> {
        self.templates.get(template).map(|b| b.value().clone())
    }
}

// ── Data feeds ───────────────────────────────────────────────────────

/// Latest external readings (weather, transit, wait times) as template
/// bindings.
pub trait DataFeed: Send + Sync {
    fn bindings(&self, zone: &ZoneId) -> BTreeMap<String, String>;
}

/// Feed whose values are set by hand. Zone values shadow global ones.
#[derive(Default)]
pub struct StaticFeed {
    global: DashMap<String, String>,
    zones: DashMap<ZoneId, BTreeMap<String, String>>,
}

impl StaticFeed {
    pub fn set_global(&self, key: impl Into<String>, value: impl Into<String>) {
        self.global.insert(key.into(), value.into());
    }

    pub fn set(&self, zone: &ZoneId, key: impl Into<String>, value: impl Into<String>) {
        self.zones
            .entry(zone.clone())
            .or_default()
            .insert(key.into(), value.into());
    }
}

impl DataFeed for StaticFeed {
    fn bindings(&self, zone: &ZoneId) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = self
            .global
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        if let Some(zone_values) = self.zones.get(zone) {
            out.extend(zone_values.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }
}

// ── Persistence ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub sign_id: Option<SignId>,
    pub action: String,
    pub detail: String,
}

pub trait Persistence: Send + Sync {
    fn record_message(&self, message: &Message);
    fn record_schedule(&self, entry: &ScheduleEntry);
    fn record_audit(&self, event: &AuditEvent);
}

/// Discards everything.
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn record_message(&self, _message: &Message) {}
    fn record_schedule(&self, _entry: &ScheduleEntry) {}
    fn record_audit(&self, _event: &AuditEvent) {}
}

/// Keeps everything in memory. Handy for tests and short-lived hubs.
#[derive(Default)]
pub struct MemoryPersistence {
    messages: Mutex<Vec<Message>>,
    schedule: Mutex<Vec<ScheduleEntry>>,
    audit: Mutex<Vec<AuditEvent>>,
}

impl MemoryPersistence {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn schedule(&self) -> Vec<ScheduleEntry> {
        self.schedule.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn audit(&self) -> Vec<AuditEvent> {
        self.audit.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Persistence for MemoryPersistence {
    fn record_message(&self, message: &Message) {
        if let Ok(mut v) = self.messages.lock() {
            v.push(message.clone());
        }
    }

    fn record_schedule(&self, entry: &ScheduleEntry) {
        if let Ok(mut v) = self.schedule.lock() {
            v.push(entry.clone());
        }
    }

    fn record_audit(&self, event: &AuditEvent) {
        if let Ok(mut v) = self.audit.lock() {
            v.push(event.clone());
        }
    }
}

// ── Alerting ─────────────────────────────────────────────────────────

pub trait Alerting: Send + Sync {
    fn emergency_override(&self, ov: &Override);
    fn sign_offline(&self, sign: &Sign);
    fn battery_critical(&self, sign: &Sign);
}

/// Alerts go to the log.
pub struct TracingAlerting;

impl Alerting for TracingAlerting {
    fn emergency_override(&self, ov: &Override) {
        warn!(
            override_id = %ov.id,
            role = ov.role.name(),
            content = %ov.message.content,
            "EMERGENCY override activated"
        );
    }

    fn sign_offline(&self, sign: &Sign) {
        info!(sign_id = %sign.id, zone = %sign.zone, "sign offline");
    }

    fn battery_critical(&self, sign: &Sign) {
        warn!(
            sign_id = %sign.id,
            battery = sign.battery.unwrap_or_default(),
            "sign battery critical"
        );
    }
}

// ── Bundle ───────────────────────────────────────────────────────────

/// The set of collaborators a hub is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn TemplateRenderer>,
    pub feed: Arc<dyn DataFeed>,
    pub persistence: Arc<dyn Persistence>,
    pub alerting: Arc<dyn Alerting>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            renderer: Arc::new(BraceRenderer::default()),
            feed: Arc::new(StaticFeed::default()),
            persistence: Arc::new(NullPersistence),
            alerting: Arc::new(TracingAlerting),
        }
    }
}
