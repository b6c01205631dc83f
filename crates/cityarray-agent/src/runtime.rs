// ── Sign agent runtime ──
//
// Drives an `AgentCore` from a live hub link, a backoff timer and the
// local console. One task owns the core; nothing here decides content.

use std::sync::Arc;

use chrono::Utc;
use cityarray_core::Decision;
use cityarray_proto::wire::HeartbeatData;
use cityarray_proto::{SignEvent, SignLink};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::LocalCache;
use crate::config::AgentConfig;
use crate::machine::{AgentCore, Outcome, Screen};
use crate::emergency::LocalCommand;
use crate::error::AgentError;
use crate::state::LinkState;

// ── Peripherals ──────────────────────────────────────────────────────

/// The physical display.
pub trait DisplaySink: Send + Sync {
    fn show(&self, decision: &Decision);
    fn blank(&self);
}

/// Source of heartbeat readings (battery, signal, crowd counts).
pub trait StatusProbe: Send + Sync {
    fn sample(&self) -> HeartbeatData;
}

/// Display that only logs. Useful headless and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDisplay;

impl DisplaySink for TracingDisplay {
    fn show(&self, decision: &Decision) {
        tracing::info!(
            priority = decision.priority.value(),
            source = ?decision.source,
            content = %decision.content,
            "display"
        );
    }

    fn blank(&self) {
        tracing::info!("display cleared");
    }
}

/// Reports fixed readings for signs without sensors.
#[derive(Debug, Clone)]
pub struct FixedStatus(pub HeartbeatData);

impl Default for FixedStatus {
    fn default() -> Self {
        Self(HeartbeatData {
            battery: Some(100),
            signal_strength: Some(95),
            network_type: Some("wifi".into()),
            ..HeartbeatData::default()
        })
    }
}

impl StatusProbe for FixedStatus {
    fn sample(&self) -> HeartbeatData {
        self.0.clone()
    }
}

// ── SignAgent ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Stopped,
}

/// A sign's long-running agent.
pub struct SignAgent {
    config: AgentConfig,
    url: Url,
    core: AgentCore,
    display: Arc<dyn DisplaySink>,
    probe: Arc<dyn StatusProbe>,
    state_tx: watch::Sender<LinkState>,
}

impl SignAgent {
    /// Validate the config and load the offline cache.
    pub fn new(
        config: AgentConfig,
        display: Arc<dyn DisplaySink>,
        probe: Arc<dyn StatusProbe>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let url = config.link_url()?;
        let cache = LocalCache::open(&config.cache_path)?;
        let core = AgentCore::new(&config, cache);
        let (state_tx, _) = watch::channel(core.state());
        Ok(Self {
            config,
            url,
            core,
            display,
            probe,
            state_tx,
        })
    }

    /// Subscribe to link state changes.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Run until `cancel` fires. Local console commands arrive on
    /// `local`. Only non-transient link errors end the loop early.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        mut local: mpsc::Receiver<LocalCommand>,
    ) -> Result<(), AgentError> {
        let screen = self.core.refresh(Utc::now());
        self.paint(&screen);

        loop {
            let Some(connected) = self.dial(&cancel, &mut local).await else {
                break;
            };

            match connected {
                Ok(link) => {
                    if self.session(link, &cancel, &mut local).await == SessionEnd::Stopped {
                        break;
                    }
                    self.core.session_lost(Utc::now());
                }
                Err(e) if !e.is_transient() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(error = %e, attempt = self.core.state().attempt(), "Hub connect failed");
                    let screen = self.core.connect_failed(Utc::now());
                    self.paint(&screen);
                }
            }
            self.publish_state();

            if !self.wait_for_retry(&cancel, &mut local).await {
                break;
            }
        }

        tracing::debug!(sign_id = %self.config.sign_id, "Agent loop exiting");
        Ok(())
    }

    /// One connect attempt, bounded by `connect_timeout`. The console
    /// stays live while it runs. `None` means stop.
    async fn dial(
        &mut self,
        cancel: &CancellationToken,
        local: &mut mpsc::Receiver<LocalCommand>,
    ) -> Option<Result<SignLink, cityarray_proto::Error>> {
        let url = self.url.clone();
        let attempt = SignLink::connect(&url, self.config.connect_timeout);
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                Some(cmd) = local.recv() => {
                    // Already dialing; a manual reconnect only resets the count
                    let outcome = self.core.local(cmd, Utc::now());
                    self.paint(&outcome.screen);
                }
                result = &mut attempt => return Some(result),
            }
        }
    }

    // ── Connected ────────────────────────────────────────────────────

    async fn session(
        &mut self,
        mut link: SignLink,
        cancel: &CancellationToken,
        local: &mut mpsc::Receiver<LocalCommand>,
    ) -> SessionEnd {
        let reports = self.core.connected(Utc::now());
        self.publish_state();
        if !self.flush_reports(&mut link, reports).await {
            return SessionEnd::Lost;
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    link.close().await;
                    return SessionEnd::Stopped;
                }
                Some(cmd) = local.recv() => {
                    let outcome = self.core.local(cmd, Utc::now());
                    if !self.carry_out(&mut link, outcome).await {
                        return SessionEnd::Lost;
                    }
                    let reports = self.core.pending_reports();
                    if !self.flush_reports(&mut link, reports).await {
                        return SessionEnd::Lost;
                    }
                }
                _ = heartbeat.tick() => {
                    if !self.send_status(&mut link).await {
                        return SessionEnd::Lost;
                    }
                }
                frame = link.next_command() => match frame {
                    Ok(Some(command)) => {
                        let outcome = self.core.handle(command, Utc::now());
                        if !self.carry_out(&mut link, outcome).await {
                            return SessionEnd::Lost;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Hub closed the link");
                        return SessionEnd::Lost;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Hub link error");
                        return SessionEnd::Lost;
                    }
                },
            }
        }
    }

    /// Apply an outcome; `false` when the link failed underneath it.
    async fn carry_out(&self, link: &mut SignLink, outcome: Outcome) -> bool {
        self.paint(&outcome.screen);
        if let Some(message_id) = outcome.ack {
            if let Err(e) = link.send(&SignEvent::Ack { message_id }).await {
                tracing::warn!(error = %e, "Ack send failed");
                return false;
            }
        }
        if outcome.status_requested {
            return self.send_status(link).await;
        }
        true
    }

    async fn flush_reports(&mut self, link: &mut SignLink, reports: Vec<SignEvent>) -> bool {
        if reports.is_empty() {
            return true;
        }
        tracing::info!(count = reports.len(), "Sending offline reports");
        let mut sent = 0;
        for report in &reports {
            if let Err(e) = link.send(report).await {
                tracing::warn!(error = %e, sent, "Offline report send failed");
                self.core.reports_delivered(sent);
                return false;
            }
            sent += 1;
        }
        self.core.reports_delivered(sent);
        true
    }

    async fn send_status(&self, link: &mut SignLink) -> bool {
        let mut data = self.probe.sample();
        data.current_message_id = self.core.current_message_id();
        match link.send(&SignEvent::Heartbeat { data }).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Heartbeat send failed");
                false
            }
        }
    }

    // ── Disconnected ─────────────────────────────────────────────────

    /// Sit out the backoff delay while serving the console and, once
    /// autonomous, the cached schedule. `false` means stop.
    async fn wait_for_retry(
        &mut self,
        cancel: &CancellationToken,
        local: &mut mpsc::Receiver<LocalCommand>,
    ) -> bool {
        let delay = self.core.backoff();
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            state = %self.core.state(),
            "Waiting before reconnect"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let mut ticker = tokio::time::interval(self.config.autonomous_tick);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                Some(cmd) = local.recv() => {
                    let outcome = self.core.local(cmd, Utc::now());
                    self.paint(&outcome.screen);
                    if outcome.reconnect_now {
                        self.publish_state();
                        return true;
                    }
                }
                () = &mut sleep => return true,
                _ = ticker.tick() => {
                    let screen = self.core.tick(Utc::now());
                    self.paint(&screen);
                }
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn paint(&self, screen: &Screen) {
        match screen {
            Screen::Keep => {}
            Screen::Show(decision) => self.display.show(decision),
            Screen::Blank => self.display.blank(),
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.core.state());
    }
}
