// ── Hub ──
//
// The server-side facade. Owns the registry, delivery channel, liveness
// tracker, arbitrator and scheduler, runs their periodic tasks, and
// routes operator commands and sign frames to them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cityarray_proto::wire::{CachePayload, decode_event};
use cityarray_proto::{SignCommand, SignEvent};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arbitrator::Arbitrator;
use crate::collaborators::{AuditEvent, Collaborators};
use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::HubConfig;
use crate::delivery::{DeliveryChannel, DeliveryRecord, SweepReport};
use crate::display::{Decision, DisplayDecider};
use crate::error::CoreError;
use crate::event::DashboardEvent;
use crate::liveness::LivenessTracker;
use crate::model::{
    ArbiterState, Blackout, Message, MessageId, MessageSource, Override, OverrideId,
    OverrideRequest, Priority, ScheduleEntry, ScheduleId, Sign, SignId, Targets, ZoneId,
};
use crate::scheduler::{Emission, Scheduler};
use crate::session::{SessionId, SessionOutbox};
use crate::store::SignRegistry;
use crate::stream::SignStream;

const COMMAND_CHANNEL_SIZE: usize = 64;
const EVENT_CHANNEL_SIZE: usize = 1024;

// ── HubState ─────────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Stopped,
    Running,
}

/// What one maintenance sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub offline: Vec<SignId>,
    pub delivery: SweepReport,
    pub expired_overrides: Vec<OverrideId>,
}

// ── Hub ──────────────────────────────────────────────────────────

/// The main entry point for the server side.
///
/// Cheaply cloneable via `Arc<HubInner>`. Every operation that depends
/// on the clock takes `now` explicitly; the background tasks started by
/// [`start()`](Self::start) pass the wall clock.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    collaborators: Collaborators,
    registry: Arc<SignRegistry>,
    delivery: Arc<DeliveryChannel>,
    liveness: LivenessTracker,
    arbitrator: Arc<Arbitrator>,
    scheduler: Scheduler,
    state: watch::Sender<HubState>,
    event_tx: broadcast::Sender<Arc<DashboardEvent>>,
    command_tx: Mutex<mpsc::Sender<CommandEnvelope>>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    /// Child token for the current run; replaced on restart.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Create a hub with the default collaborators.
    pub fn new(config: HubConfig) -> Result<Self, CoreError> {
        Self::with_collaborators(config, Collaborators::default())
    }

    /// Create a hub. Does NOT start background tasks; call
    /// [`start()`](Self::start) for that.
    pub fn with_collaborators(
        config: HubConfig,
        collaborators: Collaborators,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let registry = Arc::new(SignRegistry::new());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (state, _) = watch::channel(HubState::Stopped);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        let delivery = Arc::new(DeliveryChannel::new(
            Arc::clone(&registry),
            event_tx.clone(),
            &config,
        ));
        let liveness = LivenessTracker::new(
            Arc::clone(&registry),
            Arc::clone(&delivery),
            Arc::clone(&collaborators.alerting),
            event_tx.clone(),
            &config,
        );
        let arbitrator = Arc::new(Arbitrator::new(
            Arc::clone(&registry),
            Arc::clone(&delivery),
            Arc::clone(&collaborators.alerting),
            Arc::clone(&collaborators.persistence),
            event_tx.clone(),
            &config,
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&registry),
            Arc::clone(&arbitrator),
            collaborators.clone(),
            config.utc_offset(),
        );

        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                collaborators,
                registry,
                delivery,
                liveness,
                arbitrator,
                scheduler,
                state,
                event_tx,
                command_tx: Mutex::new(command_tx),
                command_rx: Mutex::new(Some(command_rx)),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<SignRegistry> {
        &self.inner.registry
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Run an immediate schedule evaluation, then spawn the sweep,
    /// scheduler and command processor tasks.
    pub async fn start(&self) {
        if *self.inner.state.borrow() == HubState::Running {
            return;
        }

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        self.tick_schedule(Utc::now());

        let mut handles = self.inner.task_handles.lock().await;
        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            let hub = self.clone();
            handles.push(tokio::spawn(command_processor_task(hub, rx, child.clone())));
        }
        {
            let hub = self.clone();
            let period = self.inner.config.sweep_interval;
            handles.push(tokio::spawn(sweep_task(hub, period, child.clone())));
        }
        {
            let hub = self.clone();
            let period = self.inner.config.scheduler_tick;
            handles.push(tokio::spawn(schedule_task(hub, period, child)));
        }

        let _ = self.inner.state.send(HubState::Running);
        info!(
            heartbeat_timeout_secs = self.inner.config.heartbeat_timeout().as_secs(),
            "hub started"
        );
    }

    /// Cancel background tasks and wait for them to finish. Registered
    /// signs and schedule survive; [`start()`](Self::start) may be called
    /// again.
    pub async fn shutdown(&self) {
        self.inner.cancel_child.lock().await.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        // The old receiver was consumed by the command processor task.
        {
            let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
            *self.inner.command_tx.lock().await = tx;
            *self.inner.command_rx.lock().await = Some(rx);
        }

        let _ = self.inner.state.send(HubState::Stopped);
        debug!("hub stopped");
    }

    // ── Sign sessions ────────────────────────────────────────────

    /// Open a session for a connecting sign. The sign receives a welcome,
    /// its offline cache, anything queued for it, and finally whatever
    /// the server says it should be showing.
    pub fn open_session(
        &self,
        sign_id: &SignId,
        zone: Option<ZoneId>,
        name: Option<String>,
        now: DateTime<Utc>,
    ) -> SessionOutbox {
        let (sign, outbox) = self.inner.liveness.open(sign_id, zone, name, now);

        if let Some(session) = self.inner.registry.session(sign_id) {
            let welcome = SignCommand::Connected {
                message: format!("Connected to CITYARRAY as {}", sign.display_name()),
            };
            let cache = SignCommand::CacheSync {
                data: self.inner.scheduler.cache_for(&sign.zone),
            };
            if session.send(welcome).and_then(|()| session.send(cache)).is_err() {
                debug!(sign_id = %sign_id, "session closed during handshake");
            }
        }

        self.inner
            .arbitrator
            .attach(&sign, self.inner.scheduler.current(&sign.zone));
        let flushed = self.inner.delivery.flush(sign_id, now);
        self.inner.arbitrator.resume(sign_id, now);
        debug!(sign_id = %sign_id, flushed, "session ready");
        outbox
    }

    /// The sign's socket closed.
    pub fn close_session(&self, sign_id: &SignId, session: SessionId, now: DateTime<Utc>) -> bool {
        self.inner.liveness.close(sign_id, session, now)
    }

    /// Decode and handle one raw text frame from a sign.
    pub fn handle_frame(
        &self,
        sign_id: &SignId,
        session: SessionId,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let event = decode_event(raw)?;
        self.handle_event(sign_id, session, event, now)
    }

    /// Handle one typed event from a sign, in arrival order.
    pub fn handle_event(
        &self,
        sign_id: &SignId,
        session: SessionId,
        event: SignEvent,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        match event {
            SignEvent::Heartbeat { data } => {
                self.inner.liveness.heartbeat(sign_id, session, &data, now);
            }
            SignEvent::Metrics { data } => {
                self.emit(DashboardEvent::SignMetrics {
                    sign_id: sign_id.clone(),
                    data,
                });
            }
            SignEvent::Ack { message_id } => {
                let id: MessageId = message_id.parse().map_err(|_| CoreError::Protocol {
                    message: format!("ack for malformed message id '{message_id}'"),
                })?;
                self.inner.delivery.acknowledge(sign_id, id, now);
            }
            SignEvent::OfflineReport {
                content,
                occurred_at,
            } => {
                info!(sign_id = %sign_id, %content, "sign reported offline activity");
                self.inner.collaborators.persistence.record_audit(&AuditEvent {
                    at: occurred_at.unwrap_or(now),
                    sign_id: Some(sign_id.clone()),
                    action: "offline_message".into(),
                    detail: content.clone(),
                });
                self.emit(DashboardEvent::OfflineActivity {
                    sign_id: sign_id.clone(),
                    content,
                    occurred_at,
                });
            }
        }
        Ok(())
    }

    // ── Periodic work ────────────────────────────────────────────

    /// Liveness timeouts, delivery retries and expiry, override expiry.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepSummary {
        SweepSummary {
            offline: self.inner.liveness.sweep(now),
            delivery: self.inner.delivery.sweep(now),
            expired_overrides: self.inner.arbitrator.expire(now),
        }
    }

    /// One scheduler evaluation.
    pub fn tick_schedule(&self, now: DateTime<Utc>) -> Vec<Emission> {
        self.inner.scheduler.tick(now)
    }

    // ── Operator actions ─────────────────────────────────────────

    pub fn issue_override(
        &self,
        request: OverrideRequest,
        now: DateTime<Utc>,
    ) -> Result<Arc<Override>, CoreError> {
        self.inner.arbitrator.issue(request, now)
    }

    pub fn cancel_override(&self, id: OverrideId, now: DateTime<Utc>) -> bool {
        self.inner.arbitrator.cancel(id, now)
    }

    /// Send literal text to the targeted signs as normal content.
    pub fn send_message(
        &self,
        content: String,
        targets: Targets,
        priority: Priority,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<(MessageId, usize), CoreError> {
        if content.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "message content is empty".into(),
            });
        }
        if targets.is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "message targets no signs or zones".into(),
            });
        }

        let message = Arc::new(Message {
            id: MessageId::new(),
            content,
            priority,
            targets,
            duration,
            template_id: None,
            source: MessageSource::Direct,
            issued_at: now,
        });
        self.inner.collaborators.persistence.record_message(&message);

        let delivered = self
            .inner
            .registry
            .snapshot()
            .iter()
            .filter(|s| message.targets.includes(&s.id, &s.zone))
            .filter(|s| {
                self.inner
                    .arbitrator
                    .offer(&s.id, Arc::clone(&message), now)
            })
            .count();
        Ok((message.id, delivered))
    }

    pub fn upsert_schedule(&self, entry: ScheduleEntry) -> Result<(), CoreError> {
        self.inner.scheduler.upsert(entry)
    }

    pub fn remove_schedule(&self, id: &ScheduleId) -> Result<ScheduleEntry, CoreError> {
        self.inner.scheduler.remove(id)
    }

    pub fn set_blackouts(&self, blackouts: Vec<Blackout>) {
        self.inner.scheduler.set_blackouts(blackouts);
    }

    /// Send an on-demand command straight to a sign's session.
    pub fn poke(&self, sign_id: &SignId, command: SignCommand) -> Result<(), CoreError> {
        if self.inner.registry.get(sign_id).is_none() {
            return Err(CoreError::SignNotFound {
                sign_id: sign_id.clone(),
            });
        }
        self.inner
            .registry
            .session(sign_id)
            .ok_or_else(|| CoreError::SessionClosed {
                sign_id: sign_id.clone(),
            })?
            .send(command)
    }

    /// Run a command synchronously at `now`.
    pub fn apply(&self, command: Command, now: DateTime<Utc>) -> Result<CommandResult, CoreError> {
        match command {
            Command::IssueOverride(request) => {
                self.issue_override(request, now).map(CommandResult::Override)
            }
            Command::CancelOverride { id } => {
                Ok(CommandResult::Cancelled(self.cancel_override(id, now)))
            }
            Command::SendMessage {
                content,
                targets,
                priority,
                duration,
            } => {
                let (message_id, delivered) =
                    self.send_message(content, targets, priority, duration, now)?;
                Ok(CommandResult::Sent {
                    message_id,
                    delivered,
                })
            }
            Command::UpsertSchedule(entry) => {
                self.upsert_schedule(entry)?;
                Ok(CommandResult::Ok)
            }
            Command::RemoveSchedule { id } => {
                self.remove_schedule(&id).map(CommandResult::ScheduleEntry)
            }
            Command::SetBlackouts { blackouts } => {
                self.set_blackouts(blackouts);
                Ok(CommandResult::Ok)
            }
            Command::Ping { sign } => {
                self.poke(&sign, SignCommand::Ping)?;
                Ok(CommandResult::Ok)
            }
            Command::RequestStatus { sign } => {
                self.poke(&sign, SignCommand::RequestStatus)?;
                Ok(CommandResult::Ok)
            }
        }
    }

    // ── Command execution ────────────────────────────────────────

    /// Execute a command through the running hub's command processor.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if *self.inner.state.borrow() != HubState::Running {
            return Err(CoreError::HubStopped);
        }

        let (tx, rx) = tokio::sync::oneshot::channel();

        let command_tx = self.inner.command_tx.lock().await.clone();

        command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::HubStopped)?;

        rx.await.map_err(|_| CoreError::HubStopped)?
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<HubState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to the dashboard event stream.
    pub fn events(&self) -> broadcast::Receiver<Arc<DashboardEvent>> {
        self.inner.event_tx.subscribe()
    }

    pub fn signs(&self) -> SignStream {
        self.inner.registry.subscribe()
    }

    pub fn signs_snapshot(&self) -> Arc<Vec<Arc<Sign>>> {
        self.inner.registry.snapshot()
    }

    pub fn sign(&self, id: &SignId) -> Option<Arc<Sign>> {
        self.inner.registry.get(id)
    }

    pub fn arbiter_state(&self, sign: &SignId) -> ArbiterState {
        self.inner.arbitrator.state(sign)
    }

    pub fn active_overrides(&self) -> Vec<Arc<Override>> {
        self.inner.arbitrator.active()
    }

    pub fn schedule(&self) -> Vec<ScheduleEntry> {
        self.inner.scheduler.entries()
    }

    pub fn blackouts(&self) -> Vec<Blackout> {
        self.inner.scheduler.blackouts()
    }

    pub fn deliveries(&self, sign: &SignId) -> Vec<DeliveryRecord> {
        self.inner.delivery.records(sign)
    }

    pub fn cache_for(&self, zone: &ZoneId) -> CachePayload {
        self.inner.scheduler.cache_for(zone)
    }

    fn emit(&self, event: DashboardEvent) {
        let _ = self.inner.event_tx.send(Arc::new(event));
    }
}

impl DisplayDecider for Hub {
    fn decide(&self, sign: &SignId, now: DateTime<Utc>) -> Option<Decision> {
        self.inner.arbitrator.decide(sign, now)
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn sweep_task(hub: Hub, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let summary = hub.sweep(Utc::now());
                if !summary.offline.is_empty() || !summary.expired_overrides.is_empty() {
                    debug!(
                        offline = summary.offline.len(),
                        expired_overrides = summary.expired_overrides.len(),
                        retried = summary.delivery.retried,
                        "sweep"
                    );
                }
            }
        }
    }
}

async fn schedule_task(hub: Hub, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let emitted = hub.tick_schedule(Utc::now());
                if !emitted.is_empty() {
                    debug!(zones = emitted.len(), "schedule tick emitted content");
                }
            }
        }
    }
}

async fn command_processor_task(
    hub: Hub,
    mut rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = hub.apply(envelope.command, Utc::now());
                if let Err(ref e) = result {
                    warn!(error = %e, "command failed");
                }
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}
