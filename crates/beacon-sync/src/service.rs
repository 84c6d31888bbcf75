//! # Telemetry Service
//!
//! Owns startup, readiness and the background tasks. Host calls go through a
//! cloneable [`TelemetryHandle`] and never block or fail.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  start()                                                               │
//! │    │  endpoint persisted or configured?                                │
//! │    ├── yes ──────────────────────────────────────────┐                 │
//! │    ▼                                                  │                 │
//! │  AwaitingEndpoint  (track() → light buffer, in memory)│                 │
//! │    │                                                  │                 │
//! │    ├── set_endpoint() ───────────────────────────────►│                 │
//! │    │                                                  ▼                 │
//! │    ├── initial_wait expires ──► extended_wait       Ready              │
//! │    │                                                  ▲                 │
//! │    └── extended_wait expires ──► Unavailable ─────────┘                 │
//! │                                  (late set_endpoint)                   │
//! │                                                                         │
//! │  ON READY:                                                             │
//! │    1. build collector sinks for the endpoint                           │
//! │    2. light buffer → event store (in order)                            │
//! │    3. start ticker (auto_flush_check every tick_interval)              │
//! │    4. resolve readiness                                                │
//! │    5. one reconciliation pass                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Inputs
//! - [`TelemetryHandle`] commands over a bounded queue (`try_send`, dropped
//!   with a warning when full)
//! - bridged [`EventDraft`]s from [`event_bridge`](crate::bridge::event_bridge)
//! - retry wakes, from the in-process scheduler or `handle_wake()`

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use beacon_core::{validate_event_name, Attribution, Event, EventDraft};
use beacon_db::{Database, SettingKey};

use crate::bridge;
use crate::clock::{Clock, SystemClock};
use crate::codec::encoder_for;
use crate::config::{CollectorSettings, TelemetryConfig};
use crate::device::DeviceInfoSource;
use crate::error::{TelemetryError, TelemetryResult};
use crate::flush::{FlushCoordinator, FlushPolicy};
use crate::network::{AssumeOnline, NetworkMonitor};
use crate::profile::{ProfileReconciler, ReconcileOutcome};
use crate::retry::{run_wake_loop, RetryWorker, TokioWakeScheduler, WakeScheduler, WakeTarget};
use crate::sink::{CollectorEndpoint, DeliverySink, HttpCollector, ProfileSink};

// =============================================================================
// Collectors
// =============================================================================

/// Sinks bound to one collector endpoint.
#[derive(Clone)]
pub struct Collectors {
    pub events: Arc<dyn DeliverySink>,
    pub profiles: Arc<dyn ProfileSink>,
}

/// Builds the sinks once the endpoint is known.
pub type CollectorFactory =
    Arc<dyn Fn(&CollectorEndpoint) -> TelemetryResult<Collectors> + Send + Sync>;

/// Default factory: one [`HttpCollector`] serving both sinks.
pub fn http_collector_factory(
    settings: &CollectorSettings,
    identity: Arc<dyn DeviceInfoSource>,
) -> TelemetryResult<CollectorFactory> {
    let encoder = encoder_for(settings)?;
    let settings = settings.clone();

    Ok(Arc::new(move |endpoint: &CollectorEndpoint| {
        let http = Arc::new(HttpCollector::new(
            endpoint,
            &settings,
            identity.clone(),
            encoder.clone(),
        )?);
        Ok(Collectors {
            events: http.clone(),
            profiles: http,
        })
    }))
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    AwaitingEndpoint,
    Ready,
    /// Bootstrap window ended without an endpoint.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub phase: ServicePhase,
    pub endpoint: Option<CollectorEndpoint>,
    /// Events in the durable store.
    pub pending_events: i64,
    /// Events held in memory until the endpoint arrives.
    pub buffered_events: usize,
    pub last_flush_failure: Option<i64>,
}

// =============================================================================
// Readiness
// =============================================================================

/// Everything that exists only once an endpoint is known.
struct Pipeline {
    flush: Arc<FlushCoordinator>,
    profiles: Arc<dyn ProfileSink>,
    reconciler: Arc<ProfileReconciler>,
}

impl Pipeline {
    async fn reconcile(&self) -> ReconcileOutcome {
        self.reconciler.reconcile(self.profiles.as_ref()).await
    }
}

#[derive(Clone)]
enum Readiness {
    Pending,
    Ready(Arc<Pipeline>),
    Unavailable,
}

/// Waits until bootstrap has finished; true when a pipeline exists.
async fn await_bootstrap(mut rx: watch::Receiver<Readiness>) -> bool {
    match rx.wait_for(|r| !matches!(r, Readiness::Pending)).await {
        Ok(readiness) => matches!(*readiness, Readiness::Ready(_)),
        Err(_) => false,
    }
}

fn current_pipeline(rx: &watch::Receiver<Readiness>) -> Option<Arc<Pipeline>> {
    match &*rx.borrow() {
        Readiness::Ready(pipeline) => Some(pipeline.clone()),
        _ => None,
    }
}

/// Wake target backed by the readiness signal.
struct ServiceWakeTarget {
    readiness: watch::Receiver<Readiness>,
}

#[async_trait]
impl WakeTarget for ServiceWakeTarget {
    async fn wait_ready(&self) -> bool {
        await_bootstrap(self.readiness.clone()).await
    }

    async fn sync_pass(&self) {
        let Some(pipeline) = current_pipeline(&self.readiness) else {
            return;
        };
        let outcome = pipeline.reconcile().await;
        let flushed = pipeline.flush.flush(1).await;
        debug!(?outcome, ?flushed, "Retry pass complete");
    }
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    Track(Event),
    SetEndpoint(CollectorEndpoint),
    SetAttribution(Attribution),
    Wake,
    Status(oneshot::Sender<ServiceStatus>),
    Shutdown(oneshot::Sender<()>),
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Track(_) => "track",
            Command::SetEndpoint(_) => "set_endpoint",
            Command::SetAttribution(_) => "set_attribution",
            Command::Wake => "wake",
            Command::Status(_) => "status",
            Command::Shutdown(_) => "shutdown",
        }
    }
}

/// Host-facing handle. Cheap to clone; every call returns immediately.
#[derive(Clone)]
pub struct TelemetryHandle {
    cmd_tx: mpsc::Sender<Command>,
    readiness: watch::Receiver<Readiness>,
}

impl TelemetryHandle {
    fn submit(&self, command: Command) {
        let label = command.label();
        match self.cmd_tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(command = label, "Telemetry command queue full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(command = label, "Telemetry service stopped, ignoring");
            }
        }
    }

    /// Records an event. Events without a name are logged and dropped.
    pub fn track(&self, event: Event) {
        if let Err(e) = validate_event_name(Some(&event.name)) {
            error!(error = %e, id = %event.id, "Rejecting tracked event");
            return;
        }
        self.submit(Command::Track(event));
    }

    /// Supplies the collector host. Persisted for later starts.
    pub fn set_endpoint(&self, host: impl Into<String>, secure: bool) {
        self.submit(Command::SetEndpoint(CollectorEndpoint::new(host, secure)));
    }

    pub fn set_attribution(&self, attribution: Attribution) {
        self.submit(Command::SetAttribution(attribution));
    }

    /// Entry point for wake schedulers that live outside the process.
    pub fn handle_wake(&self) {
        self.submit(Command::Wake);
    }

    /// Resolves once bootstrap is over. False when no endpoint arrived.
    pub async fn wait_ready(&self) -> bool {
        await_bootstrap(self.readiness.clone()).await
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.readiness.borrow(), Readiness::Ready(_))
    }

    pub async fn status(&self) -> TelemetryResult<ServiceStatus> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Status(tx))
            .await
            .map_err(|_| TelemetryError::ShuttingDown)?;
        rx.await.map_err(|_| TelemetryError::ShuttingDown)
    }

    /// Stops the command loop, ticker, bridge and wake timer.
    pub async fn shutdown(&self) -> TelemetryResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown(tx))
            .await
            .map_err(|_| TelemetryError::ShuttingDown)?;
        rx.await.map_err(|_| TelemetryError::ShuttingDown)
    }
}

// =============================================================================
// Service Builder
// =============================================================================

pub struct TelemetryService {
    config: TelemetryConfig,
    database: Database,
    device: Arc<dyn DeviceInfoSource>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    scheduler: Option<Arc<dyn WakeScheduler>>,
    collectors: Option<CollectorFactory>,
    bridge: Option<mpsc::Receiver<EventDraft>>,
}

impl TelemetryService {
    pub fn new(config: TelemetryConfig, database: Database, device: Arc<dyn DeviceInfoSource>) -> Self {
        TelemetryService {
            config,
            database,
            device,
            network: Arc::new(AssumeOnline),
            clock: Arc::new(SystemClock),
            scheduler: None,
            collectors: None,
            bridge: None,
        }
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = network;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the in-process timer. The host then forwards each wake with
    /// [`TelemetryHandle::handle_wake`].
    pub fn with_wake_scheduler(mut self, scheduler: Arc<dyn WakeScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_collector_factory(mut self, factory: CollectorFactory) -> Self {
        self.collectors = Some(factory);
        self
    }

    pub fn with_bridge(mut self, bridge: mpsc::Receiver<EventDraft>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Validates the configuration, spawns the service and returns its handle.
    pub async fn start(self) -> TelemetryResult<TelemetryHandle> {
        self.config.validate()?;

        let collectors = match self.collectors {
            Some(factory) => factory,
            None => http_collector_factory(&self.config.collector, self.device.clone())?,
        };

        let (readiness_tx, readiness_rx) = watch::channel(Readiness::Pending);
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.queue.command_capacity);
        let target: Arc<dyn WakeTarget> = Arc::new(ServiceWakeTarget {
            readiness: readiness_rx.clone(),
        });

        let mut wake_loop = None;
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => {
                let (scheduler, wake_rx) = TokioWakeScheduler::new();
                let scheduler: Arc<dyn WakeScheduler> = Arc::new(scheduler);
                wake_loop = Some(wake_rx);
                scheduler
            }
        };

        let worker = Arc::new(RetryWorker::new(
            self.database.settings(),
            scheduler,
            &self.config.retry,
        ));
        let wake_loop = wake_loop
            .map(|wake_rx| tokio::spawn(run_wake_loop(worker.clone(), target.clone(), wake_rx)));
        worker.ensure_scheduled().await;

        let reconciler = Arc::new(ProfileReconciler::new(
            self.database.settings(),
            self.device.clone(),
            self.clock.clone(),
            self.config.profile.referrer_timeout(),
        ));

        let actor = ServiceActor {
            config: self.config,
            database: self.database,
            network: self.network,
            clock: self.clock,
            collectors,
            reconciler,
            worker,
            target,
            readiness_tx,
            phase: ServicePhase::AwaitingEndpoint,
            endpoint: None,
            light_buffer: Vec::new(),
            ticker: None,
            wake_loop,
        };

        tokio::spawn(actor.run(cmd_rx, self.bridge));

        Ok(TelemetryHandle {
            cmd_tx,
            readiness: readiness_rx,
        })
    }
}

// =============================================================================
// Service Actor
// =============================================================================

struct ServiceActor {
    config: TelemetryConfig,
    database: Database,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    collectors: CollectorFactory,
    reconciler: Arc<ProfileReconciler>,
    worker: Arc<RetryWorker>,
    target: Arc<dyn WakeTarget>,
    readiness_tx: watch::Sender<Readiness>,

    phase: ServicePhase,
    endpoint: Option<CollectorEndpoint>,
    light_buffer: Vec<Event>,
    ticker: Option<JoinHandle<()>>,
    wake_loop: Option<JoinHandle<()>>,
}

impl ServiceActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        bridge: Option<mpsc::Receiver<EventDraft>>,
    ) {
        info!("Telemetry service started");

        if let Some(endpoint) = self.known_endpoint().await {
            self.become_ready(endpoint).await;
        }

        let bootstrap = self.config.bootstrap.clone();
        let mut deadline = Instant::now() + bootstrap.initial_wait();
        let mut extended = false;

        let (mut bridge_rx, mut bridge_open) = match bridge {
            Some(rx) => (rx, true),
            None => (mpsc::channel(1).1, false),
        };

        let shutdown_ack = loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(Command::Shutdown(ack)) => break Some(ack),
                    Some(command) => self.handle(command).await,
                    None => break None,
                },
                draft = bridge_rx.recv(), if bridge_open => match draft {
                    Some(draft) => {
                        if let Some(event) = bridge::admit(draft, self.clock.now_millis()) {
                            self.track(event);
                        }
                    }
                    None => {
                        debug!("Event bridge closed");
                        bridge_open = false;
                    }
                },
                _ = tokio::time::sleep_until(deadline), if self.phase == ServicePhase::AwaitingEndpoint => {
                    if extended {
                        warn!(
                            buffered = self.light_buffer.len(),
                            "No collector endpoint after extended wait, telemetry unavailable"
                        );
                        self.phase = ServicePhase::Unavailable;
                        self.readiness_tx.send_replace(Readiness::Unavailable);
                    } else {
                        warn!(
                            wait_ms = bootstrap.extended_wait_ms,
                            "No collector endpoint yet, extending wait"
                        );
                        deadline = Instant::now() + bootstrap.extended_wait();
                        extended = true;
                    }
                }
            }
        };

        self.stop();
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Track(event) => self.track(event),
            Command::SetEndpoint(endpoint) => self.set_endpoint(endpoint).await,
            Command::SetAttribution(attribution) => {
                let reconciler = self.reconciler.clone();
                let readiness = self.readiness_tx.subscribe();
                tokio::spawn(async move {
                    match reconciler.set_attribution(&attribution).await {
                        Ok(true) => {
                            let pipeline = current_pipeline(&readiness);
                            if let Some(pipeline) = pipeline {
                                pipeline.reconcile().await;
                            }
                        }
                        Ok(false) => debug!("Attribution unchanged"),
                        Err(e) => error!(error = %e, "Failed to store attribution"),
                    }
                });
            }
            Command::Wake => {
                let worker = self.worker.clone();
                let target = self.target.clone();
                tokio::spawn(async move {
                    worker.on_wake(target.as_ref()).await;
                });
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status().await);
            }
            Command::Shutdown(_) => {}
        }
    }

    fn track(&mut self, event: Event) {
        match self.pipeline() {
            Some(pipeline) => {
                tokio::spawn(async move { pipeline.flush.enqueue(event).await });
            }
            None => {
                debug!(name = %event.name, "Buffering event until endpoint is known");
                self.light_buffer.push(event);
            }
        }
    }

    async fn set_endpoint(&mut self, endpoint: CollectorEndpoint) {
        if let Err(e) = endpoint.base_url(&self.config.collector.api_version) {
            error!(error = %e, "Ignoring invalid collector endpoint");
            return;
        }

        if let Err(e) = self
            .database
            .settings()
            .put_json(SettingKey::CollectorEndpoint, &endpoint)
            .await
        {
            warn!(?e, "Failed to persist collector endpoint");
        }

        if self.phase == ServicePhase::Ready {
            info!(host = %endpoint.host, "Collector endpoint stored, applies on next start");
            return;
        }

        self.become_ready(endpoint).await;
    }

    /// Persisted endpoint first, then the configured one.
    async fn known_endpoint(&self) -> Option<CollectorEndpoint> {
        match self
            .database
            .settings()
            .get_json::<CollectorEndpoint>(SettingKey::CollectorEndpoint)
            .await
        {
            Ok(Some(endpoint)) => return Some(endpoint),
            Ok(None) => {}
            Err(e) => warn!(?e, "Stored collector endpoint unreadable"),
        }
        self.config.collector.configured_endpoint()
    }

    async fn become_ready(&mut self, endpoint: CollectorEndpoint) {
        let collectors = match (self.collectors)(&endpoint) {
            Ok(collectors) => collectors,
            Err(e) => {
                error!(error = %e, host = %endpoint.host, "Cannot build collector client");
                return;
            }
        };

        let flush = Arc::new(FlushCoordinator::new(
            self.database.events(),
            collectors.events,
            self.network.clone(),
            self.clock.clone(),
            FlushPolicy::from(&self.config.queue),
        ));

        let buffered = std::mem::take(&mut self.light_buffer);
        let moved = buffered.len();
        let limit = flush.policy().local_event_limit;
        for event in buffered {
            if let Err(e) = flush.store().append(&event, limit).await {
                warn!(?e, name = %event.name, "Dropping buffered event");
            }
        }

        self.ticker = Some(spawn_ticker(
            flush.clone(),
            self.config.queue.tick_interval(),
        ));

        let pipeline = Arc::new(Pipeline {
            flush: flush.clone(),
            profiles: collectors.profiles,
            reconciler: self.reconciler.clone(),
        });
        self.readiness_tx.send_replace(Readiness::Ready(pipeline.clone()));
        self.phase = ServicePhase::Ready;
        info!(host = %endpoint.host, secure = endpoint.secure, moved, "Telemetry ready");
        self.endpoint = Some(endpoint);

        tokio::spawn(async move {
            let outcome = pipeline.reconcile().await;
            debug!(?outcome, "Startup reconciliation");
            if moved > 0 {
                pipeline.flush.auto_flush_check().await;
            }
        });
    }

    async fn status(&self) -> ServiceStatus {
        let pipeline = self.pipeline();

        let pending_events = match self.database.events().count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(?e, "Failed to count stored events");
                0
            }
        };
        let last_flush_failure = match &pipeline {
            Some(pipeline) => pipeline.flush.last_failure_time().await,
            None => None,
        };

        ServiceStatus {
            phase: self.phase,
            endpoint: self.endpoint.clone(),
            pending_events,
            buffered_events: self.light_buffer.len(),
            last_flush_failure,
        }
    }

    fn pipeline(&self) -> Option<Arc<Pipeline>> {
        match &*self.readiness_tx.borrow() {
            Readiness::Ready(pipeline) => Some(pipeline.clone()),
            _ => None,
        }
    }

    fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(wake_loop) = self.wake_loop.take() {
            wake_loop.abort();
        }
        if !self.light_buffer.is_empty() {
            warn!(
                dropped = self.light_buffer.len(),
                "Stopping with buffered events that never reached the store"
            );
        }
        info!("Telemetry service stopped");
    }
}

fn spawn_ticker(flush: Arc<FlushCoordinator>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            flush.auto_flush_check().await;
        }
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::event_bridge;
    use crate::device::StaticDeviceInfo;
    use beacon_core::{DeviceFacts, DeviceProfile, ErrorReport};
    use beacon_db::DbConfig;
    use std::future::Future;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCollector {
        events: Mutex<Vec<Event>>,
        profiles: Mutex<Vec<DeviceProfile>>,
        endpoints: Mutex<Vec<CollectorEndpoint>>,
    }

    impl RecordingCollector {
        fn event_count(&self) -> usize {
            self.events.lock().unwrap().len()
        }

        fn profile_count(&self) -> usize {
            self.profiles.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DeliverySink for RecordingCollector {
        async fn send_batch(&self, batch: &[Event]) -> TelemetryResult<()> {
            self.events.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    }

    #[async_trait]
    impl ProfileSink for RecordingCollector {
        async fn push_profile(&self, profile: &DeviceProfile) -> TelemetryResult<()> {
            self.profiles.lock().unwrap().push(profile.clone());
            Ok(())
        }

        async fn report_error(&self, _report: &ErrorReport) -> TelemetryResult<()> {
            Ok(())
        }
    }

    struct NoopScheduler;

    impl WakeScheduler for NoopScheduler {
        fn schedule(&self, _delay: Duration) {}
    }

    fn factory(collector: Arc<RecordingCollector>) -> CollectorFactory {
        Arc::new(move |endpoint: &CollectorEndpoint| {
            collector.endpoints.lock().unwrap().push(endpoint.clone());
            Ok(Collectors {
                events: collector.clone(),
                profiles: collector.clone(),
            })
        })
    }

    fn config(initial_wait_ms: u64, extended_wait_ms: u64) -> TelemetryConfig {
        let mut config = TelemetryConfig::default();
        config.bootstrap.initial_wait_ms = initial_wait_ms;
        config.bootstrap.extended_wait_ms = extended_wait_ms;
        config
    }

    fn device() -> Arc<StaticDeviceInfo> {
        Arc::new(StaticDeviceInfo::new(
            "install-1",
            DeviceFacts {
                app_package: Some("com.example.game".into()),
                install_token: Some("tok".into()),
                ..Default::default()
            },
        ))
    }

    async fn service(config: TelemetryConfig) -> (TelemetryService, Database, Arc<RecordingCollector>) {
        service_with_device(config, device()).await
    }

    async fn service_with_device(
        config: TelemetryConfig,
        device: Arc<StaticDeviceInfo>,
    ) -> (TelemetryService, Database, Arc<RecordingCollector>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let collector = Arc::new(RecordingCollector::default());
        let service = TelemetryService::new(config, db.clone(), device)
            .with_wake_scheduler(Arc::new(NoopScheduler))
            .with_collector_factory(factory(collector.clone()));
        (service, db, collector)
    }

    async fn until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..300 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_buffers_until_endpoint() {
        let (service, db, collector) = service(config(5_000, 5_000)).await;
        let handle = service.start().await.unwrap();

        let now = SystemClock.now_millis();
        handle.track(Event::new("open", now));
        handle.track(Event::new("tap", now + 1));

        let status = handle.status().await.unwrap();
        assert_eq!(status.phase, ServicePhase::AwaitingEndpoint);
        assert_eq!(status.buffered_events, 2);
        assert_eq!(status.pending_events, 0);
        assert!(!handle.is_ready());

        handle.set_endpoint("collector.test", true);
        assert!(handle.wait_ready().await);

        let status = handle.status().await.unwrap();
        assert_eq!(status.phase, ServicePhase::Ready);
        assert_eq!(status.buffered_events, 0);
        assert_eq!(status.pending_events, 2);
        assert_eq!(status.endpoint, Some(CollectorEndpoint::new("collector.test", true)));

        let stored: Option<CollectorEndpoint> = db
            .settings()
            .get_json(SettingKey::CollectorEndpoint)
            .await
            .unwrap();
        assert_eq!(stored, Some(CollectorEndpoint::new("collector.test", true)));

        // Startup reconciliation
        until(|| async { collector.profile_count() == 1 }).await;
        let hints = collector.profiles.lock().unwrap()[0].hints.clone().unwrap();
        assert!(hints.first_push);
    }

    #[tokio::test]
    async fn test_track_rejects_blank_name() {
        let (service, _db, _collector) = service(config(5_000, 5_000)).await;
        let handle = service.start().await.unwrap();

        handle.track(Event::new("", SystemClock.now_millis()));
        handle.track(Event::new("   ", SystemClock.now_millis()));
        handle.track(Event::new("kept", SystemClock.now_millis()));

        assert_eq!(handle.status().await.unwrap().buffered_events, 1);
    }

    #[tokio::test]
    async fn test_unavailable_then_late_endpoint() {
        let (service, _db, collector) = service(config(20, 20)).await;
        let handle = service.start().await.unwrap();

        assert!(!handle.wait_ready().await);
        assert_eq!(handle.status().await.unwrap().phase, ServicePhase::Unavailable);

        handle.track(Event::new("late", SystemClock.now_millis()));
        assert_eq!(handle.status().await.unwrap().buffered_events, 1);

        handle.set_endpoint("collector.test", false);
        until(|| async { handle.is_ready() }).await;
        assert!(handle.wait_ready().await);

        let status = handle.status().await.unwrap();
        assert_eq!(status.phase, ServicePhase::Ready);
        assert_eq!(status.pending_events, 1);
        assert_eq!(collector.endpoints.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persisted_endpoint_ready_on_start() {
        let (service, db, collector) = service(config(60_000, 60_000)).await;
        db.settings()
            .put_json(
                SettingKey::CollectorEndpoint,
                &CollectorEndpoint::new("saved.test", true),
            )
            .await
            .unwrap();

        let handle = service.start().await.unwrap();
        let ready = tokio::time::timeout(Duration::from_secs(2), handle.wait_ready())
            .await
            .unwrap();

        assert!(ready);
        assert_eq!(
            collector.endpoints.lock().unwrap()[0],
            CollectorEndpoint::new("saved.test", true)
        );
    }

    #[tokio::test]
    async fn test_configured_endpoint_and_auto_flush() {
        let mut config = config(60_000, 60_000);
        config.collector.endpoint = Some("collector.test".into());
        config.queue.flush_threshold = 3;
        let (service, _db, collector) = service(config).await;
        let handle = service.start().await.unwrap();
        assert!(handle.wait_ready().await);

        for name in ["a", "b", "c"] {
            handle.track(Event::new(name, 1_000));
        }

        until(|| async { collector.event_count() == 3 }).await;
        until(|| async { handle.status().await.unwrap().pending_events == 0 }).await;
    }

    #[tokio::test]
    async fn test_bridge_and_wake() {
        let mut config = config(60_000, 60_000);
        config.collector.endpoint = Some("collector.test".into());
        let device = device();
        let (service, _db, collector) = service_with_device(config, device.clone()).await;
        let (bridge, bridge_rx) = event_bridge(8);
        let handle = service.with_bridge(bridge_rx).start().await.unwrap();
        assert!(handle.wait_ready().await);
        until(|| async { collector.profile_count() == 1 }).await;

        assert!(bridge.submit(EventDraft::named("from_bridge")));
        assert!(bridge.submit(EventDraft::default()));

        until(|| async { handle.status().await.unwrap().pending_events == 1 }).await;
        assert_eq!(collector.event_count(), 0);

        device
            .set_facts(DeviceFacts {
                app_package: Some("com.example.game".into()),
                app_version: Some("2.0.0".into()),
                install_token: Some("tok".into()),
                ..Default::default()
            })
            .await;

        // A wake reconciles and flushes below the threshold
        handle.handle_wake();
        until(|| async { collector.event_count() == 1 }).await;
        until(|| async { collector.profile_count() == 2 }).await;
        assert_eq!(collector.events.lock().unwrap()[0].name, "from_bridge");

        let pushed = collector.profiles.lock().unwrap()[1].clone();
        assert_eq!(pushed.app_version.as_deref(), Some("2.0.0"));
        assert!(!pushed.hints.unwrap().first_push);
    }

    #[tokio::test]
    async fn test_attribution_reconciles() {
        let mut config = config(60_000, 60_000);
        config.collector.endpoint = Some("collector.test".into());
        let (service, _db, collector) = service(config).await;
        let handle = service.start().await.unwrap();
        until(|| async { collector.profile_count() == 1 }).await;

        handle.set_attribution(Attribution {
            click_id: Some("click-7".into()),
            promo_code: Some("SPRING".into()),
        });

        until(|| async { collector.profile_count() == 2 }).await;
        let last = collector.profiles.lock().unwrap()[1].clone();
        assert_eq!(last.campaign_click_id.as_deref(), Some("click-7"));
        assert_eq!(last.campaign_promo_code.as_deref(), Some("SPRING"));
        assert!(!last.hints.unwrap().first_push);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_ignored() {
        let (service, _db, collector) = service(config(60_000, 60_000)).await;
        let handle = service.start().await.unwrap();

        handle.set_endpoint("https://collector.test/v1", true);

        let status = handle.status().await.unwrap();
        assert_eq!(status.phase, ServicePhase::AwaitingEndpoint);
        assert!(collector.endpoints.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_service() {
        let (service, _db, _collector) = service(config(60_000, 60_000)).await;
        let handle = service.start().await.unwrap();

        handle.shutdown().await.unwrap();

        assert!(matches!(
            handle.status().await,
            Err(TelemetryError::ShuttingDown)
        ));
        // Fire-and-forget calls stay silent
        handle.track(Event::new("after", 1));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = config(10, 10);
        config.queue.batch_size = 0;
        let (service, _db, _collector) = service(config).await;

        assert!(matches!(
            service.start().await,
            Err(TelemetryError::InvalidConfig(_))
        ));
    }
}
