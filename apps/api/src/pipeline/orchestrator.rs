//! Pipeline agent: drives distill → optimize from bus requests.
//!
//! Every request is tracked by id while its work runs on a detached task. A
//! supervisor task races that work against the request budget; whichever settles
//! first publishes, and the other is dropped. A timed-out task keeps running and
//! removes its own tracking entry when it finishes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bus::{direct_key, HandlerResult, Subscription};
use crate::pipeline::distiller::{ContentDistiller, DEFAULT_MAX_LENGTH};
use crate::pipeline::generate_request_id;
use crate::pipeline::messages::{
    topics, ControlAction, DistillRequest, HealthSnapshot, Message, OptimizeRequest, PipelineBus,
    RequestStatus, StatusSnapshot,
};
use crate::pipeline::models::{
    DistillOutput, OptimizeOutput, ProcessingRequest, ProcessingResult, Stage,
};
use crate::pipeline::optimizer::LayoutOptimizer;
use crate::pipeline::PipelineError;

pub const DEFAULT_AGENT_NAME: &str = "LLMServiceAgent";
pub const CAPABILITIES: [&str; 3] = [topics::DISTILL, topics::OPTIMIZE, topics::PROCESS];
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Direct address the agent answers control messages on.
    pub agent_name: String,
    pub request_timeout: Duration,
    pub distill_max_length: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            request_timeout: Duration::from_secs(30),
            distill_max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

/// Outcome of [`PipelineAgent::shutdown`].
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub drained: bool,
    /// Requests still in flight when the drain budget ran out.
    pub abandoned: Vec<String>,
}

struct ActiveEntry {
    generation: u64,
    started: Instant,
    stage: Stage,
}

/// Request family, used to shape the failure event of a request.
#[derive(Debug, Clone, Copy)]
enum Family {
    Process,
    Distill,
    Optimize,
}

impl Family {
    fn initial_stage(self) -> Stage {
        match self {
            Family::Process => Stage::Pipeline,
            Family::Distill => Stage::Distill,
            Family::Optimize => Stage::Optimize,
        }
    }

    fn failure(self, request_id: &str, error: String, elapsed_ms: u64) -> Message {
        match self {
            Family::Process => {
                Message::ProcessError(ProcessingResult::failed(request_id, error, elapsed_ms))
            }
            Family::Distill => Message::DistillError {
                request_id: request_id.to_string(),
                error,
            },
            Family::Optimize => Message::OptimizeError {
                request_id: request_id.to_string(),
                error,
            },
        }
    }
}

/// Cloneable handle to a running agent.
#[derive(Clone)]
pub struct PipelineAgent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    config: AgentConfig,
    bus: PipelineBus,
    distiller: ContentDistiller,
    optimizer: LayoutOptimizer,
    runtime: Handle,
    active: Mutex<HashMap<String, ActiveEntry>>,
    next_generation: AtomicU64,
    subscriptions: Mutex<Vec<Subscription<Message>>>,
}

type AgentHandler = fn(&Arc<AgentInner>, &Message) -> HandlerResult;

impl PipelineAgent {
    /// Subscribes the agent to its request topics and its direct address.
    /// Must be called from within a Tokio runtime; request work is spawned on it.
    pub fn start(
        bus: PipelineBus,
        config: AgentConfig,
        distiller: ContentDistiller,
        optimizer: LayoutOptimizer,
    ) -> anyhow::Result<Self> {
        let runtime = Handle::try_current().context("Pipeline agent requires a Tokio runtime")?;

        let inner = Arc::new(AgentInner {
            config,
            bus,
            distiller,
            optimizer,
            runtime,
            active: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            subscriptions: Mutex::new(Vec::new()),
        });

        let routes: [(String, AgentHandler); 4] = [
            (topics::PROCESS.to_string(), AgentInner::on_process),
            (topics::DISTILL.to_string(), AgentInner::on_distill),
            (topics::OPTIMIZE.to_string(), AgentInner::on_optimize),
            (direct_key(&inner.config.agent_name), AgentInner::on_control),
        ];
        let subscriptions = routes
            .into_iter()
            .map(|(topic, handler)| subscribe_with(&inner, topic, handler))
            .collect();
        *inner.lock_subscriptions() = subscriptions;

        info!(
            agent = %inner.config.agent_name,
            timeout_ms = inner.config.request_timeout.as_millis() as u64,
            "Pipeline agent started"
        );
        Ok(Self { inner })
    }

    pub fn agent_name(&self) -> &str {
        &self.inner.config.agent_name
    }

    pub fn active_request_count(&self) -> usize {
        self.inner.active().len()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.status_snapshot()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.inner.health_snapshot()
    }

    /// Stops accepting requests, then waits up to `timeout` for in-flight requests to
    /// finish. Requests still running afterwards are reported, not cancelled.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let subscriptions = std::mem::take(&mut *self.inner.lock_subscriptions());
        for subscription in subscriptions {
            debug!(topic = subscription.topic(), "Agent unsubscribing");
            subscription.unsubscribe();
        }
        info!(
            agent = %self.inner.config.agent_name,
            active = self.active_request_count(),
            "Pipeline agent draining"
        );

        let deadline = Instant::now() + timeout;
        loop {
            if self.active_request_count() == 0 {
                info!(agent = %self.inner.config.agent_name, "Pipeline agent drained");
                return ShutdownReport {
                    drained: true,
                    abandoned: Vec::new(),
                };
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL.min(deadline - now)).await;
        }

        let mut abandoned: Vec<String> = self.inner.active().keys().cloned().collect();
        abandoned.sort();
        for request_id in &abandoned {
            warn!(request_id = %request_id, "Abandoning in-flight request at shutdown");
        }
        ShutdownReport {
            drained: false,
            abandoned,
        }
    }
}

fn subscribe_with(
    inner: &Arc<AgentInner>,
    topic: String,
    handler: AgentHandler,
) -> Subscription<Message> {
    let agent = Arc::downgrade(inner);
    inner
        .bus
        .subscribe(topic, move |message: &Message| match agent.upgrade() {
            Some(agent) => handler(&agent, message),
            None => Ok(()),
        })
}

/// Removes the request's tracking entry when the work task ends, including by panic.
struct TrackingGuard {
    agent: Arc<AgentInner>,
    request_id: String,
    generation: u64,
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        self.agent.untrack(&self.request_id, self.generation);
    }
}

impl Drop for AgentInner {
    fn drop(&mut self) {
        let subscriptions = match self.subscriptions.get_mut() {
            Ok(subscriptions) => std::mem::take(subscriptions),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

impl AgentInner {
    // ────────────────────────────────────────────────────────────────────────
    // Bus handlers
    // ────────────────────────────────────────────────────────────────────────

    fn on_process(self: &Arc<Self>, message: &Message) -> HandlerResult {
        let Message::ProcessRequest(request) = message else {
            bail!("unexpected payload on {}", topics::PROCESS);
        };
        let mut request = request.clone();
        if request.request_id.trim().is_empty() {
            request.request_id = generate_request_id();
        }
        let request_id = request.request_id.clone();
        info!(request_id = %request_id, style = ?request.target_style, "Single-page request received");

        self.launch(request_id, Family::Process, move |agent, generation| {
            agent.run_process(request, generation)
        });
        Ok(())
    }

    fn on_distill(self: &Arc<Self>, message: &Message) -> HandlerResult {
        let Message::DistillRequest(request) = message else {
            bail!("unexpected payload on {}", topics::DISTILL);
        };
        let request = request.clone();
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_request_id);
        info!(request_id = %request_id, "Distill request received");

        let id = request_id.clone();
        self.launch(request_id, Family::Distill, move |agent, _| {
            agent.run_distill(id, request)
        });
        Ok(())
    }

    fn on_optimize(self: &Arc<Self>, message: &Message) -> HandlerResult {
        let Message::OptimizeRequest(request) = message else {
            bail!("unexpected payload on {}", topics::OPTIMIZE);
        };
        let request = request.clone();
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_request_id);
        info!(request_id = %request_id, "Optimize request received");

        let id = request_id.clone();
        self.launch(request_id, Family::Optimize, move |agent, _| {
            agent.run_optimize(id, request)
        });
        Ok(())
    }

    fn on_control(self: &Arc<Self>, message: &Message) -> HandlerResult {
        let Message::Control(action) = message else {
            bail!("unexpected payload on direct address {}", self.config.agent_name);
        };
        match action {
            ControlAction::Status => self
                .bus
                .publish(topics::AGENT_STATUS, Message::Status(self.status_snapshot())),
            ControlAction::Health => self
                .bus
                .publish(topics::AGENT_HEALTH, Message::Health(self.health_snapshot())),
            ControlAction::Unknown => {
                warn!(agent = %self.config.agent_name, "Ignoring unknown control action")
            }
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Request execution
    // ────────────────────────────────────────────────────────────────────────

    /// Tracks the request, spawns its work, and spawns a supervisor enforcing the budget.
    fn launch<W, Fut>(self: &Arc<Self>, request_id: String, family: Family, work: W)
    where
        W: FnOnce(Arc<Self>, u64) -> Fut,
        Fut: Future<Output = Message> + Send + 'static,
    {
        let generation = self.track(&request_id, family.initial_stage());
        let settled = Arc::new(AtomicBool::new(false));
        let started = Instant::now();

        let work = work(Arc::clone(self), generation);
        let agent = Arc::clone(self);
        let flag = Arc::clone(&settled);
        let id = request_id.clone();
        let task = self.runtime.spawn(async move {
            let _tracked = TrackingGuard {
                agent: Arc::clone(&agent),
                request_id: id.clone(),
                generation,
            };
            let response = work.await;
            agent.publish_once(&flag, &id, response);
        });

        let agent = Arc::clone(self);
        self.runtime.spawn(async move {
            match tokio::time::timeout(agent.config.request_timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    let elapsed_ms = elapsed_ms(started);
                    error!(request_id = %request_id, error = %join_error, "Pipeline task aborted");
                    let error = PipelineError::Aborted(join_error.to_string()).to_string();
                    agent.publish_once(&settled, &request_id, family.failure(&request_id, error, elapsed_ms));
                }
                Err(_) => {
                    let elapsed_ms = elapsed_ms(started);
                    warn!(request_id = %request_id, elapsed_ms, "Request timed out");
                    let error = PipelineError::Timeout { elapsed_ms }.to_string();
                    agent.publish_once(&settled, &request_id, family.failure(&request_id, error, elapsed_ms));
                }
            }
        });
    }

    async fn run_process(self: Arc<Self>, request: ProcessingRequest, generation: u64) -> Message {
        let started = Instant::now();
        let request_id = request.request_id.clone();
        let outcome = self.process_stages(&request, generation).await;
        let processing_time_ms = elapsed_ms(started);

        match outcome {
            Ok((distilled, optimized)) => {
                info!(
                    request_id = %request_id,
                    processing_time_ms,
                    estimated_lines = optimized.layout_metrics.estimated_lines,
                    fits = optimized.layout_metrics.fits_on_single_page,
                    "Single-page processing completed"
                );
                Message::ProcessComplete(ProcessingResult {
                    request_id,
                    distilled: Some(distilled),
                    optimized: Some(optimized),
                    processing_time_ms,
                    success: true,
                    error: None,
                })
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Single-page processing failed");
                Message::ProcessError(ProcessingResult::failed(
                    &request_id,
                    e.to_string(),
                    processing_time_ms,
                ))
            }
        }
    }

    async fn process_stages(
        &self,
        request: &ProcessingRequest,
        generation: u64,
    ) -> Result<(DistillOutput, OptimizeOutput), PipelineError> {
        let constraints = request.layout_constraints.clone().unwrap_or_default();
        constraints.validate()?;

        self.set_stage(&request.request_id, generation, Stage::Distill);
        let distilled = self
            .distiller
            .distill(
                &request.source_record,
                request.target_style,
                self.config.distill_max_length,
            )
            .await?;

        self.set_stage(&request.request_id, generation, Stage::Optimize);
        let optimized = self
            .optimizer
            .optimize(&distilled.content, &constraints)
            .await?;

        Ok((distilled, optimized))
    }

    async fn run_distill(self: Arc<Self>, request_id: String, request: DistillRequest) -> Message {
        let style = request.style.unwrap_or_default();
        let max_length = request.max_length.unwrap_or(self.config.distill_max_length);

        match self
            .distiller
            .distill(&request.source_record, style, max_length)
            .await
        {
            Ok(result) => {
                info!(request_id = %request_id, distilled_length = result.metadata.distilled_length, "Distill completed");
                Message::DistillComplete { request_id, result }
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Distill failed");
                Message::DistillError {
                    request_id,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_optimize(self: Arc<Self>, request_id: String, request: OptimizeRequest) -> Message {
        let constraints = request.layout_constraints.unwrap_or_default();

        match self
            .optimizer
            .optimize(&request.distilled_content, &constraints)
            .await
        {
            Ok(result) => {
                info!(request_id = %request_id, estimated_lines = result.layout_metrics.estimated_lines, "Optimize completed");
                Message::OptimizeComplete { request_id, result }
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Optimize failed");
                Message::OptimizeError {
                    request_id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Publishes `response` unless the request already settled.
    fn publish_once(&self, settled: &AtomicBool, request_id: &str, response: Message) {
        if settled.swap(true, Ordering::SeqCst) {
            debug!(request_id, "Dropping late response for settled request");
            return;
        }
        if let Some(topic) = response.response_topic() {
            self.bus.publish(topic, response);
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Tracking table
    // ────────────────────────────────────────────────────────────────────────

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveEntry>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<Subscription<Message>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, request_id: &str, stage: Stage) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let entry = ActiveEntry {
            generation,
            started: Instant::now(),
            stage,
        };
        if self.active().insert(request_id.to_string(), entry).is_some() {
            warn!(request_id, "Request id reused while in flight; tracking the newer request");
        }
        generation
    }

    fn set_stage(&self, request_id: &str, generation: u64, stage: Stage) {
        if let Some(entry) = self.active().get_mut(request_id) {
            if entry.generation == generation {
                entry.stage = stage;
                debug!(request_id, stage = ?stage, "Stage advanced");
            }
        }
    }

    fn untrack(&self, request_id: &str, generation: u64) {
        let mut active = self.active();
        if active
            .get(request_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            active.remove(request_id);
        }
    }

    fn status_snapshot(&self) -> StatusSnapshot {
        let active = self.active();
        let mut requests: Vec<RequestStatus> = active
            .iter()
            .map(|(request_id, entry)| RequestStatus {
                request_id: request_id.clone(),
                stage: entry.stage,
                elapsed_ms: elapsed_ms(entry.started),
            })
            .collect();
        requests.sort_by(|a, b| a.request_id.cmp(&b.request_id));

        StatusSnapshot {
            agent_name: self.config.agent_name.clone(),
            active_requests: requests.len(),
            requests,
        }
    }

    fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            agent_name: self.config.agent_name.clone(),
            healthy: true,
            timestamp: Utc::now(),
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classifier::HeuristicClassifier;
    use crate::pipeline::distiller::tests::sample_record;
    use crate::pipeline::models::{CvRecord, Experience, LayoutConstraints, TargetStyle};
    use crate::pipeline::text_service::testing::{Script, ScriptedTextService};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn start_agent(bus: &PipelineBus, script: Script, timeout: Duration) -> PipelineAgent {
        let text = Arc::new(ScriptedTextService::new(script));
        let config = AgentConfig {
            request_timeout: timeout,
            ..AgentConfig::default()
        };
        PipelineAgent::start(
            bus.clone(),
            config,
            ContentDistiller::new(text.clone(), Arc::new(HeuristicClassifier)),
            LayoutOptimizer::new(text),
        )
        .unwrap()
    }

    fn capture(bus: &PipelineBus, topic: &str) -> UnboundedReceiver<Message> {
        let (tx, rx) = unbounded_channel();
        // Dropped handle keeps the handler registered for the test's lifetime.
        let _ = bus.subscribe(topic, move |message: &Message| {
            tx.send(message.clone())?;
            Ok(())
        });
        rx
    }

    fn process_request(request_id: &str, record: CvRecord) -> Message {
        Message::ProcessRequest(ProcessingRequest {
            request_id: request_id.to_string(),
            source_record: record,
            target_style: TargetStyle::Professional,
            layout_constraints: Some(LayoutConstraints::default()),
        })
    }

    fn long_record() -> CvRecord {
        let mut record = sample_record();
        for i in 0..12 {
            record.experience.push(Experience {
                company: format!("Company {i}"),
                position: "Consulting Engineer".to_string(),
                start_date: format!("{}", 1820 + i),
                end_date: Some(format!("{}", 1821 + i)),
                description: Some(
                    "Built calculating machinery and documented every step of the design."
                        .to_string(),
                ),
                responsibilities: vec![
                    "Reviewed mechanical drawings for the difference engine".to_string(),
                ],
            });
        }
        record
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_single_page_with_fallback() {
        let bus = PipelineBus::new();
        let agent = start_agent(&bus, Script::Fail, Duration::from_secs(30));
        let mut complete = capture(&bus, topics::PROCESS_COMPLETE);

        let record = long_record();
        assert!(crate::pipeline::distiller::serialize_record(&record).len() >= 2000);
        bus.publish(topics::PROCESS, process_request("r1", record));

        let Some(Message::ProcessComplete(result)) = complete.recv().await else {
            panic!("expected a completion event");
        };
        assert_eq!(result.request_id, "r1");
        assert!(result.success);
        assert!(result.error.is_none());

        let distilled = result.distilled.unwrap();
        assert!(distilled.metadata.distilled_length < distilled.metadata.original_length);
        let optimized = result.optimized.unwrap();
        assert!(optimized.layout_metrics.fits_on_single_page);

        assert_eq!(agent.active_request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_constraints_publish_error_and_clear_entry() {
        let bus = PipelineBus::new();
        let agent = start_agent(&bus, Script::Fail, Duration::from_secs(30));
        let mut errors = capture(&bus, topics::PROCESS_ERROR);

        bus.publish(
            topics::PROCESS,
            Message::ProcessRequest(ProcessingRequest {
                request_id: "bad".to_string(),
                source_record: sample_record(),
                target_style: TargetStyle::Academic,
                layout_constraints: Some(LayoutConstraints {
                    max_lines: 0,
                    ..LayoutConstraints::default()
                }),
            }),
        );

        let Some(Message::ProcessError(result)) = errors.recv().await else {
            panic!("expected an error event");
        };
        assert!(!result.success);
        assert!(result.error.unwrap().contains("max_lines"));
        assert!(result.distilled.is_none());
        assert_eq!(agent.active_request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_publishes_once_and_drains() {
        let bus = PipelineBus::new();
        let agent = start_agent(
            &bus,
            Script::Delayed(Duration::from_secs(40), "late summary".to_string()),
            Duration::from_secs(30),
        );
        let mut errors = capture(&bus, topics::DISTILL_ERROR);
        let mut completes = capture(&bus, topics::DISTILL_COMPLETE);

        let sent = Instant::now();
        bus.publish(
            topics::DISTILL,
            Message::DistillRequest(DistillRequest {
                request_id: Some("slow".to_string()),
                source_record: sample_record(),
                style: None,
                max_length: None,
            }),
        );

        let Some(Message::DistillError { request_id, error }) = errors.recv().await else {
            panic!("expected a timeout error");
        };
        assert_eq!(request_id, "slow");
        assert_eq!(error, "Request timed out after 30000ms");
        assert!(sent.elapsed() <= Duration::from_millis(30_050));

        // The underlying call is still running.
        assert_eq!(agent.active_request_count(), 1);

        let report = agent.shutdown(Duration::from_secs(20)).await;
        assert!(report.drained);
        assert!(report.abandoned.is_empty());
        assert_eq!(agent.active_request_count(), 0);
        assert!(completes.try_recv().is_err());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_abandoned_requests() {
        let bus = PipelineBus::new();
        let agent = start_agent(&bus, Script::Hang, Duration::from_secs(600));

        bus.publish(topics::PROCESS, process_request("stuck", sample_record()));
        assert_eq!(agent.active_request_count(), 1);

        let report = agent.shutdown(Duration::from_secs(1)).await;
        assert!(!report.drained);
        assert_eq!(report.abandoned, vec!["stuck".to_string()]);

        // No longer accepting requests.
        assert_eq!(bus.subscriber_count(topics::PROCESS), 0);
        bus.publish(topics::PROCESS, process_request("late", sample_record()));
        assert_eq!(agent.active_request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_stage_of_in_flight_request() {
        let bus = PipelineBus::new();
        let agent = start_agent(&bus, Script::Hang, Duration::from_secs(600));
        let mut status = capture(&bus, topics::AGENT_STATUS);

        bus.publish(topics::PROCESS, process_request("p1", sample_record()));
        tokio::time::sleep(Duration::from_millis(250)).await;

        bus.publish_direct(agent.agent_name(), Message::Control(ControlAction::Status));
        let Ok(Message::Status(snapshot)) = status.try_recv() else {
            panic!("status is answered synchronously");
        };
        assert_eq!(snapshot.agent_name, DEFAULT_AGENT_NAME);
        assert_eq!(snapshot.active_requests, 1);
        assert_eq!(snapshot.requests[0].request_id, "p1");
        assert_eq!(snapshot.requests[0].stage, Stage::Distill);
        assert!(snapshot.requests[0].elapsed_ms >= 250);
    }

    #[tokio::test]
    async fn test_health_and_unknown_control_actions() {
        let bus = PipelineBus::new();
        let agent = start_agent(&bus, Script::Fail, Duration::from_secs(30));
        let mut health = capture(&bus, topics::AGENT_HEALTH);
        let mut status = capture(&bus, topics::AGENT_STATUS);

        bus.publish_direct(agent.agent_name(), Message::Control(ControlAction::Health));
        let Ok(Message::Health(snapshot)) = health.try_recv() else {
            panic!("expected a health snapshot");
        };
        assert!(snapshot.healthy);
        assert_eq!(
            snapshot.capabilities,
            vec!["cv:distill", "cv:optimize", "cv:process:single-page"]
        );

        bus.publish_direct(agent.agent_name(), Message::Control(ControlAction::Unknown));
        // Broadcasting on the agent's name is not a direct message.
        bus.publish(agent.agent_name(), Message::Control(ControlAction::Status));
        assert!(health.try_recv().is_err());
        assert!(status.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_request_id_is_generated() {
        let bus = PipelineBus::new();
        let _agent = start_agent(&bus, Script::Reply("• Rust\n• SQL".to_string()), Duration::from_secs(30));
        let mut completes = capture(&bus, topics::OPTIMIZE_COMPLETE);

        bus.publish(
            topics::OPTIMIZE,
            Message::OptimizeRequest(OptimizeRequest {
                request_id: None,
                distilled_content: "Rust\nSQL".to_string(),
                layout_constraints: None,
            }),
        );

        let Some(Message::OptimizeComplete { request_id, result }) = completes.recv().await else {
            panic!("expected an optimize completion");
        };
        assert!(request_id.starts_with("llm-"));
        assert_eq!(result.content, "• Rust\n• SQL");
    }

    #[tokio::test]
    async fn test_wrong_payload_is_rejected_by_handler() {
        let bus = PipelineBus::new();
        let agent = start_agent(&bus, Script::Fail, Duration::from_secs(30));

        bus.publish(topics::DISTILL, Message::Control(ControlAction::Status));
        assert_eq!(agent.active_request_count(), 0);
    }

    #[tokio::test]
    async fn test_reused_id_is_not_removed_by_older_run() {
        let bus = PipelineBus::new();
        let agent = start_agent(&bus, Script::Fail, Duration::from_secs(30));
        let inner = &agent.inner;

        let first = inner.track("dup", Stage::Pipeline);
        let second = inner.track("dup", Stage::Pipeline);
        assert_eq!(agent.active_request_count(), 1);

        inner.untrack("dup", first);
        assert_eq!(agent.active_request_count(), 1);
        inner.set_stage("dup", first, Stage::Optimize);
        assert_eq!(agent.status().requests[0].stage, Stage::Pipeline);

        inner.untrack("dup", second);
        assert_eq!(agent.active_request_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_agent_leaves_no_handlers_on_the_bus() {
        let bus = PipelineBus::new();
        let agent = start_agent(&bus, Script::Fail, Duration::from_secs(30));
        assert_eq!(bus.subscriber_count(topics::PROCESS), 1);
        drop(agent);

        assert_eq!(bus.subscriber_count(topics::PROCESS), 0);
        assert_eq!(bus.subscriber_count(topics::DISTILL), 0);
        assert_eq!(bus.subscriber_count(topics::OPTIMIZE), 0);
        assert_eq!(bus.subscriber_count(&direct_key(DEFAULT_AGENT_NAME)), 0);
        bus.publish(topics::PROCESS, process_request("orphan", sample_record()));

        let restarted = start_agent(&bus, Script::Fail, Duration::from_secs(30));
        assert_eq!(bus.subscriber_count(topics::PROCESS), 1);
        drop(restarted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_panicking_after_timeout_is_untracked() {
        let bus = PipelineBus::new();
        let agent = start_agent(
            &bus,
            Script::PanicAfter(Duration::from_secs(40)),
            Duration::from_secs(30),
        );
        let mut errors = capture(&bus, topics::DISTILL_ERROR);

        bus.publish(
            topics::DISTILL,
            Message::DistillRequest(DistillRequest {
                request_id: Some("doomed".to_string()),
                source_record: sample_record(),
                style: None,
                max_length: None,
            }),
        );

        let Some(Message::DistillError { error, .. }) = errors.recv().await else {
            panic!("expected a timeout error");
        };
        assert!(PipelineError::is_timeout_message(&error));
        assert_eq!(agent.active_request_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(agent.active_request_count(), 0);

        let report = agent.shutdown(Duration::from_secs(60)).await;
        assert!(report.drained);
        assert!(report.abandoned.is_empty());
        assert!(errors.try_recv().is_err());
    }
}
