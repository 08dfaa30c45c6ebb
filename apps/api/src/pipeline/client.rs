//! Caller-side helper: publish a request on the bus and await its reply.
//!
//! Each call registers a one-shot reply slot on the matching complete/error topics
//! before publishing. The first matching event empties the slot; anything arriving
//! later for the same request is dropped. The reply subscriptions are removed when
//! the call returns or its future is dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::bus::Subscription;
use crate::pipeline::messages::{
    topics, ControlAction, DistillRequest, HealthSnapshot, Message, OptimizeRequest, PipelineBus,
    StatusSnapshot,
};
use crate::pipeline::models::{DistillOutput, OptimizeOutput, ProcessingRequest, ProcessingResult};
use crate::pipeline::{generate_request_id, PipelineError};

/// Extra wait on top of the agent's own budget, so the agent's timeout event
/// normally arrives before the client gives up.
pub const REPLY_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No reply for request {request_id} within {timeout_ms}ms")]
    Timeout { request_id: String, timeout_ms: u64 },

    #[error("Request {request_id} failed: {message}")]
    Failed { request_id: String, message: String },

    #[error("Agent '{0}' did not answer")]
    NoAgent(String),
}

impl ClientError {
    /// True for a client-side timeout and for a timeout reported by the agent.
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::Timeout { .. } => true,
            ClientError::Failed { message, .. } => PipelineError::is_timeout_message(message),
            ClientError::NoAgent(_) => false,
        }
    }
}

/// Successful standalone stage result together with the id it ran under.
#[derive(Debug, Clone, Serialize)]
pub struct StageReply<T> {
    pub request_id: String,
    pub result: T,
}

#[derive(Clone)]
pub struct PipelineClient {
    bus: PipelineBus,
    agent_name: String,
    timeout: Duration,
}

type Slot = Arc<Mutex<Option<oneshot::Sender<Message>>>>;

/// Unsubscribes the reply handlers when dropped.
struct ReplySubscriptions(Vec<Subscription<Message>>);

impl Drop for ReplySubscriptions {
    fn drop(&mut self) {
        for subscription in self.0.drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl PipelineClient {
    /// `agent_timeout` is the agent's per-request budget; the client waits that
    /// long plus [`REPLY_GRACE`].
    pub fn new(bus: PipelineBus, agent_name: impl Into<String>, agent_timeout: Duration) -> Self {
        Self {
            bus,
            agent_name: agent_name.into(),
            timeout: agent_timeout + REPLY_GRACE,
        }
    }

    /// Runs the full distill → optimize pipeline. A failure event becomes
    /// [`ClientError::Failed`].
    pub async fn process(&self, mut request: ProcessingRequest) -> Result<ProcessingResult, ClientError> {
        if request.request_id.trim().is_empty() {
            request.request_id = generate_request_id();
        }
        let request_id = request.request_id.clone();

        let reply = self
            .round_trip(
                &request_id,
                &[topics::PROCESS_COMPLETE, topics::PROCESS_ERROR],
                topics::PROCESS,
                Message::ProcessRequest(request),
            )
            .await?;

        match reply {
            Message::ProcessComplete(result) => Ok(result),
            Message::ProcessError(result) => Err(ClientError::Failed {
                request_id,
                message: result.error.unwrap_or_else(|| "processing failed".to_string()),
            }),
            other => Err(unexpected(&request_id, &other)),
        }
    }

    pub async fn distill(
        &self,
        mut request: DistillRequest,
    ) -> Result<StageReply<DistillOutput>, ClientError> {
        let request_id = ensure_id(&mut request.request_id);

        let reply = self
            .round_trip(
                &request_id,
                &[topics::DISTILL_COMPLETE, topics::DISTILL_ERROR],
                topics::DISTILL,
                Message::DistillRequest(request),
            )
            .await?;

        match reply {
            Message::DistillComplete { request_id, result } => Ok(StageReply { request_id, result }),
            Message::DistillError { request_id, error } => Err(ClientError::Failed {
                request_id,
                message: error,
            }),
            other => Err(unexpected(&request_id, &other)),
        }
    }

    pub async fn optimize(
        &self,
        mut request: OptimizeRequest,
    ) -> Result<StageReply<OptimizeOutput>, ClientError> {
        let request_id = ensure_id(&mut request.request_id);

        let reply = self
            .round_trip(
                &request_id,
                &[topics::OPTIMIZE_COMPLETE, topics::OPTIMIZE_ERROR],
                topics::OPTIMIZE,
                Message::OptimizeRequest(request),
            )
            .await?;

        match reply {
            Message::OptimizeComplete { request_id, result } => {
                Ok(StageReply { request_id, result })
            }
            Message::OptimizeError { request_id, error } => Err(ClientError::Failed {
                request_id,
                message: error,
            }),
            other => Err(unexpected(&request_id, &other)),
        }
    }

    /// Asks the agent for its status over its direct address.
    pub fn status(&self) -> Result<StatusSnapshot, ClientError> {
        match self.control(ControlAction::Status, topics::AGENT_STATUS)? {
            Message::Status(snapshot) => Ok(snapshot),
            _ => Err(ClientError::NoAgent(self.agent_name.clone())),
        }
    }

    pub fn health(&self) -> Result<HealthSnapshot, ClientError> {
        match self.control(ControlAction::Health, topics::AGENT_HEALTH)? {
            Message::Health(snapshot) => Ok(snapshot),
            _ => Err(ClientError::NoAgent(self.agent_name.clone())),
        }
    }

    /// Control replies are published synchronously inside `publish_direct`, so the
    /// slot is either filled when it returns or the agent is not listening.
    fn control(&self, action: ControlAction, reply_topic: &str) -> Result<Message, ClientError> {
        let (subscriptions, mut rx) = self.reply_slot(&[reply_topic], |_| true);
        self.bus.publish_direct(&self.agent_name, Message::Control(action));
        drop(subscriptions);

        rx.try_recv()
            .map_err(|_| ClientError::NoAgent(self.agent_name.clone()))
    }

    async fn round_trip(
        &self,
        request_id: &str,
        reply_topics: &[&str],
        request_topic: &str,
        request: Message,
    ) -> Result<Message, ClientError> {
        let wanted = request_id.to_string();
        let (_subscriptions, rx) =
            self.reply_slot(reply_topics, move |m| m.request_id() == Some(wanted.as_str()));

        debug!(request_id, topic = request_topic, "Publishing request");
        self.bus.publish(request_topic, request);

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // The sender lives in the subscriptions held above, so it cannot be dropped
            // before the timeout.
            Ok(Err(_)) | Err(_) => {
                warn!(request_id, timeout_ms = self.timeout.as_millis() as u64, "No reply before client timeout");
                Err(ClientError::Timeout {
                    request_id: request_id.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    fn reply_slot<F>(
        &self,
        reply_topics: &[&str],
        matches: F,
    ) -> (ReplySubscriptions, oneshot::Receiver<Message>)
    where
        F: Fn(&Message) -> bool + Clone + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));

        let subscriptions = reply_topics
            .iter()
            .map(|topic| {
                let slot = Arc::clone(&slot);
                let matches = matches.clone();
                self.bus.subscribe(*topic, move |message: &Message| {
                    if !matches(message) {
                        return Ok(());
                    }
                    let sender = slot
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .take();
                    match sender {
                        // The receiver may already be gone if the caller gave up.
                        Some(sender) => {
                            let _ = sender.send(message.clone());
                        }
                        None => debug!(
                            request_id = message.request_id().unwrap_or_default(),
                            "Dropping duplicate reply"
                        ),
                    }
                    Ok(())
                })
            })
            .collect();

        (ReplySubscriptions(subscriptions), rx)
    }
}

fn ensure_id(request_id: &mut Option<String>) -> String {
    match request_id {
        Some(id) if !id.trim().is_empty() => id.clone(),
        _ => {
            let id = generate_request_id();
            *request_id = Some(id.clone());
            id
        }
    }
}

fn unexpected(request_id: &str, message: &Message) -> ClientError {
    ClientError::Failed {
        request_id: request_id.to_string(),
        message: format!("unexpected reply: {message:?}"),
    }
}
