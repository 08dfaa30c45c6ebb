//! Bus payloads for the pipeline, one variant family per topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::MessageBus;
use crate::pipeline::models::{
    CvRecord, DistillOutput, LayoutConstraints, OptimizeOutput, ProcessingRequest,
    ProcessingResult, Stage, TargetStyle,
};

pub mod topics {
    pub const DISTILL: &str = "cv:distill";
    pub const DISTILL_COMPLETE: &str = "cv:distill:complete";
    pub const DISTILL_ERROR: &str = "cv:distill:error";

    pub const OPTIMIZE: &str = "cv:optimize";
    pub const OPTIMIZE_COMPLETE: &str = "cv:optimize:complete";
    pub const OPTIMIZE_ERROR: &str = "cv:optimize:error";

    pub const PROCESS: &str = "cv:process:single-page";
    pub const PROCESS_COMPLETE: &str = "cv:process:single-page:complete";
    pub const PROCESS_ERROR: &str = "cv:process:single-page:error";

    pub const AGENT_STATUS: &str = "agent:status";
    pub const AGENT_HEALTH: &str = "agent:health";
}

/// The bus type shared by the agent, the client and the HTTP layer.
pub type PipelineBus = MessageBus<Message>;

#[derive(Debug, Clone)]
pub enum Message {
    DistillRequest(DistillRequest),
    DistillComplete {
        request_id: String,
        result: DistillOutput,
    },
    DistillError {
        request_id: String,
        error: String,
    },

    OptimizeRequest(OptimizeRequest),
    OptimizeComplete {
        request_id: String,
        result: OptimizeOutput,
    },
    OptimizeError {
        request_id: String,
        error: String,
    },

    ProcessRequest(ProcessingRequest),
    ProcessComplete(ProcessingResult),
    ProcessError(ProcessingResult),

    Control(ControlAction),
    Status(StatusSnapshot),
    Health(HealthSnapshot),
}

impl Message {
    /// Request id carried by request and response variants.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Message::DistillRequest(r) => r.request_id.as_deref(),
            Message::OptimizeRequest(r) => r.request_id.as_deref(),
            Message::ProcessRequest(r) => Some(&r.request_id),
            Message::DistillComplete { request_id, .. }
            | Message::DistillError { request_id, .. }
            | Message::OptimizeComplete { request_id, .. }
            | Message::OptimizeError { request_id, .. } => Some(request_id),
            Message::ProcessComplete(r) | Message::ProcessError(r) => Some(&r.request_id),
            Message::Control(_) | Message::Status(_) | Message::Health(_) => None,
        }
    }

    /// Broadcast topic a response variant is published on.
    pub fn response_topic(&self) -> Option<&'static str> {
        let topic = match self {
            Message::DistillComplete { .. } => topics::DISTILL_COMPLETE,
            Message::DistillError { .. } => topics::DISTILL_ERROR,
            Message::OptimizeComplete { .. } => topics::OPTIMIZE_COMPLETE,
            Message::OptimizeError { .. } => topics::OPTIMIZE_ERROR,
            Message::ProcessComplete(_) => topics::PROCESS_COMPLETE,
            Message::ProcessError(_) => topics::PROCESS_ERROR,
            Message::Status(_) => topics::AGENT_STATUS,
            Message::Health(_) => topics::AGENT_HEALTH,
            Message::DistillRequest(_)
            | Message::OptimizeRequest(_)
            | Message::ProcessRequest(_)
            | Message::Control(_) => return None,
        };
        Some(topic)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub source_record: CvRecord,
    #[serde(default)]
    pub style: Option<TargetStyle>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub distilled_content: String,
    #[serde(default)]
    pub layout_constraints: Option<LayoutConstraints>,
}

/// Direct-address control actions understood by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Status,
    Health,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub agent_name: String,
    pub active_requests: usize,
    pub requests: Vec<RequestStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatus {
    pub request_id: String,
    pub stage: Stage,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub agent_name: String,
    pub healthy: bool,
    pub timestamp: DateTime<Utc>,
    pub capabilities: Vec<String>,
}
