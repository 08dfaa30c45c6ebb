use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::layout::FitOptions;
use crate::pipeline::classifier::{ContentClassifier, HeuristicClassifier};
use crate::pipeline::client::PipelineClient;
use crate::pipeline::distiller::ContentDistiller;
use crate::pipeline::messages::PipelineBus;
use crate::pipeline::optimizer::LayoutOptimizer;
use crate::pipeline::orchestrator::{AgentConfig, PipelineAgent};
use crate::pipeline::text_service::TextService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Publishes HTTP requests on the bus and awaits the agent's reply.
    pub client: PipelineClient,
    pub agent: PipelineAgent,
    pub classifier: Arc<dyn ContentClassifier>,
    /// Fit settings used when a layout request leaves them out.
    pub fit_defaults: FitOptions,
}

impl AppState {
    /// Wires the bus, the pipeline agent and its client around `text`.
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config, text: Arc<dyn TextService>) -> Result<Self> {
        let bus = PipelineBus::new();
        let classifier: Arc<dyn ContentClassifier> = Arc::new(HeuristicClassifier);

        let agent = PipelineAgent::start(
            bus.clone(),
            AgentConfig {
                agent_name: config.agent_name.clone(),
                request_timeout: config.request_timeout,
                distill_max_length: config.distill_max_length,
            },
            ContentDistiller::new(Arc::clone(&text), Arc::clone(&classifier)),
            LayoutOptimizer::new(text),
        )?;
        let client = PipelineClient::new(bus, &config.agent_name, config.request_timeout);

        let fit_defaults = FitOptions {
            requested_scale: config.fit_requested_scale,
            max_passes: config.fit_max_passes,
            ..FitOptions::default()
        };
        fit_defaults.validate()?;

        Ok(Self {
            config,
            client,
            agent,
            classifier,
            fit_defaults,
        })
    }
}
