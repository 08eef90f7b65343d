//! The phase orchestrator, the core of an analysis run.
//!
//! Drives one message through up to three completion calls:
//! - Breakdown: free-text decomposition, one line per client order
//! - Structuring: strict JSON against the catalog
//! - Repair: a single syntax-only fix when validation rejects the JSON
//!
//! The breakdown output is never parsed, only carried into the structuring
//! prompt (and kept in the transcript for diagnostics). Validation failure
//! triggers exactly one repair; a second failure ends the run. Cancellation
//! is cooperative and checked at every phase boundary, so a dispatched
//! request is never aborted mid-flight, but no further call is issued.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::CatalogSnapshot;
use crate::completion::{CompletionError, CompletionOptions, CompletionService};
use crate::pipeline::progress::{RunHandle, RunStage};
use crate::pipeline::prompts::PromptSet;
use crate::pipeline::validator::{validate_response, ExtractedOrderGroup, SchemaError};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Everything one run needs besides the message and the catalog.
///
/// Built per run from the loaded config; there is no process-wide state,
/// so two sessions with different prompts or models never interfere.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Active prompt templates.
    pub prompts: PromptSet,
    /// Generation options for the breakdown call. The long pole, so it
    /// gets the generous timeout.
    pub breakdown_options: CompletionOptions,
    /// Generation options for the structuring call.
    pub structure_options: CompletionOptions,
    /// Generation options for the repair call.
    pub repair_options: CompletionOptions,
    /// Skip the breakdown phase and structure the raw message directly.
    pub single_call: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            prompts: PromptSet::default(),
            breakdown_options: CompletionOptions {
                temperature: 0.4,
                max_output_tokens: 1024,
                timeout: Duration::from_secs(60),
                ..CompletionOptions::default()
            },
            structure_options: CompletionOptions::default(),
            repair_options: CompletionOptions {
                temperature: 0.0,
                ..CompletionOptions::default()
            },
            single_call: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and output
// ---------------------------------------------------------------------------

/// Terminal failure of an analysis run.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A completion call failed.
    #[error("{} phase failed: {source}", .phase.label())]
    Completion {
        /// Which phase was running.
        phase: RunStage,
        /// The underlying service failure.
        #[source]
        source: CompletionError,
    },
    /// The structuring output failed validation even after the repair pass.
    #[error("response failed validation after repair: {source}")]
    Schema {
        /// The violation that ended the run.
        #[source]
        source: SchemaError,
        /// The offending raw text, for diagnostics.
        raw: String,
    },
    /// The run was cancelled between phases.
    #[error("analysis cancelled")]
    Cancelled,
}

/// Raw completion text per phase, kept for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct PhaseTranscript {
    /// Breakdown phase output, absent in single-call mode.
    pub breakdown: Option<String>,
    /// Structuring phase output.
    pub structuring: Option<String>,
    /// Repair phase output, present only when a repair ran.
    pub repair: Option<String>,
}

/// A completed analysis: validated groups plus the phase transcript.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Validated order groups, in response order.
    pub groups: Vec<ExtractedOrderGroup>,
    /// Raw phase outputs.
    pub transcript: PhaseTranscript,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs the phase protocol against a completion service.
pub struct Orchestrator {
    service: Arc<dyn CompletionService>,
    config: AnalysisConfig,
}

impl Orchestrator {
    /// Create an orchestrator for a service and run configuration.
    pub fn new(service: Arc<dyn CompletionService>, config: AnalysisConfig) -> Self {
        Self { service, config }
    }

    /// Run the full protocol for one message.
    ///
    /// Stage and progress updates go through `handle`; on return the
    /// handle is in a terminal stage matching the result.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError`] when a phase call fails, validation
    /// fails twice, or the run is cancelled.
    pub async fn run(
        &self,
        message: &str,
        catalog: &CatalogSnapshot,
        handle: &RunHandle,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let result = self.run_phases(message, catalog, handle).await;
        match &result {
            Ok(_) | Err(AnalysisError::Cancelled) => {}
            Err(error) => {
                warn!(error = %error, "analysis failed");
                handle.set_stage(RunStage::Failed);
            }
        }
        result
    }

    async fn run_phases(
        &self,
        message: &str,
        catalog: &CatalogSnapshot,
        handle: &RunHandle,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let mut transcript = PhaseTranscript::default();

        let source_text = if self.config.single_call {
            message.to_owned()
        } else {
            self.ensure_live(handle)?;
            handle.set_stage(RunStage::Breakdown);
            info!(model = self.service.model_id(), "phase 1: breakdown");
            let prompt = self.config.prompts.breakdown_prompt(message, catalog);
            let text = self
                .complete(&prompt, &self.config.breakdown_options, RunStage::Breakdown)
                .await?;
            transcript.breakdown = Some(text.clone());
            text
        };

        self.ensure_live(handle)?;
        handle.set_stage(RunStage::Structuring);
        info!("phase 2: structuring");
        let prompt = self.config.prompts.structure_prompt(&source_text, catalog);
        let structured = self
            .complete(&prompt, &self.config.structure_options, RunStage::Structuring)
            .await?;
        transcript.structuring = Some(structured.clone());

        self.ensure_live(handle)?;
        handle.set_stage(RunStage::Validating);
        let first_error = match validate_response(&structured) {
            Ok(groups) => {
                handle.set_stage(RunStage::Done);
                info!(groups = groups.len(), "analysis complete");
                return Ok(AnalysisOutcome { groups, transcript });
            }
            Err(error) => error,
        };
        warn!(error = %first_error, "structuring output rejected, repairing");

        self.ensure_live(handle)?;
        handle.set_stage(RunStage::Repairing);
        info!("phase 3: repair");
        let prompt = self.config.prompts.repair_prompt(&structured);
        let repaired = self
            .complete(&prompt, &self.config.repair_options, RunStage::Repairing)
            .await?;
        transcript.repair = Some(repaired.clone());

        self.ensure_live(handle)?;
        handle.set_stage(RunStage::Validating);
        match validate_response(&repaired) {
            Ok(groups) => {
                handle.set_stage(RunStage::Done);
                info!(groups = groups.len(), "analysis complete after repair");
                Ok(AnalysisOutcome { groups, transcript })
            }
            Err(source) => Err(AnalysisError::Schema {
                source,
                raw: repaired,
            }),
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
        phase: RunStage,
    ) -> Result<String, AnalysisError> {
        self.service
            .complete(prompt, options)
            .await
            .map_err(|source| AnalysisError::Completion { phase, source })
    }

    /// Between-phase cancellation check.
    fn ensure_live(&self, handle: &RunHandle) -> Result<(), AnalysisError> {
        if handle.is_cancelled() {
            handle.set_stage(RunStage::Cancelled);
            return Err(AnalysisError::Cancelled);
        }
        Ok(())
    }
}
