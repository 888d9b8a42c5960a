//! Phase driver for code generation runs

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use specsmith_config::GeneratorConfig;
use specsmith_extraction::{
    CodeBlockScanner, Parsed, extract_code_blocks, parse_expecting, parse_structured,
};
use specsmith_llm::{GenerateOptions, LlmError, ProviderRouter};
use specsmith_model::{
    CodeBlock, Expectation, GenerationRecord, KeyConcepts, RecordStore, RecordStoreError,
    ValidationReport,
};
use specsmith_utils::logging::phase_span;

use crate::events::{GenerationEvent, emit};
use crate::run::{GenerationRun, GenerationStatus, PhaseOutputs, RunStore};
use crate::{prompts, purpose};

/// Status reported to callers: a run status, or the outcome of a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseStatus {
    ExtractingConcepts,
    ExtractingConstraints,
    GeneratingCode,
    ValidatingCode,
    FixingIssues,
    Completed,
    Error,
    AlreadyCompleted,
    NotFound,
}

impl From<GenerationStatus> for ResponseStatus {
    fn from(status: GenerationStatus) -> Self {
        match status {
            GenerationStatus::ExtractingConcepts => Self::ExtractingConcepts,
            GenerationStatus::ExtractingConstraints => Self::ExtractingConstraints,
            GenerationStatus::GeneratingCode => Self::GeneratingCode,
            GenerationStatus::ValidatingCode => Self::ValidatingCode,
            GenerationStatus::FixingIssues => Self::FixingIssues,
            GenerationStatus::Completed => Self::Completed,
            GenerationStatus::Error => Self::Error,
        }
    }
}

/// Result of every generator entry point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResponse {
    pub id: String,
    pub status: ResponseStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concepts: Option<KeyConcepts>,
    pub constraints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub code_blocks: Vec<CodeBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    pub fixed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationResponse {
    fn from_run(run: &GenerationRun) -> Self {
        let (code, code_blocks) = match run.outputs.code() {
            Some((code, blocks)) => (Some(code.to_string()), blocks.to_vec()),
            None => (None, Vec::new()),
        };
        Self {
            id: run.id.clone(),
            status: run.status.into(),
            message: run.message.clone(),
            concepts: run.outputs.concepts().cloned(),
            constraints: run.outputs.constraints().map(<[String]>::to_vec).unwrap_or_default(),
            code,
            code_blocks,
            validation: run.validation.clone(),
            fixed: run.fixed,
            error: run.error.clone(),
        }
    }

    fn not_found(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: ResponseStatus::NotFound,
            message: format!("No generation run exists for '{id}'"),
            concepts: None,
            constraints: Vec::new(),
            code: None,
            code_blocks: Vec::new(),
            validation: None,
            fixed: false,
            error: None,
        }
    }
}

/// Union of explicit and inferred constraints: explicit first, exact
/// duplicates and blank entries dropped
#[must_use]
pub fn merge_constraints(explicit: &[String], inferred: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(explicit.len() + inferred.len());
    for constraint in explicit.iter().chain(inferred) {
        if !constraint.trim().is_empty() && !merged.contains(constraint) {
            merged.push(constraint.clone());
        }
    }
    merged
}

/// Accepted shapes for the inferred-constraints reply
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConstraintReply {
    Wrapped {
        #[serde(alias = "implicit_constraints", alias = "inferred_constraints", alias = "items")]
        constraints: Vec<String>,
    },
    List(Vec<String>),
}

/// Code from a model answer: its fenced blocks joined, or the whole answer
/// when it has none
fn code_from(raw: &str, blocks: &[CodeBlock]) -> String {
    if blocks.is_empty() {
        return raw.trim().to_string();
    }
    blocks
        .iter()
        .map(|b| b.code.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn phase_message(phase: GenerationStatus, run: &GenerationRun) -> String {
    match phase {
        GenerationStatus::ExtractingConcepts => "Extracting key concepts".to_string(),
        GenerationStatus::ExtractingConstraints => "Extracting constraints".to_string(),
        GenerationStatus::GeneratingCode => "Generating code".to_string(),
        GenerationStatus::ValidatingCode => "Validating generated code".to_string(),
        GenerationStatus::FixingIssues => {
            let issues = run.validation.as_ref().map_or(0, |r| r.issues.len());
            format!("Fixing {issues} validation issue(s)")
        }
        GenerationStatus::Completed => "Code generation completed".to_string(),
        GenerationStatus::Error => "Code generation failed".to_string(),
    }
}

fn record_for(run: &GenerationRun) -> GenerationRecord {
    let (code, code_blocks) = run
        .outputs
        .code()
        .map(|(code, blocks)| (code.to_string(), blocks.to_vec()))
        .unwrap_or_default();
    GenerationRecord {
        run_id: run.run_id.clone(),
        expectation_id: run.id.clone(),
        code,
        code_blocks,
        concepts: run.outputs.concepts().cloned().unwrap_or_default(),
        constraints: run.outputs.constraints().map(<[String]>::to_vec).unwrap_or_default(),
        validation: run.validation.clone(),
        fixed: run.fixed,
        completed_at: Utc::now(),
    }
}

/// Resumable pipeline turning an expectation into code.
///
/// Phases run strictly in order; each one's output is kept on the run, so a
/// failed run resumes at the first phase whose output is missing. Progress is
/// published as [`GenerationEvent`]s to the sink registered for the
/// expectation id.
pub struct CodeGenerator {
    router: Arc<ProviderRouter>,
    config: GeneratorConfig,
    runs: RunStore,
    sinks: HashMap<String, UnboundedSender<GenerationEvent>>,
    pending: Vec<GenerationRecord>,
}

impl std::fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGenerator")
            .field("config", &self.config)
            .field("runs", &self.runs.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl CodeGenerator {
    pub fn new(router: Arc<ProviderRouter>, config: GeneratorConfig) -> Self {
        Self {
            router,
            config,
            runs: RunStore::new(),
            sinks: HashMap::new(),
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn run(&self, id: &str) -> Option<&GenerationRun> {
        self.runs.get(id)
    }

    /// Drop the event sink registered for `id`, closing the channel once the
    /// caller holds no other sender. Returns whether one was registered.
    pub fn detach_events(&mut self, id: &str) -> bool {
        self.sinks.remove(id).is_some()
    }

    /// Completed runs not yet synced
    #[must_use]
    pub fn pending_records(&self) -> &[GenerationRecord] {
        &self.pending
    }

    /// Run every phase for `expectation`, replacing any earlier run for the
    /// same id.
    ///
    /// A given `events` sink is registered for the expectation id and kept
    /// for later resumes. Never fails: a phase failure leaves the run in
    /// `error` with its earlier outputs intact.
    pub async fn generate(
        &mut self,
        expectation: &Expectation,
        events: Option<UnboundedSender<GenerationEvent>>,
    ) -> GenerationResponse {
        let mut expectation = expectation.clone();
        if expectation.id.trim().is_empty() {
            expectation.id = Uuid::new_v4().to_string();
        }
        if let Some(sink) = events {
            self.sinks.insert(expectation.id.clone(), sink);
        }

        let run = GenerationRun::new(expectation, Uuid::new_v4().to_string());
        info!(id = %run.id, run_id = %run.run_id, "Starting code generation");
        self.drive(run).await
    }

    /// Continue a run from its first missing phase output.
    ///
    /// Reports `already_completed` for a finished run. An unknown id reports
    /// `not_found` without calling any provider; no run is created.
    pub async fn resume_generation(
        &mut self,
        id: &str,
        events: Option<UnboundedSender<GenerationEvent>>,
    ) -> GenerationResponse {
        let Some(mut run) = self.runs.take(id) else {
            info!(id, "Resume requested for unknown generation run");
            return GenerationResponse::not_found(id);
        };

        if run.completed {
            let mut response = GenerationResponse::from_run(&run);
            response.status = ResponseStatus::AlreadyCompleted;
            response.message = "Code generation already completed".to_string();
            self.runs.insert(run);
            return response;
        }

        if let Some(sink) = events {
            self.sinks.insert(id.to_string(), sink);
        }
        info!(
            id,
            run_id = %run.run_id,
            phase = ?run.next_phase(),
            "Resuming code generation"
        );
        run.error = None;
        self.drive(run).await
    }

    /// Current state of the run for `id`; `not_found` when there is none
    #[must_use]
    pub fn get_generation_status(&self, id: &str) -> GenerationResponse {
        self.runs
            .get(id)
            .map_or_else(|| GenerationResponse::not_found(id), GenerationResponse::from_run)
    }

    /// Hand every pending record to `store`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the failed record and the ones after it
    /// stay pending for the next sync.
    pub async fn sync_to_memory(&mut self, store: &dyn RecordStore) -> Result<usize, RecordStoreError> {
        let mut pending = std::mem::take(&mut self.pending);
        for i in 0..pending.len() {
            if let Err(e) = store.record_generation(&pending[i]).await {
                warn!(error = %e, remaining = pending.len() - i, "Generation sync failed");
                self.pending = pending.split_off(i);
                return Err(e);
            }
        }
        debug!(synced = pending.len(), "Generation records synced");
        Ok(pending.len())
    }

    fn notify(&mut self, run: &GenerationRun) {
        let sink = self.sinks.get(&run.id);
        let event = GenerationEvent::status(&run.id, run.status, &run.message);
        if !emit(sink, event) {
            self.sinks.remove(&run.id);
        }
    }

    /// Run the remaining phases of `run` and store it
    async fn drive(&mut self, mut run: GenerationRun) -> GenerationResponse {
        while let Some(phase) = run.next_phase() {
            let message = phase_message(phase, &run);
            run.set_status(phase, message);
            self.notify(&run);

            let sink = self.sinks.get(&run.id).cloned();
            let span = phase_span(&run.id, phase.as_ref());
            let outcome = self
                .run_phase(&mut run, phase, sink.as_ref())
                .instrument(span)
                .await;

            if let Err(e) = outcome {
                warn!(id = %run.id, phase = %phase, error = %e, "Generation phase failed");
                run.error = Some(e.to_string());
                run.set_status(GenerationStatus::Error, format!("Failed while {phase}: {e}"));
                self.notify(&run);
                let response = GenerationResponse::from_run(&run);
                self.runs.insert(run);
                return response;
            }
        }

        run.completed = true;
        let message = if run.fixed {
            "Code generation completed after one repair pass"
        } else {
            "Code generation completed"
        };
        run.set_status(GenerationStatus::Completed, message);
        self.notify(&run);
        self.pending.push(record_for(&run));
        info!(id = %run.id, run_id = %run.run_id, fixed = run.fixed, "Code generation completed");

        let response = GenerationResponse::from_run(&run);
        self.runs.insert(run);
        response
    }

    async fn run_phase(
        &self,
        run: &mut GenerationRun,
        phase: GenerationStatus,
        sink: Option<&UnboundedSender<GenerationEvent>>,
    ) -> Result<(), LlmError> {
        let concepts = run.outputs.concepts().cloned().unwrap_or_default();
        let constraints = run.outputs.constraints().map(<[String]>::to_vec).unwrap_or_default();

        match phase {
            GenerationStatus::ExtractingConcepts => {
                let concepts = self.extract_concepts(&run.expectation).await?;
                run.outputs = PhaseOutputs::Concepts { concepts };
            }
            GenerationStatus::ExtractingConstraints => {
                let inferred = self.infer_constraints(&run.expectation, &concepts).await?;
                let constraints = merge_constraints(&run.expectation.constraints, &inferred);
                run.outputs = PhaseOutputs::Constrained {
                    concepts,
                    constraints,
                };
            }
            GenerationStatus::GeneratingCode => {
                let (code, code_blocks) = self
                    .generate_code(&run.id, &run.expectation, &concepts, &constraints, sink)
                    .await?;
                run.outputs = PhaseOutputs::Generated {
                    concepts,
                    constraints,
                    code,
                    code_blocks,
                };
            }
            GenerationStatus::ValidatingCode => {
                let code = run.outputs.code().map(|(c, _)| c.to_string()).unwrap_or_default();
                let report = self
                    .validate_code(&run.expectation, &concepts, &constraints, &code)
                    .await?;
                run.validation = Some(report);
            }
            GenerationStatus::FixingIssues => {
                let code = run.outputs.code().map(|(c, _)| c.to_string()).unwrap_or_default();
                let report = run.validation.clone().unwrap_or(ValidationReport {
                    valid: false,
                    issues: Vec::new(),
                    suggestions: Vec::new(),
                    note: None,
                });
                let fixed = self.fix_code(&run.expectation, &code, &report).await?;
                run.fix_attempted = true;
                if let Some((code, code_blocks)) = fixed {
                    run.outputs = PhaseOutputs::Generated {
                        concepts,
                        constraints,
                        code,
                        code_blocks,
                    };
                    run.fixed = true;
                }
            }
            GenerationStatus::Completed | GenerationStatus::Error => {}
        }
        Ok(())
    }

    async fn ask(&self, purpose: &str, prompt: &str) -> Result<String, LlmError> {
        let options = GenerateOptions::for_purpose(purpose).with_system(prompts::SYSTEM);
        Ok(self.router.generate(prompt, &options).await?.raw_response)
    }

    async fn extract_concepts(&self, expectation: &Expectation) -> Result<KeyConcepts, LlmError> {
        let raw = self
            .ask(purpose::EXTRACT_CONCEPTS, &prompts::extract_concepts(expectation))
            .await?;
        Ok(match parse_expecting::<KeyConcepts>(&raw, KeyConcepts::FIELDS) {
            Parsed::Unparsed { reason, .. } => {
                warn!(%reason, "Concept reply unparseable, continuing without concepts");
                KeyConcepts::default()
            }
            parsed => parsed.into_option().unwrap_or_default(),
        })
    }

    async fn infer_constraints(
        &self,
        expectation: &Expectation,
        concepts: &KeyConcepts,
    ) -> Result<Vec<String>, LlmError> {
        let raw = self
            .ask(
                purpose::INFER_CONSTRAINTS,
                &prompts::infer_constraints(expectation, concepts),
            )
            .await?;
        Ok(match parse_structured::<ConstraintReply>(&raw) {
            Parsed::Strict(reply) | Parsed::Heuristic(reply) => match reply {
                ConstraintReply::Wrapped { constraints } | ConstraintReply::List(constraints) => {
                    constraints
                }
            },
            Parsed::Unparsed { reason, .. } => {
                warn!(%reason, "Constraint reply unparseable, using explicit constraints only");
                Vec::new()
            }
        })
    }

    /// Phase 3. With streaming on, complete code blocks are published as
    /// events while the answer arrives; the returned blocks always come from
    /// the final answer.
    async fn generate_code(
        &self,
        id: &str,
        expectation: &Expectation,
        concepts: &KeyConcepts,
        constraints: &[String],
        sink: Option<&UnboundedSender<GenerationEvent>>,
    ) -> Result<(String, Vec<CodeBlock>), LlmError> {
        let prompt = prompts::generate_code(expectation, concepts, constraints);
        let options = GenerateOptions::for_purpose(purpose::GENERATE_CODE).with_system(prompts::SYSTEM);

        let raw = if self.config.stream {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let request = async move {
                self.router
                    .generate_streaming(&prompt, &options, &tx)
                    .await
            };
            let scan = async {
                let mut scanner = CodeBlockScanner::new();
                let mut index = 0;
                let mut publish = |block: CodeBlock| {
                    debug!(id, index, language = %block.language, "Code block completed");
                    emit(
                        sink,
                        GenerationEvent::CodeBlock {
                            id: id.to_string(),
                            index,
                            language: block.language,
                            code: block.code,
                            timestamp: Utc::now(),
                        },
                    );
                    index += 1;
                };
                while let Some(chunk) = rx.recv().await {
                    scanner.feed(&chunk).into_iter().for_each(&mut publish);
                }
                scanner.finish().into_iter().for_each(&mut publish);
            };
            let (result, ()) = tokio::join!(request, scan);
            result?.raw_response
        } else {
            self.router.generate(&prompt, &options).await?.raw_response
        };

        let blocks = extract_code_blocks(&raw);
        Ok((code_from(&raw, &blocks), blocks))
    }

    async fn validate_code(
        &self,
        expectation: &Expectation,
        concepts: &KeyConcepts,
        constraints: &[String],
        code: &str,
    ) -> Result<ValidationReport, LlmError> {
        let raw = self
            .ask(
                purpose::VALIDATE_CODE,
                &prompts::validate_code(expectation, concepts, constraints, code),
            )
            .await?;
        Ok(match parse_structured::<ValidationReport>(&raw) {
            Parsed::Unparsed { reason, .. } => {
                warn!(%reason, "Validation reply unparseable, accepting the code");
                ValidationReport {
                    valid: true,
                    issues: Vec::new(),
                    suggestions: Vec::new(),
                    note: Some(format!("validation response could not be parsed: {reason}")),
                }
            }
            Parsed::Strict(report) | Parsed::Heuristic(report) => report,
        })
    }

    /// The repair pass; `None` when it produced no code
    async fn fix_code(
        &self,
        expectation: &Expectation,
        code: &str,
        report: &ValidationReport,
    ) -> Result<Option<(String, Vec<CodeBlock>)>, LlmError> {
        let raw = self
            .ask(purpose::FIX_CODE, &prompts::fix_code(expectation, code, report))
            .await?;
        let blocks = extract_code_blocks(&raw);
        let fixed = code_from(&raw, &blocks);
        if fixed.trim().is_empty() {
            warn!("Repair pass returned no code, keeping the original");
            return Ok(None);
        }
        Ok(Some((fixed, blocks)))
    }
}
