//! Conversation engine driving requirement text to a finalized expectation

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use specsmith_config::ClarifierConfig;
use specsmith_extraction::{parse_expecting, parse_structured};
use specsmith_llm::{GenerateOptions, LlmError, ProviderRouter};
use specsmith_model::{
    ClarificationMetadata, ClarificationRecord, Expectation, ExpectationLevel, RecordStore,
    RecordStoreError, UncertaintyPoint,
};

use crate::checks::{SemanticFindings, StructuralChecker};
use crate::conversation::{
    Conversation, ConversationStage, ConversationStore, FinalizedExpectation,
};
use crate::decompose::{self, DecompositionReply};
use crate::{prompts, purpose};

const GREETING: &str = "Describe the software you need and I will help turn it into a precise requirement.";
const EXTRACTION_FAILED: &str =
    "I could not analyze the requirement right now. Send another message to retry.";

/// What the caller sees after each turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClarificationResponse {
    pub conversation_id: String,
    pub stage: ConversationStage,
    pub requires_clarification: bool,
    pub questions: Vec<String>,
    pub uncertainties: Vec<UncertaintyPoint>,
    /// Current draft while clarifying, the finalized top expectation after
    pub expectation: Option<Expectation>,
    pub sub_expectations: Vec<Expectation>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClarificationResponse {
    fn new(conversation: &Conversation, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation.id.clone(),
            stage: conversation.stage,
            requires_clarification: false,
            questions: Vec::new(),
            uncertainties: Vec::new(),
            expectation: None,
            sub_expectations: Vec::new(),
            message: message.into(),
            error: None,
        }
    }

    fn finalized(conversation: &Conversation, message: impl Into<String>) -> Self {
        let mut response = Self::new(conversation, message);
        if let Some(result) = &conversation.result {
            response.expectation = Some(result.top.clone());
            response.sub_expectations = result.subs.clone();
        }
        response
    }
}

fn questions_message(questions: &[String]) -> String {
    let mut message = String::from("I need a few more details before this requirement is clear:");
    for (i, q) in questions.iter().enumerate() {
        message.push_str(&format!("\n{}. {q}", i + 1));
    }
    message
}

/// Fields of `parsed` that are non-empty replace those of `current`; the
/// identity of `current` is kept.
fn merge(current: &Expectation, parsed: Expectation) -> Expectation {
    let mut merged = current.clone();
    if !parsed.name.trim().is_empty() {
        merged.name = parsed.name.trim().to_string();
    }
    if !parsed.description.trim().is_empty() {
        merged.description = parsed.description.trim().to_string();
    }
    if !parsed.acceptance_criteria.is_empty() {
        merged.acceptance_criteria = parsed.acceptance_criteria;
    }
    if !parsed.constraints.is_empty() {
        merged.constraints = parsed.constraints;
    }
    merged
}

fn append_reply(current: &Expectation, reply: &str) -> Expectation {
    let mut updated = current.clone();
    let reply = reply.trim();
    if !reply.is_empty() {
        updated.description = if updated.description.trim().is_empty() {
            reply.to_string()
        } else {
            format!("{}\n{reply}", updated.description.trim_end())
        };
    }
    updated
}

/// Conversation engine turning requirement text into expectations.
///
/// Owns its conversations; every model call goes through the shared
/// [`ProviderRouter`]. Finalized results queue up until
/// [`Clarifier::sync_to_memory`] hands them to a [`RecordStore`].
pub struct Clarifier {
    router: Arc<ProviderRouter>,
    config: ClarifierConfig,
    checker: StructuralChecker,
    conversations: ConversationStore,
    pending: Vec<ClarificationRecord>,
}

impl std::fmt::Debug for Clarifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clarifier")
            .field("conversations", &self.conversations.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Clarifier {
    pub fn new(router: Arc<ProviderRouter>, config: ClarifierConfig) -> Self {
        let checker = StructuralChecker::new(&config);
        Self {
            router,
            config,
            checker,
            conversations: ConversationStore::new(),
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Finalized results not yet synced
    #[must_use]
    pub fn pending_records(&self) -> &[ClarificationRecord] {
        &self.pending
    }

    /// Register a conversation in the introduction stage without calling a
    /// provider. An existing id is left as it is.
    pub fn open_conversation(&mut self, conversation_id: Option<&str>) -> ClarificationResponse {
        if let Some(id) = conversation_id
            && let Some(existing) = self.conversations.get(id)
        {
            return ClarificationResponse::finalized(existing, GREETING);
        }
        let id = conversation_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let mut conversation = Conversation::new(id, ConversationStage::Introduction);
        conversation.push_assistant(GREETING);
        let response = ClarificationResponse::new(&conversation, GREETING);
        self.conversations.insert(conversation);
        response
    }

    /// Start a conversation from a requirement text.
    ///
    /// An existing conversation with the same id is replaced. Never fails:
    /// provider errors are reported in [`ClarificationResponse::error`].
    pub async fn clarify_requirement(
        &mut self,
        text: &str,
        conversation_id: Option<&str>,
    ) -> ClarificationResponse {
        let id = conversation_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        if self.conversations.contains(&id) {
            debug!(conversation_id = %id, "Restarting existing conversation");
        }
        let mut conversation = Conversation::new(id, ConversationStage::Initial);
        conversation.push_user(text);
        let response = self.start(&mut conversation, text).await;
        self.conversations.insert(conversation);
        response
    }

    /// Continue a conversation with the user's next message.
    ///
    /// An unknown id starts a new conversation under that id.
    pub async fn continue_conversation(
        &mut self,
        conversation_id: &str,
        message: &str,
    ) -> ClarificationResponse {
        let Some(mut conversation) = self.conversations.take(conversation_id) else {
            info!(conversation_id, "Unknown conversation, starting a new one");
            return self.clarify_requirement(message, Some(conversation_id)).await;
        };

        conversation.push_user(message);
        let response = match conversation.stage {
            ConversationStage::Introduction | ConversationStage::Initial => {
                let text = conversation.user_text();
                self.start(&mut conversation, &text).await
            }
            ConversationStage::AwaitingDetails => self.refine(&mut conversation, message).await,
            ConversationStage::Completed => self.answer(&mut conversation, message).await,
        };
        self.conversations.insert(conversation);
        response
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
            if let Err(e) = store.record_expectations(&pending[i]).await {
                warn!(error = %e, remaining = pending.len() - i, "Clarification sync failed");
                self.pending = pending.split_off(i);
                return Err(e);
            }
        }
        debug!(synced = pending.len(), "Clarification records synced");
        Ok(pending.len())
    }

    async fn ask(&self, purpose: &str, prompt: String) -> Result<String, LlmError> {
        let options = GenerateOptions::for_purpose(purpose).with_system(prompts::SYSTEM);
        let result = self.router.generate(&prompt, &options).await?;
        Ok(result.raw_response)
    }

    /// Extract a fresh draft from `text` and evaluate it
    async fn start(&mut self, conversation: &mut Conversation, text: &str) -> ClarificationResponse {
        let raw = match self
            .ask(purpose::EXTRACT_EXPECTATION, prompts::extract_expectation(text))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "Expectation extraction failed");
                conversation.stage = ConversationStage::Initial;
                conversation.draft = None;
                conversation.uncertainties.clear();
                conversation.push_assistant(EXTRACTION_FAILED);
                let mut response = ClarificationResponse::new(conversation, EXTRACTION_FAILED);
                response.error = Some(e.to_string());
                return response;
            }
        };

        let parsed = parse_expecting::<Expectation>(&raw, Expectation::CONTENT_FIELDS);
        debug!(stage = parsed.stage(), "Parsed extracted expectation");
        let mut draft = parsed.into_option().unwrap_or_else(|| Expectation {
            description: text.trim().to_string(),
            ..Expectation::default()
        });
        draft.id = Uuid::new_v4().to_string();
        draft.level = ExpectationLevel::Top;
        draft.parent_id = None;
        draft.source_text = Some(text.to_string());

        self.evaluate(conversation, draft).await
    }

    /// Fold the user's reply into the draft and evaluate it again
    async fn refine(&mut self, conversation: &mut Conversation, reply: &str) -> ClarificationResponse {
        let Some(current) = conversation.draft.clone() else {
            let text = conversation.user_text();
            return self.start(conversation, &text).await;
        };

        let prompt = prompts::incorporate_clarification(&current, &conversation.uncertainties, reply);
        let updated = match self.ask(purpose::INCORPORATE_CLARIFICATION, prompt).await {
            Ok(raw) => {
                match parse_expecting::<Expectation>(&raw, Expectation::CONTENT_FIELDS).into_option() {
                    Some(parsed) => merge(&current, parsed),
                    None => {
                        warn!(conversation_id = %conversation.id, "Unparseable clarification update, appending reply");
                        append_reply(&current, reply)
                    }
                }
            }
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "Clarification update failed, appending reply");
                append_reply(&current, reply)
            }
        };

        self.evaluate(conversation, updated).await
    }

    /// Ask about open points, or finalize when there are none
    async fn evaluate(
        &mut self,
        conversation: &mut Conversation,
        draft: Expectation,
    ) -> ClarificationResponse {
        let points = self.detect(&draft).await;
        if points.is_empty() {
            return self.finalize(conversation, draft).await;
        }

        let questions: Vec<String> = points
            .iter()
            .map(|p| p.question.clone().unwrap_or_else(|| p.message.clone()))
            .collect();
        let asked = u32::try_from(questions.len()).unwrap_or(u32::MAX);
        conversation.questions_asked = conversation.questions_asked.saturating_add(asked);
        conversation.stage = ConversationStage::AwaitingDetails;
        conversation.uncertainties = points.clone();
        conversation.draft = Some(draft.clone());

        let message = questions_message(&questions);
        conversation.push_assistant(&message);
        debug!(conversation_id = %conversation.id, open_points = points.len(), "Awaiting details");

        let mut response = ClarificationResponse::new(conversation, message);
        response.requires_clarification = true;
        response.questions = questions;
        response.uncertainties = points;
        response.expectation = Some(draft);
        response
    }

    /// Structural points first, then at most `max_semantic_points` from the model
    async fn detect(&self, draft: &Expectation) -> Vec<UncertaintyPoint> {
        let mut points = self.checker.check(draft);
        let max = self.config.max_semantic_points;
        if max == 0 {
            return points;
        }

        match self
            .ask(purpose::DETECT_AMBIGUITY, prompts::detect_ambiguity(draft, max))
            .await
        {
            Ok(raw) => {
                let parsed = parse_expecting::<SemanticFindings>(&raw, SemanticFindings::FIELDS);
                match parsed.into_option() {
                    Some(findings) => points.extend(findings.into_points(max)),
                    None => warn!("Ignoring unparseable ambiguity review"),
                }
            }
            Err(e) => warn!(error = %e, "Semantic check failed, using structural checks only"),
        }
        points
    }

    async fn finalize(&mut self, conversation: &mut Conversation, top: Expectation) -> ClarificationResponse {
        let subs = self.decompose(&top).await;

        conversation.stage = ConversationStage::Completed;
        conversation.uncertainties.clear();
        conversation.draft = Some(top.clone());
        conversation.result = Some(FinalizedExpectation {
            top: top.clone(),
            subs: subs.clone(),
        });

        self.pending.push(ClarificationRecord {
            conversation_id: conversation.id.clone(),
            top: top.clone(),
            subs: subs.clone(),
            metadata: ClarificationMetadata {
                rounds: conversation.rounds(),
                questions_asked: conversation.questions_asked,
                source_text: conversation.user_text(),
                completed_at: Utc::now(),
            },
        });

        let message = format!(
            "Requirement '{}' is clear and has been split into {} sub-expectations.",
            top.name,
            subs.len()
        );
        conversation.push_assistant(&message);
        info!(
            conversation_id = %conversation.id,
            expectation_id = %top.id,
            subs = subs.len(),
            "Requirement finalized"
        );
        ClarificationResponse::finalized(conversation, message)
    }

    async fn decompose(&self, top: &Expectation) -> Vec<Expectation> {
        let (min, max) = (
            self.config.min_sub_expectations,
            self.config.max_sub_expectations,
        );
        let proposed = match self.ask(purpose::DECOMPOSE, prompts::decompose(top, min, max)).await {
            Ok(raw) => parse_structured::<DecompositionReply>(&raw)
                .into_option()
                .map(DecompositionReply::into_items),
            Err(e) => {
                warn!(error = %e, "Decomposition call failed");
                None
            }
        };

        if let Some(items) = proposed
            && let Some(subs) = decompose::normalize(top, items, min, max)
        {
            return subs;
        }
        warn!(expectation_id = %top.id, "Using fallback decomposition");
        decompose::fallback(top, min, max)
    }

    /// Generic answer about a finalized requirement; the result is unchanged
    async fn answer(&mut self, conversation: &mut Conversation, message: &str) -> ClarificationResponse {
        let Some(result) = conversation.result.clone() else {
            let text = conversation.user_text();
            return self.start(conversation, &text).await;
        };

        let canned = format!(
            "This requirement has already been finalized as '{}'. Start a new conversation to change it.",
            result.top.name
        );
        let prompt = prompts::answer_finalized(&result.top, &result.subs, message);
        let text = match self.ask(purpose::ANSWER_FINALIZED, prompt).await {
            Ok(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
            Ok(_) => canned,
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "Answer call failed");
                canned
            }
        };

        conversation.push_assistant(&text);
        ClarificationResponse::finalized(conversation, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specsmith_llm::ScriptedBackend;
    use specsmith_model::InMemoryRecordStore;

    const DRAFT: &str = "name: TaskPad\ndescription: A web app to track personal tasks\nacceptance_criteria:\n  - Users can add a task\n";
    const SUBS: &str = "sub_expectations:\n  - name: Task model\n  - name: Task list view\n  - name: Task storage\n";

    fn clarifier(backend: Arc<ScriptedBackend>) -> Clarifier {
        let router = ProviderRouter::new("scripted", vec![])
            .with_provider("scripted", backend, specsmith_llm::ProviderDefaults::for_model("scripted-model"));
        Clarifier::new(Arc::new(router), ClarifierConfig::default())
    }

    fn scripted() -> ScriptedBackend {
        ScriptedBackend::new("scripted")
            .with_response(purpose::EXTRACT_EXPECTATION, DRAFT)
            .with_response(purpose::DETECT_AMBIGUITY, "points: []")
            .with_response(purpose::DECOMPOSE, SUBS)
            .with_response(purpose::ANSWER_FINALIZED, "It tracks tasks.")
    }

    #[tokio::test]
    async fn test_clear_requirement_completes_in_one_turn() {
        let backend = Arc::new(scripted());
        let mut c = clarifier(backend.clone());

        let r = c.clarify_requirement("TaskPad: track tasks", None).await;
        assert_eq!(r.stage, ConversationStage::Completed);
        assert!(!r.requires_clarification);
        let top = r.expectation.unwrap();
        assert_eq!(top.name, "TaskPad");
        assert_eq!(r.sub_expectations.len(), 3);
        assert!(r.sub_expectations.iter().all(|s| s.parent_id.as_deref() == Some(top.id.as_str())));
        assert_eq!(c.pending_records().len(), 1);
        assert_eq!(backend.calls(purpose::DETECT_AMBIGUITY), 1);
    }

    #[tokio::test]
    async fn test_missing_criteria_asks_and_reply_completes() {
        let backend = Arc::new(
            scripted()
                .with_response(
                    purpose::EXTRACT_EXPECTATION,
                    "name: TaskPad\ndescription: A web app to track personal tasks\n",
                )
                .with_response(purpose::INCORPORATE_CLARIFICATION, DRAFT),
        );
        let mut c = clarifier(backend.clone());

        let r = c.clarify_requirement("I need a todo app", None).await;
        assert_eq!(r.stage, ConversationStage::AwaitingDetails);
        assert!(r.requires_clarification);
        assert_eq!(r.questions, vec![crate::checks::CRITERIA_QUESTION.to_string()]);
        let draft_id = r.expectation.unwrap().id;

        let r = c.continue_conversation(&r.conversation_id, "Users can add a task").await;
        assert_eq!(r.stage, ConversationStage::Completed);
        let top = r.expectation.unwrap();
        assert_eq!(top.id, draft_id);
        assert_eq!(top.acceptance_criteria, vec!["Users can add a task"]);

        let record = &c.pending_records()[0];
        assert_eq!(record.metadata.rounds, 2);
        assert_eq!(record.metadata.questions_asked, 1);
    }

    #[tokio::test]
    async fn test_semantic_points_follow_structural_ones() {
        let backend = Arc::new(
            scripted()
                .with_response(purpose::EXTRACT_EXPECTATION, "name: TaskPad\ndescription: Track tasks and stuff\n")
                .with_response(
                    purpose::DETECT_AMBIGUITY,
                    "points:\n  - field: description\n    issue: audience\n    message: Who uses it?\n    question: Who are the users?\n",
                ),
        );
        let mut c = clarifier(backend);

        let r = c.clarify_requirement("todo", None).await;
        let issues: Vec<_> = r.uncertainties.iter().map(|p| p.issue.as_str()).collect();
        assert_eq!(issues, vec!["missing", "vague", "audience"]);
        assert_eq!(r.questions.last().map(String::as_str), Some("Who are the users?"));
    }

    #[tokio::test]
    async fn test_failed_semantic_check_is_skipped() {
        let backend = Arc::new(scripted());
        backend.push_error(purpose::DETECT_AMBIGUITY, LlmError::Transport("down".to_string()));
        let mut c = clarifier(backend);

        let r = c.clarify_requirement("TaskPad", None).await;
        assert_eq!(r.stage, ConversationStage::Completed);
        assert!(r.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_incorporation_appends_reply() {
        let backend = Arc::new(scripted().with_response(
            purpose::EXTRACT_EXPECTATION,
            "name: TaskPad\ndescription: A web app to track personal tasks\n",
        ));
        backend.push_error(
            purpose::INCORPORATE_CLARIFICATION,
            LlmError::Transport("down".to_string()),
        );
        let mut c = clarifier(backend);

        let r = c.clarify_requirement("todo", None).await;
        let r = c.continue_conversation(&r.conversation_id, "It must sync across devices").await;
        assert_eq!(r.stage, ConversationStage::AwaitingDetails);
        let draft = r.expectation.unwrap();
        assert!(draft.description.ends_with("\nIt must sync across devices"));
    }

    #[tokio::test]
    async fn test_prose_replies_keep_user_text() {
        let backend = Arc::new(
            scripted()
                .with_response(purpose::EXTRACT_EXPECTATION, "Sure: I can help you build that.")
                .with_response(purpose::INCORPORATE_CLARIFICATION, "Got it: I have noted that."),
        );
        let mut c = clarifier(backend);

        let r = c.clarify_requirement("A todo app for my family", None).await;
        assert_eq!(r.stage, ConversationStage::AwaitingDetails);
        let draft = r.expectation.unwrap();
        assert_eq!(draft.description, "A todo app for my family");

        let r = c
            .continue_conversation(&r.conversation_id, "Users can add a task with a due date")
            .await;
        let draft = r.expectation.unwrap();
        assert_eq!(
            draft.description,
            "A todo app for my family\nUsers can add a task with a due date"
        );
    }

    #[tokio::test]
    async fn test_extraction_failure_registers_and_retries() {
        let backend = Arc::new(scripted());
        backend.push_error(purpose::EXTRACT_EXPECTATION, LlmError::Transport("down".to_string()));
        let mut c = clarifier(backend.clone());

        let r = c.clarify_requirement("I need a todo app", Some("conv-1")).await;
        assert_eq!(r.stage, ConversationStage::Initial);
        assert!(r.error.is_some());
        assert!(c.conversation("conv-1").is_some());

        let r = c.continue_conversation("conv-1", "called TaskPad").await;
        assert_eq!(r.stage, ConversationStage::Completed);
        let prompts = backend.prompts_for(purpose::EXTRACT_EXPECTATION);
        assert!(prompts[1].contains("I need a todo app\n\ncalled TaskPad"));
    }

    #[tokio::test]
    async fn test_unusable_decomposition_falls_back() {
        let backend = Arc::new(scripted().with_response(purpose::DECOMPOSE, "sub_expectations:\n  - name: Only one\n"));
        let mut c = clarifier(backend);

        let r = c.clarify_requirement("TaskPad", None).await;
        assert_eq!(r.sub_expectations.len(), 3);
        assert_eq!(r.sub_expectations[0].name, "Users can add a task");
    }

    #[tokio::test]
    async fn test_completed_conversation_keeps_its_result() {
        let backend = Arc::new(scripted());
        let mut c = clarifier(backend.clone());

        let first = c.clarify_requirement("TaskPad", None).await;
        let id = first.expectation.as_ref().unwrap().id.clone();

        let r = c.continue_conversation(&first.conversation_id, "What does it do?").await;
        assert_eq!(r.stage, ConversationStage::Completed);
        assert_eq!(r.message, "It tracks tasks.");
        assert_eq!(r.expectation.unwrap().id, id);

        backend.push_error(purpose::ANSWER_FINALIZED, LlmError::Transport("down".to_string()));
        let r = c.continue_conversation(&first.conversation_id, "And now?").await;
        assert!(r.message.contains("already been finalized as 'TaskPad'"));
        assert_eq!(r.expectation.unwrap().id, id);
        assert_eq!(c.pending_records().len(), 1);
    }

    #[tokio::test]
    async fn test_introduction_then_requirement() {
        let backend = Arc::new(scripted());
        let mut c = clarifier(backend.clone());

        let r = c.open_conversation(None);
        assert_eq!(r.stage, ConversationStage::Introduction);
        assert_eq!(backend.total_calls(), 0);

        let r = c.continue_conversation(&r.conversation_id, "TaskPad").await;
        assert_eq!(r.stage, ConversationStage::Completed);
    }

    #[tokio::test]
    async fn test_sync_keeps_records_on_failure() {
        let backend = Arc::new(scripted());
        let mut c = clarifier(backend);
        c.clarify_requirement("one", None).await;
        c.clarify_requirement("two", None).await;

        let store = InMemoryRecordStore::new();
        store.set_rejecting(true);
        assert!(c.sync_to_memory(&store).await.is_err());
        assert_eq!(c.pending_records().len(), 2);

        store.set_rejecting(false);
        assert_eq!(c.sync_to_memory(&store).await.unwrap(), 2);
        assert!(c.pending_records().is_empty());
        assert_eq!(store.expectations().len(), 2);
    }
}
