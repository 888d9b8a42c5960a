//! End-to-end workflows through a [`Pipeline`] backed by a scripted provider

use std::sync::Arc;

use proptest::prelude::*;
use specsmith::clarifier::{StructuralChecker, purpose as clarify};
use specsmith::config::ClarifierConfig;
use specsmith::generator::{merge_constraints, purpose as generate};
use specsmith::{
    Config, ConversationStage, Expectation, GenerationEvent, GenerationStatus, InMemoryRecordStore,
    LlmError, Pipeline, ProviderRouter, ResponseStatus,
};
use specsmith_llm::{ProviderDefaults, ScriptedBackend};
use tokio::sync::mpsc;

const TODO_DRAFT: &str = "name: Todo App\ndescription: A web app where people keep a list of their tasks\n";
const TODO_REFINED: &str = "name: Todo App\ndescription: A web app where people keep a list of their tasks\nacceptance_criteria:\n  - Users can add a task with a due date\n  - Users can mark a task as done\n";
const SUBS: &str = "sub_expectations:\n  - name: Task model\n  - name: Task list view\n  - name: Task persistence\n";
const CODE: &str = "```typescript\nexport interface Task { title: string; done: boolean }\n```\n";

fn scripted() -> ScriptedBackend {
    ScriptedBackend::new("scripted")
        .with_response(clarify::EXTRACT_EXPECTATION, TODO_DRAFT)
        .with_response(clarify::DETECT_AMBIGUITY, "points: []")
        .with_response(clarify::INCORPORATE_CLARIFICATION, TODO_REFINED)
        .with_response(clarify::DECOMPOSE, SUBS)
        .with_response(generate::EXTRACT_CONCEPTS, "entities: [Task]\nactions: [add, complete]\n")
        .with_response(generate::INFER_CONSTRAINTS, "constraints: [Runs in a browser]\n")
        .with_response(generate::GENERATE_CODE, CODE)
        .with_response(generate::VALIDATE_CODE, "valid: true\n")
}

fn pipeline(backend: Arc<ScriptedBackend>) -> Pipeline {
    let router = ProviderRouter::new("scripted", vec![]).with_provider(
        "scripted",
        backend,
        ProviderDefaults::for_model("scripted-model"),
    );
    Pipeline::with_router(Arc::new(router), &Config::default())
}

#[tokio::test]
async fn test_todo_app_from_request_to_code() {
    let backend = Arc::new(scripted());
    let mut p = pipeline(backend.clone());

    let r = p.clarifier.clarify_requirement("I need a todo app", None).await;
    assert_eq!(r.stage, ConversationStage::AwaitingDetails);
    assert!(r.requires_clarification);
    assert_eq!(r.questions.len(), 1);
    assert!(r.questions[0].contains("criteria"));

    let r = p
        .clarifier
        .continue_conversation(
            &r.conversation_id,
            "Tasks have due dates and can be marked as done",
        )
        .await;
    assert_eq!(r.stage, ConversationStage::Completed);
    let top = r.expectation.unwrap();
    assert_eq!(top.acceptance_criteria.len(), 2);
    assert_eq!(r.sub_expectations.len(), 3);
    assert!(
        r.sub_expectations
            .iter()
            .all(|s| s.parent_id.as_deref() == Some(top.id.as_str()))
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let g = p.generator.generate(&top, Some(tx)).await;
    assert_eq!(g.status, ResponseStatus::Completed);
    assert_eq!(g.id, top.id);
    assert_eq!(g.code_blocks.len(), 1);
    assert_eq!(g.code_blocks[0].language, "typescript");
    assert!(g.constraints.contains(&"Runs in a browser".to_string()));

    p.generator.detach_events(&top.id);
    let mut statuses = Vec::new();
    while let Some(event) = rx.recv().await {
        if let GenerationEvent::Status { status, .. } = event {
            statuses.push(status);
        }
    }
    assert_eq!(statuses.first(), Some(&GenerationStatus::ExtractingConcepts));
    assert_eq!(statuses.last(), Some(&GenerationStatus::Completed));

    let store = InMemoryRecordStore::new();
    let summary = p.sync_to_memory(&store).await.unwrap();
    assert_eq!(summary.expectations, 1);
    assert_eq!(summary.generations, 1);
    assert_eq!(summary.requests as u32, backend.total_calls());
    assert_eq!(store.expectations()[0].top.id, top.id);
}

#[tokio::test]
async fn test_unknown_conversation_id_starts_fresh() {
    let backend = Arc::new(scripted());
    let mut p = pipeline(backend);

    let r = p.clarifier.continue_conversation("conv-42", "I need a todo app").await;
    assert_eq!(r.conversation_id, "conv-42");
    assert_eq!(r.stage, ConversationStage::AwaitingDetails);
    assert!(p.clarifier.conversation("conv-42").is_some());
}

#[tokio::test]
async fn test_completed_conversation_keeps_expectation_id() {
    let backend = Arc::new(
        scripted()
            .with_response(clarify::EXTRACT_EXPECTATION, TODO_REFINED)
            .with_response(clarify::ANSWER_FINALIZED, "It is a todo app."),
    );
    let mut p = pipeline(backend);

    let first = p.clarifier.clarify_requirement("A todo app", None).await;
    assert_eq!(first.stage, ConversationStage::Completed);
    let id = first.expectation.unwrap().id;

    for question in ["What was it again?", "Can it also send email?"] {
        let r = p
            .clarifier
            .continue_conversation(&first.conversation_id, question)
            .await;
        assert_eq!(r.stage, ConversationStage::Completed);
        assert_eq!(r.expectation.unwrap().id, id);
    }
}

#[tokio::test]
async fn test_short_description_is_flagged() {
    let backend = Arc::new(scripted().with_response(
        clarify::EXTRACT_EXPECTATION,
        "name: Todo\ndescription: App\nacceptance_criteria: [Add tasks]\n",
    ));
    let mut p = pipeline(backend);

    let r = p.clarifier.clarify_requirement("todo", None).await;
    assert_eq!(r.stage, ConversationStage::AwaitingDetails);
    assert!(
        r.uncertainties
            .iter()
            .any(|u| u.field == "description" && u.issue == "too_short")
    );
}

#[tokio::test]
async fn test_resume_skips_finished_phases() {
    let backend = Arc::new(scripted());
    backend.push_error(generate::GENERATE_CODE, LlmError::ProviderOutage("503".to_string()));
    let mut p = pipeline(backend.clone());
    let e = Expectation::new_top("Todo App", "Keep a list of tasks").with_criteria(["Add a task"]);

    let failed = p.generator.generate(&e, None).await;
    assert_eq!(failed.status, ResponseStatus::Error);
    assert!(failed.error.is_some());
    assert_eq!(failed.concepts.as_ref().map(|c| c.entities.clone()), Some(vec!["Task".to_string()]));
    assert!(failed.code.is_none());

    let resumed = p.generator.resume_generation(&e.id, None).await;
    assert_eq!(resumed.status, ResponseStatus::Completed);
    assert_eq!(backend.calls(generate::EXTRACT_CONCEPTS), 1);
    assert_eq!(backend.calls(generate::INFER_CONSTRAINTS), 1);
    assert_eq!(backend.calls(generate::GENERATE_CODE), 2);

    let again = p.generator.resume_generation(&e.id, None).await;
    assert_eq!(again.status, ResponseStatus::AlreadyCompleted);
    assert_eq!(backend.calls(generate::GENERATE_CODE), 2);
}

#[tokio::test]
async fn test_resume_of_unknown_run_makes_no_calls() {
    let backend = Arc::new(scripted());
    let mut p = pipeline(backend.clone());

    let r = p.generator.resume_generation("no-such-run", None).await;
    assert_eq!(r.status, ResponseStatus::NotFound);
    assert_eq!(p.generator.get_generation_status("no-such-run").status, ResponseStatus::NotFound);
    assert_eq!(backend.total_calls(), 0);
}

proptest! {
    #[test]
    fn prop_merged_constraints_keep_explicit_ones_first(
        explicit in prop::collection::vec("[a-z]{1,8}", 0..5),
        inferred in prop::collection::vec("[a-z]{1,8}", 0..5),
    ) {
        let merged = merge_constraints(&explicit, &inferred);
        for c in explicit.iter().chain(inferred.iter()) {
            prop_assert!(merged.contains(c));
        }
        let mut unique = merged.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), merged.len());
        if let Some(first) = explicit.first() {
            prop_assert_eq!(&merged[0], first);
        }
    }

    #[test]
    fn prop_complete_expectation_has_no_structural_points(
        name in "[A-Z][a-z]{4,12}",
        description in "[a-z]{4,10}( [a-z]{4,10}){3,6}",
        criterion in "[A-Z][a-z]{3,10} [a-z]{3,10}",
    ) {
        let e = Expectation::new_top(name, description).with_criteria([criterion]);
        let checker = StructuralChecker::new(&ClarifierConfig::default());
        prop_assert!(checker.check(&e).is_empty());
    }
}
