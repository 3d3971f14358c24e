//! End-to-end pipeline tests: submit through the orchestrator, observe the
//! terminal task state, side effects and published results.

mod helpers;

use chrono::Utc;
use helpers::*;
use kindred_common::bus::{channel_key, ALL_USERS_PATTERN};
use kindred_common::events::MatchEvent;
use kindred_common::{MatchResult, MatchTier};
use kindred_match::db;
use kindred_match::models::{PipelineStep, TaskErrorKind, TaskStatus};
use kindred_match::services::OrchestratorError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn succeeded(status: TaskStatus) -> MatchResult {
    match status {
        TaskStatus::Succeeded { result } => result,
        other => panic!("expected success, got {:?}", other),
    }
}

async fn member_count(pool: &sqlx::SqlitePool, community_id: &str) -> i64 {
    sqlx::query_scalar("SELECT member_count FROM communities WHERE community_id = ?")
        .bind(community_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn soulmate_auto_joins_and_introduces() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.95)).await;
    seed_community(&pool, "paint", "Art", 50, &vector_with_score(0.6)).await;
    db::memberships::auto_join(&pool, "veteran", "climb").await.unwrap();
    db::communities::record_activity(&pool, "climb", "veteran", Utc::now()).await.unwrap();

    let model = Arc::new(ScriptedLanguageModel::default());
    let state = test_app_state_with(pool.clone(), model.clone(), test_config()).await;

    let receipt = state.orchestrator.submit(submission("newbie")).await.unwrap();
    assert_eq!(receipt.delivery_channel_key, "match_updates_newbie");

    let task = wait_for_terminal(&state, receipt.task_id).await;
    let result = succeeded(task.status);

    assert_eq!(result.tier, MatchTier::Soulmate);
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].community_id(), "climb");
    assert_eq!(result.auto_joined_community.as_deref(), Some("climb"));
    assert!(result.ai_intro_generated);
    let introduction = result.introduction.expect("introduction");
    assert_eq!(introduction.mentioned_member.as_deref(), Some("veteran"));
    assert!(result.processing_time_ms < 10_000);

    assert_eq!(db::memberships::membership_count(&pool, "newbie", "climb").await.unwrap(), 1);
    assert_eq!(member_count(&pool, "climb").await, 12);

    // Model sanitization fed the embedding
    let embedded = model.last_embedded.lock().unwrap().clone().unwrap();
    assert!(embedded.starts_with("Bio: [model]"));
    assert!(embedded.contains("outdoors"));

    // User vector cached
    assert!(db::vectors::load_user_vector(&pool, "newbie").await.unwrap().is_some());
}

#[tokio::test]
async fn repeated_soulmate_match_joins_once() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.95)).await;

    let model = Arc::new(ScriptedLanguageModel::default());
    let state = test_app_state_with(pool.clone(), model.clone(), test_config()).await;

    let first = state.orchestrator.submit(submission("newbie")).await.unwrap();
    let first = succeeded(wait_for_terminal(&state, first.task_id).await.status);
    let second = state.orchestrator.submit(submission("newbie")).await.unwrap();
    let second = succeeded(wait_for_terminal(&state, second.task_id).await.status);

    assert!(first.ai_intro_generated);
    assert_eq!(second.tier, MatchTier::Soulmate);
    assert_eq!(second.auto_joined_community.as_deref(), Some("climb"));
    assert!(!second.ai_intro_generated);
    assert!(second.introduction.is_none());

    assert_eq!(db::memberships::membership_count(&pool, "newbie", "climb").await.unwrap(), 1);
    assert_eq!(member_count(&pool, "climb").await, 11);
    assert_eq!(model.introduce_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn toxic_introduction_is_withheld_but_join_stands() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.95)).await;

    let model = Arc::new(ScriptedLanguageModel {
        toxicity: 0.9,
        ..Default::default()
    });
    let state = test_app_state_with(pool.clone(), model, test_config()).await;

    let receipt = state.orchestrator.submit(submission("newbie")).await.unwrap();
    let result = succeeded(wait_for_terminal(&state, receipt.task_id).await.status);

    assert_eq!(result.tier, MatchTier::Soulmate);
    assert!(!result.ai_intro_generated);
    assert!(result.introduction.is_none());
    assert_eq!(db::memberships::membership_count(&pool, "newbie", "climb").await.unwrap(), 1);
}

#[tokio::test]
async fn explorer_offers_top_choices_without_joining() {
    let pool = test_pool().await;
    let scores = [0.80, 0.76, 0.72, 0.68, 0.64, 0.60, 0.56];
    for (i, score) in scores.iter().enumerate() {
        let category = if i % 2 == 0 { "Tech" } else { "Art" };
        seed_community(&pool, &format!("c{}", i), category, 5, &vector_with_score(*score)).await;
    }

    let state = test_app_state_with(pool.clone(), Arc::new(ScriptedLanguageModel::default()), test_config()).await;
    let receipt = state.orchestrator.submit(submission("explorer")).await.unwrap();
    let result = succeeded(wait_for_terminal(&state, receipt.task_id).await.status);

    assert_eq!(result.tier, MatchTier::Explorer);
    assert_eq!(result.matches.len(), 5);
    assert_eq!(result.matches[0].community_id(), "c0");
    assert!(result.auto_joined_community.is_none());
    assert!(!result.profile_update_requested);
    assert_eq!(db::memberships::membership_count(&pool, "explorer", "c0").await.unwrap(), 0);
}

#[tokio::test]
async fn weak_match_falls_back_to_popular_list() {
    let pool = test_pool().await;
    seed_community(&pool, "local", "Tech", 3, &vector_with_score(0.3)).await;
    seed_community_in(&pool, "big", "Music", 900, &vector_with_score(0.1), "Berlin", "Europe/Berlin").await;

    let state = test_app_state_with(pool, Arc::new(ScriptedLanguageModel::default()), test_config()).await;
    let receipt = state.orchestrator.submit(submission("lonely")).await.unwrap();
    let result = succeeded(wait_for_terminal(&state, receipt.task_id).await.status);

    assert_eq!(result.tier, MatchTier::Fallback);
    assert!(result.profile_update_requested);
    assert!(result.auto_joined_community.is_none());
    let ids: Vec<&str> = result.matches.iter().map(|m| m.community_id()).collect();
    assert_eq!(ids, vec!["big", "local"]);
    assert!(result.matches.iter().all(|m| m.similarity_score == 0.0));
}

#[tokio::test]
async fn empty_locality_yields_fallback() {
    let pool = test_pool().await;
    seed_community_in(&pool, "far", "Tech", 40, &vector_with_score(0.99), "Lisbon", "Europe/Lisbon").await;

    let state = test_app_state_with(pool, Arc::new(ScriptedLanguageModel::default()), test_config()).await;
    let receipt = state.orchestrator.submit(submission("remote")).await.unwrap();
    let result = succeeded(wait_for_terminal(&state, receipt.task_id).await.status);

    assert_eq!(result.tier, MatchTier::Fallback);
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].community_id(), "far");
}

#[tokio::test]
async fn sanitize_failure_falls_back_to_local_scrub() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.7)).await;

    let model = Arc::new(ScriptedLanguageModel {
        sanitize: SanitizeScript::Fail,
        ..Default::default()
    });
    let state = test_app_state_with(pool, model.clone(), test_config()).await;

    let receipt = state.orchestrator.submit(submission("private")).await.unwrap();
    let result = succeeded(wait_for_terminal(&state, receipt.task_id).await.status);
    assert_eq!(result.tier, MatchTier::Explorer);

    let embedded = model.last_embedded.lock().unwrap().clone().unwrap();
    assert!(embedded.contains("[email removed]"));
    assert!(embedded.contains("[phone removed]"));
    assert!(!embedded.contains("climber@example.com"));
    assert!(embedded.ends_with("Interests: climbing, coffee"));
}

#[tokio::test]
async fn slow_sanitize_is_abandoned_at_soft_deadline() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.7)).await;

    let model = Arc::new(ScriptedLanguageModel {
        sanitize: SanitizeScript::Delay(Duration::from_millis(1_000)),
        ..Default::default()
    });
    let mut config = test_config();
    config.pipeline.soft_limit_ms = 100;
    config.pipeline.hard_limit_ms = 3_000;
    let state = test_app_state_with(pool, model.clone(), config).await;

    let receipt = state.orchestrator.submit(submission("patient")).await.unwrap();
    let result = succeeded(wait_for_terminal(&state, receipt.task_id).await.status);

    assert!(result.processing_time_ms < 1_000);
    let embedded = model.last_embedded.lock().unwrap().clone().unwrap();
    assert!(embedded.contains("[email removed]"));
}

#[tokio::test]
async fn embed_failure_fails_task_without_publishing() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.95)).await;

    let model = Arc::new(ScriptedLanguageModel {
        embedding: None,
        ..Default::default()
    });
    let state = test_app_state_with(pool.clone(), model, test_config()).await;
    let mut subscription = state.result_bus.psubscribe(&channel_key("unlucky")).unwrap();

    let receipt = state.orchestrator.submit(submission("unlucky")).await.unwrap();
    let task = wait_for_terminal(&state, receipt.task_id).await;

    match task.status {
        TaskStatus::Failed { error } => {
            assert_eq!(error.kind, TaskErrorKind::CollaboratorUnavailable);
            assert_eq!(error.step, Some(PipelineStep::Embed));
        }
        other => panic!("expected failure, got {:?}", other),
    }

    assert!(tokio::time::timeout(Duration::from_millis(200), subscription.recv())
        .await
        .is_err());
    assert_eq!(db::memberships::membership_count(&pool, "unlucky", "climb").await.unwrap(), 0);
}

#[tokio::test]
async fn hard_deadline_fails_task_at_step_in_flight() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.95)).await;

    let model = Arc::new(ScriptedLanguageModel {
        embed_delay: Duration::from_secs(5),
        ..Default::default()
    });
    let mut config = test_config();
    config.pipeline.hard_limit_ms = 300;
    config.pipeline.soft_limit_ms = 200;
    let state = test_app_state_with(pool.clone(), model, config).await;

    let started = std::time::Instant::now();
    let receipt = state.orchestrator.submit(submission("late")).await.unwrap();
    let task = wait_for_terminal(&state, receipt.task_id).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    match task.status {
        TaskStatus::Failed { error } => {
            assert_eq!(error.kind, TaskErrorKind::DeadlineExceeded);
            assert_eq!(error.step, Some(PipelineStep::Embed));
        }
        other => panic!("expected deadline failure, got {:?}", other),
    }
    assert_eq!(db::memberships::membership_count(&pool, "late", "climb").await.unwrap(), 0);
}

#[tokio::test]
async fn every_stored_success_is_published_near_the_deadline() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.7)).await;

    // Embedding ends close to the hard limit, so tasks finish on either side of it
    let model = Arc::new(ScriptedLanguageModel {
        embed_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let mut config = test_config();
    config.pipeline.workers = 12;
    config.pipeline.hard_limit_ms = 130;
    config.pipeline.soft_limit_ms = 100;
    let state = test_app_state_with(pool, model, config).await;
    let mut subscription = state.result_bus.psubscribe(ALL_USERS_PATTERN).unwrap();

    let mut task_ids = Vec::new();
    for i in 0..12 {
        let receipt = state.orchestrator.submit(submission(&format!("edge{}", i))).await.unwrap();
        task_ids.push(receipt.task_id);
    }

    let mut stored_successes = Vec::new();
    for task_id in &task_ids {
        let task = wait_for_terminal(&state, *task_id).await;
        if matches!(task.status, TaskStatus::Succeeded { .. }) {
            stored_successes.push(*task_id);
        }
    }

    let mut published = Vec::new();
    while let Ok(Ok(envelope)) = tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await {
        published.push(envelope.result.task_id);
    }

    stored_successes.sort();
    published.sort();
    assert_eq!(published, stored_successes);
}

#[tokio::test]
async fn full_queue_rejects_submissions() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.7)).await;

    let model = Arc::new(ScriptedLanguageModel {
        embed_delay: Duration::from_millis(500),
        ..Default::default()
    });
    let mut config = test_config();
    config.pipeline.workers = 1;
    config.pipeline.queue_capacity = 1;
    let state = test_app_state_with(pool, model, config).await;

    let mut rejected = Vec::new();
    for i in 0..10 {
        match state.orchestrator.submit(submission(&format!("user{}", i))).await {
            Ok(_) => {}
            Err(OrchestratorError::QueueFull { task_id }) => rejected.push(task_id),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert!(rejected.len() >= 7, "only {} rejected", rejected.len());
    let task = state.orchestrator.status(rejected[0]).await.unwrap().unwrap();
    match task.status {
        TaskStatus::Failed { error } => assert_eq!(error.kind, TaskErrorKind::Rejected),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn invalid_submission_is_refused_before_recording() {
    let state = test_app_state().await;
    let mut bad = submission("nobody");
    bad.timezone = " ".to_string();

    match state.orchestrator.submit(bad).await {
        Err(OrchestratorError::InvalidSubmission(message)) => assert!(message.contains("timezone")),
        other => panic!("expected invalid submission, got {:?}", other.map(|r| r.task_id)),
    }
    assert_eq!(db::tasks::count_in_flight(&state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn success_is_published_and_lifecycle_events_emitted() {
    let pool = test_pool().await;
    seed_community(&pool, "climb", "Outdoors", 10, &vector_with_score(0.7)).await;

    let state = test_app_state_with(pool, Arc::new(ScriptedLanguageModel::default()), test_config()).await;
    let mut subscription = state.result_bus.psubscribe(&channel_key("watcher")).unwrap();
    let mut events = state.event_bus.subscribe();

    let receipt = state.orchestrator.submit(submission("watcher")).await.unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.result.task_id, receipt.task_id);
    assert_eq!(envelope.user_id, "watcher");

    let mut seen = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
        let done = matches!(event, MatchEvent::TaskSucceeded { .. });
        seen.push(event.event_type());
        if done {
            break;
        }
    }
    assert!(seen.contains(&"TaskQueued"));
    assert_eq!(seen.iter().filter(|t| **t == "StepStarted").count(), 5);
    assert_eq!(seen.last(), Some(&"TaskSucceeded"));
}

#[tokio::test]
async fn stale_tasks_are_failed_on_restart() {
    let pool = test_pool().await;
    let task = kindred_match::models::MatchTask::new("ghost", Duration::from_secs(10));
    db::tasks::insert_task(&pool, &task, 100).await.unwrap();

    let state = test_app_state_with(pool, Arc::new(ScriptedLanguageModel::default()), test_config()).await;

    let recovered = state.orchestrator.status(task.task_id).await.unwrap().unwrap();
    match recovered.status {
        TaskStatus::Failed { error } => {
            assert_eq!(error.kind, TaskErrorKind::Internal);
            assert_eq!(error.message, "service restarted");
        }
        other => panic!("expected recovery failure, got {:?}", other),
    }
}
