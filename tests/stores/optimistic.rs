//! Optimistic store: reads, immediate writes, rollback and coalescing.

use std::time::Duration;

use futures::future::join_all;
use grpc_store::{OpKind, OptimisticStore, StoreConfig, StoreError, WriteMode, WriteQueue};

use crate::support::{connect, merge_goal, Backend, Goal, GoalPatch, Step, ENDPOINT};

type GoalStore = OptimisticStore<String, Backend, Goal, GoalPatch, Goal>;

fn original() -> Goal {
    Goal::new("Ship v1", 10)
}

fn goal_store(backend: &Backend, config: StoreConfig) -> GoalStore {
    OptimisticStore::builder(connect(backend), |client: Backend, _endpoint: String| {
        client.read()
    })
    .with_write(|client: Backend, _endpoint: String, goal: Goal| client.write(goal))
    .with_merge(merge_goal)
    .with_config(config)
    .build()
}

async fn loaded(backend: &Backend, config: StoreConfig) -> GoalStore {
    let store = goal_store(backend, config);
    store.set_params(ENDPOINT.to_string()).await.unwrap();
    assert_eq!(store.data(), Some(original()));
    store
}

fn immediate() -> StoreConfig {
    StoreConfig::named("goals").without_debounce()
}

#[tokio::test]
async fn read_failure_keeps_loaded_data() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, immediate()).await;

    backend.script([Step::fail("unavailable")]);
    store.load_data().await;

    assert_eq!(store.data(), Some(original()));
    assert_eq!(store.error().as_deref(), Some("unavailable"));
    assert!(!store.is_loading());
}

#[tokio::test]
async fn read_without_client_records_error() {
    let backend = Backend::with_goal(original());
    let store = goal_store(&backend, immediate());

    store.load_data().await;

    assert_eq!(store.error(), Some(StoreError::MissingParams.to_string()));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn capabilities_follow_configured_functions() {
    let backend = Backend::with_goal(original());
    let read_only: OptimisticStore<String, Backend, Goal> =
        OptimisticStore::builder(connect(&backend), |client: Backend, _endpoint: String| {
            client.read()
        })
        .build();
    assert!(!read_only.supports_write());
    assert!(!read_only.supports_update());
    assert_eq!(
        read_only.write(original(), WriteMode::Optimistic).await,
        Err(StoreError::WriteUnavailable)
    );

    let no_merge = OptimisticStore::builder(connect(&backend), |client: Backend, _endpoint: String| {
        client.read()
    })
    .with_write(|client: Backend, _endpoint: String, goal: Goal| client.write(goal))
    .build();
    assert!(no_merge.supports_write());
    assert!(!no_merge.supports_update());
    assert_eq!(
        no_merge.update(original(), WriteMode::Optimistic).await,
        Err(StoreError::UpdateUnavailable)
    );
}

#[tokio::test(start_paused = true)]
async fn optimistic_write_is_visible_before_confirmation() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, immediate()).await;
    backend.script([Step::ok().after(50)]);

    let next = Goal::new("Ship v2", 10);
    let pending = store.write(next.clone(), WriteMode::Optimistic);

    assert_eq!(store.data(), Some(next.clone()));
    assert_eq!(store.confirmed_data(), Some(original()));
    assert!(store.is_writing());

    assert_eq!(pending.await, Ok(next.clone()));
    assert_eq!(store.confirmed_data(), Some(next.clone()));
    assert!(!store.is_writing());
    assert!(store.history().is_empty());
    assert_eq!(backend.stored(), Some(next));
}

#[tokio::test]
async fn failed_write_rolls_back() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, immediate()).await;
    backend.script([Step::fail("permission denied")]);

    let result = store.write(Goal::new("Hijacked", 0), WriteMode::Optimistic).await;

    assert_eq!(result, Err(StoreError::backend("permission denied")));
    assert_eq!(store.data(), Some(original()));
    assert_eq!(store.write_error().as_deref(), Some("permission denied"));
    assert!(!store.is_writing());
}

#[tokio::test(start_paused = true)]
async fn rapid_writes_are_coalesced() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, StoreConfig::named("goals")).await;

    let drafts: Vec<_> = (1..=3).map(|n| Goal::new(&format!("Draft {n}"), n * 10)).collect();
    let mut pending = Vec::new();
    for draft in &drafts {
        pending.push(store.write(draft.clone(), WriteMode::Optimistic));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.data(), Some(drafts[2].clone()));
    assert!(backend.sent().is_empty());

    let results = join_all(pending).await;

    assert!(results.iter().all(|r| r.as_ref() == Ok(&drafts[2])));
    assert_eq!(backend.sent(), vec![drafts[2].clone()]);
    assert_eq!(store.confirmed_data(), Some(drafts[2].clone()));
}

#[tokio::test]
async fn waiting_write_changes_data_only_on_success() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, immediate()).await;

    let next = Goal::new("Ship v2", 40);
    let pending = store.write(next.clone(), WriteMode::WaitForResponse);
    assert_eq!(store.data(), Some(original()));
    assert_eq!(pending.await, Ok(next.clone()));
    assert_eq!(store.data(), Some(next.clone()));

    backend.script([Step::fail("conflict")]);
    let result = store.write(Goal::new("Ship v3", 50), WriteMode::WaitForResponse).await;
    assert_eq!(result, Err(StoreError::backend("conflict")));
    assert_eq!(store.data(), Some(next));
    assert_eq!(store.write_error().as_deref(), Some("conflict"));
}

#[tokio::test]
async fn update_needs_loaded_data() {
    let backend = Backend::default();
    let store = goal_store(&backend, immediate());

    let result = store.update(GoalPatch::progress(50), WriteMode::Optimistic).await;

    assert_eq!(result, Err(StoreError::NoData));
    assert_eq!(backend.sent(), Vec::<Goal>::new());
}

#[tokio::test(start_paused = true)]
async fn optimistic_update_merges_immediately() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, immediate()).await;
    backend.script([Step::ok().after(20)]);

    let pending = store.update(GoalPatch::progress(60), WriteMode::Optimistic);

    assert_eq!(store.data(), Some(Goal::new("Ship v1", 60)));
    let history = store.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, OpKind::Merge);

    assert_eq!(pending.await, Ok(Goal::new("Ship v1", 60)));
    assert_eq!(store.confirmed_data(), Some(Goal::new("Ship v1", 60)));
    assert_eq!(backend.sent(), vec![Goal::new("Ship v1", 60)]);
}

#[tokio::test(start_paused = true)]
async fn earlier_failure_does_not_revert_later_update() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, immediate()).await;
    backend.script([Step::fail("rejected").after(100), Step::ok().after(10)]);

    let first = store.update(GoalPatch::title("Renamed"), WriteMode::Optimistic);
    let second = store.update(GoalPatch::progress(80), WriteMode::Optimistic);
    assert_eq!(store.data(), Some(Goal::new("Renamed", 80)));

    let (first, second) = futures::join!(first, second);

    // The second payload already carried the rename.
    assert_eq!(
        backend.sent(),
        vec![Goal::new("Renamed", 10), Goal::new("Renamed", 80)]
    );
    assert_eq!(first, Err(StoreError::backend("rejected")));
    assert_eq!(second, Ok(Goal::new("Renamed", 80)));
    assert_eq!(store.confirmed_data(), backend.stored());
    assert_eq!(store.data(), Some(Goal::new("Renamed", 80)));
    assert!(store.history().is_empty());
    assert_eq!(store.write_error().as_deref(), Some("rejected"));
}

#[tokio::test(start_paused = true)]
async fn accepted_update_settles_earlier_pending_ones() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, immediate()).await;
    backend.script([Step::ok().after(100), Step::ok().after(10)]);

    let first = store.update(GoalPatch::title("Renamed"), WriteMode::Optimistic);
    let second = store.update(GoalPatch::progress(80), WriteMode::Optimistic);

    assert_eq!(second.await, Ok(Goal::new("Renamed", 80)));
    assert_eq!(store.confirmed_data(), Some(Goal::new("Renamed", 80)));
    assert_eq!(store.confirmed_data(), backend.stored());
    assert!(store.history().is_empty());

    // The slower call lands last, so its payload is what the backend keeps.
    first.await.unwrap();
    assert_eq!(store.confirmed_data(), Some(Goal::new("Renamed", 10)));
    assert_eq!(store.confirmed_data(), backend.stored());
    assert_eq!(store.data(), backend.stored());
}

#[tokio::test]
async fn waiting_update_uses_processed_response() {
    let backend = Backend::with_goal(original());
    let store = goal_store(&backend, immediate());
    store.set_params(ENDPOINT.to_string()).await.unwrap();

    let merged = store.update(GoalPatch::progress(150), WriteMode::WaitForResponse).await;
    assert_eq!(merged, Ok(Goal::new("Ship v1", 150)));

    let processed: GoalStore = OptimisticStore::builder(connect(&backend), |client: Backend, _endpoint: String| {
        client.read()
    })
    .with_write(|client: Backend, _endpoint: String, goal: Goal| client.write(goal))
    .with_merge(merge_goal)
    .with_process_response(|_current: &Goal, saved: Goal, _patch: &GoalPatch| saved)
    .with_config(immediate())
    .build();
    processed.set_params(ENDPOINT.to_string()).await.unwrap();

    let result = processed.update(GoalPatch::progress(150), WriteMode::WaitForResponse).await;

    assert_eq!(result, Ok(Goal::new("Ship v1", 100)));
    assert_eq!(processed.data(), Some(Goal::new("Ship v1", 100)));
}

#[tokio::test(start_paused = true)]
async fn undo_drops_latest_pending_change() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, immediate()).await;
    backend.script([Step::ok().after(50)]);

    let pending = store.update(GoalPatch::progress(90), WriteMode::Optimistic);
    assert!(store.undo_last().is_some());
    assert_eq!(store.data(), Some(original()));
    assert!(store.undo_last().is_none());

    // The call still reached the backend, so its value is confirmed.
    pending.await.unwrap();
    assert_eq!(store.data(), Some(Goal::new("Ship v1", 90)));
    assert_eq!(store.confirmed_data(), backend.stored());
}

#[tokio::test(start_paused = true)]
async fn shared_queue_bounds_concurrent_updates() {
    let backend = Backend::with_goal(original());
    let queue = WriteQueue::new(3).with_name("goals");
    let store = OptimisticStore::builder(connect(&backend), |client: Backend, _endpoint: String| {
        client.read()
    })
    .with_write(|client: Backend, _endpoint: String, goal: Goal| client.write(goal))
    .with_merge(merge_goal)
    .with_queue(queue.clone())
    .build();
    store.set_params(ENDPOINT.to_string()).await.unwrap();
    backend.script([10, 20, 30, 30, 30].map(|ms| Step::ok().after(ms)));

    let pending: Vec<_> = (1..=5)
        .map(|n| store.update(GoalPatch::progress(n * 10), WriteMode::Optimistic))
        .collect();
    let results = join_all(pending).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(backend.peak(), 3);
    assert_eq!(queue.stats().completed, 5);
    assert_eq!(store.queue_stats(), queue.stats());
    assert_eq!(store.data(), Some(Goal::new("Ship v1", 50)));
    assert_eq!(store.confirmed_data(), backend.stored());
}

#[tokio::test(start_paused = true)]
async fn data_is_unchanged_until_reload_answers() {
    let backend = Backend::with_goal(original());
    let store = loaded(&backend, immediate()).await;
    backend.script([Step::ok(), Step::ok().after(50)]);
    backend.clone().write(Goal::new("Ship v2", 30)).await.unwrap();

    let reload = tokio::spawn({
        let store = store.clone();
        async move { store.set_params("http://mirror.local:50051".to_string()).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.is_loading());
    assert_eq!(store.data(), Some(original()));

    reload.await.unwrap().unwrap();
    assert_eq!(store.data(), Some(Goal::new("Ship v2", 30)));
}

#[test]
fn waiting_write_is_lazy_outside_a_runtime() {
    let backend = Backend::with_goal(original());
    let store = goal_store(&backend, immediate());

    // Nothing is spawned until the future is polled.
    let pending = store.write(Goal::new("Ship v2", 20), WriteMode::WaitForResponse);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    assert_eq!(runtime.block_on(pending), Err(StoreError::MissingParams));
    assert_eq!(backend.calls(), 0);
}

#[test]
#[should_panic]
fn optimistic_write_needs_a_runtime() {
    let backend = Backend::with_goal(original());
    let store = goal_store(&backend, immediate());

    let _ = store.write(Goal::new("Ship v2", 20), WriteMode::Optimistic);
}
