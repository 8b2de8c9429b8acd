use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stepcore::{LockService, OrderState, OrderStore, Severity, Step, WorkerState, Workflow};
use stepmem::{run_until_idle, MemoryLockService, MemoryWorld, RecordingMetrics};
use stepruntime::{initial_args_hash, ROOT_WORKER_ID};

fn fork_workflow(targets: &str) -> Workflow {
    Workflow::new("workflow://test/fork", "Fork", "alpha")
        .with_start_step("Seed")
        .with_step(
            Step::new("Seed", format!("$FORK:{}", targets)).with_transition("ok", "$RETURN"),
        )
        .with_step(
            Step::new("Kid1", "invocable://SetOutput")
                .with_view("kid1", "done")
                .with_transition("ok", "$RETURN"),
        )
        .with_step(
            Step::new("Kid2", "invocable://SetOutput")
                .with_view("kid2", "done")
                .with_transition("ok", "$RETURN"),
        )
}

async fn start_order(
    world: &MemoryWorld,
    engine: &stepruntime::StepEngine,
    workflow: Workflow,
    args: HashMap<String, serde_json::Value>,
) -> stepcore::WorkOrder {
    let uri = workflow.uri.clone();
    world.store.add_workflow(workflow).await;
    let (order, worker) = engine
        .create_work_order(&uri, args, "tester", 0)
        .await
        .expect("create work order");
    engine.start(&worker).await.expect("start");
    order
}

#[tokio::test]
async fn fork_children_get_sequential_order_scoped_ids() {
    let world = MemoryWorld::new();
    let engine = world.engine();
    let order = start_order(&world, &engine, fork_workflow("Kid1,Kid2"), HashMap::new()).await;

    run_until_idle(&engine, &world.transport).await.expect("drive");

    let finished = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(finished.worker_ids, vec!["0", "1", "2"]);
    assert!(finished.pending_ids.is_empty());
    assert_eq!(finished.status, OrderState::Finished);
    assert!(finished.end_time.is_some());

    // outputs from both children merged into the order
    assert_eq!(finished.outputs.get("kid1").map(String::as_str), Some("done"));
    assert_eq!(finished.outputs.get("kid2").map(String::as_str), Some("done"));

    for id in ["1", "2"] {
        let child = world
            .store
            .load_worker(&order.uri, id)
            .await
            .expect("load")
            .expect("child");
        assert_eq!(child.status, WorkerState::Finished);
        assert!(child.parent.is_empty());
        assert_eq!(child.wait_count, 0);
    }
}

#[tokio::test]
async fn stillborn_fork_child_is_registered_but_never_published() {
    let world = MemoryWorld::new();
    let engine = world.engine();
    let order = start_order(&world, &engine, fork_workflow("Kid1,Ghost"), HashMap::new()).await;

    run_until_idle(&engine, &world.transport).await.expect("drive");

    let reloaded = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(reloaded.worker_ids, vec!["0", "1", "2"]);

    let stillborn = world
        .store
        .load_worker(&order.uri, "2")
        .await
        .expect("load")
        .expect("stillborn");
    assert_eq!(stillborn.status, WorkerState::Error);

    // the stillborn id stays in the bookkeeping; nothing ever ran it
    assert!(reloaded.pending_ids.contains(&"2".to_string()));
    assert!(reloaded.end_time.is_none());
    assert!(world.transport.is_empty().await);
}

#[tokio::test]
async fn end_time_is_set_exactly_once_when_pending_drains() {
    let workflow = Workflow::new("workflow://test/two", "Two", "alpha")
        .with_start_step("A")
        .with_step(Step::new("A", "invocable://Echo").with_transition("ok", "B"))
        .with_step(Step::new("B", "invocable://Echo").with_transition("ok", "$RETURN"));
    let world = MemoryWorld::new();
    let engine = world.engine();
    let order = start_order(&world, &engine, workflow, HashMap::new()).await;

    // after the first step the order is still pending
    let envelope = world.transport.pop().await.expect("publish");
    let mut worker = envelope.worker;
    engine.execute_step(&mut worker).await.expect("step A");
    let mid = world.store.load_order(&order.uri).await.expect("order");
    assert!(mid.end_time.is_none());

    let envelope = world.transport.pop().await.expect("publish");
    let mut worker = envelope.worker;
    engine.execute_step(&mut worker).await.expect("step B");
    let done = world.store.load_order(&order.uri).await.expect("order");
    let end_time = done.end_time.expect("end time set");
    assert_eq!(done.status, OrderState::Finished);

    // nothing moves it afterwards
    let again = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(again.end_time, Some(end_time));
}

#[tokio::test]
async fn metrics_are_submitted_with_the_initial_args_hash() {
    let mut args = HashMap::new();
    args.insert("customer".to_string(), serde_json::json!("acme"));
    args.insert("count".to_string(), serde_json::json!(3));

    let workflow = Workflow::new("workflow://test/metrics", "Metrics", "alpha")
        .with_start_step("A")
        .with_step(Step::new("A", "$RETURN"));

    let world = MemoryWorld::new();
    let metrics = Arc::new(RecordingMetrics::new());
    let engine = world
        .engine_builder()
        .with_metrics(metrics.clone())
        .build();
    let order = start_order(&world, &engine, workflow, args.clone()).await;

    run_until_idle(&engine, &world.transport).await.expect("drive");
    // metrics finalization runs on a spawned task
    tokio::time::sleep(Duration::from_millis(50)).await;

    let finished = metrics.finished().await;
    assert_eq!(finished.len(), 1);
    let (uri, hash, status) = &finished[0];
    assert_eq!(uri, order.uri.as_str());
    assert_eq!(hash.as_deref(), Some(initial_args_hash(&args).as_str()));
    assert_eq!(*status, OrderState::Finished);
}

#[test]
fn initial_args_hash_is_stable_and_order_insensitive() {
    let mut a = HashMap::new();
    a.insert("x".to_string(), serde_json::json!(1));
    a.insert("y".to_string(), serde_json::json!("two"));
    let mut b = HashMap::new();
    b.insert("y".to_string(), serde_json::json!("two"));
    b.insert("x".to_string(), serde_json::json!(1));

    assert_eq!(initial_args_hash(&a), initial_args_hash(&b));

    let mut c = HashMap::new();
    c.insert("x".to_string(), serde_json::json!(2));
    c.insert("y".to_string(), serde_json::json!("two"));
    assert_ne!(initial_args_hash(&a), initial_args_hash(&c));
}

#[tokio::test]
async fn status_events_carry_severity() {
    let workflow = Workflow::new("workflow://test/events", "Events", "alpha")
        .with_start_step("A")
        .with_step(Step::new("A", "invocable://Fail"));
    let world = MemoryWorld::new();
    let engine = world.engine();
    let mut events = engine.subscribe_events();
    let order = start_order(&world, &engine, workflow, HashMap::new()).await;

    run_until_idle(&engine, &world.transport).await.expect("drive");

    let event = events.try_recv().expect("status event");
    assert_eq!(event.order_uri, order.uri);
    assert_eq!(event.status, WorkerState::Error);
    assert_eq!(event.severity, Severity::Error);
}

#[tokio::test]
async fn lock_service_bounds_the_wait_and_checks_tokens() {
    let locks = MemoryLockService::new();
    let wait = Duration::from_millis(50);
    let ttl = Duration::from_secs(10);

    let handle = locks
        .acquire("orders/x", wait, ttl)
        .await
        .expect("acquire")
        .expect("handle");

    // a second acquire times out while the lock is held
    let blocked = locks.acquire("orders/x", wait, ttl).await.expect("acquire");
    assert!(blocked.is_none());

    // releasing with a mismatched token is refused
    let bogus = stepcore::LockHandle {
        name: "orders/x".to_string(),
        token: handle.token + 1,
    };
    assert!(!locks.release("orders/x", bogus).await.expect("release"));
    assert!(locks.release("orders/x", handle).await.expect("release"));

    // and the lock is free again
    let again = locks.acquire("orders/x", wait, ttl).await.expect("acquire");
    assert!(again.is_some());
}
