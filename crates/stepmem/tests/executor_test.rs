use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stepcore::{EngineError, OrderState, OrderStore, Step, WorkerState, Workflow};
use stepmem::{run_until_idle, MemoryWorld};
use stepruntime::ROOT_WORKER_ID;

fn linear_workflow() -> Workflow {
    Workflow::new("workflow://test/linear", "Linear", "alpha")
        .with_start_step("A")
        .with_step(Step::new("A", "invocable://Echo").with_transition("ok", "B"))
        .with_step(
            Step::new("B", "invocable://SetOutput")
                .with_view("result", "done")
                .with_transition("ok", "$RETURN"),
        )
}

async fn start_order(
    world: &MemoryWorld,
    engine: &stepruntime::StepEngine,
    workflow: Workflow,
) -> (stepcore::WorkOrder, stepcore::Worker) {
    let uri = workflow.uri.clone();
    world.store.add_workflow(workflow).await;
    let (order, worker) = engine
        .create_work_order(&uri, HashMap::new(), "tester", 0)
        .await
        .expect("create work order");
    engine.start(&worker).await.expect("start");
    (order, worker)
}

#[tokio::test]
async fn linear_workflow_runs_to_completion() {
    let world = MemoryWorld::new();
    let engine = world.engine();
    let (order, _) = start_order(&world, &engine, linear_workflow()).await;

    let steps = run_until_idle(&engine, &world.transport).await.expect("drive");
    assert_eq!(steps, 2);

    let finished = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(finished.status, OrderState::Finished);
    assert!(finished.end_time.is_some());
    assert!(finished.pending_ids.is_empty());
    assert_eq!(finished.outputs.get("result").map(String::as_str), Some("done"));

    let worker = world
        .store
        .load_worker(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("load")
        .expect("worker");
    assert_eq!(worker.status, WorkerState::Finished);
    assert!(worker.stack.is_empty());

    let records = world
        .store
        .step_records(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("records");
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == OrderState::Finished));
    assert!(records.iter().all(|r| r.end_time.is_some()));
}

#[tokio::test]
async fn unmatched_code_falls_through_to_return() {
    let workflow = Workflow::new("workflow://test/fallthrough", "Fallthrough", "alpha")
        .with_start_step("A")
        .with_step(Step::new("A", "invocable://Echo").with_transition("never", "B"))
        .with_step(Step::new("B", "invocable://Echo"));
    let world = MemoryWorld::new();
    let engine = world.engine();
    let (order, _) = start_order(&world, &engine, workflow).await;

    let steps = run_until_idle(&engine, &world.transport).await.expect("drive");
    // "ok" matches nothing, so the worker returns and finishes; B never runs
    assert_eq!(steps, 1);
    let finished = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(finished.status, OrderState::Finished);
}

#[tokio::test]
async fn unknown_scheme_suspends_the_worker() {
    let workflow = Workflow::new("workflow://test/suspend", "Suspend", "alpha")
        .with_start_step("A")
        .with_step(Step::new("A", "mailto://nobody@example.com"));
    let world = MemoryWorld::new();
    let engine = world.engine();
    let (order, _) = start_order(&world, &engine, workflow).await;

    run_until_idle(&engine, &world.transport).await.expect("drive");

    let worker = world
        .store
        .load_worker(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("load")
        .expect("worker");
    assert_eq!(worker.status, WorkerState::Blocked);

    let pending = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(pending.status, OrderState::Blocked);
    assert!(pending.end_time.is_none());
    assert!(world.transport.is_empty().await);
}

#[tokio::test]
async fn cancellation_waits_for_the_step_boundary() {
    let ran_first = Arc::new(AtomicBool::new(false));
    let ran_second = Arc::new(AtomicBool::new(false));

    let workflow = Workflow::new("workflow://test/cancel", "Cancel", "alpha")
        .with_start_step("First")
        .with_step(Step::new("First", "script://test/first").with_transition("ok", "Second"))
        .with_step(Step::new("Second", "script://test/second").with_transition("ok", "$RETURN"));

    let world = MemoryWorld::new();
    let first_flag = ran_first.clone();
    world
        .scripts
        .register("script://test/first", move |_| {
            first_flag.store(true, Ordering::SeqCst);
            Ok(Some("ok".to_string()))
        })
        .await;
    let second_flag = ran_second.clone();
    world
        .scripts
        .register("script://test/second", move |_| {
            second_flag.store(true, Ordering::SeqCst);
            Ok(Some("ok".to_string()))
        })
        .await;

    let engine = world.engine();
    let (order, _) = start_order(&world, &engine, workflow).await;

    // run the first step, then cancel while the second is already queued
    let envelope = world.transport.pop().await.expect("first publish");
    let mut worker = envelope.worker;
    engine.execute_step(&mut worker).await.expect("first step");
    assert!(ran_first.load(Ordering::SeqCst));

    engine.request_cancel(&order.uri).await.expect("cancel");

    let envelope = world.transport.pop().await.expect("second publish");
    let mut worker = envelope.worker;
    engine.execute_step(&mut worker).await.expect("second step");

    // the in-flight step ran to completion before the worker was cancelled
    assert!(ran_second.load(Ordering::SeqCst));
    assert_eq!(worker.status, WorkerState::Cancelled);

    let records = world
        .store
        .step_records(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].status, OrderState::Finished);

    let finished = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(finished.status, OrderState::Cancelled);
    assert!(finished.end_time.is_some());
}

#[tokio::test]
async fn missing_transition_target_step_is_fatal() {
    let workflow = Workflow::new("workflow://test/missing", "Missing", "alpha")
        .with_start_step("A")
        .with_step(Step::new("A", "invocable://Echo").with_transition("ok", "Nowhere"));
    let world = MemoryWorld::new();
    let engine = world.engine();
    let (order, _) = start_order(&world, &engine, workflow).await;

    let envelope = world.transport.pop().await.expect("publish");
    let mut worker = envelope.worker;
    let result = engine.execute_step(&mut worker).await;
    assert!(matches!(result, Err(EngineError::Definition(_))));

    assert_eq!(worker.status, WorkerState::Error);
    let finished = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(finished.status, OrderState::Error);
    assert!(finished.end_time.is_some());
}

#[tokio::test]
async fn executable_failure_is_consumed_and_recorded() {
    let workflow = Workflow::new("workflow://test/fails", "Fails", "alpha")
        .with_start_step("A")
        .with_step(Step::new("A", "invocable://Fail").with_transition("ok", "$RETURN"));
    let world = MemoryWorld::new();
    let engine = world.engine();
    let (order, _) = start_order(&world, &engine, workflow).await;

    let envelope = world.transport.pop().await.expect("publish");
    let mut worker = envelope.worker;
    // an executable failure never crashes the executor
    engine.execute_step(&mut worker).await.expect("consumed");

    assert_eq!(worker.status, WorkerState::Error);
    assert!(worker.exception_info.is_some());
    assert!(worker.detail.is_some());

    let records = world
        .store
        .step_records(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, OrderState::Error);
    assert!(records[0].exception.is_some());

    let finished = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(finished.status, OrderState::Error);
}

#[tokio::test]
async fn fail_transition_target_errors_the_step_record() {
    let workflow = Workflow::new("workflow://test/failtarget", "FailTarget", "alpha")
        .with_start_step("A")
        .with_step(Step::new("A", "invocable://Echo").with_transition("ok", "$FAIL"));
    let world = MemoryWorld::new();
    let engine = world.engine();
    let (order, _) = start_order(&world, &engine, workflow).await;

    run_until_idle(&engine, &world.transport).await.expect("drive");

    let worker = world
        .store
        .load_worker(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("load")
        .expect("worker");
    assert_eq!(worker.status, WorkerState::Error);

    // the step itself succeeded, but its record reflects the $FAIL routing
    let records = world
        .store
        .step_records(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("records");
    assert_eq!(records[0].status, OrderState::Error);
    assert!(records[0].exception.is_none());
}
