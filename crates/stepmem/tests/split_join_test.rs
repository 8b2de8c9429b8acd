use std::collections::HashMap;
use stepcore::{OrderState, OrderStore, Step, WorkerState, Workflow};
use stepmem::{run_until_idle, MemoryWorld};
use stepruntime::ROOT_WORKER_ID;

/// Seed splits into Left/Right; the wake code routes to Done or Bad.
fn split_workflow(right_executable: &str, split_targets: &str) -> Workflow {
    Workflow::new("workflow://test/split", "Split", "alpha")
        .with_start_step("Seed")
        .with_step(
            Step::new("Seed", format!("$SPLIT:{}", split_targets))
                .with_transition("ok", "Done")
                .with_transition("error", "Bad"),
        )
        .with_step(Step::new("Left", "invocable://Echo").with_transition("ok", "$JOIN"))
        .with_step(Step::new("Right", right_executable).with_transition("ok", "$JOIN"))
        .with_step(
            Step::new("Done", "invocable://SetOutput")
                .with_view("outcome", "ok")
                .with_transition("ok", "$RETURN"),
        )
        .with_step(
            Step::new("Bad", "invocable://SetOutput")
                .with_view("outcome", "error")
                .with_transition("ok", "$RETURN"),
        )
}

async fn start_order(
    world: &MemoryWorld,
    engine: &stepruntime::StepEngine,
    workflow: Workflow,
) -> stepcore::WorkOrder {
    let uri = workflow.uri.clone();
    world.store.add_workflow(workflow).await;
    let (order, worker) = engine
        .create_work_order(&uri, HashMap::new(), "tester", 0)
        .await
        .expect("create work order");
    engine.start(&worker).await.expect("start");
    order
}

#[tokio::test]
async fn split_wait_count_survives_stillborn_children() {
    let world = MemoryWorld::new();
    let engine = world.engine();
    // Ghost does not resolve to a step
    let order = start_order(
        &world,
        &engine,
        split_workflow("invocable://Echo", "Left,Right,Ghost"),
    )
    .await;

    // execute only the split step
    let envelope = world.transport.pop().await.expect("root publish");
    let mut parent = envelope.worker;
    engine.execute_step(&mut parent).await.expect("split step");

    let parent = world
        .store
        .load_worker(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("load")
        .expect("parent");
    assert_eq!(parent.status, WorkerState::Blocked);
    assert_eq!(parent.wait_count, 2);

    let countdown = world
        .store
        .load_countdown(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("load")
        .expect("countdown");
    assert_eq!(countdown.wait_count, 2);

    // only the two viable children were published
    assert_eq!(world.transport.len().await, 2);

    // the stillborn child is persisted in ERROR and registered on the order
    let stillborn = world
        .store
        .load_worker(&order.uri, "0C")
        .await
        .expect("load")
        .expect("stillborn child");
    assert_eq!(stillborn.status, WorkerState::Error);
    assert!(stillborn.detail.is_some());

    let reloaded = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(reloaded.worker_ids, vec!["0", "0A", "0B", "0C"]);
    // split children never join the pending set; the parent carries them
    assert_eq!(reloaded.pending_ids, vec!["0"]);
}

#[tokio::test]
async fn clean_join_wakes_parent_with_ok() {
    let world = MemoryWorld::new();
    let engine = world.engine();
    let order = start_order(
        &world,
        &engine,
        split_workflow("invocable://Echo", "Left,Right"),
    )
    .await;

    run_until_idle(&engine, &world.transport).await.expect("drive");

    let finished = world.store.load_order(&order.uri).await.expect("order");
    assert_eq!(finished.status, OrderState::Finished);
    assert_eq!(finished.outputs.get("outcome").map(String::as_str), Some("ok"));
    assert!(finished.end_time.is_some());

    // the countdown is gone once the last child finishes
    assert!(world
        .store
        .load_countdown(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("load")
        .is_none());

    // parent ran Seed then Done, nothing else: exactly one wake
    let records = world
        .store
        .step_records(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("records");
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Seed", "Done"]);
}

#[tokio::test]
async fn failed_sibling_turns_the_wake_code_to_error() {
    let world = MemoryWorld::new();
    let engine = world.engine();
    let order = start_order(
        &world,
        &engine,
        split_workflow("invocable://Fail", "Left,Right"),
    )
    .await;

    run_until_idle(&engine, &world.transport).await.expect("drive");

    let finished = world.store.load_order(&order.uri).await.expect("order");
    // partial failure is visible, not blocking: the join completed and took
    // the error route, and the errored child shows up in the aggregate
    assert_eq!(finished.outputs.get("outcome").map(String::as_str), Some("error"));
    assert_eq!(finished.status, OrderState::Error);
    assert!(finished.end_time.is_some());

    let left = world
        .store
        .load_worker(&order.uri, "0A")
        .await
        .expect("load")
        .expect("left");
    assert_eq!(left.status, WorkerState::Finished);
    let right = world
        .store
        .load_worker(&order.uri, "0B")
        .await
        .expect("load")
        .expect("right");
    assert_eq!(right.status, WorkerState::Error);

    let records = world
        .store
        .step_records(&order.uri, ROOT_WORKER_ID)
        .await
        .expect("records");
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Seed", "Bad"]);
}

#[tokio::test]
async fn join_wake_is_independent_of_finish_order() {
    for error_child_first in [true, false] {
        let world = MemoryWorld::new();
        let engine = world.engine();
        let order = start_order(
            &world,
            &engine,
            split_workflow("invocable://Fail", "Left,Right"),
        )
        .await;

        // split
        let envelope = world.transport.pop().await.expect("root publish");
        let mut parent = envelope.worker;
        engine.execute_step(&mut parent).await.expect("split step");

        let (first, second) = if error_child_first {
            ("0B", "0A")
        } else {
            ("0A", "0B")
        };

        let envelope = world.transport.pop_worker(first).await.expect("first child");
        let mut child = envelope.worker;
        engine.execute_step(&mut child).await.expect("first child step");

        // parent still blocked, countdown decremented, no wake yet
        assert_eq!(
            world
                .store
                .load_countdown(&order.uri, ROOT_WORKER_ID)
                .await
                .expect("load")
                .expect("countdown")
                .wait_count,
            1
        );
        let parent = world
            .store
            .load_worker(&order.uri, ROOT_WORKER_ID)
            .await
            .expect("load")
            .expect("parent");
        assert_eq!(parent.status, WorkerState::Blocked);

        let envelope = world.transport.pop_worker(second).await.expect("second child");
        let mut child = envelope.worker;
        engine.execute_step(&mut child).await.expect("second child step");

        // the last child finishing wakes the parent exactly once
        run_until_idle(&engine, &world.transport).await.expect("drain");

        let finished = world.store.load_order(&order.uri).await.expect("order");
        assert_eq!(
            finished.outputs.get("outcome").map(String::as_str),
            Some("error"),
            "error_child_first={}",
            error_child_first
        );
        let records = world
            .store
            .step_records(&order.uri, ROOT_WORKER_ID)
            .await
            .expect("records");
        let wakes = records.iter().filter(|r| r.name == "Bad").count();
        assert_eq!(wakes, 1);
    }
}
