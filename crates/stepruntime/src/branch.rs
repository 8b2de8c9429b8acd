//! Fork/split/join orchestration: the two fan-out primitives and the
//! rendezvous that reunites split children with their parent.

use crate::engine::StepEngine;
use crate::naming;
use stepcore::{
    codes, EngineError, JoinCountdown, Step, WorkOrder, Worker, WorkerState, Workflow,
};

impl StepEngine {
    /// Synchronized fan-out. One child per target step, all sharing a join
    /// countdown; the parent blocks until the countdown drains. A target that
    /// does not resolve to a real step yields a stillborn child, persisted in
    /// ERROR and never published, and the parent's wait count drops before
    /// the parent is persisted.
    pub(crate) async fn publish_split_children(
        &self,
        parent: &mut Worker,
        step: &Step,
        flow: &Workflow,
        names: &[String],
    ) -> Result<(), EngineError> {
        parent.wait_count = names.len();
        parent.status = WorkerState::Blocked;
        let mut children: Vec<(Worker, String)> = Vec::new();
        let mut stillborn: Vec<Worker> = Vec::new();

        for (index, name) in names.iter().enumerate() {
            let target = flow.step(name);
            let mut child = naming::create_split_child(parent, flow, index, names.len(), target);
            match target {
                None => {
                    let detail = format!(
                        "Attempt to start worker with non-extant step {} from {} in {}",
                        name, step.name, flow.uri
                    );
                    tracing::error!("{}", detail);
                    child.detail = Some(detail);
                    child.status = WorkerState::Error;
                    parent.wait_count -= 1;
                    self.store.save_worker(&child).await?;
                    stillborn.push(child);
                }
                Some(target_step) => {
                    self.store.save_worker(&child).await?;
                    children.push((child, Self::calculate_category(target_step, flow)));
                }
            }
        }
        self.store.save_worker(parent).await?;

        // register all children with the order and write the countdown under
        // the forced lock; nothing is published until this commits, so a fast
        // child can never finish before its wait-count bookkeeping exists
        let order = self.store.load_order(&parent.order_uri).await?;
        let lock = self.grab_order_lock(&order, parent, true).await?;
        let outcome: Result<(), EngineError> = async {
            let mut order = self.store.load_order(&parent.order_uri).await?;
            for (child, _) in &children {
                order.worker_ids.push(child.id.clone());
                tracing::debug!(
                    "Adding new worker {} at {}",
                    child.id,
                    child
                        .current_step()
                        .map(|s| s.as_str())
                        .unwrap_or("UNKNOWN_LOCATION")
                );
            }
            for child in &stillborn {
                order.worker_ids.push(child.id.clone());
            }
            self.store.save_order(&order).await?;
            let countdown = JoinCountdown {
                order_uri: parent.order_uri.clone(),
                parent_id: parent.id.clone(),
                wait_count: children.len(),
            };
            self.store.save_countdown(&countdown).await?;
            Ok(())
        }
        .await;
        self.release_order_lock(lock).await;
        outcome?;

        // publish viable children
        for (child, category) in &children {
            self.publish_step(child, category).await?;
        }
        Ok(())
    }

    /// Independent fan-out. Children get the next sequential numeric ids on
    /// the order and no wait group; a stillborn target is still registered so
    /// the order's bookkeeping stays consistent, but is never published.
    pub(crate) async fn publish_fork_children(
        &self,
        parent: &mut Worker,
        step: &Step,
        flow: &Workflow,
        names: &[String],
    ) -> Result<(), EngineError> {
        let order = self.store.load_order(&parent.order_uri).await?;
        let lock = self.grab_order_lock(&order, parent, true).await?;
        let mut togo: Vec<(Worker, String)> = Vec::new();
        let outcome: Result<(), EngineError> = async {
            let mut order = self.store.load_order(&parent.order_uri).await?;
            let mut next_id = order.worker_ids.len();
            for name in names {
                let target = flow.step(name);
                let mut child = naming::create_fork_child(&order, parent, flow, next_id, target);
                order.worker_ids.push(child.id.clone());
                order.pending_ids.push(child.id.clone());
                match target {
                    None => {
                        let detail = format!(
                            "Attempt to start worker with non-extant step {} from {} in {}",
                            name, step.name, flow.uri
                        );
                        tracing::error!("{}", detail);
                        child.detail = Some(detail);
                        child.status = WorkerState::Error;
                        self.store.save_worker(&child).await?;
                    }
                    Some(target_step) => {
                        self.store.save_worker(&child).await?;
                        togo.push((child, Self::calculate_category(target_step, flow)));
                    }
                }
                next_id += 1;
            }
            self.store.save_order(&order).await?;
            self.store.save_worker(parent).await?;
            Ok(())
        }
        .await;
        self.release_order_lock(lock).await;
        outcome?;

        for (child, category) in &togo {
            self.publish_step(child, category).await?;
        }
        Ok(())
    }

    /// Wake a split parent once its countdown drains. The wake code is
    /// `"error"` if any sibling errored, else `"ok"`, and is resolved against
    /// the split step still sitting on the parent's stack, so workflow
    /// authors can route success and failure differently from the join point.
    pub(crate) async fn awaken_worker(
        &self,
        order: &mut WorkOrder,
        mut parent: Worker,
        litter: usize,
    ) -> Result<(), EngineError> {
        let code = if self.join_child_failed(order, &parent, litter).await? {
            codes::ERROR
        } else {
            codes::OKAY
        };
        let step_uri = parent.pop_step().ok_or_else(|| {
            EngineError::Execution(format!(
                "Split parent {} has an empty call stack",
                parent.uri()
            ))
        })?;
        let (_, step) = self.workflow_with_step(&step_uri).await?;
        let Some(step) = step else {
            return Err(EngineError::Execution(format!(
                "SPLIT step missing when JOIN finished for {}",
                step_uri
            )));
        };
        Box::pin(self.transition_worker(&mut parent, order, step, step_uri, code.to_string())).await
    }

    /// A missing sibling record also counts as failed
    async fn join_child_failed(
        &self,
        order: &WorkOrder,
        parent: &Worker,
        litter: usize,
    ) -> Result<bool, EngineError> {
        for index in 0..litter {
            let name = naming::make_child_name(&parent.id, index);
            match self.store.load_worker(&order.uri, &name).await? {
                None => {
                    tracing::error!("No record of child worker found: {}#{}", order.uri, name);
                    return Ok(true);
                }
                Some(child) if child.status == WorkerState::Error => return Ok(true),
                Some(_) => {}
            }
        }
        Ok(false)
    }
}
