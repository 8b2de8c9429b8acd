use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Address of a workflow definition, e.g. `workflow://demo/order-intake`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowUri(String);

impl WorkflowUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address of one named step inside this workflow
    pub fn step(&self, name: &str) -> StepUri {
        StepUri(format!("{}#{}", self.0, name))
    }

    /// Scheme-less path, used for lock names and log paths
    pub fn path(&self) -> &str {
        strip_scheme(&self.0)
    }
}

impl fmt::Display for WorkflowUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully-qualified step address: workflow URI plus a `#step` fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepUri(String);

impl StepUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn workflow(&self) -> WorkflowUri {
        match self.0.split_once('#') {
            Some((base, _)) => WorkflowUri::new(base),
            None => WorkflowUri::new(self.0.clone()),
        }
    }

    pub fn step_name(&self) -> Option<&str> {
        self.0
            .split_once('#')
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
    }

    /// Same workflow, different step fragment
    pub fn with_step(&self, name: &str) -> StepUri {
        self.workflow().step(name)
    }
}

impl fmt::Display for StepUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one work order, e.g. `order://demo/order-intake/7f9a402c`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderUri(String);

impl OrderUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Mint a fresh order URI under the workflow's path
    pub fn generate(workflow: &WorkflowUri) -> Self {
        Self(format!(
            "order://{}/{}",
            workflow.path(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme-less path; lock names are scoped to this
    pub fn path(&self) -> &str {
        strip_scheme(&self.0)
    }

    /// Address of one worker within this order
    pub fn worker_uri(&self, worker_id: &str) -> String {
        format!("{}#{}", self.0, worker_id)
    }
}

impl fmt::Display for OrderUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_scheme(uri: &str) -> &str {
    match uri.split_once("://") {
        Some((_, rest)) => rest,
        None => uri,
    }
}

/// Split a worker URI back into its order URI and worker id
pub fn split_worker_uri(worker_uri: &str) -> Option<(OrderUri, &str)> {
    let (order, id) = worker_uri.split_once('#')?;
    if id.is_empty() {
        return None;
    }
    Some((OrderUri::new(order), id))
}
