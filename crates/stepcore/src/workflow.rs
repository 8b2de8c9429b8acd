use crate::uri::{StepUri, WorkflowUri};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved transition codes and internal sentinels exchanged with executables
pub mod codes {
    /// Worker has already been re-enqueued by the executable; do not transition again
    pub const REPUBLISHED: &str = "$__reserved__REPUBLISHED";
    /// Worker should block and wait for an external wake
    pub const SUSPEND: &str = "$__reserved__SUSPEND";
    /// Wake code handed to a split parent when every child finished cleanly
    pub const OKAY: &str = "ok";
    /// Wake code handed to a split parent when any child errored
    pub const ERROR: &str = "error";
    pub const RETURN: &str = "$RETURN";
    pub const FAIL: &str = "$FAIL";
    pub const CANCEL: &str = "$CANCEL";
    pub const JOIN: &str = "$JOIN";
}

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub uri: WorkflowUri,
    pub name: String,
    pub start_step: Option<String>,
    /// Default routing category for published steps
    pub category: String,
    pub steps: Vec<Step>,
    /// Key/value overlay available to every step of this workflow
    #[serde(default)]
    pub view: HashMap<String, String>,
    /// `%`-template evaluated against the execution context to name the
    /// app-status document for this workflow
    #[serde(default)]
    pub app_status_pattern: Option<String>,
}

impl Workflow {
    pub fn new(uri: impl Into<String>, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            uri: WorkflowUri::new(uri),
            name: name.into(),
            start_step: None,
            category: category.into(),
            steps: Vec::new(),
            view: HashMap::new(),
            app_status_pattern: None,
        }
    }

    pub fn with_start_step(mut self, name: impl Into<String>) -> Self {
        self.start_step = Some(name.into());
        self
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_view(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.view.insert(key.into(), value.into());
        self
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Address of the declared start step, if any
    pub fn start_uri(&self) -> Option<StepUri> {
        self.start_step.as_deref().map(|name| self.uri.step(name))
    }
}

/// One step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Executable reference: a URI whose scheme selects the runtime, or a
    /// reserved `$`-form (see [`SpecialForm`])
    pub executable: String,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// Soft time limit applied while the executable runs
    #[serde(default)]
    pub soft_timeout_secs: Option<u64>,
    /// Overrides the workflow's routing category for this step only
    #[serde(default)]
    pub category_override: Option<String>,
    /// Per-step view overlay
    #[serde(default)]
    pub view: HashMap<String, String>,
}

impl Step {
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            transitions: Vec::new(),
            soft_timeout_secs: None,
            category_override: None,
            view: HashMap::new(),
        }
    }

    pub fn with_transition(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.transitions.push(Transition::new(name, target));
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.soft_timeout_secs = Some(seconds);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category_override = Some(category.into());
        self
    }

    pub fn with_view(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.view.insert(key.into(), value.into());
        self
    }
}

/// Maps a step's return code to the next step or terminal action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Expected return code; empty string matches any code (default transition)
    pub name: String,
    /// Target step name, or one of `$RETURN[:var]`, `$FAIL`, `$CANCEL`, `$JOIN`
    pub target: String,
}

impl Transition {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }

    /// The implicit transition used when a step declares nothing that matches
    pub fn implicit_return() -> Self {
        Self::new("", codes::RETURN)
    }
}

/// Reserved `$`-form executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialForm {
    /// Synchronized fan-out; parent blocks until all children rejoin
    Split(Vec<String>),
    /// Independent fan-out; no rendezvous
    Fork(Vec<String>),
    /// Terminates a split child as FINISHED
    Join,
    /// Pops the call stack; the optional value is resolved through the
    /// execution context to produce the transition code
    Return(Option<String>),
    Fail,
    Cancel,
}

impl SpecialForm {
    /// Parse a reserved executable form; `None` means the executable is a URI
    pub fn parse(executable: &str) -> Option<SpecialForm> {
        if let Some(rest) = executable.strip_prefix("$SPLIT:") {
            return Some(SpecialForm::Split(split_names(rest)));
        }
        if let Some(rest) = executable.strip_prefix("$FORK:") {
            return Some(SpecialForm::Fork(split_names(rest)));
        }
        match executable {
            codes::JOIN => Some(SpecialForm::Join),
            codes::RETURN => Some(SpecialForm::Return(None)),
            codes::FAIL => Some(SpecialForm::Fail),
            codes::CANCEL => Some(SpecialForm::Cancel),
            _ => executable
                .strip_prefix("$RETURN:")
                .map(|v| SpecialForm::Return(Some(v.to_string()))),
        }
    }

    /// True when the executable is any reserved `$`-form, parseable or not
    pub fn looks_special(executable: &str) -> bool {
        executable.starts_with('$')
    }
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Executable reference with its scheme resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executable {
    Special(SpecialForm),
    /// `script://...` — external script runtime
    Script(String),
    /// `workflow://...[#step]` — nested workflow call
    Workflow(String),
    /// `invocable://Authority[/...]` — registered native handler
    Invocable { authority: String, uri: String },
    /// Unrecognized scheme; the worker suspends
    Unknown(String),
}

impl Executable {
    pub fn parse(raw: &str) -> Executable {
        if SpecialForm::looks_special(raw) {
            return match SpecialForm::parse(raw) {
                Some(form) => Executable::Special(form),
                None => Executable::Unknown(raw.to_string()),
            };
        }
        match raw.split_once("://") {
            Some(("script", _)) => Executable::Script(raw.to_string()),
            Some(("workflow", _)) => Executable::Workflow(raw.to_string()),
            Some(("invocable", rest)) => {
                let authority = rest.split('/').next().unwrap_or(rest).to_string();
                Executable::Invocable {
                    authority,
                    uri: raw.to_string(),
                }
            }
            _ => Executable::Unknown(raw.to_string()),
        }
    }
}
