use stepcore::{Step, StepUri, WorkOrder, Worker, WorkerState, Workflow};

/// Encode an index as capital letters: A=0, B=1, ..., Z=25, BA=26, BB=27, ...
pub fn alpha(index: usize) -> String {
    if index > 25 {
        return format!("{}{}", alpha(index / 26), alpha(index % 26));
    }
    char::from(b'A' + index as u8).to_string()
}

/// Derive a split child's id from the parent id and sibling index. The suffix
/// kind (digit vs. letter) always differs from the parent id's last character,
/// so the parent boundary stays locatable.
pub fn make_child_name(stem: &str, index: usize) -> String {
    let last_is_digit = stem
        .chars()
        .last()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(false);
    if last_is_digit {
        format!("{}{}", stem, alpha(index))
    } else {
        format!("{}{}", stem, index)
    }
}

/// Recover the parent id by scanning backward over the maximal trailing run
/// of one character class. Returns an empty string when the whole name is a
/// single run.
pub fn parent_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let last_is_digit = chars[chars.len() - 1].is_ascii_digit();
    let mut cut = chars.len();
    while cut > 0 && chars[cut - 1].is_ascii_digit() == last_is_digit {
        cut -= 1;
    }
    chars[..cut].iter().collect()
}

fn seed_child(child: &mut Worker, parent: &Worker, flow: &Workflow, target: Option<&Step>) {
    child.local_view = vec![flow.view.clone()];
    child.effective_user = parent.effective_user.clone();
    child.status = WorkerState::Ready;
    child.priority = parent.priority;
    child.activity_id = parent.activity_id.clone();
    child.app_status_names = parent.app_status_names.clone();
    if let Some(step) = target {
        child.push_step(child_step_uri(flow, step));
    }
}

fn child_step_uri(flow: &Workflow, step: &Step) -> StepUri {
    flow.uri.step(&step.name)
}

/// Build one split child. The child joins the parent's wait group; a `None`
/// target produces a stillborn child the caller must mark as errored.
pub fn create_split_child(
    parent: &Worker,
    flow: &Workflow,
    index: usize,
    total: usize,
    target: Option<&Step>,
) -> Worker {
    let mut child = Worker::new(
        parent.order_uri.clone(),
        make_child_name(&parent.id, index),
    );
    child.sibling_position = index;
    child.sibling_count = total;
    child.parent = parent.id.clone();
    seed_child(&mut child, parent, flow, target);
    child
}

/// Build one fork child. Fork children are independent: flat sequential
/// decimal ids scoped to the work order, no wait group.
pub fn create_fork_child(
    order: &WorkOrder,
    parent: &Worker,
    flow: &Workflow,
    next_id: usize,
    target: Option<&Step>,
) -> Worker {
    let mut child = Worker::new(order.uri.clone(), next_id.to_string());
    seed_child(&mut child, parent, flow, target);
    child
}
