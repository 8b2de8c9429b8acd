use stepcore::{Step, Transition};

/// Find the transition matching a step's return code.
///
/// Declaration order wins: an exact name match returns immediately; the first
/// transition with an empty name is remembered as the default and used only
/// when nothing matches exactly. A step with no transitions, or a code with
/// neither an exact nor a default match, falls through to the implicit
/// `$RETURN` transition — an unrecognized return code never fails a step by
/// itself, it returns to the step's caller.
pub fn resolve_transition(step: &Step, code: &str) -> Transition {
    if step.transitions.is_empty() {
        return Transition::implicit_return();
    }
    let mut default = None;
    for transition in &step.transitions {
        if transition.name == code {
            return transition.clone();
        }
        if default.is_none() && transition.is_default() {
            default = Some(transition.clone());
        }
    }
    default.unwrap_or_else(Transition::implicit_return)
}
