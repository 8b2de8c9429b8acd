//! Execution-context value resolution.
//!
//! Context values carry a one-character type marker: `#` literal, `$`
//! variable, `%` template. Variable lookups recurse through the store until a
//! literal surfaces; templates substitute `${var}` expressions. Aliases are
//! first translated through the step/workflow view overlay; a naked value is
//! treated as a literal.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use stepcore::{EngineError, OrderStore, OrderUri};

pub const LITERAL_MARKER: char = '#';
pub const VAR_MARKER: char = '$';
pub const TEMPLATE_MARKER: char = '%';

/// Cycles between variables are a configuration mistake, not a crash
const RECURSION_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Var,
    Literal,
    Template,
    Naked,
}

fn kind_of(value: &str) -> ValueKind {
    match value.chars().next() {
        Some(VAR_MARKER) => ValueKind::Var,
        Some(LITERAL_MARKER) => ValueKind::Literal,
        Some(TEMPLATE_MARKER) => ValueKind::Template,
        _ => ValueKind::Naked,
    }
}

/// Resolve an alias to its concrete value, or `None` when the variable does
/// not exist and no default was supplied.
pub async fn get_context_value(
    store: &dyn OrderStore,
    order: &OrderUri,
    alias: &str,
    view: &HashMap<String, String>,
) -> Result<Option<String>, EngineError> {
    let real = match lookup_in_view(view, alias) {
        Some(real) => real,
        None => add_default_marker(alias),
    };
    if real.len() <= 1 {
        return Err(EngineError::Execution(format!(
            "Cannot get real name for alias {}",
            alias
        )));
    }

    let mut to_eval = real;
    let mut kind = kind_of(&to_eval);
    let mut budget = RECURSION_LIMIT;
    while budget > 0 {
        budget -= 1;
        match kind {
            ValueKind::Var => {
                // `$name$default` carries an inline fallback
                let body = &to_eval[1..];
                let (name, default) = match body.find(VAR_MARKER) {
                    Some(idx) if idx > 1 => {
                        (body[..idx].to_string(), Some(body[idx + 1..].to_string()))
                    }
                    _ => (body.to_string(), None),
                };
                match store.context_value(order, &name).await? {
                    Some(value) => {
                        to_eval = value;
                        kind = kind_of(&to_eval);
                    }
                    None => return Ok(default),
                }
            }
            ValueKind::Literal => return Ok(Some(to_eval[1..].to_string())),
            ValueKind::Naked => {
                tracing::debug!("Value for {} has no marker - assuming literal", alias);
                return Ok(Some(to_eval));
            }
            ValueKind::Template => {
                to_eval = eval_template(store, order, &to_eval[1..].to_string(), view).await?;
                kind = kind_of(&to_eval);
                if kind == ValueKind::Naked {
                    return Ok(Some(to_eval));
                }
            }
        }
    }
    tracing::error!(
        "Recursion limit reached resolving '{}' - cyclic reference?",
        alias
    );
    Ok(None)
}

/// Substitute `${var}` expressions in a template. `$$` escapes a dollar sign;
/// `${var$default}` falls back when the variable is missing.
pub fn eval_template<'a>(
    store: &'a dyn OrderStore,
    order: &'a OrderUri,
    template: &'a str,
    view: &'a HashMap<String, String>,
) -> BoxFuture<'a, Result<String, EngineError>> {
    async move {
        let mut out = String::new();
        let mut rest = template;
        loop {
            let Some(nut) = rest.find(VAR_MARKER) else {
                out.push_str(rest);
                return Ok(out);
            };
            out.push_str(&rest[..nut]);
            let after = &rest[nut + 1..];
            match after.chars().next() {
                Some(VAR_MARKER) => {
                    out.push(VAR_MARKER);
                    rest = &after[1..];
                }
                Some('{') => {
                    let Some(end) = after.find('}') else {
                        return Err(EngineError::Execution(format!(
                            "'${{' has no matching '}}' in {}",
                            template
                        )));
                    };
                    let mut var_name = &after[1..end];
                    let mut default = None;
                    if let Some(idx) = var_name.find(VAR_MARKER) {
                        if idx > 1 {
                            default = Some(&var_name[idx + 1..]);
                            var_name = &var_name[..idx];
                        }
                    }
                    let value = get_context_value(store, order, var_name, view).await?;
                    match value.as_deref().or(default) {
                        Some(v) => out.push_str(v),
                        None => {
                            return Err(EngineError::Execution(format!(
                                "Variable ${{{}}} required but missing",
                                var_name
                            )))
                        }
                    }
                    rest = &after[end + 1..];
                }
                _ => {
                    return Err(EngineError::Execution(format!(
                        "Unescaped $ with no {{ varName }} in {}",
                        template
                    )))
                }
            }
        }
    }
    .boxed()
}

/// Store a literal under the alias (translated through the view first)
pub async fn set_context_literal(
    store: &dyn OrderStore,
    order: &OrderUri,
    view: &HashMap<String, String>,
    alias: &str,
    value: &str,
) -> Result<(), EngineError> {
    let real = match lookup_in_view(view, alias) {
        Some(real) => real,
        None => add_default_marker(alias),
    };
    if real.len() > 1 && real.starts_with(VAR_MARKER) {
        store
            .set_context_value(order, &real[1..], &format!("{}{}", LITERAL_MARKER, value))
            .await?;
        Ok(())
    } else {
        Err(EngineError::Execution(format!(
            "Can only set context values on variables: alias='{}', real='{}'",
            alias, real
        )))
    }
}

/// Prepare a transition-code operand for context lookup: a naked value
/// becomes a literal, a `$`-prefixed value becomes a variable-name alias.
pub fn treat_as_default_literal(value: &str) -> String {
    match kind_of(value) {
        ValueKind::Naked if !value.is_empty() => format!("{}{}", LITERAL_MARKER, value),
        ValueKind::Var => value[1..].to_string(),
        _ => value.to_string(),
    }
}

// If the alias names a view entry, the view supplies the real id
fn lookup_in_view(view: &HashMap<String, String>, alias: &str) -> Option<String> {
    if alias.is_empty() {
        return None;
    }
    let real = view.get(alias)?;
    if real.len() < 2 {
        tracing::warn!("Bad view definition: {} -> {}", alias, real);
        return Some(format!("{}{}", VAR_MARKER, alias));
    }
    Some(real.clone())
}

// A naked alias defaults to a variable lookup
fn add_default_marker(alias: &str) -> String {
    if alias.is_empty() {
        return alias.to_string();
    }
    match kind_of(alias) {
        ValueKind::Literal | ValueKind::Template | ValueKind::Var => alias.to_string(),
        ValueKind::Naked => format!("{}{}", VAR_MARKER, alias),
    }
}
