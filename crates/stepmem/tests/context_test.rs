use std::collections::HashMap;
use stepcore::{OrderStore, OrderUri};
use stepmem::MemoryStore;
use stepruntime::context::{
    eval_template, get_context_value, set_context_literal, treat_as_default_literal,
};

fn order() -> OrderUri {
    OrderUri::new("order://test/ctx/1")
}

fn no_view() -> HashMap<String, String> {
    HashMap::new()
}

#[tokio::test]
async fn literal_values_strip_their_marker() {
    let store = MemoryStore::new();
    let order = order();
    store.set_context_value(&order, "a", "#val").await.expect("set");

    let value = get_context_value(&store, &order, "a", &no_view())
        .await
        .expect("resolve");
    assert_eq!(value.as_deref(), Some("val"));
}

#[tokio::test]
async fn unmarked_values_are_assumed_literal() {
    let store = MemoryStore::new();
    let order = order();
    store.set_context_value(&order, "a", "plain").await.expect("set");

    let value = get_context_value(&store, &order, "a", &no_view())
        .await
        .expect("resolve");
    assert_eq!(value.as_deref(), Some("plain"));
}

#[tokio::test]
async fn variables_chase_through_the_store() {
    let store = MemoryStore::new();
    let order = order();
    store.set_context_value(&order, "b", "$a").await.expect("set");
    store.set_context_value(&order, "a", "#val").await.expect("set");

    let value = get_context_value(&store, &order, "b", &no_view())
        .await
        .expect("resolve");
    assert_eq!(value.as_deref(), Some("val"));
}

#[tokio::test]
async fn missing_variable_with_inline_default_falls_back() {
    let store = MemoryStore::new();
    let order = order();

    let value = get_context_value(&store, &order, "$missing$fallback", &no_view())
        .await
        .expect("resolve");
    assert_eq!(value.as_deref(), Some("fallback"));
}

#[tokio::test]
async fn missing_variable_without_default_is_none() {
    let store = MemoryStore::new();
    let order = order();

    let value = get_context_value(&store, &order, "missing", &no_view())
        .await
        .expect("resolve");
    assert_eq!(value, None);
}

#[tokio::test]
async fn templates_substitute_variables() {
    let store = MemoryStore::new();
    let order = order();
    store.set_context_value(&order, "name", "#World").await.expect("set");

    let rendered = eval_template(&store, &order, "Hello ${name}", &no_view())
        .await
        .expect("render");
    assert_eq!(rendered, "Hello World");
}

#[tokio::test]
async fn templates_escape_dollars_and_apply_defaults() {
    let store = MemoryStore::new();
    let order = order();

    let rendered = eval_template(&store, &order, "$$5 for ${missing$nothing}", &no_view())
        .await
        .expect("render");
    assert_eq!(rendered, "$5 for nothing");
}

#[tokio::test]
async fn template_with_missing_required_variable_errors() {
    let store = MemoryStore::new();
    let order = order();

    let result = eval_template(&store, &order, "need ${gone}", &no_view()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn template_typed_context_value_is_rendered() {
    let store = MemoryStore::new();
    let order = order();
    store
        .set_context_value(&order, "greeting", "%Hello ${name}")
        .await
        .expect("set");
    store.set_context_value(&order, "name", "#World").await.expect("set");

    let value = get_context_value(&store, &order, "greeting", &no_view())
        .await
        .expect("resolve");
    assert_eq!(value.as_deref(), Some("Hello World"));
}

#[tokio::test]
async fn view_aliases_translate_before_lookup() {
    let store = MemoryStore::new();
    let order = order();
    store.set_context_value(&order, "real", "#v").await.expect("set");

    let mut view = HashMap::new();
    view.insert("alias".to_string(), "$real".to_string());
    let value = get_context_value(&store, &order, "alias", &view)
        .await
        .expect("resolve");
    assert_eq!(value.as_deref(), Some("v"));
}

#[tokio::test]
async fn cyclic_variables_hit_the_recursion_bound() {
    let store = MemoryStore::new();
    let order = order();
    store.set_context_value(&order, "a", "$b").await.expect("set");
    store.set_context_value(&order, "b", "$a").await.expect("set");

    let value = get_context_value(&store, &order, "a", &no_view())
        .await
        .expect("resolve");
    assert_eq!(value, None);
}

#[tokio::test]
async fn set_context_literal_round_trips() {
    let store = MemoryStore::new();
    let order = order();
    set_context_literal(&store, &order, &no_view(), "k", "v")
        .await
        .expect("set");

    assert_eq!(
        store.context_value(&order, "k").await.expect("raw").as_deref(),
        Some("#v")
    );
    let value = get_context_value(&store, &order, "k", &no_view())
        .await
        .expect("resolve");
    assert_eq!(value.as_deref(), Some("v"));
}

#[test]
fn default_literal_treatment() {
    assert_eq!(treat_as_default_literal("code"), "#code");
    assert_eq!(treat_as_default_literal("$var"), "var");
    assert_eq!(treat_as_default_literal("#lit"), "#lit");
    assert_eq!(treat_as_default_literal("%tpl"), "%tpl");
    assert_eq!(treat_as_default_literal(""), "");
}
