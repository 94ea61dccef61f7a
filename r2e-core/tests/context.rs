//! Integration coverage for `Context` chain lookup, name validation, and
//! the "returns every materialized value" queries — exercised through the
//! crate's public surface rather than `context`'s own inline unit tests.

use r2e_core::Context;

#[tokio::test]
async fn resource_visible_in_descendant_but_not_ancestor() {
    let root = Context::new();
    root.add_resource("root-value".to_string(), "default").await.unwrap();

    let mid = Context::child_of(&root);
    let leaf = Context::child_of(&mid);

    let seen: String = leaf.get_resource("default", false).await.unwrap().unwrap();
    assert_eq!(seen, "root-value");

    leaf.add_resource(99i32, "leaf_only").await.unwrap();
    assert!(mid.get_resource::<i32>("leaf_only", true).await.unwrap().is_none());
    assert!(root.get_resource::<i32>("leaf_only", true).await.unwrap().is_none());
}

#[tokio::test]
async fn names_from_every_level_are_distinct() {
    let root = Context::new();
    root.add_resource(1i32, "a").await.unwrap();
    let child = Context::child_of(&root);
    child.add_resource(2i32, "b").await.unwrap();

    let mut values = child.get_resources::<i32>();
    values.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(values, vec![("a".to_string(), 1), ("b".to_string(), 2)]);

    let mut statics = child.get_static_resources::<i32>();
    statics.sort();
    assert_eq!(statics, vec![1, 2]);
}

#[tokio::test]
async fn child_shadowing_name_does_not_affect_parent_view() {
    let root = Context::new();
    root.add_resource(10i32, "n").await.unwrap();
    let child = Context::child_of(&root);
    // Same name, different (type, name) key at the child level is a
    // conflict only within the child itself — registering it anyway here
    // verifies that a child's own publication under a name the parent also
    // uses still surfaces the child's own value for get_resources.
    child.add_resource("shadow".to_string(), "n").await.unwrap();

    let root_values = root.get_resources::<i32>();
    assert_eq!(root_values, vec![("n".to_string(), 10)]);

    let child_values = child.get_resources::<i32>();
    assert_eq!(child_values, vec![("n".to_string(), 10)], "i32 lookup still finds the parent's entry");

    let child_strings = child.get_resources::<String>();
    assert_eq!(child_strings, vec![("n".to_string(), "shadow".to_string())]);
}

#[tokio::test]
async fn every_ascii_alphanumeric_and_underscore_name_is_accepted() {
    let ctx = Context::new();
    ctx.add_resource(1i32, "valid_Name_123").await.unwrap();
    ctx.add_resource(2i32, "_leading_underscore").await.unwrap();
}

#[tokio::test]
async fn names_with_punctuation_or_whitespace_are_rejected() {
    let ctx = Context::new();
    for bad in ["has space", "dash-name", "dot.name", ""] {
        let err = ctx.add_resource(1i32, bad).await;
        assert!(err.is_err(), "expected {bad:?} to be rejected");
    }
}
