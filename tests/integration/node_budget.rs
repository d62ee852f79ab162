//! Per-interaction node cap

use super::common::{children_of_type, quiet_config, Page};
use interaction_tracker::{Config, NodeType, Scenario};
use serde_json::Value;

#[test]
fn test_129th_child_is_refused() {
    let page = Page::new();
    let handle = page.tracker.interaction();
    let root = handle.interaction().root();

    for n in 0..128 {
        assert!(
            root.child(NodeType::Ajax, 0, None, true).is_some(),
            "child {n} should be tracked"
        );
    }
    assert!(root.child(NodeType::Ajax, 0, None, true).is_none());
    assert_eq!(handle.interaction().node_count(), 128);
}

#[test]
fn test_requests_past_budget_run_untracked() {
    let page = Page::with_config(Config {
        max_nodes: 4,
        ..quiet_config()
    });
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        for _ in 0..6 {
            p.send_xhr("/api/item")?;
        }
        Ok(Value::Null)
    });

    page.host.click("button", None);
    let payloads = page.settle();

    assert_eq!(page.host.network().requests().len(), 6);
    assert_eq!(children_of_type(&payloads[0].root, NodeType::Ajax).len(), 4);
}

#[test]
fn test_node_budget_scenario_caps_click_tree() {
    let run = Scenario::NodeBudget.run(Config::default()).unwrap();
    let click = run
        .payloads
        .iter()
        .find(|p| p.trigger == "click")
        .expect("click payload");

    assert_eq!(click.root.children.len(), 128);
    assert_eq!(click.root.count(), 129);
    assert_eq!(run.host.network().requests().len(), 130);
}
