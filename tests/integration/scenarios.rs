//! The canned sessions behind `ixn-trace`

use interaction_tracker::{Config, NodeType, Scenario};
use clap::ValueEnum;

#[test]
fn test_every_scenario_harvests_page_load_and_click() {
    for scenario in Scenario::value_variants() {
        let run = scenario.run(Config::default()).unwrap();
        let triggers: Vec<&str> = run.payloads.iter().map(|p| p.trigger.as_str()).collect();
        assert_eq!(
            triggers,
            vec!["initialPageLoad", "click"],
            "scenario {scenario}"
        );
        assert!(run.to_json().unwrap().is_array());
    }
}

#[test]
fn test_click_ajax_scenario_tree() {
    let run = Scenario::ClickAjax.run(Config::default()).unwrap();
    let click = &run.payloads[1];

    assert_eq!(click.custom.get("actionText"), Some(&serde_json::json!("Go")));
    let ajax = click.root.descendants(NodeType::Ajax);
    assert_eq!(ajax.len(), 1);
    // request took 40ms, then 5ms of rendering and a 10ms timer
    assert_eq!(click.end, Some(click.start + 55));
}

#[test]
fn test_custom_tracer_scenario_records_span() {
    let run = Scenario::CustomTracer.run(Config::default()).unwrap();
    let spans = run.payloads[1].root.descendants(NodeType::CustomTracer);

    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name.as_deref(), Some("compute"));
    assert_eq!(spans[0].end.map(|end| end - spans[0].start), Some(27));
}

#[test]
fn test_promise_chain_scenario_names_interaction() {
    let run = Scenario::PromiseChain.run(Config::default()).unwrap();
    let click = &run.payloads[1];

    assert_eq!(click.custom_name.as_deref(), Some("refresh"));
    assert_eq!(click.custom.get("status"), Some(&serde_json::json!(200)));
}

#[test]
fn test_scenarios_honour_disabled_config() {
    let run = Scenario::ClickAjax
        .run(Config {
            enabled: false,
            ..Config::default()
        })
        .unwrap();
    assert!(run.payloads.is_empty());
}
