//! Completion routing, harvest queue and error collection

use super::common::{children_of_type, quiet_config, recorder, Page, PAGE_URL};
use interaction_tracker::{CallError, Callable, Config, Host, NodeType, Tracker};
use serde_json::Value;

#[test]
fn test_initial_page_load_collects_work_until_load() {
    let page = Page::with_config(Config {
        load_timeout_ms: 0,
        ..Config::default()
    });
    let inner = page.handle();
    page.host.dom().add_event_listener(
        "window",
        "load",
        &Callable::named("onLoad", move |_, _, _| inner.send_xhr("/api/config")),
    );

    page.send_xhr("/api/boot").unwrap();
    page.host.fire_load();
    let payloads = page.settle();

    assert_eq!(payloads.len(), 1);
    let load = &payloads[0];
    assert_eq!(load.trigger, "initialPageLoad");
    assert_eq!(load.id, 1);
    assert_eq!(load.initial_page_url.as_deref(), Some(PAGE_URL));
    assert_eq!(children_of_type(&load.root, NodeType::Ajax).len(), 2);
    assert!(page.tracker.initial_page_load().is_some_and(|i| i.is_finished()));
}

#[test]
fn test_clicks_after_load_get_their_own_interactions() {
    let page = Page::with_config(Config {
        load_timeout_ms: 0,
        ..Config::default()
    });
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        Ok(Value::Null)
    });
    page.host.fire_load();
    page.host.run_until_idle();

    page.host.click("button", None);
    let payloads = page.settle();

    let triggers: Vec<&str> = payloads.iter().map(|p| p.trigger.as_str()).collect();
    assert_eq!(triggers, vec!["initialPageLoad", "click"]);
    assert_eq!(payloads[1].id, 2);
}

#[test]
fn test_bus_without_consumer_is_aborted_at_load_timeout() {
    let host = Host::new(PAGE_URL);
    let tracker = Tracker::install(
        &host,
        Config {
            load_timeout_ms: 100,
            ..quiet_config()
        },
    );
    let seen = recorder::<bool>();
    let sink = seen.clone();
    let probe = tracker.clone();
    host.dom().add_event_listener(
        "button",
        "click",
        &Callable::named("probe", move |_, _, _| {
            sink.lock().push(probe.current_node().is_some());
            Ok(Value::Null)
        }),
    );

    host.advance(99);
    assert!(!tracker.bus().is_aborted());
    host.advance(1);
    assert!(tracker.bus().is_aborted());

    host.click("button", None);
    assert_eq!(*seen.lock(), vec![false]);
}

#[test]
fn test_drained_bus_survives_load_timeout() {
    let page = Page::with_config(Config {
        load_timeout_ms: 100,
        ..quiet_config()
    });
    page.host.advance(150);
    assert!(!page.tracker.abort_if_undrained());
    assert!(!page.tracker.bus().is_aborted());
}

#[test]
fn test_disabled_tracker_leaves_host_alone() {
    let page = Page::with_config(Config {
        enabled: false,
        ..Config::default()
    });
    let seen = recorder::<bool>();
    let sink = seen.clone();
    page.on_click("button", move |p| {
        sink.lock().push(p.tracker.current_node().is_some());
        p.send_xhr("/api/a")
    });

    page.host.fire_load();
    page.host.click("button", None);
    assert!(page.settle().is_empty());
    assert_eq!(*seen.lock(), vec![false]);
    assert!(page.tracker.initial_page_load().is_none());
}

#[test]
fn test_timer_error_is_annotated_with_saved_interaction() {
    let page = Page::new();
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        p.host.timers().set_timeout(
            &Callable::named("explode", |_, _, _| Err(CallError::new("render failed"))),
            10,
        )?;
        Ok(Value::Null)
    });

    page.host.click("button", None);
    page.host.run_until_idle();

    let errors = page.harvest.errors().errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "render failed");
    assert_eq!(errors[0].browser_interaction_id, Some(1));
    assert_eq!(
        page.host.uncaught_errors(),
        vec!["setTimeout: render failed".to_string()]
    );
}

#[test]
fn test_error_in_discarded_interaction_is_not_annotated() {
    let page = Page::new();
    page.on_click("button", |_| Err(CallError::new("bad click")));

    page.host.click("button", None);
    assert_eq!(page.harvest.errors().pending(), 1);
    page.host.run_until_idle();

    let errors = page.harvest.errors().errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].browser_interaction_id, None);
    assert!(page.saved().is_empty());

    assert_eq!(page.harvest.errors().take().len(), 1);
    assert!(page.harvest.errors().errors().is_empty());
    assert_eq!(page.harvest.errors().pending(), 0);
}

#[test]
fn test_queue_keeps_newest_payloads_when_full() {
    let page = Page::with_config(Config {
        max_harvest_queue: 2,
        harvest_interval_ms: 60_000,
        ..quiet_config()
    });
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        Ok(Value::Null)
    });

    for _ in 0..3 {
        page.host.click("button", None);
        page.host.advance(5);
    }

    assert_eq!(page.harvest.queue().dropped(), 1);
    let ids: Vec<u64> = page.harvest.queue().take().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![2, 3]);
}
