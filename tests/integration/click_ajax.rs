//! Clicks that start network requests

use super::common::{attr, children_of_type, quiet_config, recorder, Page};
use interaction_tracker::{Callable, Config, Interaction, NodeId, NodeType};
use serde_json::{json, Value};

#[test]
fn test_click_with_two_requests_finishes_after_both() {
    let page = Page::new();
    page.host
        .network()
        .route("http://app.test/api/b", 200, 60);
    let seen = recorder::<Interaction>();
    let sink = seen.clone();
    page.on_click("button", move |p| {
        let handle = p.tracker.interaction();
        handle.save();
        sink.lock().push(handle.interaction().clone());
        p.send_xhr("http://app.test/api/a")?;
        p.send_xhr("/api/b")
    });

    page.host.click("button", None);
    let interaction = seen.lock()[0].clone();
    assert_eq!(interaction.id(), 1);
    assert_eq!(interaction.root_id(), NodeId(1));
    assert_eq!(interaction.remaining(), 2);

    page.host.advance(30);
    assert_eq!(interaction.remaining(), 1);
    assert!(!interaction.is_finished());

    // both requests are done but the second quiescence turn is still pending
    page.host.advance(30);
    assert_eq!(interaction.remaining(), 0);
    assert!(!interaction.is_finished());

    page.host.advance(1);
    assert!(interaction.is_finished());
    assert_eq!(interaction.end(), Some(60));
    assert_eq!(
        interaction.end(),
        Some(interaction.last_callback().max(interaction.last_finish()))
    );

    let payloads = page.saved();
    assert_eq!(payloads.len(), 1);
    let root = &payloads[0].root;
    let ajax = children_of_type(root, NodeType::Ajax);
    assert_eq!(ajax.len(), 2);
    assert_eq!(ajax[0].id, NodeId(2));
    assert_eq!(ajax[1].id, NodeId(3));
    assert_eq!(attr(ajax[1], "url"), Some(&json!("http://app.test/api/b")));
    assert_eq!(attr(ajax[1], "method"), Some(&json!("GET")));
    assert_eq!(attr(ajax[1], "status"), Some(&json!(200)));
    assert_eq!(attr(ajax[1], "ajaxType"), Some(&json!("xhr")));
}

#[test]
fn test_request_from_load_callback_nests_under_first_request() {
    let page = Page::new();
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        let xhr = p.host.xhr();
        let id = xhr.create();
        xhr.open(id, "GET", "/api/list")?;
        let inner = p.handle();
        xhr.add_load_listener(
            id,
            &Callable::named("loadDetails", move |_, _, _| inner.send_xhr("/api/detail")),
        );
        xhr.send(id, None)
    });

    page.host.click("button", None);
    let payloads = page.settle();

    let root = &payloads[0].root;
    assert_eq!(root.children.len(), 1);
    let list = &root.children[0];
    assert_eq!(attr(list, "url"), Some(&json!("http://app.test/api/list")));
    assert_eq!(list.children.len(), 1);
    assert_eq!(
        attr(&list.children[0], "url"),
        Some(&json!("http://app.test/api/detail"))
    );
}

#[test]
fn test_deny_listed_host_is_cancelled_not_reported() {
    let page = Page::with_config(Config {
        deny_list: vec!["metrics.test".into()],
        ..quiet_config()
    });
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        p.send_xhr("http://beacon.metrics.test/collect")?;
        p.send_xhr("/api/a")
    });

    page.host.click("button", None);
    let payloads = page.settle();

    assert_eq!(payloads.len(), 1);
    let ajax = children_of_type(&payloads[0].root, NodeType::Ajax);
    assert_eq!(ajax.len(), 1);
    assert_eq!(attr(ajax[0], "url"), Some(&json!("http://app.test/api/a")));
}

#[test]
fn test_fetch_carries_trace_header_of_its_node() {
    let page = Page::with_config(Config {
        deny_list: vec!["metrics.test".into()],
        ..quiet_config()
    });
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        p.host.fetch().fetch("/api/items", Some(json!({"method": "post"})));
        p.host.fetch().fetch("http://metrics.test/collect", None);
        Ok(Value::Null)
    });

    page.host.click("button", None);
    let payloads = page.settle();

    let requests = page.host.network().requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].headers.get("x-interaction-node"), Some(&json!("1:2")));
    assert!(requests[1].headers.get("x-interaction-node").is_none());

    let ajax = children_of_type(&payloads[0].root, NodeType::Ajax);
    assert_eq!(ajax.len(), 1);
    assert_eq!(attr(ajax[0], "ajaxType"), Some(&json!("fetch")));
    assert_eq!(attr(ajax[0], "method"), Some(&json!("POST")));
}

#[test]
fn test_failed_jsonp_is_dropped_but_releases_interaction() {
    let page = Page::new();
    page.host
        .network()
        .route("http://app.test/api/missing", 404, 5);
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        let noop = Callable::named("render", |_, _, _| Ok(Value::Null));
        p.host.jsonp().request("http://app.test/api/missing", &noop);
        p.host.jsonp().request("http://app.test/api/feed", &noop);
        Ok(Value::Null)
    });

    page.host.click("button", None);
    let payloads = page.settle();

    assert_eq!(payloads.len(), 1);
    let ajax = children_of_type(&payloads[0].root, NodeType::Ajax);
    assert_eq!(ajax.len(), 1);
    assert_eq!(attr(ajax[0], "ajaxType"), Some(&json!("jsonp")));
}

#[test]
fn test_click_records_action_text() {
    let page = Page::new();
    page.on_click("button#buy", |p| {
        p.tracker.interaction().save();
        Ok(Value::Null)
    });

    page.host.click("button#buy", Some("Buy now"));
    let payloads = page.settle();

    assert_eq!(payloads[0].trigger, "click");
    assert_eq!(payloads[0].custom.get("actionText"), Some(&json!("Buy now")));
}

#[test]
fn test_events_outside_allow_list_start_nothing() {
    let page = Page::new();
    let seen = recorder::<bool>();
    let sink = seen.clone();
    page.host.dom().add_event_listener(
        "button",
        "mouseover",
        &Callable::named("hover", {
            let tracker = page.tracker.clone();
            move |_, _, _| {
                sink.lock().push(tracker.current_node().is_some());
                Ok(Value::Null)
            }
        }),
    );

    page.host.dom().dispatch_event("button", "mouseover", None);
    assert_eq!(*seen.lock(), vec![false]);
    assert!(page.settle().is_empty());
}

#[test]
fn test_unsaved_click_is_discarded() {
    let page = Page::new();
    page.on_click("button", |p| p.send_xhr("/api/a"));

    page.host.click("button", None);
    assert!(page.settle().is_empty());
    assert_eq!(page.host.network().requests().len(), 1);
}
