//! Explicit tracer surface used by application code and plugins

use super::common::{attr, children_of_type, recorder, Page};
use interaction_tracker::tracer::INTERACTION_DISCARDED;
use interaction_tracker::{Callable, NodeRef, NodeType};
use serde_json::{json, Value};

#[test]
fn test_create_tracer_spans_deferred_work() {
    let page = Page::new();
    let seen = recorder::<Option<NodeType>>();
    let sink = seen.clone();
    page.on_click("button", move |p| {
        p.tracker.interaction().save();
        let inner = p.handle();
        let sink = sink.clone();
        let work = p.tracker.create_tracer(
            "compute",
            Some(Callable::named("compute", move |_, _, _| {
                let node_type = inner
                    .tracker
                    .current_node()
                    .and_then(|node| node.snapshot())
                    .map(|node| node.node_type);
                sink.lock().push(node_type);
                inner.host.busy(6);
                Ok(json!("done"))
            })),
        );
        p.host.timers().set_timeout(&work, 20)?;
        Ok(Value::Null)
    });

    page.host.click("button", None);
    let payloads = page.settle();

    assert_eq!(*seen.lock(), vec![Some(NodeType::CustomTracer)]);
    let spans = children_of_type(&payloads[0].root, NodeType::CustomTracer);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name.as_deref(), Some("compute"));
    assert_eq!(spans[0].end, Some(26));
    assert_eq!(payloads[0].end, Some(26));
}

#[test]
fn test_create_tracer_without_current_node_returns_callback() {
    let page = Page::new();
    let callback = Callable::named("plain", |_, _, _| Ok(Value::Null));
    let traced = page.tracker.create_tracer("idle", Some(callback.clone()));
    assert!(!traced.is_wrapped());
    assert!(traced.ptr_eq(&callback));
}

#[test]
fn test_span_measures_synchronous_work() {
    let page = Page::new();
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        p.host.busy(2);
        if let Some(span) = p.tracker.start_span("render") {
            p.host.busy(5);
            span.end();
        }
        Ok(Value::Null)
    });

    page.host.click("button", None);
    let payloads = page.settle();

    let spans = children_of_type(&payloads[0].root, NodeType::CustomTracer);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].start, 2);
    assert_eq!(spans[0].end, Some(7));
}

#[test]
fn test_ignored_interaction_is_discarded_despite_url_change() {
    let page = Page::new();
    let discarded = recorder::<u64>();
    let sink = discarded.clone();
    page.tracker.bus().on_fn(INTERACTION_DISCARDED, move |args, _| {
        sink.lock().push(args[0].as_u64().unwrap_or_default());
        Ok(())
    });
    page.on_click("a#next", |p| {
        p.tracker.interaction().ignore();
        p.host.history().push_state("/next")?;
        Ok(Value::Null)
    });

    page.host.click("a#next", None);
    assert!(page.settle().is_empty());
    assert_eq!(*discarded.lock(), vec![1]);
}

#[test]
fn test_name_and_attributes_reach_payload() {
    let page = Page::new();
    page.tracker.set_custom_attribute("plan", json!("pro"));
    page.tracker.set_custom_attribute("step", json!(9));
    page.on_click("button", |p| {
        p.tracker
            .interaction()
            .set_name("checkout")
            .set_attribute("step", json!(2))
            .action_text("Pay")
            .save();
        Ok(Value::Null)
    });

    page.host.click("button", Some("ignored label"));
    let payloads = page.settle();

    let payload = &payloads[0];
    assert_eq!(payload.custom_name.as_deref(), Some("checkout"));
    assert_eq!(payload.custom.get("step"), Some(&json!(2)));
    assert_eq!(payload.custom.get("plan"), Some(&json!("pro")));
    assert_eq!(payload.custom.get("actionText"), Some(&json!("Pay")));
}

#[test]
fn test_end_finishes_without_waiting() {
    let page = Page::new();
    let ended = recorder::<u64>();
    let sink = ended.clone();
    page.on_click("button", move |p| {
        let handle = p.tracker.interaction();
        let sink = sink.clone();
        handle.save().on_end(move |interaction| sink.lock().push(interaction.id()));
        p.host.timers().set_timeout(
            &Callable::named("slow", |_, _, _| Ok(Value::Null)),
            200,
        )?;
        p.host.busy(3);
        handle.end();
        Ok(Value::Null)
    });

    page.host.click("button", None);
    assert_eq!(*ended.lock(), vec![1]);

    let payloads = page.saved();
    assert_eq!(payloads.len(), 1);
    let markers = children_of_type(&payloads[0].root, NodeType::CustomEnd);
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].end, Some(3));
}

#[test]
fn test_get_context_delivers_store_on_later_task() {
    let page = Page::new();
    let seen = recorder::<Value>();
    let sink = seen.clone();
    page.on_click("button", move |p| {
        let sink = sink.clone();
        let handle = p.tracker.interaction();
        handle.get_context(|store| {
            store.insert("cart".into(), json!(3));
        });
        handle.get_context(move |store| {
            sink.lock().push(store.get("cart").cloned().unwrap_or(Value::Null));
        });
        Ok(Value::Null)
    });

    page.host.click("button", None);
    assert!(seen.lock().is_empty());
    page.host.run_until_idle();
    assert_eq!(*seen.lock(), vec![json!(3)]);
}

#[test]
fn test_interaction_outside_callbacks_starts_api_interaction() {
    let page = Page::new();
    let handle = page.tracker.interaction();
    handle.save();
    assert_eq!(
        page.tracker.current_node().map(|node| node.interaction().id()),
        Some(handle.id())
    );

    let payloads = page.settle();
    assert!(page.tracker.current_node().is_none());
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].trigger, "api");
}

#[test]
fn test_plugin_can_restore_saved_node() {
    let page = Page::new();
    let saved = recorder::<NodeRef>();
    let sink = saved.clone();
    page.on_click("button", move |p| {
        p.tracker.interaction().save();
        if let Some(node) = p.tracker.current_node() {
            sink.lock().push(node);
        }
        p.host.timers().set_timeout(
            &Callable::named("hold", |_, _, _| Ok(Value::Null)),
            50,
        )?;
        Ok(Value::Null)
    });
    page.host.click("button", None);
    let node = saved.lock()[0].clone();

    // between the click and its timer, a plugin resumes the click's node
    page.tracker.set_current_node(Some(node.clone()));
    page.send_xhr("/api/plugin").unwrap();
    page.tracker.set_current_node(None);

    let payloads = page.settle();
    let ajax = children_of_type(&payloads[0].root, NodeType::Ajax);
    assert_eq!(ajax.len(), 1);
    assert_eq!(attr(ajax[0], "url"), Some(&json!("http://app.test/api/plugin")));

    // a finished interaction's node is never made current again
    page.tracker.set_current_node(Some(node));
    assert!(page.tracker.current_node().is_none());
}
