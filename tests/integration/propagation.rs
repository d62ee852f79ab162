//! Causal context carried across timers, promises, mutations and history

use super::common::{children_of_type, recorder, Page};
use interaction_tracker::{Callable, NodeType};
use serde_json::{json, Value};

/// Interaction id of the current node, as seen from inside a callback
fn current_interaction(page: &Page) -> Option<u64> {
    page.tracker
        .current_node()
        .map(|node| node.interaction().id())
}

#[test]
fn test_timer_callback_runs_under_scheduling_node() {
    let page = Page::new();
    let seen = recorder::<Option<u64>>();
    let sink = seen.clone();
    page.on_click("button", move |p| {
        p.tracker.interaction().save();
        let inner = p.handle();
        let sink = sink.clone();
        p.host.timers().set_timeout(
            &Callable::named("later", move |_, _, _| {
                sink.lock().push(current_interaction(&inner));
                inner.host.busy(4);
                inner.send_xhr("/api/late")
            }),
            50,
        )?;
        Ok(Value::Null)
    });

    page.host.click("button", None);
    let payloads = page.settle();

    assert_eq!(*seen.lock(), vec![Some(1)]);
    assert_eq!(payloads.len(), 1);
    let root = &payloads[0].root;
    assert_eq!(children_of_type(root, NodeType::Ajax).len(), 1);
    // 50ms timer, then a 30ms request
    assert_eq!(root.end, Some(84));
    assert!(root.callback_duration >= 4);
}

#[test]
fn test_timer_over_budget_is_not_attributed() {
    let page = Page::new();
    let seen = recorder::<Option<u64>>();
    let sink = seen.clone();
    page.on_click("button", move |p| {
        p.tracker.interaction().save();
        let inner = p.handle();
        let sink = sink.clone();
        p.host.timers().set_timeout(
            &Callable::named("poll", move |_, _, _| {
                sink.lock().push(current_interaction(&inner));
                Ok(Value::Null)
            }),
            5_000,
        )?;
        Ok(Value::Null)
    });

    page.host.click("button", None);
    let payloads = page.settle();

    assert_eq!(*seen.lock(), vec![None]);
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].end.unwrap_or_default() < 5_000);
}

#[test]
fn test_cleared_timer_releases_interaction() {
    let page = Page::new();
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        let id = p.host.timers().set_timeout(
            &Callable::named("never", |_, _, _| Ok(Value::Null)),
            100,
        )?;
        p.host.timers().clear_timeout(id)?;
        Ok(Value::Null)
    });

    page.host.click("button", None);
    page.host.advance(2);
    let payloads = page.saved();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].end, Some(0));
}

#[test]
fn test_promise_reaction_restores_click_node() {
    let page = Page::new();
    let seen = recorder::<Option<u64>>();
    let sink = seen.clone();
    page.on_click("button", move |p| {
        p.tracker.interaction().save();
        let inner = p.handle();
        let sink = sink.clone();
        p.host.fetch().fetch("/api/data", None).then(
            Some(&Callable::named("apply", move |_, args, _| {
                sink.lock().push(current_interaction(&inner));
                Ok(args.first().cloned().unwrap_or(Value::Null))
            })),
            None,
        );
        Ok(Value::Null)
    });

    page.host.click("button", None);
    assert!(seen.lock().is_empty());
    let payloads = page.settle();

    assert_eq!(*seen.lock(), vec![Some(1)]);
    assert_eq!(children_of_type(&payloads[0].root, NodeType::Ajax).len(), 1);
}

#[test]
fn test_promise_created_outside_interaction_stays_untracked() {
    let page = Page::new();
    let deferred = page.host.promises().deferred();
    let seen = recorder::<Option<u64>>();
    let sink = seen.clone();
    let tracker = page.tracker.clone();
    deferred.promise().then(
        Some(&Callable::named("untracked", move |_, _, _| {
            sink.lock().push(tracker.current_node().map(|n| n.interaction().id()));
            Ok(Value::Null)
        })),
        None,
    );

    deferred.resolve(json!(1));
    page.host.run_until_idle();
    assert_eq!(*seen.lock(), vec![None]);
}

#[test]
fn test_mutation_observer_sees_mutating_interaction() {
    let page = Page::new();
    let seen = recorder::<Option<u64>>();
    let sink = seen.clone();
    let observer = page.handle();
    page.host.mutations().observe(&Callable::named(
        "onMutation",
        move |_, args, _| {
            let batch = args.first().and_then(Value::as_array).map_or(0, Vec::len);
            assert_eq!(batch, 2);
            sink.lock().push(current_interaction(&observer));
            Ok(Value::Null)
        },
    ));
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        p.host.mutations().mutate(json!({"added": "li"}));
        p.host.mutations().mutate(json!({"added": "li"}));
        Ok(Value::Null)
    });

    page.host.click("button", None);
    page.settle();
    assert_eq!(*seen.lock(), vec![Some(1)]);
}

#[test]
fn test_hashchange_rejoins_interaction_that_set_hash() {
    let page = Page::new();
    let seen = recorder::<Option<u64>>();
    let sink = seen.clone();
    let listener = page.handle();
    page.host.dom().add_event_listener(
        "window",
        "hashchange",
        &Callable::named("onHash", move |_, _, _| {
            sink.lock().push(current_interaction(&listener));
            Ok(Value::Null)
        }),
    );
    page.on_click("a#tab", |p| {
        p.host.history().set_hash("details");
        Ok(Value::Null)
    });

    page.host.click("a#tab", None);
    let payloads = page.settle();

    assert_eq!(*seen.lock(), vec![Some(1)]);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].old_url.as_deref(), Some("http://app.test/"));
    assert_eq!(payloads[0].new_url.as_deref(), Some("http://app.test/#details"));
}

#[test]
fn test_popstate_after_load_starts_interaction() {
    let page = Page::new();
    page.host.dom().add_event_listener(
        "window",
        "popstate",
        &Callable::named("onPop", |_, _, _| Ok(Value::Null)),
    );
    page.host.history().push_state("/a").unwrap();
    page.host.history().push_state("/b").unwrap();
    page.host.run_until_idle();

    assert!(page.host.history().back());
    let payloads = page.settle();

    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].trigger, "popstate");
    assert_eq!(payloads[0].old_url.as_deref(), Some("http://app.test/b"));
    assert_eq!(payloads[0].new_url.as_deref(), Some("http://app.test/a"));
}

#[test]
fn test_load_callback_starts_with_fresh_timer_budget() {
    let page = Page::new();
    page.on_click("button", |p| {
        p.tracker.interaction().save();
        let noop = Callable::named("tick", |_, _, _| Ok(Value::Null));
        // spends the click's whole budget
        for _ in 0..20 {
            p.host.timers().set_timeout(&noop, 0)?;
        }
        let xhr = p.host.xhr();
        let id = xhr.create();
        xhr.open(id, "GET", "/api/list")?;
        let inner = p.handle();
        xhr.add_load_listener(
            id,
            &Callable::named("onList", move |_, _, _| {
                let late = inner.handle();
                inner.host.timers().set_timeout(
                    &Callable::named("refresh", move |_, _, _| late.send_xhr("/api/refresh")),
                    10,
                )?;
                Ok(Value::Null)
            }),
        );
        xhr.send(id, None)
    });

    page.host.click("button", None);
    let payloads = page.settle();

    assert_eq!(payloads.len(), 1);
    let ajax = payloads[0].root.descendants(NodeType::Ajax);
    assert_eq!(ajax.len(), 2);
    // 30ms request, 10ms timer, 30ms request
    assert_eq!(payloads[0].end, Some(70));
}
