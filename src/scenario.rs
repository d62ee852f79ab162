//! Canned page sessions driven through a fresh host
//!
//! Each scenario installs a tracker and a harvest on a new [`Host`], loads
//! the page, replays one user action and returns every harvested payload.

use std::fmt;

use clap::ValueEnum;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::Result;
use crate::harvest::Harvest;
use crate::host::Host;
use crate::tracer::Tracker;
use crate::tree::InteractionPayload;
use crate::wrap::Callable;

pub const BASE_URL: &str = "http://app.test/";

/// Number of requests the node-budget scenario fires from one click
const BUDGET_REQUESTS: usize = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// A click whose handler sends an XHR and saves the interaction on load
    ClickAjax,
    /// A click that pushes a new URL and names the route
    RouteChange,
    /// A click that fetches and continues in a promise reaction
    PromiseChain,
    /// A click that defers work through a custom tracer
    CustomTracer,
    /// A click that starts more requests than an interaction may hold
    NodeBudget,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ClickAjax => "click-ajax",
            Self::RouteChange => "route-change",
            Self::PromiseChain => "promise-chain",
            Self::CustomTracer => "custom-tracer",
            Self::NodeBudget => "node-budget",
        };
        f.write_str(name)
    }
}

/// Outcome of one scenario run
pub struct Run {
    pub host: Host,
    pub tracker: Tracker,
    pub harvest: Harvest,
    pub payloads: Vec<InteractionPayload>,
}

impl Run {
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.payloads)?)
    }
}

impl Scenario {
    pub fn run(self, config: Config) -> Result<Run> {
        let host = Host::new(BASE_URL);
        let network = host.network();
        network.route("http://app.test/api/", 200, 40);
        network.route("http://app.test/api/slow", 200, 250);
        network.route("http://app.test/api/missing", 404, 15);

        let tracker = Tracker::install(&host, config);
        let harvest = Harvest::attach(&tracker);
        tracing::debug!(scenario = %self, "Running scenario");

        host.fire_load();
        host.run_until_idle();

        self.install_handlers(&tracker);
        host.click("button#go", Some("Go"));
        host.run_until_idle();

        harvest.queue().flush();
        let payloads = harvest.queue().take();
        Ok(Run {
            host,
            tracker,
            harvest,
            payloads,
        })
    }

    fn install_handlers(self, tracker: &Tracker) {
        let host = tracker.host().clone();
        let api = tracker.clone();
        let handler = match self {
            Self::ClickAjax => Callable::named("loadItems", move |_, _, _| {
                let xhr = host.xhr();
                let id = xhr.create();
                xhr.open(id, "GET", "http://app.test/api/items")?;
                let inner = api.clone();
                let timers = host.clone();
                xhr.add_load_listener(
                    id,
                    &Callable::named("renderItems", move |_, _, _| {
                        inner.interaction().save();
                        timers.busy(5);
                        timers
                            .timers()
                            .set_timeout(&Callable::named("highlight", |_, _, _| Ok(Value::Null)), 10)?;
                        Ok(Value::Null)
                    }),
                );
                xhr.send(id, None)
            }),
            Self::RouteChange => Callable::named("navigate", move |_, _, _| {
                host.history().push_state("/products")?;
                api.set_current_route_name(Some("products"));
                Ok(Value::Null)
            }),
            Self::PromiseChain => Callable::named("refresh", move |_, _, _| {
                api.interaction().set_name("refresh");
                let inner = api.clone();
                let clock = host.clone();
                host.fetch()
                    .fetch("/api/data", Some(json!({ "method": "GET" })))
                    .then(
                        Some(&Callable::named("applyData", move |_, args, _| {
                            clock.busy(3);
                            let status = args.first().and_then(|r| r.get("status")).cloned();
                            inner
                                .interaction()
                                .set_attribute("status", status.unwrap_or(Value::Null))
                                .save();
                            Ok(Value::Null)
                        })),
                        None,
                    );
                Ok(Value::Null)
            }),
            Self::CustomTracer => Callable::named("schedule", move |_, _, _| {
                let clock = host.clone();
                let inner = api.clone();
                let work = api.create_tracer(
                    "compute",
                    Some(Callable::named("compute", move |_, _, _| {
                        clock.busy(7);
                        inner.interaction().save();
                        Ok(Value::Null)
                    })),
                );
                host.timers().set_timeout(&work, 20)?;
                Ok(Value::Null)
            }),
            Self::NodeBudget => Callable::named("burst", move |_, _, _| {
                api.interaction().save();
                let xhr = host.xhr();
                for n in 0..BUDGET_REQUESTS {
                    let id = xhr.create();
                    xhr.open(id, "GET", &format!("http://app.test/api/page/{n}"))?;
                    xhr.send(id, None)?;
                }
                Ok(Value::Null)
            }),
        };
        tracker
            .host()
            .dom()
            .add_event_listener("button#go", "click", &handler);
    }
}
