//! End-to-end tracking through a simulated host
//!
//! Each module drives real host primitives (clicks, timers, requests,
//! promises, history) and asserts on the harvested interaction payloads.

#[path = "../common/mod.rs"]
pub mod common;

pub mod click_ajax;
pub mod harvest_flow;
pub mod node_budget;
pub mod propagation;
pub mod scenarios;
pub mod tracer_api;
