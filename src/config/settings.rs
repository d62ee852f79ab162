use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, TrackerError};

/// Example configuration file contents
pub const EXAMPLE_CONFIG: &str = include_str!("tracker.toml.example");

/// Tracker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Install listeners at all
    pub enabled: bool,
    /// Node budget per interaction, root excluded
    pub max_nodes: usize,
    /// Delays of the two quiescence turns
    pub finish_delays_ms: [u64; 2],
    /// Timer budget restored at the start of every tracked callback
    pub max_timer_budget: i64,
    /// Budget spent per tracked timer
    pub timer_cost: i64,
    /// DOM event types that start a new interaction
    pub interaction_events: Vec<String>,
    /// Hosts whose ajax nodes are cancelled instead of finished
    pub deny_list: Vec<String>,
    pub harvest_interval_ms: u64,
    /// Abort the bus if nothing drained it by then
    pub load_timeout_ms: u64,
    pub max_harvest_queue: usize,
    /// Track the page load as the first interaction
    pub initial_page_load: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            max_nodes: 128,
            finish_delays_ms: [0, 1],
            max_timer_budget: 999,
            timer_cost: 50,
            interaction_events: ["click", "submit", "keypress", "keydown", "keyup", "change"]
                .into_iter()
                .map(String::from)
                .collect(),
            deny_list: Vec::new(),
            harvest_interval_ms: 10_000,
            load_timeout_ms: 30_000,
            max_harvest_queue: 1000,
            initial_page_load: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlTreeConfig {
    pub max_nodes: Option<usize>,
    pub finish_delays_ms: Option<[u64; 2]>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlTimerConfig {
    pub max_budget: Option<i64>,
    pub cost: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlAjaxConfig {
    pub deny_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlHarvestConfig {
    pub interval_ms: Option<u64>,
    pub max_queue: Option<usize>,
    pub load_timeout_ms: Option<u64>,
}

/// TOML file layout; every key is optional and falls back to the default
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    pub enabled: Option<bool>,
    pub initial_page_load: Option<bool>,
    pub interaction_events: Option<Vec<String>>,
    pub tree: Option<TomlTreeConfig>,
    pub timers: Option<TomlTimerConfig>,
    pub ajax: Option<TomlAjaxConfig>,
    pub harvest: Option<TomlHarvestConfig>,
}

impl Config {
    /// Defaults with the file at `path` merged on top. A missing file is not
    /// an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents)
                .map_err(|err| TrackerError::Config(format!("{}: {err}", path.display()))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let toml_config: TomlConfig =
            toml::from_str(contents).map_err(|err| TrackerError::Config(err.to_string()))?;
        let mut config = Config::default();
        config.merge(toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(enabled) = toml_config.enabled {
            self.enabled = enabled;
        }
        if let Some(initial_page_load) = toml_config.initial_page_load {
            self.initial_page_load = initial_page_load;
        }
        if let Some(events) = toml_config.interaction_events {
            self.interaction_events = events;
        }

        if let Some(tree) = toml_config.tree {
            if let Some(max_nodes) = tree.max_nodes {
                self.max_nodes = max_nodes;
            }
            if let Some(delays) = tree.finish_delays_ms {
                self.finish_delays_ms = delays;
            }
        }

        if let Some(timers) = toml_config.timers {
            if let Some(max_budget) = timers.max_budget {
                self.max_timer_budget = max_budget;
            }
            if let Some(cost) = timers.cost {
                self.timer_cost = cost;
            }
        }

        if let Some(ajax) = toml_config.ajax {
            if let Some(deny_list) = ajax.deny_list {
                self.deny_list = deny_list;
            }
        }

        if let Some(harvest) = toml_config.harvest {
            if let Some(interval) = harvest.interval_ms {
                self.harvest_interval_ms = interval;
            }
            if let Some(max_queue) = harvest.max_queue {
                self.max_harvest_queue = max_queue;
            }
            if let Some(timeout) = harvest.load_timeout_ms {
                self.load_timeout_ms = timeout;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.timer_cost < 0 {
            return Err(TrackerError::Config("timers.cost must not be negative".into()));
        }
        if self.max_harvest_queue == 0 {
            return Err(TrackerError::Config("harvest.max_queue must be at least 1".into()));
        }
        Ok(())
    }

    /// Whether requests to `host` are filtered out of interactions
    pub fn is_denied(&self, host: &str) -> bool {
        self.deny_list.iter().any(|denied| {
            host == denied
                || host
                    .strip_suffix(denied.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}
