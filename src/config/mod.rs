mod settings;

pub use settings::{
    Config, TomlAjaxConfig, TomlConfig, TomlHarvestConfig, TomlTimerConfig, TomlTreeConfig,
    EXAMPLE_CONFIG,
};
