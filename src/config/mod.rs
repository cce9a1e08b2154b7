//! Engine configuration: dialect defaults, cache/gap-fill behavior, and limits.

mod settings;

pub use settings::{
    expand_env_vars, CacheSettings, EngineConfig, GapFillingSettings, LimitSettings, SettingsError,
};
