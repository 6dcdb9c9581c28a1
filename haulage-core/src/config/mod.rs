//! Runtime settings for the dispatch engine.
//!
//! These are the validated values the engine runs with. Loading and parsing
//! the configuration file is handled by the server crate.

mod config_store;
mod settings;

pub use config_store::{ConfigStore, ConfigWatcher, Versioned};
pub use settings::{
    DispatchSettings, EngineSettings, LockSettings, NotificationSettings, PaymentSettings,
    ReconcilerSettings,
};
