/**
 * config module
 * Settings file for the port registry
 */

pub mod settings;

pub use settings::{LockSettings, Settings, REGISTRY_PATH_ENV, SETTINGS_FILE_NAME};
