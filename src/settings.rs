// Settings persistence and management.

mod data;
mod persistence;

pub use data::Settings;
pub use persistence::SettingsManager;
