pub mod safety;
pub mod settings;

pub use safety::{requires_approval, SafetyLevel};
pub use settings::{SafetySettings, SettingsError, SettingsStore};
