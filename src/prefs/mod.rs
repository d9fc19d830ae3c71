pub mod backend;
pub mod model;
pub mod store;

pub use backend::{MemoryBackend, StorageBackend, StorageChange};
pub use model::{
    validation, AppConfig, EffectivePreferences, PartialPreferences, PreferenceField,
    PreferenceUpdate, Preferences, Scope,
};
pub use store::{PreferenceStore, PreferenceWatch};
