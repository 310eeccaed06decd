//! Local storage: settings file, on-disk layout, and the state store.

pub mod layout;
pub mod settings;
pub mod store;

pub use layout::StorageLayout;
pub use settings::Settings;
pub use store::StateStore;
