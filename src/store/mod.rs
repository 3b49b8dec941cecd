//! Stores the selector reads from.
//!
//! Traits, features, rules and layouts are owned by external collaborators;
//! the selector only reads them through the traits in [`interface`].
//! [`InMemoryStore`] is a complete implementation used by the server binary
//! and by tests.

pub mod interface;
pub mod memory;

pub use interface::{FeatureStore, LayoutStore, RuleStore, StoreSet, TraitStore};
pub use memory::InMemoryStore;
