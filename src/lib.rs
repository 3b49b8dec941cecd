//! # Adaptive layout
//!
//! Chooses, per user and display area, which UI layout and feature set to
//! present. User traits are evaluated against a prioritized rule list; the
//! first matching rule names the layout, otherwise the area's default is used.
//! Results are cached per `(user, area)` and invalidated synchronously when
//! traits, features, rules or layouts change.
//!
//! ```text
//! client ── select(user, area) ──> LayoutSelector ──> LayoutCache (hit: done)
//!                                       │ miss
//!                                       ├─> TraitStore / FeatureStore / RuleStore
//!                                       ├─> Evaluator (predicate per rule)
//!                                       └─> LayoutStore ──> LayoutPayload ──> cache
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hooks;
pub mod layout;
pub mod monitor;
pub mod predicate;
pub mod profile;
pub mod rules;
pub mod selector;
pub mod server;
pub mod store;

pub use cache::{InMemoryLayoutCache, LayoutCache};
pub use catalog::Catalog;
pub use config::SelectorConfig;
pub use error::{CacheError, ConfigError, SelectorError, StoreError};
pub use hooks::{CacheInvalidator, HookRegistry, Mutation, MutationHook};
pub use layout::{LayoutDefinition, LayoutPayload};
pub use monitor::{PerformanceMonitor, PerformanceReport, TimeRange};
pub use predicate::{evaluate, Evaluator, Predicate};
pub use profile::{FeatureFlag, TraitSnapshot, UserTrait};
pub use rules::{Rule, RuleEffect};
pub use selector::LayoutSelector;
pub use store::{InMemoryStore, StoreSet};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
