//! Error types for layout selection.
//!
//! Three classes matter to callers:
//!
//! - configuration errors (unknown area, dangling layout reference, missing
//!   default) are fatal and must not be retried;
//! - transient store errors are retryable and are never cached;
//! - cache errors are swallowed by the selector and only logged.
//!
//! Predicate problems are not errors at all; the evaluator resolves them to a
//! non-match.

use thiserror::Error;

/// Errors from the trait, feature, rule and layout stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// A lookup exceeded its deadline.
    #[error("store operation '{operation}' timed out")]
    Timeout { operation: String },

    /// The store returned data that cannot be used.
    #[error("store returned corrupt data: {message}")]
    Corrupt { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            message: message.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. } | StoreError::Timeout { .. })
    }
}

/// Errors from cache writes. Never surfaced to selection callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache is full ({limit} entries)")]
    CapacityExceeded { limit: usize },

    #[error("cache is disabled")]
    Disabled,
}

/// Configuration problems. All are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no default layout key configured")]
    MissingDefaultLayout,

    #[error("cache TTL must be greater than zero")]
    InvalidTtl,

    #[error("max predicate depth must be between 1 and {max}, got {got}")]
    InvalidDepth { got: usize, max: usize },

    #[error("evaluation budget must be greater than zero")]
    InvalidBudget,

    #[error("no display areas configured")]
    NoAreas,

    #[error("area default configured for unknown area '{0}'")]
    UnknownAreaDefault(String),

    #[error("invalid value '{value}' for {name}")]
    InvalidOverride { name: String, value: String },

    #[error("default layout '{layout_key}' does not exist for area '{area}'")]
    DefaultLayoutUnresolved { layout_key: String, area: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by [`LayoutSelector::select`](crate::selector::LayoutSelector::select).
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("unknown display area '{area}'")]
    UnknownArea { area: String },

    /// A rule effect or area default points at a layout that does not exist.
    #[error("layout '{layout_key}' for area '{area}' does not exist (referenced by {})", .rule_id.as_deref().unwrap_or("the area default"))]
    DanglingLayout {
        layout_key: String,
        area: String,
        rule_id: Option<String>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SelectorError {
    /// Transient store failures only.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SelectorError::Store(e) if e.is_transient())
    }

    /// Authoring or deployment problems that retrying cannot fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SelectorError::UnknownArea { .. }
                | SelectorError::DanglingLayout { .. }
                | SelectorError::Config(_)
        )
    }
}
