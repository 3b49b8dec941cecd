//! Abstract read interfaces for selection inputs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::layout::{ComponentDefinition, LayoutDefinition};
use crate::profile::{FeatureFlag, UserTrait};
use crate::rules::Rule;

/// Source of user traits.
#[async_trait]
pub trait TraitStore: Send + Sync {
    /// Every trait currently recorded for `user_id`. Unknown users have none.
    async fn traits_for_user(&self, user_id: &str) -> Result<Vec<UserTrait>, StoreError>;
}

/// Source of per-user feature flags.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn features_for_user(&self, user_id: &str) -> Result<Vec<FeatureFlag>, StoreError>;
}

/// Source of layout rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Active rules, in any order.
    async fn active_rules(&self) -> Result<Vec<Rule>, StoreError>;
}

/// Source of layout and component definitions.
#[async_trait]
pub trait LayoutStore: Send + Sync {
    /// The layout named `layout_key` for `area`, if defined.
    async fn layout(&self, layout_key: &str, area: &str) -> Result<Option<LayoutDefinition>, StoreError>;

    /// Definitions for the given component keys. Unknown keys are omitted.
    async fn components(&self, keys: &[String]) -> Result<HashMap<String, ComponentDefinition>, StoreError>;
}

/// The four stores a selector reads, possibly backed by different systems.
#[derive(Clone)]
pub struct StoreSet {
    pub traits: Arc<dyn TraitStore>,
    pub features: Arc<dyn FeatureStore>,
    pub rules: Arc<dyn RuleStore>,
    pub layouts: Arc<dyn LayoutStore>,
}

impl StoreSet {
    /// Use one store for all four roles.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: TraitStore + FeatureStore + RuleStore + LayoutStore + 'static,
    {
        Self {
            traits: store.clone(),
            features: store.clone(),
            rules: store.clone(),
            layouts: store,
        }
    }
}
