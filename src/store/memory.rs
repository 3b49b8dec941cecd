//! In-memory store with synchronous mutation hooks.
//!
//! Every mutating method applies the write, releases its shard lock, then
//! notifies the registered hooks before returning. Callers can therefore rely
//! on the cache having been invalidated once a mutation call completes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::interface::{FeatureStore, LayoutStore, RuleStore, TraitStore};
use crate::error::StoreError;
use crate::hooks::{HookRegistry, Mutation, MutationHook};
use crate::layout::{ComponentDefinition, LayoutDefinition};
use crate::profile::{FeatureFlag, UserTrait};
use crate::rules::Rule;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// user_id -> trait key -> trait
    traits: DashMap<String, BTreeMap<String, UserTrait>>,
    /// user_id -> feature key -> flag
    features: DashMap<String, BTreeMap<String, FeatureFlag>>,
    rules: DashMap<String, Rule>,
    /// (layout_key, area) -> layout
    layouts: DashMap<(String, String), LayoutDefinition>,
    components: DashMap<String, ComponentDefinition>,
    hooks: HookRegistry,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_hook(&self, hook: Arc<dyn MutationHook>) {
        self.hooks.register(hook);
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    // -- traits ---------------------------------------------------------

    /// Insert or replace the trait `(user_id, key)`. Returns the previous value.
    pub fn upsert_trait(&self, user_trait: UserTrait) -> Option<UserTrait> {
        let user_id = user_trait.user_id.clone();
        let previous = self
            .traits
            .entry(user_id.clone())
            .or_default()
            .insert(user_trait.key.clone(), user_trait);
        self.hooks.notify(&Mutation::TraitChanged { user_id });
        previous
    }

    pub fn remove_trait(&self, user_id: &str, key: &str) -> Option<UserTrait> {
        let removed = self
            .traits
            .get_mut(user_id)
            .and_then(|mut traits| traits.remove(key));
        if removed.is_some() {
            self.hooks.notify(&Mutation::TraitChanged {
                user_id: user_id.to_string(),
            });
        }
        removed
    }

    // -- features -------------------------------------------------------

    pub fn upsert_feature(&self, flag: FeatureFlag) -> Option<FeatureFlag> {
        let user_id = flag.user_id.clone();
        let previous = self
            .features
            .entry(user_id.clone())
            .or_default()
            .insert(flag.key.clone(), flag);
        self.hooks.notify(&Mutation::FeatureChanged { user_id });
        previous
    }

    pub fn remove_feature(&self, user_id: &str, key: &str) -> Option<FeatureFlag> {
        let removed = self
            .features
            .get_mut(user_id)
            .and_then(|mut flags| flags.remove(key));
        if removed.is_some() {
            self.hooks.notify(&Mutation::FeatureChanged {
                user_id: user_id.to_string(),
            });
        }
        removed
    }

    // -- rules ----------------------------------------------------------

    pub fn upsert_rule(&self, rule: Rule) -> Option<Rule> {
        let previous = self.rules.insert(rule.rule_id.clone(), rule);
        self.hooks.notify(&Mutation::RuleSetChanged);
        previous
    }

    /// Mark a rule inactive. Returns `false` if it does not exist.
    pub fn deactivate_rule(&self, rule_id: &str) -> bool {
        let changed = match self.rules.get_mut(rule_id) {
            Some(mut rule) => {
                rule.active = false;
                true
            }
            None => false,
        };
        if changed {
            self.hooks.notify(&Mutation::RuleSetChanged);
        }
        changed
    }

    pub fn remove_rule(&self, rule_id: &str) -> Option<Rule> {
        let removed = self.rules.remove(rule_id).map(|(_, rule)| rule);
        if removed.is_some() {
            self.hooks.notify(&Mutation::RuleSetChanged);
        }
        removed
    }

    // -- layouts --------------------------------------------------------

    pub fn upsert_layout(&self, layout: LayoutDefinition) -> Option<LayoutDefinition> {
        let layout_key = layout.layout_key.clone();
        let previous = self
            .layouts
            .insert((layout.layout_key.clone(), layout.area.clone()), layout);
        self.hooks.notify(&Mutation::LayoutChanged {
            layout_key: Some(layout_key),
        });
        previous
    }

    pub fn upsert_component(&self, component: ComponentDefinition) -> Option<ComponentDefinition> {
        let previous = self.components.insert(component.component_key.clone(), component);
        self.hooks.notify(&Mutation::LayoutChanged { layout_key: None });
        previous
    }
}

#[async_trait]
impl TraitStore for InMemoryStore {
    async fn traits_for_user(&self, user_id: &str) -> Result<Vec<UserTrait>, StoreError> {
        Ok(self
            .traits
            .get(user_id)
            .map(|traits| traits.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl FeatureStore for InMemoryStore {
    async fn features_for_user(&self, user_id: &str) -> Result<Vec<FeatureFlag>, StoreError> {
        Ok(self
            .features
            .get(user_id)
            .map(|flags| flags.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn active_rules(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.active)
            .map(|r| r.value().clone())
            .collect())
    }
}

#[async_trait]
impl LayoutStore for InMemoryStore {
    async fn layout(&self, layout_key: &str, area: &str) -> Result<Option<LayoutDefinition>, StoreError> {
        Ok(self
            .layouts
            .get(&(layout_key.to_string(), area.to_string()))
            .map(|l| l.value().clone()))
    }

    async fn components(&self, keys: &[String]) -> Result<HashMap<String, ComponentDefinition>, StoreError> {
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.components
                    .get(key)
                    .map(|c| (key.clone(), c.value().clone()))
            })
            .collect())
    }
}
