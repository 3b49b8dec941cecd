//! Seed catalog: rules, layouts, components and optional user data in one YAML file.
//!
//! ```yaml
//! components:
//!   - component_key: meal_log
//!     base_props: { title: Meals }
//! layouts:
//!   - layout_key: default_home
//!     area: home
//!     components:
//!       - { component_key: meal_log, position: 1 }
//! rules:
//!   - rule_id: "1"
//!     priority: 1
//!     predicate: { trait_key: diet_type, operator: eq, expected_value: vegan }
//!     effect: { layout_key: vegan_home }
//! traits:
//!   - { user_id: demo, key: diet_type, value: vegan }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layout::{ComponentDefinition, LayoutDefinition};
use crate::profile::{FeatureFlag, UserTrait};
use crate::rules::Rule;
use crate::store::InMemoryStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub components: Vec<ComponentDefinition>,
    #[serde(default)]
    pub layouts: Vec<LayoutDefinition>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub traits: Vec<UserTrait>,
    #[serde(default)]
    pub features: Vec<FeatureFlag>,
}

/// Counts of what [`Catalog::load_into`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub components: usize,
    pub layouts: usize,
    pub rules: usize,
    pub traits: usize,
    pub features: usize,
}

impl Catalog {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Rules whose `layout_key` is not defined for any area they apply to,
    /// as `(rule_id, layout_key)` pairs.
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        let defined: HashSet<(&str, &str)> = self
            .layouts
            .iter()
            .map(|l| (l.layout_key.as_str(), l.area.as_str()))
            .collect();

        self.rules
            .iter()
            .filter(|rule| {
                let key = rule.effect.layout_key.as_str();
                if rule.effect.areas.is_empty() {
                    !defined.iter().any(|(k, _)| *k == key)
                } else {
                    rule.effect
                        .areas
                        .iter()
                        .any(|area| !defined.contains(&(key, area.as_str())))
                }
            })
            .map(|rule| (rule.rule_id.clone(), rule.effect.layout_key.clone()))
            .collect()
    }

    /// Write everything into `store`. Definitions go in before user data.
    pub fn load_into(&self, store: &InMemoryStore) -> LoadSummary {
        for component in &self.components {
            store.upsert_component(component.clone());
        }
        for layout in &self.layouts {
            store.upsert_layout(layout.clone());
        }
        for rule in &self.rules {
            store.upsert_rule(rule.clone());
        }
        for user_trait in &self.traits {
            let confidence = user_trait.confidence;
            store.upsert_trait(user_trait.clone().with_confidence(confidence));
        }
        for flag in &self.features {
            store.upsert_feature(flag.clone());
        }

        let summary = LoadSummary {
            components: self.components.len(),
            layouts: self.layouts.len(),
            rules: self.rules.len(),
            traits: self.traits.len(),
            features: self.features.len(),
        };
        log::info!("catalog loaded: {:?}", summary);
        summary
    }
}
