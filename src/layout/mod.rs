//! Layout definitions and the assembled payload returned to clients.
//!
//! A layout is an ordered set of component placements for one display area.
//! Each placement may override properties of the component's base
//! definition; overrides are merged shallowly (top-level keys replace).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::profile::FeatureSet;

/// One component placed in a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentPlacement {
    pub component_key: String,
    pub position: i32,
    #[serde(default)]
    pub prop_overrides: Map<String, Value>,
}

impl ComponentPlacement {
    pub fn new(component_key: impl Into<String>, position: i32) -> Self {
        Self {
            component_key: component_key.into(),
            position,
            prop_overrides: Map::new(),
        }
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.prop_overrides.insert(key.into(), value.into());
        self
    }
}

/// A named layout for one display area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutDefinition {
    pub layout_key: String,
    pub area: String,
    #[serde(default)]
    pub components: Vec<ComponentPlacement>,
}

impl LayoutDefinition {
    pub fn new(layout_key: impl Into<String>, area: impl Into<String>) -> Self {
        Self {
            layout_key: layout_key.into(),
            area: area.into(),
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, placement: ComponentPlacement) -> Self {
        self.components.push(placement);
        self
    }

    /// Distinct component keys referenced by this layout.
    pub fn component_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.components.iter().map(|c| c.component_key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Base properties of a UI component, shared by every layout that places it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub component_key: String,
    #[serde(default)]
    pub base_props: Map<String, Value>,
}

impl ComponentDefinition {
    pub fn new(component_key: impl Into<String>) -> Self {
        Self {
            component_key: component_key.into(),
            base_props: Map::new(),
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.base_props.insert(key.into(), value.into());
        self
    }
}

/// A component as delivered to the client: base props with overrides applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedComponent {
    pub component_key: String,
    pub position: i32,
    pub props: Map<String, Value>,
}

/// How the payload's layout was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectMetadata {
    /// Matched rule; `None` when the area default was used.
    pub rule_id: Option<String>,
    pub persona: Option<String>,
    pub settings: Map<String, Value>,
    pub fallback: bool,
    pub rules_evaluated: usize,
    /// Evaluation hit its time bound and fell back to the default.
    pub budget_exhausted: bool,
}

impl EffectMetadata {
    pub fn fallback(rules_evaluated: usize, budget_exhausted: bool) -> Self {
        Self {
            rule_id: None,
            persona: None,
            settings: Map::new(),
            fallback: true,
            rules_evaluated,
            budget_exhausted,
        }
    }
}

/// The fully assembled selection result for one `(user, area)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutPayload {
    pub layout_key: String,
    pub area: String,
    pub components: Vec<RenderedComponent>,
    pub features: FeatureSet,
    pub effect_metadata: EffectMetadata,
    pub computed_at: DateTime<Utc>,
}

/// Resolve a layout's placements into rendered components.
///
/// Components come out sorted by `position`, then `component_key` for
/// placements sharing a position. A placement whose component has no
/// definition starts from empty base props.
pub fn assemble_components(
    layout: &LayoutDefinition,
    definitions: &HashMap<String, ComponentDefinition>,
) -> Vec<RenderedComponent> {
    let mut rendered: Vec<RenderedComponent> = layout
        .components
        .iter()
        .map(|placement| {
            let mut props = definitions
                .get(&placement.component_key)
                .map(|d| d.base_props.clone())
                .unwrap_or_default();
            for (key, value) in &placement.prop_overrides {
                props.insert(key.clone(), value.clone());
            }
            RenderedComponent {
                component_key: placement.component_key.clone(),
                position: placement.position,
                props,
            }
        })
        .collect();

    rendered.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then_with(|| a.component_key.cmp(&b.component_key))
    });
    rendered
}
