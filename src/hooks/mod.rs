//! Mutation hooks.
//!
//! Writers of traits, features, rules and layouts call into a [`HookRegistry`]
//! as part of the mutation itself, so by the time the write returns every
//! registered [`MutationHook`] has run. The main consumer is
//! [`CacheInvalidator`], which turns each event into the matching cache
//! invalidation.
//!
//! - All hook methods have default no-op implementations; implementors pick
//!   what they need.
//! - Hooks are shared-immutable (`&self`) and must not block.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::LayoutCache;

/// A change to selection inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    TraitChanged { user_id: String },
    FeatureChanged { user_id: String },
    RuleSetChanged,
    /// A layout or component definition changed.
    LayoutChanged { layout_key: Option<String> },
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::TraitChanged { user_id } => write!(f, "trait changed for {}", user_id),
            Mutation::FeatureChanged { user_id } => write!(f, "feature changed for {}", user_id),
            Mutation::RuleSetChanged => write!(f, "rule set changed"),
            Mutation::LayoutChanged { layout_key: Some(key) } => write!(f, "layout {} changed", key),
            Mutation::LayoutChanged { layout_key: None } => write!(f, "component definitions changed"),
        }
    }
}

/// Observer of selection-input mutations.
///
/// Called synchronously on the writer's thread; implementations must be quick
/// and must not call back into the store that fired them.
pub trait MutationHook: Send + Sync + 'static {
    fn on_trait_changed(&self, _user_id: &str) {}

    fn on_feature_changed(&self, _user_id: &str) {}

    fn on_rule_set_changed(&self) {}

    fn on_layout_changed(&self, _layout_key: Option<&str>) {}
}

/// Ordered list of hooks, notified in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn MutationHook>>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.len())
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn MutationHook>) {
        self.hooks.write().push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `mutation` to every registered hook before returning.
    pub fn notify(&self, mutation: &Mutation) {
        // Clone the list so a hook may register another without deadlocking.
        let hooks: Vec<Arc<dyn MutationHook>> = self.hooks.read().clone();
        log::debug!("notifying {} hooks: {}", hooks.len(), mutation);
        for hook in &hooks {
            match mutation {
                Mutation::TraitChanged { user_id } => hook.on_trait_changed(user_id),
                Mutation::FeatureChanged { user_id } => hook.on_feature_changed(user_id),
                Mutation::RuleSetChanged => hook.on_rule_set_changed(),
                Mutation::LayoutChanged { layout_key } => hook.on_layout_changed(layout_key.as_deref()),
            }
        }
    }
}

/// Invalidates a [`LayoutCache`] on every mutation.
///
/// Trait and feature changes drop one user's entries. Rule and layout changes
/// flush the whole cache, since one edit can change every user's answer.
pub struct CacheInvalidator {
    cache: Arc<dyn LayoutCache>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn LayoutCache>) -> Self {
        Self { cache }
    }
}

impl MutationHook for CacheInvalidator {
    fn on_trait_changed(&self, user_id: &str) {
        let removed = self.cache.invalidate_user(user_id);
        log::debug!("trait change for {}: {} cache entries dropped", user_id, removed);
    }

    fn on_feature_changed(&self, user_id: &str) {
        let removed = self.cache.invalidate_user(user_id);
        log::debug!("feature change for {}: {} cache entries dropped", user_id, removed);
    }

    fn on_rule_set_changed(&self) {
        self.cache.invalidate_global();
    }

    fn on_layout_changed(&self, _layout_key: Option<&str>) {
        self.cache.invalidate_global();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryLayoutCache;
    use crate::layout::{EffectMetadata, LayoutPayload};
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl MutationHook for Recorder {
        fn on_trait_changed(&self, user_id: &str) {
            self.seen.lock().push(format!("trait:{}", user_id));
        }

        fn on_rule_set_changed(&self) {
            self.seen.lock().push("rules".to_string());
        }
    }

    fn payload() -> Arc<LayoutPayload> {
        Arc::new(LayoutPayload {
            layout_key: "default_home".into(),
            area: "home".into(),
            components: vec![],
            features: BTreeMap::new(),
            effect_metadata: EffectMetadata::fallback(0, false),
            computed_at: Utc::now(),
        })
    }

    #[test]
    fn test_registry_dispatches_in_order() {
        let registry = HookRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.register(recorder.clone());

        registry.notify(&Mutation::TraitChanged { user_id: "u1".into() });
        registry.notify(&Mutation::FeatureChanged { user_id: "u1".into() });
        registry.notify(&Mutation::RuleSetChanged);

        // on_feature_changed uses the default no-op.
        assert_eq!(*recorder.seen.lock(), vec!["trait:u1".to_string(), "rules".to_string()]);
    }

    #[test]
    fn test_cache_invalidator_scopes() {
        let cache = Arc::new(InMemoryLayoutCache::default());
        cache.put("u", "home", payload()).unwrap();
        cache.put("v", "home", payload()).unwrap();

        let registry = HookRegistry::new();
        registry.register(Arc::new(CacheInvalidator::new(cache.clone())));

        registry.notify(&Mutation::FeatureChanged { user_id: "u".into() });
        assert!(cache.get("u", "home").is_none());
        assert!(cache.get("v", "home").is_some());

        registry.notify(&Mutation::LayoutChanged {
            layout_key: Some("default_home".into()),
        });
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mutation_display() {
        let m = Mutation::TraitChanged { user_id: "u7".into() };
        assert_eq!(m.to_string(), "trait changed for u7");
        assert_eq!(
            Mutation::LayoutChanged { layout_key: None }.to_string(),
            "component definitions changed"
        );
    }
}
