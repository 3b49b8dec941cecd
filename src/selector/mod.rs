//! Layout selection.
//!
//! [`LayoutSelector::select`] is cache-aside:
//!
//! 1. Unless `force_refresh`, return a live cache entry for `(user, area)`.
//! 2. Take a [`CacheTicket`](crate::cache::CacheTicket), then read the user's
//!    traits and features and the active rule set concurrently.
//! 3. Walk the rules that apply to the area in evaluation order; the first
//!    whose predicate matches decides the layout. No match, or running out of
//!    the evaluation budget, falls back to the area's default layout.
//! 4. Resolve the layout, merge component props and write the payload back
//!    with the ticket, so a result computed from traits that changed
//!    mid-flight is never cached.
//!
//! A performance record is written for every call, hit, miss or error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::cache::{CacheStats, CacheTicket, InMemoryLayoutCache, LayoutCache};
use crate::config::SelectorConfig;
use crate::error::{CacheError, ConfigError, SelectorError};
use crate::hooks::CacheInvalidator;
use crate::layout::{assemble_components, EffectMetadata, LayoutPayload};
use crate::monitor::{PerformanceMonitor, PerformanceRecord, PerformanceReport, TimeRange};
use crate::predicate::Evaluator;
use crate::profile::{feature_set, TraitSnapshot};
use crate::rules::{candidates_for_area, Rule};
use crate::store::{InMemoryStore, StoreSet};

/// Outcome of walking the rule list.
#[derive(Debug)]
struct Decision<'a> {
    matched: Option<&'a Rule>,
    rules_evaluated: usize,
    budget_exhausted: bool,
}

/// Per-call bookkeeping for the performance record.
#[derive(Debug, Default)]
struct CallStats {
    cache_hit: bool,
    rules_evaluated: usize,
}

pub struct LayoutSelector {
    config: SelectorConfig,
    stores: StoreSet,
    cache: Arc<dyn LayoutCache>,
    monitor: Arc<PerformanceMonitor>,
    evaluator: Evaluator,
    budget: Duration,
}

impl LayoutSelector {
    /// Fails if `config` does not validate.
    pub fn new(
        config: SelectorConfig,
        stores: StoreSet,
        cache: Arc<dyn LayoutCache>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        log::info!(
            "layout selector: areas={:?} default={} ttl={}s budget={}ms depth={}",
            config.areas,
            config.default_layout_key,
            config.cache_ttl_secs,
            config.evaluation_budget_ms,
            config.max_predicate_depth
        );
        Ok(Self {
            evaluator: Evaluator::new(config.max_predicate_depth),
            budget: config.evaluation_budget(),
            config,
            stores,
            cache,
            monitor,
        })
    }

    /// Selector over an [`InMemoryStore`] with an in-memory cache sized from
    /// `config`. The cache invalidator is registered on `store`.
    pub fn with_in_memory_store(config: SelectorConfig, store: Arc<InMemoryStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache: Arc<dyn LayoutCache> = Arc::new(InMemoryLayoutCache::new(
            config.cache_ttl(),
            config.cache_max_entries,
        ));
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor_capacity));
        store.register_hook(Arc::new(CacheInvalidator::new(cache.clone())));
        Self::new(config, StoreSet::from_shared(store), cache, monitor)
    }

    /// Override the per-call rule evaluation budget.
    pub fn with_evaluation_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn LayoutCache> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Check that every area's fallback layout exists. Run at startup.
    pub async fn verify_defaults(&self) -> Result<(), SelectorError> {
        for area in &self.config.areas {
            let layout_key = self.config.default_layout_for(area);
            if self.stores.layouts.layout(layout_key, area).await?.is_none() {
                return Err(ConfigError::DefaultLayoutUnresolved {
                    layout_key: layout_key.to_string(),
                    area: area.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Select the layout for `(user_id, area)`.
    pub async fn select(
        &self,
        user_id: &str,
        area: &str,
        force_refresh: bool,
    ) -> Result<Arc<LayoutPayload>, SelectorError> {
        let started = Instant::now();
        let mut stats = CallStats::default();
        let result = self.resolve(user_id, area, force_refresh, &mut stats).await;

        self.monitor.record(PerformanceRecord {
            user_id: user_id.to_string(),
            layout_key: result.as_ref().ok().map(|p| p.layout_key.clone()),
            area: area.to_string(),
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            cache_hit: stats.cache_hit,
            rules_evaluated: stats.rules_evaluated,
            measured_at: Utc::now(),
        });

        if let Err(err) = &result {
            if err.is_configuration() {
                log::error!("selection failed for user={} area={}: {}", user_id, area, err);
            } else {
                log::warn!("selection failed for user={} area={}: {}", user_id, area, err);
            }
        }
        result
    }

    async fn resolve(
        &self,
        user_id: &str,
        area: &str,
        force_refresh: bool,
        stats: &mut CallStats,
    ) -> Result<Arc<LayoutPayload>, SelectorError> {
        if !self.config.is_known_area(area) {
            return Err(SelectorError::UnknownArea {
                area: area.to_string(),
            });
        }

        if !force_refresh {
            if let Some(hit) = self.cache.get(user_id, area) {
                stats.cache_hit = true;
                return Ok(hit.payload);
            }
        }

        // Taken before any input is read.
        let ticket = self.cache.ticket(user_id);

        let (traits, features, rules) = tokio::try_join!(
            self.stores.traits.traits_for_user(user_id),
            self.stores.features.features_for_user(user_id),
            self.stores.rules.active_rules(),
        )?;

        let snapshot = TraitSnapshot::from_traits(&traits);
        let decision = self.decide(&snapshot, &rules, area);
        stats.rules_evaluated = decision.rules_evaluated;

        let (layout_key, rule_id) = match decision.matched {
            Some(rule) => (rule.effect.layout_key.as_str(), Some(rule.rule_id.clone())),
            None => (self.config.default_layout_for(area), None),
        };

        let layout = self
            .stores
            .layouts
            .layout(layout_key, area)
            .await?
            .ok_or_else(|| SelectorError::DanglingLayout {
                layout_key: layout_key.to_string(),
                area: area.to_string(),
                rule_id,
            })?;
        let definitions = self.stores.layouts.components(&layout.component_keys()).await?;

        let effect_metadata = match decision.matched {
            Some(rule) => EffectMetadata {
                rule_id: Some(rule.rule_id.clone()),
                persona: rule.effect.persona.clone(),
                settings: rule.effect.settings.clone(),
                fallback: false,
                rules_evaluated: decision.rules_evaluated,
                budget_exhausted: false,
            },
            None => EffectMetadata::fallback(decision.rules_evaluated, decision.budget_exhausted),
        };

        let payload = Arc::new(LayoutPayload {
            layout_key: layout.layout_key.clone(),
            area: area.to_string(),
            components: assemble_components(&layout, &definitions),
            features: feature_set(&features),
            effect_metadata,
            computed_at: Utc::now(),
        });

        if decision.budget_exhausted {
            log::warn!(
                "evaluation budget of {:?} exhausted for user={} area={}, fallback not cached",
                self.budget,
                user_id,
                area
            );
        } else {
            self.store_in_cache(&ticket, area, &payload);
        }

        Ok(payload)
    }

    /// First matching rule for `area`, within the evaluation budget.
    fn decide<'a>(&self, snapshot: &TraitSnapshot, rules: &'a [Rule], area: &str) -> Decision<'a> {
        let deadline = Instant::now() + self.budget;
        let mut decision = Decision {
            matched: None,
            rules_evaluated: 0,
            budget_exhausted: false,
        };

        for rule in candidates_for_area(rules, area) {
            decision.rules_evaluated += 1;

            let evaluation = self
                .evaluator
                .evaluate_with_diagnostics(snapshot, &rule.predicate);
            for diagnostic in &evaluation.diagnostics {
                log::warn!(
                    "rule {} ({:?}): {}",
                    rule.rule_id,
                    diagnostic.kind,
                    diagnostic.detail
                );
            }
            // Checked after the rule so a match that lands past the deadline
            // counts as no match, and no further rule starts late.
            if Instant::now() >= deadline {
                decision.budget_exhausted = true;
                break;
            }
            if evaluation.matched {
                log::debug!("rule {} matched for area={}", rule.rule_id, area);
                decision.matched = Some(rule);
                break;
            }
        }
        decision
    }

    fn store_in_cache(&self, ticket: &CacheTicket, area: &str, payload: &Arc<LayoutPayload>) {
        match self.cache.put_if_fresh(ticket, area, Arc::clone(payload)) {
            Ok(_) => {}
            Err(CacheError::Disabled) => {}
            Err(err) => log::warn!(
                "cache write failed for user={} area={}: {}",
                ticket.user_id,
                area,
                err
            ),
        }
    }

    // -- mutation hooks -------------------------------------------------
    //
    // For collaborators that write their own stores and only notify us.

    /// Returns the number of cache entries dropped.
    pub fn on_trait_changed(&self, user_id: &str) -> usize {
        self.cache.invalidate_user(user_id)
    }

    pub fn on_feature_changed(&self, user_id: &str) -> usize {
        self.cache.invalidate_user(user_id)
    }

    pub fn on_rule_set_changed(&self) -> usize {
        self.cache.invalidate_global()
    }

    // -- diagnostics ----------------------------------------------------

    pub fn performance_report(&self, range: TimeRange) -> PerformanceReport {
        self.monitor.report(range)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachedLayout, DEFAULT_TTL};
    use crate::error::StoreError;
    use crate::layout::{ComponentDefinition, ComponentPlacement, LayoutDefinition};
    use crate::predicate::{Condition, Operator, Predicate};
    use crate::profile::{FeatureFlag, UserTrait};
    use crate::rules::RuleEffect;
    use crate::store::TraitStore;
    use async_trait::async_trait;

    fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_component(ComponentDefinition::new("meal_log").with_prop("title", "Meals"));
        store.upsert_component(ComponentDefinition::new("plant_tips").with_prop("title", "Tips"));
        store.upsert_component(ComponentDefinition::new("streak"));
        store.upsert_layout(
            LayoutDefinition::new("default_home", "home")
                .with_component(ComponentPlacement::new("streak", 2))
                .with_component(ComponentPlacement::new("meal_log", 1)),
        );
        store.upsert_layout(
            LayoutDefinition::new("vegan_home", "home")
                .with_component(ComponentPlacement::new("plant_tips", 2))
                .with_component(ComponentPlacement::new("meal_log", 1).with_override("title", "Plant meals")),
        );
        store.upsert_layout(LayoutDefinition::new("macro_home", "home"));
        store.upsert_layout(LayoutDefinition::new("default_dash", "dashboard"));
        store
    }

    fn config() -> SelectorConfig {
        SelectorConfig::new("default_home").with_area_default("dashboard", "default_dash")
    }

    fn selector(store: &Arc<InMemoryStore>) -> LayoutSelector {
        LayoutSelector::with_in_memory_store(config(), store.clone()).unwrap()
    }

    fn vegan_rule() -> Rule {
        Rule::new(
            "1",
            1,
            Predicate::eq("diet_type", "vegan"),
            RuleEffect::new("vegan_home").with_persona("plant_coach"),
        )
    }

    fn keys(payload: &LayoutPayload) -> Vec<&str> {
        payload.components.iter().map(|c| c.component_key.as_str()).collect()
    }

    struct FailingTraits;

    #[async_trait]
    impl TraitStore for FailingTraits {
        async fn traits_for_user(&self, _user_id: &str) -> Result<Vec<UserTrait>, StoreError> {
            Err(StoreError::unavailable("trait service down"))
        }
    }

    /// Simulates a trait write landing while the selection reads its inputs.
    struct RacingTraits {
        inner: Arc<InMemoryStore>,
        cache: Arc<dyn LayoutCache>,
    }

    #[async_trait]
    impl TraitStore for RacingTraits {
        async fn traits_for_user(&self, user_id: &str) -> Result<Vec<UserTrait>, StoreError> {
            let traits = self.inner.traits_for_user(user_id).await;
            self.cache.invalidate_user(user_id);
            traits
        }
    }

    struct FailingCache;

    impl LayoutCache for FailingCache {
        fn get(&self, _user_id: &str, _area: &str) -> Option<CachedLayout> {
            None
        }
        fn put(&self, _user_id: &str, _area: &str, _payload: Arc<LayoutPayload>) -> Result<(), CacheError> {
            Err(CacheError::CapacityExceeded { limit: 0 })
        }
        fn ticket(&self, user_id: &str) -> CacheTicket {
            CacheTicket {
                user_id: user_id.to_string(),
                issued_at: 0,
            }
        }
        fn put_if_fresh(&self, _ticket: &CacheTicket, _area: &str, _payload: Arc<LayoutPayload>) -> Result<bool, CacheError> {
            Err(CacheError::CapacityExceeded { limit: 0 })
        }
        fn invalidate_user(&self, _user_id: &str) -> usize {
            0
        }
        fn invalidate_global(&self) -> usize {
            0
        }
        fn purge_expired(&self) -> usize {
            0
        }
        fn stats(&self) -> CacheStats {
            CacheStats::default()
        }
        fn ttl(&self) -> Duration {
            DEFAULT_TTL
        }
    }

    #[tokio::test]
    async fn test_vegan_end_to_end() {
        let store = seeded_store();
        let selector = selector(&store);
        store.upsert_rule(vegan_rule());
        store.upsert_trait(UserTrait::new("u", "diet_type", "vegan").with_confidence(1.0));

        let payload = selector.select("u", "home", false).await.unwrap();
        assert_eq!(payload.layout_key, "vegan_home");
        assert_eq!(keys(&payload), vec!["meal_log", "plant_tips"]);
        assert_eq!(payload.components[0].props["title"], "Plant meals");
        assert_eq!(payload.effect_metadata.rule_id.as_deref(), Some("1"));
        assert_eq!(payload.effect_metadata.persona.as_deref(), Some("plant_coach"));
        assert!(!payload.effect_metadata.fallback);

        store.upsert_trait(UserTrait::new("u", "diet_type", "omnivore"));
        let payload = selector.select("u", "home", false).await.unwrap();
        assert_eq!(payload.layout_key, "default_home");
        assert_eq!(keys(&payload), vec!["meal_log", "streak"]);
        assert!(payload.effect_metadata.fallback);
        assert_eq!(payload.effect_metadata.rules_evaluated, 1);
    }

    #[tokio::test]
    async fn test_lower_priority_number_wins() {
        let store = seeded_store();
        let selector = selector(&store);
        store.upsert_rule(Rule::new("b", 2, Predicate::Empty, RuleEffect::new("macro_home")));
        store.upsert_rule(Rule::new("a", 1, Predicate::Empty, RuleEffect::new("vegan_home")));

        let payload = selector.select("u", "home", false).await.unwrap();
        assert_eq!(payload.layout_key, "vegan_home");
        assert_eq!(payload.effect_metadata.rules_evaluated, 1);
    }

    #[tokio::test]
    async fn test_equal_priority_breaks_on_rule_id() {
        let store = seeded_store();
        let selector = selector(&store);
        store.upsert_rule(Rule::new("10", 1, Predicate::Empty, RuleEffect::new("macro_home")));
        store.upsert_rule(Rule::new("9", 1, Predicate::Empty, RuleEffect::new("vegan_home")));

        for _ in 0..3 {
            let payload = selector.select("u", "home", true).await.unwrap();
            assert_eq!(payload.effect_metadata.rule_id.as_deref(), Some("9"));
        }
    }

    #[tokio::test]
    async fn test_no_match_uses_area_default() {
        let store = seeded_store();
        let selector = selector(&store);
        store.upsert_rule(vegan_rule());

        let home = selector.select("u", "home", false).await.unwrap();
        assert_eq!(home.layout_key, "default_home");
        let dash = selector.select("u", "dashboard", false).await.unwrap();
        assert_eq!(dash.layout_key, "default_dash");
    }

    #[tokio::test]
    async fn test_second_call_is_identical_cache_hit() {
        let store = seeded_store();
        let selector = selector(&store);

        let first = selector.select("u", "home", false).await.unwrap();
        let second = selector.select("u", "home", false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            serde_json::to_string(&*first).unwrap(),
            serde_json::to_string(&*second).unwrap()
        );

        let report = selector.performance_report(TimeRange::all());
        assert_eq!(report.samples, 2);
        assert_eq!(report.cache_hits, 1);
        assert_eq!(selector.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_trait_change_invalidates_only_that_user() {
        let store = seeded_store();
        let selector = selector(&store);
        store.upsert_rule(vegan_rule());

        let u_before = selector.select("u", "home", false).await.unwrap();
        let v_before = selector.select("v", "home", false).await.unwrap();
        assert_eq!(u_before.layout_key, "default_home");

        store.upsert_trait(UserTrait::new("u", "diet_type", "vegan"));

        let u_after = selector.select("u", "home", false).await.unwrap();
        assert_eq!(u_after.layout_key, "vegan_home");

        let v_cached = selector.cache().get("v", "home").unwrap();
        assert!(Arc::ptr_eq(&v_cached.payload, &v_before));
    }

    #[tokio::test]
    async fn test_rule_change_flushes_every_user() {
        let store = seeded_store();
        let selector = selector(&store);
        selector.select("u", "home", false).await.unwrap();
        selector.select("v", "home", false).await.unwrap();

        store.upsert_rule(Rule::new("new", 1, Predicate::Empty, RuleEffect::new("macro_home")));

        assert_eq!(selector.select("u", "home", false).await.unwrap().layout_key, "macro_home");
        assert_eq!(selector.select("v", "home", false).await.unwrap().layout_key, "macro_home");
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        // No invalidator registered: only force_refresh can see the change.
        let store = seeded_store();
        let cache: Arc<dyn LayoutCache> = Arc::new(InMemoryLayoutCache::default());
        let selector = LayoutSelector::new(
            config(),
            StoreSet::from_shared(store.clone()),
            cache,
            Arc::new(PerformanceMonitor::default()),
        )
        .unwrap();
        store.upsert_rule(vegan_rule());

        assert_eq!(selector.select("u", "home", false).await.unwrap().layout_key, "default_home");
        store.upsert_trait(UserTrait::new("u", "diet_type", "vegan"));
        assert_eq!(selector.select("u", "home", false).await.unwrap().layout_key, "default_home");
        assert_eq!(selector.select("u", "home", true).await.unwrap().layout_key, "vegan_home");
        // The refreshed result replaced the stale entry.
        assert_eq!(selector.select("u", "home", false).await.unwrap().layout_key, "vegan_home");
    }

    #[tokio::test]
    async fn test_hook_passthroughs() {
        let store = seeded_store();
        let selector = LayoutSelector::new(
            config(),
            StoreSet::from_shared(store.clone()),
            Arc::new(InMemoryLayoutCache::default()),
            Arc::new(PerformanceMonitor::default()),
        )
        .unwrap();
        selector.select("u", "home", false).await.unwrap();
        selector.select("u", "dashboard", false).await.unwrap();
        selector.select("v", "home", false).await.unwrap();

        assert_eq!(selector.on_feature_changed("u"), 2);
        assert_eq!(selector.on_trait_changed("u"), 0);
        assert_eq!(selector.on_rule_set_changed(), 1);
    }

    #[tokio::test]
    async fn test_unknown_area_is_configuration_error() {
        let store = seeded_store();
        let selector = selector(&store);
        let err = selector.select("u", "attic", false).await.unwrap_err();
        assert!(matches!(err, SelectorError::UnknownArea { ref area } if area == "attic"));
        assert!(!err.is_retryable());

        let report = selector.performance_report(TimeRange::all());
        assert_eq!(report.samples, 1);
    }

    #[tokio::test]
    async fn test_dangling_rule_layout_is_fatal() {
        let store = seeded_store();
        let selector = selector(&store);
        store.upsert_rule(Rule::new("7", 1, Predicate::Empty, RuleEffect::new("missing_home")));

        let err = selector.select("u", "home", false).await.unwrap_err();
        match err {
            SelectorError::DanglingLayout { layout_key, rule_id, .. } => {
                assert_eq!(layout_key, "missing_home");
                assert_eq!(rule_id.as_deref(), Some("7"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(selector.cache().get("u", "home").is_none());
    }

    #[tokio::test]
    async fn test_verify_defaults() {
        let store = seeded_store();
        assert!(selector(&store).verify_defaults().await.is_ok());

        let bad = LayoutSelector::with_in_memory_store(
            SelectorConfig::new("nowhere_home"),
            seeded_store(),
        )
        .unwrap();
        let err = bad.verify_defaults().await.unwrap_err();
        assert!(matches!(
            err,
            SelectorError::Config(ConfigError::DefaultLayoutUnresolved { ref layout_key, .. })
                if layout_key == "nowhere_home"
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store = seeded_store();
        let result = LayoutSelector::with_in_memory_store(SelectorConfig::new(""), store.clone());
        assert!(matches!(result, Err(ConfigError::MissingDefaultLayout)));
        // Nothing was registered for the rejected selector.
        assert!(store.hooks().is_empty());
    }

    #[tokio::test]
    async fn test_transient_store_error_is_retryable_and_not_cached() {
        let store = seeded_store();
        let cache: Arc<dyn LayoutCache> = Arc::new(InMemoryLayoutCache::default());
        let stores = StoreSet {
            traits: Arc::new(FailingTraits),
            ..StoreSet::from_shared(store)
        };
        let selector =
            LayoutSelector::new(config(), stores, cache.clone(), Arc::new(PerformanceMonitor::default())).unwrap();

        let err = selector.select("u", "home", false).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(cache.get("u", "home").is_none());
        assert_eq!(cache.stats().entries, 0);

        let report = selector.performance_report(TimeRange::all());
        assert_eq!(report.samples, 1);
        assert_eq!(report.cache_hits, 0);
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_not_fatal() {
        let store = seeded_store();
        let selector = LayoutSelector::new(
            config(),
            StoreSet::from_shared(store),
            Arc::new(FailingCache),
            Arc::new(PerformanceMonitor::default()),
        )
        .unwrap();
        for _ in 0..2 {
            let payload = selector.select("u", "home", false).await.unwrap();
            assert_eq!(payload.layout_key, "default_home");
        }
        assert_eq!(selector.performance_report(TimeRange::all()).cache_hits, 0);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_falls_back_uncached() {
        let store = seeded_store();
        let selector = selector(&store).with_evaluation_budget(Duration::ZERO);
        store.upsert_rule(Rule::new("1", 1, Predicate::Empty, RuleEffect::new("vegan_home")));

        let payload = selector.select("u", "home", false).await.unwrap();
        assert_eq!(payload.layout_key, "default_home");
        assert!(payload.effect_metadata.fallback);
        assert!(payload.effect_metadata.budget_exhausted);
        assert!(selector.cache().get("u", "home").is_none());
    }

    #[test]
    fn test_match_after_deadline_counts_as_no_match() {
        let store = seeded_store();
        let selector = selector(&store).with_evaluation_budget(Duration::ZERO);
        let rules = vec![
            Rule::new("1", 1, Predicate::Empty, RuleEffect::new("vegan_home")),
            Rule::new("2", 2, Predicate::Empty, RuleEffect::new("vegan_home")),
        ];

        let decision = selector.decide(&TraitSnapshot::default(), &rules, "home");
        assert!(decision.matched.is_none());
        assert!(decision.budget_exhausted);
        assert_eq!(decision.rules_evaluated, 1);
    }

    #[tokio::test]
    async fn test_stale_computation_not_cached() {
        let store = seeded_store();
        let cache: Arc<dyn LayoutCache> = Arc::new(InMemoryLayoutCache::default());
        let stores = StoreSet {
            traits: Arc::new(RacingTraits {
                inner: store.clone(),
                cache: cache.clone(),
            }),
            ..StoreSet::from_shared(store)
        };
        let selector =
            LayoutSelector::new(config(), stores, cache.clone(), Arc::new(PerformanceMonitor::default())).unwrap();

        assert!(selector.select("u", "home", false).await.is_ok());
        assert!(cache.get("u", "home").is_none());
        assert_eq!(cache.stats().stale_writes, 1);
    }

    #[tokio::test]
    async fn test_malformed_rule_is_skipped() {
        let store = seeded_store();
        let selector = selector(&store);
        let broken = Predicate::from_value(&serde_json::json!({"trait_key": "diet_type", "operator": "~"}));
        store.upsert_rule(Rule::new("1", 1, Predicate::not(broken), RuleEffect::new("macro_home")));
        store.upsert_rule(Rule::new("2", 2, Predicate::Empty, RuleEffect::new("vegan_home")));

        let payload = selector.select("u", "home", false).await.unwrap();
        assert_eq!(payload.layout_key, "vegan_home");
        assert_eq!(payload.effect_metadata.rules_evaluated, 2);
    }

    #[tokio::test]
    async fn test_rules_scoped_to_other_areas_ignored() {
        let store = seeded_store();
        let selector = selector(&store);
        store.upsert_rule(Rule::new(
            "1",
            1,
            Predicate::Empty,
            RuleEffect::new("default_dash").for_area("dashboard"),
        ));

        let home = selector.select("u", "home", false).await.unwrap();
        assert_eq!(home.layout_key, "default_home");
        assert_eq!(home.effect_metadata.rules_evaluated, 0);
        let dash = selector.select("u", "dashboard", false).await.unwrap();
        assert_eq!(dash.effect_metadata.rule_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_min_confidence_gates_rule() {
        let store = seeded_store();
        let selector = selector(&store);
        store.upsert_rule(Rule::new(
            "1",
            1,
            Predicate::Leaf(Condition::new("protein_goal_g", Operator::Gte, 150).with_min_confidence(0.8)),
            RuleEffect::new("macro_home").with_setting("show_macros", true),
        ));
        store.upsert_trait(UserTrait::new("u", "protein_goal_g", "180").with_confidence(0.5));
        assert_eq!(selector.select("u", "home", false).await.unwrap().layout_key, "default_home");

        store.upsert_trait(UserTrait::new("u", "protein_goal_g", "180").with_confidence(0.9));
        let payload = selector.select("u", "home", false).await.unwrap();
        assert_eq!(payload.layout_key, "macro_home");
        assert_eq!(payload.effect_metadata.settings["show_macros"], true);
    }

    #[tokio::test]
    async fn test_features_in_payload() {
        let store = seeded_store();
        let selector = selector(&store);
        store.upsert_feature(FeatureFlag::new("u", "beta_charts", true).with_variant("b"));

        let payload = selector.select("u", "home", false).await.unwrap();
        assert!(payload.features["beta_charts"].enabled);
        assert_eq!(payload.features["beta_charts"].variant, "b");

        store.upsert_feature(FeatureFlag::new("u", "beta_charts", false));
        let payload = selector.select("u", "home", false).await.unwrap();
        assert!(!payload.features["beta_charts"].enabled);
    }

    #[tokio::test]
    async fn test_concurrent_selects_agree() {
        let store = seeded_store();
        store.upsert_rule(vegan_rule());
        store.upsert_trait(UserTrait::new("u", "diet_type", "vegan"));
        let selector = Arc::new(selector(&store));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let selector = Arc::clone(&selector);
                tokio::spawn(async move { selector.select("u", "home", false).await })
            })
            .collect();
        for handle in handles {
            let payload = handle.await.unwrap().unwrap();
            assert_eq!(payload.layout_key, "vegan_home");
        }
    }
}
