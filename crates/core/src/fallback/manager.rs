//! Priority-ordered chain of fallback strategies.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{FallbackContext, FallbackResult, FallbackStrategy};

/// Runs registered strategies in ascending priority until one succeeds.
///
/// Strategies are registered during startup and the manager is then shared
/// behind an `Arc`, so the list is read-only while requests are served.
#[derive(Default)]
pub struct FallbackStrategyManager {
    strategies: Vec<Arc<dyn FallbackStrategy>>,
}

impl FallbackStrategyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a strategy and re-sort. Equal priorities keep registration order.
    pub fn register_strategy(&mut self, strategy: Arc<dyn FallbackStrategy>) {
        info!(
            strategy = strategy.name(),
            priority = strategy.priority(),
            "registered fallback strategy"
        );
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.priority());
    }

    /// Strategies in the order they will be tried.
    pub fn registered_strategies(&self) -> &[Arc<dyn FallbackStrategy>] {
        &self.strategies
    }

    /// Run the chain. At most one strategy's success is returned; failures
    /// and store errors move on to the next eligible strategy.
    pub async fn execute_fallback(
        &self,
        application_id: &str,
        ctx: &FallbackContext,
    ) -> FallbackResult {
        info!(application_id, "executing fallback strategies");

        if self.strategies.is_empty() {
            warn!(application_id, "no fallback strategies registered");
            return FallbackResult::failure("No fallback strategies registered");
        }

        for strategy in &self.strategies {
            if !strategy.can_handle(application_id, ctx) {
                debug!(strategy = strategy.name(), "fallback strategy not applicable");
                continue;
            }

            debug!(strategy = strategy.name(), "trying fallback strategy");
            match strategy.handle(application_id, ctx).await {
                Ok(result) if result.success => {
                    info!(
                        application_id,
                        strategy = strategy.name(),
                        message = %result.message,
                        "fallback strategy succeeded"
                    );
                    return result;
                }
                Ok(result) => {
                    info!(
                        application_id,
                        strategy = strategy.name(),
                        message = %result.message,
                        "fallback strategy failed"
                    );
                }
                Err(e) => {
                    error!(
                        application_id,
                        strategy = strategy.name(),
                        error = %e,
                        "fallback strategy errored"
                    );
                }
            }
        }

        warn!(application_id, "all fallback strategies failed or were not applicable");
        FallbackResult::failure("All fallback strategies failed or were not applicable")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::errors::StoreError;
    use crate::models::UserIdMapping;

    #[derive(Clone, Copy)]
    enum Outcome {
        Succeed,
        Fail,
        Error,
    }

    struct Scripted {
        name: &'static str,
        priority: i32,
        eligible: bool,
        outcome: Outcome,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl FallbackStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn can_handle(&self, _application_id: &str, _ctx: &FallbackContext) -> bool {
            self.eligible
        }

        async fn handle(
            &self,
            application_id: &str,
            _ctx: &FallbackContext,
        ) -> Result<FallbackResult, StoreError> {
            self.calls.lock().unwrap().push(self.name);
            match self.outcome {
                Outcome::Succeed => Ok(FallbackResult::success(
                    UserIdMapping::new(application_id, self.name, "id"),
                    self.name,
                )),
                Outcome::Fail => Ok(FallbackResult::failure(self.name)),
                Outcome::Error => Err(StoreError::Unavailable("down".into())),
            }
        }
    }

    fn scripted(
        calls: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        priority: i32,
        eligible: bool,
        outcome: Outcome,
    ) -> Arc<dyn FallbackStrategy> {
        Arc::new(Scripted {
            name,
            priority,
            eligible,
            outcome,
            calls: calls.clone(),
        })
    }

    #[tokio::test]
    async fn test_no_strategies_fails_immediately() {
        let manager = FallbackStrategyManager::new();
        let result = manager
            .execute_fallback("crm", &FallbackContext::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.message, "No fallback strategies registered");
    }

    #[tokio::test]
    async fn test_short_circuits_on_first_success() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FallbackStrategyManager::new();
        // Registered out of order on purpose.
        manager.register_strategy(scripted(&calls, "s3", 30, true, Outcome::Succeed));
        manager.register_strategy(scripted(&calls, "s1", 10, true, Outcome::Fail));
        manager.register_strategy(scripted(&calls, "s2", 20, true, Outcome::Succeed));

        let result = manager
            .execute_fallback("crm", &FallbackContext::default())
            .await;
        assert!(result.success);
        assert_eq!(result.message, "s2");
        assert_eq!(*calls.lock().unwrap(), vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_ineligible_strategy_never_handles() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FallbackStrategyManager::new();
        manager.register_strategy(scripted(&calls, "s1", 10, false, Outcome::Succeed));
        manager.register_strategy(scripted(&calls, "s2", 20, true, Outcome::Succeed));

        let result = manager
            .execute_fallback("crm", &FallbackContext::default())
            .await;
        assert_eq!(result.message, "s2");
        assert_eq!(*calls.lock().unwrap(), vec!["s2"]);
    }

    #[tokio::test]
    async fn test_error_moves_to_next_strategy() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FallbackStrategyManager::new();
        manager.register_strategy(scripted(&calls, "broken", 1, true, Outcome::Error));
        manager.register_strategy(scripted(&calls, "ok", 2, true, Outcome::Succeed));

        let result = manager
            .execute_fallback("crm", &FallbackContext::default())
            .await;
        assert!(result.success);
        assert_eq!(*calls.lock().unwrap(), vec!["broken", "ok"]);
    }

    #[tokio::test]
    async fn test_exhausted_chain_fails() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FallbackStrategyManager::new();
        manager.register_strategy(scripted(&calls, "a", 1, true, Outcome::Fail));
        manager.register_strategy(scripted(&calls, "b", 2, false, Outcome::Succeed));

        let result = manager
            .execute_fallback("crm", &FallbackContext::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.message, "All fallback strategies failed or were not applicable");
    }

    #[test]
    fn test_equal_priorities_keep_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FallbackStrategyManager::new();
        manager.register_strategy(scripted(&calls, "first", 50, true, Outcome::Fail));
        manager.register_strategy(scripted(&calls, "early", 5, true, Outcome::Fail));
        manager.register_strategy(scripted(&calls, "second", 50, true, Outcome::Fail));

        let names: Vec<&str> = manager
            .registered_strategies()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(names, vec!["early", "first", "second"]);
    }
}
