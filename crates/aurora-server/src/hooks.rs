//! Lifecycle hooks: the CRUD-to-supervisor translation layer.
//!
//! The API layer calls exactly one hook per mutation, immediately after the
//! store write succeeds. The hooks carry no state of their own — they only
//! sequence a store call with the matching supervisor action.

use crate::store::RuleStore;
use crate::supervisor::Supervisor;
use aurora_core::{AuroraError, AuroraResult, ForwardRule, RuleDraft, RulePatch};
use std::sync::Arc;
use tracing::{info, warn};

pub struct LifecycleHooks {
    store: Arc<dyn RuleStore>,
    supervisor: Arc<Supervisor>,
}

impl LifecycleHooks {
    pub fn new(store: Arc<dyn RuleStore>, supervisor: Arc<Supervisor>) -> Self {
        Self { store, supervisor }
    }

    /// Create a rule and start it if enabled.
    ///
    /// A launch failure does not fail the request: the record is already
    /// stored, the rule is simply enabled-but-not-running until the next
    /// reconcile succeeds.
    pub async fn create_rule(&self, draft: RuleDraft) -> AuroraResult<ForwardRule> {
        let rule = self.store.create(draft).await?;
        if let Err(e) = self.supervisor.reconcile_one(&rule).await {
            warn!(rule_id = rule.id, error = %e, "rule stored but engine did not start");
        }
        Ok(rule)
    }

    /// Apply a partial update and converge the process to the new record.
    pub async fn update_rule(&self, id: i64, patch: RulePatch) -> AuroraResult<ForwardRule> {
        let rule = self.store.update(id, patch).await?;
        if let Err(e) = self.supervisor.reconcile_one(&rule).await {
            warn!(rule_id = rule.id, error = %e, "rule updated but engine did not start");
        }
        Ok(rule)
    }

    /// Delete a rule. The process is stopped first so the local port is
    /// free by the time the record is gone.
    pub async fn delete_rule(&self, id: i64) -> AuroraResult<bool> {
        self.supervisor.remove(id).await;
        self.store.delete(id).await
    }

    /// Startup reconciliation: converge to the full persisted rule set
    /// before the API starts serving.
    pub async fn startup(&self) -> AuroraResult<Vec<(i64, AuroraError)>> {
        info!("running startup reconciliation");
        self.restart_all().await
    }

    /// Re-read every rule and reconcile. Backs the panel's restart button.
    pub async fn restart_all(&self) -> AuroraResult<Vec<(i64, AuroraError)>> {
        let rules = self.store.list().await?;
        Ok(self.supervisor.reconcile_all(&rules).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{Launcher, ProcessHandle};
    use crate::store::JsonStore;
    use async_trait::async_trait;
    use aurora_core::Protocol;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Counting fake: enough to observe hook-level behavior.
    #[derive(Default)]
    struct CountingLauncher {
        starts: AtomicU32,
        stops: Arc<AtomicU32>,
        fail: AtomicBool,
    }

    struct CountingProcess {
        pid: u32,
        stops: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Launcher for CountingLauncher {
        async fn start(
            &self,
            _rule: &aurora_core::ForwardRule,
        ) -> AuroraResult<Box<dyn ProcessHandle>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuroraError::Launch("refused".into()));
            }
            let pid = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Box::new(CountingProcess {
                pid,
                stops: self.stops.clone(),
            }))
        }
    }

    #[async_trait]
    impl ProcessHandle for CountingProcess {
        fn id(&self) -> Option<u32> {
            Some(self.pid)
        }

        async fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn harness(name: &str) -> (Arc<CountingLauncher>, Arc<Supervisor>, LifecycleHooks) {
        let path = std::env::temp_dir()
            .join("aurora-hooks-test")
            .join(format!("{name}.json"));
        let _ = std::fs::remove_file(&path);
        let store: Arc<dyn RuleStore> = Arc::new(JsonStore::open(path).unwrap());
        let launcher = Arc::new(CountingLauncher::default());
        let supervisor = Arc::new(Supervisor::new(launcher.clone()));
        let hooks = LifecycleHooks::new(store, supervisor.clone());
        (launcher, supervisor, hooks)
    }

    fn draft(local_port: u16, enabled: bool) -> RuleDraft {
        RuleDraft {
            local_port,
            remote_ip: "10.0.0.1".into(),
            remote_port: 22,
            protocol: Protocol::Tcp,
            username: None,
            password: None,
            is_enabled: enabled,
            description: None,
            owner: None,
            expire_date: None,
        }
    }

    #[tokio::test]
    async fn create_enabled_starts_engine() {
        let (_launcher, supervisor, hooks) = harness("create-enabled");
        let rule = hooks.create_rule(draft(8080, true)).await.unwrap();
        assert!(supervisor.is_running(rule.id).await);
    }

    #[tokio::test]
    async fn create_disabled_does_not_start() {
        let (launcher, supervisor, hooks) = harness("create-disabled");
        let rule = hooks.create_rule(draft(8080, false)).await.unwrap();
        assert!(!supervisor.is_running(rule.id).await);
        assert_eq!(launcher.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn launch_failure_does_not_fail_create() {
        let (launcher, supervisor, hooks) = harness("launch-failure");
        launcher.fail.store(true, Ordering::SeqCst);

        let rule = hooks.create_rule(draft(8080, true)).await.unwrap();
        assert!(!supervisor.is_running(rule.id).await);

        // The record exists, so a later restart picks it up.
        launcher.fail.store(false, Ordering::SeqCst);
        let failed = hooks.restart_all().await.unwrap();
        assert!(failed.is_empty());
        assert!(supervisor.is_running(rule.id).await);
    }

    #[tokio::test]
    async fn update_toggle_stops_and_restarts() {
        let (launcher, supervisor, hooks) = harness("toggle");
        let rule = hooks.create_rule(draft(8080, true)).await.unwrap();

        hooks
            .update_rule(
                rule.id,
                RulePatch {
                    is_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!supervisor.is_running(rule.id).await);
        assert_eq!(launcher.stops.load(Ordering::SeqCst), 1);

        hooks
            .update_rule(
                rule.id,
                RulePatch {
                    is_enabled: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(supervisor.is_running(rule.id).await);
    }

    #[tokio::test]
    async fn delete_stops_then_removes_record() {
        let (launcher, supervisor, hooks) = harness("delete");
        let rule = hooks.create_rule(draft(8080, true)).await.unwrap();

        assert!(hooks.delete_rule(rule.id).await.unwrap());
        assert!(!supervisor.is_running(rule.id).await);
        assert_eq!(launcher.stops.load(Ordering::SeqCst), 1);
        assert!(!hooks.delete_rule(rule.id).await.unwrap());
    }

    #[tokio::test]
    async fn startup_converges_to_stored_rules() {
        let (_, supervisor, hooks) = harness("startup");
        let a = hooks.create_rule(draft(8081, true)).await.unwrap();
        let b = hooks.create_rule(draft(8082, false)).await.unwrap();

        let failed = hooks.startup().await.unwrap();
        assert!(failed.is_empty());
        assert_eq!(supervisor.running_ids().await, vec![a.id]);
        assert!(!supervisor.is_running(b.id).await);
    }
}
