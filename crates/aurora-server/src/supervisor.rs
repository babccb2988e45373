//! Rule supervisor: converges live engine processes to the declared rules.
//!
//! Owns the map from rule id to [`ManagedProcess`] and guarantees at most
//! one live process per rule at any instant. All decisions compare a rule's
//! desired state against the recorded launch arguments, so repeated calls
//! with an unchanged rule never restart anything.

use crate::launcher::{build_args, Launcher, ProcessHandle};
use aurora_core::{AuroraError, AuroraResult, ForwardRule};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// A live engine process realizing one rule. Runtime-only, never persisted.
pub struct ManagedProcess {
    /// The exact argument vector the engine was launched with.
    pub args: Vec<String>,
    /// When the process was started.
    pub started_at: Instant,
    process: Box<dyn ProcessHandle>,
}

/// Snapshot of one running process for status queries.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub rule_id: i64,
    pub pid: Option<u32>,
    pub spec: String,
    pub uptime_secs: u64,
}

/// Per-rule slot. The slot mutex serializes stop/start for one rule id, so
/// operations on different ids never block each other. A tombstoned slot
/// belongs to a deleted rule and must not be restarted.
#[derive(Default)]
struct Slot {
    process: Option<ManagedProcess>,
    removed: bool,
}

/// The rule-to-process supervisor.
///
/// Explicitly constructed and injectable; the launcher is a trait object so
/// tests drive the state machine with a fake.
pub struct Supervisor {
    launcher: Arc<dyn Launcher>,
    slots: RwLock<HashMap<i64, Arc<Mutex<Slot>>>>,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch or create the slot for `id`. The map lock is held only long
    /// enough to clone the slot handle; spawning and signaling happen under
    /// the per-slot mutex.
    async fn slot(&self, id: i64) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.read().await.get(&id) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots.entry(id).or_default().clone()
    }

    /// Converge one rule: start it, stop it, or restart it as its desired
    /// state dictates. Idempotent — an unchanged running rule is left alone.
    ///
    /// A launch failure is returned to the caller but leaves the supervisor
    /// consistent: no process is recorded, and the next call re-attempts the
    /// start.
    pub async fn reconcile_one(&self, rule: &ForwardRule) -> AuroraResult<()> {
        let slot = self.slot(rule.id).await;
        let mut guard = slot.lock().await;

        if guard.removed {
            debug!(rule_id = rule.id, "rule already removed, skipping");
            return Ok(());
        }

        if !rule.is_enabled {
            if let Some(mut proc) = guard.process.take() {
                info!(rule_id = rule.id, "rule disabled, stopping engine");
                proc.process.stop().await;
            } else {
                debug!(rule_id = rule.id, "rule disabled, nothing running");
            }
            return Ok(());
        }

        let desired = build_args(rule);
        if let Some(proc) = &guard.process {
            if proc.args == desired {
                debug!(rule_id = rule.id, "already running with desired arguments");
                return Ok(());
            }
        }

        // Stop-then-start: the old process must be fully gone before the new
        // one can bind the local port.
        if let Some(mut proc) = guard.process.take() {
            info!(rule_id = rule.id, "rule changed, stopping old engine");
            proc.process.stop().await;
        }

        match self.launcher.start(rule).await {
            Ok(handle) => {
                guard.process = Some(ManagedProcess {
                    args: desired,
                    started_at: Instant::now(),
                    process: handle,
                });
                Ok(())
            }
            Err(e) => {
                warn!(rule_id = rule.id, error = %e, "engine start failed, rule stays enabled-but-not-running");
                Err(e)
            }
        }
    }

    /// Startup-only convergence: stop every process whose rule is no longer
    /// in `rules`, then reconcile each supplied rule. Continues past
    /// individual failures and reports them.
    pub async fn reconcile_all(&self, rules: &[ForwardRule]) -> Vec<(i64, AuroraError)> {
        let keep: HashSet<i64> = rules.iter().map(|r| r.id).collect();
        let stale: Vec<(i64, Arc<Mutex<Slot>>)> = self
            .slots
            .read()
            .await
            .iter()
            .filter(|(id, _)| !keep.contains(id))
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        for (id, slot) in stale {
            let mut guard = slot.lock().await;
            guard.removed = true;
            if let Some(mut proc) = guard.process.take() {
                info!(rule_id = id, "rule no longer present, stopping engine");
                proc.process.stop().await;
            }
        }

        let mut failed = Vec::new();
        for rule in rules {
            if let Err(e) = self.reconcile_one(rule).await {
                failed.push((rule.id, e));
            }
        }

        if failed.is_empty() {
            info!(rules = rules.len(), "reconciled all rules");
        } else {
            warn!(
                rules = rules.len(),
                failed = failed.len(),
                "reconciled with failures"
            );
        }
        failed
    }

    /// Stop and forget one rule. A no-op for unknown ids. The slot is
    /// tombstoned so an in-flight reconcile cannot resurrect the process.
    pub async fn remove(&self, id: i64) {
        let slot = self.slot(id).await;
        let mut guard = slot.lock().await;
        guard.removed = true;
        if let Some(mut proc) = guard.process.take() {
            info!(rule_id = id, "rule removed, stopping engine");
            proc.process.stop().await;
        } else {
            debug!(rule_id = id, "remove for idle rule, nothing to stop");
        }
    }

    /// Stop every managed process. Called once when the daemon exits.
    pub async fn shutdown(&self) {
        let slots: Vec<(i64, Arc<Mutex<Slot>>)> =
            self.slots.write().await.drain().collect();
        info!(slots = slots.len(), "supervisor shutting down");
        for (id, slot) in slots {
            let mut guard = slot.lock().await;
            guard.removed = true;
            if let Some(mut proc) = guard.process.take() {
                debug!(rule_id = id, "stopping engine on shutdown");
                proc.process.stop().await;
            }
        }
    }

    /// Whether a live process exists for `id`.
    pub async fn is_running(&self, id: i64) -> bool {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(&id).cloned()
        };
        match slot {
            Some(slot) => {
                let guard = slot.lock().await;
                !guard.removed && guard.process.is_some()
            }
            None => false,
        }
    }

    /// Ids of all rules with a live process, ascending.
    pub async fn running_ids(&self) -> Vec<i64> {
        self.running().await.into_iter().map(|p| p.rule_id).collect()
    }

    /// Snapshots of all live processes, ordered by rule id.
    pub async fn running(&self) -> Vec<ProcessInfo> {
        let slots: Vec<(i64, Arc<Mutex<Slot>>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut infos = Vec::new();
        for (id, slot) in slots {
            let guard = slot.lock().await;
            if guard.removed {
                continue;
            }
            if let Some(proc) = &guard.process {
                infos.push(ProcessInfo {
                    rule_id: id,
                    pid: proc.process.id(),
                    spec: proc.args.last().cloned().unwrap_or_default(),
                    uptime_secs: proc.started_at.elapsed().as_secs(),
                });
            }
        }
        infos.sort_by_key(|p| p.rule_id);
        infos
    }

    /// Number of live processes.
    pub async fn count(&self) -> usize {
        self.running().await.len()
    }
}
