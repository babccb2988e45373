//! Rule persistence.
//!
//! [`RuleStore`] is the interface the lifecycle hooks drive. [`JsonStore`]
//! keeps the authoritative rule map in memory and rewrites a single JSON
//! file on every mutation. Validation — port range, relay destination, and
//! the cross-rule port uniqueness invariant — lives here, so the supervisor
//! never sees two rules sharing a local port.

use async_trait::async_trait;
use aurora_core::{AuroraError, AuroraResult, ForwardRule, RuleDraft, RulePatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Persistence interface for forwarding rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list(&self) -> AuroraResult<Vec<ForwardRule>>;
    async fn get(&self, id: i64) -> AuroraResult<Option<ForwardRule>>;
    async fn create(&self, draft: RuleDraft) -> AuroraResult<ForwardRule>;
    async fn update(&self, id: i64, patch: RulePatch) -> AuroraResult<ForwardRule>;
    async fn delete(&self, id: i64) -> AuroraResult<bool>;
}

/// On-disk layout of the store file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: i64,
    rules: Vec<ForwardRule>,
}

struct StoreState {
    next_id: i64,
    rules: BTreeMap<i64, ForwardRule>,
}

/// File-backed rule store.
pub struct JsonStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonStore {
    /// Open the store at `path`, creating an empty one if the file does not
    /// exist yet.
    pub fn open(path: impl Into<PathBuf>) -> AuroraResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let file: StoreFile = serde_json::from_str(&content)
                .map_err(|e| AuroraError::Storage(format!("{}: {e}", path.display())))?;
            let rules: BTreeMap<i64, ForwardRule> =
                file.rules.into_iter().map(|r| (r.id, r)).collect();
            // Guard against a hand-edited file with a stale counter.
            let max_id = rules.keys().max().copied().unwrap_or(0);
            let next_id = file.next_id.max(max_id + 1);
            info!(path = %path.display(), rules = rules.len(), "rule store loaded");
            StoreState { next_id, rules }
        } else {
            info!(path = %path.display(), "rule store file not found, starting empty");
            StoreState {
                next_id: 1,
                rules: BTreeMap::new(),
            }
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Rewrite the store file from `state`. Writes a sibling temp file and
    /// renames it over the target so a crash mid-write cannot truncate the
    /// database.
    fn persist(&self, state: &StoreState) -> AuroraResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = StoreFile {
            next_id: state.next_id,
            rules: state.rules.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| AuroraError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn check_port_free(state: &StoreState, port: u16, exclude: Option<i64>) -> AuroraResult<()> {
    let taken = state
        .rules
        .values()
        .any(|r| r.local_port == port && Some(r.id) != exclude);
    if taken {
        Err(AuroraError::PortConflict(port))
    } else {
        Ok(())
    }
}

#[async_trait]
impl RuleStore for JsonStore {
    async fn list(&self) -> AuroraResult<Vec<ForwardRule>> {
        let state = self.state.read().await;
        Ok(state.rules.values().cloned().collect())
    }

    async fn get(&self, id: i64) -> AuroraResult<Option<ForwardRule>> {
        let state = self.state.read().await;
        Ok(state.rules.get(&id).cloned())
    }

    async fn create(&self, draft: RuleDraft) -> AuroraResult<ForwardRule> {
        let mut state = self.state.write().await;
        check_port_free(&state, draft.local_port, None)?;

        let rule = draft.into_rule(state.next_id);
        rule.validate()?;

        state.next_id += 1;
        state.rules.insert(rule.id, rule.clone());
        self.persist(&state)?;
        info!(rule_id = rule.id, local_port = rule.local_port, "rule created");
        Ok(rule)
    }

    async fn update(&self, id: i64, patch: RulePatch) -> AuroraResult<ForwardRule> {
        let mut state = self.state.write().await;
        let mut rule = state
            .rules
            .get(&id)
            .cloned()
            .ok_or(AuroraError::RuleNotFound(id))?;

        rule.apply(patch);
        rule.validate()?;
        check_port_free(&state, rule.local_port, Some(id))?;

        state.rules.insert(id, rule.clone());
        self.persist(&state)?;
        debug!(rule_id = id, "rule updated");
        Ok(rule)
    }

    async fn delete(&self, id: i64) -> AuroraResult<bool> {
        let mut state = self.state.write().await;
        let removed = state.rules.remove(&id).is_some();
        if removed {
            self.persist(&state)?;
            info!(rule_id = id, "rule deleted");
        }
        Ok(removed)
    }
}
