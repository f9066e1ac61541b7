//! Scenario store trait and in-memory implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use scenarist_core::{ObjectKey, Scenario, ScenarioStatus};
use tokio::sync::RwLock;
use tracing::debug;
use ulid::Ulid;

use crate::error::{Error, Result};

const KIND: &str = "scenario";

/// Persistence for scenario resources.
///
/// Writes carry the `resource_version` they were read at; a stale version is
/// rejected with [`Error::Conflict`].
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    /// Fetch a scenario. Missing objects yield [`Error::NotFound`].
    async fn get(&self, key: &ObjectKey) -> Result<Scenario>;

    /// List scenarios, optionally restricted to one namespace.
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Scenario>>;

    /// Create a scenario; the store assigns uid, generation and version.
    async fn create(&self, scenario: Scenario) -> Result<Scenario>;

    /// Write metadata (finalizers, labels) and spec. Status is ignored.
    ///
    /// An object that is being deleted and ends up with no finalizers is
    /// purged; the returned copy is its final state.
    async fn update(&self, scenario: &Scenario) -> Result<Scenario>;

    /// Write the status sub-resource only.
    async fn update_status(&self, scenario: &Scenario) -> Result<Scenario>;

    /// Request deletion. Objects holding finalizers are only marked.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// In-memory scenario store for testing and simulation.
#[derive(Default)]
pub struct InMemoryScenarioStore {
    scenarios: RwLock<BTreeMap<ObjectKey, Scenario>>,
    injected_conflicts: AtomicU32,
}

impl InMemoryScenarioStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    pub async fn contains(&self, key: &ObjectKey) -> bool {
        self.scenarios.read().await.contains_key(key)
    }

    fn take_injected_conflict(&self, key: &ObjectKey) -> Result<()> {
        let injected = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::conflict(key, "the object has been modified"));
        }
        Ok(())
    }
}

fn check_version(stored: &Scenario, incoming: &Scenario) -> Result<()> {
    if stored.metadata.resource_version == incoming.metadata.resource_version {
        Ok(())
    } else {
        Err(Error::conflict(
            stored.metadata.key(),
            format!(
                "resource version {} is stale, current is {}",
                incoming.metadata.resource_version, stored.metadata.resource_version
            ),
        ))
    }
}

#[async_trait]
impl ScenarioStore for InMemoryScenarioStore {
    async fn get(&self, key: &ObjectKey) -> Result<Scenario> {
        self.scenarios
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(KIND, key))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Scenario>> {
        Ok(self
            .scenarios
            .read()
            .await
            .values()
            .filter(|s| namespace.is_none_or(|ns| s.metadata.namespace == ns))
            .cloned()
            .collect())
    }

    async fn create(&self, mut scenario: Scenario) -> Result<Scenario> {
        if scenario.metadata.namespace.is_empty() {
            scenario.metadata.namespace = "default".to_string();
        }
        let key = scenario.metadata.key();

        let mut scenarios = self.scenarios.write().await;
        if scenarios.contains_key(&key) {
            return Err(Error::already_exists(KIND, &key));
        }

        if scenario.metadata.uid.is_empty() {
            scenario.metadata.uid = Ulid::new().to_string().to_lowercase();
        }
        scenario.metadata.generation = 1;
        scenario.metadata.resource_version = 1;
        scenario.metadata.creation_timestamp = Some(Utc::now());
        scenario.metadata.deletion_timestamp = None;
        scenario.status = ScenarioStatus::default();

        scenarios.insert(key, scenario.clone());
        Ok(scenario)
    }

    async fn update(&self, scenario: &Scenario) -> Result<Scenario> {
        let key = scenario.metadata.key();
        let mut scenarios = self.scenarios.write().await;
        self.take_injected_conflict(&key)?;

        let stored = scenarios
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(KIND, &key))?;
        check_version(stored, scenario)?;

        if stored.spec != scenario.spec {
            stored.spec = scenario.spec.clone();
            stored.metadata.generation = stored.metadata.generation.saturating_add(1);
        }
        stored.metadata.finalizers.clone_from(&scenario.metadata.finalizers);
        stored.metadata.labels.clone_from(&scenario.metadata.labels);
        stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);

        let updated = stored.clone();
        if updated.metadata.is_being_deleted() && updated.metadata.finalizers.is_empty() {
            scenarios.remove(&key);
            debug!(scenario = %key, "Purged scenario after last finalizer was removed");
        }
        Ok(updated)
    }

    async fn update_status(&self, scenario: &Scenario) -> Result<Scenario> {
        let key = scenario.metadata.key();
        let mut scenarios = self.scenarios.write().await;
        self.take_injected_conflict(&key)?;

        let stored = scenarios
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(KIND, &key))?;
        check_version(stored, scenario)?;

        stored.status = scenario.status.clone();
        stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
        Ok(stored.clone())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut scenarios = self.scenarios.write().await;
        let stored = scenarios
            .get_mut(key)
            .ok_or_else(|| Error::not_found(KIND, key))?;

        if stored.metadata.finalizers.is_empty() {
            scenarios.remove(key);
            debug!(scenario = %key, "Deleted scenario");
        } else if !stored.metadata.is_being_deleted() {
            stored.metadata.deletion_timestamp = Some(Utc::now());
            stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
            debug!(scenario = %key, finalizers = ?stored.metadata.finalizers, "Marked scenario for deletion");
        }
        Ok(())
    }
}
