//! Per-organization rule snapshots.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::RuleRepository;
use crate::error::Result;
use crate::models::AlertRule;

/// Immutable set of enabled rules for one organization.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSnapshot {
    /// Organization
    pub organization_id: String,
    /// Enabled rules at load time
    pub rules: Vec<AlertRule>,
    /// When the snapshot was built
    pub loaded_at: DateTime<Utc>,
}

/// Copy-and-swap cache of rule snapshots.
///
/// Readers clone the `Arc` and keep it for a whole evaluation pass; a reload
/// never mutates a snapshot in place.
pub struct RuleCache {
    repository: Arc<dyn RuleRepository>,
    snapshots: RwLock<HashMap<String, Arc<RuleSnapshot>>>,
}

impl RuleCache {
    /// Create an empty cache over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn RuleRepository>) -> Self {
        Self {
            repository,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Current snapshot for an organization, loading it on first use.
    pub async fn snapshot(&self, organization_id: &str) -> Result<Arc<RuleSnapshot>> {
        if let Some(snapshot) = self.snapshots.read().await.get(organization_id) {
            return Ok(Arc::clone(snapshot));
        }
        self.reload(organization_id).await
    }

    /// Build a fresh snapshot for an organization and swap it in.
    pub async fn reload(&self, organization_id: &str) -> Result<Arc<RuleSnapshot>> {
        let rules = self
            .repository
            .list_enabled_rules(Some(organization_id))
            .await?;
        let snapshot = Arc::new(RuleSnapshot {
            organization_id: organization_id.to_string(),
            rules,
            loaded_at: Utc::now(),
        });
        debug!(
            organization_id = %organization_id,
            rule_count = snapshot.rules.len(),
            "Rule snapshot loaded"
        );
        self.snapshots
            .write()
            .await
            .insert(organization_id.to_string(), Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Rebuild snapshots for every organization with enabled rules.
    ///
    /// Organizations whose rules all disappeared get an empty snapshot.
    pub async fn reload_all(&self) -> Result<usize> {
        let rules = self.repository.list_enabled_rules(None).await?;
        let loaded_at = Utc::now();

        let mut fresh: HashMap<String, Vec<AlertRule>> = HashMap::new();
        for org in self.snapshots.read().await.keys() {
            fresh.entry(org.clone()).or_default();
        }
        for rule in rules {
            fresh.entry(rule.organization_id.clone()).or_default().push(rule);
        }

        let count = fresh.len();
        let swapped: HashMap<String, Arc<RuleSnapshot>> = fresh
            .into_iter()
            .map(|(organization_id, rules)| {
                let snapshot = RuleSnapshot {
                    organization_id: organization_id.clone(),
                    rules,
                    loaded_at,
                };
                (organization_id, Arc::new(snapshot))
            })
            .collect();
        *self.snapshots.write().await = swapped;

        info!(organizations = count, "Rule snapshots refreshed");
        Ok(count)
    }

    /// Organizations with a cached snapshot, sorted.
    pub async fn organizations(&self) -> Vec<String> {
        self.snapshots
            .read()
            .await
            .keys()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertType;
    use crate::store::InMemoryRuleRepository;

    #[tokio::test]
    async fn test_reload_swaps_without_touching_held_snapshot() {
        let repo = Arc::new(InMemoryRuleRepository::new(vec![AlertRule::new(
            "rule-1",
            "org-1",
            AlertType::MissingEstimate,
        )]));
        let cache = RuleCache::new(repo.clone());

        let held = cache.snapshot("org-1").await.unwrap();
        assert_eq!(held.rules.len(), 1);

        repo.upsert(AlertRule::new("rule-2", "org-1", AlertType::MissingCode))
            .await;
        assert_eq!(cache.snapshot("org-1").await.unwrap().rules.len(), 1);

        let fresh = cache.reload("org-1").await.unwrap();
        assert_eq!(fresh.rules.len(), 2);
        assert_eq!(held.rules.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_all_covers_every_org() {
        let repo = Arc::new(InMemoryRuleRepository::new(vec![
            AlertRule::new("rule-1", "org-b", AlertType::MissingEstimate),
            AlertRule::new("rule-2", "org-a", AlertType::MissingCode),
        ]));
        let cache = RuleCache::new(repo.clone());

        assert_eq!(cache.reload_all().await.unwrap(), 2);
        assert_eq!(cache.organizations().await, vec!["org-a", "org-b"]);

        repo.remove("rule-1").await;
        cache.reload_all().await.unwrap();
        assert!(cache.snapshot("org-b").await.unwrap().rules.is_empty());
    }
}
