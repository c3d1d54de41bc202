//! Repair issues raised by integrations

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub domain: String,
    pub issue_id: String,
    pub is_fixable: bool,
    pub severity: IssueSeverity,
    pub translation_key: String,
    #[serde(default)]
    pub translation_placeholders: HashMap<String, String>,
    pub created: DateTime<Utc>,
}

impl Issue {
    pub fn new(
        domain: impl Into<String>,
        issue_id: impl Into<String>,
        severity: IssueSeverity,
        translation_key: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            issue_id: issue_id.into(),
            is_fixable: false,
            severity,
            translation_key: translation_key.into(),
            translation_placeholders: HashMap::new(),
            created: Utc::now(),
        }
    }

    pub fn fixable(mut self) -> Self {
        self.is_fixable = true;
        self
    }

    pub fn with_placeholder(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.translation_placeholders.insert(key.into(), value.into());
        self
    }
}

/// Open issues keyed by `(domain, issue_id)`
#[derive(Debug, Default)]
pub struct IssueRegistry {
    issues: DashMap<(String, String), Issue>,
}

impl IssueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise an issue; re-raising keeps the original creation time.
    /// Returns true when the issue is new.
    pub fn create(&self, mut issue: Issue) -> bool {
        let key = (issue.domain.clone(), issue.issue_id.clone());
        match self.issues.get(&key) {
            Some(existing) => {
                issue.created = existing.created;
                drop(existing);
                debug!(domain = %key.0, issue_id = %key.1, "Issue refreshed");
                self.issues.insert(key, issue);
                false
            }
            None => {
                info!(domain = %key.0, issue_id = %key.1, severity = ?issue.severity, "Issue raised");
                self.issues.insert(key, issue);
                true
            }
        }
    }

    pub fn delete(&self, domain: &str, issue_id: &str) -> Option<Issue> {
        let removed = self
            .issues
            .remove(&(domain.to_string(), issue_id.to_string()))
            .map(|(_, issue)| issue);
        if removed.is_some() {
            info!(domain, issue_id, "Issue resolved");
        }
        removed
    }

    pub fn get(&self, domain: &str, issue_id: &str) -> Option<Issue> {
        self.issues
            .get(&(domain.to_string(), issue_id.to_string()))
            .map(|i| i.clone())
    }

    /// Issues of one domain, sorted by id
    pub fn list(&self, domain: &str) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .issues
            .iter()
            .filter(|i| i.domain == domain)
            .map(|i| i.clone())
            .collect();
        issues.sort_by(|a, b| a.issue_id.cmp(&b.issue_id));
        issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_refresh() {
        let registry = IssueRegistry::new();
        let issue = Issue::new("alarmcontrol", "dashboard_missing", IssueSeverity::Warning, "dashboard_missing")
            .fixable()
            .with_placeholder("filename", "/config/www/alarmcontrol_dashboard.yaml");
        let created = issue.created;

        assert!(registry.create(issue.clone()));
        assert!(!registry.create(Issue {
            created: Utc::now() + chrono::Duration::hours(1),
            ..issue
        }));

        let stored = registry.get("alarmcontrol", "dashboard_missing").unwrap();
        assert!(stored.is_fixable);
        assert_eq!(stored.created, created);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_and_delete() {
        let registry = IssueRegistry::new();
        registry.create(Issue::new("alarmcontrol", "b", IssueSeverity::Error, "b"));
        registry.create(Issue::new("alarmcontrol", "a", IssueSeverity::Warning, "a"));
        registry.create(Issue::new("other", "a", IssueSeverity::Critical, "a"));

        let ids: Vec<String> = registry
            .list("alarmcontrol")
            .into_iter()
            .map(|i| i.issue_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(registry.delete("alarmcontrol", "a").is_some());
        assert!(registry.delete("alarmcontrol", "a").is_none());
        assert_eq!(registry.len(), 2);
    }
}
