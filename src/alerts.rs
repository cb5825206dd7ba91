//! Alert events handed to the downstream alert router
//!
//! An [`AlertEvent`] is immutable once built. Only classifiers construct them,
//! through the per-source constructors in this module.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Error,
}

/// Stable identifier of an alert kind, used downstream for routing and muting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCode {
    pub name: String,
    pub code: String,
}

impl AlertCode {
    fn new(name: &str, code: &str) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    alert_code: AlertCode,
    message: String,
    severity: Severity,
    parent_id: String,
    origin_id: String,
    timestamp: f64,
}

impl AlertEvent {
    pub fn alert_code(&self) -> &AlertCode {
        &self.alert_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Identifier of the parent the monitored entity belongs to
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    /// Identifier of the monitored entity itself
    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// A monitored repository published a release that was not seen before
    pub fn new_github_release(
        repo_name: &str,
        release_name: &str,
        tag_name: &str,
        timestamp: f64,
        parent_id: &str,
        origin_id: &str,
    ) -> Self {
        Self {
            alert_code: AlertCode::new("NewGitHubReleaseAlert", "github_alert_1"),
            message: format!(
                "Repo: {repo_name} has a new release {release_name} tagged {tag_name}."
            ),
            severity: Severity::Info,
            parent_id: parent_id.to_string(),
            origin_id: origin_id.to_string(),
            timestamp,
        }
    }

    /// The monitor could not reach the repository's GitHub page
    pub fn cannot_access_github_page(
        repo_name: &str,
        timestamp: f64,
        parent_id: &str,
        origin_id: &str,
    ) -> Self {
        Self {
            alert_code: AlertCode::new("CannotAccessGitHubPageAlert", "github_alert_2"),
            message: format!("Github page inaccessible {repo_name}"),
            severity: Severity::Error,
            parent_id: parent_id.to_string(),
            origin_id: origin_id.to_string(),
            timestamp,
        }
    }
}
