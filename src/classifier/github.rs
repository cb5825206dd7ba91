//! GitHub release monitoring
//!
//! Success results carry a release counter. The first observation of a repo
//! only establishes the baseline (`previous` is null); afterwards every
//! increase of the counter yields one alert per new release, read from the
//! `releases` map at indices `"0" .. "delta-1"`.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::alerts::AlertEvent;

use super::{ClassifyError, Classifier, InboundResult};

pub const SOURCE: &str = "github";

#[derive(Debug, Clone, Deserialize)]
pub struct RepoMetadata {
    pub repo_name: String,
    pub last_monitored: f64,
    pub repo_parent_id: String,
    pub repo_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoFailureMetadata {
    pub repo_name: String,
    pub time: f64,
    pub repo_parent_id: String,
    pub repo_id: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Counter {
    pub current: i64,
    pub previous: Option<i64>,
}

impl Counter {
    /// Number of newly observed items, zero while no baseline exists.
    ///
    /// Counts are never negative; a negative side rejects the payload.
    pub fn delta(&self) -> Result<usize, ClassifyError> {
        let Some(previous) = self.previous else {
            return Ok(0);
        };

        if self.current < 0 || previous < 0 {
            return Err(ClassifyError::UnrecognizedPayload(format!(
                "negative counter: current {}, previous {}",
                self.current, previous
            )));
        }

        let delta = self.current.checked_sub(previous).unwrap_or(0).max(0);
        usize::try_from(delta).map_err(|_| {
            ClassifyError::UnrecognizedPayload(format!("counter delta {delta} out of range"))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub release_name: String,
    pub tag_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseData {
    pub no_of_releases: Counter,
    #[serde(default)]
    pub releases: HashMap<String, Release>,
}

pub type GitHubResult = InboundResult<RepoMetadata, ReleaseData, RepoFailureMetadata>;

#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubClassifier;

impl Classifier for GitHubClassifier {
    fn source(&self) -> &str {
        SOURCE
    }

    fn classify(&self, payload: &Value) -> Result<Vec<AlertEvent>, ClassifyError> {
        match GitHubResult::from_value(payload)? {
            InboundResult::Success { meta_data, data } => {
                let delta = data.no_of_releases.delta()?;
                trace!("{}: {delta} new releases", meta_data.repo_name);

                (0..delta)
                    .map(|index| -> Result<AlertEvent, ClassifyError> {
                        let release = data
                            .releases
                            .get(&index.to_string())
                            .ok_or(ClassifyError::MissingItem(index))?;

                        Ok(AlertEvent::new_github_release(
                            &meta_data.repo_name,
                            &release.release_name,
                            &release.tag_name,
                            meta_data.last_monitored,
                            &meta_data.repo_parent_id,
                            &meta_data.repo_id,
                        ))
                    })
                    .collect()
            }
            InboundResult::Failure { meta_data } => Ok(vec![AlertEvent::cannot_access_github_page(
                &meta_data.repo_name,
                meta_data.time,
                &meta_data.repo_parent_id,
                &meta_data.repo_id,
            )]),
        }
    }
}
