use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::BgjobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// One managed background job, as persisted in the state document.
///
/// `pid` is the supervisor's pid (the process group leader that `stop`
/// signals), not the inner shell child's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub pid: u32,
    pub command: String,
    pub start_time: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Local>>,
    pub status: JobStatus,
    pub log_file: PathBuf,
    pub input_file: PathBuf,
    pub cwd: PathBuf,
}

/// The whole persisted mapping, always read and written as a unit.
pub type StateDoc = BTreeMap<String, JobRecord>;

/// Short random job id. Eight hex chars from a v4 uuid gives a collision
/// probability that is negligible at this scale.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Resolve a user-supplied id prefix to exactly one stored job id.
pub fn resolve_id<'a>(doc: &'a StateDoc, prefix: &str) -> Result<&'a str, BgjobError> {
    let mut matches = doc.keys().filter(|id| id.starts_with(prefix));
    let first = matches
        .next()
        .ok_or_else(|| BgjobError::JobNotFound(prefix.to_string()))?;
    let rest: Vec<&str> = matches.map(String::as_str).collect();
    if !rest.is_empty() {
        let mut all = vec![first.as_str()];
        all.extend(rest);
        return Err(BgjobError::AmbiguousJob(prefix.to_string(), all.join(", ")));
    }
    Ok(first)
}
