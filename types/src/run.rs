//! One execution of an app and its lifecycle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RunId;

/// Value of a user-supplied run or node config entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

pub type UserConfig = HashMap<String, UserConfigValue>;

pub mod run_status {
    pub const PENDING: &str = "pending";
    pub const STARTING: &str = "starting";
    pub const RUNNING: &str = "running";
    pub const FINISHED: &str = "finished";
}

pub mod run_sub_status {
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const STOPPED: &str = "stopped";
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunStatus {
    pub status: String,
    pub sub_status: String,
    pub details: String,
}

impl RunStatus {
    #[must_use]
    pub fn new(
        status: impl Into<String>,
        sub_status: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            status: status.into(),
            sub_status: sub_status.into(),
            details: details.into(),
        }
    }

    #[must_use]
    pub fn pending() -> Self {
        Self::new(run_status::PENDING, "", "")
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == run_status::FINISHED
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub run_id: RunId,
    pub fab_id: String,
    pub fab_version: String,
    pub fab_hash: String,
    pub override_config: UserConfig,
    pub pending_at: Option<DateTime<Utc>>,
    pub starting_at: Option<DateTime<Utc>>,
    pub running_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
}

impl Run {
    /// A freshly created run, pending since `now`.
    #[must_use]
    pub fn pending(
        run_id: RunId,
        fab_id: impl Into<String>,
        fab_version: impl Into<String>,
        fab_hash: impl Into<String>,
        override_config: UserConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            fab_id: fab_id.into(),
            fab_version: fab_version.into(),
            fab_hash: fab_hash.into(),
            override_config,
            pending_at: Some(now),
            starting_at: None,
            running_at: None,
            finished_at: None,
            status: RunStatus::pending(),
        }
    }

    /// Move to `status`, stamping the matching lifecycle timestamp.
    ///
    /// Unknown status strings are stored without touching timestamps.
    pub fn transition(&mut self, status: RunStatus, now: DateTime<Utc>) {
        match status.status.as_str() {
            run_status::PENDING => self.pending_at = Some(now),
            run_status::STARTING => self.starting_at = Some(now),
            run_status::RUNNING => self.running_at = Some(now),
            run_status::FINISHED => self.finished_at = Some(now),
            _ => {}
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_stamps_lifecycle() {
        let now = Utc::now();
        let mut run = Run::pending(RunId::new(1), "app", "1.0.0", "", UserConfig::new(), now);
        assert_eq!(run.status, RunStatus::pending());

        run.transition(RunStatus::new(run_status::RUNNING, "", ""), now);
        assert_eq!(run.running_at, Some(now));
        assert!(run.starting_at.is_none());

        run.transition(
            RunStatus::new(run_status::FINISHED, run_sub_status::COMPLETED, ""),
            now,
        );
        assert!(run.status.is_finished());
        assert_eq!(run.finished_at, Some(now));
    }
}
