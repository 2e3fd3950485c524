//! Persisted records and their status state machines.
//!
//! Task lifecycle:
//!
//! ```text
//! QUEUED --claim--> RUNNING --complete--> SUCCEEDED
//!   ^                  |  \
//!   |                  |   `--fail, attempt >= max_attempts--> DEAD
//!   `----- FAILED <----'  fail, attempts left
//! ```
//!
//! A RUNNING task whose lease has expired is claimable again; the claim
//! increments `attempt`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pricer_core::types::Measures;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Dead,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Dead,
    ];

    /// Column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Dead => "DEAD",
        }
    }

    /// SUCCEEDED and DEAD are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Dead)
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown task status {}", s)))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate run status derived from task counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    CompletedWithErrors,
}

impl RunStatus {
    /// Column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
        }
    }

    /// No task will run again.
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::CompletedWithErrors)
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(RunStatus::Queued),
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "COMPLETED_WITH_ERRORS" => Ok(RunStatus::CompletedWithErrors),
            other => Err(StoreError::Corrupt(format!("unknown run status {}", other))),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub queued: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dead: u64,
}

impl RunProgress {
    /// Tally a list of statuses.
    pub fn from_statuses(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        let mut p = Self::default();
        for s in statuses {
            p.add(s, 1);
        }
        p
    }

    /// Add `n` tasks in `status`.
    pub fn add(&mut self, status: TaskStatus, n: u64) {
        match status {
            TaskStatus::Queued => self.queued += n,
            TaskStatus::Running => self.running += n,
            TaskStatus::Succeeded => self.succeeded += n,
            TaskStatus::Failed => self.failed += n,
            TaskStatus::Dead => self.dead += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.running + self.succeeded + self.failed + self.dead
    }

    /// Tasks that may still execute.
    pub fn active(&self) -> u64 {
        self.queued + self.running + self.failed
    }

    /// Aggregate status.
    pub fn status(&self) -> RunStatus {
        if self.active() > 0 {
            if self.running == 0 && self.succeeded == 0 && self.dead == 0 && self.failed == 0 {
                RunStatus::Queued
            } else {
                RunStatus::Running
            }
        } else if self.dead > 0 {
            RunStatus::CompletedWithErrors
        } else if self.total() == 0 {
            RunStatus::Queued
        } else {
            RunStatus::Succeeded
        }
    }
}

/// A logical valuation batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub run_type: String,
    pub as_of_time: DateTime<Utc>,
    pub market_snapshot_id: String,
    pub position_snapshot_id: String,
    /// Measure names, in request order
    pub measures: Vec<String>,
    /// Scenario ids, in request order
    pub scenarios: Vec<String>,
    /// Portfolio node ids in scope
    pub portfolio_scope: Vec<String>,
    pub hash_mod: u32,
    pub max_attempts: u32,
    pub status: RunStatus,
    pub requested_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One `(run, product_type, bucket)` unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub run_id: String,
    pub portfolio_node_id: Option<String>,
    pub product_type: String,
    pub position_snapshot_id: String,
    pub hash_mod: u32,
    pub hash_bucket: u32,
    pub status: TaskStatus,
    /// Successful claims so far
    pub attempt: u32,
    pub max_attempts: u32,
    /// Set only while RUNNING
    pub leased_until: Option<DateTime<Utc>>,
    /// Worker that made the latest claim
    pub leased_by: Option<String>,
    /// Not claimable before this instant while QUEUED
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh QUEUED task.
    #[allow(clippy::too_many_arguments)]
    pub fn queued(
        task_id: Uuid,
        run_id: &str,
        portfolio_node_id: Option<String>,
        product_type: &str,
        position_snapshot_id: &str,
        hash_mod: u32,
        hash_bucket: u32,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            run_id: run_id.to_string(),
            portfolio_node_id,
            product_type: product_type.to_string(),
            position_snapshot_id: position_snapshot_id.to_string(),
            hash_mod,
            hash_bucket,
            status: TaskStatus::Queued,
            attempt: 0,
            max_attempts,
            leased_until: None,
            leased_by: None,
            available_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Claimable at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Queued => self.available_at <= now,
            TaskStatus::Running => self.leased_until.is_some_and(|t| t < now),
            _ => false,
        }
    }

    /// Attempts exhausted.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Provenance recorded with every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeMeta {
    pub engine_version: String,
    pub worker_id: String,
    pub task_id: Uuid,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed_micros: u64,
}

/// Latest measures for one `(run, position, scenario)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub run_id: String,
    pub position_id: String,
    pub scenario_id: String,
    pub instrument_id: Option<String>,
    pub portfolio_node_id: Option<String>,
    pub product_type: String,
    pub base_ccy: Option<String>,
    pub measures: Measures,
    pub compute_meta: ComputeMeta,
    /// SHA-256 over the canonical computation inputs
    pub input_hash: String,
    /// Preserved across upserts
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ValuationResult {
    /// Unique key.
    pub fn key(&self) -> (String, String, String) {
        (
            self.run_id.clone(),
            self.position_id.clone(),
            self.scenario_id.clone(),
        )
    }
}

/// What `create_run` actually wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateRunOutcome {
    pub run_inserted: bool,
    pub snapshot_inserted: bool,
    pub tasks_inserted: usize,
}

/// How a failed task leaves RUNNING.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailAction {
    /// FAILED then QUEUED, claimable after `delay`
    Requeue { delay: Duration },
    /// Terminal
    DeadLetter,
}
