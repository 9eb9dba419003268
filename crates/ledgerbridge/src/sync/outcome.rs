use chrono::{DateTime, Utc};
use ledgerbridge_api::{EntityKey, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::conflict::Action;

/// Outcomes kept in memory for inspection.
pub const OUTCOME_HISTORY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Pairing,
    Deciding,
    Applying,
    Committing,
    Done,
    Failed,
}

/// Per-cycle record; the only trace an enqueued or swept cycle leaves besides the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub cycle_id: Uuid,
    pub entity: EntityKey,
    #[serde(default)]
    pub action: Option<Action>,
    /// Last phase reached; `Failed` carries the phase it failed in.
    pub phase: CyclePhase,
    #[serde(default)]
    pub failed_in: Option<CyclePhase>,
    #[serde(default)]
    pub error: Option<SyncError>,
    /// Soft failure reported by the payment step.
    #[serde(default)]
    pub payment_note: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        self.phase == CyclePhase::Done
    }

    pub fn wrote(&self) -> bool {
        self.is_success() && !matches!(self.action, None | Some(Action::NoOp))
    }
}

pub struct OutcomeLog {
    history: Mutex<VecDeque<CycleOutcome>>,
    tx: broadcast::Sender<CycleOutcome>,
}

impl Default for OutcomeLog {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            history: Mutex::new(VecDeque::with_capacity(64)),
            tx,
        }
    }
}

impl OutcomeLog {
    pub fn record(&self, outcome: CycleOutcome) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() >= OUTCOME_HISTORY {
                history.pop_front();
            }
            history.push_back(outcome.clone());
        }
        let _ = self.tx.send(outcome);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleOutcome> {
        self.tx.subscribe()
    }

    pub fn recent(&self) -> Vec<CycleOutcome> {
        self.history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn for_entity(&self, entity: &EntityKey) -> Vec<CycleOutcome> {
        self.recent()
            .into_iter()
            .filter(|o| &o.entity == entity)
            .collect()
    }
}

/// Totals for one sweep. Individual failures are collected, never raised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub started_at: Option<DateTime<Utc>>,
    pub scanned: usize,
    pub created_local: usize,
    pub created_remote: usize,
    pub updated_local: usize,
    pub updated_remote: usize,
    pub unchanged: usize,
    pub errors: Vec<(String, String)>,
}

impl SweepReport {
    pub fn count(&mut self, action: Action) {
        match action {
            Action::CreateLocal => self.created_local += 1,
            Action::CreateRemote => self.created_remote += 1,
            Action::UpdateLocal => self.updated_local += 1,
            Action::UpdateRemote => self.updated_remote += 1,
            Action::NoOp => self.unchanged += 1,
        }
    }

    pub fn fail(&mut self, entity: &EntityKey, error: &SyncError) {
        self.errors.push((entity.to_string(), error.to_string()));
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.scanned += other.scanned;
        self.created_local += other.created_local;
        self.created_remote += other.created_remote;
        self.updated_local += other.updated_local;
        self.updated_remote += other.updated_remote;
        self.unchanged += other.unchanged;
        self.errors.extend(other.errors);
    }
}
