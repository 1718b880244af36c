use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Number of recent batch durations averaged for the ETA
const ETA_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Queued,
    Initializing,
    Crawling,
    Saving,
    Finished,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProgressStage::Queued => "queued",
            ProgressStage::Initializing => "initializing",
            ProgressStage::Crawling => "crawling",
            ProgressStage::Saving => "saving",
            ProgressStage::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// Task-scoped progress counters
///
/// `items_completed` only ever grows. The ETA is the moving average of the
/// last completed batch durations multiplied by the batches still expected;
/// it is withheld until at least one batch has completed.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    items_total: Option<u64>,
    items_completed: u64,
    items_failed: u64,
    stage: ProgressStage,
    current_item: Option<String>,
    last_update: DateTime<Utc>,
    batches_total: Option<u64>,
    batches_completed: u64,
    batch_started: Option<Instant>,
    batch_durations: VecDeque<Duration>,
}

/// Point-in-time view of a [`ProgressTracker`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// `None` while the total is unknown
    pub percent: Option<f64>,
    pub stage: ProgressStage,
    pub items_total: Option<u64>,
    pub items_completed: u64,
    pub items_failed: u64,
    pub current_item: Option<String>,
    pub estimated_remaining_secs: Option<u64>,
    pub last_update: DateTime<Utc>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            items_total: None,
            items_completed: 0,
            items_failed: 0,
            stage: ProgressStage::Queued,
            current_item: None,
            last_update: Utc::now(),
            batches_total: None,
            batches_completed: 0,
            batch_started: None,
            batch_durations: VecDeque::with_capacity(ETA_WINDOW),
        }
    }

    fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    pub fn stage(&self) -> ProgressStage {
        self.stage
    }

    pub fn set_stage(&mut self, stage: ProgressStage) {
        self.stage = stage;
        self.touch();
    }

    pub fn items_total(&self) -> Option<u64> {
        self.items_total
    }

    pub fn items_completed(&self) -> u64 {
        self.items_completed
    }

    pub fn items_failed(&self) -> u64 {
        self.items_failed
    }

    pub fn set_items_total(&mut self, total: u64) {
        self.items_total = Some(total);
        self.touch();
    }

    /// Batches expected in total, when the plan is known upfront
    pub fn set_batches_total(&mut self, total: u64) {
        self.batches_total = Some(total);
    }

    pub fn begin_batch(&mut self, current_item: impl Into<String>) {
        self.current_item = Some(current_item.into());
        self.batch_started = Some(Instant::now());
        self.touch();
    }

    /// Close the open batch and add its counts
    pub fn complete_batch(&mut self, completed: u64, failed: u64) {
        if let Some(started) = self.batch_started.take() {
            if self.batch_durations.len() == ETA_WINDOW {
                self.batch_durations.pop_front();
            }
            self.batch_durations.push_back(started.elapsed());
        }
        self.batches_completed += 1;
        self.items_completed += completed;
        self.items_failed += failed;
        self.touch();
    }

    /// Settle a successful run: the total becomes what was actually collected
    pub fn finish(&mut self) {
        self.items_total = Some(self.items_completed);
        self.batches_total = Some(self.batches_completed);
        self.current_item = None;
        self.stage = ProgressStage::Finished;
        self.touch();
    }

    pub fn percent(&self) -> Option<f64> {
        match self.items_total {
            Some(0) => Some(100.0),
            Some(total) => Some((self.items_completed as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }

    fn remaining_batches(&self) -> Option<u64> {
        if let Some(total) = self.batches_total {
            return Some(total.saturating_sub(self.batches_completed));
        }
        let total = self.items_total?;
        if self.batches_completed == 0 || self.items_completed == 0 {
            return None;
        }
        let per_batch = self.items_completed as f64 / self.batches_completed as f64;
        let remaining_items = total.saturating_sub(self.items_completed) as f64;
        Some((remaining_items / per_batch).ceil() as u64)
    }

    pub fn estimated_remaining(&self) -> Option<Duration> {
        if self.batch_durations.is_empty() {
            return None;
        }
        let remaining = self.remaining_batches()?;
        let sum: Duration = self.batch_durations.iter().sum();
        let average = sum / self.batch_durations.len() as u32;
        Some(average * remaining as u32)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.percent(),
            stage: self.stage,
            items_total: self.items_total,
            items_completed: self.items_completed,
            items_failed: self.items_failed,
            current_item: self.current_item.clone(),
            estimated_remaining_secs: self.estimated_remaining().map(|d| d.as_secs()),
            last_update: self.last_update,
        }
    }
}
