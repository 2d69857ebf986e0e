//! Step timing for import and build runs

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;

/// One finished step
#[derive(Debug, Clone, PartialEq)]
pub struct StepTiming {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug)]
struct TrackerState {
    started_at: DateTime<Utc>,
    started: Instant,
    last_at: DateTime<Utc>,
    last: Instant,
    steps: Vec<StepTiming>,
    finished: bool,
}

/// Records how long each step of a run took.
///
/// A step lasts from the end of the previous step (or the tracker's
/// creation) until [`PerformanceTracker::finished_step`] is called. Clones
/// share the same record.
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceTracker {
    pub fn new() -> Self {
        let now = Utc::now();
        let instant = Instant::now();
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                started_at: now,
                started: instant,
                last_at: now,
                last: instant,
                steps: Vec::new(),
                finished: false,
            })),
        }
    }

    pub fn finished_step(&self, name: impl Into<String>) {
        let name = name.into();
        let now = Utc::now();
        let instant = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let duration = instant.duration_since(state.last);
        info!(step = %name, seconds = duration.as_secs_f64(), "Finished step");
        let step = StepTiming {
            name,
            start: state.last_at,
            end: now,
            duration,
        };
        state.steps.push(step);
        state.last_at = now;
        state.last = instant;
    }

    /// Close the run with a `total` row; later calls do nothing
    pub fn finish(&self) -> Duration {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.finished {
            return state.steps.last().map(|step| step.duration).unwrap_or_default();
        }
        let total = Instant::now().duration_since(state.started);
        let steps = state.steps.len();
        let step = StepTiming {
            name: "total".to_string(),
            start: state.started_at,
            end: now,
            duration: total,
        };
        state.steps.push(step);
        state.finished = true;
        info!(steps, seconds = total.as_secs_f64(), "Run completed");
        total
    }

    pub fn steps(&self) -> Vec<StepTiming> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).steps.clone()
    }

    /// Write the steps as `;`-separated CSV with `,` as the decimal mark
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new().delimiter(b';').from_path(path)?;
        writer.write_record(["name", "start", "end", "duration"])?;
        for step in self.steps() {
            writer.write_record([
                step.name,
                step.start.format("%H:%M:%S").to_string(),
                step.end.format("%H:%M:%S").to_string(),
                format!("{:.6}", step.duration.as_secs_f64()).replace('.', ","),
            ])?;
        }
        writer.flush()?;
        info!(path = %path.display(), "Saved performance record");
        Ok(())
    }
}
