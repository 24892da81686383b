//! Retry backoff schedule

use std::fmt::Write as _;
use std::time::Duration;

use crate::clock::duration_ms;
use crate::error::{Error, Result};

/// Escalating delays applied after each failed attempt.
///
/// Attempt `n` (0-based, counted before the failure is recorded) waits
/// `steps[n]`; attempts past the end reuse the last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            steps: vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(5 * 60),
                Duration::from_secs(15 * 60),
                Duration::from_secs(60 * 60),
            ],
        }
    }
}

impl BackoffSchedule {
    pub fn new(steps: Vec<Duration>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::InvalidInput(
                "backoff schedule needs at least one step".to_string(),
            ));
        }
        if steps.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(Error::InvalidInput(
                "backoff steps must be non-decreasing".to_string(),
            ));
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }

    /// Delay for a record that has already failed `retry_count` times.
    pub fn delay_for(&self, retry_count: i64) -> Duration {
        let index = usize::try_from(retry_count.max(0)).unwrap_or(usize::MAX);
        self.steps
            .get(index)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or_default()
    }

    /// SQL expression that evaluates the schedule against `column`.
    ///
    /// Lets a failure transition compute `next_retry_at` inside its UPDATE.
    pub(crate) fn sql_case(&self, column: &str) -> String {
        let mut sql = format!("(CASE {column}");
        let (last, head) = self
            .steps
            .split_last()
            .map_or((0, &[][..]), |(last, head)| (duration_ms(*last), head));
        for (index, step) in head.iter().enumerate() {
            let _ = write!(sql, " WHEN {index} THEN {}", duration_ms(*step));
        }
        let _ = write!(sql, " ELSE {last} END)");
        sql
    }
}
