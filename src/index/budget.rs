use std::time::Instant;

use anyhow::Result;

use crate::error::SearchTimeout;

/// Wall-clock allowance for one search. A zero budget disables the check.
#[derive(Clone, Copy)]
pub(super) struct SearchTimeoutBudget {
    started: Instant,
    timeout_ms: u64,
}

impl SearchTimeoutBudget {
    pub(super) fn new(timeout_ms: u64) -> Option<Self> {
        if timeout_ms == 0 {
            return None;
        }
        Some(Self {
            started: Instant::now(),
            timeout_ms,
        })
    }

    fn elapsed_ms(self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn enforce(self, stage: &str) -> Result<()> {
        let elapsed_ms = self.elapsed_ms();
        if elapsed_ms <= self.timeout_ms as f64 {
            return Ok(());
        }

        Err(SearchTimeout {
            stage: stage.to_string(),
            elapsed_ms,
            budget_ms: self.timeout_ms,
        }
        .into())
    }
}

pub(super) fn enforce_timeout(budget: Option<SearchTimeoutBudget>, stage: &str) -> Result<()> {
    if let Some(budget) = budget {
        budget.enforce(stage)?;
    }
    Ok(())
}
