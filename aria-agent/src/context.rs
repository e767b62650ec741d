use std::time::Instant;

use aria_core::error::LimitError;
use aria_core::session::{Limits, SessionId};

/// Immutable per-step snapshot of the budgets a step must respect. Rebuilt
/// via [`StepContext::next_step`] as the loop advances.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub session_id: SessionId,
    pub trace_id: uuid::Uuid,
    pub step_number: u32,
    pub steps_taken: u32,
    pub cost_spent_usd: f64,
    pub limits: Limits,
    pub deadline: Option<Instant>,
}

impl StepContext {
    pub fn initial(session_id: SessionId, limits: Limits, started: Instant) -> Self {
        Self {
            session_id,
            trace_id: uuid::Uuid::new_v4(),
            step_number: 1,
            steps_taken: 0,
            cost_spent_usd: 0.0,
            limits,
            deadline: limits.deadline.map(|d| started + d),
        }
    }

    pub fn next_step(&self, steps_taken: u32, cost_spent_usd: f64) -> Self {
        Self {
            session_id: self.session_id,
            trace_id: uuid::Uuid::new_v4(),
            step_number: self.step_number + 1,
            steps_taken,
            cost_spent_usd,
            limits: self.limits,
            deadline: self.deadline,
        }
    }

    /// The budget gate run at every step boundary.
    pub fn check_budgets(&self, now: Instant, started: Instant) -> Result<(), LimitError> {
        if self.steps_taken >= self.limits.max_steps {
            return Err(LimitError::StepLimitExceeded {
                max_steps: self.limits.max_steps,
            });
        }
        if self.cost_spent_usd >= self.limits.max_cost_usd {
            return Err(LimitError::CostLimitExceeded {
                cost: self.cost_spent_usd,
                max_cost: self.limits.max_cost_usd,
            });
        }
        if let Some(deadline) = self.deadline {
            if now >= deadline {
                return Err(LimitError::DeadlineExceeded {
                    elapsed_ms: now.duration_since(started).as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    pub fn remaining_steps(&self) -> u32 {
        self.limits.max_steps.saturating_sub(self.steps_taken)
    }

    pub fn remaining_cost_usd(&self) -> f64 {
        (self.limits.max_cost_usd - self.cost_spent_usd).max(0.0)
    }
}
