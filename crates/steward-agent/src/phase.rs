//! The reasoning/acting state machine
//!
//! ```text
//!  Reasoning --BudgetExhausted-------> Terminated(StepBudgetExhausted)
//!  Reasoning --DirectAnswer----------> Terminated(Completed)
//!  Reasoning --CapabilityRequests----> Acting
//!  Acting    --ActingComplete--------> Reasoning
//!  Terminated --NewQuery-------------> Reasoning
//! ```

use serde::{Deserialize, Serialize};

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The backend answered without requesting capabilities
    Completed,
    /// The step counter reached the budget ("out of steps")
    StepBudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Reasoning,
    Acting,
    Terminated(Termination),
}

/// Inputs that drive the phase machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Reasoning was entered with `step == step_budget`
    BudgetExhausted,
    /// The backend response carried no capability requests
    DirectAnswer,
    /// The backend response carried at least one capability request
    CapabilityRequests,
    /// Every request of the batch produced its result
    ActingComplete,
    /// A user query arrived for an idle session
    NewQuery,
}

impl Phase {
    /// Apply the transition table. Pairs outside the table yield `None`.
    pub fn next(self, transition: Transition) -> Option<Phase> {
        use Phase::*;
        use Transition::*;

        match (self, transition) {
            (Reasoning, BudgetExhausted) => Some(Terminated(Termination::StepBudgetExhausted)),
            (Reasoning, DirectAnswer) => Some(Terminated(Termination::Completed)),
            (Reasoning, CapabilityRequests) => Some(Acting),
            (Acting, ActingComplete) => Some(Reasoning),
            (Terminated(_), NewQuery) => Some(Reasoning),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Phase::Terminated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_edges() {
        assert_eq!(
            Phase::Reasoning.next(Transition::BudgetExhausted),
            Some(Phase::Terminated(Termination::StepBudgetExhausted))
        );
        assert_eq!(
            Phase::Reasoning.next(Transition::DirectAnswer),
            Some(Phase::Terminated(Termination::Completed))
        );
        assert_eq!(
            Phase::Reasoning.next(Transition::CapabilityRequests),
            Some(Phase::Acting)
        );
    }

    #[test]
    fn test_acting_returns_to_reasoning() {
        assert_eq!(Phase::Acting.next(Transition::ActingComplete), Some(Phase::Reasoning));
        assert_eq!(Phase::Acting.next(Transition::DirectAnswer), None);
    }

    #[test]
    fn test_terminated_is_absorbing_except_for_new_query() {
        let done = Phase::Terminated(Termination::Completed);
        for t in [
            Transition::BudgetExhausted,
            Transition::DirectAnswer,
            Transition::CapabilityRequests,
            Transition::ActingComplete,
        ] {
            assert_eq!(done.next(t), None);
        }
        assert_eq!(done.next(Transition::NewQuery), Some(Phase::Reasoning));
    }
}
