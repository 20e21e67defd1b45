//! Pure turn state machine.
//!
//! The controller feeds [`LoopEvent`]s in and acts on the resulting phase. All
//! budget arithmetic (turns, replans) lives here so it can be tested without a
//! backend.

use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Planning,
    Implementing,
    Reviewing,
    Replanning,
    Done,
    Exhausted,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopPhase::Done | LoopPhase::Exhausted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoopPhase::Planning => "planning",
            LoopPhase::Implementing => "implementing",
            LoopPhase::Reviewing => "reviewing",
            LoopPhase::Replanning => "replanning",
            LoopPhase::Done => "done",
            LoopPhase::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened during the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// The Planner produced a specification.
    PlanProduced,
    /// The Planner invocation or its parse failed.
    PlanFailed,
    /// An implementation was applied and verification ran (or was disabled).
    /// `fast_failed` means verification failed and the Reviewer is skipped.
    ImplementationReady { fast_failed: bool },
    /// The Implementer invocation failed or its output did not parse.
    ImplementationFailed,
    ReviewApproved,
    /// Explicit rejection, Reviewer parse failure or Reviewer invocation failure.
    ReviewRejected,
    ReplanRequested,
}

/// Turn and replan ceilings for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnBudget {
    pub max_turns: u32,
    pub max_replans: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LoopPhase,
    pub to: LoopPhase,
    /// The event closed the current turn.
    pub closes_turn: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineState {
    pub phase: LoopPhase,
    /// Number of turns started so far (the current turn, 1-indexed, once implementing).
    pub turn: u32,
    pub replans: u32,
    budget: TurnBudget,
}

impl MachineState {
    /// Start in `Planning`, or directly in `Implementing` when a specification already exists.
    pub fn new(budget: TurnBudget, needs_plan: bool) -> Self {
        let phase = if needs_plan {
            LoopPhase::Planning
        } else if budget.max_turns == 0 {
            LoopPhase::Exhausted
        } else {
            LoopPhase::Implementing
        };
        Self {
            phase,
            turn: 0,
            replans: 0,
            budget,
        }
    }

    pub fn budget(&self) -> TurnBudget {
        self.budget
    }

    pub fn turns_remaining(&self) -> u32 {
        self.budget.max_turns.saturating_sub(self.turn)
    }

    pub fn replans_remaining(&self) -> u32 {
        self.budget.max_replans.saturating_sub(self.replans)
    }

    /// Open the next turn. Only valid while implementing with budget left.
    pub fn begin_turn(&mut self) -> Result<u32> {
        if self.phase != LoopPhase::Implementing {
            bail!("cannot begin a turn while {}", self.phase);
        }
        if self.turn >= self.budget.max_turns {
            bail!(
                "turn budget of {} already consumed",
                self.budget.max_turns
            );
        }
        self.turn += 1;
        Ok(self.turn)
    }

    /// Apply an event and move to the next phase.
    pub fn apply(&mut self, event: LoopEvent) -> Result<Transition> {
        let from = self.phase;
        if from.is_terminal() {
            bail!("loop already finished ({from})");
        }
        if from == LoopPhase::Implementing && self.turn == 0 {
            bail!("implementation event before a turn was opened");
        }
        let (to, closes_turn) = match (from, event) {
            (LoopPhase::Planning, LoopEvent::PlanProduced) => (self.next_turn_or_exhausted(), false),
            (LoopPhase::Planning, LoopEvent::PlanFailed) => {
                bail!("initial planning failed; there is no specification to implement")
            }
            (LoopPhase::Replanning, LoopEvent::PlanProduced | LoopEvent::PlanFailed) => {
                (self.next_turn_or_exhausted(), false)
            }
            (LoopPhase::Implementing, LoopEvent::ImplementationReady { fast_failed: false }) => {
                (LoopPhase::Reviewing, false)
            }
            (
                LoopPhase::Implementing,
                LoopEvent::ImplementationReady { fast_failed: true }
                | LoopEvent::ImplementationFailed,
            ) => (self.next_turn_or_exhausted(), true),
            (LoopPhase::Reviewing, LoopEvent::ReviewApproved) => (LoopPhase::Done, true),
            (LoopPhase::Reviewing, LoopEvent::ReviewRejected) => (self.next_turn_or_exhausted(), true),
            (LoopPhase::Reviewing, LoopEvent::ReplanRequested) => {
                if self.turn >= self.budget.max_turns {
                    // No turn left to use a new plan.
                    (LoopPhase::Exhausted, true)
                } else if self.replans < self.budget.max_replans {
                    self.replans += 1;
                    (LoopPhase::Replanning, true)
                } else {
                    (self.next_turn_or_exhausted(), true)
                }
            }
            (phase, event) => bail!("event {event:?} is not valid while {phase}"),
        };
        self.phase = to;
        Ok(Transition {
            from,
            to,
            closes_turn,
        })
    }

    fn next_turn_or_exhausted(&self) -> LoopPhase {
        if self.turn >= self.budget.max_turns {
            LoopPhase::Exhausted
        } else {
            LoopPhase::Implementing
        }
    }
}
