//! Stuck-loop detection over closed turns.

use serde::{Deserialize, Serialize};

/// Streak lengths at which an alert fires. Zero disables a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub rejection_streak: u32,
    pub zero_edit_streak: u32,
    pub fast_fail_streak: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            rejection_streak: 3,
            zero_edit_streak: 2,
            fast_fail_streak: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RejectionStreak,
    ZeroEditStreak,
    FastFailSpiral,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::RejectionStreak => "rejection_streak",
            AlertKind::ZeroEditStreak => "zero_edit_streak",
            AlertKind::FastFailSpiral => "fast_fail_spiral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub kind: AlertKind,
    pub turn: u32,
    pub streak: u32,
    pub threshold: u32,
    pub message: String,
}

/// What verification did on a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationSignal {
    /// No verification ran (disabled, or the implementation never applied).
    NotRun,
    Passed,
    /// Failed but the Reviewer still ran.
    Failed,
    /// Failed and the Reviewer was skipped.
    ShortCircuited,
}

/// Per-turn facts the monitor needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSignals {
    pub turn: u32,
    pub approved: bool,
    pub rejected: bool,
    /// `Some` only when the Implementer output parsed.
    pub zero_edit: Option<bool>,
    pub verification: VerificationSignal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    pub rejection_streak: u32,
    pub zero_edit_streak: u32,
    pub fast_fail_streak: u32,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            ..Self::default()
        }
    }

    /// Update streaks for a closed turn and return the alerts it triggered.
    pub fn observe_turn(&mut self, signals: TurnSignals) -> Vec<HealthAlert> {
        let mut alerts = Vec::new();

        if signals.approved {
            self.rejection_streak = 0;
        } else if signals.rejected {
            self.rejection_streak += 1;
            self.check(
                AlertKind::RejectionStreak,
                self.rejection_streak,
                self.thresholds.rejection_streak,
                signals.turn,
                &mut alerts,
            );
        }

        match signals.zero_edit {
            Some(true) => {
                self.zero_edit_streak += 1;
                self.check(
                    AlertKind::ZeroEditStreak,
                    self.zero_edit_streak,
                    self.thresholds.zero_edit_streak,
                    signals.turn,
                    &mut alerts,
                );
            }
            Some(false) => self.zero_edit_streak = 0,
            None => {}
        }

        match signals.verification {
            VerificationSignal::ShortCircuited => {
                self.fast_fail_streak += 1;
                self.check(
                    AlertKind::FastFailSpiral,
                    self.fast_fail_streak,
                    self.thresholds.fast_fail_streak,
                    signals.turn,
                    &mut alerts,
                );
            }
            VerificationSignal::Passed => self.fast_fail_streak = 0,
            VerificationSignal::Failed | VerificationSignal::NotRun => {}
        }

        alerts
    }

    fn check(
        &self,
        kind: AlertKind,
        streak: u32,
        threshold: u32,
        turn: u32,
        alerts: &mut Vec<HealthAlert>,
    ) {
        // Fire once, on the turn the streak reaches the threshold.
        if threshold == 0 || streak != threshold {
            return;
        }
        let message = match kind {
            AlertKind::RejectionStreak => {
                format!("{streak} consecutive rejected turns; the loop may be stuck")
            }
            AlertKind::ZeroEditStreak => {
                format!("{streak} consecutive implementations changed no files")
            }
            AlertKind::FastFailSpiral => {
                format!("verification failed {streak} turns in a row without a review")
            }
        };
        alerts.push(HealthAlert {
            kind,
            turn,
            streak,
            threshold,
            message,
        });
    }
}
