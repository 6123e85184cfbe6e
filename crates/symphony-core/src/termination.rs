//! Iteration termination rules.
//!
//! Invoked once per iteration with the confidence/source history so far.
//! The rules are evaluated in order; the first that fires wins:
//!
//! 1. confidence >= threshold            -> stop, `complete`
//! 2. flat confidence and no new sources
//!    over the last K iterations         -> stop, `saturated`
//! 3. iteration budget exhausted         -> stop, `bounded`
//! 4. unresolved contradiction above the
//!    severity threshold                 -> stop, `inconclusive`
//! 5. otherwise                          -> continue
//!
//! Rule 2 is checked before rule 3, so an iteration where both fire
//! terminates as `saturated`: no progress over the window is the
//! stronger signal than merely running out of budget.

use symphony_db::models::Outcome;

/// Tunable thresholds, overridable per step in compositions.
#[derive(Debug, Clone, Copy)]
pub struct TerminationConfig {
    /// Rule 1: stop `complete` at or above this confidence.
    pub confidence_threshold: f64,
    /// Rule 2: a confidence delta below this counts as no progress.
    pub delta_threshold: f64,
    /// Rule 2: how many trailing iterations form the saturation window.
    pub window: usize,
    /// Rule 4: contradictions at or above this severity are unresolvable.
    pub contradiction_threshold: f64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            delta_threshold: 0.02,
            window: 2,
            contradiction_threshold: 0.5,
        }
    }
}

impl TerminationConfig {
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

/// A contradiction surfaced by an iteration's analysis.
#[derive(Debug, Clone)]
pub struct Contradiction {
    pub description: String,
    /// 0.0 (cosmetic) to 1.0 (irreconcilable).
    pub severity: f64,
}

/// What the evaluator sees about one completed iteration.
#[derive(Debug, Clone)]
pub struct IterationSnapshot {
    /// 1-based iteration number.
    pub iteration: u32,
    /// Best confidence after this iteration.
    pub confidence: f64,
    /// Sources first seen in this iteration.
    pub new_sources: usize,
    pub contradiction: Option<Contradiction>,
}

/// The evaluator's verdict for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Continue,
    Stop {
        outcome: Outcome,
        discrepancy: Option<String>,
    },
}

impl Decision {
    fn stop(outcome: Outcome) -> Self {
        Self::Stop {
            outcome,
            discrepancy: None,
        }
    }
}

/// Evaluate the termination rules against the iteration history.
///
/// `history` holds one snapshot per completed iteration, oldest first;
/// the last entry is the iteration being judged.
pub fn evaluate(
    config: &TerminationConfig,
    history: &[IterationSnapshot],
    max_iterations: u32,
) -> Decision {
    let Some(current) = history.last() else {
        return Decision::Continue;
    };

    // Rule 1: confident enough.
    if current.confidence >= config.confidence_threshold {
        return Decision::stop(Outcome::Complete);
    }

    // Rule 2: saturation. Needs a full window of deltas, i.e. at least
    // window + 1 snapshots.
    if history.len() > config.window {
        let tail = &history[history.len() - config.window - 1..];
        let flat = tail
            .windows(2)
            .all(|w| (w[1].confidence - w[0].confidence).abs() < config.delta_threshold);
        let no_new_sources = tail[1..].iter().all(|s| s.new_sources == 0);
        if flat && no_new_sources {
            return Decision::stop(Outcome::Saturated);
        }
    }

    // Rule 3: out of budget.
    if current.iteration >= max_iterations {
        return Decision::stop(Outcome::Bounded);
    }

    // Rule 4: unresolved contradiction.
    if let Some(contradiction) = &current.contradiction {
        if contradiction.severity >= config.contradiction_threshold {
            return Decision::Stop {
                outcome: Outcome::Inconclusive,
                discrepancy: Some(contradiction.description.clone()),
            };
        }
    }

    Decision::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(iteration: u32, confidence: f64, new_sources: usize) -> IterationSnapshot {
        IterationSnapshot {
            iteration,
            confidence,
            new_sources,
            contradiction: None,
        }
    }

    #[test]
    fn empty_history_continues() {
        let config = TerminationConfig::default();
        assert_eq!(evaluate(&config, &[], 5), Decision::Continue);
    }

    #[test]
    fn high_confidence_stops_complete() {
        let config = TerminationConfig::default();
        let history = vec![snapshot(1, 0.9, 3)];
        assert_eq!(
            evaluate(&config, &history, 5),
            Decision::stop(Outcome::Complete)
        );
    }

    #[test]
    fn confidence_exactly_at_threshold_stops_complete() {
        let config = TerminationConfig::default();
        let history = vec![snapshot(1, 0.85, 0)];
        assert_eq!(
            evaluate(&config, &history, 5),
            Decision::stop(Outcome::Complete)
        );
    }

    #[test]
    fn flat_confidence_with_no_sources_saturates() {
        let config = TerminationConfig::default();
        let history = vec![
            snapshot(1, 0.50, 2),
            snapshot(2, 0.51, 0),
            snapshot(3, 0.51, 0),
        ];
        assert_eq!(
            evaluate(&config, &history, 10),
            Decision::stop(Outcome::Saturated)
        );
    }

    #[test]
    fn new_sources_defeat_saturation() {
        let config = TerminationConfig::default();
        let history = vec![
            snapshot(1, 0.50, 2),
            snapshot(2, 0.51, 0),
            snapshot(3, 0.51, 1),
        ];
        assert_eq!(evaluate(&config, &history, 10), Decision::Continue);
    }

    #[test]
    fn budget_exhaustion_stops_bounded() {
        let config = TerminationConfig::default();
        let history = vec![snapshot(1, 0.3, 2), snapshot(2, 0.5, 2), snapshot(3, 0.6, 1)];
        assert_eq!(
            evaluate(&config, &history, 3),
            Decision::stop(Outcome::Bounded)
        );
    }

    #[test]
    fn rule_one_beats_rule_two_on_same_iteration() {
        let config = TerminationConfig::default();
        // Flat-and-sourceless window, but the last iteration clears the
        // confidence threshold.
        let history = vec![
            snapshot(1, 0.849, 0),
            snapshot(2, 0.85, 0),
            snapshot(3, 0.86, 0),
        ];
        assert_eq!(
            evaluate(&config, &history, 10),
            Decision::stop(Outcome::Complete)
        );
    }

    #[test]
    fn saturation_wins_over_bounds_on_same_iteration() {
        let config = TerminationConfig::default();
        // Iteration 3 is both the budget edge and a saturated window.
        let history = vec![
            snapshot(1, 0.50, 1),
            snapshot(2, 0.50, 0),
            snapshot(3, 0.50, 0),
        ];
        assert_eq!(
            evaluate(&config, &history, 3),
            Decision::stop(Outcome::Saturated)
        );
    }

    #[test]
    fn severe_contradiction_stops_inconclusive_with_discrepancy() {
        let config = TerminationConfig::default();
        let history = vec![IterationSnapshot {
            iteration: 2,
            confidence: 0.4,
            new_sources: 1,
            contradiction: Some(Contradiction {
                description: "sources disagree on the release date".to_string(),
                severity: 0.8,
            }),
        }];
        match evaluate(&config, &history, 5) {
            Decision::Stop {
                outcome: Outcome::Inconclusive,
                discrepancy: Some(d),
            } => assert!(d.contains("disagree")),
            other => panic!("expected inconclusive stop, got {other:?}"),
        }
    }

    #[test]
    fn mild_contradiction_continues() {
        let config = TerminationConfig::default();
        let history = vec![IterationSnapshot {
            iteration: 1,
            confidence: 0.4,
            new_sources: 1,
            contradiction: Some(Contradiction {
                description: "minor phrasing mismatch".to_string(),
                severity: 0.2,
            }),
        }];
        assert_eq!(evaluate(&config, &history, 5), Decision::Continue);
    }

    #[test]
    fn termination_is_guaranteed_within_budget() {
        // Whatever the confidence trajectory, a loop that consults the
        // evaluator each iteration stops in at most max_iterations.
        let config = TerminationConfig::default();
        let max_iterations = 7;
        let mut history = Vec::new();
        for i in 1..=max_iterations {
            history.push(snapshot(i, 0.3 + 0.03 * f64::from(i), 1));
            if evaluate(&config, &history, max_iterations) != Decision::Continue {
                assert!(i <= max_iterations);
                return;
            }
        }
        panic!("loop failed to terminate within budget");
    }
}
