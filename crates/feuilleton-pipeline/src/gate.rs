//! Quality gate: the decision node between critic and end/revise.

use feuilleton::types::ContinuityValidation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Done,
    Revise,
}

/// First matching rule wins:
/// 1. revision budget exhausted → done,
/// 2. blocking validation → revise,
/// 3. coherence below threshold → revise,
/// 4. missing plot points or forbidden violations → revise,
/// 5. critic score at or above threshold → done,
/// 6. otherwise → revise.
#[must_use]
pub fn quality_gate(
    critic_score: f64,
    validation: &ContinuityValidation,
    revision_count: u32,
    max_revisions: u32,
    score_threshold: f64,
    coherence_threshold: f64,
) -> GateDecision {
    if revision_count >= max_revisions {
        return GateDecision::Done;
    }
    if validation.blocking {
        return GateDecision::Revise;
    }
    if validation.coherence_score < coherence_threshold {
        return GateDecision::Revise;
    }
    if !validation.plot_point_validation.is_clean() {
        return GateDecision::Revise;
    }
    if critic_score >= score_threshold {
        return GateDecision::Done;
    }
    GateDecision::Revise
}

#[cfg(test)]
mod tests {
    use super::*;
    use feuilleton::types::PlotPointValidation;

    fn clean_validation(coherence: f64) -> ContinuityValidation {
        ContinuityValidation {
            coherence_score: coherence,
            ..Default::default()
        }
    }

    #[test]
    fn exhausted_budget_always_terminates() {
        let mut validation = clean_validation(1.0);
        validation.blocking = true;
        assert_eq!(
            quality_gate(0.0, &validation, 2, 2, 7.0, 6.0),
            GateDecision::Done
        );
    }

    #[test]
    fn blocking_beats_good_score() {
        let mut validation = clean_validation(9.0);
        validation.blocking = true;
        assert_eq!(
            quality_gate(9.5, &validation, 0, 2, 7.0, 6.0),
            GateDecision::Revise
        );
    }

    #[test]
    fn low_coherence_revises() {
        assert_eq!(
            quality_gate(9.5, &clean_validation(5.9), 0, 2, 7.0, 6.0),
            GateDecision::Revise
        );
    }

    #[test]
    fn plot_gaps_revise() {
        let mut validation = clean_validation(8.0);
        validation.plot_point_validation = PlotPointValidation {
            missing_points: vec!["reveal-letter".to_string()],
            ..Default::default()
        };
        assert_eq!(
            quality_gate(9.0, &validation, 0, 2, 7.0, 6.0),
            GateDecision::Revise
        );
    }

    #[test]
    fn good_score_terminates() {
        assert_eq!(
            quality_gate(7.0, &clean_validation(8.0), 0, 2, 7.0, 6.0),
            GateDecision::Done
        );
    }

    #[test]
    fn mediocre_score_revises() {
        assert_eq!(
            quality_gate(6.9, &clean_validation(8.0), 0, 2, 7.0, 6.0),
            GateDecision::Revise
        );
    }

    #[test]
    fn gate_terminates_within_budget() {
        // Invariant: with a strictly increasing revision count the loop is
        // bounded by max_revisions whatever the scores do.
        let validation = ContinuityValidation {
            blocking: true,
            ..Default::default()
        };
        let max_revisions = 3;
        let mut revision_count = 0;
        let mut iterations = 0;
        loop {
            iterations += 1;
            revision_count += 1; // the critic increments every pass
            match quality_gate(0.0, &validation, revision_count, max_revisions, 7.0, 6.0) {
                GateDecision::Done => break,
                GateDecision::Revise => {}
            }
            assert!(iterations < 100);
        }
        assert_eq!(iterations, max_revisions as usize);
    }
}
