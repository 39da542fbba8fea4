use crate::config::StopCriteria;
use crate::coverage::CoverageDefinition;

use super::StopReason;

/// State of the cover that stop criteria look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub selected: usize,
    pub diphone_saturated: bool,
    pub prosody_saturated: bool,
}

impl Progress {
    pub fn of(num_selected: usize, coverage: &CoverageDefinition) -> Self {
        Self {
            selected: num_selected,
            diphone_saturated: coverage.reached_diphone_saturation(),
            prosody_saturated: coverage.reached_prosody_saturation(),
        }
    }
}

/// `max_selected` fires on its own. Saturation fires only once every
/// enabled saturation criterion holds, so prosody saturation never ends a
/// run whose diphone criterion is still open.
pub fn evaluate(criteria: &StopCriteria, progress: Progress) -> Option<StopReason> {
    if criteria
        .max_selected
        .is_some_and(|max| progress.selected >= max)
    {
        return Some(StopReason::MaxSelected);
    }

    let saturation = [
        (criteria.diphone_saturation, progress.diphone_saturated),
        (criteria.prosody_saturation, progress.prosody_saturated),
    ];
    let any_enabled = saturation.iter().any(|&(enabled, _)| enabled);
    let all_hold = saturation.iter().all(|&(enabled, reached)| !enabled || reached);
    log::debug!(
        "Stop check: {} selected, diphones saturated {}, prosody saturated {}",
        progress.selected,
        progress.diphone_saturated,
        progress.prosody_saturated
    );
    (any_enabled && all_hold).then_some(StopReason::Saturated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(selected: usize, diphone: bool, prosody: bool) -> Progress {
        Progress {
            selected,
            diphone_saturated: diphone,
            prosody_saturated: prosody,
        }
    }

    #[test]
    fn max_selected_fires_alone() {
        let criteria = StopCriteria::max_selected(3);
        assert_eq!(evaluate(&criteria, progress(2, true, true)), None);
        assert_eq!(
            evaluate(&criteria, progress(3, false, false)),
            Some(StopReason::MaxSelected)
        );
    }

    #[test]
    fn prosody_saturation_waits_for_diphone_saturation() {
        let criteria = StopCriteria {
            max_selected: None,
            diphone_saturation: true,
            prosody_saturation: true,
        };
        assert_eq!(evaluate(&criteria, progress(5, false, true)), None);
        assert_eq!(evaluate(&criteria, progress(5, true, false)), None);
        assert_eq!(
            evaluate(&criteria, progress(5, true, true)),
            Some(StopReason::Saturated)
        );
    }

    #[test]
    fn single_saturation_criterion() {
        let diphones = StopCriteria {
            diphone_saturation: true,
            ..Default::default()
        };
        assert_eq!(
            evaluate(&diphones, progress(1, true, false)),
            Some(StopReason::Saturated)
        );

        let prosody = StopCriteria {
            prosody_saturation: true,
            ..Default::default()
        };
        assert_eq!(evaluate(&prosody, progress(1, true, false)), None);
        assert_eq!(
            evaluate(&prosody, progress(1, false, true)),
            Some(StopReason::Saturated)
        );
    }

    #[test]
    fn max_selected_wins_over_open_saturation() {
        let criteria: StopCriteria = "numSentences 2 simpleDiphones simpleProsody".parse().unwrap();
        assert_eq!(
            evaluate(&criteria, progress(2, false, false)),
            Some(StopReason::MaxSelected)
        );
    }
}
