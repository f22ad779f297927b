/// Counts consecutive failures of the accept loop. Once the count reaches the threshold, every
///  further failure reports the current mass - only a success resets it.
#[derive(Debug)]
pub struct ErrorMass {
    mass: usize,
    threshold: usize,
}

impl ErrorMass {
    /// A threshold of 0 disables reporting altogether
    pub fn new(threshold: usize) -> ErrorMass {
        ErrorMass {
            mass: 0,
            threshold,
        }
    }

    pub fn mass(&self) -> usize {
        self.mass
    }

    pub fn on_success(&mut self) {
        self.mass = 0;
    }

    /// Registers a failure, returning the new mass if it is at or above the threshold
    #[must_use]
    pub fn on_failure(&mut self) -> Option<usize> {
        self.mass = self.mass.saturating_add(1);
        if self.threshold > 0 && self.mass >= self.threshold {
            Some(self.mass)
        }
        else {
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::below(3, 0, None, 1)]
    #[case::just_below(3, 1, None, 2)]
    #[case::reaching(3, 2, Some(3), 3)]
    #[case::above(3, 3, Some(4), 4)]
    #[case::way_above(3, 99, Some(100), 100)]
    #[case::threshold_one(1, 0, Some(1), 1)]
    #[case::disabled(0, 0, None, 1)]
    #[case::disabled_high(0, 1000, None, 1001)]
    fn test_on_failure(#[case] threshold: usize, #[case] mass: usize, #[case] expected_result: Option<usize>, #[case] expected_mass: usize) {
        let mut error_mass = ErrorMass { mass, threshold };
        assert_eq!(error_mass.on_failure(), expected_result);
        assert_eq!(error_mass.mass(), expected_mass);
    }

    #[test]
    fn test_success_resets() {
        let mut error_mass = ErrorMass::new(2);
        assert_eq!(error_mass.on_failure(), None);
        assert_eq!(error_mass.on_failure(), Some(2));
        assert_eq!(error_mass.on_failure(), Some(3));

        error_mass.on_success();
        assert_eq!(error_mass.mass(), 0);
        assert_eq!(error_mass.on_failure(), None);
        assert_eq!(error_mass.on_failure(), Some(2));
    }
}
