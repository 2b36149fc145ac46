use crate::error::RenderError;

/// Host-side view of the compute completion fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    /// Created signaled, not yet waited on
    Signaled,
    /// A wait returned: the last submission has completed
    Observed,
    /// Reset and not yet handed to a submission
    Armed,
    /// Handed to a compute submission that may still be executing
    InFlight,
}

/// Tracks the completion fence lifecycle and rejects out-of-order use:
/// a reset only follows an observed signal (at most once per observation)
/// and a submission only follows a reset.
#[derive(Debug, Clone)]
pub struct FenceTracker {
    state: FenceState,
    observations: u64,
    resets: u64,
    submissions: u64,
}

impl FenceTracker {
    pub fn new_signaled() -> Self {
        FenceTracker {
            state: FenceState::Signaled,
            observations: 0,
            resets: 0,
            submissions: 0,
        }
    }

    pub fn state(&self) -> FenceState {
        self.state
    }

    /// True when a wait is needed before the fence can be reused
    pub fn in_flight(&self) -> bool {
        self.state == FenceState::InFlight
    }

    pub fn check_wait(&self) -> Result<(), RenderError> {
        match self.state {
            FenceState::Armed => Err(RenderError::FenceMisuse(
                "waiting on a reset fence with no submission would never return",
            )),
            _ => Ok(()),
        }
    }

    pub fn mark_observed(&mut self) {
        if self.state != FenceState::Observed {
            self.observations += 1;
        }
        self.state = FenceState::Observed;
    }

    pub fn check_reset(&self) -> Result<(), RenderError> {
        match self.state {
            FenceState::Observed => Ok(()),
            FenceState::Signaled => Err(RenderError::FenceMisuse(
                "reset before the initial signal was observed",
            )),
            FenceState::Armed => Err(RenderError::FenceMisuse("fence reset twice")),
            FenceState::InFlight => Err(RenderError::FenceMisuse(
                "reset while a submission may still be executing",
            )),
        }
    }

    pub fn mark_reset(&mut self) {
        self.resets += 1;
        self.state = FenceState::Armed;
    }

    pub fn check_submit(&self) -> Result<(), RenderError> {
        match self.state {
            FenceState::Armed => Ok(()),
            _ => Err(RenderError::FenceMisuse(
                "compute submitted with a fence that was not reset",
            )),
        }
    }

    pub fn mark_submitted(&mut self) {
        self.submissions += 1;
        self.state = FenceState::InFlight;
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut fence = FenceTracker::new_signaled();
        fence.check_wait().unwrap();
        fence.mark_observed();
        fence.check_reset().unwrap();
        fence.mark_reset();
        fence.check_submit().unwrap();
        fence.mark_submitted();
        assert!(fence.in_flight());

        fence.check_wait().unwrap();
        fence.mark_observed();
        assert_eq!(fence.state(), FenceState::Observed);
        assert_eq!(fence.observations(), 2);
        assert_eq!(fence.resets(), 1);
        assert_eq!(fence.submissions(), 1);
    }

    #[test]
    fn test_reset_requires_observation() {
        let fence = FenceTracker::new_signaled();
        assert!(matches!(
            fence.check_reset(),
            Err(RenderError::FenceMisuse(_))
        ));
    }

    #[test]
    fn test_double_reset_rejected() {
        let mut fence = FenceTracker::new_signaled();
        fence.mark_observed();
        fence.mark_reset();
        assert!(fence.check_reset().is_err());
    }

    #[test]
    fn test_reset_in_flight_rejected() {
        let mut fence = FenceTracker::new_signaled();
        fence.mark_observed();
        fence.mark_reset();
        fence.mark_submitted();
        assert!(fence.check_reset().is_err());
    }

    #[test]
    fn test_wait_on_armed_fence_rejected() {
        let mut fence = FenceTracker::new_signaled();
        fence.mark_observed();
        fence.mark_reset();
        assert!(fence.check_wait().is_err());
    }

    #[test]
    fn test_submit_requires_reset() {
        let mut fence = FenceTracker::new_signaled();
        assert!(fence.check_submit().is_err());
        fence.mark_observed();
        assert!(fence.check_submit().is_err());
    }

    #[test]
    fn test_repeated_wait_counts_one_observation() {
        let mut fence = FenceTracker::new_signaled();
        fence.mark_observed();
        fence.mark_observed();
        assert_eq!(fence.observations(), 1);
    }
}
