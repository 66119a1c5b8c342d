//! Job lifecycle states and the allowed moves between them.

use std::fmt;

use serde::{Deserialize, Serialize};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Submitting,
    Submitted,
    Running,
    Completing,
    Completed,
    Failed,
    Killed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Submitting => "submitting",
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Completing => "completing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "new" => Some(JobStatus::New),
            "submitting" => Some(JobStatus::Submitting),
            "submitted" => Some(JobStatus::Submitted),
            "running" => Some(JobStatus::Running),
            "completing" => Some(JobStatus::Completing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "killed" => Some(JobStatus::Killed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Killed)
    }

    /// States whose remote status is polled. A `Completing` job is skipped
    /// while its finalisation is in flight (see `JobRegistry::monitored_jobs`).
    pub fn is_monitored(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is a legal move. Staying put is not a move.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        if *self == next {
            return false;
        }
        if next == Killed {
            return !self.is_terminal();
        }
        match self {
            New | Submitting => matches!(next, Submitting | Submitted | Running | Completing | Failed),
            Submitted => matches!(next, Running | Completing | Completed | Failed),
            Running => matches!(next, Completing | Completed | Failed),
            Completing => matches!(next, Completed | Failed),
            // A terminal job only leaves through a resubmission attempt.
            Completed | Failed | Killed => next == Submitting,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


/// Aggregate status of a master job from its sub-jobs. `None` without
/// sub-jobs.
pub fn aggregate(children: &[JobStatus]) -> Option<JobStatus> {
    if children.is_empty() {
        return None;
    }
    let all = |s: JobStatus| children.iter().all(|c| *c == s);
    let any = |s: JobStatus| children.contains(&s);

    let status = if all(JobStatus::Completed) {
        JobStatus::Completed
    } else if children.iter().all(|c| c.is_terminal()) {
        if any(JobStatus::Failed) {
            JobStatus::Failed
        } else {
            JobStatus::Killed
        }
    } else if any(JobStatus::Running) || any(JobStatus::Completing) {
        JobStatus::Running
    } else if any(JobStatus::Submitting) {
        JobStatus::Submitting
    } else {
        JobStatus::Submitted
    };
    Some(status)
}


#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    #[test]
    fn names_round_trip() {
        for s in [New, Submitting, Submitted, Running, Completing, Completed, Failed, Killed] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("removed"), None);
    }

    #[test]
    fn success_path_is_allowed() {
        assert!(New.can_transition_to(Submitting));
        assert!(Submitting.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Running));
        assert!(Running.can_transition_to(Completing));
        assert!(Completing.can_transition_to(Completed));
    }

    #[test]
    fn terminal_states_only_allow_resubmission() {
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Submitted));
        assert!(!Killed.can_transition_to(Killed));
        assert!(Failed.can_transition_to(Submitting));
    }

    #[test]
    fn kill_from_any_active_state() {
        for s in [New, Submitting, Submitted, Running, Completing] {
            assert!(s.can_transition_to(Killed), "{} -> killed", s);
        }
    }

    #[test]
    fn no_backwards_moves() {
        assert!(!Running.can_transition_to(Submitted));
        assert!(!Completing.can_transition_to(Running));
    }

    #[test]
    fn monitored_states() {
        assert!(Submitted.is_monitored());
        assert!(Running.is_monitored());
        assert!(Completing.is_monitored());
        assert!(!Failed.is_monitored());
    }

    #[test]
    fn aggregate_rules() {
        assert_eq!(aggregate(&[]), None);
        assert_eq!(aggregate(&[Completed, Completed]), Some(Completed));
        assert_eq!(aggregate(&[Completed, Failed, Killed]), Some(Failed));
        assert_eq!(aggregate(&[Completed, Killed]), Some(Killed));
        assert_eq!(aggregate(&[Submitted, Completing]), Some(Running));
        assert_eq!(aggregate(&[Submitted, Submitting, Completed]), Some(Submitting));
        assert_eq!(aggregate(&[Submitted, Completed]), Some(Submitted));
    }
}
