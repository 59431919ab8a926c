use super::RequestStatus;
use super::RequestStatus::*;

/// Targets reachable from `from` in one move (excluding staying put)
pub fn allowed_transitions(from: RequestStatus) -> &'static [RequestStatus] {
    match from {
        New => &[NeedsReview, Active, Scheduled, Paused, Closed],
        NeedsReview => &[New, Active, Scheduled, Paused, Closed],
        Active => &[Scheduled, InProgress, Paused, Resolved, Closed],
        Scheduled => &[Active, InProgress, Paused, Closed],
        InProgress => &[Scheduled, Paused, Resolved, Closed],
        Paused => &[Active, Scheduled, InProgress, Closed],
        Resolved => &[Active, Closed],
        Closed => &[Active],
    }
}

pub fn can_transition(from: RequestStatus, to: RequestStatus) -> bool {
    from == to || allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVERY: [RequestStatus; 8] = [New, NeedsReview, Active, Scheduled, InProgress, Paused, Resolved, Closed];

    #[test]
    fn same_status_is_a_noop() {
        for s in EVERY {
            assert!(can_transition(s, s));
        }
    }

    #[test]
    fn every_status_can_close_or_reopen() {
        for s in EVERY {
            if s != Closed {
                assert!(can_transition(s, Closed), "{} -> closed", s);
            }
        }
        assert!(can_transition(Closed, Active));
    }

    #[test]
    fn closed_only_reopens_to_active() {
        assert!(!can_transition(Closed, New));
        assert!(!can_transition(Closed, InProgress));
        assert!(!can_transition(Closed, Resolved));
    }

    #[test]
    fn new_requests_cannot_jump_to_in_progress() {
        assert!(!can_transition(New, InProgress));
        assert!(!can_transition(New, Resolved));
    }

    #[test]
    fn table_never_lists_self() {
        for s in EVERY {
            assert!(!allowed_transitions(s).contains(&s));
        }
    }
}
