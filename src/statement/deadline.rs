use std::time::Duration;

use crate::clock::Clock;
use crate::context::TransactionDeadline;

/// Native timeout after applying a deadline with `remaining` time left.
///
/// Only ever tightens: an existing timeout shorter than `remaining` is kept.
#[must_use]
pub fn tightened_timeout(existing: Option<Duration>, remaining: Duration) -> Duration {
    match existing {
        Some(current) if current <= remaining => current,
        _ => remaining,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Budget {
    Unlimited,
    Remaining(Duration),
    Exhausted,
}

/// Checks one execution against the transaction deadline, before and after the driver call.
pub(crate) struct DeadlineGuard<'a> {
    deadline: Option<&'a TransactionDeadline>,
    clock: &'a dyn Clock,
}

impl<'a> DeadlineGuard<'a> {
    pub(crate) fn new(deadline: Option<&'a TransactionDeadline>, clock: &'a dyn Clock) -> Self {
        Self { deadline, clock }
    }

    pub(crate) fn budget(&self) -> Budget {
        let Some(deadline) = self.deadline else {
            return Budget::Unlimited;
        };
        match deadline.remaining(self.clock.now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => Budget::Remaining(remaining),
            _ => Budget::Exhausted,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| deadline.is_expired(self.clock.now()))
    }
}
