//! Three-way physical access status and the merge policy shared by every multi-phase operation.

use core::fmt;

use crate::error::AccessError;

/// Raw status code reported by a physical access primitive.
///
/// Codes inside `SCHED_FIRST..=SCHED_LAST` are scheduling requests aimed at the execution
/// driver (reschedule, halt, switch context, ...). A lower code in that range is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const SCHED_FIRST: StatusCode = StatusCode(1100);
    pub const SCHED_LAST: StatusCode = StatusCode(1199);

    #[inline]
    pub const fn is_scheduling(self) -> bool {
        self.0 >= Self::SCHED_FIRST.0 && self.0 <= Self::SCHED_LAST.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result classification of a single physical read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhysStatus {
    #[default]
    Ok,
    /// The access completed but carries a notice the caller must not discard.
    OkWithNotice(StatusCode),
    /// The access did not complete.
    Err(StatusCode),
}

impl PhysStatus {
    #[inline]
    pub fn is_success(self) -> bool {
        !matches!(self, PhysStatus::Err(_))
    }

    #[inline]
    pub fn notice(self) -> Option<StatusCode> {
        match self {
            PhysStatus::OkWithNotice(code) => Some(code),
            _ => None,
        }
    }

    /// Combine the accumulated status `self` with the status of a later phase.
    ///
    /// - A hard failure always wins. When both are failures the earlier one is kept.
    /// - `Ok` is the identity.
    /// - Two notices resolve to the more urgent one: scheduling-range codes outrank any other
    ///   notice, and within the same class the lower code wins. Equal codes pass through.
    ///   Two distinct notices outside the scheduling range are never escalated into an
    ///   internal-error failure; the higher code is dropped instead, so the step still
    ///   completes with one notice.
    ///
    /// The policy is commutative for every pair that does not contain two distinct failures.
    pub fn merge(self, next: PhysStatus) -> PhysStatus {
        match (self, next) {
            (PhysStatus::Err(code), _) | (_, PhysStatus::Err(code)) => PhysStatus::Err(code),
            (PhysStatus::Ok, other) | (other, PhysStatus::Ok) => other,
            (PhysStatus::OkWithNotice(a), PhysStatus::OkWithNotice(b)) => {
                PhysStatus::OkWithNotice(more_urgent(a, b))
            }
        }
    }

    /// Map onto the public result shape: notices stay successful, failures become
    /// [`AccessError::Handler`].
    pub fn into_result(self) -> Result<Option<StatusCode>, AccessError> {
        match self {
            PhysStatus::Ok => Ok(None),
            PhysStatus::OkWithNotice(code) => Ok(Some(code)),
            PhysStatus::Err(code) => Err(AccessError::Handler(code)),
        }
    }
}

fn more_urgent(a: StatusCode, b: StatusCode) -> StatusCode {
    let rank = |code: StatusCode| (!code.is_scheduling(), code);
    if rank(b) < rank(a) {
        b
    } else {
        a
    }
}
