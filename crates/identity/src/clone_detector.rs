//! Signature-counter anti-clone policy.

use serde::{Deserialize, Serialize};
use zkpass_core::AuthenticatorInfo;

/// Result of comparing a presented counter with the stored one.
///
/// `CloneSuspected` is advisory. The authentication still succeeds and the
/// presented value is still stored; the caller decides what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterVerdict {
    Accept,
    CloneSuspected,
}

impl CounterVerdict {
    pub fn is_clone_suspected(&self) -> bool {
        matches!(self, CounterVerdict::CloneSuspected)
    }
}

pub struct CloneDetector;

impl CloneDetector {
    /// A stored counter of zero with no counter ever observed means the
    /// authenticator does not support counters, so anything is accepted.
    /// Otherwise the counter must strictly increase.
    pub fn check(stored: u32, counter_observed: bool, presented: u32) -> CounterVerdict {
        if (stored == 0 && !counter_observed) || presented > stored {
            CounterVerdict::Accept
        } else {
            CounterVerdict::CloneSuspected
        }
    }

    /// Run [`check`](Self::check) and fold the result into `info`.
    ///
    /// The clone warning is sticky: once set it is never cleared here.
    pub fn apply(info: &mut AuthenticatorInfo, presented: u32) -> CounterVerdict {
        let verdict = Self::check(info.sign_count, info.counter_observed, presented);
        if verdict.is_clone_suspected() {
            info.clone_warning = true;
        }
        if presented != 0 {
            info.counter_observed = true;
        }
        info.sign_count = presented;
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(sign_count: u32) -> AuthenticatorInfo {
        AuthenticatorInfo {
            aaguid: [0u8; 16],
            sign_count,
            counter_observed: sign_count != 0,
            clone_warning: false,
            attachment: None,
        }
    }

    #[test]
    fn test_counter_policy() {
        assert_eq!(CloneDetector::check(5, true, 6), CounterVerdict::Accept);
        assert_eq!(CloneDetector::check(5, true, 5), CounterVerdict::CloneSuspected);
        assert_eq!(CloneDetector::check(5, true, 3), CounterVerdict::CloneSuspected);
        assert_eq!(CloneDetector::check(0, false, 1), CounterVerdict::Accept);
        assert_eq!(CloneDetector::check(0, false, 0), CounterVerdict::Accept);
        assert_eq!(CloneDetector::check(0, true, 0), CounterVerdict::CloneSuspected);
    }

    #[test]
    fn test_reset_to_zero_keeps_flagging() {
        let mut info = info(0);
        assert_eq!(CloneDetector::apply(&mut info, 5), CounterVerdict::Accept);
        assert!(info.counter_observed);

        for _ in 0..2 {
            assert_eq!(
                CloneDetector::apply(&mut info, 0),
                CounterVerdict::CloneSuspected
            );
            assert_eq!(info.sign_count, 0);
        }
        assert!(info.counter_observed);
        assert!(info.clone_warning);
    }

    #[test]
    fn test_counterless_authenticator_never_flags() {
        let mut info = info(0);
        for _ in 0..3 {
            assert_eq!(CloneDetector::apply(&mut info, 0), CounterVerdict::Accept);
        }
        assert!(!info.counter_observed);
        assert!(!info.clone_warning);
    }

    #[test]
    fn test_apply_stores_presented_value() {
        let mut info = info(5);
        assert_eq!(CloneDetector::apply(&mut info, 9), CounterVerdict::Accept);
        assert_eq!(info.sign_count, 9);
        assert!(!info.clone_warning);

        assert_eq!(
            CloneDetector::apply(&mut info, 3),
            CounterVerdict::CloneSuspected
        );
        assert_eq!(info.sign_count, 3);
        assert!(info.clone_warning);
    }

    #[test]
    fn test_warning_is_sticky() {
        let mut info = info(5);
        CloneDetector::apply(&mut info, 5);
        assert!(info.clone_warning);

        assert_eq!(CloneDetector::apply(&mut info, 100), CounterVerdict::Accept);
        assert!(info.clone_warning);
    }
}
