//! Staleness arbitration.
//!
//! The single place that decides whether a snapshot is newer than what a
//! display already holds. Every channel funnels its candidates through
//! [`arbitrate`]; none of them compare versions on their own.

use crate::types::Version;

/// Outcome of comparing a candidate version against the held one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Strictly newer than the held version (or nothing is held yet).
    Accept,
    /// Equal to or older than the held version.
    Stale,
}

/// `candidate > held`, with `None` meaning "nothing received yet".
///
/// Ties are stale even when the payload differs.
pub fn accept(candidate: Version, held: Option<Version>) -> bool {
    match held {
        None => true,
        Some(held) => candidate > held,
    }
}

pub fn arbitrate(candidate: Version, held: Option<Version>) -> Verdict {
    if accept(candidate, held) {
        Verdict::Accept
    } else {
        Verdict::Stale
    }
}
