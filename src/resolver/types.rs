//! Resolver types.

use crate::channels::DisplayParams;
use crate::types::{LiveState, Person, Settings, Subject, Version};

/// Lifecycle of a display's resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolverState {
    /// Nothing attempted yet.
    Uninitialized,
    /// Channels queried or subscribed, nothing accepted.
    Subscribed,
    /// Holding an accepted snapshot. Re-entered on every adoption.
    Converged,
}

/// How a display learns about changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResolveMode {
    /// Push subscriptions where a channel can notify, polling for the rest.
    #[default]
    Listen,
    /// Poll every channel at the interval; no listeners. For embeds that
    /// cannot receive messages.
    Poll,
}

impl ResolveMode {
    pub fn from_params(params: &DisplayParams) -> Self {
        if params.receiver {
            ResolveMode::Poll
        } else {
            ResolveMode::Listen
        }
    }
}

/// Result of offering a candidate to the resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adoption {
    Accepted,
    /// Not strictly newer than what is held. Not an error.
    Stale { held: Version },
}

/// What the renderer should draw.
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayView {
    /// Nothing accepted yet.
    Waiting,
    /// An accepted snapshot with nobody live.
    Blank,
    Show { person: Person, settings: Settings },
}

impl DisplayView {
    pub fn from_state(state: &LiveState) -> Self {
        match state.subject() {
            Subject::Person(person) => DisplayView::Show {
                person: person.clone(),
                settings: state.settings().clone(),
            },
            Subject::Empty => DisplayView::Blank,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, DisplayView::Waiting)
    }
}

/// Draws accepted snapshots.
///
/// Called with the resolver's held state locked, in adoption order. Must
/// not call back into the resolver.
pub trait Renderer: Send + Sync {
    fn render(&self, view: &DisplayView);
}

impl<F> Renderer for F
where
    F: Fn(&DisplayView) + Send + Sync,
{
    fn render(&self, view: &DisplayView) {
        self(view)
    }
}
