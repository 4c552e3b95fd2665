//! Service state machine.
//!
//! ```text
//! Idle → Starting → Running → Interrupted → Draining → Stopped
//!            │          │                       │
//!            └──────────┴───────→ Failed ←──────┘
//! ```

use std::fmt;
use tokio::sync::watch;

/// Lifecycle state of a [`Service`](crate::lifecycle::Service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Constructed, accepting configuration.
    Idle,
    /// Start invoked; binding the listener.
    Starting,
    /// Listener launched; waiting for a shutdown trigger.
    Running,
    /// A shutdown trigger was accepted.
    Interrupted,
    /// Listener closed; in-flight requests are finishing.
    Draining,
    /// Drain completed in time.
    Stopped,
    /// A fault ended the run.
    Failed,
}

impl State {
    /// Stopped and Failed end a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Stopped | State::Failed)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: State) -> bool {
        use State::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Interrupted)
                | (Running, Failed)
                | (Interrupted, Draining)
                | (Draining, Stopped)
                | (Draining, Failed)
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "idle",
            State::Starting => "starting",
            State::Running => "running",
            State::Interrupted => "interrupted",
            State::Draining => "draining",
            State::Stopped => "stopped",
            State::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared, observable state cell.
///
/// Every transition is a compare-and-set performed under the watch channel's
/// lock, so concurrent writers (controller, accept loop) cannot both win.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<State>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(State::Idle);
        Self { tx }
    }

    pub(crate) fn get(&self) -> State {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<State> {
        self.tx.subscribe()
    }

    /// Move to `next` if the current state has an edge to it.
    pub(crate) fn transition(&self, next: State) -> bool {
        self.transition_if(|current| current.can_transition_to(next), next)
    }

    /// Move to `next` only from one of the `from` states.
    pub(crate) fn transition_from(&self, from: &[State], next: State) -> bool {
        self.transition_if(
            |current| from.contains(&current) && current.can_transition_to(next),
            next,
        )
    }

    fn transition_if(&self, allowed: impl FnOnce(State) -> bool, next: State) -> bool {
        let mut previous = None;
        let changed = self.tx.send_if_modified(|current| {
            if allowed(*current) {
                previous = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });

        match previous {
            Some(from) => tracing::debug!(from = %from, to = %next, "State transition"),
            None => tracing::trace!(
                current = %self.get(),
                rejected = %next,
                "State transition rejected"
            ),
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        let cell = StateCell::new();
        for next in [
            State::Starting,
            State::Running,
            State::Interrupted,
            State::Draining,
            State::Stopped,
        ] {
            assert!(cell.transition(next), "transition to {next} rejected");
        }
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn no_step_is_skipped() {
        assert!(!State::Idle.can_transition_to(State::Running));
        assert!(!State::Running.can_transition_to(State::Draining));
        assert!(!State::Interrupted.can_transition_to(State::Stopped));
        assert!(!State::Interrupted.can_transition_to(State::Failed));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [State::Stopped, State::Failed] {
            for next in [
                State::Idle,
                State::Starting,
                State::Running,
                State::Interrupted,
                State::Draining,
                State::Stopped,
                State::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn transition_from_guards_the_source_state() {
        let cell = StateCell::new();
        cell.transition(State::Starting);
        cell.transition(State::Running);
        cell.transition(State::Interrupted);
        cell.transition(State::Draining);

        // Draining → Failed is an edge, but not from the accept-loop fault path.
        assert!(!cell.transition_from(&[State::Starting, State::Running], State::Failed));
        assert_eq!(cell.get(), State::Draining);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        cell.transition(State::Starting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), State::Starting);
    }
}
