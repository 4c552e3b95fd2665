//! Lifecycle hook registry.
//!
//! Four single-slot callbacks. Setting a slot again replaces the previous
//! callback. Hooks may run on the accept-loop task, so they must be
//! `Send + Sync`.

use std::fmt;

use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::signals::Signal;

type Callback = Box<dyn Fn() + Send + Sync>;
type FailCallback = Box<dyn Fn(&LifecycleError) + Send + Sync>;
type InterruptCallback = Box<dyn Fn(Signal) + Send + Sync>;

/// Caller-supplied transition callbacks.
#[derive(Default)]
pub struct Hooks {
    on_start: Option<Callback>,
    on_exit: Option<Callback>,
    on_fail: Option<FailCallback>,
    on_interrupt: Option<InterruptCallback>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked once the accept loop has been launched.
    pub fn set_on_start(&mut self, f: impl Fn() + Send + Sync + 'static) {
        self.on_start = Some(Box::new(f));
    }

    /// Invoked when draining is about to begin, for every trigger source.
    pub fn set_on_exit(&mut self, f: impl Fn() + Send + Sync + 'static) {
        self.on_exit = Some(Box::new(f));
    }

    /// Invoked with the fault that ended the run.
    pub fn set_on_fail(&mut self, f: impl Fn(&LifecycleError) + Send + Sync + 'static) {
        self.on_fail = Some(Box::new(f));
    }

    /// Invoked with the OS signal that triggered shutdown.
    pub fn set_on_interrupt(&mut self, f: impl Fn(Signal) + Send + Sync + 'static) {
        self.on_interrupt = Some(Box::new(f));
    }

    pub(crate) fn start(&self) {
        if let Some(f) = &self.on_start {
            f();
        }
    }

    pub(crate) fn exit(&self) {
        if let Some(f) = &self.on_exit {
            f();
        }
    }

    pub(crate) fn fail(&self, err: &LifecycleError) {
        tracing::error!(kind = err.kind(), error = %err, "Lifecycle fault");
        match &self.on_fail {
            Some(f) => f(err),
            None => tracing::debug!("No on_fail hook registered"),
        }
    }

    pub(crate) fn interrupt(&self, signal: Signal) {
        if let Some(f) = &self.on_interrupt {
            f(signal);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .field("on_interrupt", &self.on_interrupt.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn last_assignment_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut hooks = Hooks::new();
        let f = first.clone();
        hooks.set_on_exit(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        hooks.set_on_exit(move || {
            s.fetch_add(1, Ordering::SeqCst);
        });

        hooks.exit();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unset_hooks_are_skipped() {
        let hooks = Hooks::new();
        hooks.start();
        hooks.exit();
        hooks.interrupt(Signal::Terminate);
        hooks.fail(&LifecycleError::Close("boom".into()));
    }

    #[test]
    fn interrupt_receives_the_signal() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let mut hooks = Hooks::new();
        let s = seen.clone();
        hooks.set_on_interrupt(move |sig| {
            *s.lock().unwrap() = Some(sig);
        });
        hooks.interrupt(Signal::User1);
        assert_eq!(*seen.lock().unwrap(), Some(Signal::User1));
    }

    #[test]
    fn debug_shows_which_slots_are_set() {
        let mut hooks = Hooks::new();
        hooks.set_on_start(|| {});
        let debug = format!("{hooks:?}");
        assert!(debug.contains("on_start: true"));
        assert!(debug.contains("on_fail: false"));
    }
}
