//! Event/Completion (spec §4.H): a single-shot async completion signal
//! a driver (or the CPU executor) uses to tell a caller a dispatched
//! request is done, grounded on `original_source/nn/runtime/Event.h`'s
//! condition-variable based design.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, ErrorKind, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EventState {
    Pending,
    Signaled,
}

struct Inner {
    state: Mutex<EventState>,
    result: Mutex<Option<std::result::Result<(), ErrorKind>>>,
    condvar: Condvar,
}

/// The waiting half of an event pair.
#[derive(Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

/// The signaling half of an event pair, held by whoever runs the work.
pub struct Completer {
    inner: Arc<Inner>,
}

/// Create a fresh, unsignaled event pair.
pub fn event_pair() -> (Event, Completer) {
    let inner = Arc::new(Inner {
        state: Mutex::new(EventState::Pending),
        result: Mutex::new(None),
        condvar: Condvar::new(),
    });
    (
        Event {
            inner: inner.clone(),
        },
        Completer { inner },
    )
}

impl Event {
    /// Block until signaled, then return the outcome the completer set.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        while *state != EventState::Signaled {
            state = self.inner.condvar.wait(state).unwrap();
        }
        drop(state);
        self.outcome()
    }

    /// Non-blocking poll: `Some(outcome)` once signaled, `None` while
    /// still pending.
    pub fn try_wait(&self) -> Option<Result<()>> {
        let state = self.inner.state.lock().unwrap();
        if *state == EventState::Signaled {
            drop(state);
            Some(self.outcome())
        } else {
            None
        }
    }

    fn outcome(&self) -> Result<()> {
        match self.inner.result.lock().unwrap().as_ref() {
            Some(Ok(())) => Ok(()),
            Some(Err(kind)) => Err(Error::new(*kind, "execution reported failure")),
            None => Err(Error::bad_state("event signaled without a recorded outcome")),
        }
    }
}

impl Completer {
    /// Record the outcome and wake every waiter. A completer that is
    /// dropped without calling this signals `BadState` to waiters.
    pub fn signal(self, outcome: std::result::Result<(), ErrorKind>) {
        *self.inner.result.lock().unwrap() = Some(outcome);
        *self.inner.state.lock().unwrap() = EventState::Signaled;
        self.inner.condvar.notify_all();
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap();
        if *state != EventState::Signaled {
            *self.inner.result.lock().unwrap() = Some(Err(ErrorKind::BadState));
            *state = EventState::Signaled;
            self.inner.condvar.notify_all();
        }
    }
}
