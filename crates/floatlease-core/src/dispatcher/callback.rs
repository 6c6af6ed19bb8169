// # Callback Registration
//
// At most one callback per client. It is invoked from the dispatcher task
// with the state lock released, and a panic inside it is contained so the
// dispatcher keeps its bookkeeping intact.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

use crate::lease::LeaseEventKind;

type CallbackFn = dyn Fn(LeaseEventKind) + Send + Sync;

/// A registered notification callback
pub struct CallbackRegistration {
    callback: Box<CallbackFn>,
    has_context: bool,
}

impl CallbackRegistration {
    /// Register a plain callback
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(LeaseEventKind) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
            has_context: false,
        }
    }

    /// Register a callback that receives `context` with every notification
    pub fn with_context<F, C>(callback: F, context: C) -> Self
    where
        F: Fn(LeaseEventKind, &C) + Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        Self {
            callback: Box::new(move |kind| callback(kind, &context)),
            has_context: true,
        }
    }

    /// Whether the callback was registered with a user context
    pub fn has_context(&self) -> bool {
        self.has_context
    }

    /// Invoke the callback, containing any panic
    pub(crate) fn invoke(&self, kind: LeaseEventKind) {
        if catch_unwind(AssertUnwindSafe(|| (self.callback)(kind))).is_err() {
            error!("Lease callback panicked while handling {:?}", kind);
        }
    }
}

impl fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("has_context", &self.has_context)
            .finish_non_exhaustive()
    }
}

/// Holder for the current registration
#[derive(Debug, Default)]
pub(crate) struct CallbackSlot {
    current: Mutex<Option<Arc<CallbackRegistration>>>,
}

impl CallbackSlot {
    pub(crate) fn get(&self) -> Option<Arc<CallbackRegistration>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, registration: CallbackRegistration) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(registration));
    }

    pub(crate) fn is_set(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
