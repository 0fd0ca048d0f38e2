//! # Execution Contexts
//!
//! Every thread that touches scene objects declares which context it runs.
//! Core-only operations assert they are on the core context; a violation is
//! a fatal contract failure, never a silent race.

use std::cell::Cell;

/// The two logical threads of control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    /// Owns authoritative scene state; runs the frame loop.
    Simulation,
    /// Owns GPU-facing mirrors; applies sync packets and runs deferred work.
    Core,
}

thread_local! {
    static CURRENT: Cell<Option<ExecutionContext>> = const { Cell::new(None) };
}

/// Restores the previous context when dropped.
#[derive(Debug)]
#[must_use = "the context is left as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<ExecutionContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}

/// Tags the calling thread with `context` until the guard drops.
pub fn enter(context: ExecutionContext) -> ContextGuard {
    let previous = CURRENT.with(|c| c.replace(Some(context)));
    ContextGuard { previous }
}

/// Context of the calling thread, if it declared one.
#[inline]
#[must_use]
pub fn current() -> Option<ExecutionContext> {
    CURRENT.with(Cell::get)
}

/// True if the calling thread runs the core context.
#[inline]
#[must_use]
pub fn is_core() -> bool {
    current() == Some(ExecutionContext::Core)
}

/// Panics unless the calling thread is the core context.
///
/// # Panics
///
/// When called from any other context. `operation` names the core-only call
/// in the panic message.
#[inline]
pub fn assert_core_context(operation: &str) {
    assert!(
        is_core(),
        "{operation} is core-only but was called from {:?}",
        current()
    );
}
