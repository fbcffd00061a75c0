//! Compute Context
//!
//! The compute context tracks which getters are currently being computed on
//! this thread. It serves two purposes:
//!
//! - Cycle detection: a getter that reads itself, directly or through other
//!   getters, is refused instead of recursing until the stack overflows.
//! - Diagnostics: a state write issued while a getter is computing is legal
//!   but almost always a bug, so the batching layer logs it.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering a getter pushes a frame; the guard
//! returned by [`ComputeContext::enter`] pops it when dropped, which keeps
//! the stack balanced even if the computation panics.

use std::cell::RefCell;

thread_local! {
    static COMPUTE_STACK: RefCell<Vec<ComputeFrame>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the compute stack.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ComputeFrame {
    /// Identity of the getter cache that owns the getter.
    cache: u64,
    /// Getter name.
    getter: String,
}

/// Guard that pops the compute frame when dropped.
pub(crate) struct ComputeContext {
    cache: u64,
}

impl ComputeContext {
    /// Enter a getter computation.
    ///
    /// Returns `None` when the same getter of the same cache is already
    /// being computed further up the stack.
    pub(crate) fn enter(cache: u64, getter: &str) -> Option<Self> {
        COMPUTE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack
                .iter()
                .any(|frame| frame.cache == cache && frame.getter == getter)
            {
                return None;
            }
            stack.push(ComputeFrame {
                cache,
                getter: getter.to_string(),
            });
            Some(Self { cache })
        })
    }

    /// Name of the innermost getter being computed, if any.
    pub(crate) fn current_getter() -> Option<String> {
        COMPUTE_STACK.with(|stack| stack.borrow().last().map(|frame| frame.getter.clone()))
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        COMPUTE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.cache, self.cache,
                    "ComputeContext mismatch: expected cache {}, got {}",
                    self.cache, frame.cache
                );
            }
        });
    }
}
