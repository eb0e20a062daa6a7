//! Per-thread context stacks.
//!
//! A [`LocalStack`] is meant to live inside a `thread_local!`, giving each
//! worker thread its own independent stack of context frames.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::error::{ContextError, ContextResult};

/// A LIFO stack of shared context frames.
pub struct LocalStack<T> {
    name: &'static str,
    frames: RefCell<Vec<Arc<T>>>,
}

impl<T> LocalStack<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            frames: RefCell::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push(&self, frame: Arc<T>) {
        self.frames.borrow_mut().push(frame);
    }

    /// Removes and returns the top frame.
    pub fn pop(&self) -> ContextResult<Arc<T>> {
        self.frames
            .borrow_mut()
            .pop()
            .ok_or(ContextError::EmptyStack { stack: self.name })
    }

    /// Returns the top frame without removing it.
    pub fn top(&self) -> Option<Arc<T>> {
        self.frames.borrow().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.borrow().is_empty()
    }

    /// Returns `true` if `frame` is anywhere on the stack.
    pub fn contains(&self, frame: &Arc<T>) -> bool {
        self.frames.borrow().iter().any(|f| Arc::ptr_eq(f, frame))
    }
}

impl<T: fmt::Debug> LocalStack<T> {
    /// Fails unless `expected` is the top frame.
    pub fn ensure_top(&self, expected: &Arc<T>) -> ContextResult<()> {
        match self.frames.borrow().last() {
            None => Err(ContextError::EmptyStack { stack: self.name }),
            Some(top) if !Arc::ptr_eq(top, expected) => Err(ContextError::OutOfOrder {
                stack: self.name,
                expected: format!("{expected:?}"),
                found: format!("{top:?}"),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Pops the top frame, which must be `expected`.
    ///
    /// The stack is left untouched when the top is a different frame.
    pub fn pop_expected(&self, expected: &Arc<T>) -> ContextResult<Arc<T>> {
        self.ensure_top(expected)?;
        self.pop()
    }
}

impl<T> fmt::Debug for LocalStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStack")
            .field("name", &self.name)
            .field("depth", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Frame(u32);

    thread_local! {
        static STACK: LocalStack<Frame> = const { LocalStack::new("test") };
    }

    #[test]
    fn test_push_pop_lifo() {
        STACK.with(|stack| {
            let a = Arc::new(Frame(1));
            let b = Arc::new(Frame(2));
            stack.push(a.clone());
            stack.push(b.clone());
            assert_eq!(stack.len(), 2);
            assert_eq!(stack.top().unwrap().0, 2);

            assert!(Arc::ptr_eq(&stack.pop_expected(&b).unwrap(), &b));
            assert!(Arc::ptr_eq(&stack.pop_expected(&a).unwrap(), &a));
            assert!(stack.is_empty());
        });
    }

    #[test]
    fn test_out_of_order_pop_is_rejected() {
        STACK.with(|stack| {
            let a = Arc::new(Frame(1));
            let b = Arc::new(Frame(2));
            stack.push(a.clone());
            stack.push(b.clone());

            let err = stack.pop_expected(&a).unwrap_err();
            assert!(matches!(err, ContextError::OutOfOrder { stack: "test", .. }));
            assert_eq!(stack.len(), 2);

            stack.pop_expected(&b).unwrap();
            stack.pop_expected(&a).unwrap();
        });
    }

    #[test]
    fn test_empty_pop() {
        STACK.with(|stack| {
            assert_eq!(
                stack.pop().unwrap_err(),
                ContextError::EmptyStack { stack: "test" }
            );
        });
    }

    #[test]
    fn test_stacks_are_thread_local() {
        STACK.with(|stack| stack.push(Arc::new(Frame(7))));
        std::thread::spawn(|| STACK.with(|stack| assert!(stack.is_empty())))
            .join()
            .unwrap();
        STACK.with(|stack| stack.pop().unwrap());
    }
}
