//! Hot-swappable dependency slot.
//!
//! [`SwapSlot`] holds the *current* instance of a replaceable dependency.
//! The orchestrator clones the inner `Arc` once at the start of each
//! operation; the recovery supervisor replaces it with [`swap`].  An
//! in-flight operation therefore always completes against the instance it
//! captured, and the replacement takes effect from the next operation —
//! swapping never interrupts a running call.
//!
//! [`swap`]: SwapSlot::swap

use std::sync::{Arc, Mutex};

/// A replaceable `Arc` reference, read by the orchestrator and written only
/// by the recovery supervisor.
pub struct SwapSlot<T: ?Sized> {
    current: Mutex<Arc<T>>,
}

impl<T: ?Sized> SwapSlot<T> {
    pub fn new(initial: Arc<T>) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }

    /// Clone the current instance.  Call once at operation start and keep
    /// the clone for the whole operation.
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.current.lock().unwrap())
    }

    /// Replace the current instance.  The previous one is dropped once the
    /// last in-flight operation holding it finishes.
    pub fn swap(&self, next: Arc<T>) {
        *self.current.lock().unwrap() = next;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_initial_instance() {
        let initial = Arc::new(41_u32);
        let slot = SwapSlot::new(Arc::clone(&initial) as Arc<u32>);
        assert!(Arc::ptr_eq(&slot.get(), &initial));
    }

    #[test]
    fn swap_replaces_for_next_get() {
        let slot = SwapSlot::new(Arc::new(1_u32));
        let next = Arc::new(2_u32);
        slot.swap(Arc::clone(&next));
        assert!(Arc::ptr_eq(&slot.get(), &next));
    }

    #[test]
    fn clone_taken_before_swap_survives() {
        let first = Arc::new(String::from("first"));
        let slot = SwapSlot::new(Arc::clone(&first));

        // An "operation" captures its reference, then a swap happens.
        let in_flight = slot.get();
        slot.swap(Arc::new(String::from("second")));

        // The in-flight operation still sees the old instance; new
        // operations see the new one.
        assert_eq!(in_flight.as_str(), "first");
        assert_eq!(slot.get().as_str(), "second");
    }

    #[test]
    fn works_with_trait_objects() {
        trait Speak: Send + Sync {
            fn word(&self) -> &'static str;
        }
        struct A;
        struct B;
        impl Speak for A {
            fn word(&self) -> &'static str {
                "a"
            }
        }
        impl Speak for B {
            fn word(&self) -> &'static str {
                "b"
            }
        }

        let slot: SwapSlot<dyn Speak> = SwapSlot::new(Arc::new(A));
        assert_eq!(slot.get().word(), "a");
        slot.swap(Arc::new(B));
        assert_eq!(slot.get().word(), "b");
    }
}
