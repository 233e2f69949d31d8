//! Lock-protected value cells with change detection.
//!
//! Every piece of live state the master keeps about a supervised machine
//! (connection state, logged-in user, state flags, ...) is written by the
//! endpoint's event driver and read by operator requests that arrive on other
//! tasks.  An [`AttributeCell`] keeps the current value together with the value
//! it replaced, so a reader can ask "did this change since I last looked?"
//! without keeping its own copy.
//!
//! # Bounded lock wait
//!
//! No critical section in this module calls out to other code, so a lock that
//! cannot be acquired within [`LOCK_TIMEOUT`] means the program is deadlocked.
//! That situation is reported as [`ConcurrencyError`] and must not be retried.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::error;

/// Maximum time to wait for a cell's lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// The lock of an attribute cell could not be acquired in time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("could not lock attribute within {timeout:?}")]
pub struct ConcurrencyError {
    pub timeout: Duration,
}

#[derive(Debug)]
struct Slots<T> {
    old: T,
    current: T,
    changed: bool,
}

/// A current/previous value pair behind a mutex.
///
/// # Examples
///
/// ```rust
/// use classroom_core::AttributeCell;
///
/// let cell = AttributeCell::new(1u32);
/// cell.set(2, false).unwrap();
/// assert_eq!(cell.old().unwrap(), 1);
/// assert_eq!(cell.current().unwrap(), 2);
/// assert!(cell.has_changed().unwrap());
/// assert!(!cell.has_changed().unwrap());
/// ```
#[derive(Debug)]
pub struct AttributeCell<T> {
    slots: Mutex<Slots<T>>,
}

impl<T: Clone + PartialEq> AttributeCell<T> {
    /// Creates a cell whose old and current values are both `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            slots: Mutex::new(Slots {
                old: initial.clone(),
                current: initial,
                changed: false,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slots<T>>, ConcurrencyError> {
        self.slots.try_lock_for(LOCK_TIMEOUT).ok_or_else(|| {
            error!("attribute lock not acquired within {LOCK_TIMEOUT:?}");
            ConcurrencyError {
                timeout: LOCK_TIMEOUT,
            }
        })
    }

    /// Returns a copy of the current value.
    pub fn current(&self) -> Result<T, ConcurrencyError> {
        Ok(self.lock()?.current.clone())
    }

    /// Returns a copy of the value the current one replaced.
    pub fn old(&self) -> Result<T, ConcurrencyError> {
        Ok(self.lock()?.old.clone())
    }

    /// Stores `value` if it differs from the current value, or unconditionally
    /// when `force` is set.
    ///
    /// A write moves the previous current value into `old`.  A forced write of
    /// an identical value still counts as a change for [`has_changed`].
    ///
    /// [`has_changed`]: AttributeCell::has_changed
    pub fn set(&self, value: T, force: bool) -> Result<(), ConcurrencyError> {
        let mut slots = self.lock()?;
        if force || value != slots.current {
            let previous = std::mem::replace(&mut slots.current, value);
            slots.old = previous;
            slots.changed = true;
        }
        Ok(())
    }

    /// Reports whether a write happened since the last call, and rolls the
    /// old value forward to the current one.
    pub fn has_changed(&self) -> Result<bool, ConcurrencyError> {
        let mut slots = self.lock()?;
        let changed = slots.changed || slots.old != slots.current;
        slots.changed = false;
        slots.old = slots.current.clone();
        Ok(changed)
    }

    /// Overwrites both values with `initial` without recording a change.
    pub fn reset(&self, initial: T) -> Result<(), ConcurrencyError> {
        let mut slots = self.lock()?;
        slots.old = initial.clone();
        slots.current = initial;
        slots.changed = false;
        Ok(())
    }
}

impl<U: Clone + PartialEq> AttributeCell<Option<U>> {
    /// Creates a cell that holds no value yet.
    pub fn uninitialized() -> Self {
        Self::new(None)
    }

    /// Returns `true` once a value has been stored.
    pub fn is_initialized(&self) -> Result<bool, ConcurrencyError> {
        Ok(self.lock()?.current.is_some())
    }
}

impl<U: Clone + PartialEq> Default for AttributeCell<Option<U>> {
    fn default() -> Self {
        Self::uninitialized()
    }
}
