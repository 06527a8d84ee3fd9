use std::sync::{Mutex as StdMutex, MutexGuard as StdMutexGuard};

/// A `Mutex` that recovers from a poisoned lock instead of panicking.
///
/// The pool never holds this lock across an `.await`, so a panicking
/// holder is the only way to poison it; recovering keeps one buggy
/// caller from wedging every other task sharing the pool.
pub struct Mutex<T>(StdMutex<T>);

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex(StdMutex::new(value))
    }

    pub fn lock(&self) -> StdMutexGuard<'_, T> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub use std::sync::MutexGuard;
