//! Small lock helpers shared by devices and combinators.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

///Locks a mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

///A value that can be taken out exactly once, e.g. the receiving half of a stream
/// or the sending half a `run` loop owns.
pub struct TakeOnce<T> {
    value: Mutex<Option<T>>,
}

impl<T> TakeOnce<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }

    pub fn take(&self) -> Option<T> {
        lock(&self.value).take()
    }

    pub fn is_taken(&self) -> bool {
        lock(&self.value).is_none()
    }
}
