//! Per-resource lock table
//!
//! One logical mutex per lock key. Slots are created on first use and
//! removed as soon as nobody holds or waits on them, so high-cardinality keys
//! do not accumulate.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Slot {
    held: bool,
    waiters: usize,
}

/// Reference-counted key → lock table
#[derive(Debug, Default)]
pub struct LockTable {
    slots: Mutex<HashMap<String, Slot>>,
    released: Condvar,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it until the guard drops
    pub fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let mut slots = self.slots.lock();

        loop {
            let slot = slots.entry(key.to_string()).or_default();
            if !slot.held {
                slot.held = true;
                break;
            }

            slot.waiters += 1;
            self.released.wait(&mut slots);
            if let Some(slot) = slots.get_mut(key) {
                slot.waiters -= 1;
            }
        }

        KeyGuard {
            table: self,
            key: key.to_string(),
        }
    }

    /// Number of keys currently held or awaited
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn release(&self, key: &str) {
        let mut slots = self.slots.lock();
        let remove = match slots.get_mut(key) {
            Some(slot) => {
                slot.held = false;
                slot.waiters == 0
            }
            None => false,
        };
        if remove {
            slots.remove(key);
        }
        drop(slots);

        self.released.notify_all();
    }
}

/// Holds one key of a `LockTable`
#[derive(Debug)]
pub struct KeyGuard<'a> {
    table: &'a LockTable,
    key: String,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.key);
    }
}
