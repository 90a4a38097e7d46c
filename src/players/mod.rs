//! # Players
//!
//! Directory of logged-in players and chat fan-out.
//!
//! The registry is the only state shared between connection tasks. It is a
//! single reader-writer lock over an insertion-ordered list: broadcasts and
//! status queries share the read lock, joins and leaves take the write lock.
//!
//! A [`Player`] never owns its session. It holds a bounded mailbox sender;
//! the connection task that owns the session drains the mailbox and writes
//! the packets, so a broadcast never touches another task's stream.
//!
//! ## Lock poisoning
//! A panic while a lock is held poisons it. Lock acquisition here logs a
//! warning, clears the poison and retries, so registry access always
//! eventually succeeds.

pub mod chat;
pub mod player;
pub mod registry;

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub use chat::{ChatBroadcaster, ChatComponent, ChatType};
pub use player::{ChatMode, ChatSettings, KeepAlive, Outbound, Player, PlayerId};
pub use registry::PlayerRegistry;

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    loop {
        match lock.read() {
            Ok(guard) => return guard,
            Err(_) => {
                warn!("Read lock poisoned, clearing and retrying");
                lock.clear_poison();
            }
        }
    }
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    loop {
        match lock.write() {
            Ok(guard) => return guard,
            Err(_) => {
                warn!("Write lock poisoned, clearing and retrying");
                lock.clear_poison();
            }
        }
    }
}

pub(crate) fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    loop {
        match lock.lock() {
            Ok(guard) => return guard,
            Err(_) => {
                warn!("Mutex poisoned, clearing and retrying");
                lock.clear_poison();
            }
        }
    }
}
