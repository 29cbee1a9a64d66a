//! Lock poisoning helpers
//!
//! A poisoned lock means some thread panicked while holding it. The broker,
//! consumer and store modules turn that into their own `Synchronisation`
//! error variant instead of propagating the panic.

use std::sync::{LockResult, RwLockReadGuard, RwLockWriteGuard};

fn poison_message(lock: &str, detail: impl std::fmt::Debug) -> String {
    format!(
        "Internal synchronisation error ({lock} poisoned). A panic occurred while holding the lock. PoisonError: {detail:?}"
    )
}

/// Map a poisoned mutex into an application error
///
/// # Examples
/// ```
/// use std::sync::Mutex;
/// use clickstream_gateway::broker::BrokerError;
/// use clickstream_gateway::core::sync::handle_mutex_poison;
///
/// let mutex = Mutex::new(42);
/// let guard = handle_mutex_poison(
///     mutex.lock(),
///     |message| BrokerError::Synchronisation { message }
/// ).unwrap();
/// assert_eq!(*guard, 42);
/// ```
pub fn handle_mutex_poison<T, E>(
    result: LockResult<T>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<T, E> {
    result.map_err(|poison_err| error_constructor(poison_message("mutex", poison_err)))
}

/// Map a poisoned RwLock read into an application error
pub fn handle_rwlock_read<T, E>(
    result: LockResult<RwLockReadGuard<T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockReadGuard<T>, E> {
    result.map_err(|poison_err| error_constructor(poison_message("RwLock read", poison_err)))
}

/// Map a poisoned RwLock write into an application error
pub fn handle_rwlock_write<T, E>(
    result: LockResult<RwLockWriteGuard<T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockWriteGuard<T>, E> {
    result.map_err(|poison_err| error_constructor(poison_message("RwLock write", poison_err)))
}
