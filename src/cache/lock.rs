use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

/// Acquire a read guard, recovering the data if a writer panicked.
pub(crate) fn read_or_recover<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, owner, op, "read"))
}

/// Acquire a write guard, recovering the data if a writer panicked.
pub(crate) fn write_or_recover<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, owner, op, "write"))
}

fn recover<G>(
    poisoned: PoisonError<G>,
    owner: &'static str,
    op: &'static str,
    mode: &'static str,
) -> G {
    warn!(
        target = "tollgate::cache::lock",
        op,
        owner,
        mode,
        "recovered poisoned cache lock; entries may predate a panic in another task"
    );
    poisoned.into_inner()
}
