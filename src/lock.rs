use std::sync::{Mutex, MutexGuard};

/// Lock `mutex`, taking the data anyway if a previous holder panicked. The
/// guarded state here is bookkeeping that stays consistent across a panic.
pub(crate) fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = what, "recovered poisoned mutex");
        poisoned.into_inner()
    })
}
