//! Deployment locking.
//!
//! Cross-process coordination over one on-disk deployment is delegated
//! to a host-provided [`DeployLock`]. The kernel acquires before mutating
//! persisted configuration and releases on every exit path via RAII
//! guards. Escalation from shared to exclusive retries a bounded number
//! of times with fixed backoff before surfacing a timeout.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ExecError, ExecResult};

/// Lock mode requested on a deployment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn label(&self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }
}

/// Host-provided lock primitive. `try_acquire` returns `false` when the
/// lock is currently held incompatibly, `Err` only on collaborator
/// failure.
pub trait DeployLock {
    fn try_acquire(&self, name: &str, mode: LockMode) -> ExecResult<bool>;
    fn release(&self, name: &str, mode: LockMode) -> ExecResult<()>;
}

/// Policy wrapper adding bounded retry and backoff over a [`DeployLock`].
pub struct LockManager<L: DeployLock> {
    lock: L,
    attempts: u32,
    backoff: Duration,
}

impl<L: DeployLock> LockManager<L> {
    pub const DEFAULT_ATTEMPTS: u32 = 10;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

    pub fn new(lock: L) -> Self {
        Self {
            lock,
            attempts: Self::DEFAULT_ATTEMPTS,
            backoff: Self::DEFAULT_BACKOFF,
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts;
        self.backoff = backoff;
        self
    }

    pub fn acquire_shared(&self, name: &str) -> ExecResult<LockGuard<'_, L>> {
        self.acquire(name, LockMode::Shared)
    }

    pub fn acquire_exclusive(&self, name: &str) -> ExecResult<LockGuard<'_, L>> {
        self.acquire(name, LockMode::Exclusive)
    }

    /// Upgrade a held shared lock to exclusive. The shared lock is
    /// released first; on timeout the caller is left holding nothing.
    pub fn escalate(&self, guard: LockGuard<'_, L>) -> ExecResult<LockGuard<'_, L>> {
        let name = guard.name.clone();
        drop(guard);
        self.acquire(&name, LockMode::Exclusive)
    }

    fn acquire(&self, name: &str, mode: LockMode) -> ExecResult<LockGuard<'_, L>> {
        for attempt in 1..=self.attempts {
            if self.lock.try_acquire(name, mode)? {
                debug!(name, mode = mode.label(), attempt, "lock acquired");
                return Ok(LockGuard {
                    manager: self,
                    name: name.to_string(),
                    mode,
                });
            }
            if attempt < self.attempts {
                std::thread::sleep(self.backoff);
            }
        }
        Err(ExecError::LockTimeout {
            name: name.to_string(),
            mode: mode.label(),
            attempts: self.attempts,
        })
    }
}

/// Held lock; released on drop, so every exit path releases.
pub struct LockGuard<'a, L: DeployLock> {
    manager: &'a LockManager<L>,
    name: String,
    mode: LockMode,
}

impl<L: DeployLock> LockGuard<'_, L> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl<L: DeployLock> std::fmt::Debug for LockGuard<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

impl<L: DeployLock> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.lock.release(&self.name, self.mode) {
            warn!(name = %self.name, error = %e, "failed to release deployment lock");
        }
    }
}

pub mod memory {
    //! In-process lock implementation, usable standalone and in tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{DeployLock, LockMode};
    use crate::error::ExecResult;

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    enum HeldState {
        #[default]
        Free,
        Shared(u32),
        Exclusive,
    }

    /// Lock table scoped to one process.
    #[derive(Debug, Default)]
    pub struct MemoryLock {
        held: Mutex<HashMap<String, HeldState>>,
    }

    impl MemoryLock {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl DeployLock for MemoryLock {
        fn try_acquire(&self, name: &str, mode: LockMode) -> ExecResult<bool> {
            let mut held = self.held.lock().unwrap();
            let state = held.entry(name.to_string()).or_default();
            let next = match (*state, mode) {
                (HeldState::Free, LockMode::Shared) => Some(HeldState::Shared(1)),
                (HeldState::Shared(n), LockMode::Shared) => Some(HeldState::Shared(n + 1)),
                (HeldState::Free, LockMode::Exclusive) => Some(HeldState::Exclusive),
                _ => None,
            };
            match next {
                Some(next) => {
                    *state = next;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn release(&self, name: &str, mode: LockMode) -> ExecResult<()> {
            let mut held = self.held.lock().unwrap();
            if let Some(state) = held.get_mut(name) {
                *state = match (*state, mode) {
                    (HeldState::Shared(n), LockMode::Shared) if n > 1 => HeldState::Shared(n - 1),
                    _ => HeldState::Free,
                };
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryLock;
    use super::*;

    fn manager() -> LockManager<MemoryLock> {
        LockManager::new(MemoryLock::new()).with_retry(3, Duration::from_millis(1))
    }

    #[test]
    fn shared_locks_coexist() {
        let manager = manager();
        let a = manager.acquire_shared("prod").unwrap();
        let b = manager.acquire_shared("prod").unwrap();
        drop(a);
        drop(b);
        manager.acquire_exclusive("prod").unwrap();
    }

    #[test]
    fn exclusive_excludes_everything() {
        let manager = manager();
        let guard = manager.acquire_exclusive("prod").unwrap();
        let err = manager.acquire_shared("prod").unwrap_err();
        assert!(matches!(err, ExecError::LockTimeout { attempts: 3, .. }));
        drop(guard);
        manager.acquire_shared("prod").unwrap();
    }

    #[test]
    fn guard_releases_on_drop() {
        let manager = manager();
        {
            let _guard = manager.acquire_exclusive("prod").unwrap();
        }
        manager.acquire_exclusive("prod").unwrap();
    }

    #[test]
    fn escalation_upgrades_shared_to_exclusive() {
        let manager = manager();
        let shared = manager.acquire_shared("prod").unwrap();
        let exclusive = manager.escalate(shared).unwrap();
        assert_eq!(exclusive.mode(), LockMode::Exclusive);
    }

    #[test]
    fn escalation_times_out_against_other_holders() {
        let manager = manager();
        let mine = manager.acquire_shared("prod").unwrap();
        let theirs = manager.acquire_shared("prod").unwrap();
        let err = manager.escalate(mine).unwrap_err();
        assert!(matches!(err, ExecError::LockTimeout { .. }));
        drop(theirs);
    }
}
