// src/session/locks.rs
// Resource lock arbitration: all-or-nothing claims, lazy expiry, fail-fast
// conflicts. No queuing and no background sweeper; expired locks are pruned
// whenever the lock map is consulted.

use chrono::{DateTime, Duration, Utc};

use super::{LockMode, ResourceLock, SessionState, MAX_LOCK_TTL_SECONDS};
use crate::error::LockConflict;

/// Outcome of a claim request. Conflicts are data, not failures: the caller
/// decides whether to back off, message the holder, or give up.
#[derive(Debug)]
pub enum ClaimOutcome {
    Granted(Vec<ResourceLock>),
    Conflict(Vec<LockConflict>),
}

impl SessionState {
    /// Drop every expired lock. Correctness never depends on this running
    /// (expired locks are skipped at read time too); it is memory hygiene.
    pub fn prune_expired_locks(&mut self, now: DateTime<Utc>) {
        self.locks.retain(|_, locks| {
            locks.retain(|l| !l.is_expired(now));
            !locks.is_empty()
        });
    }

    /// Claim all of `paths` in `mode` for `agent_id`, or none of them.
    ///
    /// A claim conflicts when an active lock on the same path is held by a
    /// different agent and the two modes are not both read. Re-claiming a
    /// path the agent already holds renews its expiry instead.
    pub fn claim(
        &mut self,
        agent_id: &str,
        paths: &[String],
        mode: LockMode,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> ClaimOutcome {
        // TTLs come straight from tool input; cap before any expiry math.
        let ttl_seconds = ttl_seconds.clamp(0, MAX_LOCK_TTL_SECONDS);
        self.prune_expired_locks(now);

        // Validate every path before granting anything, so a partial claim
        // can never deadlock two agents against each other.
        let mut conflicts = Vec::new();
        for path in paths {
            if let Some(locks) = self.locks.get(path) {
                for lock in locks {
                    if lock.holder != agent_id && !(lock.mode.is_shared() && mode.is_shared()) {
                        conflicts.push(LockConflict {
                            path: path.clone(),
                            holder: lock.holder.clone(),
                            mode: lock.mode,
                            expires_in_seconds: lock.expires_in_seconds(now),
                        });
                    }
                }
            }
        }
        if !conflicts.is_empty() {
            return ClaimOutcome::Conflict(conflicts);
        }

        let mut granted = Vec::with_capacity(paths.len());
        for path in paths {
            let locks = self.locks.entry(path.clone()).or_default();
            if let Some(existing) = locks.iter_mut().find(|l| l.holder == agent_id) {
                // Renewal: same holder, fresh expiry, mode follows the request.
                existing.expires_at = now + Duration::seconds(ttl_seconds);
                existing.mode = mode;
                granted.push(existing.clone());
            } else {
                let lock =
                    ResourceLock::new(path.clone(), agent_id.to_string(), mode, ttl_seconds, now);
                granted.push(lock.clone());
                locks.push(lock);
            }
        }
        ClaimOutcome::Granted(granted)
    }

    /// Release the caller's locks on `paths`. Releasing a path the caller
    /// does not hold is a no-op so retries stay harmless.
    pub fn release(&mut self, agent_id: &str, paths: &[String]) -> usize {
        let mut released = 0;
        for path in paths {
            if let Some(locks) = self.locks.get_mut(path) {
                let before = locks.len();
                locks.retain(|l| l.holder != agent_id);
                released += before - locks.len();
                if locks.is_empty() {
                    self.locks.remove(path);
                }
            }
        }
        released
    }

    /// Active (non-expired) locks, for status rendering.
    pub fn active_locks(&self, now: DateTime<Utc>) -> Vec<ResourceLock> {
        self.locks
            .values()
            .flatten()
            .filter(|l| !l.is_expired(now))
            .cloned()
            .collect()
    }
}
