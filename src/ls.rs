//! Lock management.
//!
//! The [`LockManager`] owns the table of active locks. Coverage of a path
//! is computed by looking at the path itself and at its ancestors, so a
//! depth-infinity lock on a collection automatically covers members that
//! are created after the lock was taken.
//!
//! Expired locks are treated as absent and are purged lazily whenever
//! their path is visited; [`LockManager::sweep`] purges everything at once.
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::davpath::DavPath;

/// Depth of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockDepth {
    Zero,
    Infinity,
}

/// Scope of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// A lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavLock {
    /// Opaque token, an `opaquelocktoken:` URI.
    pub token: String,
    /// The lock root.
    pub path: DavPath,
    pub depth: LockDepth,
    pub scope: LockScope,
    pub owner: Option<String>,
    /// Requested timeout. `None` is `Infinite`.
    pub timeout: Option<Duration>,
    pub timeout_at: Option<SystemTime>,
}

impl DavLock {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.timeout_at.map(|t| now >= t).unwrap_or(false)
    }

    /// Does this lock protect `path`.
    pub fn covers(&self, path: &DavPath) -> bool {
        match self.depth {
            LockDepth::Zero => &self.path == path,
            LockDepth::Infinity => path.starts_with(&self.path),
        }
    }

    /// Seconds left, `None` for an infinite lock.
    pub fn remaining(&self, now: SystemTime) -> Option<u64> {
        self.timeout_at
            .map(|t| t.duration_since(now).map(|d| d.as_secs()).unwrap_or(0))
    }
}

// A deadline past what `SystemTime` can represent never expires.
fn expiry(now: SystemTime, timeout: Option<Duration>) -> Option<SystemTime> {
    timeout.and_then(|d| now.checked_add(d))
}

/// Errors from the lock manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// A new lock is incompatible with an existing one.
    #[error("conflicting lock on {}", .0.path)]
    Conflict(DavLock),
    /// Unknown or expired token.
    #[error("lock token not found")]
    NotFound,
    /// A write was attempted on a locked resource without its token.
    #[error("resource {} is locked", .0.path)]
    PreconditionFailed(DavLock),
}

#[derive(Default)]
struct LockTable {
    by_path: HashMap<DavPath, Vec<DavLock>>,
    by_token: HashMap<String, DavPath>,
}

impl LockTable {
    // live locks rooted exactly at `path`, purging expired ones.
    fn at(&mut self, path: &DavPath, now: SystemTime) -> Vec<DavLock> {
        let Some(locks) = self.by_path.get_mut(path) else {
            return Vec::new();
        };
        let mut expired = Vec::new();
        locks.retain(|l| {
            if l.is_expired(now) {
                expired.push(l.token.clone());
                false
            } else {
                true
            }
        });
        let live = locks.clone();
        if locks.is_empty() {
            self.by_path.remove(path);
        }
        for token in expired {
            trace!("lock {token} on {path} expired");
            self.by_token.remove(&token);
        }
        live
    }

    fn covering(&mut self, path: &DavPath, now: SystemTime) -> Vec<DavLock> {
        let mut locks = self.at(path, now);
        for ancestor in path.ancestors() {
            locks.extend(
                self.at(&ancestor, now)
                    .into_iter()
                    .filter(|l| l.depth == LockDepth::Infinity),
            );
        }
        locks
    }

    fn below(&mut self, path: &DavPath, now: SystemTime) -> Vec<DavLock> {
        let roots: Vec<DavPath> = self
            .by_path
            .keys()
            .filter(|p| path.is_ancestor_of(p))
            .cloned()
            .collect();
        roots.iter().flat_map(|p| self.at(p, now)).collect()
    }

    fn remove(&mut self, token: &str) -> Option<DavLock> {
        let path = self.by_token.remove(token)?;
        let locks = self.by_path.get_mut(&path)?;
        let idx = locks.iter().position(|l| l.token == token)?;
        let lock = locks.remove(idx);
        if locks.is_empty() {
            self.by_path.remove(&path);
        }
        Some(lock)
    }

    fn lookup(&mut self, token: &str, now: SystemTime) -> Option<DavLock> {
        let path = self.by_token.get(token)?.clone();
        self.at(&path, now).into_iter().find(|l| l.token == token)
    }
}

fn has_token(lock: &DavLock, tokens: &[String]) -> bool {
    tokens.iter().any(|t| t == &lock.token)
}

/// The process-wide lock table.
///
/// All operations take the internal mutex for a short time only, and
/// never while waiting on the store.
#[derive(Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager::default()
    }

    /// Take a new lock on `path`.
    ///
    /// Fails if an exclusive lock already covers `path`, if an exclusive
    /// lock is requested while any lock covers `path`, or, for a
    /// depth-infinity request, if a lock below `path` is incompatible.
    pub fn acquire(
        &self,
        path: &DavPath,
        depth: LockDepth,
        scope: LockScope,
        owner: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<DavLock, LockError> {
        let now = SystemTime::now();
        let mut table = self.table.lock();

        let mut existing = table.covering(path, now);
        if depth == LockDepth::Infinity {
            existing.extend(table.below(path, now));
        }
        let conflict = existing
            .into_iter()
            .find(|l| l.scope == LockScope::Exclusive || scope == LockScope::Exclusive);
        if let Some(lock) = conflict {
            debug!("lock on {path} conflicts with {}", lock.token);
            return Err(LockError::Conflict(lock));
        }

        let lock = DavLock {
            token: format!("opaquelocktoken:{}", Uuid::new_v4().hyphenated()),
            path: path.clone(),
            depth,
            scope,
            owner,
            timeout,
            timeout_at: expiry(now, timeout),
        };
        table.by_token.insert(lock.token.clone(), path.clone());
        table
            .by_path
            .entry(path.clone())
            .or_default()
            .push(lock.clone());
        debug!("lock {} created on {path}", lock.token);
        Ok(lock)
    }

    /// Extend the expiry of a live lock.
    pub fn refresh(&self, token: &str, timeout: Option<Duration>) -> Result<DavLock, LockError> {
        let now = SystemTime::now();
        let mut table = self.table.lock();
        let path = table.lookup(token, now).ok_or(LockError::NotFound)?.path;
        let locks = table.by_path.get_mut(&path).ok_or(LockError::NotFound)?;
        let lock = locks
            .iter_mut()
            .find(|l| l.token == token)
            .ok_or(LockError::NotFound)?;
        lock.timeout = timeout;
        lock.timeout_at = expiry(now, timeout);
        debug!("lock {token} refreshed");
        Ok(lock.clone())
    }

    /// Remove a lock by token.
    pub fn release(&self, token: &str) -> Result<(), LockError> {
        let now = SystemTime::now();
        let mut table = self.table.lock();
        table.lookup(token, now).ok_or(LockError::NotFound)?;
        table.remove(token);
        debug!("lock {token} released");
        Ok(())
    }

    /// Live lock by token.
    pub fn find(&self, token: &str) -> Option<DavLock> {
        self.table.lock().lookup(token, SystemTime::now())
    }

    /// Locks rooted at `path` plus depth-infinity locks on its ancestors.
    pub fn locks_covering(&self, path: &DavPath) -> Vec<DavLock> {
        self.table.lock().covering(path, SystemTime::now())
    }

    /// Locks rooted strictly below `path`.
    pub fn locks_below(&self, path: &DavPath) -> Vec<DavLock> {
        self.table.lock().below(path, SystemTime::now())
    }

    /// Locks rooted exactly at `path`, whatever their depth.
    pub fn locks_at(&self, path: &DavPath) -> Vec<DavLock> {
        self.table.lock().at(path, SystemTime::now())
    }

    /// Check that a write to `path` is allowed with the submitted tokens.
    ///
    /// If any lock covers `path`, one of the covering locks' tokens must be
    /// among `tokens`.
    pub fn check_conditional(&self, path: &DavPath, tokens: &[String]) -> Result<(), LockError> {
        let covering = self.locks_covering(path);
        if covering.is_empty() || covering.iter().any(|l| has_token(l, tokens)) {
            return Ok(());
        }
        Err(LockError::PreconditionFailed(covering[0].clone()))
    }

    /// Like `check_conditional`, but also requires a token for every lock
    /// rooted below `path`. Used for operations on a whole subtree.
    pub fn check_tree(&self, path: &DavPath, tokens: &[String]) -> Result<(), LockError> {
        self.check_conditional(path, tokens)?;
        match self.locks_below(path).into_iter().find(|l| !has_token(l, tokens)) {
            Some(lock) => Err(LockError::PreconditionFailed(lock)),
            None => Ok(()),
        }
    }

    /// Drop all locks rooted at `path`. Returns how many were removed.
    pub fn remove_locks_at(&self, path: &DavPath) -> usize {
        let mut table = self.table.lock();
        let locks = table.by_path.remove(path).unwrap_or_default();
        for lock in &locks {
            table.by_token.remove(&lock.token);
        }
        if !locks.is_empty() {
            debug!("dropped {} lock(s) on {path}", locks.len());
        }
        locks.len()
    }

    /// Purge every expired lock. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut table = self.table.lock();
        let before = table.by_token.len();
        let paths: Vec<DavPath> = table.by_path.keys().cloned().collect();
        for path in paths {
            table.at(&path, now);
        }
        before - table.by_token.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        s.parse().unwrap()
    }

    fn excl(ls: &LockManager, path: &str, depth: LockDepth) -> Result<DavLock, LockError> {
        ls.acquire(&p(path), depth, LockScope::Exclusive, None, None)
    }

    fn shared(ls: &LockManager, path: &str, depth: LockDepth) -> Result<DavLock, LockError> {
        ls.acquire(&p(path), depth, LockScope::Shared, None, None)
    }

    #[test]
    fn exclusive_excludes_everything() {
        let ls = LockManager::new();
        excl(&ls, "/a", LockDepth::Zero).unwrap();
        assert!(matches!(excl(&ls, "/a", LockDepth::Zero), Err(LockError::Conflict(_))));
        assert!(matches!(shared(&ls, "/a", LockDepth::Zero), Err(LockError::Conflict(_))));
        // depth 0 does not reach members.
        excl(&ls, "/a/b", LockDepth::Zero).unwrap();
    }

    #[test]
    fn shared_locks_coexist() {
        let ls = LockManager::new();
        let one = shared(&ls, "/a", LockDepth::Zero).unwrap();
        let two = shared(&ls, "/a", LockDepth::Zero).unwrap();
        assert_ne!(one.token, two.token);
        assert_eq!(ls.locks_covering(&p("/a")).len(), 2);
        assert!(matches!(excl(&ls, "/a", LockDepth::Zero), Err(LockError::Conflict(_))));
    }

    #[test]
    fn infinity_lock_covers_descendants() {
        let ls = LockManager::new();
        let lock = excl(&ls, "/a", LockDepth::Infinity).unwrap();

        let covering = ls.locks_covering(&p("/a/b/c"));
        assert_eq!(covering, vec![lock.clone()]);
        assert!(matches!(excl(&ls, "/a/b", LockDepth::Zero), Err(LockError::Conflict(_))));

        assert!(matches!(
            ls.check_conditional(&p("/a/b"), &[]),
            Err(LockError::PreconditionFailed(_))
        ));
        assert!(matches!(
            ls.check_conditional(&p("/a/b"), &["opaquelocktoken:bogus".to_string()]),
            Err(LockError::PreconditionFailed(_))
        ));
        ls.check_conditional(&p("/a/b"), &[lock.token.clone()]).unwrap();
        ls.check_conditional(&p("/ab"), &[]).unwrap();
    }

    #[test]
    fn infinity_lock_conflicts_with_locked_member() {
        let ls = LockManager::new();
        excl(&ls, "/a/b", LockDepth::Zero).unwrap();
        assert!(matches!(excl(&ls, "/a", LockDepth::Infinity), Err(LockError::Conflict(_))));
        excl(&ls, "/a", LockDepth::Zero).unwrap();
    }

    #[test]
    fn release_clears_coverage() {
        let ls = LockManager::new();
        let lock = excl(&ls, "/a", LockDepth::Infinity).unwrap();
        ls.release(&lock.token).unwrap();
        assert!(ls.locks_covering(&p("/a")).is_empty());
        assert!(ls.locks_covering(&p("/a/b")).is_empty());
        assert_eq!(ls.release(&lock.token), Err(LockError::NotFound));
        excl(&ls, "/a", LockDepth::Zero).unwrap();
    }

    #[test]
    fn expired_locks_are_absent() {
        let ls = LockManager::new();
        let lock = ls
            .acquire(&p("/a"), LockDepth::Infinity, LockScope::Exclusive, None, Some(Duration::ZERO))
            .unwrap();
        assert!(ls.locks_covering(&p("/a/b")).is_empty());
        assert_eq!(ls.refresh(&lock.token, None), Err(LockError::NotFound));
        assert_eq!(ls.find(&lock.token), None);
        excl(&ls, "/a", LockDepth::Zero).unwrap();
    }

    #[test]
    fn sweep_purges_expired() {
        let ls = LockManager::new();
        for path in ["/x", "/y"] {
            ls.acquire(&p(path), LockDepth::Zero, LockScope::Shared, None, Some(Duration::ZERO))
                .unwrap();
        }
        shared(&ls, "/z", LockDepth::Zero).unwrap();
        assert_eq!(ls.sweep(), 2);
        assert_eq!(ls.sweep(), 0);
    }

    #[test]
    fn refresh_extends_timeout() {
        let ls = LockManager::new();
        let lock = ls
            .acquire(
                &p("/a"),
                LockDepth::Zero,
                LockScope::Exclusive,
                Some("me".to_string()),
                Some(Duration::from_secs(10)),
            )
            .unwrap();
        let refreshed = ls.refresh(&lock.token, Some(Duration::from_secs(3600))).unwrap();
        assert_eq!(refreshed.token, lock.token);
        assert_eq!(refreshed.owner.as_deref(), Some("me"));
        assert!(refreshed.timeout_at > lock.timeout_at);
        assert_eq!(ls.refresh("opaquelocktoken:nope", None), Err(LockError::NotFound));
    }

    #[test]
    fn huge_timeout_never_expires() {
        let ls = LockManager::new();
        let huge = Some(Duration::from_secs(u64::MAX));
        let lock = ls
            .acquire(&p("/a"), LockDepth::Zero, LockScope::Exclusive, None, huge)
            .unwrap();
        assert_eq!(lock.timeout_at, None);
        assert_eq!(lock.remaining(SystemTime::now()), None);

        let refreshed = ls.refresh(&lock.token, huge).unwrap();
        assert_eq!(refreshed.timeout_at, None);
        assert_eq!(ls.locks_covering(&p("/a")), vec![refreshed]);
    }

    #[test]
    fn tree_and_parent_checks() {
        let ls = LockManager::new();
        let member = excl(&ls, "/a/b", LockDepth::Zero).unwrap();
        assert!(ls.check_tree(&p("/a"), &[]).is_err());
        ls.check_tree(&p("/a"), &[member.token.clone()]).unwrap();

        let coll = excl(&ls, "/c", LockDepth::Zero).unwrap();
        // depth 0 protects the collection itself, including its member list.
        ls.check_conditional(&p("/c/new"), &[]).unwrap();
        assert!(ls.check_conditional(&p("/c"), &[]).is_err());
        ls.check_conditional(&p("/c"), &[coll.token.clone()]).unwrap();
    }

    #[test]
    fn remove_locks_at_path() {
        let ls = LockManager::new();
        shared(&ls, "/a", LockDepth::Zero).unwrap();
        shared(&ls, "/a", LockDepth::Zero).unwrap();
        excl(&ls, "/a/b", LockDepth::Zero).unwrap();
        assert_eq!(ls.remove_locks_at(&p("/a")), 2);
        assert!(ls.locks_at(&p("/a")).is_empty());
        assert_eq!(ls.locks_below(&p("/a")).len(), 1);
    }
}
