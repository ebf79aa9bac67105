use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

// How often the lazy sweep may run, no matter how many requests arrive
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

// Anonymous window - tracks requests per IP
#[derive(Debug, Clone, Copy)]
pub struct AnonWindow {
    pub count: u32,
    pub window_start: Instant,
}

impl AnonWindow {
    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }
}

// Knobs the store needs from the gate config
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub limit: u32,
    pub window: Duration,
    pub trusted_for: Duration,
    pub verify_cooldown: Duration,
}

/// Outcome of the anonymous window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// Over the limit; `retry_after` is the time left until the window resets.
    Limited { retry_after: Duration },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub trusted: usize,
    pub anonymous: usize,
    pub cooling: usize,
}

/// Number of IPs currently held in each table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub anonymous: usize,
    pub trusted: usize,
    pub cooling: usize,
}

struct Tables {
    anonymous: HashMap<IpAddr, AnonWindow>,
    trusted: HashMap<IpAddr, Instant>,        // ip -> trusted until
    next_verify_at: HashMap<IpAddr, Instant>, // ip -> no verification before
    last_cleanup: Instant,
}

/// Per-IP trust and rate state.
///
/// All three tables and the cleanup timestamp sit behind one mutex so a sweep
/// never observes a half-updated IP. The lock is only held for in-memory map
/// work; callers must not keep it across the verification request.
pub struct TrustStore {
    limits: Limits,
    tables: Mutex<Tables>,
}

impl TrustStore {
    pub fn new(limits: Limits, now: Instant) -> Self {
        Self {
            limits,
            tables: Mutex::new(Tables {
                anonymous: HashMap::new(),
                trusted: HashMap::new(),
                next_verify_at: HashMap::new(),
                last_cleanup: now,
            }),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    // Every mutation leaves the tables consistent, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_trusted(&self, ip: IpAddr, now: Instant) -> bool {
        self.lock()
            .trusted
            .get(&ip)
            .is_some_and(|expire_at| now < *expire_at)
    }

    /// Trust `ip` until `now + trusted_for` and forget its anonymous count.
    pub fn promote(&self, ip: IpAddr, now: Instant) {
        let mut tables = self.lock();
        tables.trusted.insert(ip, now + self.limits.trusted_for);
        tables.anonymous.remove(&ip);
    }

    /// Fixed window admission check for an unverified IP.
    pub fn allow_anonymous(&self, ip: IpAddr, now: Instant) -> Verdict {
        let mut tables = self.lock();
        let window = self.limits.window;

        // under limit..? count it
        if let Some(entry) = tables
            .anonymous
            .get_mut(&ip)
            .filter(|entry| !entry.expired(now, window))
        {
            if entry.count < self.limits.limit {
                entry.count += 1;
                return Verdict::Allowed;
            }
            let elapsed = now.saturating_duration_since(entry.window_start);
            return Verdict::Limited {
                retry_after: window.saturating_sub(elapsed),
            };
        }

        // never seen or window expired -> fresh window
        tables.anonymous.insert(
            ip,
            AnonWindow {
                count: 1,
                window_start: now,
            },
        );
        Verdict::Allowed
    }

    pub fn verification_allowed(&self, ip: IpAddr, now: Instant) -> bool {
        self.lock()
            .next_verify_at
            .get(&ip)
            .is_none_or(|next| now >= *next)
    }

    /// Claim a verification slot for `ip`.
    ///
    /// Checks the cooldown and starts the next one under the same lock, so
    /// concurrent or abandoned attempts from one IP cannot slip past it.
    /// A zero cooldown disables throttling.
    pub fn try_begin_verification(&self, ip: IpAddr, now: Instant) -> bool {
        let mut tables = self.lock();
        if tables.next_verify_at.get(&ip).is_some_and(|next| now < *next) {
            return false;
        }
        if self.limits.verify_cooldown.is_zero() {
            tables.next_verify_at.remove(&ip);
        } else {
            tables
                .next_verify_at
                .insert(ip, now + self.limits.verify_cooldown);
        }
        true
    }

    /// Drop expired entries from every table.
    ///
    /// Runs at most once per [`CLEANUP_INTERVAL`]; returns `None` when the
    /// interval has not elapsed yet.
    pub fn cleanup(&self, now: Instant) -> Option<CleanupReport> {
        let mut tables = self.lock();
        if now.saturating_duration_since(tables.last_cleanup) < CLEANUP_INTERVAL {
            return None;
        }
        tables.last_cleanup = now;

        let window = self.limits.window;
        let before = (
            tables.trusted.len(),
            tables.anonymous.len(),
            tables.next_verify_at.len(),
        );

        tables.trusted.retain(|_, expire_at| now < *expire_at);
        tables.anonymous.retain(|_, entry| !entry.expired(now, window));
        tables.next_verify_at.retain(|_, next| now < *next);

        Some(CleanupReport {
            trusted: before.0 - tables.trusted.len(),
            anonymous: before.1 - tables.anonymous.len(),
            cooling: before.2 - tables.next_verify_at.len(),
        })
    }

    pub fn stats(&self) -> StoreStats {
        let tables = self.lock();
        StoreStats {
            anonymous: tables.anonymous.len(),
            trusted: tables.trusted.len(),
            cooling: tables.next_verify_at.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn limits(limit: u32, window: Duration) -> Limits {
        Limits {
            limit,
            window,
            trusted_for: Duration::from_secs(6 * 3600),
            verify_cooldown: Duration::from_secs(10),
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn first_request_opens_window() {
        let start = Instant::now();
        let store = TrustStore::new(limits(3, Duration::from_secs(60)), start);

        assert_eq!(store.allow_anonymous(ip(1), start), Verdict::Allowed);
        assert_eq!(store.stats().anonymous, 1);
    }

    #[test]
    fn requests_up_to_limit_are_allowed_then_denied() {
        let start = Instant::now();
        let window = Duration::from_secs(60);
        let store = TrustStore::new(limits(5, window), start);

        for i in 0..5 {
            let now = start + Duration::from_secs(i);
            assert!(store.allow_anonymous(ip(1), now).is_allowed(), "request {}", i + 1);
        }

        match store.allow_anonymous(ip(1), start + Duration::from_secs(10)) {
            Verdict::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(50));
                assert!(retry_after > Duration::ZERO && retry_after <= window);
            }
            Verdict::Allowed => panic!("6th request should be limited"),
        }

        // other IPs have their own window
        assert!(store.allow_anonymous(ip(2), start).is_allowed());
    }

    #[test]
    fn window_resets_after_expiry() {
        let start = Instant::now();
        let window = Duration::from_secs(1);
        let store = TrustStore::new(limits(2, window), start);

        assert!(store.allow_anonymous(ip(9), start).is_allowed());
        assert!(store.allow_anonymous(ip(9), start).is_allowed());
        assert!(!store.allow_anonymous(ip(9), start).is_allowed());

        // window elapsed exactly -> fresh window, not sliding
        let later = start + window;
        assert!(store.allow_anonymous(ip(9), later).is_allowed());
        assert!(store.allow_anonymous(ip(9), later).is_allowed());
        assert!(!store.allow_anonymous(ip(9), later).is_allowed());
    }

    #[test]
    fn promotion_grants_trust_until_expiry() {
        let start = Instant::now();
        let store = TrustStore::new(limits(1, Duration::from_secs(60)), start);
        let trusted_for = store.limits().trusted_for;

        assert!(!store.is_trusted(ip(1), start));
        store.promote(ip(1), start);
        assert!(store.is_trusted(ip(1), start));
        assert!(store.is_trusted(ip(1), start + trusted_for - Duration::from_secs(1)));
        assert!(!store.is_trusted(ip(1), start + trusted_for));
    }

    #[test]
    fn promotion_clears_anonymous_window() {
        let start = Instant::now();
        let store = TrustStore::new(limits(1, Duration::from_secs(60)), start);

        assert!(store.allow_anonymous(ip(1), start).is_allowed());
        assert!(!store.allow_anonymous(ip(1), start).is_allowed());

        store.promote(ip(1), start);
        assert_eq!(store.stats().anonymous, 0);

        // once trust is gone the IP starts from a clean window
        assert!(store.allow_anonymous(ip(1), start).is_allowed());
    }

    #[test]
    fn cooldown_blocks_until_elapsed() {
        let start = Instant::now();
        let store = TrustStore::new(limits(1, Duration::from_secs(60)), start);

        assert!(store.verification_allowed(ip(1), start));
        assert!(store.try_begin_verification(ip(1), start));
        assert!(!store.verification_allowed(ip(1), start + Duration::from_secs(9)));
        assert!(!store.try_begin_verification(ip(1), start + Duration::from_secs(9)));
        assert!(store.verification_allowed(ip(1), start + Duration::from_secs(10)));
    }

    #[test]
    fn refused_attempt_does_not_extend_cooldown() {
        let start = Instant::now();
        let store = TrustStore::new(limits(1, Duration::from_secs(60)), start);

        assert!(store.try_begin_verification(ip(1), start));
        assert!(!store.try_begin_verification(ip(1), start + Duration::from_secs(5)));
        // still measured from the first claim
        assert!(store.try_begin_verification(ip(1), start + Duration::from_secs(10)));
    }

    #[test]
    fn zero_cooldown_never_throttles() {
        let start = Instant::now();
        let mut l = limits(1, Duration::from_secs(60));
        l.verify_cooldown = Duration::ZERO;
        let store = TrustStore::new(l, start);

        assert!(store.try_begin_verification(ip(1), start));
        assert!(store.try_begin_verification(ip(1), start));
        assert_eq!(store.stats().cooling, 0);
    }

    #[test]
    fn cleanup_runs_at_most_once_per_interval() {
        let start = Instant::now();
        let store = TrustStore::new(limits(1, Duration::from_secs(1)), start);

        store.allow_anonymous(ip(1), start);
        assert_eq!(store.cleanup(start + Duration::from_secs(30)), None);
        assert_eq!(store.stats().anonymous, 1);

        let first = start + CLEANUP_INTERVAL;
        assert!(store.cleanup(first).is_some());
        assert_eq!(store.cleanup(first + Duration::from_secs(59)), None);
        assert!(store.cleanup(first + CLEANUP_INTERVAL).is_some());
    }

    #[test]
    fn cleanup_removes_only_expired_entries() {
        let start = Instant::now();
        let l = Limits {
            limit: 10,
            window: Duration::from_secs(120),
            trusted_for: Duration::from_secs(90),
            verify_cooldown: Duration::from_secs(90),
        };
        let store = TrustStore::new(l, start);

        // stale at sweep time
        store.allow_anonymous(ip(1), start);
        store.promote(ip(2), start);
        store.try_begin_verification(ip(3), start);

        // still live at sweep time
        let recent = start + Duration::from_secs(50);
        store.allow_anonymous(ip(4), recent);
        store.promote(ip(5), recent);
        store.try_begin_verification(ip(6), recent);

        let sweep = start + Duration::from_secs(120);
        let report = store.cleanup(sweep).expect("interval elapsed");
        assert_eq!(
            report,
            CleanupReport {
                trusted: 1,
                anonymous: 1,
                cooling: 1,
            }
        );
        assert_eq!(
            store.stats(),
            StoreStats {
                anonymous: 1,
                trusted: 1,
                cooling: 1,
            }
        );
        assert!(store.is_trusted(ip(5), sweep));
        assert!(!store.verification_allowed(ip(6), sweep));
    }
}
