//! Lease state machine
//!
//! Owns the client-side lease lifecycle:
//!
//! ```text
//!            request             grant
//!   None ─────────────▶ Pending ───────▶ Active ◀──────┐
//!    ▲                     │               │  │         │ renewal ok
//!    └───── denial ────────┘   transient   │  └─────────┤
//!                              failure     ▼            │
//!                                       Renewing ───────┘
//!                                          │
//!                 retries exhausted,       ▼
//!                 or terminal denial    Expired
//!
//!   Active | Renewing ── drop ──▶ Dropped
//! ```
//!
//! Every transition happens under one mutex, which is never held across an
//! await point or while a callback runs. Each request or drop starts a new
//! generation; results that carry an older generation are discarded, so a
//! renewal that completes after the lease was dropped cannot revive it.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RenewalPolicy;
use crate::error::{Error, Result};
use crate::features::FeatureCache;
use crate::lease::{Lease, LeaseState, ServerLocation};
use crate::traits::LeaseGrant;

/// Stand-in deadline for lease durations too large to represent
const FAR_FUTURE_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Identifies one request/drop cycle of the lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

/// Timing of a granted or renewed lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTerms {
    /// When the next renewal should start
    pub renew_at: Instant,
    /// When the lease lapses unless renewed
    pub deadline: Instant,
    /// Wall-clock expiry reported to callers
    pub expires_at: DateTime<Utc>,
    /// Whether the feature set differs from the previous one
    pub features_changed: bool,
}

/// What the dispatcher needs to renew or the client to release a lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseTarget {
    /// Server that granted the lease
    pub location: ServerLocation,
    /// Server-assigned lease id
    pub lease_id: Option<String>,
}

#[derive(Debug, Default)]
struct MachineState {
    state: LeaseState,
    generation: u64,
    target: Option<LeaseTarget>,
    expires_at: Option<DateTime<Utc>>,
    last_server_time: Option<DateTime<Utc>>,
    closed: bool,
}

impl MachineState {
    fn is_current(&self, generation: Generation) -> bool {
        self.generation == generation.0
    }

    fn forget_lease(&mut self) {
        self.target = None;
        self.expires_at = None;
    }
}

/// Serialized owner of the lease state and its feature set
#[derive(Debug)]
pub struct LeaseStateMachine {
    inner: Mutex<MachineState>,
    features: FeatureCache,
    policy: RenewalPolicy,
}

impl LeaseStateMachine {
    /// Create a machine with no lease
    pub fn new(policy: RenewalPolicy) -> Self {
        Self {
            inner: Mutex::new(MachineState::default()),
            features: FeatureCache::new(),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail with [`Error::InvalidHandle`] once the client is shut down
    pub fn ensure_open(&self) -> Result<()> {
        if self.lock().closed {
            return Err(Error::InvalidHandle);
        }
        Ok(())
    }

    /// `None → Pending`
    ///
    /// Fails with [`Error::LeaseExists`] without changing anything while a
    /// lease is pending or held.
    pub fn begin_request(&self) -> Result<Generation> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::InvalidHandle);
        }
        if inner.state.is_busy() {
            debug!("Lease request refused: lease is {}", inner.state);
            return Err(Error::LeaseExists);
        }

        inner.generation += 1;
        inner.state = LeaseState::Pending;
        inner.forget_lease();
        debug!("Lease request started (generation {})", inner.generation);
        Ok(Generation(inner.generation))
    }

    /// Run `f` while no lease is pending or held
    ///
    /// The state lock is held for the duration of `f`, so no request can
    /// start until it returns.
    pub fn while_idle<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        let inner = self.lock();
        if inner.closed {
            return Err(Error::InvalidHandle);
        }
        if inner.state.is_busy() {
            return Err(Error::LeaseExists);
        }
        Ok(f())
    }

    /// `Pending → None` after a failed request
    pub fn abort_request(&self, generation: Generation) {
        let mut inner = self.lock();
        if inner.is_current(generation) && inner.state == LeaseState::Pending {
            inner.state = LeaseState::None;
            debug!("Lease request aborted");
        }
    }

    /// `Pending → Active` with the server's grant
    pub fn apply_grant(
        &self,
        generation: Generation,
        location: ServerLocation,
        grant: LeaseGrant,
    ) -> Result<LeaseTerms> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::InvalidHandle);
        }
        if !inner.is_current(generation) || inner.state != LeaseState::Pending {
            return Err(Error::fail("lease request was superseded"));
        }
        let grant = grant.validate()?;

        let terms = self.terms_for(&grant);
        inner.state = LeaseState::Active;
        inner.target = Some(LeaseTarget {
            location,
            lease_id: grant.lease_id,
        });
        inner.expires_at = Some(terms.expires_at);
        if grant.server_time.is_some() {
            inner.last_server_time = grant.server_time;
        }
        let features_changed = self.features.replace(grant.features);

        info!("Lease granted until {}", terms.expires_at);
        Ok(LeaseTerms {
            features_changed,
            ..terms
        })
    }

    /// Where to send the renewal for `generation`, if the lease is still held
    pub fn renewal_target(&self, generation: Generation) -> Option<LeaseTarget> {
        let inner = self.lock();
        if !inner.is_current(generation) || !inner.state.is_held() {
            return None;
        }
        inner.target.clone()
    }

    /// `Active | Renewing → Active` with a renewal
    ///
    /// The feature set is replaced wholesale. Returns `None` if the lease was
    /// dropped or expired in the meantime.
    pub fn apply_renewal(&self, generation: Generation, grant: LeaseGrant) -> Option<LeaseTerms> {
        let mut inner = self.lock();
        if !inner.is_current(generation) || !inner.state.is_held() {
            debug!("Discarding renewal for a lease that is no longer held");
            return None;
        }

        let terms = self.terms_for(&grant);
        inner.state = LeaseState::Active;
        inner.expires_at = Some(terms.expires_at);
        if let (Some(target), Some(lease_id)) = (inner.target.as_mut(), grant.lease_id) {
            target.lease_id = Some(lease_id);
        }
        if grant.server_time.is_some() {
            inner.last_server_time = grant.server_time;
        }
        let features_changed = self.features.replace(grant.features);

        debug!(
            "Lease renewed until {} (features changed: {})",
            terms.expires_at, features_changed
        );
        Some(LeaseTerms {
            features_changed,
            ..terms
        })
    }

    /// `Active → Renewing` after a transient renewal failure
    pub fn mark_renewing(&self, generation: Generation) -> bool {
        let mut inner = self.lock();
        if !inner.is_current(generation) || !inner.state.is_held() {
            return false;
        }
        inner.state = LeaseState::Renewing;
        true
    }

    /// `Active | Renewing → Expired`
    ///
    /// Returns `true` if this call performed the transition.
    pub fn expire(&self, generation: Generation) -> bool {
        let mut inner = self.lock();
        if !inner.is_current(generation) || !inner.state.is_held() {
            return false;
        }
        inner.state = LeaseState::Expired;
        inner.forget_lease();
        self.features.clear();
        warn!("Lease expired");
        true
    }

    /// `Active | Renewing → Dropped`
    ///
    /// Starts a new generation so in-flight renewals are discarded, and
    /// returns what is needed to release the seat on the server.
    pub fn begin_drop(&self) -> Result<LeaseTarget> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::InvalidHandle);
        }
        self.drop_held(&mut inner).ok_or(Error::NoLease)
    }

    /// Refuse all further operations
    ///
    /// A held lease is moved to `Dropped` and its target returned so the
    /// caller can release it.
    pub fn close(&self) -> Option<LeaseTarget> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        inner.closed = true;
        let target = self.drop_held(&mut inner);
        if inner.state == LeaseState::Pending {
            inner.state = LeaseState::None;
        }
        target
    }

    fn drop_held(&self, inner: &mut MachineState) -> Option<LeaseTarget> {
        if !inner.state.is_held() {
            return None;
        }
        inner.generation += 1;
        inner.state = LeaseState::Dropped;
        let target = inner.target.take();
        inner.forget_lease();
        self.features.clear();
        info!("Lease dropped");
        target
    }

    /// Current state
    pub fn state(&self) -> LeaseState {
        self.lock().state
    }

    /// Point-in-time view of the lease
    pub fn snapshot(&self) -> Lease {
        let inner = self.lock();
        Lease {
            state: inner.state,
            lease_id: inner.target.as_ref().and_then(|t| t.lease_id.clone()),
            expires_at: inner.expires_at,
            features: (*self.features.snapshot()).clone(),
        }
    }

    /// Server time received with the most recent grant or renewal
    pub fn last_server_time(&self) -> Option<DateTime<Utc>> {
        self.lock().last_server_time
    }

    /// Feature set of the current lease
    pub fn features(&self) -> &FeatureCache {
        &self.features
    }

    /// Renewal policy the machine schedules with
    pub fn policy(&self) -> &RenewalPolicy {
        &self.policy
    }

    fn terms_for(&self, grant: &LeaseGrant) -> LeaseTerms {
        let now = Instant::now();
        LeaseTerms {
            renew_at: instant_after(now, self.policy.renew_after(grant.duration)),
            deadline: instant_after(now, grant.duration),
            expires_at: wall_clock_after(grant.duration),
            features_changed: false,
        }
    }
}

fn instant_after(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

fn wall_clock_after(duration: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
