//! Keep-alive leases for cross-context proxies.
//!
//! A proxy handed out of an isolation context must stay valid for as long
//! as the host holds it. Each proxy is wrapped in a [`Lease`] that keeps a
//! strong reference and carries renewal bookkeeping; the owning runner
//! renews its leases on a fixed cadence for as long as it is alive. The
//! context only tracks weak slots, so dropping the lease releases the
//! proxy.

use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Shared bookkeeping for one issued lease.
#[derive(Debug)]
pub(crate) struct LeaseSlot {
    renewed_at: Mutex<Instant>,
    ttl: Duration,
}

impl LeaseSlot {
    fn new(ttl: Duration) -> Self {
        Self {
            renewed_at: Mutex::new(Instant::now()),
            ttl,
        }
    }

    fn renew(&self) {
        *self.renewed_at.lock() = Instant::now();
    }

    fn is_expired(&self) -> bool {
        self.renewed_at.lock().elapsed() > self.ttl
    }
}

/// A keep-alive claim on a cross-context proxy.
///
/// Holding the lease keeps the proxy strongly referenced. The lease is
/// owned solely by the runner that created it and renewed only by that
/// runner; it is released together with the runner's bookkeeping.
pub struct Lease<T: ?Sized> {
    proxy: Arc<T>,
    slot: Arc<LeaseSlot>,
}

impl<T: ?Sized> Lease<T> {
    fn new(proxy: Arc<T>, slot: Arc<LeaseSlot>) -> Self {
        Self { proxy, slot }
    }

    /// Push the lease's expiry out by its ttl.
    pub fn renew(&self) {
        self.slot.renew();
    }

    /// Whether the renewal window has lapsed.
    pub fn is_expired(&self) -> bool {
        self.slot.is_expired()
    }
}

impl<T: ?Sized> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.proxy
    }
}

/// Weak-slot table owned by one isolation context.
#[derive(Default)]
pub(crate) struct LeaseTable {
    slots: Mutex<Vec<Weak<LeaseSlot>>>,
}

impl LeaseTable {
    /// Issue a lease for `proxy` and track its slot.
    pub(crate) fn issue<T: ?Sized>(&self, proxy: Arc<T>, ttl: Duration) -> Lease<T> {
        let slot = Arc::new(LeaseSlot::new(ttl));
        self.slots.lock().push(Arc::downgrade(&slot));
        Lease::new(proxy, slot)
    }

    /// Drop bookkeeping for released or expired leases.
    ///
    /// Returns the number of live leases still tracked.
    pub(crate) fn sweep(&self) -> usize {
        let mut slots = self.slots.lock();
        slots.retain(|weak| weak.upgrade().is_some_and(|slot| !slot.is_expired()));
        slots.len()
    }
}
