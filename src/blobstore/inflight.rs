use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use super::transport::{BlobOp, BlobResponse, TransportError};

pub type CallResult = Result<BlobResponse, TransportError>;
type SharedCall = Shared<BoxFuture<'static, CallResult>>;

/// Identity of an outbound call. Puts also carry the content hash, so two puts of
/// different bytes under one id are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub op: BlobOp,
    pub endpoint: String,
    pub id: String,
    pub content: Option<u64>,
}

type Registry = Arc<Mutex<HashMap<CallKey, SharedCall>>>;

/// Identical in-flight calls share one future. The first caller (leader) starts the
/// call; later callers await the same shared result. The entry removes itself when
/// the call completes, or when the last waiter drops it unfinished.
#[derive(Default)]
pub struct InFlight {
    calls: Registry,
    started: AtomicU64,
}

/// One waiter's handle on a shared call.
pub struct Joined {
    call: SharedCall,
    key: CallKey,
    registry: Registry,
}

impl Future for Joined {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CallResult> { self.call.poll_unpin(cx) }
}

impl Drop for Joined {
    fn drop(&mut self) {
        // Joiners clone under the registry lock, so the count cannot race upward here.
        // Two handles left means this waiter and the registry entry itself.
        let mut calls = self.registry.lock();
        if self.call.strong_count() == Some(2) && calls.get(&self.key).is_some_and(|c| c.ptr_eq(&self.call)) {
            calls.remove(&self.key);
        }
    }
}

impl InFlight {
    pub fn new() -> Self { Self::default() }

    /// Number of calls actually started (leaders), since creation.
    pub fn started(&self) -> u64 { self.started.load(Ordering::Relaxed) }

    pub fn pending(&self) -> usize { self.calls.lock().len() }

    /// Returns the shared call and whether this caller is its leader.
    pub fn join_or_start<F>(&self, key: CallKey, start: F) -> (Joined, bool)
    where
        F: FnOnce() -> BoxFuture<'static, CallResult>,
    {
        let mut calls = self.calls.lock();
        if let Some(existing) = calls.get(&key) {
            let joined = Joined { call: existing.clone(), key, registry: self.calls.clone() };
            return (joined, false);
        }
        let registry = self.calls.clone();
        let cleanup_key = key.clone();
        let call = start();
        let shared = async move {
            let out = call.await;
            registry.lock().remove(&cleanup_key);
            out
        }
        .boxed()
        .shared();
        calls.insert(key.clone(), shared.clone());
        self.started.fetch_add(1, Ordering::Relaxed);
        (Joined { call: shared, key, registry: self.calls.clone() }, true)
    }
}
