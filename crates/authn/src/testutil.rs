//! Shared test utilities for token validation.
//!
//! This module provides an in-memory [`FakeAuthority`] with call counters,
//! scripted results, and a gate that holds remote calls open, plus a
//! [`FailingBackend`] for exercising cache error paths. It is feature-gated
//! behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use refcheck_authn::testutil::{FakeAuthority, claims};
//!
//! let authority = FakeAuthority::active(claims(&[("sub", "u1")])).gated();
//! // ... start validations, then:
//! authority.open_gate();
//! ```

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use refcheck_storage::{StorageBackend, StorageError, StorageResult};
use tokio::sync::watch;

use crate::{
    authority::{IntrospectionResult, TokenAuthority, UserinfoResult},
    claims::{Claim, ClaimSet},
};

/// Builds a claim set from `(type, value)` pairs.
pub fn claims(pairs: &[(&str, &str)]) -> ClaimSet {
    pairs.iter().map(|(claim_type, value)| Claim::new(*claim_type, *value)).collect()
}

/// Scripted in-memory [`TokenAuthority`].
///
/// Every call is counted on entry, then waits for the gate to open, then
/// returns the currently scripted result. New authorities start with the
/// gate open.
pub struct FakeAuthority {
    introspection: Mutex<IntrospectionResult>,
    userinfo: Mutex<UserinfoResult>,
    introspect_calls: AtomicUsize,
    userinfo_calls: AtomicUsize,
    gate: watch::Sender<bool>,
    latency: Duration,
}

impl FakeAuthority {
    /// Answers every introspection with `result`.
    pub fn new(result: IntrospectionResult) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            introspection: Mutex::new(result),
            userinfo: Mutex::new(UserinfoResult::Success(ClaimSet::new())),
            introspect_calls: AtomicUsize::new(0),
            userinfo_calls: AtomicUsize::new(0),
            gate,
            latency: Duration::ZERO,
        }
    }

    /// Reports every token as active with `claims`.
    pub fn active(claims: ClaimSet) -> Self {
        Self::new(IntrospectionResult::Active(claims))
    }

    /// Reports every token as inactive.
    pub fn inactive() -> Self {
        Self::new(IntrospectionResult::Inactive)
    }

    /// Fails every introspection with `message`.
    pub fn failing(message: &str) -> Self {
        Self::new(IntrospectionResult::Error(message.to_owned()))
    }

    /// Answers every user-info call with `result`.
    #[must_use]
    pub fn with_userinfo(self, result: UserinfoResult) -> Self {
        *self.userinfo.lock() = result;
        self
    }

    /// Adds a fixed delay to every call after the gate opens.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Closes the gate so calls block until [`open_gate`](Self::open_gate).
    #[must_use]
    pub fn gated(self) -> Self {
        self.gate.send_replace(false);
        self
    }

    /// Releases every call waiting on the gate, and all later ones.
    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Replaces the scripted introspection result.
    pub fn set_introspection(&self, result: IntrospectionResult) {
        *self.introspection.lock() = result;
    }

    /// Number of introspection calls started so far.
    pub fn introspect_calls(&self) -> usize {
        self.introspect_calls.load(Ordering::SeqCst)
    }

    /// Number of user-info calls started so far.
    pub fn userinfo_calls(&self) -> usize {
        self.userinfo_calls.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) {
        let mut gate = self.gate.subscribe();
        // The sender lives as long as `self`, so this only ends when open.
        let _ = gate.wait_for(|open| *open).await;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl TokenAuthority for FakeAuthority {
    async fn introspect(&self, _token: &str) -> IntrospectionResult {
        self.introspect_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.introspection.lock().clone()
    }

    async fn fetch_userinfo(&self, _token: &str) -> UserinfoResult {
        self.userinfo_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.userinfo.lock().clone()
    }
}

/// A [`StorageBackend`] whose every operation fails with a connection error.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingBackend;

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn get(&self, _key: &[u8]) -> StorageResult<Option<Bytes>> {
        Err(StorageError::connection("cache unavailable"))
    }

    async fn set(&self, _key: Vec<u8>, _value: Vec<u8>) -> StorageResult<()> {
        Err(StorageError::connection("cache unavailable"))
    }

    async fn set_with_ttl(&self, _key: Vec<u8>, _value: Vec<u8>, _ttl: Duration) -> StorageResult<()> {
        Err(StorageError::connection("cache unavailable"))
    }

    async fn delete(&self, _key: &[u8]) -> StorageResult<()> {
        Err(StorageError::connection("cache unavailable"))
    }
}
