//! Cache storage abstraction for refcheck services.
//!
//! This crate provides the [`StorageBackend`] trait that token validation uses
//! to persist validated claim sets between requests. Values are opaque bytes
//! with an optional time-to-live; serialization is the caller's concern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  refcheck-authn                             │
//! │      TokenValidator → ClaimsCache (serialize, key, TTL)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  refcheck-storage                           │
//! │              StorageBackend trait                           │
//! │          (get, set, set_with_ttl, delete)                   │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryBackend│   distributed cache adapters (Redis, ...)    │
//! │ (in-process) │          (implemented downstream)            │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use refcheck_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend
//!         .set_with_ttl(b"claims:abc".to_vec(), b"[]".to_vec(), Duration::from_secs(60))
//!         .await?;
//!
//!     let value = backend.get(b"claims:abc").await?;
//!     assert_eq!(value.map(|b| b.to_vec()), Some(b"[]".to_vec()));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Map backend-specific errors to [`StorageError`]
//! 3. Treat keys whose TTL has elapsed as absent
//!
//! See the [`memory`] module source for a reference implementation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
