#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # AS4 Core
//!
//! Rust core for an AS4/ebMS3 message exchange gateway.
//!
//! ## Overview
//!
//! This crate implements the exchange-independent heart of an AS4 access
//! point: processing-mode (PMode) resolution, time-ordered message
//! identifier allocation, retry scheduling for outbound messages, and the
//! lock lifecycle that makes pull-mode delivery reliable. Transport, SOAP
//! envelope handling and payload persistence live in the surrounding
//! gateway; everything here is the decision logic those layers call into.
//!
//! ## Architecture
//!
//! Each gateway **domain** (a routing space with its own parties, services
//! and legs) owns one immutable [`pmode::ConfigurationSnapshot`]. A
//! [`pmode::DomainProviderCache`] builds a [`pmode::PModeProvider`] per
//! domain on first use and shares it until an operator refreshes the
//! configuration. Submission, retry and pull services all resolve exchanges
//! through that provider, so a configuration swap is a single cache
//! invalidation away.
//!
//! ## Module Organization
//!
//! - [`pmode`] - Processing-mode model, leg resolution and per-domain caching
//! - [`identifier`] - Time-ordered entity identifier generation
//! - [`message`] - Message records, vocabulary dictionaries and submission
//! - [`retry`] - Retry eligibility, send attempts and discovery passes
//! - [`pull`] - Pull-mode lock claiming, staleness and expiry handling
//! - [`jobs`] - Periodic background jobs driving retry and pull maintenance
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Crate-wide error type
//! - [`logging`] - `tracing` subscriber setup
//! - [`clock`] - Injectable time source for deterministic tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # fn main() -> Result<(), as4_core::identifier::IdentifierError> {
//! use std::sync::Arc;
//!
//! use as4_core::clock::SystemClock;
//! use as4_core::identifier::EntityIdGenerator;
//!
//! let ids = EntityIdGenerator::new(Arc::new(SystemClock));
//! let entity_id = ids.next()?;
//! println!("allocated message identifier {entity_id}");
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod identifier;
pub mod jobs;
pub mod logging;
pub mod message;
pub mod pmode;
pub mod pull;
pub mod retry;

pub use clock::{Clock, SystemClock};
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use identifier::EntityIdGenerator;
pub use jobs::{JobRunner, JobScheduler, ScheduledJob};
pub use message::{MessageStatus, MessageSubmitter, Submission};
pub use pmode::{DomainProviderCache, PModeProvider};
pub use pull::PullMessageService;
pub use retry::RetryService;
