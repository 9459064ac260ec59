//! # Processing Mode Configuration
//!
//! Everything the gateway knows about *how* to exchange messages: the
//! configured parties, services, actions, agreements, sub-channels and
//! legs, plus the resolution logic that picks the one leg governing a
//! concrete message exchange.
//!
//! ## Layout
//!
//! - [`model`]: the configuration snapshot and its building blocks
//! - [`context`]: the message exchange context assembled from message metadata
//! - [`resolver`]: two-phase process/leg matching with mismatch diagnostics
//! - [`provider`]: per-domain lookups over one validated snapshot
//! - [`store`]: snapshot sources (filesystem, in-memory)
//! - [`cache`]: single-flight, per-domain provider cache

pub mod cache;
pub mod context;
pub mod model;
pub mod provider;
pub mod resolver;
pub mod store;

pub use cache::{DomainProviderCache, PModeError};
pub use context::{MessageExchangeContext, MshRole, PMODE_KEY_SEPARATOR};
pub use model::{
    Action, Agreement, ConfigurationSnapshot, ExchangePattern, LegConfiguration, Mpc, Party,
    Process, RetryPolicy, Role, Service, SnapshotValidationError, ValueType, DEFAULT_MPC,
};
pub use provider::{LookupError, PModeProvider};
pub use resolver::{LegMismatch, LegResolutionError, LegResolver, ProcessMismatch};
pub use store::{FilePModeStore, PModeStore, PModeStoreError, StaticPModeStore};
