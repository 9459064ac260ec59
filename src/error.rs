//! Crate-wide error aggregation.
//!
//! Every subsystem carries its own typed error; this enum folds them into
//! one surface for callers that drive the gateway as a whole, such as the
//! scheduled jobs and binary entry points. Subsystem APIs keep returning
//! their specific types.

use thiserror::Error;

use crate::config::CoreConfigError;
use crate::identifier::IdentifierError;
use crate::message::{StoreError, SubmissionError};
use crate::pmode::{LegResolutionError, LookupError, PModeError};
use crate::pull::PullError;
use crate::retry::RetryError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error(transparent)]
    Configuration(#[from] PModeError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Resolution(#[from] LegResolutionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Retry(#[from] RetryError),
    #[error(transparent)]
    Pull(#[from] PullError),
    #[error(transparent)]
    Config(#[from] CoreConfigError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
