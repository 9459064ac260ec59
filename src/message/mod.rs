//! # Message Intake and Persistence
//!
//! The outbound message log and everything that writes to it: the
//! submission front door, the vocabulary dictionaries it interns into,
//! and the per-attempt audit trail the retry machinery appends to.

pub mod attempt;
pub mod dictionary;
pub mod model;
pub mod store;
pub mod submission;

pub use attempt::{
    AttemptStatus, InMemoryAttemptStore, MessageAttempt, MessageAttemptStore, PgAttemptStore,
};
pub use dictionary::{Dictionary, InMemoryDictionary, PgDictionary};
pub use model::{MessageStatus, RetryCandidate, Submission, UserMessageRef};
pub use store::{InMemoryMessageStore, MessageStore, PgMessageStore, StoreError};
pub use submission::{MessageSubmitter, SubmissionError, SubmitterDictionaries};
