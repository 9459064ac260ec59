//! Time-ordered entity identifiers.
//!
//! Message-related records are keyed by a 64-bit identifier whose decimal
//! form is an 8-digit creation-hour prefix (`yyMMddHH`, UTC) followed by a
//! 10-digit zero-padded counter, e.g. `210809150000000050` for the 51st
//! identifier issued during 2021-08-09 15:xx UTC. Because the prefix encodes
//! the creation hour, "all records created between T1 and T2" becomes a
//! primary-key range scan: [`range_for_time_window`] widens the window to
//! hour precision by using the all-zero suffix for the lower bound and the
//! all-nine suffix for the upper bound, so the computed range is always a
//! superset of the true time window.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;

/// Number of identifiers one hour prefix can accommodate (10 suffix digits).
pub const SUFFIX_CAPACITY: i64 = 10_000_000_000;

/// Largest counter value representable in the 10-digit suffix.
pub const MAX_SUFFIX: i64 = 9_999_999_999;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// More than `MAX_SUFFIX + 1` identifiers were requested within a single
    /// hour. Wrapping around would break ordering and uniqueness, so this is
    /// reported instead of being truncated away.
    #[error("identifier counter exhausted for hour prefix {prefix}: suffix would exceed {MAX_SUFFIX}")]
    SuffixExhausted { prefix: i64 },
}

/// Formats the hour prefix (`yyMMddHH`) of an instant as a number.
pub fn hour_prefix(at: DateTime<Utc>) -> i64 {
    let yy = (at.year() % 100) as i64;
    let mm = at.month() as i64;
    let dd = at.day() as i64;
    let hh = at.hour() as i64;
    yy * 1_000_000 + mm * 10_000 + dd * 100 + hh
}

/// Identifier range covering every identifier issued between `min_time` and
/// `max_time`, inclusive. The bounds are coarse at hour granularity: the
/// range over-selects at the boundaries and callers that need exact-time
/// semantics must re-check candidate timestamps.
pub fn range_for_time_window(min_time: DateTime<Utc>, max_time: DateTime<Utc>) -> (i64, i64) {
    let min_id = hour_prefix(min_time) * SUFFIX_CAPACITY;
    let max_id = hour_prefix(max_time) * SUFFIX_CAPACITY + MAX_SUFFIX;
    (min_id, max_id)
}

#[derive(Debug)]
struct GeneratorState {
    prefix: i64,
    counter: i64,
}

/// Process-wide generator of time-ordered identifiers.
///
/// Monotonic across concurrent callers: the issuing critical section is a
/// single mutex-guarded increment. When the clock enters a new hour the
/// counter restarts at zero under the new prefix; if the clock steps
/// backwards the generator keeps issuing under the highest prefix it has
/// already used, so identifiers never regress.
pub struct EntityIdGenerator {
    clock: Arc<dyn Clock>,
    state: Mutex<GeneratorState>,
}

impl EntityIdGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(GeneratorState {
                prefix: 0,
                counter: -1,
            }),
        }
    }

    /// Issues the next identifier.
    pub fn next(&self) -> Result<i64, IdentifierError> {
        let current_prefix = hour_prefix(self.clock.now());
        let mut state = self.state.lock();
        if current_prefix > state.prefix {
            state.prefix = current_prefix;
            state.counter = -1;
        }
        if state.counter >= MAX_SUFFIX {
            return Err(IdentifierError::SuffixExhausted {
                prefix: state.prefix,
            });
        }
        state.counter += 1;
        Ok(state.prefix * SUFFIX_CAPACITY + state.counter)
    }
}

impl std::fmt::Debug for EntityIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EntityIdGenerator")
            .field("prefix", &state.prefix)
            .field("counter", &state.counter)
            .finish()
    }
}
