//! Shadow table names.
//!
//! Names look like `temp_<table>_<millis>_<NNN>`. Within one process the
//! generator never hands out the same name twice, even for calls in the same
//! millisecond.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use rand::Rng;

use crate::core::identifier::{truncate_on_char_boundary, PG_MAX_IDENTIFIER_BYTES};

pub const STAGING_PREFIX: &str = "temp_";

const SUFFIX_RANGE: u16 = 1000;

/// Room left for the table part: prefix, 13-digit millis, 3-digit suffix, two separators.
const MAX_BARE_BYTES: usize = PG_MAX_IDENTIFIER_BYTES - STAGING_PREFIX.len() - 13 - 3 - 2;

/// Only this many (table, millisecond) slots are remembered.
const MAX_TRACKED_SLOTS: usize = 1024;

#[derive(Default)]
pub struct StagingNameGenerator {
    issued: Mutex<HashMap<(String, i64), HashSet<u16>>>,
}

impl StagingNameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next name for `bare` at the current time.
    pub fn next(&self, bare: &str) -> String {
        self.next_at(bare, Utc::now().timestamp_millis())
    }

    /// Next name for `bare` as if the clock read `millis`.
    pub fn next_at(&self, bare: &str, millis: i64) -> String {
        let bare = truncate_on_char_boundary(bare, MAX_BARE_BYTES);
        let mut rng = rand::rng();
        let mut issued = match self.issued.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if issued.len() > MAX_TRACKED_SLOTS {
            issued.retain(|(_, at), _| *at >= millis);
        }

        let mut millis = millis;
        loop {
            let used = issued.entry((bare.to_string(), millis)).or_default();
            if used.len() >= SUFFIX_RANGE as usize {
                // every suffix in this millisecond is taken
                millis += 1;
                continue;
            }
            let suffix = loop {
                let candidate = rng.random_range(0..SUFFIX_RANGE);
                if used.insert(candidate) {
                    break candidate;
                }
            };
            return format!("{}{}_{}_{:03}", STAGING_PREFIX, bare, millis, suffix);
        }
    }
}

fn generator() -> &'static StagingNameGenerator {
    static GENERATOR: OnceLock<StagingNameGenerator> = OnceLock::new();
    GENERATOR.get_or_init(StagingNameGenerator::new)
}

/// Generate a shadow table name for `bare` using the process-wide generator.
pub fn staging_name(bare: &str) -> String {
    generator().next(bare)
}

/// Leading part shared by every shadow table name for `bare`, `temp_<bare>_`
/// with `bare` shortened the same way the generator shortens it.
pub fn staging_prefix_for(bare: &str) -> String {
    format!(
        "{}{}_",
        STAGING_PREFIX,
        truncate_on_char_boundary(bare, MAX_BARE_BYTES)
    )
}

/// Whether `name` is a shadow table name generated for `bare`.
pub fn is_staging_name_for(bare: &str, name: &str) -> bool {
    let Some(rest) = name.strip_prefix(staging_prefix_for(bare).as_str()) else {
        return false;
    };
    let Some((millis, suffix)) = rest.rsplit_once('_') else {
        return false;
    };
    !millis.is_empty()
        && millis.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == 3
        && suffix.bytes().all(|b| b.is_ascii_digit())
}
