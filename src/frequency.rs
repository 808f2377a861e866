use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::HarvestError;

pub const TOTAL_KEY: &str = "total";

/// Dinucleotides in matching priority order.
pub const PAIRS: [&str; 16] = [
    "aa", "ac", "ag", "at", "ca", "cc", "cg", "ct", "ga", "gc", "gg", "gt", "ta", "tc", "tg", "tt",
];

/// Pair immediately preceding the allele token.
pub const BEFORE_KEYS: [&str; 16] = [
    "aa_b", "ac_b", "ag_b", "at_b", "ca_b", "cc_b", "cg_b", "ct_b", "ga_b", "gc_b", "gg_b",
    "gt_b", "ta_b", "tc_b", "tg_b", "tt_b",
];

/// Pair immediately following the allele token.
pub const AFTER_KEYS: [&str; 16] = [
    "aa_a", "ac_a", "ag_a", "at_a", "ca_a", "cc_a", "cg_a", "ct_a", "ga_a", "gc_a", "gg_a",
    "gt_a", "ta_a", "tc_a", "tg_a", "tt_a",
];

/// Counts keyed by `total`, `<pair>_b` and `<pair>_a`. Absent keys read as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    counts: BTreeMap<&'static str, u64>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys in report column order.
    pub fn keys() -> impl Iterator<Item = &'static str> {
        std::iter::once(TOTAL_KEY)
            .chain(BEFORE_KEYS.iter().copied())
            .chain(AFTER_KEYS.iter().copied())
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.get(TOTAL_KEY)
    }

    fn increment(&mut self, key: &'static str) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Adds every count of `other` into `self`.
    pub fn merge(&mut self, other: &FrequencyTable) {
        for (&key, &value) in &other.counts {
            *self.counts.entry(key).or_insert(0) += value;
        }
    }

    pub fn merged(mut self, other: &FrequencyTable) -> Self {
        self.merge(other);
        self
    }

    /// `(key, count)` for every key, zeros included, in column order.
    pub fn rows(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        Self::keys().map(|key| (key, self.get(key)))
    }
}

impl Serialize for FrequencyTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1 + PAIRS.len() * 2))?;
        for (key, value) in self.rows() {
            map.serialize_entry(key, &value)?;
        }
        map.end()
    }
}

struct Pattern {
    needle: String,
    key: &'static str,
}

/// Streaming classifier for one allele token.
pub struct FrequencyCounter {
    before: Vec<Pattern>,
    after: Vec<Pattern>,
    table: FrequencyTable,
}

impl FrequencyCounter {
    pub fn new(token: &str) -> Self {
        let token = token.to_lowercase();
        let before = PAIRS
            .iter()
            .zip(BEFORE_KEYS)
            .map(|(pair, key)| Pattern {
                needle: format!("{pair}\t{token}"),
                key,
            })
            .collect();
        let after = PAIRS
            .iter()
            .zip(AFTER_KEYS)
            .map(|(pair, key)| Pattern {
                needle: format!("{token}\t{pair}"),
                key,
            })
            .collect();
        Self {
            before,
            after,
            table: FrequencyTable::new(),
        }
    }

    pub fn observe(&mut self, line: &str) {
        self.table.increment(TOTAL_KEY);
        let line = line.to_lowercase();
        if let Some(pattern) = first_match(&self.before, &line) {
            self.table.increment(pattern.key);
        }
        if let Some(pattern) = first_match(&self.after, &line) {
            self.table.increment(pattern.key);
        }
    }

    pub fn finish(self) -> FrequencyTable {
        self.table
    }
}

fn first_match<'a>(patterns: &'a [Pattern], line: &str) -> Option<&'a Pattern> {
    patterns
        .iter()
        .find(|pattern| line.contains(pattern.needle.as_str()))
}

pub fn count_lines<I, S>(lines: I, token: &str) -> FrequencyTable
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counter = FrequencyCounter::new(token);
    for line in lines {
        counter.observe(line.as_ref());
    }
    counter.finish()
}

/// Streams a raw dataset file through a [`FrequencyCounter`].
pub fn count_file(path: &Path, token: &str) -> Result<FrequencyTable, HarvestError> {
    let file = File::open(path)
        .map_err(|err| HarvestError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut counter = FrequencyCounter::new(token);
    for line in BufReader::new(file).split(b'\n') {
        let line = line
            .map_err(|err| HarvestError::Filesystem(format!("read {}: {err}", path.display())))?;
        counter.observe(&String::from_utf8_lossy(&line));
    }
    Ok(counter.finish())
}
