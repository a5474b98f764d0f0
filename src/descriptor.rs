use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::normalization::{Distribution, Normalization};

/// A named scalar quantity usable as a factor of a model term.
///
/// Identity comes from `Eq`/`Hash` and the descriptor order of a model from
/// `Ord`; the two must agree (`a.cmp(b) == Equal` iff `a == b`).
pub trait Descriptor: Clone + Eq + Hash + Ord + fmt::Debug {
    fn name(&self) -> &str;

    fn normalization(&self) -> &dyn Normalization;
}

/// A band of a coverage layer sampled at a time offset relative to the
/// evaluation date.
#[derive(Debug, Clone)]
pub struct CoverageDescriptor {
    pub name: String,
    pub layer: String,
    pub band: u16,
    /// Days relative to the evaluation date, negative for the past.
    pub time_offset: i32,
    pub distribution: Distribution,
}

impl CoverageDescriptor {
    pub fn new(name: impl Into<String>, layer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer: layer.into(),
            band: 0,
            time_offset: 0,
            distribution: Distribution::normal(),
        }
    }

    pub fn with_band(mut self, band: u16) -> Self {
        self.band = band;
        self
    }

    pub fn with_time_offset(mut self, days: i32) -> Self {
        self.time_offset = days;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    fn key(&self) -> (i32, &str) {
        (self.time_offset, &self.name)
    }
}

impl PartialEq for CoverageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CoverageDescriptor {}

impl Hash for CoverageDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for CoverageDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CoverageDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Descriptor for CoverageDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn normalization(&self) -> &dyn Normalization {
        &self.distribution
    }
}

impl fmt::Display for CoverageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.time_offset == 0 {
            f.write_str(&self.name)
        } else {
            write!(f, "{}[{:+}]", self.name, self.time_offset)
        }
    }
}
