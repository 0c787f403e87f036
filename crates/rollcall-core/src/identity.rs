//! Identity pool: a fixed, ordered list of display labels handed to new
//! sessions.
//!
//! While some labels are unused, [`IdentityPool::assign`] draws uniformly
//! from the unused subset, so no two live sessions share a label. Once every
//! label is taken the whole pool becomes eligible again and duplicates are
//! possible.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::IndexedRandom;

/// Label used when a pool is constructed from an empty list.
pub const FALLBACK_IDENTITY: &str = "Anonymous";

/// Built-in labels.
pub const DEFAULT_IDENTITIES: &[&str] = &[
    "Andromeda", "Antares", "Aquila", "Arcturus", "Auriga", "Betelgeuse",
    "Canopus", "Capella", "Carina", "Cassiopeia", "Castor", "Centaurus",
    "Cepheus", "Cygnus", "Deneb", "Draco", "Fomalhaut", "Hydra",
    "Lyra", "Mira", "Orion", "Pegasus", "Perseus", "Phoenix",
    "Polaris", "Pollux", "Procyon", "Regulus", "Rigel", "Sirius",
    "Spica", "Taurus", "Vega", "Vela", "Virgo", "Zosma",
];

/// Immutable, ordered set of candidate identities.
#[derive(Clone, Debug)]
pub struct IdentityPool {
    labels: Vec<String>,
}

impl IdentityPool {
    /// Build a pool. Duplicate labels are dropped (first occurrence wins);
    /// an empty input yields a single-label pool of [`FALLBACK_IDENTITY`].
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut unique: Vec<String> = labels
            .into_iter()
            .map(Into::into)
            .filter(|label: &String| !label.trim().is_empty())
            .filter(|label| seen.insert(label.clone()))
            .collect();
        if unique.is_empty() {
            unique.push(FALLBACK_IDENTITY.to_string());
        }
        Self { labels: unique }
    }

    /// All labels in pool order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always `false`; a pool holds at least the fallback label.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Pick a label for a new session given the labels currently held by
    /// live sessions.
    pub fn assign<'a, I, R>(&self, in_use: I, rng: &mut R) -> String
    where
        I: IntoIterator<Item = &'a str>,
        R: Rng + ?Sized,
    {
        let taken: HashSet<&str> = in_use.into_iter().collect();
        let unused: Vec<&String> = self
            .labels
            .iter()
            .filter(|label| !taken.contains(label.as_str()))
            .collect();

        let picked = if unused.is_empty() {
            self.labels.choose(rng)
        } else {
            unused.choose(rng).copied()
        };
        picked
            .cloned()
            .unwrap_or_else(|| FALLBACK_IDENTITY.to_string())
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITIES.iter().copied())
    }
}
