//! Reduce an ordered candidate list to a requested count.

use crate::Error;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// How candidates are picked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    /// The first `count` candidates.
    Forward,
    /// The last `count` candidates, last first.
    Reverse,
    /// `count` distinct candidates drawn uniformly.
    Random,
}

impl Selection {
    /// Pick `min(count, candidates.len())` distinct candidates.
    pub fn select<T: Clone>(&self, candidates: &[T], count: usize) -> Vec<T> {
        self.select_with(&mut rand::thread_rng(), candidates, count)
    }

    pub fn select_with<T: Clone, R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        candidates: &[T],
        count: usize,
    ) -> Vec<T> {
        let count = count.min(candidates.len());
        match self {
            Selection::Forward => candidates[..count].to_vec(),
            Selection::Reverse => candidates.iter().rev().take(count).cloned().collect(),
            Selection::Random => candidates.choose_multiple(rng, count).cloned().collect(),
        }
    }
}

impl FromStr for Selection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(Selection::Forward),
            "reverse" => Ok(Selection::Reverse),
            "random" => Ok(Selection::Random),
            _ => Err(Error::InvalidSelection(s.to_string())),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Selection::Forward => "forward",
            Selection::Reverse => "reverse",
            Selection::Random => "random",
        };
        f.write_str(name)
    }
}
