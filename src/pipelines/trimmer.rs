// Copyright 2024 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Length budget trimming
//!
//! Truncates a group of segments (for example the source and target sides of a sentence pair)
//! so that their combined length fits a budget. The budget is split between segments by a
//! `Trimmer`, and the first `n` items of each segment are kept.
//!
//! ```
//! use seq2seq_nmt::trimmer::{RoundRobinTrimmer, Trimmer, WaterfallTrimmer};
//! let segments = vec![vec!["a", "b", "c"], vec!["d", "e", "f", "g"], vec!["h", "i"]];
//!
//! let waterfall = WaterfallTrimmer::new(5);
//! assert_eq!(waterfall.allocate(&[3, 4, 2]), vec![3, 2, 0]);
//!
//! let round_robin = RoundRobinTrimmer::new(5);
//! let trimmed = round_robin.trim(&segments);
//! assert_eq!(trimmed, vec![vec!["a", "b"], vec!["d", "e"], vec!["h"]]);
//! ```

use serde::{Deserialize, Serialize};

/// # Trimmer trait
/// Allocates a length budget between segments.
pub trait Trimmer {
    /// Returns the number of items to keep for each segment, given the segment lengths.
    fn allocate(&self, lengths: &[usize]) -> Vec<usize>;

    /// Generates a mask per segment, `true` marking the items to keep.
    fn generate_masks<T>(&self, segments: &[Vec<T>]) -> Vec<Vec<bool>> {
        let lengths: Vec<usize> = segments.iter().map(Vec::len).collect();
        self.allocate(&lengths)
            .into_iter()
            .zip(lengths)
            .map(|(keep, length)| (0..length).map(|position| position < keep).collect())
            .collect()
    }

    /// Drops the items of each segment that do not fit in the budget.
    fn trim<T: Clone>(&self, segments: &[Vec<T>]) -> Vec<Vec<T>> {
        segments
            .iter()
            .zip(self.generate_masks(segments))
            .map(|(segment, mask)| {
                segment
                    .iter()
                    .zip(mask)
                    .filter_map(|(item, keep)| if keep { Some(item.clone()) } else { None })
                    .collect()
            })
            .collect()
    }
}

fn waterfall_allocation(lengths: &[usize], budget: usize) -> Vec<usize> {
    let mut leftover = budget;
    lengths
        .iter()
        .map(|length| {
            let allocated = (*length).min(leftover);
            leftover -= allocated;
            allocated
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// # Waterfall trimmer
/// Fills the segments left to right until the budget is exhausted.
pub struct WaterfallTrimmer {
    max_length: usize,
}

impl WaterfallTrimmer {
    pub fn new(max_length: usize) -> WaterfallTrimmer {
        WaterfallTrimmer { max_length }
    }
}

impl Trimmer for WaterfallTrimmer {
    fn allocate(&self, lengths: &[usize]) -> Vec<usize> {
        waterfall_allocation(lengths, self.max_length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// # Round robin trimmer
/// Hands out the budget one item at a time to each segment in turn, skipping full segments.
pub struct RoundRobinTrimmer {
    max_length: usize,
}

impl RoundRobinTrimmer {
    pub fn new(max_length: usize) -> RoundRobinTrimmer {
        RoundRobinTrimmer { max_length }
    }
}

impl Trimmer for RoundRobinTrimmer {
    fn allocate(&self, lengths: &[usize]) -> Vec<usize> {
        let mut allocation = vec![0; lengths.len()];
        if lengths.is_empty() {
            return allocation;
        }
        let mut budget = self.max_length;
        // full rounds first, then a partial round
        let min_length = lengths.iter().copied().min().unwrap_or(0);
        let full_rounds = min_length.min(budget / lengths.len());
        for allocated in allocation.iter_mut() {
            *allocated = full_rounds;
        }
        budget -= full_rounds * lengths.len();

        while budget > 0 {
            let mut progressed = false;
            for (allocated, length) in allocation.iter_mut().zip(lengths) {
                if budget == 0 {
                    break;
                }
                if *allocated < *length {
                    *allocated += 1;
                    budget -= 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        allocation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// # Strategy used to fit sentence pairs into a token budget
pub enum TrimStrategy {
    Waterfall,
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// # Joint length budget for a group of segments
pub struct LengthBudget {
    pub max_length: usize,
    pub strategy: TrimStrategy,
}

impl Trimmer for LengthBudget {
    fn allocate(&self, lengths: &[usize]) -> Vec<usize> {
        match self.strategy {
            TrimStrategy::Waterfall => WaterfallTrimmer::new(self.max_length).allocate(lengths),
            TrimStrategy::RoundRobin => RoundRobinTrimmer::new(self.max_length).allocate(lengths),
        }
    }
}
