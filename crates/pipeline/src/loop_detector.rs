//! Repetition detection over the stage execution trace.
//!
//! Every contiguous run of `window` stage ids is tallied. A run seen more
//! than `max_repeats` times means the pipeline is cycling (typically an
//! `append` followed by a `move_to` back to it) and must be stopped.

use std::collections::HashMap;

/// Outcome of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopReport {
    NoLoop,
    Loop {
        /// The repeated run of stage ids
        pattern: Vec<String>,
        /// How many times it occurs
        count: usize,
        /// Start offsets of each occurrence
        occurrences: Vec<usize>,
    },
}

impl LoopReport {
    pub fn is_loop(&self) -> bool {
        matches!(self, Self::Loop { .. })
    }
}

/// Scan `ids` for a window that repeats more than `max_repeats` times.
///
/// Overlapping occurrences count. When several windows qualify, the one
/// first seen in the trace is reported. A zero window or one longer than
/// the trace never reports a loop.
pub fn detect_loop<S: AsRef<str>>(ids: &[S], window: usize, max_repeats: usize) -> LoopReport {
    if window == 0 || window > ids.len() {
        return LoopReport::NoLoop;
    }

    let mut slots: HashMap<Vec<&str>, usize> = HashMap::new();
    let mut tallies: Vec<(Vec<&str>, Vec<usize>)> = Vec::new();

    for start in 0..=ids.len() - window {
        let key: Vec<&str> = ids[start..start + window].iter().map(AsRef::as_ref).collect();
        match slots.get(&key) {
            Some(&slot) => tallies[slot].1.push(start),
            None => {
                slots.insert(key.clone(), tallies.len());
                tallies.push((key, vec![start]));
            }
        }
    }

    tallies
        .into_iter()
        .find(|(_, occurrences)| occurrences.len() > max_repeats)
        .map(|(pattern, occurrences)| LoopReport::Loop {
            pattern: pattern.into_iter().map(String::from).collect(),
            count: occurrences.len(),
            occurrences,
        })
        .unwrap_or(LoopReport::NoLoop)
}
