//! Turning uploaded pattern files into a [`ReducedPattern`].

use crate::protocol::{Pick, ReducedPattern};
use serde::Deserialize;
use thiserror::Error;

/// Shaft words are 64 bits wide.
pub const MAX_SHAFTS: u32 = 64;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("cannot parse pattern {name:?}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("pattern {0:?} has no picks")]
    NoPicks(String),
    #[error("pattern {0:?} has no warp ends")]
    NoEnds(String),
    #[error("pattern {name:?}: {warp_colors} warp colors for {ends} ends")]
    WarpColorCount {
        name: String,
        warp_colors: usize,
        ends: usize,
    },
    #[error("pattern {name:?}: color index {index} out of range (table has {table_len})")]
    BadColor {
        name: String,
        index: u32,
        table_len: usize,
    },
    #[error("pattern {name:?}: {what} uses shaft {shaft} but the loom has {num_shafts}")]
    BadShaft {
        name: String,
        what: String,
        shaft: u32,
        num_shafts: u32,
    },
}

pub trait PatternReducer: Send {
    fn reduce(&self, name: &str, data: &str) -> Result<ReducedPattern, ReduceError>;
}

#[derive(Deserialize)]
struct UploadedPattern {
    color_table: Vec<String>,
    warp_colors: Vec<u32>,
    threading: Vec<u32>,
    picks: Vec<Pick>,
    #[serde(default)]
    pick0: Pick,
}

/// Accepts the reduced-pattern JSON shape directly. Extra fields such as
/// `type` or saved progress are ignored.
pub struct JsonPatternReducer {
    num_shafts: u32,
}

impl JsonPatternReducer {
    pub fn new(num_shafts: u32) -> Self {
        Self {
            num_shafts: num_shafts.clamp(1, MAX_SHAFTS),
        }
    }
}

impl PatternReducer for JsonPatternReducer {
    fn reduce(&self, name: &str, data: &str) -> Result<ReducedPattern, ReduceError> {
        let uploaded: UploadedPattern =
            serde_json::from_str(data).map_err(|source| ReduceError::Parse {
                name: name.to_string(),
                source,
            })?;
        let pattern = ReducedPattern {
            name: name.to_string(),
            color_table: uploaded.color_table,
            warp_colors: uploaded.warp_colors,
            threading: uploaded.threading,
            picks: uploaded.picks,
            pick0: uploaded.pick0,
        };
        validate(&pattern, self.num_shafts)?;
        Ok(pattern)
    }
}

pub fn validate(pattern: &ReducedPattern, num_shafts: u32) -> Result<(), ReduceError> {
    let name = || pattern.name.clone();
    if pattern.picks.is_empty() {
        return Err(ReduceError::NoPicks(name()));
    }
    if pattern.threading.is_empty() {
        return Err(ReduceError::NoEnds(name()));
    }
    if pattern.warp_colors.len() != pattern.threading.len() {
        return Err(ReduceError::WarpColorCount {
            name: name(),
            warp_colors: pattern.warp_colors.len(),
            ends: pattern.threading.len(),
        });
    }

    let table_len = pattern.color_table.len();
    let colors = pattern
        .warp_colors
        .iter()
        .copied()
        .chain(pattern.picks.iter().map(|p| p.color))
        .chain(std::iter::once(pattern.pick0.color));
    for index in colors {
        if index as usize >= table_len {
            return Err(ReduceError::BadColor {
                name: name(),
                index,
                table_len,
            });
        }
    }

    if let Some(&shaft) = pattern.threading.iter().find(|&&s| s > num_shafts) {
        return Err(ReduceError::BadShaft {
            name: name(),
            what: "threading".to_string(),
            shaft,
            num_shafts,
        });
    }
    for (i, pick) in std::iter::once(&pattern.pick0)
        .chain(pattern.picks.iter())
        .enumerate()
    {
        let highest = u64::BITS - pick.shaft_word.leading_zeros();
        if highest > num_shafts {
            return Err(ReduceError::BadShaft {
                name: name(),
                what: format!("pick {i}"),
                shaft: highest,
                num_shafts,
            });
        }
    }
    Ok(())
}

/// Shafts to raise while threading ends `start..=end` (1-based). Unthreaded
/// ends are skipped; the separator stop raises nothing.
pub fn threading_shaft_word(pattern: &ReducedPattern, start: u32, end: u32) -> u64 {
    if start == 0 {
        return 0;
    }
    let lo = (start - 1) as usize;
    let hi = (end as usize).min(pattern.threading.len());
    pattern
        .threading
        .get(lo..hi)
        .unwrap_or_default()
        .iter()
        .filter(|&&shaft| shaft > 0 && shaft <= MAX_SHAFTS)
        .fold(0u64, |word, &shaft| word | (1u64 << (shaft - 1)))
}

/// Shafts to raise for weaving pick `pick_number` (1-based, 0 is `pick0`).
pub fn weaving_shaft_word(pattern: &ReducedPattern, pick_number: u32) -> u64 {
    match pick_number {
        0 => pattern.pick0.shaft_word,
        n => pattern
            .picks
            .get((n - 1) as usize)
            .map(|p| p.shaft_word)
            .unwrap_or(0),
    }
}
