//! Per-column conservation statistics ("blue base" analysis).
//!
//! A base is *blue* when it equals the majority base of its column. Blue
//! bases are tallied into identity buckets by how dominant that majority is.
//! Leading and trailing gap stretches of a sequence are missing data, gaps
//! between its first and last base are real gaps.

use crate::{
    alignment::{AlignmentMatrix, GAP},
    error::TaskError,
    iupac_code::{CANONICAL_BASES, IupacCode},
};
use bluebase_protocol::{IDENTITY_THRESHOLDS, Statistic};

/// Maximal run of internal gaps, as a half-open position range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRun {
    pub start: usize,
    pub end: usize,
}

impl GapRun {
    pub fn length(&self) -> usize {
        self.end - self.start
    }
}

/// Missing-data mask and internal gap runs of one aligned sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGaps {
    /// First and last non-gap position; `None` for an all-gap sequence.
    pub core: Option<(usize, usize)>,
    pub runs: Vec<GapRun>,
}

impl SequenceGaps {
    pub fn scan(sequence: &[u8]) -> Self {
        let first = sequence.iter().position(|s| *s != GAP);
        let last = sequence.iter().rposition(|s| *s != GAP);
        let core = first.zip(last);
        let mut runs = Vec::new();
        if let Some((first, last)) = core {
            let mut open: Option<usize> = None;
            for (pos, symbol) in sequence.iter().enumerate().take(last + 1).skip(first) {
                match (*symbol == GAP, open) {
                    (true, None) => open = Some(pos),
                    (false, Some(start)) => {
                        runs.push(GapRun { start, end: pos });
                        open = None;
                    }
                    _ => {}
                }
            }
        }
        Self { core, runs }
    }

    /// Whether `pos` lies in the leading or trailing gap stretch.
    pub fn is_missing(&self, pos: usize) -> bool {
        match self.core {
            Some((first, last)) => pos < first || pos > last,
            None => true,
        }
    }

    pub fn gap_length(&self) -> usize {
        self.runs.iter().map(GapRun::length).sum()
    }
}

/// Symbol counts and consensus of one alignment column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnProfile {
    /// Counts of A, T, G, C in that order.
    pub bases: [usize; 4],
    /// Ambiguity letters (R, Y, N, ...).
    pub other: usize,
    /// All gap symbols, missing or not.
    pub gaps: usize,
    /// Gap symbols that are leading/trailing missing data.
    pub missing: usize,
    pub majority: Option<u8>,
    pub majority_count: usize,
    pub iupac: IupacCode,
}

fn base_index(symbol: u8) -> Option<usize> {
    CANONICAL_BASES.iter().position(|b| *b == symbol)
}

/// Percentage rounded half to even.
fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * count as f64 / total as f64).round_ties_even() as u32
}

impl ColumnProfile {
    /// Profiles column `pos` of the prepared `rows`. The majority is the
    /// most frequent canonical base; ties go to the base seen first going
    /// down the column.
    fn build(rows: &[Vec<u8>], gaps: &[SequenceGaps], pos: usize) -> Self {
        let mut profile = Self::default();
        let mut first_seen = [usize::MAX; 4];
        for (row_idx, (row, row_gaps)) in rows.iter().zip(gaps).enumerate() {
            let symbol = row[pos];
            if let Some(i) = base_index(symbol) {
                profile.bases[i] += 1;
                first_seen[i] = first_seen[i].min(row_idx);
            } else if IupacCode::is_ambiguity_letter(symbol) {
                profile.other += 1;
            } else if symbol == GAP {
                profile.gaps += 1;
                if row_gaps.is_missing(pos) {
                    profile.missing += 1;
                }
            }
        }

        let winner = (0..4)
            .filter(|i| profile.bases[*i] > 0)
            .max_by(|a, b| {
                profile.bases[*a]
                    .cmp(&profile.bases[*b])
                    .then(first_seen[*b].cmp(&first_seen[*a]))
            });
        if let Some(i) = winner {
            profile.majority = Some(CANONICAL_BASES[i]);
            profile.majority_count = profile.bases[i];
        }
        profile.iupac = IupacCode::from_observed(rows.iter().map(|r| r[pos]));
        profile
    }

    pub fn count(&self, base: u8) -> usize {
        base_index(base).map_or(0, |i| self.bases[i])
    }

    pub fn canonical(&self) -> usize {
        self.bases.iter().sum()
    }

    /// Canonical bases, ambiguity letters and gaps.
    pub fn total(&self) -> usize {
        self.canonical() + self.other + self.gaps
    }

    /// Internal gaps, i.e. gaps that are not missing data.
    pub fn real_gaps(&self) -> usize {
        self.gaps - self.missing
    }

    pub fn frequency(&self, base: u8) -> u32 {
        percent(self.count(base), self.total())
    }

    pub fn coverage(&self) -> u32 {
        percent(self.canonical(), self.total())
    }

    pub fn majority_frequency(&self) -> u32 {
        percent(self.majority_count, self.total())
    }
}

/// Identity bucket of a blue base given its column's majority frequency:
/// 90 covers 90..=100, 80 down to 50 cover `[t, t + 10)`, and everything
/// below 50 lands in 40.
pub fn identity_bucket(majority_frequency: u32) -> u32 {
    IDENTITY_THRESHOLDS
        .iter()
        .copied()
        .find(|t| majority_frequency >= *t)
        .unwrap_or(40)
}

/// Column profiles plus the aggregate statistic of one alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentStatistics {
    pub columns: Vec<ColumnProfile>,
    pub statistic: Statistic,
}

fn prepare_rows(matrix: &AlignmentMatrix, width: usize) -> Vec<Vec<u8>> {
    matrix
        .rows
        .iter()
        .map(|row| {
            let mut seq: Vec<u8> = row
                .sequence
                .iter()
                .map(|s| match s {
                    b'.' | b'~' => GAP,
                    other => other.to_ascii_uppercase(),
                })
                .collect();
            seq.resize(width, GAP);
            seq
        })
        .collect()
}

impl AlignmentStatistics {
    /// Analyses `matrix`. Rows shorter than the widest one are read as if
    /// padded with gaps.
    pub fn compute(matrix: &AlignmentMatrix) -> Result<Self, TaskError> {
        if matrix.is_empty() {
            return Err(TaskError::degenerate("alignment has no sequences"));
        }
        let width = matrix.width();
        if width == 0 {
            return Err(TaskError::degenerate("alignment has no columns"));
        }

        let rows = prepare_rows(matrix, width);
        let gaps: Vec<SequenceGaps> = rows.iter().map(|r| SequenceGaps::scan(r)).collect();

        let gap_seq_count = gaps.iter().filter(|g| !g.runs.is_empty()).count();
        let gap_count: usize = gaps.iter().map(|g| g.runs.len()).sum();
        let gap_sum_length: usize = gaps.iter().map(SequenceGaps::gap_length).sum();
        let (gap_frequency, gap_length) = if gap_seq_count == 0 {
            (0.0, 0.0)
        } else {
            (
                gap_count as f64 / gap_seq_count as f64,
                gap_sum_length as f64 / gap_seq_count as f64,
            )
        };

        let columns: Vec<ColumnProfile> = (0..width)
            .map(|pos| ColumnProfile::build(&rows, &gaps, pos))
            .collect();
        let column_buckets: Vec<u32> = columns
            .iter()
            .map(|c| identity_bucket(c.majority_frequency()))
            .collect();

        let mut blue_base_count = Statistic::empty_buckets();
        let mut no_blue_bases = 0;
        let mut no_miss_bases = 0;
        for row in &rows {
            for (pos, symbol) in row.iter().enumerate() {
                if base_index(*symbol).is_none() {
                    continue;
                }
                no_miss_bases += 1;
                if columns[pos].majority == Some(*symbol) {
                    *blue_base_count.entry(column_buckets[pos]).or_insert(0) += 1;
                } else {
                    no_blue_bases += 1;
                }
            }
        }
        if no_miss_bases == 0 {
            return Err(TaskError::degenerate(
                "alignment contains no A, C, G or T bases",
            ));
        }
        let sum_of_blue_bases: usize = blue_base_count.values().sum();

        Ok(Self {
            columns,
            statistic: Statistic {
                total_seq: rows.len(),
                gap_seq_count,
                gap_count,
                gap_frequency,
                gap_sum_length,
                gap_length,
                sum_of_blue_bases,
                no_blue_bases,
                no_miss_bases,
                blue_base_ratio: sum_of_blue_bases as f64 / no_miss_bases as f64,
                blue_base_count,
            },
        })
    }
}
