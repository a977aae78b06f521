// Hill-cipher stage
//
// Concept: Recover Hill decryption matrices from crib/ciphertext block pairs
// Synchronization: Accepts ranked input candidates, outputs StageResult
//
// Algorithm:
// 1. For every crib placement (offset +/- tolerance), cut the crib into
//    n-letter blocks aligned to the start of the text
// 2. For each set of n blocks: plain columns P, cipher columns C, solve
//    D * C = P for the decryption matrix D (via C^-1, or via K = C * P^-1)
// 3. For 3x3, also assemble keys from smaller solved pieces:
//    - every solved 2x2 key embedded as a diagonal sub-block
//    - rows solved one by one over two columns from a pair of 3-blocks, on
//      the decryption side (row blocks) or the encryption side (column blocks)
//    - two 2x2 diagonal windows joined where they overlap in the centre
//    These need only two aligned 3-blocks where a direct solve needs three.
// 4. Decrypt a short prefix, prune on its partial score, fully score survivors

use super::executor::{self, BudgetTracker, TrialReport};
use super::modular::{units, ModMatrix};
use super::{Budget, CipherStage, StageContext, ValidationContext};
use crate::error::{EngineError, EngineResult};
use crate::scoring::Crib;
use crate::types::{AttemptParams, Candidate, KeySource, RejectReason, StageResult};
use k4_common::text::{from_indices, to_indices};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use tracing::debug;

/// Column pairs a two-term row of a 3x3 key can use
const ROW_WINDOWS: [[usize; 2]; 3] = [[0, 1], [0, 2], [1, 2]];

/// Hill stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HillStage {
    /// Matrix sizes to search (2 and/or 3)
    #[serde(default = "default_sizes")]
    pub sizes: Vec<usize>,

    /// Letters decrypted before the pruning decision
    #[serde(default = "default_prefix_len")]
    pub prune_prefix_len: usize,

    /// Prefix scores below this are pruned; `None` disables pruning
    #[serde(default)]
    pub prune_threshold: Option<f64>,

    /// Assemble 3x3 keys from solved 2x2 diagonal sub-blocks
    #[serde(default = "default_embed")]
    pub embed_2x2: bool,

    /// Assemble 3x3 keys from row/column sub-blocks and joined diagonal windows
    #[serde(default = "default_embed")]
    pub sub_blocks: bool,
}

fn default_sizes() -> Vec<usize> {
    vec![2, 3]
}

fn default_prefix_len() -> usize {
    24
}

fn default_embed() -> bool {
    true
}

impl Default for HillStage {
    fn default() -> Self {
        Self {
            sizes: default_sizes(),
            prune_prefix_len: default_prefix_len(),
            prune_threshold: None,
            embed_2x2: default_embed(),
            sub_blocks: default_embed(),
        }
    }
}

/// Aligned crib block: plaintext letters and the ciphertext under them
#[derive(Debug, Clone, PartialEq, Eq)]
struct CribBlock {
    position: usize,
    plain: Vec<u8>,
    cipher: Vec<u8>,
}

#[derive(Debug, Clone)]
enum KeyTrial {
    /// Solve from `n` crib blocks
    Solve {
        size: usize,
        blocks: Vec<CribBlock>,
        source: KeySource,
    },
    /// Already-assembled key
    Assembled { key: ModMatrix, source: KeySource },
}

impl KeyTrial {
    fn size(&self) -> usize {
        match self {
            KeyTrial::Solve { size, .. } => *size,
            KeyTrial::Assembled { key, .. } => key.size(),
        }
    }

    fn source(&self) -> &KeySource {
        match self {
            KeyTrial::Solve { source, .. } | KeyTrial::Assembled { source, .. } => source,
        }
    }

    fn key(&self) -> Option<ModMatrix> {
        match self {
            KeyTrial::Solve { blocks, .. } => solve_key(blocks),
            KeyTrial::Assembled { key, .. } => Some(key.clone()),
        }
    }
}

/// Cut every crib placement into aligned n-blocks, deduplicated
fn crib_blocks(letters: &[u8], cribs: &[Crib], n: usize) -> Vec<CribBlock> {
    let mut blocks: BTreeMap<(usize, Vec<u8>), Vec<u8>> = BTreeMap::new();
    for crib in cribs {
        let crib_letters = crib.letters();
        for (start, _) in crib.starts(letters.len()) {
            let end = start + crib_letters.len();
            let mut pos = start.div_ceil(n) * n;
            while pos + n <= end {
                let plain = crib_letters[pos - start..pos - start + n].to_vec();
                let cipher = letters[pos..pos + n].to_vec();
                blocks.entry((pos, plain)).or_insert(cipher);
                pos += n;
            }
        }
    }
    blocks
        .into_iter()
        .map(|((position, plain), cipher)| CribBlock {
            position,
            plain,
            cipher,
        })
        .collect()
}

/// Decryption matrix D with D * C = P, if one exists and is itself invertible
fn solve_key(blocks: &[CribBlock]) -> Option<ModMatrix> {
    let plain: Vec<Vec<u8>> = blocks.iter().map(|b| b.plain.clone()).collect();
    let cipher: Vec<Vec<u8>> = blocks.iter().map(|b| b.cipher.clone()).collect();
    let p = ModMatrix::from_columns(&plain)?;
    let c = ModMatrix::from_columns(&cipher)?;

    let key = match c.inverse() {
        Some(c_inv) => p.mul(&c_inv)?,
        None => {
            let encrypt = c.mul(&p.inverse()?)?;
            encrypt.inverse()?
        }
    };
    key.inverse().map(|_| key)
}

/// All n-combinations of blocks at distinct positions
///
/// Consecutive aligned windows come first so that tight budgets still try
/// the most contiguous evidence.
fn block_combinations(blocks: &[CribBlock], n: usize) -> Vec<KeyTrial> {
    let mut windows = Vec::new();
    let mut others = Vec::new();
    if blocks.len() < n {
        return Vec::new();
    }
    let mut indices: Vec<usize> = (0..n).collect();

    loop {
        let chosen: Vec<&CribBlock> = indices.iter().map(|&i| &blocks[i]).collect();
        let positions: Vec<usize> = chosen.iter().map(|b| b.position).collect();
        let distinct = positions.windows(2).all(|w| w[0] < w[1]);
        if distinct {
            let consecutive = positions.windows(2).all(|w| w[1] == w[0] + n);
            let selected: Vec<CribBlock> = chosen.into_iter().cloned().collect();
            if consecutive {
                windows.push(KeyTrial::Solve {
                    size: n,
                    blocks: selected,
                    source: KeySource::SlidingWindow { positions },
                });
            } else {
                others.push(KeyTrial::Solve {
                    size: n,
                    blocks: selected,
                    source: KeySource::CribBlocks { positions },
                });
            }
        }

        // Advance to the next combination in lexicographic order
        let mut i = n;
        loop {
            if i == 0 {
                windows.extend(others);
                return windows;
            }
            i -= 1;
            if indices[i] < blocks.len() - n + i {
                break;
            }
        }
        indices[i] += 1;
        for j in i + 1..n {
            indices[j] = indices[j - 1] + 1;
        }
    }
}

/// 3x3 keys with a solved 2x2 key in either diagonal corner
fn embedded_trials(two_by_two: &[KeyTrial]) -> Vec<KeyTrial> {
    let mut solved: BTreeMap<ModMatrix, Vec<usize>> = BTreeMap::new();
    for trial in two_by_two {
        if let Some(key) = trial.key() {
            solved
                .entry(key)
                .or_insert_with(|| trial.source().positions().to_vec());
        }
    }

    let mut trials = Vec::new();
    for (key, positions) in &solved {
        for corner in 0..2 {
            for diagonal in units() {
                if let Some(assembled) = ModMatrix::embed(3, key, corner, diagonal) {
                    trials.push(KeyTrial::Assembled {
                        key: assembled,
                        source: KeySource::Embedded {
                            corner,
                            diagonal,
                            positions: positions.clone(),
                        },
                    });
                }
            }
        }
    }
    trials
}

/// Pairs of 3-blocks at distinct positions, adjacent pairs first
fn block_pairs(blocks: &[CribBlock]) -> Vec<[&CribBlock; 2]> {
    let mut pairs = Vec::new();
    for (i, first) in blocks.iter().enumerate() {
        for second in &blocks[i + 1..] {
            if first.position < second.position {
                pairs.push([first, second]);
            }
        }
    }
    // Stable: equal gaps keep position order
    pairs.sort_by_key(|[a, b]| b.position - a.position);
    pairs
}

/// Solve `out = x * input[w0] + y * input[w1]` over two blocks
///
/// Returns the full 3-wide row with zeros outside the window.
fn two_term_row(inputs: [&[u8]; 2], outputs: [u8; 2], window: [usize; 2]) -> Option<Vec<u8>> {
    let system = ModMatrix::from_rows(&[
        vec![inputs[0][window[0]], inputs[0][window[1]]],
        vec![inputs[1][window[0]], inputs[1][window[1]]],
    ])?;
    let solved = system.inverse()?.apply(&outputs);
    let mut row = vec![0u8; 3];
    row[window[0]] = solved[0];
    row[window[1]] = solved[1];
    Some(row)
}

/// Which matrix the two-term rows belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowSide {
    /// Rows of the decryption key, over ciphertext columns
    Decrypt,
    /// Rows of the encryption key, over plaintext columns
    Encrypt,
}

/// Invertible 3x3 decryption keys built from independently solved rows
fn two_term_keys(pair: [&CribBlock; 2], side: RowSide) -> Vec<(ModMatrix, Vec<[usize; 2]>)> {
    let (inputs, outputs) = match side {
        RowSide::Decrypt => (
            [pair[0].cipher.as_slice(), pair[1].cipher.as_slice()],
            [pair[0].plain.as_slice(), pair[1].plain.as_slice()],
        ),
        RowSide::Encrypt => (
            [pair[0].plain.as_slice(), pair[1].plain.as_slice()],
            [pair[0].cipher.as_slice(), pair[1].cipher.as_slice()],
        ),
    };
    let options: Vec<Vec<([usize; 2], Vec<u8>)>> = (0..3)
        .map(|r| {
            ROW_WINDOWS
                .iter()
                .filter_map(|&w| {
                    two_term_row(inputs, [outputs[0][r], outputs[1][r]], w).map(|row| (w, row))
                })
                .collect()
        })
        .collect();

    let mut keys = Vec::new();
    for (w0, r0) in &options[0] {
        for (w1, r1) in &options[1] {
            for (w2, r2) in &options[2] {
                let Some(rows) = ModMatrix::from_rows(&[r0.clone(), r1.clone(), r2.clone()]) else {
                    continue;
                };
                let key = match side {
                    RowSide::Decrypt => Some(rows),
                    RowSide::Encrypt => rows.inverse(),
                };
                if let Some(key) = key.filter(|k| k.inverse().is_some()) {
                    keys.push((key, vec![*w0, *w1, *w2]));
                }
            }
        }
    }
    keys
}

/// Join the 2x2 windows on rows/columns 0..2 and 1..3 where they share the centre
///
/// Both windows are solved from the same pair of 3-blocks cut down to the
/// window's letters. The off-window corners are zero.
fn concatenated_key(pair: [&CribBlock; 2]) -> Option<ModMatrix> {
    let window = |range: Range<usize>| {
        let cut = pair.map(|b| CribBlock {
            position: b.position,
            plain: b.plain[range.clone()].to_vec(),
            cipher: b.cipher[range.clone()].to_vec(),
        });
        solve_key(&cut)
    };
    let upper = window(0..2)?;
    let lower = window(1..3)?;
    if upper.get(1, 1) != lower.get(0, 0) {
        return None;
    }
    let cell = |m: &ModMatrix, r: usize, c: usize| m.get(r, c) as u8;
    let key = ModMatrix::from_rows(&[
        vec![cell(&upper, 0, 0), cell(&upper, 0, 1), 0],
        vec![cell(&upper, 1, 0), cell(&upper, 1, 1), cell(&lower, 0, 1)],
        vec![0, cell(&lower, 1, 0), cell(&lower, 1, 1)],
    ])?;
    key.inverse().map(|_| key)
}

/// 3x3 keys assembled from sub-blocks solved over pairs of 3-blocks
///
/// Row blocks, then column blocks, then joined windows; a key produced by an
/// earlier generator is not repeated.
fn sub_block_trials(blocks: &[CribBlock]) -> Vec<KeyTrial> {
    let pairs = block_pairs(blocks);
    let mut seen = BTreeSet::new();
    let mut trials = Vec::new();
    let pair_positions = |pair: &[&CribBlock; 2]| vec![pair[0].position, pair[1].position];

    for side in [RowSide::Decrypt, RowSide::Encrypt] {
        for pair in &pairs {
            for (key, windows) in two_term_keys(*pair, side) {
                if !seen.insert(key.clone()) {
                    continue;
                }
                let positions = pair_positions(pair);
                let source = match side {
                    RowSide::Decrypt => KeySource::RowBlocks { windows, positions },
                    RowSide::Encrypt => KeySource::ColumnBlocks { windows, positions },
                };
                trials.push(KeyTrial::Assembled { key, source });
            }
        }
    }
    for pair in &pairs {
        if let Some(key) = concatenated_key(*pair) {
            if seen.insert(key.clone()) {
                trials.push(KeyTrial::Assembled {
                    key,
                    source: KeySource::Concatenated {
                        positions: pair_positions(pair),
                    },
                });
            }
        }
    }
    trials
}

impl HillStage {
    fn key_trials(&self, letters: &[u8], cribs: &[Crib]) -> Vec<KeyTrial> {
        let mut trials = Vec::new();
        let mut sizes = self.sizes.clone();
        sizes.sort_unstable();
        sizes.dedup();

        for &n in &sizes {
            let blocks = crib_blocks(letters, cribs, n);
            trials.extend(block_combinations(&blocks, n));
            if n == 3 && self.embed_2x2 {
                let pairs = block_combinations(&crib_blocks(letters, cribs, 2), 2);
                trials.extend(embedded_trials(&pairs));
            }
            if n == 3 && self.sub_blocks {
                trials.extend(sub_block_trials(&blocks));
            }
        }
        trials
    }

    fn run_trial(
        &self,
        ctx: &StageContext<'_>,
        input_index: usize,
        input: &Candidate,
        letters: &[u8],
        trial: usize,
        key_trial: &KeyTrial,
    ) -> TrialReport {
        let size = key_trial.size();
        let source = key_trial.source().clone();
        let Some(key) = key_trial.key() else {
            let params = AttemptParams::Hill {
                size,
                key: Vec::new(),
                source,
            };
            return TrialReport::rejected(input_index, trial, params, RejectReason::NonInvertibleMatrix);
        };

        let params = AttemptParams::Hill {
            size,
            key: key.rows(),
            source,
        };

        let prefix_len = self.prune_prefix_len.div_ceil(size) * size;
        let prefix = key.apply_text(&letters[..prefix_len.min(letters.len())]);
        let partial = ctx.scorer().partial_score(&prefix);
        if let Some(threshold) = self.prune_threshold {
            if partial < threshold {
                return TrialReport::pruned(input_index, trial, params, partial);
            }
        }

        let text = from_indices(&key.apply_text(letters));
        executor::evaluate(ctx, input_index, input, trial, params, text, Some(partial))
    }
}

impl CipherStage for HillStage {
    fn kind(&self) -> &'static str {
        "hill"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> EngineResult<()> {
        if self.sizes.is_empty() {
            return Err(EngineError::Configuration(
                "Hill stage needs at least one matrix size".to_string(),
            ));
        }
        if let Some(bad) = self.sizes.iter().find(|&&n| n != 2 && n != 3) {
            return Err(EngineError::Configuration(format!(
                "Unsupported Hill matrix size {} (expected 2 or 3)",
                bad
            )));
        }
        if self.prune_prefix_len == 0 {
            return Err(EngineError::Configuration(
                "Hill prune_prefix_len must be positive".to_string(),
            ));
        }
        if self.prune_threshold.is_some_and(|t| !t.is_finite()) {
            return Err(EngineError::Configuration(
                "Hill prune_threshold must be finite".to_string(),
            ));
        }
        if ctx.cribs.is_empty() {
            return Err(EngineError::Configuration(
                "Hill stage derives keys from cribs; configure at least one crib".to_string(),
            ));
        }
        Ok(())
    }

    fn search(&self, inputs: &[Candidate], ctx: &StageContext<'_>, budget: &Budget) -> StageResult {
        let tracker = BudgetTracker::start(budget);
        let prepared: Vec<Vec<u8>> = inputs.iter().map(|c| to_indices(&c.text)).collect();

        let mut trials = Vec::new();
        for (input_index, letters) in prepared.iter().enumerate() {
            let keys = self.key_trials(letters, ctx.cribs);
            debug!(
                stage = ctx.stage_name,
                input_index,
                keys = keys.len(),
                "Derived Hill key hypotheses"
            );
            trials.extend(keys.into_iter().map(|k| (input_index, k)));
        }

        let kept = executor::run_trials(ctx, &tracker, trials, |trial, (input_index, key)| {
            self.run_trial(
                ctx,
                input_index,
                &inputs[input_index],
                &prepared[input_index],
                trial,
                &key,
            )
        });
        executor::finish_stage(ctx, inputs.len(), kept, &tracker)
    }
}
