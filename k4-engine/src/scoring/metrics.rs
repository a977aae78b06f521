//! Pure text statistics over letter indices (A=0 .. Z=25)

use k4_common::resources::LetterFrequencies;
use k4_common::text::ALPHABET_LEN;
use k4_common::Wordlist;
use std::collections::BTreeMap;

const VOWELS: [u8; 5] = [0, 4, 8, 14, 20]; // A E I O U

fn letter_counts(letters: &[u8]) -> [usize; ALPHABET_LEN] {
    let mut counts = [0usize; ALPHABET_LEN];
    for &l in letters {
        counts[l as usize % ALPHABET_LEN] += 1;
    }
    counts
}

/// Sum over letters of (observed - expected)^2 / expected, on frequencies
pub fn chi_square(letters: &[u8], expected: &LetterFrequencies) -> f64 {
    if letters.is_empty() {
        return 0.0;
    }
    let n = letters.len() as f64;
    letter_counts(letters)
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let exp = expected.expected(i).max(1e-6);
            let obs = c as f64 / n;
            (obs - exp).powi(2) / exp
        })
        .sum()
}

pub fn index_of_coincidence(letters: &[u8]) -> f64 {
    let n = letters.len();
    if n < 2 {
        return 0.0;
    }
    let pairs: usize = letter_counts(letters).iter().map(|&c| c * c.saturating_sub(1)).sum();
    pairs as f64 / (n * (n - 1)) as f64
}

/// Highest mean column IoC for periods 2..=max_period
///
/// Periods leaving fewer than two letters per column are skipped.
pub fn periodic_ioc(letters: &[u8], max_period: usize) -> f64 {
    let mut best = 0.0f64;
    for period in 2..=max_period {
        if letters.len() < period * 2 {
            break;
        }
        let mean = (0..period)
            .map(|phase| {
                let column: Vec<u8> = letters.iter().skip(phase).step_by(period).copied().collect();
                index_of_coincidence(&column)
            })
            .sum::<f64>()
            / period as f64;
        best = best.max(mean);
    }
    best
}

pub fn vowel_ratio(letters: &[u8]) -> f64 {
    if letters.is_empty() {
        return 0.0;
    }
    let vowels = letters.iter().filter(|l| VOWELS.contains(l)).count();
    vowels as f64 / letters.len() as f64
}

pub fn letter_coverage(letters: &[u8]) -> f64 {
    let distinct = letter_counts(letters).iter().filter(|&&c| c > 0).count();
    distinct as f64 / ALPHABET_LEN as f64
}

fn entropy<I: IntoIterator<Item = usize>>(counts: I, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .into_iter()
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

pub fn letter_entropy(letters: &[u8]) -> f64 {
    entropy(letter_counts(letters), letters.len())
}

pub fn trigram_entropy(letters: &[u8]) -> f64 {
    if letters.len() < 3 {
        return 0.0;
    }
    // Ordered so the float sum is identical on every call
    let mut counts: BTreeMap<&[u8], usize> = BTreeMap::new();
    for w in letters.windows(3) {
        *counts.entry(w).or_insert(0) += 1;
    }
    entropy(counts.into_values(), letters.len() - 2)
}

fn bigram_positions(letters: &[u8]) -> BTreeMap<(u8, u8), Vec<usize>> {
    let mut positions: BTreeMap<(u8, u8), Vec<usize>> = BTreeMap::new();
    for (i, w) in letters.windows(2).enumerate() {
        positions.entry((w[0], w[1])).or_default().push(i);
    }
    positions
}

pub fn repeating_bigram_fraction(letters: &[u8]) -> f64 {
    if letters.len() < 2 {
        return 0.0;
    }
    let total = letters.len() - 1;
    let repeated: usize = bigram_positions(letters)
        .values()
        .filter(|p| p.len() > 1)
        .map(Vec::len)
        .sum();
    repeated as f64 / total as f64
}

/// Population variance of distances between consecutive repeats of a bigram
pub fn bigram_gap_variance(letters: &[u8]) -> f64 {
    let gaps: Vec<f64> = bigram_positions(letters)
        .values()
        .flat_map(|p| p.windows(2).map(|w| (w[1] - w[0]) as f64))
        .collect();
    if gaps.is_empty() {
        return 0.0;
    }
    let n = gaps.len() as f64;
    let mean = gaps.iter().sum::<f64>() / n;
    gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n
}

/// Fraction of letters covered by dictionary words of length `min_len..=max_len`
///
/// Every start position is tried with the longest matching word; overlapping
/// matches all count toward coverage.
pub fn wordlist_hit_rate(text: &str, wordlist: &Wordlist, min_len: usize, max_len: usize) -> f64 {
    let bytes = text.as_bytes();
    if bytes.is_empty() || wordlist.is_empty() {
        return 0.0;
    }
    let min_len = min_len.max(wordlist.min_len()).max(1);
    let max_len = max_len.min(wordlist.max_len());
    if min_len > max_len {
        return 0.0;
    }

    let mut covered = vec![false; bytes.len()];
    for start in 0..bytes.len() {
        let longest = max_len.min(bytes.len() - start);
        if longest < min_len {
            break;
        }
        for len in (min_len..=longest).rev() {
            if wordlist.contains(&text[start..start + len]) {
                covered[start..start + len].iter_mut().for_each(|c| *c = true);
                break;
            }
        }
    }
    covered.iter().filter(|&&c| c).count() as f64 / bytes.len() as f64
}
