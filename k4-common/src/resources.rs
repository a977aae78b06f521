//! Static language resources
//!
//! N-gram frequency tables and the wordlist are precomputed externally; this
//! module only reads them. Table format is one `GRAM COUNT` pair per line,
//! whitespace separated, with `#` comments and blank lines ignored.
//!
//! Loading is all-or-nothing: any missing file or malformed line is a
//! [`Error::Resource`] so that a run never starts with half a language model.

use crate::config::ResourcePaths;
use crate::text::ALPHABET_LEN;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Largest supported n-gram order
pub const MAX_NGRAM_ORDER: usize = 4;

/// Standard English letter frequencies (A..Z), used when no unigram table is supplied
const ENGLISH_LETTER_FREQUENCIES: [f64; ALPHABET_LEN] = [
    0.08167, 0.01492, 0.02782, 0.04253, 0.12702, 0.02228, 0.02015, 0.06094, 0.06966, 0.00153,
    0.00772, 0.04025, 0.02406, 0.06749, 0.07507, 0.01929, 0.00095, 0.05987, 0.06327, 0.09056,
    0.02758, 0.00978, 0.02360, 0.00150, 0.01974, 0.00074,
];

/// Dense log10-probability table for one n-gram order
///
/// Unseen n-grams score the smoothing floor `log10(0.01 / total)`, so no
/// lookup is ever `-inf`.
#[derive(Debug, Clone)]
pub struct NgramTable {
    order: usize,
    log_probs: Vec<f64>,
    floor: f64,
    distinct: usize,
}

impl NgramTable {
    /// Build a table from (gram, count) pairs
    pub fn from_counts<I, S>(order: usize, counts: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        if order == 0 || order > MAX_NGRAM_ORDER {
            return Err(Error::Config(format!(
                "Unsupported n-gram order {} (expected 1..={})",
                order, MAX_NGRAM_ORDER
            )));
        }

        let mut merged: BTreeMap<usize, u64> = BTreeMap::new();
        for (gram, count) in counts {
            let gram = gram.as_ref();
            let code = encode_gram(gram.as_bytes(), order)
                .ok_or_else(|| Error::Internal(format!("Invalid {}-gram '{}'", order, gram)))?;
            *merged.entry(code).or_insert(0) += count;
        }

        let total: u64 = merged.values().sum();
        if total == 0 {
            return Err(Error::Internal(format!("Empty {}-gram table", order)));
        }

        let total = total as f64;
        let floor = (0.01 / total).log10();
        let mut log_probs = vec![floor; ALPHABET_LEN.pow(order as u32)];
        for (&code, &count) in &merged {
            if count > 0 {
                log_probs[code] = (count as f64 / total).log10();
            }
        }

        Ok(Self {
            order,
            log_probs,
            floor,
            distinct: merged.len(),
        })
    }

    /// Load a `GRAM COUNT` table from disk
    pub fn load(path: &Path, order: usize) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::resource(path, format!("read failed: {}", e)))?;

        let mut counts = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (gram, count) = match (fields.next(), fields.next(), fields.next()) {
                (Some(gram), Some(count), None) => (gram, count),
                _ => {
                    return Err(Error::resource(
                        path,
                        format!("line {}: expected 'GRAM COUNT'", line_no + 1),
                    ))
                }
            };

            let gram = gram.to_ascii_uppercase();
            if gram.len() != order || !gram.bytes().all(|b| b.is_ascii_uppercase()) {
                return Err(Error::resource(
                    path,
                    format!("line {}: '{}' is not a {}-gram", line_no + 1, gram, order),
                ));
            }
            let count: u64 = count.parse().map_err(|_| {
                Error::resource(path, format!("line {}: bad count '{}'", line_no + 1, count))
            })?;
            counts.push((gram, count));
        }

        let table = Self::from_counts(order, counts)
            .map_err(|e| Error::resource(path, e.to_string()))?;
        debug!(
            path = %path.display(),
            order,
            distinct = table.distinct,
            "Loaded n-gram table"
        );
        Ok(table)
    }

    /// N-gram order of this table
    pub fn order(&self) -> usize {
        self.order
    }

    /// Smoothing floor used for unseen grams
    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// Log10 probability of a gram given as letter indices (length must equal the order)
    pub fn log_prob(&self, gram: &[u8]) -> f64 {
        let mut code = 0usize;
        for &letter in gram {
            code = code * ALPHABET_LEN + letter as usize;
        }
        self.log_probs[code]
    }

    /// Sum of log probabilities over every gram in `letters`
    pub fn total_log_prob(&self, letters: &[u8]) -> f64 {
        letters
            .windows(self.order)
            .map(|gram| self.log_prob(gram))
            .sum()
    }

    /// Mean log probability per gram, `None` if the text is shorter than the order
    pub fn mean_log_prob(&self, letters: &[u8]) -> Option<f64> {
        if letters.len() < self.order {
            return None;
        }
        let grams = letters.len() - self.order + 1;
        Some(self.total_log_prob(letters) / grams as f64)
    }
}

fn encode_gram(gram: &[u8], order: usize) -> Option<usize> {
    if gram.len() != order {
        return None;
    }
    let mut code = 0usize;
    for &b in gram {
        let upper = b.to_ascii_uppercase();
        if !upper.is_ascii_uppercase() {
            return None;
        }
        code = code * ALPHABET_LEN + (upper - b'A') as usize;
    }
    Some(code)
}

/// Dictionary for sliding-window word matching
#[derive(Debug, Clone, Default)]
pub struct Wordlist {
    words: HashSet<String>,
    min_len: usize,
    max_len: usize,
}

impl Wordlist {
    /// Build from an iterator of words; non-alphabetic entries are skipped
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for word in words {
            let word = word.as_ref().trim();
            if word.is_empty() || !word.bytes().all(|b| b.is_ascii_alphabetic()) {
                continue;
            }
            set.insert(word.to_ascii_uppercase());
        }
        let min_len = set.iter().map(String::len).min().unwrap_or(0);
        let max_len = set.iter().map(String::len).max().unwrap_or(0);
        Self {
            words: set,
            min_len,
            max_len,
        }
    }

    /// Load one word per line
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::resource(path, format!("read failed: {}", e)))?;
        let wordlist = Self::from_words(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.starts_with('#')),
        );
        if wordlist.is_empty() {
            return Err(Error::resource(path, "wordlist has no usable words"));
        }
        debug!(path = %path.display(), words = wordlist.len(), "Loaded wordlist");
        Ok(wordlist)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Shortest word length present
    pub fn min_len(&self) -> usize {
        self.min_len
    }

    /// Longest word length present
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

/// Expected letter distribution (sums to 1.0)
#[derive(Debug, Clone, PartialEq)]
pub struct LetterFrequencies([f64; ALPHABET_LEN]);

impl Default for LetterFrequencies {
    fn default() -> Self {
        Self::english()
    }
}

impl LetterFrequencies {
    /// Standard English letter frequencies
    pub fn english() -> Self {
        let sum: f64 = ENGLISH_LETTER_FREQUENCIES.iter().sum();
        let mut freqs = ENGLISH_LETTER_FREQUENCIES;
        for f in freqs.iter_mut() {
            *f /= sum;
        }
        Self(freqs)
    }

    /// Derive from a unigram table (probabilities are renormalized)
    pub fn from_unigrams(table: &NgramTable) -> Self {
        let mut freqs = [0.0; ALPHABET_LEN];
        for (letter, f) in freqs.iter_mut().enumerate() {
            *f = 10f64.powf(table.log_prob(&[letter as u8]));
        }
        let sum: f64 = freqs.iter().sum();
        for f in freqs.iter_mut() {
            *f /= sum;
        }
        Self(freqs)
    }

    pub fn expected(&self, letter: usize) -> f64 {
        self.0[letter]
    }
}

/// Complete read-only language model handed to the scorer
#[derive(Debug, Clone)]
pub struct LanguageResources {
    ngrams: BTreeMap<usize, NgramTable>,
    highest: usize,
    wordlist: Option<Wordlist>,
    letter_frequencies: LetterFrequencies,
}

impl LanguageResources {
    /// Assemble from already-built parts
    ///
    /// At least one n-gram table is required.
    pub fn new(tables: Vec<NgramTable>, wordlist: Option<Wordlist>) -> Result<Self> {
        if tables.is_empty() {
            return Err(Error::Config(
                "At least one n-gram table is required".to_string(),
            ));
        }

        let mut ngrams = BTreeMap::new();
        for table in tables {
            ngrams.insert(table.order(), table);
        }
        let highest = ngrams.keys().copied().max().unwrap_or(1);

        let letter_frequencies = ngrams
            .get(&1)
            .map(LetterFrequencies::from_unigrams)
            .unwrap_or_default();

        Ok(Self {
            ngrams,
            highest,
            wordlist,
            letter_frequencies,
        })
    }

    /// Load every configured table and the wordlist
    pub fn load(paths: &ResourcePaths) -> Result<Self> {
        let mut tables = Vec::new();
        for (order, path) in paths.ngram_paths() {
            if let Some(path) = path {
                tables.push(NgramTable::load(path, order)?);
            }
        }

        if tables.is_empty() {
            return Err(Error::resource(
                "<resources>",
                "no n-gram table configured (set at least one of unigrams/bigrams/trigrams/quadgrams)",
            ));
        }

        let wordlist = paths.wordlist.as_deref().map(Wordlist::load).transpose()?;

        info!(
            orders = ?tables.iter().map(NgramTable::order).collect::<Vec<_>>(),
            words = wordlist.as_ref().map(Wordlist::len).unwrap_or(0),
            "Language resources loaded"
        );

        Self::new(tables, wordlist)
    }

    /// Table for a given order, if loaded
    pub fn ngram(&self, order: usize) -> Option<&NgramTable> {
        self.ngrams.get(&order)
    }

    /// Highest-order table available
    pub fn highest_order(&self) -> &NgramTable {
        &self.ngrams[&self.highest]
    }

    pub fn wordlist(&self) -> Option<&Wordlist> {
        self.wordlist.as_ref()
    }

    pub fn letter_frequencies(&self) -> &LetterFrequencies {
        &self.letter_frequencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_unseen_gram_scores_floor() {
        let table = NgramTable::from_counts(2, vec![("TH", 90u64), ("HE", 10)]).unwrap();
        let th = table.log_prob(&[19, 7]);
        assert!((th - 0.9f64.log10()).abs() < 1e-12);
        let qz = table.log_prob(&[16, 25]);
        assert_eq!(qz, table.floor());
        assert!(qz.is_finite());
        assert!(qz < th);
    }

    #[test]
    fn test_load_rejects_malformed_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# trigram counts").unwrap();
        writeln!(file, "THE 100").unwrap();
        writeln!(file, "AN 5").unwrap();

        let err = NgramTable::load(file.path(), 3).unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }

    #[test]
    fn test_load_missing_file_is_resource_error() {
        let err = NgramTable::load(Path::new("/no/such/table.txt"), 4).unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }

    #[test]
    fn test_mean_log_prob_short_text() {
        let table = NgramTable::from_counts(4, vec![("TION", 3u64)]).unwrap();
        assert!(table.mean_log_prob(&[0, 1, 2]).is_none());
        assert!(table.mean_log_prob(&[19, 8, 14, 13]).is_some());
    }

    #[test]
    fn test_wordlist_skips_non_alpha() {
        let words = Wordlist::from_words(["berlin", "clock", "don't", "", "EAST"]);
        assert_eq!(words.len(), 3);
        assert!(words.contains("BERLIN"));
        assert_eq!(words.min_len(), 4);
        assert_eq!(words.max_len(), 6);
    }

    #[test]
    fn test_resources_require_a_table() {
        assert!(LanguageResources::new(vec![], None).is_err());
        let err = LanguageResources::load(&ResourcePaths::default()).unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }

    #[test]
    fn test_letter_frequencies_from_unigrams() {
        let table = NgramTable::from_counts(1, vec![("E", 3u64), ("T", 1)]).unwrap();
        let freqs = LetterFrequencies::from_unigrams(&table);
        assert!(freqs.expected(4) > 0.7);
        let total: f64 = (0..ALPHABET_LEN).map(|i| freqs.expected(i)).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
