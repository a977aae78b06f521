//! Shared test fixtures
//!
//! Builds a small language model (n-gram tables of every order plus a
//! wordlist) from the bundled English corpus, writes it in the on-disk table
//! format and loads it back through the normal resource loader.

#![allow(dead_code)]

use k4_common::config::ResourcePaths;
use k4_common::text::normalize;
use k4_common::LanguageResources;
use k4_engine::scoring::Crib;
use k4_engine::stages::{StageKind, StageSpec};
use k4_engine::PipelineConfig;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const CORPUS: &str = include_str!("../fixtures/english_corpus.txt");

/// Corpus text without comment lines
pub fn corpus_text() -> String {
    CORPUS
        .lines()
        .filter(|l| !l.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `len` normalized letters starting where `opening` begins in the corpus
pub fn passage(opening: &str, len: usize) -> String {
    let letters = normalize(&corpus_text());
    let start = letters
        .find(&normalize(opening))
        .unwrap_or_else(|| panic!("'{}' not in corpus", opening));
    letters[start..start + len].to_string()
}

/// Language model written to disk and loaded back
pub struct TestResources {
    pub dir: TempDir,
    pub paths: ResourcePaths,
    pub resources: Arc<LanguageResources>,
}

fn write_table(path: &Path, letters: &str, order: usize) {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for start in 0..=letters.len() - order {
        *counts.entry(&letters[start..start + order]).or_insert(0) += 1;
    }
    let mut content = format!("# {}-grams\n", order);
    for (gram, count) in counts {
        content.push_str(&format!("{} {}\n", gram, count));
    }
    fs::write(path, content).unwrap();
}

/// Unigram..quadgram tables and a wordlist built from the corpus
pub fn corpus_resources() -> TestResources {
    let dir = TempDir::new().unwrap();
    let text = corpus_text();
    let letters = normalize(&text);

    let names = ["unigrams.txt", "bigrams.txt", "trigrams.txt", "quadgrams.txt"];
    for (i, name) in names.iter().enumerate() {
        write_table(&dir.path().join(name), &letters, i + 1);
    }

    let words: BTreeSet<String> = text
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase())
        .collect();
    let wordlist: Vec<String> = words.into_iter().collect();
    fs::write(dir.path().join("words.txt"), wordlist.join("\n")).unwrap();

    let paths = ResourcePaths {
        unigrams: Some(names[0].into()),
        bigrams: Some(names[1].into()),
        trigrams: Some(names[2].into()),
        quadgrams: Some(names[3].into()),
        wordlist: Some("words.txt".into()),
    }
    .relative_to(dir.path());

    let resources = Arc::new(LanguageResources::load(&paths).unwrap());
    TestResources {
        dir,
        paths,
        resources,
    }
}

/// Single-stage pipeline config with a fixed seed and worker count
pub fn single_stage(kind: StageKind, cribs: Vec<Crib>) -> PipelineConfig {
    let mut config = PipelineConfig::new(vec![StageSpec::new(kind)]);
    config.cribs = cribs;
    config.workers = 4;
    config.seed = 1;
    config
}
