//! Sequence-motif matching backed by an Aho-Corasick automaton.
//!
//! The engine only depends on the boolean match interface: a motif file is a
//! newline-delimited dictionary of patterns, and a read matches when any
//! pattern occurs as a substring of its sequence. The automaton is built once
//! at load time; the file handle does not survive construction.

use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};
use log::{info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// A compiled motif dictionary.
#[derive(Clone, Debug)]
pub struct MotifMatcher {
    automaton: AhoCorasick,
    path: PathBuf,
    count: usize,
}

impl MotifMatcher {
    /// Load a newline-delimited motif file and compile the automaton.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Cannot read motif file: {}", path.display()))?;
        let mut patterns = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line
                .with_context(|| format!("Error reading motif file: {}", path.display()))?;
            if !line.is_empty() {
                patterns.push(line);
            }
        }
        if patterns.is_empty() {
            warn!("Motif file {} contains no motifs", path.display());
        }
        let count = patterns.len();
        let automaton = AhoCorasick::new(&patterns)
            .with_context(|| format!("Failed to build motif automaton from {}", path.display()))?;
        info!("Built motif automaton with {} motifs from {}", count, path.display());
        Ok(Self {
            automaton,
            path: path.to_path_buf(),
            count,
        })
    }

    /// True when any motif occurs in `seq`.
    pub fn matches(&self, seq: &[u8]) -> bool {
        self.automaton.is_match(seq)
    }

    pub fn motif_count(&self) -> usize {
        self.count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A motif predicate as it appears in a rule: a matcher plus the inversion
/// flag from the `motif` / `!motif` keys.
#[derive(Clone, Debug)]
pub struct MotifRule {
    pub matcher: MotifMatcher,
    pub inverted: bool,
}

impl MotifRule {
    /// Accept when a match is found, or when no match is found and the
    /// predicate is inverted.
    pub fn accepts(&self, seq: &[u8]) -> bool {
        self.matcher.matches(seq) ^ self.inverted
    }
}
