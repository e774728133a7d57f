//! A single conjunctive filter rule and its per-read decision procedure.
//!
//! An [`AbstractRule`] combines numeric ranges, flag conditions, an optional
//! motif dictionary, an optional read-group match, and deterministic
//! subsampling. Predicates are evaluated cheapest-first so most reads are
//! rejected before any sequence or quality data is touched.

use crate::flags::FlagRule;
use crate::motif::{MotifMatcher, MotifRule};
use crate::range::Range;
use crate::record::RecordExt;
use anyhow::{bail, Result};
use rust_htslib::bam::Record;
use serde_json::{Map, Value};
use std::fmt;

/// Seed mixed into the read-name hash when no explicit seed is set.
pub const DEFAULT_SUBSAMPLE_SEED: u32 = 999;

/// Rule keys that are not named flag bits.
const SCALAR_KEYS: &[&str] = &[
    "isize", "clip", "phred", "length", "nm", "mapq", "nbases", "ins", "del", "xp", "sub", "rg",
    "motif", "!motif", "flag", "!flag", "all",
];

/// Named flag bits; each is also accepted in the negated `!name` spelling.
const FLAG_BIT_KEYS: &[&str] = &[
    "duplicate",
    "supplementary",
    "qcfail",
    "hardclip",
    "fwd_strand",
    "rev_strand",
    "mate_fwd",
    "mate_fwd_strand",
    "mate_rev",
    "mate_rev_strand",
    "mapped",
    "mate_mapped",
    "ff",
    "fr",
    "rf",
    "rr",
    "ic",
];

/// True when `key` is a recognized rule key.
pub fn is_valid_rule_key(key: &str) -> bool {
    if SCALAR_KEYS.contains(&key) {
        return true;
    }
    let base = key.strip_prefix('!').unwrap_or(key);
    FLAG_BIT_KEYS.contains(&base)
}

/// One conjunctive predicate over a read.
#[derive(Clone, Debug)]
pub struct AbstractRule {
    /// Derived from the rule's JSON keys; "all" when nothing is constrained.
    pub id: String,
    pub read_group: Option<String>,
    pub isize: Range,
    pub mapq: Range,
    pub len: Range,
    pub clip: Range,
    pub phred: Range,
    pub nbases: Range,
    pub ins: Range,
    pub del: Range,
    pub nm: Range,
    pub xp: Range,
    pub flag: FlagRule,
    pub motif: Option<MotifRule>,
    pub subsample_fraction: f64,
    pub subsample_seed: u32,
    /// Reads this rule accepted.
    pub hit_count: u64,
}

impl Default for AbstractRule {
    fn default() -> Self {
        Self {
            id: String::new(),
            read_group: None,
            isize: Range::Every,
            mapq: Range::Every,
            len: Range::Every,
            clip: Range::Every,
            phred: Range::Every,
            nbases: Range::Every,
            ins: Range::Every,
            del: Range::Every,
            nm: Range::Every,
            xp: Range::Every,
            flag: FlagRule::default(),
            motif: None,
            subsample_fraction: 1.0,
            subsample_seed: DEFAULT_SUBSAMPLE_SEED,
            hit_count: 0,
        }
    }
}

impl AbstractRule {
    /// An inactive rule: accepts every record.
    pub fn is_every(&self) -> bool {
        self.read_group.is_none()
            && self.isize.is_every()
            && self.mapq.is_every()
            && self.len.is_every()
            && self.clip.is_every()
            && self.phred.is_every()
            && self.nbases.is_every()
            && self.ins.is_every()
            && self.del.is_every()
            && self.nm.is_every()
            && self.xp.is_every()
            && self.flag.is_every()
            && self.motif.is_none()
            && self.subsample_fraction >= 1.0
    }

    /// Display id for counter output.
    pub fn display_id(&self) -> &str {
        if self.id.is_empty() {
            "all"
        } else {
            &self.id
        }
    }

    pub fn set_subsample(&mut self, fraction: f64, seed: u32) {
        self.subsample_fraction = fraction;
        self.subsample_seed = seed;
    }

    /// Layer one rule object on top of the current state. Called once with
    /// the global fragment and once with the rule's own keys, so rule keys
    /// override the global template.
    pub fn apply_json(&mut self, obj: &Map<String, Value>) -> Result<()> {
        for key in obj.keys() {
            if !is_valid_rule_key(key) {
                bail!("Invalid key in rule JSON: '{}'", key);
            }
            if !self.id.is_empty() {
                self.id.push(';');
            }
            self.id.push_str(key);
        }

        if let Some(v) = obj.get("rg") {
            let rg = v
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("'rg' must be a string, got {}", v))?;
            self.read_group = Some(rg.to_string());
        }

        for (name, slot) in [
            ("isize", &mut self.isize),
            ("mapq", &mut self.mapq),
            ("length", &mut self.len),
            ("clip", &mut self.clip),
            ("phred", &mut self.phred),
            ("nbases", &mut self.nbases),
            ("ins", &mut self.ins),
            ("del", &mut self.del),
            ("nm", &mut self.nm),
            ("xp", &mut self.xp),
        ] {
            if let Some(v) = obj.get(name) {
                *slot = Range::parse(v, name)?;
            }
        }

        self.flag.apply_json(obj)?;

        if let Some(v) = obj.get("sub") {
            let fraction = v
                .as_f64()
                .ok_or_else(|| anyhow::anyhow!("'sub' must be a number, got {}", v))?;
            if !(fraction > 0.0 && fraction <= 1.0) {
                bail!("'sub' must be in (0, 1], got {}", fraction);
            }
            self.subsample_fraction = fraction;
        }

        // A motif inherited from the global template is kept; rule-level
        // motif keys only apply when none is set yet.
        if self.motif.is_none() {
            let (path, inverted) = match (obj.get("motif"), obj.get("!motif")) {
                (Some(v), _) => (Some(v), false),
                (None, Some(v)) => (Some(v), true),
                (None, None) => (None, false),
            };
            if let Some(v) = path {
                let path = v
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("motif file must be a string, got {}", v))?;
                self.motif = Some(MotifRule {
                    matcher: MotifMatcher::from_file(path)?,
                    inverted,
                });
            }
        }

        Ok(())
    }

    fn subsample_accepts(&self, qname: &[u8]) -> bool {
        let k = wang_hash(x31_hash(qname) ^ self.subsample_seed);
        (f64::from(k & 0xFF_FFFF) / f64::from(0x100_0000)) < self.subsample_fraction
    }

    /// Decide whether a record satisfies the rule.
    ///
    /// The record is mutable only for the GV annotation written during phred
    /// trimming; no other field is touched.
    pub fn test(&self, record: &mut Record) -> bool {
        if self.is_every() {
            return true;
        }

        if self.subsample_fraction < 1.0 && !self.subsample_accepts(record.qname()) {
            return false;
        }

        if !self.isize.contains(record.full_insert_size()) {
            return false;
        }

        if let Some(want) = &self.read_group {
            match record.read_group() {
                Some(found) if &found == want => {}
                _ => return false,
            }
        }

        if !self.mapq.contains(i64::from(record.mapq())) {
            return false;
        }

        if !self.flag.test(record) {
            return false;
        }

        if !self.ins.is_every() || !self.del.is_every() {
            if !self.ins.contains(record.max_insertion_run()) {
                return false;
            }
            if !self.del.contains(record.max_deletion_run()) {
                return false;
            }
        }

        // Everything below needs sequence, quality, or tag data.
        let need_more = !self.nm.is_every()
            || !self.clip.is_every()
            || !self.len.is_every()
            || !self.nbases.is_every()
            || !self.xp.is_every()
            || self.motif.is_some();
        if !need_more {
            return true;
        }

        let mut clipnum = 0;
        if !self.clip.is_every() {
            clipnum = record.clipped_bases();
            // Trimming can only lower the clip count; when no other predicate
            // could still rescue the read, fail without building the sequence.
            if self.nm.is_every()
                && self.len.is_every()
                && self.nbases.is_every()
                && !self.clip.contains(clipnum)
            {
                return false;
            }
        }

        if !self.nm.is_every() && !self.nm.contains(record.int_tag_or_zero(b"NM")) {
            return false;
        }

        let original_len = record.seq_len() as i64;
        let (new_len, new_clip) = if self.phred.is_every() {
            (original_len, clipnum)
        } else {
            let min_phred = self.phred.lower_bound().clamp(0, i64::from(u8::MAX)) as u8;
            let (start, end) = record.quality_trimmed_window(min_phred);
            let new_len = end - start;

            // The annotation is written before any reject so that the tag is
            // present even on reads this rule discards.
            let seq = record.seq().as_bytes();
            let trimmed = if end != -1
                && new_len > 0
                && new_len < original_len
                && start + new_len <= original_len
            {
                &seq[start as usize..(start + new_len) as usize]
            } else {
                &seq[..]
            };
            let tag = String::from_utf8_lossy(trimmed).into_owned();
            record.set_string_tag(b"GV", &tag);

            if end == -1 || new_len == 0 {
                return false;
            }
            (new_len, (clipnum - (original_len - new_len)).max(0))
        };

        // N count is over the whole read, not the trimmed window.
        if !self.nbases.is_every() && !self.nbases.contains(record.n_base_count()) {
            return false;
        }

        if !self.len.contains(new_len) {
            return false;
        }

        if !self.clip.contains(new_clip) {
            return false;
        }

        if !self.xp.is_every() && !self.xp.contains(record.secondary_alignment_count()) {
            return false;
        }

        if let Some(motif) = &self.motif {
            if !motif.accepts(&record.seq().as_bytes()) {
                return false;
            }
        }

        true
    }
}

/// The khash X31 string hash, folded over the read name bytes.
fn x31_hash(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in bytes {
        h = (h << 5).wrapping_sub(h).wrapping_add(u32::from(b));
    }
    h
}

/// The khash Wang integer mixer.
fn wang_hash(mut key: u32) -> u32 {
    key = key.wrapping_add(!(key << 15));
    key ^= key >> 10;
    key = key.wrapping_add(key << 3);
    key ^= key >> 6;
    key = key.wrapping_add(!(key << 11));
    key ^= key >> 16;
    key
}

impl fmt::Display for AbstractRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  Rule: ")?;
        if self.is_every() {
            return write!(f, "ALL");
        }
        if let Some(rg) = &self.read_group {
            write!(f, "rg:{} -- ", rg)?;
        }
        for (name, range) in [
            ("isize", &self.isize),
            ("mapq", &self.mapq),
            ("length", &self.len),
            ("clip", &self.clip),
            ("phred", &self.phred),
            ("nm", &self.nm),
            ("xp", &self.xp),
            ("nbases", &self.nbases),
            ("ins", &self.ins),
            ("del", &self.del),
        ] {
            if !range.is_every() {
                write!(f, "{}:{} -- ", name, range)?;
            }
        }
        if self.subsample_fraction < 1.0 {
            write!(f, "sub:{} -- ", self.subsample_fraction)?;
        }
        if let Some(motif) = &self.motif {
            write!(
                f,
                "{}matching {} motifs from {} -- ",
                if motif.inverted { "NOT " } else { "" },
                motif.matcher.motif_count(),
                motif.matcher.path().display()
            )?;
        }
        write!(f, "{}", self.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::{Aux, Cigar, CigarString};
    use serde_json::json;

    const FLAG_DUP: u16 = 0x400;

    fn rule_from(obj: serde_json::Value) -> AbstractRule {
        let mut rule = AbstractRule::default();
        rule.apply_json(obj.as_object().unwrap()).unwrap();
        rule
    }

    fn read_with_quals(name: &[u8], quals: &[u8]) -> Record {
        let mut rec = Record::new();
        let seq: Vec<u8> = (0..quals.len())
            .map(|i| b"ACGT"[i % 4])
            .collect();
        rec.set(
            name,
            Some(&CigarString(vec![Cigar::Match(quals.len() as u32)])),
            &seq,
            quals,
        );
        rec
    }

    #[test]
    fn every_rule_is_neutral() {
        let rule = AbstractRule::default();
        assert!(rule.is_every());
        let mut rec = read_with_quals(b"q1", &[30; 20]);
        rec.set_flags(FLAG_DUP);
        assert!(rule.test(&mut rec));
    }

    #[test]
    fn mapq_band() {
        let rule = rule_from(json!({"mapq": [30, 60]}));
        for (mapq, expect) in [(29u8, false), (30, true), (60, true), (61, false)] {
            let mut rec = read_with_quals(b"q1", &[30; 20]);
            rec.set_mapq(mapq);
            assert_eq!(rule.test(&mut rec), expect, "mapq {}", mapq);
        }
    }

    #[test]
    fn subsample_is_deterministic() {
        let rule = rule_from(json!({"sub": 0.5}));
        let mut rec = read_with_quals(b"read_42", &[30; 20]);
        let first = rule.test(&mut rec.clone());
        for _ in 0..10 {
            assert_eq!(rule.test(&mut rec), first);
        }
    }

    #[test]
    fn subsample_rate_approaches_fraction() {
        let rule = rule_from(json!({"sub": 0.5}));
        let mut accepted = 0usize;
        let total = 10_000usize;
        for i in 0..total {
            let name = format!("synthetic_read_{}", i);
            let mut rec = read_with_quals(name.as_bytes(), &[30; 20]);
            if rule.test(&mut rec) {
                accepted += 1;
            }
        }
        let rate = accepted as f64 / total as f64;
        assert!((0.48..=0.52).contains(&rate), "rate {}", rate);
    }

    #[test]
    fn different_seeds_resample() {
        let mut a = AbstractRule::default();
        a.set_subsample(0.5, 1);
        let mut b = AbstractRule::default();
        b.set_subsample(0.5, 2);
        let mut differs = false;
        for i in 0..100 {
            let name = format!("read_{}", i);
            let mut r1 = read_with_quals(name.as_bytes(), &[30; 10]);
            let mut r2 = read_with_quals(name.as_bytes(), &[30; 10]);
            if a.test(&mut r1) != b.test(&mut r2) {
                differs = true;
                break;
            }
        }
        assert!(differs, "seeds 1 and 2 agreed on 100 reads");
    }

    #[test]
    fn phred_trim_shrinks_length() {
        // 60 bases: 8 low-quality, 45 good, 7 low-quality. The trimmed window
        // is 45 bases, which fails a length >= 50 requirement.
        let mut quals = Vec::new();
        quals.extend_from_slice(&[10; 8]);
        quals.extend_from_slice(&[30; 45]);
        quals.extend_from_slice(&[10; 7]);
        let rule = rule_from(json!({"phred": [20, 9223372036854775807i64], "length": [50, 9223372036854775807i64]}));
        let mut rec = read_with_quals(b"q1", &quals);
        assert!(!rule.test(&mut rec));

        // the same read with uniformly good quality keeps its 60 bases
        let mut good = read_with_quals(b"q1", &[30; 60]);
        assert!(rule.test(&mut good));
    }

    #[test]
    fn phred_trim_annotates_gv() {
        let mut quals = Vec::new();
        quals.extend_from_slice(&[5; 4]);
        quals.extend_from_slice(&[30; 12]);
        quals.extend_from_slice(&[5; 4]);
        let rule = rule_from(json!({"phred": 20, "length": 1}));
        let mut rec = read_with_quals(b"q1", &quals);
        let seq = rec.seq().as_bytes();
        assert!(rule.test(&mut rec));
        match rec.aux(b"GV") {
            Ok(Aux::String(s)) => {
                assert_eq!(s.as_bytes(), &seq[4..16]);
            }
            other => panic!("missing GV tag: {:?}", other),
        }
    }

    #[test]
    fn phred_alone_never_fires() {
        // trimming only runs in service of the sequence-level predicates;
        // a rule constraining nothing but phred accepts everything untouched
        let rule = rule_from(json!({"phred": 20}));
        let mut rec = read_with_quals(b"q1", &[5; 10]);
        assert!(rule.test(&mut rec));
        assert!(rec.aux(b"GV").is_err());
    }

    #[test]
    fn fully_trimmed_read_rejected_but_annotated() {
        let rule = rule_from(json!({"phred": 20, "length": 1}));
        let mut rec = read_with_quals(b"q1", &[5; 10]);
        let seq = rec.seq().as_bytes();
        assert!(!rule.test(&mut rec));
        // annotation falls back to the untrimmed sequence on the reject path
        match rec.aux(b"GV") {
            Ok(Aux::String(s)) => assert_eq!(s.as_bytes(), &seq[..]),
            other => panic!("missing GV tag: {:?}", other),
        }
    }

    #[test]
    fn trim_reduces_clip_count() {
        // 4S16M: 4 soft-clipped bases, query length 20. Trimming 5 leading
        // low-quality bases leaves new_len 15, so new_clip = 4 - (20-15) < 0,
        // clamped to 0.
        let mut quals = vec![5u8; 5];
        quals.extend_from_slice(&[30; 15]);
        let mut rec = Record::new();
        let seq: Vec<u8> = (0..20).map(|i| b"ACGT"[i % 4]).collect();
        rec.set(
            b"q1",
            Some(&CigarString(vec![Cigar::SoftClip(4), Cigar::Match(16)])),
            &seq,
            &quals,
        );
        // clip must be 0 after trimming; the active length range keeps the
        // pre-trim clip fast-fail from firing
        let rule = rule_from(json!({"phred": 20, "clip": [0, 0], "length": [1, 9223372036854775807i64]}));
        assert!(rule.test(&mut rec));

        // without trimming the same read fails the clip band
        let untrimmed = rule_from(json!({"clip": [0, 0]}));
        let mut rec2 = Record::new();
        rec2.set(
            b"q1",
            Some(&CigarString(vec![Cigar::SoftClip(4), Cigar::Match(16)])),
            &seq,
            &[30; 20],
        );
        assert!(!untrimmed.test(&mut rec2));
    }

    #[test]
    fn nm_and_xp_default_to_zero() {
        let nm_rule = rule_from(json!({"nm": [1, 10]}));
        let mut rec = read_with_quals(b"q1", &[30; 10]);
        assert!(!nm_rule.test(&mut rec));

        let mut tagged = read_with_quals(b"q1", &[30; 10]);
        tagged.push_aux(b"NM", Aux::I32(3)).unwrap();
        assert!(nm_rule.test(&mut tagged));

        let xp_rule = rule_from(json!({"xp": [0, 0]}));
        let mut no_xp = read_with_quals(b"q1", &[30; 10]);
        assert!(xp_rule.test(&mut no_xp));
    }

    #[test]
    fn read_group_must_match_exactly() {
        let rule = rule_from(json!({"rg": "lib1"}));

        let mut untagged = read_with_quals(b"q1", &[30; 10]);
        assert!(!rule.test(&mut untagged));

        let mut wrong = read_with_quals(b"q1", &[30; 10]);
        wrong.push_aux(b"RG", Aux::String("lib2")).unwrap();
        assert!(!rule.test(&mut wrong));

        let mut right = read_with_quals(b"q1", &[30; 10]);
        right.push_aux(b"RG", Aux::String("lib1")).unwrap();
        assert!(rule.test(&mut right));
    }

    #[test]
    fn insertion_and_deletion_runs() {
        let rule = rule_from(json!({"ins": 5}));
        let mut rec = Record::new();
        rec.set(
            b"q1",
            Some(&CigarString(vec![
                Cigar::Match(5),
                Cigar::Ins(6),
                Cigar::Match(5),
            ])),
            b"ACGTACGTACGTACGT",
            &[30; 16],
        );
        let mut rec2 = rec.clone();
        assert!(rule.test(&mut rec));

        let strict = rule_from(json!({"ins": [0, 2]}));
        assert!(!strict.test(&mut rec2));
    }

    #[test]
    fn unknown_key_is_fatal() {
        let mut rule = AbstractRule::default();
        let err = rule
            .apply_json(json!({"mapping_quality": [0, 10]}).as_object().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("mapping_quality"));
    }

    #[test]
    fn id_accumulates_keys() {
        let mut rule = AbstractRule::default();
        rule.apply_json(json!({"mapq": [0, 10]}).as_object().unwrap())
            .unwrap();
        rule.apply_json(json!({"length": 50}).as_object().unwrap())
            .unwrap();
        assert_eq!(rule.id, "mapq;length");
        assert_eq!(rule.display_id(), "mapq;length");
        assert_eq!(AbstractRule::default().display_id(), "all");
    }

    #[test]
    fn all_key_is_a_no_op() {
        let rule = rule_from(json!({"all": true}));
        assert!(rule.is_every());
        assert_eq!(rule.id, "all");
    }

    #[test]
    fn sub_out_of_range_is_fatal() {
        let mut rule = AbstractRule::default();
        assert!(rule
            .apply_json(json!({"sub": 0.0}).as_object().unwrap())
            .is_err());
        assert!(rule
            .apply_json(json!({"sub": 1.5}).as_object().unwrap())
            .is_err());
    }
}
