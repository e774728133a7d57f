//! Flag predicates: tri-state bits over the BAM flag word plus pair
//! orientation and raw on/off masks.

use crate::record::{PairOrientation, RecordExt};
use anyhow::{bail, Result};
use rust_htslib::bam::Record;
use serde_json::{Map, Value};
use std::fmt;

/// A tri-state condition on one boolean read property. `Na` leaves the
/// property unconstrained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Flag {
    #[default]
    Na,
    On,
    Off,
}

impl Flag {
    pub fn is_na(&self) -> bool {
        matches!(self, Flag::Na)
    }

    pub fn from_bool(required: bool) -> Self {
        if required {
            Flag::On
        } else {
            Flag::Off
        }
    }

    /// True when the bit is inactive or the observed value matches it.
    pub fn test(&self, observed: bool) -> bool {
        match self {
            Flag::Na => true,
            Flag::On => observed,
            Flag::Off => !observed,
        }
    }
}

/// Composite predicate over the flag word of a read.
///
/// Combines named tri-state bits, pair-orientation bits, and two raw
/// bitmasks. The rule is "every" when nothing is constrained, in which case
/// evaluation short-circuits to accept.
#[derive(Clone, Debug, Default)]
pub struct FlagRule {
    pub duplicate: Flag,
    pub supplementary: Flag,
    pub qcfail: Flag,
    pub hardclip: Flag,
    pub fwd_strand: Flag,
    pub mate_fwd: Flag,
    pub mate_rev: Flag,
    pub mapped: Flag,
    pub mate_mapped: Flag,
    pub paired: Flag,
    pub ff: Flag,
    pub fr: Flag,
    pub rf: Flag,
    pub rr: Flag,
    pub ic: Flag,
    /// Every bit set here must be set in the read's flag word.
    pub on_mask: u16,
    /// No bit set here may be set in the read's flag word.
    pub off_mask: u16,
}

/// Named-bit keys and the field each resolves to. `rev_strand` is the
/// negation of `fwd_strand`; the `mate_*_strand` spellings are aliases kept
/// for older scripts.
const BIT_KEYS: &[(&str, BitTarget)] = &[
    ("duplicate", BitTarget::Duplicate),
    ("supplementary", BitTarget::Supplementary),
    ("qcfail", BitTarget::Qcfail),
    ("hardclip", BitTarget::Hardclip),
    ("fwd_strand", BitTarget::FwdStrand),
    ("rev_strand", BitTarget::RevStrand),
    ("mate_fwd", BitTarget::MateFwd),
    ("mate_fwd_strand", BitTarget::MateFwd),
    ("mate_rev", BitTarget::MateRev),
    ("mate_rev_strand", BitTarget::MateRev),
    ("mapped", BitTarget::Mapped),
    ("mate_mapped", BitTarget::MateMapped),
    ("ff", BitTarget::Ff),
    ("fr", BitTarget::Fr),
    ("rf", BitTarget::Rf),
    ("rr", BitTarget::Rr),
    ("ic", BitTarget::Ic),
];

#[derive(Clone, Copy)]
enum BitTarget {
    Duplicate,
    Supplementary,
    Qcfail,
    Hardclip,
    FwdStrand,
    RevStrand,
    MateFwd,
    MateRev,
    Mapped,
    MateMapped,
    Ff,
    Fr,
    Rf,
    Rr,
    Ic,
}

impl FlagRule {
    pub fn is_every(&self) -> bool {
        self.duplicate.is_na()
            && self.supplementary.is_na()
            && self.qcfail.is_na()
            && self.hardclip.is_na()
            && self.fwd_strand.is_na()
            && self.mate_fwd.is_na()
            && self.mate_rev.is_na()
            && self.mapped.is_na()
            && self.mate_mapped.is_na()
            && self.paired.is_na()
            && self.ff.is_na()
            && self.fr.is_na()
            && self.rf.is_na()
            && self.rr.is_na()
            && self.ic.is_na()
            && self.on_mask == 0
            && self.off_mask == 0
    }

    /// Apply the flag-related keys of one rule object on top of the current
    /// state. Keys not related to flags are ignored here.
    pub fn apply_json(&mut self, obj: &Map<String, Value>) -> Result<()> {
        if let Some(v) = obj.get("flag") {
            self.on_mask = mask_value(v, "flag")?;
        }
        if let Some(v) = obj.get("!flag") {
            self.off_mask = mask_value(v, "!flag")?;
        }
        for (name, target) in BIT_KEYS {
            if let Some(required) = bit_value(obj, name)? {
                self.set_bit(*target, Flag::from_bool(required));
            }
        }
        Ok(())
    }

    fn set_bit(&mut self, target: BitTarget, flag: Flag) {
        match target {
            BitTarget::Duplicate => self.duplicate = flag,
            BitTarget::Supplementary => self.supplementary = flag,
            BitTarget::Qcfail => self.qcfail = flag,
            BitTarget::Hardclip => self.hardclip = flag,
            BitTarget::FwdStrand => self.fwd_strand = flag,
            // rev_strand is fwd_strand with the sense flipped
            BitTarget::RevStrand => {
                self.fwd_strand = match flag {
                    Flag::Na => Flag::Na,
                    Flag::On => Flag::Off,
                    Flag::Off => Flag::On,
                }
            }
            BitTarget::MateFwd => self.mate_fwd = flag,
            BitTarget::MateRev => self.mate_rev = flag,
            BitTarget::Mapped => self.mapped = flag,
            BitTarget::MateMapped => self.mate_mapped = flag,
            BitTarget::Ff => self.ff = flag,
            BitTarget::Fr => self.fr = flag,
            BitTarget::Rf => self.rf = flag,
            BitTarget::Rr => self.rr = flag,
            BitTarget::Ic => self.ic = flag,
        }
    }

    /// Evaluate the rule against a record.
    pub fn test(&self, record: &Record) -> bool {
        if self.is_every() {
            return true;
        }

        if self.on_mask != 0 && (record.flags() & self.on_mask) == 0 {
            return false;
        }
        if self.off_mask != 0 && (record.flags() & self.off_mask) != 0 {
            return false;
        }

        if !self.duplicate.test(record.is_duplicate()) {
            return false;
        }
        if !self.supplementary.test(record.is_supplementary()) {
            return false;
        }
        if !self.qcfail.test(record.is_quality_check_failed()) {
            return false;
        }
        if !self.mapped.test(!record.is_unmapped()) {
            return false;
        }
        if !self.mate_mapped.test(!record.is_mate_unmapped()) {
            return false;
        }
        if !self.fwd_strand.test(!record.is_reverse()) {
            return false;
        }
        if !self.mate_fwd.test(!record.is_mate_reverse()) {
            return false;
        }
        if !self.mate_rev.test(record.is_mate_reverse()) {
            return false;
        }
        if !self.paired.test(record.is_paired()) {
            return false;
        }

        // Single-op alignments are treated as non-hard-clipped regardless of
        // the bit, so the test only fires on multi-op CIGARs.
        if !self.hardclip.is_na() && record.cigar_op_count() > 1 {
            let hard_clipped = record.hard_clipped_bases() > 0;
            if !self.hardclip.test(hard_clipped) {
                return false;
            }
        }

        self.test_orientation(record)
    }

    fn test_orientation(&self, record: &Record) -> bool {
        let active = !self.ff.is_na()
            || !self.fr.is_na()
            || !self.rf.is_na()
            || !self.rr.is_na()
            || !self.ic.is_na();
        if !active {
            return true;
        }

        // Orientation is only defined for a fully mapped pair.
        let orientation = match record.pair_orientation() {
            Some(o) => o,
            None => return false,
        };

        if orientation == PairOrientation::Ic {
            // Orientation bits other than IC are skipped across chromosomes.
            return self.ic.test(true);
        }

        let checks = [
            (self.ff, PairOrientation::Ff),
            (self.fr, PairOrientation::Fr),
            (self.rf, PairOrientation::Rf),
            (self.rr, PairOrientation::Rr),
        ];
        for (bit, po) in checks {
            match bit {
                Flag::On if orientation != po => return false,
                Flag::Off if orientation == po => return false,
                _ => {}
            }
        }
        self.ic.test(false)
    }
}

fn mask_value(v: &Value, name: &str) -> Result<u16> {
    let raw = v
        .as_u64()
        .ok_or_else(|| anyhow::anyhow!("'{}' must be a non-negative integer, got {}", name, v))?;
    if raw > u64::from(u16::MAX) {
        bail!("'{}' does not fit a 16-bit flag word: {}", name, raw);
    }
    Ok(raw as u16)
}

/// Resolve the value for a named bit, honoring the negated `!name` spelling.
fn bit_value(obj: &Map<String, Value>, name: &str) -> Result<Option<bool>> {
    if let Some(v) = obj.get(name) {
        let b = v
            .as_bool()
            .ok_or_else(|| anyhow::anyhow!("flag '{}' must be a boolean, got {}", name, v))?;
        return Ok(Some(b));
    }
    let negated = format!("!{}", name);
    if let Some(v) = obj.get(&negated) {
        let b = v
            .as_bool()
            .ok_or_else(|| anyhow::anyhow!("flag '{}' must be a boolean, got {}", negated, v))?;
        return Ok(Some(!b));
    }
    Ok(None)
}

impl fmt::Display for FlagRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_every() {
            return write!(f, "flags: ALL");
        }
        let mut on = Vec::new();
        let mut off = Vec::new();
        if self.on_mask != 0 {
            on.push(format!("[{}]", self.on_mask));
        }
        if self.off_mask != 0 {
            off.push(format!("[{}]", self.off_mask));
        }
        let named = [
            ("duplicate", self.duplicate),
            ("supplementary", self.supplementary),
            ("qcfail", self.qcfail),
            ("hardclip", self.hardclip),
            ("fwd_strand", self.fwd_strand),
            ("mate_fwd", self.mate_fwd),
            ("mate_rev", self.mate_rev),
            ("mapped", self.mapped),
            ("mate_mapped", self.mate_mapped),
            ("paired", self.paired),
            ("ff", self.ff),
            ("fr", self.fr),
            ("rf", self.rf),
            ("rr", self.rr),
            ("ic", self.ic),
        ];
        for (name, bit) in named {
            match bit {
                Flag::On => on.push(name.to_string()),
                Flag::Off => off.push(name.to_string()),
                Flag::Na => {}
            }
        }
        match (on.is_empty(), off.is_empty()) {
            (false, false) => write!(f, "flags on: {} off: {}", on.join(","), off.join(",")),
            (false, true) => write!(f, "flags on: {}", on.join(",")),
            (true, false) => write!(f, "flags off: {}", off.join(",")),
            (true, true) => write!(f, "flags: ALL"),
        }
    }
}
