//! Accessors over [`rust_htslib::bam::Record`] used by the filtering engine.
//!
//! rust-htslib exposes the raw record fields; the engine additionally needs a
//! handful of derived quantities (full insert size, pair orientation, CIGAR
//! summaries, quality-trim window, tag reads with absent-as-zero semantics).
//! [`RecordExt`] collects those in one place so the rule code stays readable.

use rust_htslib::bam::record::{Aux, Cigar, Record};

/// Relative orientation of a mapped read pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairOrientation {
    /// Forward-forward.
    Ff,
    /// Forward-reverse (the proper-pair layout).
    Fr,
    /// Reverse-forward (outward facing).
    Rf,
    /// Reverse-reverse.
    Rr,
    /// Mates on different chromosomes; orientation is not defined.
    Ic,
}

/// Derived read properties consumed by the filter predicates.
pub trait RecordExt {
    /// Both mates mapped and the record flagged as paired.
    fn pair_mapped(&self) -> bool;

    /// Mates aligned to different target sequences.
    fn is_interchromosomal(&self) -> bool;

    /// Pair orientation, or `None` when the pair is not fully mapped.
    fn pair_orientation(&self) -> Option<PairOrientation>;

    /// Absolute span covered by the pair: |pos - mate pos| plus the read
    /// length. Zero for unpaired, half-mapped, or inter-chromosomal records.
    fn full_insert_size(&self) -> i64;

    /// Length of the longest single insertion operation in the CIGAR.
    fn max_insertion_run(&self) -> i64;

    /// Length of the longest single deletion operation in the CIGAR.
    fn max_deletion_run(&self) -> i64;

    /// Total soft- plus hard-clipped bases.
    fn clipped_bases(&self) -> i64;

    /// Total hard-clipped bases.
    fn hard_clipped_bases(&self) -> i64;

    /// Number of CIGAR operations.
    fn cigar_op_count(&self) -> usize;

    /// Number of `N` calls in the read sequence.
    fn n_base_count(&self) -> i64;

    /// `[start, end)` window that survives trimming bases below `min_phred`
    /// from both ends. `end` is -1 when no base reaches the threshold.
    fn quality_trimmed_window(&self, min_phred: u8) -> (i64, i64);

    /// Integer tag value, or 0 when the tag is absent or not an integer.
    fn int_tag_or_zero(&self, tag: &[u8; 2]) -> i64;

    /// Count of secondary alignments: the XP integer tag when present,
    /// otherwise the number of entries in a BWA-style XA string, else 0.
    fn secondary_alignment_count(&self) -> i64;

    /// The RG tag, when present and non-empty.
    fn read_group(&self) -> Option<String>;

    /// Set a string tag, replacing any existing value.
    fn set_string_tag(&mut self, tag: &[u8; 2], value: &str);
}

impl RecordExt for Record {
    fn pair_mapped(&self) -> bool {
        self.is_paired() && !self.is_unmapped() && !self.is_mate_unmapped()
    }

    fn is_interchromosomal(&self) -> bool {
        self.pair_mapped() && self.tid() >= 0 && self.mtid() >= 0 && self.tid() != self.mtid()
    }

    fn pair_orientation(&self) -> Option<PairOrientation> {
        if !self.pair_mapped() {
            return None;
        }
        if self.is_interchromosomal() {
            return Some(PairOrientation::Ic);
        }
        let rev = self.is_reverse();
        let mate_rev = self.is_mate_reverse();
        let pos = self.pos();
        let mate_pos = self.mpos();
        // FR means the leftmost mate points forward and the rightmost
        // points back; RF is the outward-facing complement.
        let orientation = if (!rev && pos <= mate_pos && mate_rev)
            || (rev && pos >= mate_pos && !mate_rev)
        {
            PairOrientation::Fr
        } else if !rev && !mate_rev {
            PairOrientation::Ff
        } else if rev && mate_rev {
            PairOrientation::Rr
        } else {
            PairOrientation::Rf
        };
        Some(orientation)
    }

    fn full_insert_size(&self) -> i64 {
        if !self.pair_mapped() || self.tid() != self.mtid() {
            return 0;
        }
        (self.pos() - self.mpos()).abs() + self.seq_len() as i64
    }

    fn max_insertion_run(&self) -> i64 {
        self.cigar()
            .iter()
            .filter_map(|op| match op {
                Cigar::Ins(len) => Some(i64::from(*len)),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    fn max_deletion_run(&self) -> i64 {
        self.cigar()
            .iter()
            .filter_map(|op| match op {
                Cigar::Del(len) => Some(i64::from(*len)),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    fn clipped_bases(&self) -> i64 {
        self.cigar()
            .iter()
            .map(|op| match op {
                Cigar::SoftClip(len) | Cigar::HardClip(len) => i64::from(*len),
                _ => 0,
            })
            .sum()
    }

    fn hard_clipped_bases(&self) -> i64 {
        self.cigar()
            .iter()
            .map(|op| match op {
                Cigar::HardClip(len) => i64::from(*len),
                _ => 0,
            })
            .sum()
    }

    fn cigar_op_count(&self) -> usize {
        self.cigar().iter().count()
    }

    fn n_base_count(&self) -> i64 {
        self.seq()
            .as_bytes()
            .iter()
            .filter(|&&b| b == b'N' || b == b'n')
            .count() as i64
    }

    fn quality_trimmed_window(&self, min_phred: u8) -> (i64, i64) {
        let quals = self.qual();
        let mut start: i64 = 0;
        let mut end: i64 = -1;
        for (i, &q) in quals.iter().enumerate() {
            if q >= min_phred {
                start = i as i64;
                break;
            }
        }
        for (i, &q) in quals.iter().enumerate().rev() {
            if q >= min_phred {
                // one past the last kept base
                end = i as i64 + 1;
                break;
            }
        }
        (start, end)
    }

    fn int_tag_or_zero(&self, tag: &[u8; 2]) -> i64 {
        match self.aux(tag) {
            Ok(Aux::I8(v)) => i64::from(v),
            Ok(Aux::U8(v)) => i64::from(v),
            Ok(Aux::I16(v)) => i64::from(v),
            Ok(Aux::U16(v)) => i64::from(v),
            Ok(Aux::I32(v)) => i64::from(v),
            Ok(Aux::U32(v)) => i64::from(v),
            _ => 0,
        }
    }

    fn secondary_alignment_count(&self) -> i64 {
        match self.aux(b"XP") {
            Ok(Aux::I8(v)) => return i64::from(v),
            Ok(Aux::U8(v)) => return i64::from(v),
            Ok(Aux::I16(v)) => return i64::from(v),
            Ok(Aux::U16(v)) => return i64::from(v),
            Ok(Aux::I32(v)) => return i64::from(v),
            Ok(Aux::U32(v)) => return i64::from(v),
            _ => {}
        }
        match self.aux(b"XA") {
            Ok(Aux::String(s)) => s.bytes().filter(|&b| b == b';').count() as i64,
            _ => 0,
        }
    }

    fn read_group(&self) -> Option<String> {
        match self.aux(b"RG") {
            Ok(Aux::String(s)) if !s.is_empty() => Some(s.to_string()),
            _ => None,
        }
    }

    fn set_string_tag(&mut self, tag: &[u8; 2], value: &str) {
        // Replacing an existing tag: htslib refuses duplicate tags.
        let _ = self.remove_aux(tag);
        // The only failure mode left is an over-long record; the annotation
        // is best-effort either way.
        let _ = self.push_aux(tag, Aux::String(value));
    }
}
