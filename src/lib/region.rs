//! Genomic region resolution and the interval index used for overlap tests.
//!
//! A region string is one of: `"WG"` (or empty) for the whole genome, a path
//! to a BED file, a samtools-style `chrom:start-end` locus, or a bare
//! chromosome name covering the full contig. Everything except `"WG"`
//! resolves against the BAM header into one [`Lapper`] per target sequence.

use anyhow::{anyhow, bail, Context, Result};
use bio::io::bed;
use log::warn;
use rust_htslib::bam::HeaderView;
use rust_lapper::{Interval, Lapper};
use serde::Serialize;
use std::convert::TryInto;
use std::path::Path;

/// A resolved interval with its target name, as reported by the union
/// exports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NamedInterval {
    pub chrom: String,
    pub start: u32,
    pub stop: u32,
}

/// Interval sets for overlap testing, one [`Lapper`] per header target.
#[derive(Clone, Debug, Default)]
pub struct RegionIndex {
    lappers: Vec<Lapper<u32, ()>>,
    interval_count: usize,
}

impl RegionIndex {
    fn from_raw(per_tid: Vec<Vec<Interval<u32, ()>>>) -> Self {
        let interval_count = per_tid.iter().map(Vec::len).sum();
        let lappers = per_tid.into_iter().map(Lapper::new).collect();
        Self {
            lappers,
            interval_count,
        }
    }

    /// True when no interval was resolved.
    pub fn is_empty(&self) -> bool {
        self.interval_count == 0
    }

    /// Number of resolved intervals.
    pub fn len(&self) -> usize {
        self.interval_count
    }

    /// Does `[start, stop)` on target `tid` overlap any interval?
    pub fn any_overlap(&self, tid: i32, start: i64, stop: i64) -> bool {
        if tid < 0 || start >= stop {
            return false;
        }
        let lapper = match self.lappers.get(tid as usize) {
            Some(l) => l,
            None => return false,
        };
        let start: u32 = start.clamp(0, i64::from(u32::MAX)) as u32;
        let stop: u32 = stop.clamp(0, i64::from(u32::MAX)) as u32;
        lapper.find(start, stop).next().is_some()
    }

    /// All intervals as `(tid, start, stop)`, in target order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.lappers.iter().enumerate().flat_map(|(tid, lapper)| {
            lapper
                .iter()
                .map(move |iv| (tid as u32, iv.start, iv.stop))
        })
    }
}

/// Merge intervals per target and return them with names resolved through
/// `targets`.
pub fn merge_named(
    intervals: impl Iterator<Item = (u32, u32, u32)>,
    targets: &[String],
) -> Vec<NamedInterval> {
    let mut per_tid: Vec<Vec<Interval<u32, ()>>> = vec![Vec::new(); targets.len()];
    for (tid, start, stop) in intervals {
        if let Some(bucket) = per_tid.get_mut(tid as usize) {
            bucket.push(Interval {
                start,
                stop,
                val: (),
            });
        }
    }
    let mut out = Vec::new();
    for (tid, ivs) in per_tid.into_iter().enumerate() {
        if ivs.is_empty() {
            continue;
        }
        let mut lapper = Lapper::new(ivs);
        lapper.merge_overlaps();
        for iv in lapper.iter() {
            out.push(NamedInterval {
                chrom: targets[tid].clone(),
                start: iv.start,
                stop: iv.stop,
            });
        }
    }
    out
}

/// Target names from a BAM header, in tid order.
pub fn target_names(header: &HeaderView) -> Vec<String> {
    (0..header.target_count())
        .map(|tid| String::from_utf8_lossy(header.tid2name(tid)).into_owned())
        .collect()
}

/// Resolve a region string into an interval index.
///
/// `pad` widens every resolved interval on both sides. An empty result is a
/// warning, not an error; the index is kept and will simply never match.
pub fn resolve_region(region: &str, pad: i64, header: Option<&HeaderView>) -> Result<RegionIndex> {
    let header = header.ok_or_else(|| {
        anyhow!(
            "Cannot resolve region '{}' without a BAM header",
            region
        )
    })?;

    let index = if Path::new(region).exists() {
        bed_to_index(region, pad, header)?
    } else if region.contains(':') && region.contains('-') {
        locus_to_index(region, pad, header)?
    } else {
        chrom_to_index(region, pad, header)?
    };

    if index.is_empty() {
        warn!("No intervals resolved from region '{}'", region);
    }
    Ok(index)
}

fn empty_buckets(header: &HeaderView) -> Vec<Vec<Interval<u32, ()>>> {
    vec![Vec::new(); header.target_count() as usize]
}

fn push_padded(
    buckets: &mut [Vec<Interval<u32, ()>>],
    tid: u32,
    start: i64,
    stop: i64,
    pad: i64,
) {
    let start = (start - pad).clamp(0, i64::from(u32::MAX)) as u32;
    let stop = (stop + pad).clamp(0, i64::from(u32::MAX)) as u32;
    if stop <= start {
        return;
    }
    buckets[tid as usize].push(Interval {
        start,
        stop,
        val: (),
    });
}

/// Read a BED file into per-target intervals.
fn bed_to_index(bed_file: &str, pad: i64, header: &HeaderView) -> Result<RegionIndex> {
    let mut bed_reader = bed::Reader::from_file(bed_file)
        .with_context(|| format!("Cannot read BED file: {}", bed_file))?;
    let mut buckets = empty_buckets(header);
    for (i, record) in bed_reader.records().enumerate() {
        let record =
            record.with_context(|| format!("BED record {} in {} is invalid", i, bed_file))?;
        let tid = header.tid(record.chrom().as_bytes()).ok_or_else(|| {
            anyhow!(
                "Chromosome '{}' from {} not found in BAM header",
                record.chrom(),
                bed_file
            )
        })?;
        let start: i64 = record
            .start()
            .try_into()
            .with_context(|| format!("BED record {}: unable to parse start", i))?;
        let stop: i64 = record
            .end()
            .try_into()
            .with_context(|| format!("BED record {}: unable to parse stop", i))?;
        if stop < start {
            bail!("BED record {} in {} has stop < start", i, bed_file);
        }
        push_padded(&mut buckets, tid, start, stop, pad);
    }
    Ok(RegionIndex::from_raw(buckets))
}

/// Resolve a samtools-style `chrom:start-end` locus (1-based, inclusive).
fn locus_to_index(locus: &str, pad: i64, header: &HeaderView) -> Result<RegionIndex> {
    let (chrom, span) = locus
        .split_once(':')
        .ok_or_else(|| anyhow!("Malformed locus string: '{}'", locus))?;
    let (start_s, stop_s) = span
        .split_once('-')
        .ok_or_else(|| anyhow!("Malformed locus string: '{}'", locus))?;
    let start: i64 = start_s
        .replace(',', "")
        .parse()
        .with_context(|| format!("Non-numeric start in locus '{}'", locus))?;
    let stop: i64 = stop_s
        .replace(',', "")
        .parse()
        .with_context(|| format!("Non-numeric end in locus '{}'", locus))?;
    if start < 1 || stop < start {
        bail!("Locus '{}' is not a valid 1-based interval", locus);
    }
    let tid = header
        .tid(chrom.as_bytes())
        .ok_or_else(|| anyhow!("Chromosome '{}' not found in BAM header", chrom))?;
    let mut buckets = empty_buckets(header);
    // 1-based inclusive to 0-based half-open
    push_padded(&mut buckets, tid, start - 1, stop, pad);
    Ok(RegionIndex::from_raw(buckets))
}

/// A bare chromosome name expands to the full contig.
fn chrom_to_index(chrom: &str, pad: i64, header: &HeaderView) -> Result<RegionIndex> {
    let tid = header
        .tid(chrom.as_bytes())
        .ok_or_else(|| anyhow!("Chromosome '{}' not found in BAM header", chrom))?;
    let len: i64 = header
        .target_len(tid)
        .ok_or_else(|| anyhow!("Missing target length for '{}'", chrom))?
        .try_into()
        .map_err(|_| anyhow!("Target length overflow for '{}'", chrom))?;
    let mut buckets = empty_buckets(header);
    push_padded(&mut buckets, tid, 0, len, pad);
    Ok(RegionIndex::from_raw(buckets))
}
