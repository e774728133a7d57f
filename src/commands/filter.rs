//! # Read filtering
//!
//! Streams a BAM/CRAM file record by record, classifies each read against a
//! filter collection, and reports totals. The collection comes either from a
//! JSON script (`--rules`) or from the command-line shortcut options, which
//! build a single-region filter without a script.
//!
//! The command writes no BAM output; its products are the include/exclude
//! totals, the optional per-rule counts TSV, and the optional merged-region
//! BED export.

use anyhow::{Context, Result};
use bamsieve_lib::filter::{CommandLineSpec, FilterCollection};
use log::*;
use rust_htslib::bam::{self, Read};
use std::path::PathBuf;
use structopt::StructOpt;

/// Classify reads against a filter script and report counts.
#[derive(StructOpt)]
#[structopt(author, name = "filter")]
pub struct FilterArgs {
    /// Input BAM/CRAM to classify.
    reads: PathBuf,

    /// JSON filter script. When omitted, the shortcut options below define a
    /// single region with one rule.
    #[structopt(long, short = "r")]
    rules: Option<PathBuf>,

    /// Region for the shortcut filter: WG, a BED file, chrom:start-end, or a
    /// chromosome name.
    #[structopt(long, short = "g")]
    region: Option<String>,

    /// Padding applied to every interval of the shortcut region.
    #[structopt(long, default_value = "0")]
    pad: i64,

    /// Also match reads whose mate falls in the shortcut region.
    #[structopt(long)]
    matelink: bool,

    /// Treat the shortcut region as an excluder.
    #[structopt(long)]
    exclude: bool,

    /// Keep only reads with all of these flag bits set.
    #[structopt(long, short = "f", default_value = "0")]
    include_flag: u16,

    /// Drop reads with any of these flag bits set.
    #[structopt(long, short = "F", default_value = "0")]
    exclude_flag: u16,

    /// Minimum read length after phred trimming.
    #[structopt(long)]
    min_length: Option<i64>,

    /// Minimum mapping quality.
    #[structopt(long, short = "q")]
    min_mapq: Option<i64>,

    /// Minimum number of clipped bases.
    #[structopt(long)]
    min_clip: Option<i64>,

    /// Trim read ends below this base quality before the length test.
    #[structopt(long)]
    min_phred: Option<i64>,

    /// Minimum length of the longest insertion run.
    #[structopt(long)]
    min_ins: Option<i64>,

    /// Minimum length of the longest deletion run.
    #[structopt(long)]
    min_del: Option<i64>,

    /// Maximum number of N bases.
    #[structopt(long)]
    max_nbases: Option<i64>,

    /// Newline-delimited motif file; keep reads containing any motif.
    #[structopt(long)]
    motif: Option<String>,

    /// Keep only reads from this read group.
    #[structopt(long)]
    read_group: Option<String>,

    /// Keep approximately this fraction of reads, deterministically by name.
    #[structopt(long, short = "s")]
    subsample: Option<f64>,

    /// Evaluate every region for every read so all counters are complete.
    #[structopt(long)]
    fall_through: bool,

    /// Write per-region and per-rule hit counts as TSV.
    #[structopt(long, short = "c")]
    counts: Option<PathBuf>,

    /// Write the merged union of all region intervals as BED.
    #[structopt(long, short = "b")]
    bed: Option<PathBuf>,
}

pub fn run_filter(args: FilterArgs) -> Result<()> {
    info!("Running bamsieve-filter on: {:?}", args.reads);

    let mut reader = bam::Reader::from_path(&args.reads)
        .with_context(|| format!("Failed to open {}", args.reads.display()))?;
    let header = reader.header().to_owned();

    let mut collection = match &args.rules {
        Some(script) => FilterCollection::from_path(script, Some(&header))?,
        None => {
            let spec = CommandLineSpec {
                region: args.region.clone(),
                pad: args.pad,
                mate_linked: args.matelink,
                exclude: args.exclude,
                on_mask: args.include_flag,
                off_mask: args.exclude_flag,
                min_length: args.min_length,
                min_mapq: args.min_mapq,
                min_clip: args.min_clip,
                min_phred: args.min_phred,
                min_ins: args.min_ins,
                min_del: args.min_del,
                max_nbases: args.max_nbases,
                motif: args.motif.clone(),
                read_group: args.read_group.clone(),
                subsample: args.subsample,
            };
            FilterCollection::from_command_line(&spec, Some(&header))?
        }
    };
    collection.set_fall_through(args.fall_through);
    info!("{}", collection);

    let mut record = bam::Record::new();
    while let Some(result) = reader.read(&mut record) {
        result.context("Failed to read BAM record")?;
        collection.classify(&mut record);
    }

    info!(
        "Classified {} reads, {} passed",
        collection.seen_count, collection.passed_count
    );

    if let Some(path) = &args.counts {
        collection.counts_to_file(path)?;
        info!("Wrote counts to {}", path.display());
    }
    if let Some(path) = &args.bed {
        collection.send_to_bed(path)?;
        info!("Wrote merged regions to {}", path.display());
    }

    Ok(())
}
