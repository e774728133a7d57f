//! bamsieve - declarative BAM read filtering
//!
//! bamsieve classifies aligned reads against a JSON script of regions and
//! rules, reporting per-region and per-rule hit counts and the merged union
//! of all covered intervals.
//!
//! # Usage
//!
//! ```bash
//! # keep reads with mapq in [30,60] anywhere in the genome
//! bamsieve filter input.bam --rules rules.json --counts counts.tsv
//!
//! # quick command-line filter without a script
//! bamsieve filter input.bam --region 1:10000-20000 --min-mapq 30
//!
//! # export the merged footprint of every region in the script
//! bamsieve filter input.bam --rules rules.json --bed regions.bed
//! ```
//!
//! For the script grammar, see the documentation of
//! `bamsieve_lib::filter::FilterCollection`.

pub mod commands;
use anyhow::Result;
use bamsieve_lib::utils;
use env_logger::Env;
use log::*;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case", author, about)]
/// Commands for rule-based read filtering with bamsieve
struct Args {
    #[structopt(subcommand)]
    subcommand: Subcommand,
}

#[derive(StructOpt)]
enum Subcommand {
    /// Classify reads against a filter script and report counts
    Filter(commands::FilterArgs),
}

impl Subcommand {
    fn run(self) -> Result<()> {
        match self {
            Subcommand::Filter(args) => commands::run_filter(args)?,
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(err) = Args::from_args().subcommand.run() {
        if utils::is_broken_pipe(&err) {
            std::process::exit(0);
        }
        error!("{}", err);
        std::process::exit(1);
    }
    Ok(())
}
