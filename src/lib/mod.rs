//! bamsieve: declarative filtering of aligned sequencing reads.
//!
//! bamsieve classifies BAM records against a JSON script describing genomic
//! regions and per-read rules. Each region carries a disjunction of rules;
//! each rule is a conjunction of predicates over read attributes (flags,
//! mapping quality, insert size, CIGAR properties, quality-trimmed length,
//! base composition, sequence motifs, read group, deterministic
//! subsampling). The collection reports an include/exclude verdict per read
//! and keeps per-region and per-rule counters.
//!
//! # Modules
//!
//! - [`range`]: numeric interval predicates
//! - [`flags`]: tri-state flag bits and the composite flag rule
//! - [`motif`]: Aho-Corasick sequence-motif matching
//! - [`record`]: derived read properties over `rust_htslib` records
//! - [`rule`]: one conjunctive rule and its decision procedure
//! - [`region`]: region-string resolution and the interval index
//! - [`filter`]: region filters, the collection, and the JSON loader
//! - [`utils`]: shared helpers
//!
//! # Example
//!
//! ```no_run
//! use bamsieve_lib::filter::FilterCollection;
//!
//! let script = r#"{"keep":{"region":"WG","rules":[{"mapq":[30,60]}]}}"#;
//! let mut collection = FilterCollection::from_json_str(script, None).unwrap();
//! // stream records and call collection.classify(&mut record) on each
//! ```

pub mod filter;
pub mod flags;
pub mod motif;
pub mod range;
pub mod record;
pub mod region;
pub mod rule;
pub mod utils;
