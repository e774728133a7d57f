//! Region filters and their composition into a filter collection.
//!
//! A [`RegionFilter`] pairs a genomic region with a disjunction of
//! [`AbstractRule`]s; a [`FilterCollection`] evaluates an ordered list of
//! region filters against each record. Lower-indexed regions dominate,
//! excluder regions veto, and fall-through mode keeps iterating after a
//! positive match so every counter stays complete.
//!
//! Collections are built once from a JSON script (see [`FilterCollection::from_json_str`])
//! or from command-line shortcuts, and are immutable afterwards except for
//! the hit counters.

use crate::range::Range;
use crate::region::{self, merge_named, NamedInterval, RegionIndex};
use crate::rule::AbstractRule;
use anyhow::{bail, Context, Result};
use bio::io::bed;
use log::warn;
use rust_htslib::bam::{HeaderView, Record};
use serde_json::{Map, Value};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Keys allowed inside a region block.
const REGION_KEYS: &[&str] = &["region", "pad", "matelink", "exclude", "rules"];

/// A genomic region plus the rules that decide reads overlapping it.
#[derive(Clone, Debug)]
pub struct RegionFilter {
    /// The region block's name in the script, with `_exclude` appended for
    /// excluders.
    pub id: String,
    /// The raw region string the block carried.
    pub region_string: String,
    pub index: RegionIndex,
    pub whole_genome: bool,
    /// Also test the mate's window for overlap.
    pub applies_to_mate: bool,
    pub pad: i64,
    /// A match in this region rejects the read overall.
    pub excluder: bool,
    pub rules: Vec<AbstractRule>,
    /// 1-based declaration position.
    pub level: u32,
    /// Reads whose first accepting rule lives in this region.
    pub hit_count: u64,
}

impl RegionFilter {
    /// A whole-genome region carrying one rule.
    pub fn whole_genome(id: &str, rule: AbstractRule) -> Self {
        Self {
            id: id.to_string(),
            region_string: "WG".to_string(),
            index: RegionIndex::default(),
            whole_genome: true,
            applies_to_mate: false,
            pad: 0,
            excluder: false,
            rules: vec![rule],
            level: 0,
            hit_count: 0,
        }
    }

    /// Does the read (or, with mate-linking, its mate) overlap this region?
    pub fn overlaps(&self, record: &Record) -> bool {
        if self.whole_genome {
            return true;
        }
        let end = record.cigar().end_pos();
        if self.index.any_overlap(record.tid(), record.pos(), end) {
            return true;
        }
        if !self.applies_to_mate {
            return false;
        }
        self.index.any_overlap(
            record.mtid(),
            record.mpos(),
            record.mpos() + record.seq_len() as i64,
        )
    }

    /// First accepting rule, if any. An empty rule list is a trivial match
    /// with no rule index.
    pub fn match_rules(&self, record: &mut Record) -> (bool, Option<usize>) {
        if self.rules.is_empty() {
            return (true, None);
        }
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.test(record) {
                return (true, Some(i));
            }
        }
        (false, None)
    }
}

/// Command-line shortcuts for building a one-region collection without a
/// script.
#[derive(Clone, Debug, Default)]
pub struct CommandLineSpec {
    /// Region string; `None` means whole genome.
    pub region: Option<String>,
    pub pad: i64,
    pub mate_linked: bool,
    pub exclude: bool,
    pub on_mask: u16,
    pub off_mask: u16,
    pub min_length: Option<i64>,
    pub min_mapq: Option<i64>,
    pub min_clip: Option<i64>,
    pub min_phred: Option<i64>,
    pub min_ins: Option<i64>,
    pub min_del: Option<i64>,
    pub max_nbases: Option<i64>,
    pub motif: Option<String>,
    pub read_group: Option<String>,
    pub subsample: Option<f64>,
}

/// The ordered set of region filters plus global state and counters.
#[derive(Clone, Debug, Default)]
pub struct FilterCollection {
    pub regions: Vec<RegionFilter>,
    /// Template merged into every parsed rule before the rule's own keys.
    pub global_rule: AbstractRule,
    fall_through: bool,
    /// Header target names, for the BED and interval exports.
    targets: Vec<String>,
    pub seen_count: u64,
    pub passed_count: u64,
}

impl FilterCollection {
    /// Load a filter script from a file.
    pub fn from_path<P: AsRef<Path>>(path: P, header: Option<&HeaderView>) -> Result<Self> {
        let path = path.as_ref();
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read filter script: {}", path.display()))?;
        Self::from_json_str(&script, header)
    }

    /// Build a collection from a JSON script.
    ///
    /// An empty script yields the pass-everything collection. Unknown keys,
    /// malformed values, and unresolvable regions are fatal.
    pub fn from_json_str(script: &str, header: Option<&HeaderView>) -> Result<Self> {
        if script.trim().is_empty() {
            warn!("Filter script is empty; keeping all reads");
            return Ok(Self::finish(
                Vec::new(),
                AbstractRule::default(),
                header,
            ));
        }
        let root: Value =
            serde_json::from_str(script).context("Failed to parse JSON filter script")?;
        let root = match root {
            Value::Object(map) => map,
            other => bail!("Filter script must be a JSON object, got {}", other),
        };

        let mut global_rule = AbstractRule::default();
        if let Some(glob) = root.get("global") {
            let obj = glob
                .as_object()
                .ok_or_else(|| anyhow::anyhow!("'global' must be an object, got {}", glob))?;
            global_rule.apply_json(obj)?;
        }

        // every other key is a region block, evaluated in declaration order
        let mut regions = Vec::new();
        for (level, (name, block)) in root
            .iter()
            .filter(|(name, _)| name.as_str() != "global")
            .enumerate()
        {
            let block = block.as_object().ok_or_else(|| {
                anyhow::anyhow!("Region block '{}' must be an object, got {}", name, block)
            })?;
            regions.push(Self::parse_region_block(
                name,
                block,
                &global_rule,
                level as u32 + 1,
                header,
            )?);
        }

        Ok(Self::finish(regions, global_rule, header))
    }

    /// Build a one-region collection from command-line shortcuts.
    pub fn from_command_line(spec: &CommandLineSpec, header: Option<&HeaderView>) -> Result<Self> {
        let mut rule = AbstractRule::default();
        rule.id = "cmdline".to_string();
        if spec.on_mask != 0 {
            rule.flag.on_mask = spec.on_mask;
        }
        if spec.off_mask != 0 {
            rule.flag.off_mask = spec.off_mask;
        }
        if let Some(len) = spec.min_length {
            rule.len = Range::at_least(len);
        }
        if let Some(mapq) = spec.min_mapq {
            rule.mapq = Range::at_least(mapq);
        }
        if let Some(clip) = spec.min_clip {
            rule.clip = Range::at_least(clip);
        }
        if let Some(phred) = spec.min_phred {
            rule.phred = Range::at_least(phred);
        }
        if let Some(ins) = spec.min_ins {
            rule.ins = Range::at_least(ins);
        }
        if let Some(del) = spec.min_del {
            rule.del = Range::at_least(del);
        }
        if let Some(nbases) = spec.max_nbases {
            rule.nbases = Range::at_most(nbases);
        }
        if let Some(path) = &spec.motif {
            rule.motif = Some(crate::motif::MotifRule {
                matcher: crate::motif::MotifMatcher::from_file(path)?,
                inverted: false,
            });
        }
        if let Some(rg) = &spec.read_group {
            rule.read_group = Some(rg.clone());
        }
        if let Some(fraction) = spec.subsample {
            if !(fraction > 0.0 && fraction <= 1.0) {
                bail!("Subsample fraction must be in (0, 1], got {}", fraction);
            }
            rule.subsample_fraction = fraction;
        }

        let mut filter = match &spec.region {
            None => RegionFilter::whole_genome("cmdline", rule),
            Some(region_str) if region_str == "WG" || region_str.is_empty() => {
                RegionFilter::whole_genome("cmdline", rule)
            }
            Some(region_str) => RegionFilter {
                id: "cmdline".to_string(),
                region_string: region_str.clone(),
                index: region::resolve_region(region_str, spec.pad, header)?,
                whole_genome: false,
                applies_to_mate: spec.mate_linked,
                pad: spec.pad,
                excluder: false,
                rules: vec![rule],
                level: 1,
                hit_count: 0,
            },
        };
        filter.excluder = spec.exclude;
        if filter.excluder {
            filter.id.push_str("_exclude");
        }
        filter.level = 1;

        Ok(Self::finish(vec![filter], AbstractRule::default(), header))
    }

    fn parse_region_block(
        name: &str,
        block: &Map<String, Value>,
        global_rule: &AbstractRule,
        level: u32,
        header: Option<&HeaderView>,
    ) -> Result<RegionFilter> {
        for key in block.keys() {
            if !REGION_KEYS.contains(&key.as_str()) {
                bail!("Invalid key in region block '{}': '{}'", name, key);
            }
        }

        let pad = match block.get("pad") {
            None => 0,
            Some(v) => v
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("'pad' in '{}' must be an integer, got {}", name, v))?,
        };
        let applies_to_mate = bool_key(block, "matelink", name)?;
        let excluder = bool_key(block, "exclude", name)?;

        let region_string = match block.get("region") {
            None => String::new(),
            Some(v) => v
                .as_str()
                .ok_or_else(|| {
                    anyhow::anyhow!("'region' in '{}' must be a string, got {}", name, v)
                })?
                .to_string(),
        };
        let whole_genome = region_string.is_empty() || region_string == "WG";
        let index = if whole_genome {
            RegionIndex::default()
        } else {
            region::resolve_region(&region_string, pad, header)?
        };

        let rules = match block.get("rules") {
            None => vec![global_rule.clone()],
            Some(Value::Array(items)) => {
                let mut rules = Vec::with_capacity(items.len());
                for item in items {
                    let obj = item.as_object().ok_or_else(|| {
                        anyhow::anyhow!("Rule in region '{}' must be an object, got {}", name, item)
                    })?;
                    // the global template seeds every rule; the rule's own
                    // keys override it
                    let mut rule = global_rule.clone();
                    rule.apply_json(obj)?;
                    rules.push(rule);
                }
                if rules.is_empty() {
                    vec![global_rule.clone()]
                } else {
                    rules
                }
            }
            Some(other) => bail!("'rules' in region '{}' must be an array, got {}", name, other),
        };

        let mut id = name.to_string();
        if excluder {
            id.push_str("_exclude");
        }

        Ok(RegionFilter {
            id,
            region_string,
            index,
            whole_genome,
            applies_to_mate,
            pad,
            excluder,
            rules,
            level,
            hit_count: 0,
        })
    }

    fn finish(
        mut regions: Vec<RegionFilter>,
        global_rule: AbstractRule,
        header: Option<&HeaderView>,
    ) -> Self {
        // the collection must always be able to include something; a script
        // of pure excluders gets a synthetic whole-genome includer
        if !regions.iter().any(|r| !r.excluder) {
            let mut includer = RegionFilter::whole_genome("WG_includer", global_rule.clone());
            includer.level = regions.len() as u32 + 1;
            regions.push(includer);
        }
        let fall_through = regions.iter().any(|r| r.excluder);
        Self {
            regions,
            global_rule,
            fall_through,
            targets: header.map(region::target_names).unwrap_or_default(),
            seen_count: 0,
            passed_count: 0,
        }
    }

    /// Force fall-through evaluation. Excluder regions force it regardless.
    pub fn set_fall_through(&mut self, enabled: bool) {
        self.fall_through = enabled || self.regions.iter().any(|r| r.excluder);
    }

    pub fn fall_through(&self) -> bool {
        self.fall_through
    }

    /// Classify one record: `true` to keep it.
    ///
    /// Regions are visited in declaration order. The first accepting rule of
    /// a region is its match; an excluder match latches the reject verdict.
    /// Without fall-through the loop stops at the first match; with it, every
    /// overlapping region keeps its counters complete.
    pub fn classify(&mut self, record: &mut Record) -> bool {
        self.seen_count += 1;

        let mut included = false;
        let mut excluded = false;
        for filter in &mut self.regions {
            if !filter.overlaps(record) {
                continue;
            }
            let (matched, which_rule) = filter.match_rules(record);
            if !matched {
                continue;
            }
            if filter.excluder {
                excluded = true;
            }
            // once an excluder fired, no later positive hit can re-include
            included = !excluded && !filter.excluder;
            filter.hit_count += 1;
            if let Some(idx) = which_rule {
                filter.rules[idx].hit_count += 1;
            }
            if !self.fall_through {
                break;
            }
        }

        if included {
            self.passed_count += 1;
        }
        included
    }

    /// The merged union of every region's intervals.
    pub fn all_regions(&self) -> Vec<NamedInterval> {
        merge_named(
            self.regions.iter().flat_map(|r| r.index.iter()),
            &self.targets,
        )
    }

    /// Write the merged region union as BED.
    pub fn send_to_bed<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = bed::Writer::to_file(path)
            .with_context(|| format!("Cannot write BED file: {}", path.display()))?;
        for iv in self.all_regions() {
            let mut record = bed::Record::new();
            record.set_chrom(&iv.chrom);
            record.set_start(u64::from(iv.start));
            record.set_end(u64::from(iv.stop));
            writer
                .write(&record)
                .with_context(|| format!("Cannot write BED file: {}", path.display()))?;
        }
        Ok(())
    }

    /// Write per-region and per-rule counters as TSV.
    pub fn counts_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Cannot write counts file: {}", path.display()))?;
        let mut out = BufWriter::new(file);
        self.write_counts(&mut out)
            .with_context(|| format!("Cannot write counts file: {}", path.display()))
    }

    /// Counter TSV body, one row per (region, rule) pair.
    pub fn write_counts<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(
            out,
            "total_seen_count\ttotal_passed_count\tregion\tregion_passed_count\trule\trule_passed_count"
        )?;
        for filter in &self.regions {
            for rule in &filter.rules {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    self.seen_count,
                    self.passed_count,
                    filter.id,
                    filter.hit_count,
                    rule.display_id(),
                    rule.hit_count
                )?;
            }
        }
        Ok(())
    }
}

fn bool_key(block: &Map<String, Value>, key: &str, region: &str) -> Result<bool> {
    match block.get(key) {
        None => Ok(false),
        Some(v) => v.as_bool().ok_or_else(|| {
            anyhow::anyhow!("'{}' in region '{}' must be a boolean, got {}", key, region, v)
        }),
    }
}

impl fmt::Display for RegionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.excluder {
            "--Exclude Region: "
        } else {
            "--Include Region: "
        };
        if self.whole_genome {
            writeln!(f, "{}WHOLE GENOME", kind)?;
        } else {
            writeln!(
                f,
                "{}{} pad: {} matelink: {} ({} intervals)",
                kind,
                self.region_string,
                self.pad,
                if self.applies_to_mate { "ON" } else { "OFF" },
                self.index.len()
            )?;
        }
        for rule in &self.rules {
            writeln!(f, "{}", rule)?;
        }
        Ok(())
    }
}

impl fmt::Display for FilterCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "----------FilterCollection----------")?;
        writeln!(
            f,
            "--- fall-through counting: {}",
            if self.fall_through { "ON" } else { "OFF" }
        )?;
        for filter in &self.regions {
            write!(f, "{}", filter)?;
        }
        write!(f, "------------------------------------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::header::{Header, HeaderRecord};
    use rust_htslib::bam::record::{Cigar, CigarString};
    use std::io::Write as _;

    const FLAG_DUP: u16 = 0x400;

    fn test_header() -> HeaderView {
        let mut header = Header::new();
        for (name, len) in [("1", 249_250_621u64), ("2", 243_199_373u64)] {
            let mut rec = HeaderRecord::new(b"SQ");
            rec.push_tag(b"SN", &name.to_string());
            rec.push_tag(b"LN", &len.to_string());
            header.push_record(&rec);
        }
        HeaderView::from_header(&header)
    }

    fn read_at(tid: i32, pos: i64, mapq: u8) -> Record {
        let mut rec = Record::new();
        rec.set(
            b"q1",
            Some(&CigarString(vec![Cigar::Match(1)])),
            b"A",
            &[30],
        );
        rec.set_tid(tid);
        rec.set_pos(pos);
        rec.set_mapq(mapq);
        rec
    }

    #[test]
    fn mapq_band_end_to_end() {
        let script = r#"{"r1":{"region":"WG","rules":[{"mapq":[30,60]}]}}"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();
        for (mapq, expect) in [(29u8, false), (30, true), (60, true), (61, false)] {
            let mut rec = read_at(0, 100, mapq);
            assert_eq!(collection.classify(&mut rec), expect, "mapq {}", mapq);
        }
        assert_eq!(collection.seen_count, 4);
        assert_eq!(collection.passed_count, 2);
    }

    #[test]
    fn global_rule_seeds_every_rule() {
        let script = r#"{"global":{"!duplicate":true}, "r1":{"region":"WG","rules":[{}]}}"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();

        let mut dup = read_at(0, 100, 30);
        dup.set_flags(FLAG_DUP);
        assert!(!collection.classify(&mut dup));

        let mut clean = read_at(0, 100, 30);
        assert!(collection.classify(&mut clean));
    }

    #[test]
    fn excluder_vetoes_later_includer() {
        let script = r#"{
            "bad":{"region":"WG","exclude":true,"rules":[{"mapq":[0,9]}]},
            "keep":{"region":"WG","rules":[{"all":true}]}
        }"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();
        // an excluder forces fall-through
        assert!(collection.fall_through());

        let mut low = read_at(0, 100, 5);
        assert!(!collection.classify(&mut low));

        let mut high = read_at(0, 100, 30);
        assert!(collection.classify(&mut high));

        assert_eq!(collection.regions[0].hit_count, 1);
        assert_eq!(collection.regions[0].id, "bad_exclude");
        // fall-through means the includer still counted the vetoed read
        assert_eq!(collection.regions[1].hit_count, 2);
    }

    #[test]
    fn padded_locus_bounds() {
        let header = test_header();
        let script = r#"{"r":{"region":"1:100-200","pad":10,"rules":[{"all":true}]}}"#;
        let mut collection = FilterCollection::from_json_str(script, Some(&header)).unwrap();
        // padded window is 1-based 90..210
        for (pos_1based, expect) in [(90i64, true), (89, false), (210, true), (211, false)] {
            let mut rec = read_at(0, pos_1based - 1, 30);
            assert_eq!(collection.classify(&mut rec), expect, "pos {}", pos_1based);
        }
    }

    #[test]
    fn declaration_order_dominates() {
        let script = r#"{
            "zfirst":{"region":"WG","rules":[{"mapq":[0,10]}]},
            "asecond":{"region":"WG","rules":[{"all":true}]}
        }"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();
        let mut low = read_at(0, 100, 5);
        assert!(collection.classify(&mut low));
        // without fall-through, the winning hit is the lowest-index region
        assert_eq!(collection.regions[0].id, "zfirst");
        assert_eq!(collection.regions[0].hit_count, 1);
        assert_eq!(collection.regions[1].hit_count, 0);
    }

    #[test]
    fn fall_through_counts_every_match() {
        let script = r#"{
            "a":{"region":"WG","rules":[{"all":true}]},
            "b":{"region":"WG","rules":[{"all":true}]}
        }"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();
        collection.set_fall_through(true);
        let mut rec = read_at(0, 100, 30);
        assert!(collection.classify(&mut rec));
        assert_eq!(collection.regions[0].hit_count, 1);
        assert_eq!(collection.regions[1].hit_count, 1);
        // per-rule counters track their region's
        assert_eq!(collection.regions[0].rules[0].hit_count, 1);
        assert_eq!(collection.regions[1].rules[0].hit_count, 1);
    }

    #[test]
    fn first_accepting_rule_wins_within_region() {
        let script = r#"{
            "r":{"region":"WG","rules":[{"mapq":[0,10]},{"all":true}]}
        }"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();
        let mut low = read_at(0, 100, 5);
        assert!(collection.classify(&mut low));
        assert_eq!(collection.regions[0].rules[0].hit_count, 1);
        assert_eq!(collection.regions[0].rules[1].hit_count, 0);

        let mut high = read_at(0, 100, 30);
        assert!(collection.classify(&mut high));
        assert_eq!(collection.regions[0].rules[0].hit_count, 1);
        assert_eq!(collection.regions[0].rules[1].hit_count, 1);
    }

    #[test]
    fn only_excluders_get_synthetic_includer() {
        let script = r#"{"bad":{"region":"WG","exclude":true,"rules":[{"mapq":[0,9]}]}}"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();
        assert_eq!(collection.regions.len(), 2);
        assert_eq!(collection.regions[1].id, "WG_includer");
        assert!(!collection.regions[1].excluder);

        let mut low = read_at(0, 100, 5);
        assert!(!collection.classify(&mut low));
        let mut high = read_at(0, 100, 30);
        assert!(collection.classify(&mut high));
    }

    #[test]
    fn empty_script_keeps_everything() {
        let mut collection = FilterCollection::from_json_str("", None).unwrap();
        assert_eq!(collection.regions.len(), 1);
        let mut rec = read_at(0, 100, 0);
        assert!(collection.classify(&mut rec));
        assert_eq!(collection.passed_count, 1);
    }

    #[test]
    fn classification_is_idempotent() {
        let script = r#"{"r1":{"region":"WG","rules":[{"mapq":[30,60]}]}}"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();
        let rec = read_at(0, 100, 45);
        let first = collection.classify(&mut rec.clone());
        for _ in 0..5 {
            assert_eq!(collection.classify(&mut rec.clone()), first);
        }
    }

    #[test]
    fn unknown_region_key_is_fatal() {
        let script = r#"{"r1":{"regoin":"WG"}}"#;
        let err = FilterCollection::from_json_str(script, None).unwrap_err();
        assert!(err.to_string().contains("regoin"));
    }

    #[test]
    fn unknown_rule_key_is_fatal() {
        let script = r#"{"r1":{"region":"WG","rules":[{"quality":30}]}}"#;
        assert!(FilterCollection::from_json_str(script, None).is_err());
    }

    #[test]
    fn rules_must_be_an_array() {
        let script = r#"{"r1":{"region":"WG","rules":{"mapq":[0,10]}}}"#;
        assert!(FilterCollection::from_json_str(script, None).is_err());
    }

    #[test]
    fn malformed_json_is_fatal() {
        assert!(FilterCollection::from_json_str("{not json", None).is_err());
    }

    #[test]
    fn region_without_rules_inherits_global() {
        let script = r#"{"global":{"mapq":[30,60]}, "r1":{"region":"WG"}}"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();
        let mut low = read_at(0, 100, 5);
        assert!(!collection.classify(&mut low));
        let mut ok = read_at(0, 100, 45);
        assert!(collection.classify(&mut ok));
    }

    #[test]
    fn matelink_checks_mate_window() {
        let header = test_header();
        let script = r#"{"r":{"region":"1:1000-2000","matelink":true,"rules":[{"all":true}]}}"#;
        let mut collection = FilterCollection::from_json_str(script, Some(&header)).unwrap();

        // read itself far away, mate inside the region
        let mut rec = read_at(0, 500_000, 30);
        rec.set_mtid(0);
        rec.set_mpos(1500);
        assert!(collection.classify(&mut rec));

        // both read and mate outside
        let mut rec = read_at(0, 500_000, 30);
        rec.set_mtid(0);
        rec.set_mpos(900_000);
        assert!(!collection.classify(&mut rec));
    }

    #[test]
    fn counts_file_layout() {
        let script = r#"{"r1":{"region":"WG","rules":[{"mapq":[30,60]},{"all":true}]}}"#;
        let mut collection = FilterCollection::from_json_str(script, None).unwrap();
        let mut rec = read_at(0, 100, 45);
        collection.classify(&mut rec);
        let mut low = read_at(0, 100, 5);
        collection.classify(&mut low);

        let mut buf = Vec::new();
        collection.write_counts(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "total_seen_count\ttotal_passed_count\tregion\tregion_passed_count\trule\trule_passed_count"
        );
        assert_eq!(lines.next().unwrap(), "2\t2\tr1\t2\tmapq\t1");
        assert_eq!(lines.next().unwrap(), "2\t2\tr1\t2\tall\t1");
    }

    #[test]
    fn bed_union_round_trips() {
        let header = test_header();
        let mut bed_in = tempfile::NamedTempFile::new().unwrap();
        writeln!(bed_in, "1\t100\t200\ta\t0").unwrap();
        writeln!(bed_in, "1\t150\t400\tb\t0").unwrap();
        writeln!(bed_in, "2\t50\t80\tc\t0").unwrap();
        bed_in.flush().unwrap();

        let script = format!(
            r#"{{"r":{{"region":"{}","rules":[{{"all":true}}]}}}}"#,
            bed_in.path().display()
        );
        let collection = FilterCollection::from_json_str(&script, Some(&header)).unwrap();

        let merged = collection.all_regions();
        assert_eq!(
            merged,
            vec![
                NamedInterval {
                    chrom: "1".to_string(),
                    start: 100,
                    stop: 400
                },
                NamedInterval {
                    chrom: "2".to_string(),
                    start: 50,
                    stop: 80
                },
            ]
        );

        let out = tempfile::NamedTempFile::new().unwrap();
        collection.send_to_bed(out.path()).unwrap();
        let mut reader = bed::Reader::from_file(out.path()).unwrap();
        let records: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].chrom(), "1");
        assert_eq!(records[0].start(), 100);
        assert_eq!(records[0].end(), 400);
        assert_eq!(records[1].chrom(), "2");
        assert_eq!(records[1].start(), 50);
        assert_eq!(records[1].end(), 80);
    }

    #[test]
    fn command_line_shortcuts_build_a_collection() {
        let header = test_header();
        let spec = CommandLineSpec {
            region: Some("1:100-200".to_string()),
            min_mapq: Some(30),
            ..Default::default()
        };
        let mut collection = FilterCollection::from_command_line(&spec, Some(&header)).unwrap();

        let mut inside_good = read_at(0, 150, 45);
        assert!(collection.classify(&mut inside_good));

        let mut inside_low = read_at(0, 150, 10);
        assert!(!collection.classify(&mut inside_low));

        let mut outside = read_at(0, 5_000, 45);
        assert!(!collection.classify(&mut outside));
    }

    #[test]
    fn command_line_exclude_gets_synthetic_includer() {
        let header = test_header();
        let spec = CommandLineSpec {
            region: Some("1:100-200".to_string()),
            exclude: true,
            ..Default::default()
        };
        let mut collection = FilterCollection::from_command_line(&spec, Some(&header)).unwrap();
        assert_eq!(collection.regions.len(), 2);

        // inside the excluded window
        let mut inside = read_at(0, 150, 45);
        assert!(!collection.classify(&mut inside));

        // outside it, the synthetic includer keeps the read
        let mut outside = read_at(0, 5_000, 45);
        assert!(collection.classify(&mut outside));
    }
}
