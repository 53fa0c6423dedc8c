//! Index command - link replays to bracket sets by connect code

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use relaycast_core::linkage::parse_bracket_sets;
use relaycast_core::{Config, LinkedSet, ReplayIndex, merge_into_config};
use relaycast_shared::fs::{MAX_DOCUMENT_BYTES, read_text_with_limit};
use relaycast_shared::split_pair_key;

/// Arguments for the index command
#[derive(Args)]
pub struct IndexArgs {
    /// Directory scanned recursively for replays
    pub dir: PathBuf,

    /// Bracket sets to link (bare array or `{ "sets": [...] }`)
    #[arg(long)]
    pub sets: Option<PathBuf>,

    /// Bracket config whose `referenceReplayMap.sets` receives the links
    #[arg(long, requires = "sets")]
    pub merge_into: Option<PathBuf>,

    /// Write the linked sets (or the pair buckets, without --sets) as JSON
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    /// Extensions to scan, overriding the configured list
    #[arg(long, value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// List the codes found in each file
    #[arg(long, short)]
    pub verbose: bool,
}

/// Execute the index command
pub fn execute(args: IndexArgs, config: &Config) -> Result<()> {
    let extensions = if args.extensions.is_empty() {
        config.index.extensions.clone()
    } else {
        args.extensions.clone()
    };

    let index = ReplayIndex::scan(&args.dir, &extensions)
        .with_context(|| format!("Failed to index {}", args.dir.display()))?;

    println!("=== Replay Index: {} ===", args.dir.display());
    println!();
    println!("  Files:       {}", index.file_count());
    println!("  Code pairs:  {}", index.len());
    if let Some((code, count)) = index.most_common_code() {
        println!("  Most common: {code} ({count} files)");
    }
    println!();

    if args.verbose {
        for (path, codes) in index.files() {
            let codes = if codes.is_empty() { "-".to_string() } else { codes.join(", ") };
            println!("  {}: {codes}", path.display());
        }
        println!();
    }

    let Some(sets_path) = &args.sets else {
        for (key, paths) in index.buckets() {
            println!("  {}: {} replay(s)", pair_label(key), paths.len());
        }
        if let Some(out) = &args.out {
            let buckets: serde_json::Map<String, serde_json::Value> = index
                .buckets()
                .map(|(key, paths)| {
                    let paths = paths
                        .iter()
                        .map(|p| serde_json::Value::from(p.to_string_lossy().into_owned()))
                        .collect();
                    (key.to_string(), serde_json::Value::Array(paths))
                })
                .collect();
            write_json(out, &serde_json::Value::Object(buckets))?;
        }
        return Ok(());
    };

    let sets = parse_bracket_sets(&read_text_with_limit(sets_path, MAX_DOCUMENT_BYTES)?)
        .with_context(|| format!("Invalid bracket sets: {}", sets_path.display()))?;
    let linked = index.link_sets(&sets);
    print_links(&linked, sets.len());

    if let Some(out) = &args.out {
        write_json(out, &serde_json::to_value(&linked)?)?;
    }

    if let Some(config_path) = &args.merge_into {
        let updated = merge_links(config_path, &linked)?;
        println!(
            "Merged into {}: {} updated, {} added",
            config_path.display(),
            updated,
            linked.len() - updated
        );
    }
    Ok(())
}

/// `A vs B` for a pair key, or the key itself if it is not a pair.
fn pair_label(key: &str) -> String {
    match split_pair_key(key) {
        Some((a, b)) => format!("{a} vs {b}"),
        None => key.to_string(),
    }
}

fn print_links(linked: &[LinkedSet], total: usize) {
    println!("Linked {} of {} set(s):", linked.len(), total);
    for set in linked {
        let round = set
            .round
            .map(|round| format!(" (round {round})"))
            .unwrap_or_default();
        println!("  set {}{}: {} replay(s)", set.id, round, set.replays.len());
    }
    println!();
}

/// Merge links into a bracket config, creating the document if it is missing.
fn merge_links(config_path: &Path, linked: &[LinkedSet]) -> Result<usize> {
    let mut doc = if config_path.exists() {
        let json = read_text_with_limit(config_path, MAX_DOCUMENT_BYTES)?;
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid bracket config: {}", config_path.display()))?
    } else {
        serde_json::json!({})
    };
    let updated = merge_into_config(&mut doc, linked)?;
    write_json(config_path, &doc)?;
    Ok(updated)
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}
