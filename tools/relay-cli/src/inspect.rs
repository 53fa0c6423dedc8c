//! Inspect command - print the structure of a replay

use anyhow::{Context, Result};
use clap::Args;
use std::collections::BTreeMap;
use std::path::PathBuf;

use relaycast_core::replay::{DemuxedReplay, HeaderKind, ReplayReader, command};

/// Arguments for the inspect command
#[derive(Args)]
pub struct InspectArgs {
    /// Replay file to inspect
    pub replay: PathBuf,

    /// Print the record count per command tag
    #[arg(long, short)]
    pub verbose: bool,
}

fn header_label(kind: HeaderKind) -> String {
    match kind {
        HeaderKind::Empty => "empty".to_string(),
        HeaderKind::Raw => "raw (headerless)".to_string(),
        HeaderKind::Container => "container".to_string(),
        HeaderKind::Unknown(byte) => format!("unknown (leading byte {byte:#04x})"),
    }
}

fn tag_name(tag: u8) -> &'static str {
    match tag {
        command::SPLIT_MESSAGE => "split message",
        command::MESSAGE_SIZES => "message sizes",
        command::GAME_START => "game start",
        command::PRE_FRAME_UPDATE => "pre-frame update",
        command::POST_FRAME_UPDATE => "post-frame update",
        command::GAME_END => "game end",
        command::FRAME_START => "frame start",
        command::ITEM_UPDATE => "item update",
        command::FRAME_BOOKEND => "frame bookend",
        command::GECKO_LIST => "gecko list",
        _ => "",
    }
}

/// Record count per tag, in tag order.
fn tag_counts(replay: &DemuxedReplay) -> BTreeMap<u8, usize> {
    let mut counts = BTreeMap::new();
    for record in &replay.records {
        *counts.entry(record.tag).or_insert(0) += 1;
    }
    counts
}

/// Execute the inspect command
pub fn execute(args: InspectArgs) -> Result<()> {
    let reader = ReplayReader::open(&args.replay)?;
    let file_size = reader.file_size();
    let data_start = reader.data_start();
    let replay = reader
        .read_all()
        .with_context(|| format!("Failed to demux {}", args.replay.display()))?;

    println!("=== Replay: {} ===", args.replay.display());
    println!();
    println!("  File size:    {file_size} bytes");
    println!("  Header:       {}", header_label(replay.header.kind));
    println!(
        "  Raw region:   {}..{} ({} bytes)",
        replay.header.raw_data_position,
        replay.header.raw_data_end(),
        replay.header.raw_data_length
    );
    println!("  Events start: {data_start}");
    println!();

    println!("Message sizes:");
    if replay.sizes.is_empty() {
        println!("  (none declared)");
    }
    for (tag, size) in replay.sizes.iter() {
        println!("  {tag:#04x} {size:>5}  {}", tag_name(tag));
    }
    println!();

    println!("Records:      {}", replay.records.len());
    println!("Frame records: {}", replay.frame_record_count());
    match replay.last_frame {
        Some(frame) => println!("Last frame:   {frame}"),
        None => println!("Last frame:   -"),
    }
    println!("Stopped at:   {}", replay.stop);

    if args.verbose {
        println!();
        println!("Records by tag:");
        for (tag, count) in tag_counts(&replay) {
            println!("  {tag:#04x} {count:>8}  {}", tag_name(tag));
        }
    }

    if replay.stop.is_early() {
        tracing::warn!("Replay ended early: {}", replay.stop);
    }
    Ok(())
}
