//! Replay container writer
//!
//! Produces the byte layout a live capture writes: the container preamble, the
//! framed region (size declaration + records), and a metadata trailer. The
//! framed-region length is not known until the capture ends, so the preamble
//! carries a placeholder that [`raw_length_patch`] fills in afterwards.

use crate::replay::types::*;
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Write};

/// Offset of the 4-byte raw length inside the preamble.
pub const RAW_LENGTH_OFFSET: u64 = 11;

/// Metadata appended after the framed region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayMetadata {
    /// RFC 3339 timestamp of the capture start
    pub start_at: String,
    /// Highest frame written, if any
    pub last_frame: Option<i32>,
    /// Platform tag recorded by the capturing client
    pub played_on: String,
}

/// Writer for the replay container format
pub struct ContainerWriter<W: Write> {
    writer: W,
    raw_written: u64,
}

impl<W: Write> ContainerWriter<W> {
    /// Create a new container writer
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            raw_written: 0,
        }
    }

    /// Write the 15-byte preamble with the given raw length (0 while capturing).
    pub fn write_preamble(&mut self, raw_length: u32) -> io::Result<()> {
        self.writer.write_all(CONTAINER_PREAMBLE)?;
        self.writer.write_u32::<BigEndian>(raw_length)?;
        Ok(())
    }

    /// Write the message size declaration block.
    pub fn write_declaration(&mut self, sizes: &MessageSizeTable) -> io::Result<()> {
        let block = sizes.declaration_block();
        self.write_raw(&block)
    }

    /// Write one record (tag + payload).
    pub fn write_record(&mut self, record: &RawEventRecord) -> io::Result<()> {
        self.writer.write_u8(record.tag)?;
        self.writer.write_all(&record.payload)?;
        self.raw_written += record.encoded_len() as u64;
        Ok(())
    }

    /// Write bytes that belong to the framed region.
    pub fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.raw_written += bytes.len() as u64;
        Ok(())
    }

    /// Close the framed region and write the metadata trailer.
    pub fn write_trailer(&mut self, metadata: &ReplayMetadata) -> io::Result<()> {
        self.writer.write_all(&encode_metadata(metadata))
    }

    /// Bytes written into the framed region so far.
    pub fn raw_written(&self) -> u64 {
        self.raw_written
    }

    /// Consume the writer and return the inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl ContainerWriter<Vec<u8>> {
    /// Bytes encoded since the last [`ContainerWriter::clear`].
    pub fn encoded(&self) -> &[u8] {
        &self.writer
    }

    /// Drop the encoded bytes. The framed-region count is kept, so the buffer
    /// can stage one chunk at a time for an async destination.
    pub fn clear(&mut self) {
        self.writer.clear();
    }
}

/// Encode the trailer: `U\x08metadata{...}` plus the `}` closing the container.
fn encode_metadata(metadata: &ReplayMetadata) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_key(&mut out, "metadata");
    out.push(b'{');
    write_key(&mut out, "startAt");
    write_string(&mut out, &metadata.start_at);
    if let Some(frame) = metadata.last_frame {
        write_key(&mut out, "lastFrame");
        out.push(b'l');
        out.extend_from_slice(&frame.to_be_bytes());
    }
    write_key(&mut out, "playedOn");
    write_string(&mut out, &metadata.played_on);
    out.push(b'}');
    out.push(b'}');
    out
}

/// Big-endian raw length to write at [`RAW_LENGTH_OFFSET`] once the framed
/// region is complete. Lengths beyond `u32::MAX` are recorded as 0, which
/// readers treat as "until end of file".
pub fn raw_length_patch(raw_written: u64) -> [u8; 4] {
    u32::try_from(raw_written).unwrap_or(0).to_be_bytes()
}

fn write_length(out: &mut Vec<u8>, len: usize) {
    if let Ok(short) = u8::try_from(len) {
        out.push(b'U');
        out.push(short);
    } else {
        out.push(b'l');
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn write_key(out: &mut Vec<u8>, key: &str) {
    write_length(out, key.len());
    out.extend_from_slice(key.as_bytes());
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    out.push(b'S');
    write_length(out, value.len());
    out.extend_from_slice(value.as_bytes());
}
