//! Shared test utilities: synthetic replay construction

use crate::replay::binary::{ContainerWriter, ReplayMetadata, raw_length_patch};
use crate::replay::types::{MessageSizeTable, RawEventRecord, command, split};
use std::path::{Path, PathBuf};

// ============================================================================
// Replay Builder
// ============================================================================

/// Builds replay bytes record by record.
pub struct ReplayBuilder {
    sizes: MessageSizeTable,
    records: Vec<RawEventRecord>,
    container: bool,
}

impl ReplayBuilder {
    pub const TEST_GAME_START_SIZE: usize = 24;
    pub const TEST_FRAME_SIZE: usize = 8;
    pub const TEST_GECKO_SIZE: usize = 40;

    /// Container-wrapped replay with a small declared size table.
    pub fn container() -> Self {
        let mut sizes = MessageSizeTable::empty();
        sizes.insert(command::GAME_START, Self::TEST_GAME_START_SIZE as u16);
        for tag in command::FRAME_TAGS {
            sizes.insert(tag, Self::TEST_FRAME_SIZE as u16);
        }
        sizes.insert(command::GAME_END, 2);
        sizes.insert(command::GECKO_LIST, Self::TEST_GECKO_SIZE as u16);
        sizes.insert(command::SPLIT_MESSAGE, split::PAYLOAD_LEN as u16);
        let declaration = sizes.declaration_block();
        let sizes = MessageSizeTable::from_declaration(&declaration).unwrap();
        Self {
            sizes,
            records: Vec::new(),
            container: true,
        }
    }

    /// Headerless replay using the legacy size table.
    pub fn legacy() -> Self {
        Self {
            sizes: MessageSizeTable::legacy(),
            records: Vec::new(),
            container: false,
        }
    }

    fn size_of(&self, tag: u8) -> usize {
        self.sizes.get(tag).unwrap()
    }

    /// Append a record; the payload is zero-padded or cut to the declared size.
    pub fn record(mut self, tag: u8, mut payload: Vec<u8>) -> Self {
        payload.resize(self.size_of(tag), 0);
        self.records.push(RawEventRecord::new(tag, payload));
        self
    }

    pub fn game_start(self) -> Self {
        let size = self.size_of(command::GAME_START);
        self.record(command::GAME_START, vec![0x01; size])
    }

    /// Append a frame-bearing record for `frame`.
    pub fn frame(self, tag: u8, frame: i32) -> Self {
        self.record(tag, frame.to_be_bytes().to_vec())
    }

    /// Append a full frame: frame start, pre, post and bookend for each frame.
    pub fn frames(mut self, frames: impl IntoIterator<Item = i32>) -> Self {
        for frame in frames {
            self = self
                .frame(command::FRAME_START, frame)
                .frame(command::PRE_FRAME_UPDATE, frame)
                .frame(command::POST_FRAME_UPDATE, frame)
                .frame(command::FRAME_BOOKEND, frame);
        }
        self
    }

    /// Append `payload` for `real_tag` split across `fragments` split messages.
    pub fn split_record(mut self, real_tag: u8, payload: &[u8], fragments: usize) -> Self {
        let chunk = payload.len().div_ceil(fragments).max(1);
        let chunks: Vec<&[u8]> = payload.chunks(chunk).collect();
        let last = chunks.len() - 1;
        for (i, data) in chunks.into_iter().enumerate() {
            let mut body = vec![0u8; split::PAYLOAD_LEN];
            body[..data.len()].copy_from_slice(data);
            body[split::SIZE_OFFSET..split::SIZE_OFFSET + 2]
                .copy_from_slice(&(data.len() as u16).to_be_bytes());
            body[split::REAL_TAG_OFFSET] = real_tag;
            body[split::LAST_FLAG_OFFSET] = u8::from(i == last);
            self.records
                .push(RawEventRecord::new(command::SPLIT_MESSAGE, body));
        }
        self
    }

    /// Replay bytes including the metadata trailer for container files.
    pub fn build(self) -> Vec<u8> {
        self.encode(true)
    }

    /// Replay bytes ending right after the last record.
    pub fn build_without_trailer(self) -> Vec<u8> {
        self.encode(false)
    }

    fn encode(self, trailer: bool) -> Vec<u8> {
        let mut writer = ContainerWriter::new(Vec::new());
        if !self.container {
            for record in &self.records {
                writer.write_record(record).unwrap();
            }
            return writer.into_inner();
        }

        writer.write_preamble(0).unwrap();
        writer.write_declaration(&self.sizes).unwrap();
        for record in &self.records {
            writer.write_record(record).unwrap();
        }
        let raw_written = writer.raw_written();
        if trailer {
            writer
                .write_trailer(&ReplayMetadata {
                    start_at: "2024-01-01T00:00:00Z".to_string(),
                    last_frame: None,
                    played_on: "dolphin".to_string(),
                })
                .unwrap();
        }
        let mut bytes = writer.into_inner();
        bytes[11..15].copy_from_slice(&raw_length_patch(raw_written));
        bytes
    }

    /// Write the replay into `dir` under `name`.
    pub fn write_to(self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}
