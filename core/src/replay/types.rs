//! Core types for the replay event stream
//!
//! A replay is a framed binary log: a one-byte command tag followed by a
//! payload whose length is fixed per tag. The per-tag lengths are declared at
//! the start of the framed region (or implied, for legacy files).

use byteorder::{BigEndian, ByteOrder};

/// Command tags that matter to the demuxer.
pub mod command {
    /// Fragment of a record too large for one physical chunk
    pub const SPLIT_MESSAGE: u8 = 0x10;
    /// Declaration of per-tag payload sizes
    pub const MESSAGE_SIZES: u8 = 0x35;
    pub const GAME_START: u8 = 0x36;
    pub const PRE_FRAME_UPDATE: u8 = 0x37;
    pub const POST_FRAME_UPDATE: u8 = 0x38;
    pub const GAME_END: u8 = 0x39;
    pub const FRAME_START: u8 = 0x3A;
    pub const ITEM_UPDATE: u8 = 0x3B;
    pub const FRAME_BOOKEND: u8 = 0x3C;
    pub const GECKO_LIST: u8 = 0x3D;

    /// Tags whose payload begins with a signed 32-bit frame counter
    pub const FRAME_TAGS: [u8; 5] = [
        PRE_FRAME_UPDATE,
        POST_FRAME_UPDATE,
        FRAME_START,
        ITEM_UPDATE,
        FRAME_BOOKEND,
    ];
}

/// Split-message payload layout (offsets relative to the payload, i.e. one
/// past the tag byte).
pub mod split {
    /// Bytes of fragment data carried in every split message
    pub const DATA_LEN: usize = 512;
    /// u16 count of meaningful bytes in the data area
    pub const SIZE_OFFSET: usize = 512;
    /// Tag of the record being reassembled
    pub const REAL_TAG_OFFSET: usize = 514;
    /// Non-zero on the final fragment
    pub const LAST_FLAG_OFFSET: usize = 515;
    /// Minimum payload length holding every field above
    pub const PAYLOAD_LEN: usize = 516;
}

/// Container preamble: `{U\x03raw[$U#l` followed by a 4-byte big-endian length.
pub const CONTAINER_PREAMBLE: &[u8; 11] = b"{U\x03raw[$U#l";

/// Offset of the framed region inside a container-wrapped file.
pub const CONTAINER_RAW_OFFSET: u64 = 15;

/// Leading byte of a container-wrapped file.
pub const CONTAINER_OPEN: u8 = b'{';

/// How the start of a file was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// Zero-length file
    Empty,
    /// Framed stream starts at byte 0 (leading game-start tag)
    Raw,
    /// Framed stream wrapped in the text container
    Container,
    /// Unrecognized leading byte, read as if headerless
    Unknown(u8),
}

impl HeaderKind {
    /// Classify a file from its first byte.
    pub fn sniff(first: Option<u8>) -> Self {
        match first {
            None => HeaderKind::Empty,
            Some(command::GAME_START) => HeaderKind::Raw,
            Some(CONTAINER_OPEN) => HeaderKind::Container,
            Some(other) => HeaderKind::Unknown(other),
        }
    }

    /// Byte offset of the framed region for this kind.
    pub fn raw_data_position(self) -> u64 {
        match self {
            HeaderKind::Container => CONTAINER_RAW_OFFSET,
            HeaderKind::Empty | HeaderKind::Raw | HeaderKind::Unknown(_) => 0,
        }
    }
}

/// Location of the framed event region inside a replay file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatHeader {
    pub kind: HeaderKind,
    /// Byte offset where the framed region begins
    pub raw_data_position: u64,
    /// Length of the framed region in bytes
    pub raw_data_length: u64,
}

impl FormatHeader {
    /// One past the last byte the demuxer may read.
    pub fn raw_data_end(&self) -> u64 {
        self.raw_data_position + self.raw_data_length
    }
}

/// Payload length per command tag, valid for one replay file.
#[derive(Clone)]
pub struct MessageSizeTable {
    sizes: [Option<u16>; 256],
    /// The declaration block exactly as it appeared in the source, if any
    declaration: Option<Vec<u8>>,
}

impl MessageSizeTable {
    /// An empty table: every tag is unknown.
    pub fn empty() -> Self {
        Self {
            sizes: [None; 256],
            declaration: None,
        }
    }

    /// The implied table of headerless files.
    pub fn legacy() -> Self {
        let mut table = Self::empty();
        table.insert(command::GAME_START, 0x140);
        table.insert(command::PRE_FRAME_UPDATE, 0x6);
        table.insert(command::POST_FRAME_UPDATE, 0x46);
        table.insert(command::GAME_END, 0x1);
        table
    }

    /// Parse a declaration block (`0x35`, `L`, then `L - 1` bytes of
    /// `(tag, size_hi, size_lo)` tuples). Returns `None` if the marker is wrong.
    pub fn from_declaration(block: &[u8]) -> Option<Self> {
        let (&marker, rest) = block.split_first()?;
        if marker != command::MESSAGE_SIZES {
            return None;
        }
        let (&payload_len, tuples) = rest.split_first()?;
        let mut table = Self::empty();
        table.insert(command::MESSAGE_SIZES, payload_len as u16);
        for tuple in tuples.chunks_exact(3) {
            table.insert(tuple[0], BigEndian::read_u16(&tuple[1..3]));
        }
        table.declaration = Some(block.to_vec());
        Some(table)
    }

    pub fn insert(&mut self, tag: u8, size: u16) {
        self.sizes[tag as usize] = Some(size);
    }

    /// Payload length for a tag, excluding the tag byte itself.
    pub fn get(&self, tag: u8) -> Option<usize> {
        self.sizes[tag as usize].map(usize::from)
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.iter().all(Option::is_none)
    }

    /// Known `(tag, size)` pairs in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u16)> + '_ {
        self.sizes
            .iter()
            .enumerate()
            .filter_map(|(tag, size)| size.map(|size| (tag as u8, size)))
    }

    /// Bytes of the declaration block to place at the head of a framed region.
    ///
    /// A table read from a file returns its original block verbatim; other
    /// tables are encoded in tag order.
    pub fn declaration_block(&self) -> Vec<u8> {
        if let Some(block) = &self.declaration {
            return block.clone();
        }
        let entries: Vec<(u8, u16)> = self
            .iter()
            .filter(|(tag, _)| *tag != command::MESSAGE_SIZES)
            .collect();
        let payload_len = (entries.len() * 3 + 1) as u8;
        let mut block = Vec::with_capacity(payload_len as usize + 1);
        block.push(command::MESSAGE_SIZES);
        block.push(payload_len);
        for (tag, size) in entries {
            block.push(tag);
            block.extend_from_slice(&size.to_be_bytes());
        }
        block
    }
}

impl std::fmt::Debug for MessageSizeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(tag, size)| (format!("{tag:#04x}"), size)))
            .finish()
    }
}

/// One logical record from the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEventRecord {
    pub tag: u8,
    /// Frame counter, for tags that carry one
    pub frame: Option<i32>,
    /// Payload bytes, excluding the tag
    pub payload: Vec<u8>,
}

impl RawEventRecord {
    /// Build a record, extracting the frame counter when the tag carries one.
    pub fn new(tag: u8, payload: Vec<u8>) -> Self {
        let frame = frame_of(tag, &payload);
        Self {
            tag,
            frame,
            payload,
        }
    }

    /// Size of the record on the wire (tag + payload).
    pub fn encoded_len(&self) -> usize {
        1 + self.payload.len()
    }

    /// Append the wire form of the record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.tag);
        out.extend_from_slice(&self.payload);
    }
}

/// Read the frame counter of a frame-bearing record.
///
/// The counter sits at offset 1 of the message, i.e. the first four payload
/// bytes.
pub fn frame_of(tag: u8, payload: &[u8]) -> Option<i32> {
    if !command::FRAME_TAGS.contains(&tag) || payload.len() < 4 {
        return None;
    }
    Some(BigEndian::read_i32(&payload[..4]))
}

/// Buffer for one record being reassembled from split messages.
#[derive(Debug, Default)]
pub struct SplitAccumulator {
    buffer: Vec<u8>,
}

impl SplitAccumulator {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Tag of the record in flight.
    pub fn real_tag(&self) -> Option<u8> {
        self.buffer.first().copied()
    }

    /// Bytes collected so far, excluding the tag.
    pub fn pending_len(&self) -> usize {
        self.buffer.len().saturating_sub(1)
    }

    /// Append one fragment. The first fragment seeds the buffer with its tag.
    pub fn push(&mut self, real_tag: u8, data: &[u8]) {
        if self.buffer.is_empty() {
            self.buffer.reserve(data.len() + 1);
            self.buffer.push(real_tag);
        }
        self.buffer.extend_from_slice(data);
    }

    /// Take the completed record and reset.
    pub fn finish(&mut self) -> Option<RawEventRecord> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut buffer = std::mem::take(&mut self.buffer);
        let tag = buffer.remove(0);
        Some(RawEventRecord::new(tag, buffer))
    }

    /// Drop whatever is in flight.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
