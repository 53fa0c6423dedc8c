//! Replay demuxer
//!
//! Turns the raw bytes of a replay into a lazy sequence of
//! [`RawEventRecord`]s. Malformed or truncated input ends the sequence early
//! instead of failing, since a replay may still be growing while it is read.
//! Only I/O failures are errors.

use crate::replay::types::*;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use relaycast_shared::fs::MAX_REPLAY_BYTES;

/// I/O failure while demuxing. Malformed content is never an error.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("failed to open replay {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("replay {} is too large ({size} bytes, max {limit} bytes)", path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("failed to read replay: {0}")]
    Io(#[from] io::Error),
}

/// Why an event sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every byte of the framed region was consumed
    Exhausted,
    /// A tag with no declared size was found
    UnknownCommand { tag: u8, offset: u64 },
    /// The declared payload runs past the end of the framed region
    Truncated { tag: u8, offset: u64, needed: u64, remaining: u64 },
    /// A split message too short to hold its own fields
    MalformedSplit { offset: u64 },
}

impl StopReason {
    /// True if the stream ended before the framed region was fully consumed.
    pub fn is_early(&self) -> bool {
        !matches!(self, StopReason::Exhausted)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Exhausted => write!(f, "end of stream"),
            StopReason::UnknownCommand { tag, offset } => {
                write!(f, "unknown command {tag:#04x} at offset {offset}")
            }
            StopReason::Truncated {
                tag,
                offset,
                needed,
                remaining,
            } => write!(
                f,
                "truncated command {tag:#04x} at offset {offset} ({needed} bytes needed, {remaining} left)"
            ),
            StopReason::MalformedSplit { offset } => {
                write!(f, "malformed split message at offset {offset}")
            }
        }
    }
}

/// Reader positioned on a replay whose header and size table are known.
pub struct ReplayReader<R: Read + Seek> {
    reader: R,
    file_size: u64,
    header: FormatHeader,
    sizes: MessageSizeTable,
    data_start: u64,
}

impl ReplayReader<BufReader<File>> {
    /// Open a replay file from disk, refusing files over [`MAX_REPLAY_BYTES`].
    pub fn open(path: &Path) -> Result<Self, DemuxError> {
        Self::open_with_limit(path, MAX_REPLAY_BYTES)
    }

    /// Open a replay file from disk, refusing files over `limit` bytes.
    pub fn open_with_limit(path: &Path, limit: u64) -> Result<Self, DemuxError> {
        let open_err = |source| DemuxError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        let size = file.metadata().map_err(open_err)?.len();
        if size > limit {
            return Err(DemuxError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit,
            });
        }
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> ReplayReader<R> {
    /// Detect the header and load the message-size table.
    pub fn new(mut reader: R) -> Result<Self, DemuxError> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let first = if file_size > 0 {
            Some(reader.read_u8()?)
        } else {
            None
        };
        let kind = HeaderKind::sniff(first);
        let header = Self::read_format_header(&mut reader, kind, file_size)?;

        let (sizes, data_start) = match kind {
            HeaderKind::Container => Self::read_message_sizes(&mut reader, &header)?,
            HeaderKind::Empty | HeaderKind::Raw | HeaderKind::Unknown(_) => {
                (MessageSizeTable::legacy(), header.raw_data_position)
            }
        };

        if let HeaderKind::Unknown(byte) = kind {
            tracing::debug!("Unrecognized leading byte {byte:#04x}, reading as headerless");
        }
        tracing::debug!(
            ?kind,
            raw_data_position = header.raw_data_position,
            raw_data_length = header.raw_data_length,
            "Replay header"
        );

        Ok(Self {
            reader,
            file_size,
            header,
            sizes,
            data_start,
        })
    }

    fn read_format_header(
        reader: &mut R,
        kind: HeaderKind,
        file_size: u64,
    ) -> io::Result<FormatHeader> {
        let position = kind.raw_data_position();
        if position == 0 {
            return Ok(FormatHeader {
                kind,
                raw_data_position: 0,
                raw_data_length: file_size,
            });
        }
        if position > file_size {
            return Ok(FormatHeader {
                kind,
                raw_data_position: position,
                raw_data_length: 0,
            });
        }

        let available = file_size - position;
        reader.seek(SeekFrom::Start(position - 4))?;
        let declared = reader.read_u32::<BigEndian>()? as u64;
        let raw_data_length = if declared == 0 {
            available
        } else {
            declared.min(available)
        };
        Ok(FormatHeader {
            kind,
            raw_data_position: position,
            raw_data_length,
        })
    }

    /// Returns the table and the offset of the first event after it. A
    /// missing or malformed declaration yields an empty table, which ends the
    /// event stream at its first tag.
    fn read_message_sizes(
        reader: &mut R,
        header: &FormatHeader,
    ) -> io::Result<(MessageSizeTable, u64)> {
        let start = header.raw_data_position;
        let end = header.raw_data_end();
        if end.saturating_sub(start) < 2 {
            return Ok((MessageSizeTable::empty(), start));
        }

        reader.seek(SeekFrom::Start(start))?;
        let mut prefix = [0u8; 2];
        reader.read_exact(&mut prefix)?;
        let [marker, payload_len] = prefix;
        if marker != command::MESSAGE_SIZES || payload_len == 0 {
            tracing::warn!("Replay has no message size declaration (found {marker:#04x})");
            return Ok((MessageSizeTable::empty(), start));
        }

        let block_len = 1 + payload_len as u64;
        if block_len > end - start {
            tracing::warn!("Message size declaration runs past the framed region");
            return Ok((MessageSizeTable::empty(), start));
        }

        let mut block = vec![0u8; block_len as usize];
        block[..2].copy_from_slice(&prefix);
        reader.read_exact(&mut block[2..])?;
        let table = MessageSizeTable::from_declaration(&block).unwrap_or_else(MessageSizeTable::empty);
        Ok((table, start + block_len))
    }

    pub fn header(&self) -> &FormatHeader {
        &self.header
    }

    pub fn message_sizes(&self) -> &MessageSizeTable {
        &self.sizes
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Offset of the first event after the size declaration.
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Consume the reader into its event sequence.
    pub fn events(self) -> Events<R> {
        Events {
            reader: self.reader,
            cursor: self.data_start,
            end: self.header.raw_data_end(),
            sizes: self.sizes,
            split: SplitAccumulator::default(),
            positioned: false,
            stop: None,
        }
    }

    /// Demux the whole file into memory.
    ///
    /// Needed when the highest frame must be known before playback starts.
    /// Replays are bounded (tens of MiB at most), so holding every record is
    /// acceptable.
    pub fn read_all(self) -> Result<DemuxedReplay, DemuxError> {
        let header = self.header;
        let sizes = self.sizes.clone();
        let mut events = self.events();
        let mut records = Vec::new();
        let mut last_frame: Option<i32> = None;
        for record in events.by_ref() {
            let record = record?;
            if let Some(frame) = record.frame {
                last_frame = Some(last_frame.map_or(frame, |last| last.max(frame)));
            }
            records.push(record);
        }
        let stop = events.stop_reason().unwrap_or(StopReason::Exhausted);
        Ok(DemuxedReplay {
            header,
            sizes,
            records,
            last_frame,
            stop,
        })
    }
}

/// A fully buffered demux pass.
#[derive(Debug, Clone)]
pub struct DemuxedReplay {
    pub header: FormatHeader,
    pub sizes: MessageSizeTable,
    pub records: Vec<RawEventRecord>,
    /// Highest frame number seen
    pub last_frame: Option<i32>,
    pub stop: StopReason,
}

impl DemuxedReplay {
    /// Number of records carrying a frame counter.
    pub fn frame_record_count(&self) -> usize {
        self.records.iter().filter(|r| r.frame.is_some()).count()
    }
}

/// Lazy, finite, non-restartable sequence of records.
pub struct Events<R: Read + Seek> {
    reader: R,
    cursor: u64,
    end: u64,
    sizes: MessageSizeTable,
    split: SplitAccumulator,
    positioned: bool,
    stop: Option<StopReason>,
}

impl<R: Read + Seek> Events<R> {
    /// Why the sequence ended, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    fn halt(&mut self, reason: StopReason) -> Option<Result<RawEventRecord, DemuxError>> {
        if reason.is_early() {
            tracing::debug!("Event stream stopped early: {reason}");
        }
        if !self.split.is_empty() {
            tracing::debug!(
                "Discarding incomplete split record ({} bytes pending)",
                self.split.pending_len()
            );
            self.split.clear();
        }
        self.stop = Some(reason);
        None
    }

    fn step(&mut self) -> Result<Step, DemuxError> {
        if self.cursor >= self.end {
            return Ok(Step::Stop(StopReason::Exhausted));
        }
        if !self.positioned {
            self.reader.seek(SeekFrom::Start(self.cursor))?;
            self.positioned = true;
        }

        let offset = self.cursor;
        let tag = self.reader.read_u8()?;
        let Some(size) = self.sizes.get(tag) else {
            return Ok(Step::Stop(StopReason::UnknownCommand { tag, offset }));
        };
        let needed = 1 + size as u64;
        let remaining = self.end - offset;
        if needed > remaining {
            return Ok(Step::Stop(StopReason::Truncated {
                tag,
                offset,
                needed,
                remaining,
            }));
        }

        let mut payload = vec![0u8; size];
        self.reader.read_exact(&mut payload)?;
        self.cursor += needed;

        if tag != command::SPLIT_MESSAGE {
            return Ok(Step::Record(RawEventRecord::new(tag, payload)));
        }

        if payload.len() < split::PAYLOAD_LEN {
            return Ok(Step::Stop(StopReason::MalformedSplit { offset }));
        }
        let fragment_len = (BigEndian::read_u16(&payload[split::SIZE_OFFSET..]) as usize)
            .min(split::DATA_LEN);
        let real_tag = payload[split::REAL_TAG_OFFSET];
        let is_last = payload[split::LAST_FLAG_OFFSET] != 0;

        if let Some(in_flight) = self.split.real_tag() {
            if in_flight != real_tag {
                tracing::warn!(
                    "Split message for {real_tag:#04x} at offset {offset} interrupts {in_flight:#04x}; dropping partial record"
                );
                self.split.clear();
            }
        }
        self.split.push(real_tag, &payload[..fragment_len]);

        if is_last {
            Ok(self.split.finish().map_or(Step::Continue, Step::Record))
        } else {
            Ok(Step::Continue)
        }
    }
}

enum Step {
    Record(RawEventRecord),
    Continue,
    Stop(StopReason),
}

impl<R: Read + Seek> Iterator for Events<R> {
    type Item = Result<RawEventRecord, DemuxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }
        loop {
            match self.step() {
                Ok(Step::Record(record)) => return Some(Ok(record)),
                Ok(Step::Continue) => continue,
                Ok(Step::Stop(reason)) => return self.halt(reason),
                Err(e) => {
                    self.stop = Some(StopReason::Exhausted);
                    return Some(Err(e));
                }
            }
        }
    }
}
