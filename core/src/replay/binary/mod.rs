//! Binary replay format
//!
//! # File Structure
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ Container preamble (15 bytes, optional)       │
//! │ ├─ "{U\x03raw[$U#l"                            │
//! │ └─ raw length: u32 BE                          │
//! ├───────────────────────────────────────────────┤
//! │ Framed region                                  │
//! │ ├─ 0x35 L (tag, size_hi, size_lo)*             │
//! │ └─ records: tag + fixed-size payload           │
//! ├───────────────────────────────────────────────┤
//! │ Metadata trailer ("U\x08metadata{...}}")       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Legacy files have no preamble, declaration or trailer: the framed region
//! starts with the game-start record at byte 0 and uses an implied size table.

mod reader;
mod writer;

pub use reader::{DemuxError, DemuxedReplay, Events, ReplayReader, StopReason};
pub use writer::{ContainerWriter, RAW_LENGTH_OFFSET, ReplayMetadata, raw_length_patch};
