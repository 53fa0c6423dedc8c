//! Output sink
//!
//! Writes a replay the way a live capture does: container preamble with a
//! zero length, the size declaration, records as they arrive, and finally the
//! metadata trailer plus the patched length.

use crate::replay::binary::{ContainerWriter, RAW_LENGTH_OFFSET, ReplayMetadata, raw_length_patch};
use crate::replay::types::{MessageSizeTable, RawEventRecord};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};

/// Attempts at picking an unused file name before giving up.
const MAX_NAME_ATTEMPTS: u32 = 16;

/// Platform tag written into the metadata trailer.
const PLAYED_ON: &str = "dolphin";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create output file in {}: {source}", dir.display())]
    Create {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no unused output file name in {} after {attempts} attempts", dir.display())]
    NameExhausted { dir: PathBuf, attempts: u32 },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to finalize {}: {source}", path.display())]
    Finalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {} into {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Naming
// ============================================================================

/// Inputs that keep output names distinct across concurrent tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NameSeed {
    pub set_id: Option<u64>,
    pub replay_index: u32,
}

impl NameSeed {
    /// `Game_YYYYMMDDTHHMMSS[_s<set>]_r<index>_<suffix>.slp`
    pub fn file_name(&self, now: DateTime<Local>, suffix: u32) -> String {
        let stamp = now.format("%Y%m%dT%H%M%S");
        let suffix = suffix & 0x00FF_FFFF;
        match self.set_id {
            Some(set_id) => format!(
                "Game_{stamp}_s{set_id}_r{}_{suffix:06x}.slp",
                self.replay_index
            ),
            None => format!("Game_{stamp}_r{}_{suffix:06x}.slp", self.replay_index),
        }
    }
}

/// Create a new file in `dir` whose name no other task holds.
///
/// Creation uses create-new semantics, so two tasks racing for the same name
/// cannot both succeed; the loser retries with a fresh suffix.
pub async fn create_unique(dir: &Path, seed: &NameSeed) -> Result<(PathBuf, File), SinkError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|source| SinkError::Create {
            dir: dir.to_path_buf(),
            source,
        })?;

    for _ in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(seed.file_name(Local::now(), rand::random::<u32>()));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!("Output name {} taken, retrying", path.display());
            }
            Err(source) => {
                return Err(SinkError::Create {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        }
    }
    Err(SinkError::NameExhausted {
        dir: dir.to_path_buf(),
        attempts: MAX_NAME_ATTEMPTS,
    })
}

/// Copy `source` byte for byte into an already created destination.
pub async fn copy_into(source: &Path, path: &Path, mut file: File) -> Result<u64, SinkError> {
    let copy_err = |source_err: io::Error| SinkError::Copy {
        from: source.to_path_buf(),
        to: path.to_path_buf(),
        source: source_err,
    };
    let mut input = File::open(source).await.map_err(copy_err)?;
    let copied = tokio::io::copy(&mut input, &mut file)
        .await
        .map_err(copy_err)?;
    file.sync_all().await.map_err(|source| SinkError::Finalize {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(copied)
}

// ============================================================================
// Sink
// ============================================================================

struct OpenOutput {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Stages each chunk in the container encoding before it goes to `writer`
    encoder: ContainerWriter<Vec<u8>>,
}

impl OpenOutput {
    /// Move the staged bytes into the file buffer.
    async fn drain(&mut self) -> io::Result<()> {
        self.writer.write_all(self.encoder.encoded()).await?;
        self.encoder.clear();
        Ok(())
    }
}

/// Destination replay being written by one task.
///
/// The file is created on the first write. [`OutputSink::finalize`] consumes
/// the sink, so a destination is closed exactly once.
pub struct OutputSink {
    dir: PathBuf,
    seed: NameSeed,
    sizes: MessageSizeTable,
    started_at: DateTime<Utc>,
    output: Option<OpenOutput>,
}

impl OutputSink {
    /// Prepare a sink that will declare `sizes` at the head of its framed region.
    pub fn new(dir: impl Into<PathBuf>, seed: NameSeed, sizes: &MessageSizeTable) -> Self {
        Self {
            dir: dir.into(),
            seed,
            sizes: sizes.clone(),
            started_at: Utc::now(),
            output: None,
        }
    }

    /// Create the destination and write the preamble and size declaration.
    /// Returns the destination path. Calling it again is a no-op.
    pub async fn open(&mut self) -> Result<PathBuf, SinkError> {
        if let Some(output) = &self.output {
            return Ok(output.path.clone());
        }

        let (path, file) = create_unique(&self.dir, &self.seed).await?;
        let mut output = OpenOutput {
            path: path.clone(),
            writer: BufWriter::new(file),
            encoder: ContainerWriter::new(Vec::new()),
        };
        let head = async {
            output.encoder.write_preamble(0)?;
            output.encoder.write_declaration(&self.sizes)?;
            output.drain().await?;
            output.writer.flush().await
        };
        head.await.map_err(|source| SinkError::Write {
            path: path.clone(),
            source,
        })?;

        tracing::debug!("Opened output {}", path.display());
        self.started_at = Utc::now();
        self.output = Some(output);
        Ok(path)
    }

    /// Append one record, opening the destination if needed.
    pub async fn write_record(&mut self, record: &RawEventRecord) -> Result<(), SinkError> {
        self.open().await?;
        let Some(output) = self.output.as_mut() else {
            return Ok(());
        };
        let write = async {
            output.encoder.write_record(record)?;
            output.drain().await
        };
        write.await.map_err(|source| SinkError::Write {
            path: output.path.clone(),
            source,
        })
    }

    /// Push buffered records to the file so readers of the growing file see them.
    pub async fn flush(&mut self) -> Result<(), SinkError> {
        let Some(output) = self.output.as_mut() else {
            return Ok(());
        };
        output
            .writer
            .flush()
            .await
            .map_err(|source| SinkError::Write {
                path: output.path.clone(),
                source,
            })
    }

    /// Write the trailer, patch the raw length and close the file.
    ///
    /// Returns the destination path, or `None` if nothing was ever written.
    pub async fn finalize(self, last_frame: Option<i32>) -> Result<Option<PathBuf>, SinkError> {
        let Some(mut output) = self.output else {
            return Ok(None);
        };
        let raw_written = output.encoder.raw_written();
        let metadata = ReplayMetadata {
            start_at: self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            last_frame,
            played_on: PLAYED_ON.to_string(),
        };
        let close = async {
            output.encoder.write_trailer(&metadata)?;
            output.drain().await?;
            output.writer.flush().await?;
            let file = output.writer.get_mut();
            file.seek(SeekFrom::Start(RAW_LENGTH_OFFSET)).await?;
            file.write_all(&raw_length_patch(raw_written)).await?;
            file.flush().await?;
            file.sync_all().await
        };
        close.await.map_err(|source| SinkError::Finalize {
            path: output.path.clone(),
            source,
        })?;

        tracing::debug!(raw_written, "Finalized output {}", output.path.display());
        Ok(Some(output.path))
    }
}
