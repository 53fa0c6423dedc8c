//! Filesystem helpers shared across relaycast tools.

use std::path::Path;

use anyhow::{Context, Result};

/// Maximum replay size read into memory in one go.
pub const MAX_REPLAY_BYTES: u64 = 256 * 1024 * 1024; // 256 MiB
/// Maximum size of a task manifest or bracket configuration document.
pub const MAX_DOCUMENT_BYTES: u64 = 16 * 1024 * 1024; // 16 MiB

/// Read a file into memory with a size cap.
pub fn read_file_with_limit(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read file metadata: {}", path.display()))?;
    let len = metadata.len();
    if len > max_bytes {
        anyhow::bail!(
            "File too large: {} ({} bytes, max {} bytes)",
            path.display(),
            len,
            max_bytes
        );
    }
    std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Read a UTF-8 document with a size cap.
pub fn read_text_with_limit(path: &Path, max_bytes: u64) -> Result<String> {
    let bytes = read_file_with_limit(path, max_bytes)?;
    String::from_utf8(bytes).with_context(|| format!("File is not UTF-8: {}", path.display()))
}

/// Returns true if the path has one of the given extensions (case-insensitive).
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
        return false;
    };
    extensions.iter().any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_file_with_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        assert_eq!(read_file_with_limit(&path, 16).unwrap(), vec![1, 2, 3]);
        assert!(read_file_with_limit(&path, 2).is_err());
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_file_with_limit(&dir.path().join("missing"), 16).is_err());
    }

    #[test]
    fn test_has_extension() {
        let exts = vec!["slp".to_string(), "slippi".to_string()];
        assert!(has_extension(Path::new("a/Game_1.slp"), &exts));
        assert!(has_extension(Path::new("a/Game_1.SLP"), &exts));
        assert!(has_extension(Path::new("b.slippi"), &exts));
        assert!(!has_extension(Path::new("notes.txt"), &exts));
        assert!(!has_extension(Path::new("noext"), &exts));
    }
}
