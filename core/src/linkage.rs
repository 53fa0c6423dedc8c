//! Replay-to-match linkage
//!
//! Associates replay files with bracket sets by the connect codes embedded in
//! them. Codes are found by scanning raw bytes around each `#`, without
//! parsing the replay structure: they appear as plain ASCII inside the binary.

use hashbrown::HashMap;
use rayon::prelude::*;
use relaycast_shared::codes::{normalize_code, pair_key};
use relaycast_shared::fs::{MAX_REPLAY_BYTES, has_extension, read_file_with_limit};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Length of the alphanumeric tag before `#`.
const TAG_LEN: RangeInclusive<usize> = 2..=12;
/// Length of the numeric suffix after `#`.
const SUFFIX_LEN: RangeInclusive<usize> = 3..=4;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to walk {}: {source}", dir.display())]
    Walk {
        dir: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid bracket document: {0}")]
    Document(String),

    #[error("invalid bracket sets: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Code extraction
// ============================================================================

/// Find every `<alnum>{2,12}#<digit>{3,4}` occurrence in `bytes`, in order.
///
/// Each `#` anchors a backward scan over alphanumerics and a forward scan over
/// digits; the scan resumes after the digits. Runs that are too long on either
/// side are rejected whole, never truncated.
pub fn extract_connect_codes(bytes: &[u8]) -> Vec<String> {
    let mut codes = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'#' {
            i += 1;
            continue;
        }
        let mut start = i;
        while start > 0 && bytes[start - 1].is_ascii_alphanumeric() {
            start -= 1;
        }
        let mut end = i + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if TAG_LEN.contains(&(i - start)) && SUFFIX_LEN.contains(&(end - i - 1)) {
            // Both runs are ASCII by construction
            codes.push(String::from_utf8_lossy(&bytes[start..end]).into_owned());
        }
        i = end;
    }
    codes
}

/// Distinct normalized codes of one file, sorted.
fn distinct_codes(bytes: &[u8]) -> Vec<String> {
    extract_connect_codes(bytes)
        .iter()
        .filter_map(|code| normalize_code(code))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// ============================================================================
// Index
// ============================================================================

/// Pair key -> files containing both codes.
#[derive(Debug, Clone, Default)]
pub struct ReplayIndex {
    buckets: BTreeMap<String, Vec<PathBuf>>,
    file_codes: BTreeMap<PathBuf, Vec<String>>,
}

impl ReplayIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a directory tree for replays with one of `extensions`.
    ///
    /// Files are read in parallel. Unreadable or oversized files are skipped
    /// with a warning.
    pub fn scan(dir: &Path, extensions: &[String]) -> Result<Self, IndexError> {
        if !dir.is_dir() {
            return Err(IndexError::NotADirectory(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|source| IndexError::Walk {
                dir: dir.to_path_buf(),
                source,
            })?;
            if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
                files.push(entry.into_path());
            }
        }
        tracing::debug!("Scanning {} replay files under {}", files.len(), dir.display());

        let scanned: Vec<(PathBuf, Option<Vec<String>>)> = files
            .into_par_iter()
            .map(|path| match read_file_with_limit(&path, MAX_REPLAY_BYTES) {
                Ok(bytes) => {
                    let codes = distinct_codes(&bytes);
                    (path, Some(codes))
                }
                Err(e) => {
                    tracing::warn!("Skipping replay: {e:#}");
                    (path, None)
                }
            })
            .collect();

        let mut index = Self::new();
        for (path, codes) in scanned {
            if let Some(codes) = codes {
                index.insert_codes(path, codes);
            }
        }
        index.finalize();
        tracing::info!(
            files = index.file_count(),
            pairs = index.len(),
            "Replay index built from {}",
            dir.display()
        );
        Ok(index)
    }

    /// Index one file's bytes. Call [`ReplayIndex::finalize`] after the last
    /// insert.
    pub fn insert_file(&mut self, path: impl Into<PathBuf>, bytes: &[u8]) {
        self.insert_codes(path.into(), distinct_codes(bytes));
    }

    fn insert_codes(&mut self, path: PathBuf, codes: Vec<String>) {
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                self.buckets
                    .entry(pair_key(a, b))
                    .or_default()
                    .push(path.clone());
            }
        }
        self.file_codes.insert(path, codes);
    }

    /// Sort and deduplicate every bucket.
    pub fn finalize(&mut self) {
        for paths in self.buckets.values_mut() {
            paths.sort();
            paths.dedup();
        }
    }

    /// Files containing both codes, in either order. Codes are normalized.
    pub fn lookup(&self, a: &str, b: &str) -> &[PathBuf] {
        let (Some(a), Some(b)) = (normalize_code(a), normalize_code(b)) else {
            return &[];
        };
        self.buckets
            .get(&pair_key(&a, &b))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All buckets in key order.
    pub fn buckets(&self) -> impl Iterator<Item = (&str, &[PathBuf])> {
        self.buckets
            .iter()
            .map(|(key, paths)| (key.as_str(), paths.as_slice()))
    }

    /// Every indexed file with the distinct codes found in it, in path order.
    pub fn files(&self) -> impl Iterator<Item = (&Path, &[String])> {
        self.file_codes
            .iter()
            .map(|(path, codes)| (path.as_path(), codes.as_slice()))
    }

    /// The code present in the most files, with its file count. Ties go to
    /// the lexicographically smallest code.
    pub fn most_common_code(&self) -> Option<(&str, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for codes in self.file_codes.values() {
            for code in codes {
                *counts.entry(code.as_str()).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .max_by(|(a_code, a_count), (b_code, b_count)| {
                a_count.cmp(b_count).then_with(|| b_code.cmp(a_code))
            })
    }

    /// Number of pair buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of files indexed.
    pub fn file_count(&self) -> usize {
        self.file_codes.len()
    }

    /// Attach candidate replays to bracket sets. Sets without two codes or
    /// without matching files are left out.
    pub fn link_sets(&self, sets: &[BracketSet]) -> Vec<LinkedSet> {
        let mut linked = Vec::new();
        for set in sets {
            let codes: Vec<String> = set
                .slots
                .iter()
                .filter_map(|slot| normalize_code(&slot.slippi_code))
                .collect();
            let [a, b] = codes.as_slice() else {
                tracing::debug!(set = set.id, "Set does not have exactly two codes");
                continue;
            };
            let paths = self.lookup(a, b);
            if paths.is_empty() {
                continue;
            }
            let slots = vec![SlotCode::new(a), SlotCode::new(b)];
            linked.push(LinkedSet {
                id: set.id,
                round: set.round,
                replays: paths
                    .iter()
                    .map(|path| LinkedReplay {
                        path: path.to_string_lossy().into_owned(),
                        slots: slots.clone(),
                    })
                    .collect(),
            });
        }
        linked
    }
}

// ============================================================================
// Bracket documents
// ============================================================================

/// One participant slot, identified by connect code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotCode {
    pub slippi_code: String,
}

impl SlotCode {
    pub fn new(code: &str) -> Self {
        Self {
            slippi_code: code.to_string(),
        }
    }
}

/// A bracket set to match against the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketSet {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<i64>,
    #[serde(default)]
    pub slots: Vec<SlotCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedReplay {
    pub path: String,
    pub slots: Vec<SlotCode>,
}

/// A set with its candidate replays, as stored under `referenceReplayMap.sets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedSet {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<i64>,
    pub replays: Vec<LinkedReplay>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BracketSetsDocument {
    Wrapped { sets: Vec<BracketSet> },
    Bare(Vec<BracketSet>),
}

/// Parse bracket sets from either a bare array or `{ "sets": [...] }`.
pub fn parse_bracket_sets(json: &str) -> Result<Vec<BracketSet>, IndexError> {
    Ok(match serde_json::from_str(json)? {
        BracketSetsDocument::Wrapped { sets } | BracketSetsDocument::Bare(sets) => sets,
    })
}

fn sets_array_mut(doc: &mut Value) -> Result<&mut Vec<Value>, IndexError> {
    let root = doc
        .as_object_mut()
        .ok_or_else(|| IndexError::Document("root must be an object".to_string()))?;
    let map = root
        .entry("referenceReplayMap")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| IndexError::Document("referenceReplayMap must be an object".to_string()))?;
    map.entry("sets")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| IndexError::Document("referenceReplayMap.sets must be an array".to_string()))
}

/// Merge linked sets into a bracket configuration document.
///
/// An existing entry with the same `id` gets its `replays` (and `round`, when
/// known) replaced and keeps its other fields; other sets are appended.
/// Returns how many existing entries were updated.
pub fn merge_into_config(doc: &mut Value, linked: &[LinkedSet]) -> Result<usize, IndexError> {
    let sets = sets_array_mut(doc)?;
    let mut updated = 0;
    for set in linked {
        let value = serde_json::to_value(set)?;
        let existing = sets
            .iter_mut()
            .find(|entry| entry.get("id").and_then(Value::as_u64) == Some(set.id));
        match existing.and_then(Value::as_object_mut) {
            Some(entry) => {
                entry.insert("replays".to_string(), value["replays"].clone());
                if let Some(round) = set.round {
                    entry.insert("round".to_string(), Value::from(round));
                }
                updated += 1;
            }
            None => sets.push(value),
        }
    }
    Ok(updated)
}

/// Replay paths recorded for one set in a bracket configuration document.
///
/// Relative paths resolve against `referenceReplayMap.replaysDir` if present,
/// else against `base_dir`. Blank and duplicate paths are dropped.
pub fn replays_for_set(doc: &Value, set_id: u64, base_dir: &Path) -> Vec<PathBuf> {
    let Some(map) = doc.get("referenceReplayMap") else {
        return Vec::new();
    };
    let replays_dir = map
        .get("replaysDir")
        .and_then(Value::as_str)
        .map(|dir| base_dir.join(dir))
        .unwrap_or_else(|| base_dir.to_path_buf());
    let Some(replays) = map
        .get("sets")
        .and_then(Value::as_array)
        .and_then(|sets| {
            sets.iter()
                .find(|set| set.get("id").and_then(Value::as_u64) == Some(set_id))
        })
        .and_then(|set| set.get("replays"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    replays
        .iter()
        .filter_map(|entry| entry.get("path").and_then(Value::as_str))
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| replays_dir.join(raw))
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blob(len: usize, placed: &[(usize, &str)]) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        for (offset, text) in placed {
            bytes[*offset..*offset + text.len()].copy_from_slice(text.as_bytes());
        }
        bytes
    }

    // =============================================================
    // Extraction
    // =============================================================

    #[test]
    fn test_extracts_codes_from_binary() {
        let bytes = blob(40, &[(3, "AB12#034"), (22, "XYZ#5678")]);
        assert_eq!(extract_connect_codes(&bytes), vec!["AB12#034", "XYZ#5678"]);
    }

    #[test]
    fn test_rejects_wrong_suffix_lengths() {
        for text in ["AB#1", "AB#12", "AB#12345"] {
            let bytes = blob(16, &[(2, text)]);
            assert!(extract_connect_codes(&bytes).is_empty(), "{text}");
        }
        let bytes = blob(16, &[(2, "AB#123")]);
        assert_eq!(extract_connect_codes(&bytes), vec!["AB#123"]);
    }

    #[test]
    fn test_rejects_wrong_tag_lengths() {
        assert!(extract_connect_codes(b"\0A#123\0").is_empty());
        assert!(extract_connect_codes(b"\0ABCDEFGHIJKLM#123\0").is_empty());
        assert_eq!(
            extract_connect_codes(b"\0ABCDEFGHIJKL#123\0"),
            vec!["ABCDEFGHIJKL#123"]
        );
    }

    #[test]
    fn test_code_at_buffer_edges() {
        assert_eq!(extract_connect_codes(b"AB#123"), vec!["AB#123"]);
        assert!(extract_connect_codes(b"#").is_empty());
        assert!(extract_connect_codes(b"").is_empty());
    }

    // =============================================================
    // Index
    // =============================================================

    #[test]
    fn test_pair_bucket_for_two_codes() {
        let mut index = ReplayIndex::new();
        index.insert_file("g1.slp", &blob(40, &[(3, "AB12#034"), (22, "XYZ#5678")]));
        index.finalize();

        assert_eq!(index.len(), 1);
        let (key, paths) = index.buckets().next().unwrap();
        assert_eq!(key, pair_key("AB12#034", "XYZ#5678"));
        assert_eq!(paths, &[PathBuf::from("g1.slp")]);
        assert_eq!(index.lookup("xyz#5678", "ab12#034"), &[PathBuf::from("g1.slp")]);
    }

    #[test]
    fn test_single_code_makes_no_bucket() {
        let mut index = ReplayIndex::new();
        index.insert_file("solo.slp", &blob(40, &[(3, "AB12#034"), (20, "ab12#034")]));
        index.finalize();
        assert!(index.is_empty());
        let files: Vec<_> = index.files().collect();
        assert_eq!(files, vec![(Path::new("solo.slp"), ["AB12#034".to_string()].as_slice())]);
    }

    #[test]
    fn test_three_codes_make_three_buckets() {
        let mut index = ReplayIndex::new();
        index.insert_file("ffa.slp", b"\0AA#111\0BB#222\0CC#333\0");
        index.finalize();
        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup("CC#333", "AA#111").len(), 1);
    }

    #[test]
    fn test_buckets_sorted_and_deduplicated() {
        let mut index = ReplayIndex::new();
        let bytes = b"\0AA#111\0BB#222\0";
        index.insert_file("b.slp", bytes);
        index.insert_file("a.slp", bytes);
        index.insert_file("b.slp", bytes);
        index.finalize();
        assert_eq!(
            index.lookup("AA#111", "BB#222"),
            &[PathBuf::from("a.slp"), PathBuf::from("b.slp")]
        );
    }

    #[test]
    fn test_most_common_code() {
        let mut index = ReplayIndex::new();
        index.insert_file("1.slp", b"\0ME#001\0YOU#002\0ME#001\0");
        index.insert_file("2.slp", b"\0ME#001\0THEM#003\0");
        index.insert_file("3.slp", b"\0nothing here\0");
        assert_eq!(index.most_common_code(), Some(("ME#001", 2)));
        assert_eq!(ReplayIndex::new().most_common_code(), None);
    }

    #[test]
    fn test_scan_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("day1").join("pool-a");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("g1.slp"), b"\0AB12#034\0XYZ#5678\0").unwrap();
        std::fs::write(nested.join("g2.SLP"), b"\0xyz#5678\0ab12#034\0").unwrap();
        std::fs::write(nested.join("notes.txt"), b"\0AB12#034\0XYZ#5678\0").unwrap();

        let extensions = vec!["slp".to_string()];
        let index = ReplayIndex::scan(dir.path(), &extensions).unwrap();
        assert_eq!(index.file_count(), 2);
        assert_eq!(index.lookup("AB12#034", "XYZ#5678").len(), 2);
    }

    #[test]
    fn test_scan_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReplayIndex::scan(&dir.path().join("nope"), &[]).unwrap_err();
        assert!(matches!(err, IndexError::NotADirectory(_)));
    }

    // =============================================================
    // Bracket documents
    // =============================================================

    fn linked_index() -> ReplayIndex {
        let mut index = ReplayIndex::new();
        index.insert_file("replays/g1.slp", b"\0AB12#034\0XYZ#5678\0");
        index.finalize();
        index
    }

    #[test]
    fn test_link_sets() {
        let sets = parse_bracket_sets(
            r#"{ "sets": [
                { "id": 10, "round": 2, "slots": [{ "slippiCode": "ab12#034" }, { "slippiCode": "XYZ#5678" }] },
                { "id": 11, "round": 2, "slots": [{ "slippiCode": "AB12#034" }] },
                { "id": 12, "slots": [{ "slippiCode": "QQ#111" }, { "slippiCode": "RR#222" }] }
            ] }"#,
        )
        .unwrap();

        let linked = linked_index().link_sets(&sets);
        assert_eq!(linked.len(), 1);
        assert_eq!(
            serde_json::to_value(&linked[0]).unwrap(),
            json!({
                "id": 10,
                "round": 2,
                "replays": [{
                    "path": "replays/g1.slp",
                    "slots": [{ "slippiCode": "AB12#034" }, { "slippiCode": "XYZ#5678" }]
                }]
            })
        );
    }

    #[test]
    fn test_parse_bare_set_array() {
        let sets = parse_bracket_sets(r#"[{ "id": 1 }]"#).unwrap();
        assert_eq!(sets[0].id, 1);
        assert!(sets[0].slots.is_empty());
        assert!(parse_bracket_sets("{ nope").is_err());
    }

    #[test]
    fn test_merge_replaces_by_id_and_appends() {
        let mut doc = json!({
            "title": "Weekly",
            "referenceReplayMap": {
                "replaysDir": "replays",
                "sets": [{ "id": 10, "note": "keep", "replays": [] }]
            }
        });
        let linked = vec![
            LinkedSet {
                id: 10,
                round: Some(3),
                replays: vec![LinkedReplay {
                    path: "g1.slp".to_string(),
                    slots: vec![SlotCode::new("A#111"), SlotCode::new("B#222")],
                }],
            },
            LinkedSet {
                id: 20,
                round: None,
                replays: Vec::new(),
            },
        ];

        assert_eq!(merge_into_config(&mut doc, &linked).unwrap(), 1);
        let sets = doc["referenceReplayMap"]["sets"].as_array().unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0]["note"], "keep");
        assert_eq!(sets[0]["round"], 3);
        assert_eq!(sets[0]["replays"][0]["path"], "g1.slp");
        assert_eq!(sets[1]["id"], 20);
        assert_eq!(doc["title"], "Weekly");
    }

    #[test]
    fn test_merge_creates_map() {
        let mut doc = json!({});
        let linked = vec![LinkedSet {
            id: 1,
            round: None,
            replays: Vec::new(),
        }];
        assert_eq!(merge_into_config(&mut doc, &linked).unwrap(), 0);
        assert_eq!(doc["referenceReplayMap"]["sets"][0]["id"], 1);

        let mut bad = json!({ "referenceReplayMap": [] });
        assert!(matches!(
            merge_into_config(&mut bad, &linked),
            Err(IndexError::Document(_))
        ));
    }

    #[test]
    fn test_replays_for_set() {
        let doc = json!({
            "referenceReplayMap": {
                "replaysDir": "replays",
                "sets": [
                    { "id": 7, "replays": [
                        { "path": "g1.slp" }, { "path": " " }, { "path": "g1.slp" },
                        { "path": "/abs/g2.slp" }
                    ] },
                    { "id": 8, "replays": [{ "path": "other.slp" }] }
                ]
            }
        });
        let base = Path::new("/brackets");
        assert_eq!(
            replays_for_set(&doc, 7, base),
            vec![PathBuf::from("/brackets/replays/g1.slp"), PathBuf::from("/abs/g2.slp")]
        );
        assert!(replays_for_set(&doc, 9, base).is_empty());
        assert!(replays_for_set(&json!({}), 7, base).is_empty());
    }
}
