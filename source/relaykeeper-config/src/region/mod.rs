//! Config Region Reader/Writer: extracts the embedded parser directive from
//! a JSONC config file and replaces the `@ParserSTART`/`@ParserEND` region
//! atomically, with numbered backups.

pub mod jsonc;

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::DirectiveError;
use crate::model::ParserDirective;

pub const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

const START_MARKER: &str = "/** @ParserSTART */";
const END_MARKER: &str = "/** @ParserEND */";
const SENTINEL_KEY: &str = "\"ParserConfig\"";

/// Read a ConfigDocument and extract its normalized [`ParserDirective`].
pub fn extract_directive(path: &Path) -> Result<ParserDirective, DirectiveError> {
    let text = read_capped(path)?;
    let comment_body = find_sentinel_comment(&text).ok_or(DirectiveError::Missing)?;
    let stripped = jsonc::strip_comments(comment_body);
    let value: serde_json::Value =
        serde_json::from_str(&stripped).map_err(|e| DirectiveError::Invalid(e.to_string()))?;
    ParserDirective::from_sentinel_payload(&value)
}

fn read_capped(path: &Path) -> Result<String, DirectiveError> {
    let metadata = fs::metadata(path).map_err(|_| DirectiveError::Missing)?;
    if metadata.len() > MAX_FILE_BYTES {
        return Err(DirectiveError::ConfigTooLarge { cap_bytes: MAX_FILE_BYTES });
    }
    fs::read_to_string(path).map_err(|e| DirectiveError::Invalid(e.to_string()))
}

/// Locate the first balanced `/* ... */` block comment whose interior,
/// after trimming, begins with an object containing the `"ParserConfig"`
/// key, and return its interior text.
fn find_sentinel_comment(text: &str) -> Option<&str> {
    find_sentinel_range(text).map(|(start, end)| &text[start..end])
}

/// Same search as [`find_sentinel_comment`] but returns the interior's byte
/// range, for callers that need to splice new content into the file.
fn find_sentinel_range(text: &str) -> Option<(usize, usize)> {
    let mut search_from = 0;
    while let Some(rel_start) = text[search_from..].find("/*") {
        let start = search_from + rel_start + 2;
        let Some(rel_end) = text[start..].find("*/") else {
            return None;
        };
        let end = start + rel_end;
        let interior = &text[start..end];
        if interior.trim_start().starts_with('{') && interior.contains(SENTINEL_KEY) {
            return Some((start, end));
        }
        search_from = end + 2;
    }
    None
}

/// Whether any content (besides whitespace) follows `@ParserEND` before the
/// array closes, i.e. whether the freshly rendered region needs a trailing
/// comma.
pub fn content_follows_end_marker(path: &Path) -> Result<bool, DirectiveError> {
    let text = read_capped(path)?;
    let marker_idx = text.find(END_MARKER).ok_or(DirectiveError::MarkersMissing)?;
    let after = &text[marker_idx + END_MARKER.len()..];
    Ok(!after.trim_start().starts_with(']'))
}

/// Rewrite both the directive sentinel comment and the `@ParserSTART`/
/// `@ParserEND` region in one pass, with a single backup and atomic write,
/// so the directive and the region it governs are always committed
/// together.
pub fn commit(path: &Path, new_sentinel_json: &serde_json::Value, region_body: &str) -> Result<(), DirectiveError> {
    let text = read_capped(path)?;

    let (sentinel_start, sentinel_end) = find_sentinel_range(&text).ok_or(DirectiveError::Missing)?;

    let region_start = text.find(START_MARKER).ok_or(DirectiveError::MarkersMissing)?;
    let region_interior_start = region_start + START_MARKER.len();
    let region_interior_end = text[region_interior_start..]
        .find(END_MARKER)
        .map(|rel| region_interior_start + rel)
        .ok_or(DirectiveError::MarkersMissing)?;

    let sentinel_text = format!(" {new_sentinel_json} ");

    let mut splices = vec![(sentinel_start, sentinel_end, sentinel_text), (region_interior_start, region_interior_end, region_body.to_string())];
    splices.sort_by_key(|(start, _, _)| *start);

    let mut new_text = String::with_capacity(text.len() + region_body.len());
    let mut cursor = 0;
    for (start, end, replacement) in splices {
        new_text.push_str(&text[cursor..start]);
        new_text.push_str(&replacement);
        cursor = end;
    }
    new_text.push_str(&text[cursor..]);

    rotate_backup(path).map_err(|e| DirectiveError::Invalid(e.to_string()))?;
    atomic_write(path, &new_text).map_err(|e| DirectiveError::Invalid(e.to_string()))
}

/// Replace the bytes between `@ParserSTART` and `@ParserEND` with `body`,
/// preserving every byte outside the markers and backing up the previous
/// file before writing atomically.
pub fn replace_region(path: &Path, body: &str) -> Result<(), DirectiveError> {
    let text = read_capped(path)?;

    let start_idx = text.find(START_MARKER).ok_or(DirectiveError::MarkersMissing)?;
    let after_start = start_idx + START_MARKER.len();
    let end_idx = text[after_start..]
        .find(END_MARKER)
        .map(|rel| after_start + rel)
        .ok_or(DirectiveError::MarkersMissing)?;

    let mut new_text = String::with_capacity(text.len() + body.len());
    new_text.push_str(&text[..after_start]);
    new_text.push_str(body);
    new_text.push_str(&text[end_idx..]);

    rotate_backup(path).map_err(|e| DirectiveError::Invalid(e.to_string()))?;
    atomic_write(path, &new_text).map_err(|e| DirectiveError::Invalid(e.to_string()))
}

/// Rename an existing file to `<name>-old.<ext>`, then `-old-1`, `-old-2`,
/// … so the newest backup never clobbers an older one.
fn rotate_backup(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let mut candidate = backup_path(path, None);
    let mut n = 1u32;
    while candidate.exists() {
        candidate = backup_path(path, Some(n));
        n += 1;
    }
    fs::rename(path, candidate)
}

fn backup_path(path: &Path, suffix: Option<u32>) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("config");
    let ext = path.extension().and_then(|s| s.to_str());
    let name = match (suffix, ext) {
        (None, Some(ext)) => format!("{stem}-old.{ext}"),
        (None, None) => format!("{stem}-old"),
        (Some(n), Some(ext)) => format!("{stem}-old-{n}.{ext}"),
        (Some(n), None) => format!("{stem}-old-{n}"),
    };
    path.with_file_name(name)
}

fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp-write");
    {
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_doc() -> String {
        r#"{
  // user comment preserved
  "outbounds": [
    /** @ParserSTART */
    /** @ParserEND */
  ],
  /* { "ParserConfig": { "version": 2, "proxies": [], "outbounds": [],
        "parser": { "reload": "4h", "last_updated": "2026-01-01T00:00:00Z" } } } */
  "other": true
}
"#
        .to_string()
    }

    #[test]
    fn extracts_directive_from_sentinel_comment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, sample_doc()).unwrap();

        let directive = extract_directive(&path).unwrap();
        assert_eq!(directive.proxies.len(), 0);
        assert!(directive.reload.is_some());
    }

    #[test]
    fn missing_sentinel_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ \"outbounds\": [] }").unwrap();

        let err = extract_directive(&path).unwrap_err();
        assert!(matches!(err, DirectiveError::Missing));
    }

    #[test]
    fn replace_region_preserves_surrounding_bytes_and_backs_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, sample_doc()).unwrap();

        replace_region(&path, "\n    { \"tag\": \"a\" },\n    ").unwrap();

        let new_text = fs::read_to_string(&path).unwrap();
        assert!(new_text.contains("\"tag\": \"a\""));
        assert!(new_text.contains("user comment preserved"));
        assert!(new_text.contains("\"other\": true"));

        let backup = dir.path().join("config-old.json");
        assert!(backup.exists());
    }

    #[test]
    fn replace_region_rotates_numbered_backups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, sample_doc()).unwrap();

        replace_region(&path, "").unwrap();
        fs::write(&path, sample_doc()).unwrap();
        replace_region(&path, "").unwrap();

        assert!(dir.path().join("config-old.json").exists());
        assert!(dir.path().join("config-old-1.json").exists());
    }

    #[test]
    fn missing_markers_fails_without_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ \"outbounds\": [] }").unwrap();

        let err = replace_region(&path, "x").unwrap_err();
        assert!(matches!(err, DirectiveError::MarkersMissing));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ \"outbounds\": [] }");
    }

    #[test]
    fn content_after_end_marker_requires_trailing_comma() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, sample_doc()).unwrap();
        assert!(!content_follows_end_marker(&path).unwrap());

        let with_trailer = sample_doc().replace("/** @ParserEND */", "/** @ParserEND */\n    { \"tag\": \"direct\" }");
        fs::write(&path, with_trailer).unwrap();
        assert!(content_follows_end_marker(&path).unwrap());
    }

    #[test]
    fn commit_rewrites_sentinel_and_region_together() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, sample_doc()).unwrap();

        let new_sentinel = serde_json::json!({
            "ParserConfig": { "version": 2, "proxies": [], "outbounds": [],
                "parser": { "reload": "1h", "last_updated": "2026-02-02T00:00:00Z" } }
        });
        commit(&path, &new_sentinel, "\n    { \"tag\": \"a\" },\n    ").unwrap();

        let new_text = fs::read_to_string(&path).unwrap();
        assert!(new_text.contains("\"tag\": \"a\""));
        assert!(new_text.contains("1h"));
        assert!(new_text.contains("user comment preserved"));
        assert!(dir.path().join("config-old.json").exists());
    }
}
