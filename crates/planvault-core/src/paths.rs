// ---------------------------------------------------------------------------
// Layout constants
// ---------------------------------------------------------------------------

pub const PLANS_DIR: &str = "Plans";
pub const HISTORY_DIR: &str = "History";
pub const SECURITY_DIR: &str = "Security";

pub const SECURITY_FILE: &str = "security.splx";
pub const PLAN_EXT: &str = ".yaml";

const SCHEME_SEP: &str = "://";

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

/// True when `path` carries its own scheme (`s3://bucket/...`) and must not
/// be rooted under the default bucket.
pub fn is_qualified(path: &str) -> bool {
    path.contains(SCHEME_SEP)
}

/// Join key segments with single `/` separators.
///
/// The base keeps its scheme prefix intact; empty segments are skipped.
pub fn combine(base: &str, segments: &[&str]) -> String {
    let mut key = base.trim_end_matches('/').to_string();
    if key.ends_with(':') {
        // "s3:" after trimming "s3://"; put the separator back
        key.push_str("//");
    }
    for seg in segments {
        let seg = seg.trim_matches('/');
        if seg.is_empty() {
            continue;
        }
        if !key.is_empty() && !key.ends_with('/') {
            key.push('/');
        }
        key.push_str(seg);
    }
    key
}

/// Root a relative folder path under `root`; qualified paths pass through.
pub fn qualify(root: &str, path: &str) -> String {
    if is_qualified(path) {
        path.trim_end_matches('/').to_string()
    } else {
        combine(root, &[path])
    }
}

/// Last `/`-separated segment of a key.
pub fn file_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// File name without its final extension.
pub fn file_stem(key: &str) -> &str {
    let name = file_name(key);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(i) => &name[..i],
    }
}

/// Final extension including the dot, lowercased (`.yaml`, `.json`).
pub fn extension(key: &str) -> Option<String> {
    let name = file_name(key);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(i) => Some(name[i..].to_ascii_lowercase()),
    }
}

/// Key without its `scheme://` prefix.
pub fn strip_scheme(key: &str) -> &str {
    match key.find(SCHEME_SEP) {
        Some(i) => &key[i + SCHEME_SEP.len()..],
        None => key,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_joins_with_single_separators() {
        assert_eq!(combine("s3://bucket", &["Plans"]), "s3://bucket/Plans");
        assert_eq!(
            combine("s3://bucket/", &["/History/", "a_1.yaml"]),
            "s3://bucket/History/a_1.yaml"
        );
        assert_eq!(combine("bucket", &["", "x"]), "bucket/x");
        assert_eq!(combine("s3://", &["bucket"]), "s3://bucket");
    }

    #[test]
    fn qualify_keeps_scheme_paths() {
        assert_eq!(qualify("bucket", "Plans"), "bucket/Plans");
        assert_eq!(
            qualify("bucket", "s3://other/Plans/"),
            "s3://other/Plans"
        );
        assert!(is_qualified("S3://x"));
        assert!(!is_qualified("Plans/sub"));
    }

    #[test]
    fn name_helpers() {
        let key = "s3://bucket/History/sample_12.yaml";
        assert_eq!(file_name(key), "sample_12.yaml");
        assert_eq!(file_stem(key), "sample_12");
        assert_eq!(extension(key).as_deref(), Some(".yaml"));
        assert_eq!(extension("Plans/Thing.JSON").as_deref(), Some(".json"));
        assert_eq!(extension("Security/.hidden"), None);
        assert_eq!(strip_scheme(key), "bucket/History/sample_12.yaml");
    }
}
