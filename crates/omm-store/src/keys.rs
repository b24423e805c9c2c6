//! Row key layout.
//!
//! Names are restricted to `[A-Za-z0-9._-]`, so `/` separates components
//! without escaping and a trailing `/` turns any parent into an exact
//! child prefix.

pub const VOLUME_PREFIX: &str = "/vol/";
pub const BUCKET_PREFIX: &str = "/buk/";
pub const KEY_PREFIX: &str = "/key/";
pub const OPEN_KEY_PREFIX: &str = "/open/";
pub const TRASH_PREFIX: &str = "/trash/";
pub const MULTIPART_PREFIX: &str = "/mpu/";
pub const GAUGES_KEY: &str = "/meta/gauges";
pub const PENDING_RELEASE_PREFIX: &str = "/meta/pending-release/";

/// Width of the zero-padded millisecond timestamp in trash keys
const TRASH_TS_WIDTH: usize = 20;

#[must_use]
pub fn volume_key(volume: &str) -> String {
    format!("{VOLUME_PREFIX}{volume}")
}

#[must_use]
pub fn bucket_key(volume: &str, bucket: &str) -> String {
    format!("{BUCKET_PREFIX}{volume}/{bucket}")
}

/// Prefix of every bucket row in `volume`
#[must_use]
pub fn bucket_prefix(volume: &str) -> String {
    format!("{BUCKET_PREFIX}{volume}/")
}

#[must_use]
pub fn key_key(volume: &str, bucket: &str, key: &str) -> String {
    format!("{KEY_PREFIX}{volume}/{bucket}/{key}")
}

/// Prefix of every key row in `volume/bucket`
#[must_use]
pub fn key_prefix(volume: &str, bucket: &str) -> String {
    format!("{KEY_PREFIX}{volume}/{bucket}/")
}

#[must_use]
pub fn open_key_key(volume: &str, bucket: &str, key: &str, client_id: u64) -> String {
    format!("{OPEN_KEY_PREFIX}{volume}/{bucket}/{key}/{client_id:016x}")
}

#[must_use]
pub fn trash_key(volume: &str, bucket: &str, key: &str, deleted_at: u64) -> String {
    format!(
        "{TRASH_PREFIX}{volume}/{bucket}/{key}/{deleted_at:0width$}",
        width = TRASH_TS_WIDTH
    )
}

/// Prefix of every trash row in `volume/bucket`
#[must_use]
pub fn trash_bucket_prefix(volume: &str, bucket: &str) -> String {
    format!("{TRASH_PREFIX}{volume}/{bucket}/")
}

/// Prefix of every trash row for one key name
#[must_use]
pub fn trash_name_prefix(volume: &str, bucket: &str, key: &str) -> String {
    format!("{TRASH_PREFIX}{volume}/{bucket}/{key}/")
}

/// Prefix of every unfinished upload in `volume/bucket`
#[must_use]
pub fn multipart_bucket_prefix(volume: &str, bucket: &str) -> String {
    format!("{MULTIPART_PREFIX}{volume}/{bucket}/")
}

#[must_use]
pub fn multipart_key(volume: &str, bucket: &str, key: &str, upload_id: &str) -> String {
    format!("{MULTIPART_PREFIX}{volume}/{bucket}/{key}/{upload_id}")
}

#[must_use]
pub fn pending_release_key(id: &str) -> String {
    format!("{PENDING_RELEASE_PREFIX}{id}")
}

/// Marker that sorts after every trash row of `key` and before the rows of
/// any later name, for paging past a whole group.
#[must_use]
pub fn trash_group_end(volume: &str, bucket: &str, key: &str) -> String {
    // ':' sorts right after the digits used for timestamps
    format!("{TRASH_PREFIX}{volume}/{bucket}/{key}/:")
}

/// Split the name and timestamp out of a trash row key under `bucket_prefix`
#[must_use]
pub fn parse_trash_key<'a>(bucket_prefix: &str, row_key: &'a str) -> Option<(&'a str, u64)> {
    let rest = row_key.strip_prefix(bucket_prefix)?;
    let (name, ts) = rest.rsplit_once('/')?;
    Some((name, ts.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(volume_key("v"), "/vol/v");
        assert_eq!(bucket_key("v", "b"), "/buk/v/b");
        assert_eq!(key_key("v", "b", "k"), "/key/v/b/k");
        assert_eq!(open_key_key("v", "b", "k", 255), "/open/v/b/k/00000000000000ff");
        assert_eq!(
            trash_key("v", "b", "k", 42),
            "/trash/v/b/k/00000000000000000042"
        );
        assert_eq!(multipart_key("v", "b", "k", "u1"), "/mpu/v/b/k/u1");
    }

    #[test]
    fn test_prefixes_do_not_overlap_siblings() {
        assert!(!bucket_key("vol2", "b").starts_with(&bucket_prefix("vol")));
        assert!(!key_key("v", "b2", "k").starts_with(&key_prefix("v", "b")));
    }

    #[test]
    fn test_trash_key_order_follows_time() {
        assert!(trash_key("v", "b", "k", 9) < trash_key("v", "b", "k", 10));
        let end = trash_group_end("v", "b", "k");
        assert!(trash_key("v", "b", "k", u64::MAX) < end);
    }

    #[test]
    fn test_parse_trash_key() {
        let prefix = trash_bucket_prefix("v", "b");
        let row = trash_key("v", "b", "report.csv", 1234);
        assert_eq!(parse_trash_key(&prefix, &row), Some(("report.csv", 1234)));
        assert_eq!(parse_trash_key(&prefix, "/trash/v/c/x/1"), None);
    }
}
