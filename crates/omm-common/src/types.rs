//! Core namespace types for OMM
//!
//! Volumes, buckets and keys as seen by callers of the metadata manager,
//! together with the request arguments each operation accepts.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Longest accepted volume, bucket or key name.
pub const MAX_NAME_LEN: usize = 255;

/// Kind of name being validated, used in error messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum NameKind {
    #[display("volume")]
    Volume,
    #[display("bucket")]
    Bucket,
    #[display("key")]
    Key,
    #[display("prefix")]
    Prefix,
    #[display("start-after")]
    StartAfter,
}

/// Errors produced by name validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("{kind} name must not be empty")]
    Empty { kind: NameKind },
    #[error("{kind} name is {len} characters, at most 255 allowed")]
    TooLong { kind: NameKind, len: usize },
    #[error("{kind} name contains invalid character {ch:?}")]
    InvalidChar { kind: NameKind, ch: char },
}

const fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Validate a volume, bucket or key name.
///
/// Names are 1..=255 characters drawn from `[A-Za-z0-9._-]`. The charset
/// excludes `/`, which keeps the row key layout unambiguous.
pub fn validate_name(kind: NameKind, name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty { kind });
    }
    validate_fragment(kind, name)
}

/// Validate a listing prefix or start-after marker; empty is allowed.
pub fn validate_fragment(kind: NameKind, fragment: &str) -> Result<(), NameError> {
    if fragment.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong {
            kind,
            len: fragment.len(),
        });
    }
    if let Some(ch) = fragment.chars().find(|c| !is_name_char(*c)) {
        return Err(NameError::InvalidChar { kind, ch });
    }
    Ok(())
}

/// Wall-clock time in milliseconds since the Unix epoch
#[must_use]
pub fn current_time_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Storage class requested for a bucket
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum StorageType {
    #[default]
    #[display("DISK")]
    Disk,
    #[display("SSD")]
    Ssd,
    #[display("ARCHIVE")]
    Archive,
    #[display("RAM_DISK")]
    RamDisk,
}

/// Who an ACL entry applies to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum AclIdentity {
    #[default]
    #[display("user")]
    User,
    #[display("group")]
    Group,
    #[display("world")]
    World,
}

/// Bit set of rights granted by an ACL entry
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclRights(u32);

impl AclRights {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(1 << 1);
    pub const CREATE: Self = Self(1 << 2);
    pub const LIST: Self = Self(1 << 3);
    pub const DELETE: Self = Self(1 << 4);
    pub const READ_ACL: Self = Self(1 << 5);
    pub const WRITE_ACL: Self = Self(1 << 6);
    pub const ALL: Self = Self(0x7f);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if every right in `other` is granted
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Debug for AclRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AclRights({:#09b})", self.0)
    }
}

/// A single access-control entry on a volume or bucket
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    pub identity: AclIdentity,
    /// User or group name; ignored for `World`
    pub name: String,
    pub rights: AclRights,
}

impl Acl {
    #[must_use]
    pub fn user(name: impl Into<String>, rights: AclRights) -> Self {
        Self {
            identity: AclIdentity::User,
            name: name.into(),
            rights,
        }
    }

    #[must_use]
    pub const fn world(rights: AclRights) -> Self {
        Self {
            identity: AclIdentity::World,
            name: String::new(),
            rights,
        }
    }

    /// True if this entry grants `rights` to `user`
    #[must_use]
    pub fn grants(&self, user: &str, rights: AclRights) -> bool {
        let applies = match self.identity {
            AclIdentity::World => true,
            AclIdentity::User => self.name == user,
            // Group membership is resolved outside the manager
            AclIdentity::Group => false,
        };
        applies && self.rights.contains(rights)
    }
}

/// Opaque handle to a block owned by the block layer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{container_id}#{local_id}")]
pub struct BlockLocation {
    pub container_id: u64,
    pub local_id: u64,
    pub offset: u64,
    pub length: u64,
    pub create_version: u64,
}

impl BlockLocation {
    /// Identity of the underlying block, ignoring the byte range
    #[must_use]
    pub const fn block_id(&self) -> (u64, u64) {
        (self.container_id, self.local_id)
    }
}

/// Total bytes covered by a location list
#[must_use]
pub fn total_length(locations: &[BlockLocation]) -> u64 {
    locations.iter().map(|l| l.length).sum()
}

/// Outcome of a row mutation, drives gauge movement in the facade
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowChange {
    /// A new row was written
    Inserted,
    /// An existing row was overwritten
    Replaced,
    /// The request matched the stored row; nothing was written
    Unchanged,
}

/// Stateless paging arguments shared by every list operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListArgs {
    pub prefix: String,
    pub start_after: Option<String>,
    pub limit: usize,
}

impl ListArgs {
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            prefix: String::new(),
            start_after: None,
            limit,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_start_after(mut self, start_after: impl Into<String>) -> Self {
        self.start_after = Some(start_after.into());
        self
    }
}

impl Default for ListArgs {
    fn default() -> Self {
        Self::new(100)
    }
}

// ---- Volumes ----

/// Arguments for `create_volume`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeArgs {
    pub name: String,
    pub owner: String,
    pub admin: String,
    pub quota_bytes: Option<u64>,
    pub acls: Vec<Acl>,
    pub metadata: BTreeMap<String, String>,
}

impl VolumeArgs {
    #[must_use]
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        Self {
            name: name.into(),
            admin: owner.clone(),
            owner,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub owner: String,
    pub admin: String,
    pub quota_bytes: Option<u64>,
    /// Sum of committed key sizes in the volume
    pub bytes_used: u64,
    pub acls: Vec<Acl>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: u64,
    pub modified_at: u64,
}

/// A single property change applied by `set_volume_property`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeProperty {
    Owner(String),
    /// `None` removes the quota
    QuotaBytes(Option<u64>),
    Acls(Vec<Acl>),
}

// ---- Buckets ----

/// Arguments for `create_bucket`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketArgs {
    pub volume: String,
    pub name: String,
    pub versioning: bool,
    pub storage_type: StorageType,
    pub trash_enabled: bool,
    pub acls: Vec<Acl>,
    pub metadata: BTreeMap<String, String>,
}

impl BucketArgs {
    #[must_use]
    pub fn new(volume: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_trash(mut self, enabled: bool) -> Self {
        self.trash_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_versioning(mut self, enabled: bool) -> Self {
        self.versioning = enabled;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub volume: String,
    pub name: String,
    pub versioning: bool,
    pub storage_type: StorageType,
    pub trash_enabled: bool,
    pub acls: Vec<Acl>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: u64,
}

/// Partial update applied by `set_bucket_property`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketUpdate {
    pub volume: String,
    pub name: String,
    pub versioning: Option<bool>,
    pub storage_type: Option<StorageType>,
    pub trash_enabled: Option<bool>,
    pub add_acls: Vec<Acl>,
    pub remove_acls: Vec<Acl>,
}

impl BucketUpdate {
    #[must_use]
    pub fn new(volume: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

// ---- Keys ----

/// Arguments shared by the key operations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyArgs {
    pub volume: String,
    pub bucket: String,
    pub key: String,
    /// Expected size on open, part size on multipart part commit
    pub data_size: u64,
    /// Locations reported by the writer on commit; empty means "use the opened set"
    pub locations: Vec<BlockLocation>,
    pub metadata: BTreeMap<String, String>,
}

impl KeyArgs {
    #[must_use]
    pub fn new(
        volume: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            volume: volume.into(),
            bucket: bucket.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_size(mut self, data_size: u64) -> Self {
        self.data_size = data_size;
        self
    }

    /// `vol/buk/key`, used in logs and lock scopes
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.volume, self.bucket, self.key)
    }
}

/// A superseded version kept by a versioning-enabled bucket
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersion {
    pub version: u64,
    pub data_size: u64,
    pub locations: Vec<BlockLocation>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub volume: String,
    pub bucket: String,
    pub name: String,
    pub version: u64,
    pub data_size: u64,
    pub locations: Vec<BlockLocation>,
    pub previous_versions: Vec<KeyVersion>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: u64,
    pub modified_at: u64,
}

impl KeyInfo {
    /// Every location referenced by the key, across all retained versions
    pub fn all_locations(&self) -> impl Iterator<Item = &BlockLocation> {
        self.locations
            .iter()
            .chain(self.previous_versions.iter().flat_map(|v| v.locations.iter()))
    }
}

/// Handle returned by `open_key`; the client id names the OpenKey row
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenKeySession {
    pub client_id: u64,
    pub key_info: KeyInfo,
    pub opened_at: u64,
}

/// One deleted copy of a key held in trash
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashedKey {
    pub key: KeyInfo,
    pub deleted_at: u64,
}

/// Trash listing entry: every trashed copy of one key name, oldest first
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashEntry {
    pub name: String,
    pub versions: Vec<TrashedKey>,
}

// ---- Multipart ----

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUploadInfo {
    pub volume: String,
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub initiated_at: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    pub part_number: u32,
    pub part_name: String,
    pub size: u64,
    pub locations: Vec<BlockLocation>,
    pub modified_at: u64,
}

/// Caller's view of a part when completing an upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub part_name: String,
}

impl From<&PartInfo> for CompletedPart {
    fn from(part: &PartInfo) -> Self {
        Self {
            part_number: part.part_number,
            part_name: part.part_name.clone(),
        }
    }
}
