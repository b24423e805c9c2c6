//! Persisted row messages and their conversions to namespace types.
//!
//! Field numbers are part of the on-disk format: never reuse or renumber
//! one, only append. Maps are ordered so equal rows encode identically.

use crate::codec::Row;
use omm_common::{
    Acl, AclIdentity, AclRights, BlockLocation, BucketInfo, KeyInfo, KeyVersion, PartInfo,
    StorageType, TrashedKey, VolumeInfo,
};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StorageTypeCode {
    Disk = 0,
    Ssd = 1,
    Archive = 2,
    RamDisk = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum AclIdentityCode {
    User = 0,
    Group = 1,
    World = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AclRow {
    #[prost(enumeration = "AclIdentityCode", tag = "1")]
    pub identity: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint32, tag = "3")]
    pub rights: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LocationRow {
    #[prost(uint64, tag = "1")]
    pub container_id: u64,
    #[prost(uint64, tag = "2")]
    pub local_id: u64,
    #[prost(uint64, tag = "3")]
    pub offset: u64,
    #[prost(uint64, tag = "4")]
    pub length: u64,
    #[prost(uint64, tag = "5")]
    pub create_version: u64,
}

/// `/vol/<vol>`
#[derive(Clone, PartialEq, prost::Message)]
pub struct VolumeRow {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub owner: String,
    #[prost(string, tag = "3")]
    pub admin: String,
    #[prost(uint64, optional, tag = "4")]
    pub quota_bytes: Option<u64>,
    #[prost(uint64, tag = "5")]
    pub bytes_used: u64,
    #[prost(message, repeated, tag = "6")]
    pub acls: Vec<AclRow>,
    #[prost(btree_map = "string, string", tag = "7")]
    pub metadata: BTreeMap<String, String>,
    #[prost(uint64, tag = "8")]
    pub created_at: u64,
    #[prost(uint64, tag = "9")]
    pub modified_at: u64,
}

/// `/buk/<vol>/<buk>`
#[derive(Clone, PartialEq, prost::Message)]
pub struct BucketRow {
    #[prost(string, tag = "1")]
    pub volume: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(bool, tag = "3")]
    pub versioning: bool,
    #[prost(enumeration = "StorageTypeCode", tag = "4")]
    pub storage_type: i32,
    #[prost(bool, tag = "5")]
    pub trash_enabled: bool,
    #[prost(message, repeated, tag = "6")]
    pub acls: Vec<AclRow>,
    #[prost(btree_map = "string, string", tag = "7")]
    pub metadata: BTreeMap<String, String>,
    #[prost(uint64, tag = "8")]
    pub created_at: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyVersionRow {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(uint64, tag = "2")]
    pub data_size: u64,
    #[prost(message, repeated, tag = "3")]
    pub locations: Vec<LocationRow>,
}

/// `/key/<vol>/<buk>/<key>`
#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyRow {
    #[prost(string, tag = "1")]
    pub volume: String,
    #[prost(string, tag = "2")]
    pub bucket: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(uint64, tag = "4")]
    pub version: u64,
    #[prost(uint64, tag = "5")]
    pub data_size: u64,
    #[prost(message, repeated, tag = "6")]
    pub locations: Vec<LocationRow>,
    #[prost(btree_map = "string, string", tag = "7")]
    pub metadata: BTreeMap<String, String>,
    #[prost(uint64, tag = "8")]
    pub created_at: u64,
    #[prost(uint64, tag = "9")]
    pub modified_at: u64,
    #[prost(message, repeated, tag = "10")]
    pub previous_versions: Vec<KeyVersionRow>,
}

/// `/open/<vol>/<buk>/<key>/<client id>`
#[derive(Clone, PartialEq, prost::Message)]
pub struct OpenKeyRow {
    #[prost(string, tag = "1")]
    pub volume: String,
    #[prost(string, tag = "2")]
    pub bucket: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(uint64, tag = "4")]
    pub client_id: u64,
    #[prost(message, repeated, tag = "5")]
    pub locations: Vec<LocationRow>,
    #[prost(uint64, tag = "6")]
    pub expected_size: u64,
    #[prost(uint64, tag = "7")]
    pub opened_at: u64,
    #[prost(btree_map = "string, string", tag = "8")]
    pub metadata: BTreeMap<String, String>,
}

/// `/trash/<vol>/<buk>/<key>/<deleted at>`
#[derive(Clone, PartialEq, prost::Message)]
pub struct TrashRow {
    #[prost(message, optional, tag = "1")]
    pub key: Option<KeyRow>,
    #[prost(uint64, tag = "2")]
    pub deleted_at: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PartRow {
    #[prost(uint32, tag = "1")]
    pub part_number: u32,
    #[prost(string, tag = "2")]
    pub part_name: String,
    #[prost(uint64, tag = "3")]
    pub size: u64,
    #[prost(message, repeated, tag = "4")]
    pub locations: Vec<LocationRow>,
    #[prost(uint64, tag = "5")]
    pub modified_at: u64,
}

/// `/mpu/<vol>/<buk>/<key>/<upload id>`
#[derive(Clone, PartialEq, prost::Message)]
pub struct MultipartRow {
    #[prost(string, tag = "1")]
    pub volume: String,
    #[prost(string, tag = "2")]
    pub bucket: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub upload_id: String,
    #[prost(uint64, tag = "5")]
    pub initiated_at: u64,
    #[prost(btree_map = "uint32, message", tag = "6")]
    pub parts: BTreeMap<u32, PartRow>,
    #[prost(btree_map = "string, string", tag = "7")]
    pub metadata: BTreeMap<String, String>,
}

/// `/meta/gauges`
#[derive(Clone, PartialEq, prost::Message)]
pub struct GaugeRow {
    #[prost(uint64, tag = "1")]
    pub generation: u64,
    #[prost(int64, tag = "2")]
    pub num_volumes: i64,
    #[prost(int64, tag = "3")]
    pub num_buckets: i64,
    #[prost(int64, tag = "4")]
    pub num_keys: i64,
    #[prost(uint64, tag = "5")]
    pub saved_at: u64,
    #[prost(bool, tag = "6")]
    pub clean_shutdown: bool,
}

/// `/meta/pending-release/<uuid>`
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReleaseIntentRow {
    #[prost(message, repeated, tag = "1")]
    pub locations: Vec<LocationRow>,
    #[prost(string, tag = "2")]
    pub reason: String,
    #[prost(uint64, tag = "3")]
    pub created_at: u64,
    #[prost(uint32, tag = "4")]
    pub attempts: u32,
}

impl Row for VolumeRow {
    const FAMILY: &'static str = "volume";
}
impl Row for BucketRow {
    const FAMILY: &'static str = "bucket";
}
impl Row for KeyRow {
    const FAMILY: &'static str = "key";
}
impl Row for OpenKeyRow {
    const FAMILY: &'static str = "open-key";
}
impl Row for TrashRow {
    const FAMILY: &'static str = "trash";
}
impl Row for MultipartRow {
    const FAMILY: &'static str = "multipart";
}
impl Row for GaugeRow {
    const FAMILY: &'static str = "gauges";
}
impl Row for ReleaseIntentRow {
    const FAMILY: &'static str = "pending-release";
}

// ---- Conversions ----

impl From<StorageType> for StorageTypeCode {
    fn from(t: StorageType) -> Self {
        match t {
            StorageType::Disk => Self::Disk,
            StorageType::Ssd => Self::Ssd,
            StorageType::Archive => Self::Archive,
            StorageType::RamDisk => Self::RamDisk,
        }
    }
}

impl From<StorageTypeCode> for StorageType {
    fn from(c: StorageTypeCode) -> Self {
        match c {
            StorageTypeCode::Disk => Self::Disk,
            StorageTypeCode::Ssd => Self::Ssd,
            StorageTypeCode::Archive => Self::Archive,
            StorageTypeCode::RamDisk => Self::RamDisk,
        }
    }
}

impl From<&Acl> for AclRow {
    fn from(acl: &Acl) -> Self {
        let identity = match acl.identity {
            AclIdentity::User => AclIdentityCode::User,
            AclIdentity::Group => AclIdentityCode::Group,
            AclIdentity::World => AclIdentityCode::World,
        };
        Self {
            identity: identity as i32,
            name: acl.name.clone(),
            rights: acl.rights.bits(),
        }
    }
}

impl From<&AclRow> for Acl {
    fn from(row: &AclRow) -> Self {
        let identity = match row.identity() {
            AclIdentityCode::User => AclIdentity::User,
            AclIdentityCode::Group => AclIdentity::Group,
            AclIdentityCode::World => AclIdentity::World,
        };
        Self {
            identity,
            name: row.name.clone(),
            rights: AclRights::from_bits(row.rights),
        }
    }
}

impl From<&BlockLocation> for LocationRow {
    fn from(l: &BlockLocation) -> Self {
        Self {
            container_id: l.container_id,
            local_id: l.local_id,
            offset: l.offset,
            length: l.length,
            create_version: l.create_version,
        }
    }
}

impl From<&LocationRow> for BlockLocation {
    fn from(r: &LocationRow) -> Self {
        Self {
            container_id: r.container_id,
            local_id: r.local_id,
            offset: r.offset,
            length: r.length,
            create_version: r.create_version,
        }
    }
}

pub fn to_location_rows(locations: &[BlockLocation]) -> Vec<LocationRow> {
    locations.iter().map(LocationRow::from).collect()
}

pub fn to_locations(rows: &[LocationRow]) -> Vec<BlockLocation> {
    rows.iter().map(BlockLocation::from).collect()
}

pub fn to_acl_rows(acls: &[Acl]) -> Vec<AclRow> {
    acls.iter().map(AclRow::from).collect()
}

pub fn to_acls(rows: &[AclRow]) -> Vec<Acl> {
    rows.iter().map(Acl::from).collect()
}

impl From<&VolumeRow> for VolumeInfo {
    fn from(row: &VolumeRow) -> Self {
        Self {
            name: row.name.clone(),
            owner: row.owner.clone(),
            admin: row.admin.clone(),
            quota_bytes: row.quota_bytes,
            bytes_used: row.bytes_used,
            acls: to_acls(&row.acls),
            metadata: row.metadata.clone(),
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

impl From<&BucketRow> for BucketInfo {
    fn from(row: &BucketRow) -> Self {
        Self {
            volume: row.volume.clone(),
            name: row.name.clone(),
            versioning: row.versioning,
            storage_type: row.storage_type().into(),
            trash_enabled: row.trash_enabled,
            acls: to_acls(&row.acls),
            metadata: row.metadata.clone(),
            created_at: row.created_at,
        }
    }
}

impl From<&KeyRow> for KeyInfo {
    fn from(row: &KeyRow) -> Self {
        Self {
            volume: row.volume.clone(),
            bucket: row.bucket.clone(),
            name: row.name.clone(),
            version: row.version,
            data_size: row.data_size,
            locations: to_locations(&row.locations),
            previous_versions: row
                .previous_versions
                .iter()
                .map(|v| KeyVersion {
                    version: v.version,
                    data_size: v.data_size,
                    locations: to_locations(&v.locations),
                })
                .collect(),
            metadata: row.metadata.clone(),
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

impl KeyRow {
    /// Every location held by the row, across retained versions
    #[must_use]
    pub fn all_locations(&self) -> Vec<BlockLocation> {
        self.locations
            .iter()
            .chain(self.previous_versions.iter().flat_map(|v| v.locations.iter()))
            .map(BlockLocation::from)
            .collect()
    }
}

impl From<&TrashRow> for TrashedKey {
    fn from(row: &TrashRow) -> Self {
        Self {
            key: row.key.as_ref().map(KeyInfo::from).unwrap_or_default(),
            deleted_at: row.deleted_at,
        }
    }
}

impl From<&PartRow> for PartInfo {
    fn from(row: &PartRow) -> Self {
        Self {
            part_number: row.part_number,
            part_name: row.part_name.clone(),
            size: row.size,
            locations: to_locations(&row.locations),
            modified_at: row.modified_at,
        }
    }
}

impl MultipartRow {
    #[must_use]
    pub fn all_locations(&self) -> Vec<BlockLocation> {
        self.parts
            .values()
            .flat_map(|p| p.locations.iter())
            .map(BlockLocation::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_row, encode_row};

    #[test]
    fn test_bucket_row_encoding_is_deterministic() {
        let mut metadata = BTreeMap::new();
        metadata.insert("team".to_string(), "ingest".to_string());
        metadata.insert("cost-center".to_string(), "42".to_string());
        let row = BucketRow {
            volume: "v".into(),
            name: "b".into(),
            storage_type: StorageTypeCode::Ssd as i32,
            metadata,
            ..BucketRow::default()
        };
        assert_eq!(encode_row(&row), encode_row(&row.clone()));
        let info = BucketInfo::from(&row);
        assert_eq!(info.storage_type, StorageType::Ssd);
    }

    #[test]
    fn test_acl_conversion() {
        let acl = Acl::world(AclRights::READ.union(AclRights::LIST));
        let row = AclRow::from(&acl);
        assert_eq!(Acl::from(&row), acl);
    }

    #[test]
    fn test_multipart_parts_survive_encoding() {
        let mut parts = BTreeMap::new();
        for n in [3u32, 1, 2] {
            parts.insert(
                n,
                PartRow {
                    part_number: n,
                    part_name: format!("p{n}"),
                    size: 10,
                    locations: vec![LocationRow {
                        container_id: 1,
                        local_id: u64::from(n),
                        length: 10,
                        ..LocationRow::default()
                    }],
                    modified_at: 0,
                },
            );
        }
        let row = MultipartRow {
            upload_id: "u".into(),
            parts,
            ..MultipartRow::default()
        };
        let decoded: MultipartRow = decode_row("/mpu/v/b/k/u", &encode_row(&row)).unwrap();
        let numbers: Vec<_> = decoded.parts.keys().copied().collect();
        assert_eq!(numbers, [1, 2, 3]);
        assert_eq!(decoded.all_locations().len(), 3);
    }
}
