//! Row value encoding.
//!
//! Layout: `0x00 <varint schema version> <protobuf body>`. Field number 0
//! is invalid in protobuf, so the header byte can never be mistaken for the
//! start of a body written without one. New optional fields may be added to
//! any row; older readers skip them.

use crate::error::{StoreError, StoreResult};
use prost::Message;
use tracing::debug;

/// Schema version written into every row header
pub const SCHEMA_VERSION: u64 = 1;

const HEADER_TAG: u8 = 0x00;

/// A protobuf message stored as a namespace row
pub trait Row: Message + Default {
    /// Row family, used in diagnostics
    const FAMILY: &'static str;
}

#[must_use]
pub fn encode_row<R: Row>(row: &R) -> Vec<u8> {
    let body = row.encode_to_vec();
    let mut buf = Vec::with_capacity(body.len() + 4);
    buf.push(HEADER_TAG);
    prost::encoding::encode_varint(SCHEMA_VERSION, &mut buf);
    buf.extend_from_slice(&body);
    buf
}

pub fn decode_row<R: Row>(key: &str, bytes: &[u8]) -> StoreResult<R> {
    let Some((&tag, mut rest)) = bytes.split_first() else {
        return Err(StoreError::corrupt(key, "empty row"));
    };
    if tag != HEADER_TAG {
        return Err(StoreError::corrupt(
            key,
            format!("missing schema header (first byte {tag:#04x})"),
        ));
    }
    let version = prost::encoding::decode_varint(&mut rest)
        .map_err(|e| StoreError::corrupt(key, format!("schema version: {e}")))?;
    if version == 0 {
        return Err(StoreError::corrupt(key, "schema version 0"));
    }
    if version > SCHEMA_VERSION {
        debug!(
            "Row {} written by schema v{} (current v{})",
            key, version, SCHEMA_VERSION
        );
    }
    R::decode(rest).map_err(|e| StoreError::corrupt(key, format!("{} body: {}", R::FAMILY, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{GaugeRow, VolumeRow};

    #[test]
    fn test_header_layout() {
        let row = GaugeRow {
            generation: 1,
            num_buckets: 2,
            ..GaugeRow::default()
        };
        let bytes = encode_row(&row);
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(decode_row::<GaugeRow>("/meta/gauges", &bytes).unwrap(), row);
    }

    #[test]
    fn test_rejects_headerless_rows() {
        let body = GaugeRow::default().encode_to_vec();
        let mut raw = vec![0x08, 0x01];
        raw.extend_from_slice(&body);
        assert!(matches!(
            decode_row::<GaugeRow>("/meta/gauges", &raw),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(decode_row::<GaugeRow>("/meta/gauges", &[]).is_err());
        assert!(decode_row::<GaugeRow>("/meta/gauges", &[0x00, 0x00]).is_err());
    }

    #[test]
    fn test_garbage_body_is_corrupt() {
        let bytes = [0x00, 0x01, 0xff, 0xff, 0xff];
        assert!(matches!(
            decode_row::<VolumeRow>("/vol/a", &bytes),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_newer_schema_with_unknown_field_decodes() {
        let row = VolumeRow {
            name: "a".into(),
            owner: "alice".into(),
            ..VolumeRow::default()
        };
        let mut bytes = vec![0x00];
        prost::encoding::encode_varint(SCHEMA_VERSION + 1, &mut bytes);
        bytes.extend_from_slice(&row.encode_to_vec());
        // field 100, varint 7: written by a newer release
        prost::encoding::encode_key(100, prost::encoding::WireType::Varint, &mut bytes);
        prost::encoding::encode_varint(7, &mut bytes);

        let decoded: VolumeRow = decode_row("/vol/a", &bytes).unwrap();
        assert_eq!(decoded, row);
    }
}
