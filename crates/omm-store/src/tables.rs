//! Redb table definitions for persistent metadata storage.

use redb::TableDefinition;

// Every namespace row lives in one ordered table so prefix scans and
// cross-family batches stay inside a single keyspace.
// Key: "/vol/..", "/buk/..", "/key/..", "/open/..", "/trash/..", "/mpu/..", "/meta/.."
pub const OM_ROWS: TableDefinition<&str, &[u8]> = TableDefinition::new("om_rows");
