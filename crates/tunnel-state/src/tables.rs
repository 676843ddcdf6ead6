//! redb table definitions for the datastore.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Node records keyed by node name.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Address pools keyed by pool name.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Allocations keyed by the dotted IPv4 address.
pub const ALLOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("allocations");

/// Handle to address index. Values are the dotted IPv4 address as UTF-8.
pub const HANDLES: TableDefinition<&str, &[u8]> = TableDefinition::new("handles");
