//! StateStore — redb-backed datastore for nodes, pools and allocations.
//!
//! Node writes are revision-checked inside a single write transaction, so
//! two writers that read the same revision cannot both succeed. Address
//! assignment scans candidate pools in order and takes the first free host
//! address; a handle owns at most one address at a time. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use ipnet::{IpNet, Ipv4Net};
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe datastore backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent datastore at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "datastore opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory datastore (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory datastore opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        txn.open_table(HANDLES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or replace a node regardless of its revision.
    ///
    /// Used by whatever registers nodes. Returns the stored revision.
    pub fn put_node(&self, node: &Node) -> StateResult<Revision> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let revision;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let current: Option<Node> = match table.get(node.name.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            revision = current.map(|n| n.revision).unwrap_or_default().next();
            let mut stored = node.clone();
            stored.revision = revision;
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(node.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node = %node.name, %revision, "node stored");
        Ok(revision)
    }

    /// Get a node by name.
    pub fn get_node(&self, name: &str) -> StateResult<Option<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Write back a node previously read from the store.
    ///
    /// Succeeds only if `node.revision` still matches the stored revision;
    /// otherwise returns [`StateError::Conflict`] and nothing is written.
    pub fn update_node(&self, node: &Node) -> StateResult<Revision> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let revision;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let current: Node = match table.get(node.name.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(format!("node {}", node.name))),
            };
            if current.revision != node.revision {
                return Err(StateError::Conflict {
                    name: node.name.clone(),
                    supplied: node.revision,
                    current: current.revision,
                });
            }
            revision = current.revision.next();
            let mut stored = node.clone();
            stored.revision = revision;
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(node.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node = %node.name, %revision, "node updated");
        Ok(revision)
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Insert or update an address pool.
    pub fn put_pool(&self, pool: &AddressPool) -> StateResult<()> {
        let value = serde_json::to_vec(pool).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            table
                .insert(pool.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %pool.name, cidr = %pool.cidr, "pool stored");
        Ok(())
    }

    /// List all pools, ordered by name.
    pub fn list_pools(&self) -> StateResult<Vec<AddressPool>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    // ── Allocations ────────────────────────────────────────────────

    /// Reserve up to `args.num4` IPv4 addresses from the candidate pools.
    ///
    /// Every candidate must name a configured, enabled pool. Pools are tried
    /// in the order given and the lowest free host address wins. When the
    /// handle already owns an address, that reservation is dropped first.
    /// Returns fewer addresses than requested if the pools are exhausted; a
    /// call that finds nothing free changes nothing.
    pub fn auto_assign(&self, args: &AutoAssignArgs) -> StateResult<Vec<Ipv4Addr>> {
        if args.handle_id.is_some() && args.num4 > 1 {
            return Err(StateError::InvalidArgument(format!(
                "a handle owns at most one address, {} requested",
                args.num4
            )));
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut assigned = Vec::new();
        {
            let pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
            let mut enabled: Vec<Ipv4Net> = Vec::new();
            for entry in pools.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let pool: AddressPool = decode(value.value())?;
                if let (false, IpNet::V4(cidr)) = (pool.disabled, pool.cidr) {
                    enabled.push(cidr);
                }
            }
            if let Some(missing) = args.ipv4_pools.iter().find(|c| !enabled.contains(c)) {
                return Err(StateError::InvalidArgument(format!(
                    "{missing} is not an enabled IPv4 pool"
                )));
            }

            let mut allocations = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            let mut handles = txn.open_table(HANDLES).map_err(map_err!(Table))?;

            if let Some(handle) = &args.handle_id {
                let previous = handles
                    .get(handle.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| String::from_utf8_lossy(guard.value()).into_owned());
                if let Some(previous) = previous {
                    allocations
                        .remove(previous.as_str())
                        .map_err(map_err!(Write))?;
                    handles.remove(handle.as_str()).map_err(map_err!(Write))?;
                    debug!(%handle, ip = %previous, "dropped previous handle reservation");
                }
            }

            'pools: for pool in &args.ipv4_pools {
                for address in pool.hosts() {
                    if assigned.len() as u32 >= args.num4 {
                        break 'pools;
                    }
                    let key = address.to_string();
                    if allocations
                        .get(key.as_str())
                        .map_err(map_err!(Read))?
                        .is_some()
                    {
                        continue;
                    }
                    let allocation = Allocation {
                        address,
                        pool: *pool,
                        handle: args.handle_id.clone(),
                        hostname: args.hostname.clone(),
                        attrs: args.attrs.clone(),
                    };
                    let value = serde_json::to_vec(&allocation).map_err(map_err!(Serialize))?;
                    allocations
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    if let Some(handle) = &args.handle_id {
                        handles
                            .insert(handle.as_str(), key.as_bytes())
                            .map_err(map_err!(Write))?;
                    }
                    assigned.push(address);
                }
            }
        }
        if assigned.is_empty() {
            txn.abort().map_err(map_err!(Transaction))?;
            debug!(hostname = %args.hostname, "no free address in candidate pools");
            return Ok(assigned);
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            hostname = %args.hostname,
            requested = args.num4,
            assigned = assigned.len(),
            "auto-assign complete"
        );
        Ok(assigned)
    }

    /// Release the given addresses. Unallocated addresses are skipped.
    ///
    /// Returns how many addresses were actually released.
    pub fn release_ips(&self, addresses: &[Ipv4Addr]) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut released = 0;
        {
            let mut allocations = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            let mut handles = txn.open_table(HANDLES).map_err(map_err!(Table))?;
            for address in addresses {
                let key = address.to_string();
                let removed: Option<Allocation> =
                    match allocations.remove(key.as_str()).map_err(map_err!(Write))? {
                        Some(guard) => Some(decode(guard.value())?),
                        None => None,
                    };
                let Some(allocation) = removed else {
                    debug!(ip = %address, "address not allocated, nothing to release");
                    continue;
                };
                if let Some(handle) = &allocation.handle {
                    let bound_here = handles
                        .get(handle.as_str())
                        .map_err(map_err!(Read))?
                        .is_some_and(|guard| guard.value() == key.as_bytes());
                    if bound_here {
                        handles.remove(handle.as_str()).map_err(map_err!(Write))?;
                    }
                }
                released += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(requested = addresses.len(), released, "release complete");
        Ok(released)
    }

    /// Look up the allocation for an address.
    pub fn get_allocation(&self, address: Ipv4Addr) -> StateResult<Option<Allocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        match table.get(address.to_string().as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// The address currently owned by a handle, if any.
    pub fn address_for_handle(&self, handle: &str) -> StateResult<Option<Ipv4Addr>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HANDLES).map_err(map_err!(Table))?;
        match table.get(handle).map_err(map_err!(Read))? {
            Some(guard) => {
                let text = String::from_utf8_lossy(guard.value());
                let address = text
                    .parse()
                    .map_err(|_| StateError::Deserialize(format!("bad handle entry {text}")))?;
                Ok(Some(address))
            }
            None => Ok(None),
        }
    }

    /// List all allocations, ordered by their dotted-address key.
    pub fn list_allocations(&self) -> StateResult<Vec<Allocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }
}
