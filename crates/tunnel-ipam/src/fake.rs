//! Scriptable cluster for unit tests.
//!
//! Wraps an in-memory [`StateStore`] holding node `node-1` and counts every
//! client call. Conflicts are produced by a simulated concurrent writer
//! that bumps the node's revision right before the write under test, so the
//! store itself rejects it.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tunnel_core::EncapMode;
use tunnel_state::{
    AddressPool, AutoAssignArgs, Node, Revision, StateError, StateResult, StateStore,
};

use crate::client::{IpamClient, NodeClient, PoolClient};
use crate::tunnel::TunnelFields;

pub const NODE: &str = "node-1";

pub struct FakeCluster {
    store: StateStore,
    conflicts: AtomicU32,
    swap: Mutex<Option<(EncapMode, String)>>,
    gets_allowed: AtomicU32,
    fail_updates: AtomicBool,
    fail_releases: AtomicBool,
    exhausted: AtomicBool,
    gets: AtomicU32,
    updates: AtomicU32,
    assigns: AtomicU32,
    release_calls: AtomicU32,
    released: Mutex<Vec<Ipv4Addr>>,
}

impl FakeCluster {
    /// A cluster with `node-1` and one pool per CIDR, each enabled for both modes.
    pub fn with_pools(cidrs: &[&str]) -> Arc<Self> {
        let store = StateStore::open_in_memory().unwrap();
        store.put_node(&Node::new(NODE)).unwrap();
        for (i, cidr) in cidrs.iter().enumerate() {
            let pool = AddressPool::new(&format!("pool-{i}"), cidr.parse().unwrap())
                .with_ipip()
                .with_vxlan();
            store.put_pool(&pool).unwrap();
        }
        Arc::new(Self {
            store,
            conflicts: AtomicU32::new(0),
            swap: Mutex::new(None),
            gets_allowed: AtomicU32::new(u32::MAX),
            fail_updates: AtomicBool::new(false),
            fail_releases: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            gets: AtomicU32::new(0),
            updates: AtomicU32::new(0),
            assigns: AtomicU32::new(0),
            release_calls: AtomicU32::new(0),
            released: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Current node, read without counting as a client call.
    pub fn node(&self) -> Node {
        self.store.get_node(NODE).unwrap().unwrap()
    }

    pub fn edit_node(&self, edit: impl FnOnce(&mut Node)) {
        let mut node = self.node();
        edit(&mut node);
        self.store.put_node(&node).unwrap();
    }

    /// Reserve the next free address in `cidr` under `handle`.
    pub fn reserve(&self, cidr: &str, handle: &str) -> Ipv4Addr {
        let args = AutoAssignArgs {
            num4: 1,
            handle_id: Some(handle.to_string()),
            attrs: Default::default(),
            hostname: NODE.to_string(),
            ipv4_pools: vec![cidr.parse().unwrap()],
        };
        self.store.auto_assign(&args).unwrap()[0]
    }

    pub fn conflict_next_updates(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    /// Before the next write, another controller records `address` for
    /// `mode`, so that write conflicts.
    pub fn swap_on_next_update(&self, mode: EncapMode, address: &str) {
        *self.swap.lock().unwrap() = Some((mode, address.to_string()));
    }

    /// Node reads after the first `n` fail.
    pub fn fail_gets_after(&self, n: u32) {
        self.gets_allowed.store(n, Ordering::SeqCst);
    }

    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    pub fn fail_releases(&self) {
        self.fail_releases.store(true, Ordering::SeqCst);
    }

    pub fn exhaust(&self) {
        self.exhausted.store(true, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u32 {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn assign_calls(&self) -> u32 {
        self.assigns.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> u32 {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Addresses passed to successful release calls, in call order.
    pub fn released(&self) -> Vec<Ipv4Addr> {
        self.released.lock().unwrap().clone()
    }

    fn take_conflict(&self) -> bool {
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl NodeClient for FakeCluster {
    async fn get(&self, name: &str) -> StateResult<Node> {
        let n = self.gets.fetch_add(1, Ordering::SeqCst);
        if n >= self.gets_allowed.load(Ordering::SeqCst) {
            return Err(StateError::Read("injected read failure".to_string()));
        }
        NodeClient::get(&self.store, name).await
    }

    async fn update(&self, node: &Node) -> StateResult<Revision> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StateError::Write("injected write failure".to_string()));
        }
        if let Some((mode, address)) = self.swap.lock().unwrap().take() {
            self.edit_node(|other| other.set_tunnel_addr(mode, Some(address)));
        }
        if self.take_conflict() {
            // Another controller writes first.
            self.edit_node(|other| {
                let n = other
                    .labels
                    .get("concurrent-writes")
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(0);
                other
                    .labels
                    .insert("concurrent-writes".to_string(), (n + 1).to_string());
            });
        }
        NodeClient::update(&self.store, node).await
    }
}

#[async_trait]
impl PoolClient for FakeCluster {
    async fn list(&self) -> StateResult<Vec<AddressPool>> {
        self.store.list_pools()
    }
}

#[async_trait]
impl IpamClient for FakeCluster {
    async fn auto_assign(&self, args: AutoAssignArgs) -> StateResult<Vec<Ipv4Addr>> {
        self.assigns.fetch_add(1, Ordering::SeqCst);
        if self.exhausted.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.store.auto_assign(&args)
    }

    async fn release_ips(&self, addresses: &[Ipv4Addr]) -> StateResult<usize> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(StateError::Write("injected release failure".to_string()));
        }
        let count = self.store.release_ips(addresses)?;
        self.released.lock().unwrap().extend_from_slice(addresses);
        Ok(count)
    }
}
