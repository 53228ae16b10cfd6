//! Disk-resident B+ tree.
//!
//! An ordered map from fixed-size keys to fixed-size values, persisted in
//! three files per tree: a 12-byte header (`root`, `beg`, `end` offsets),
//! a node file, and a value file. Leaves hold value-file offsets and form
//! a doubly linked chain; internal nodes index each child by the maximum
//! key of its subtree. Node I/O goes through a write-back LRU cache.
//!
//! Freed node and value slots are recycled through in-memory stacks that
//! start empty on reopen; slots freed in a previous process live are
//! leaked until `clear`.

use crate::file::StoreFile;
use crate::node::{Node, NO_NODE};
use crate::record::{Entry, Handle, Key, Record};
use interlock_buffer::NodeCache;
use interlock_common::{InterlockError, Result, StorageConfig};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::path::PathBuf;

/// Mutable tree state guarded by the tree's mutex.
struct TreeInner<K: Key> {
    name: String,
    tree_file: StoreFile,
    node_file: StoreFile,
    value_file: StoreFile,
    root_pos: i32,
    beg_pos: i32,
    end_pos: i32,
    node_pool: Vec<i32>,
    value_pool: Vec<i32>,
    cache: NodeCache<Node<K>>,
}

/// A disk-backed ordered map `K -> V`.
///
/// All operations take `&self`; a mutex serializes access so that
/// several iterators over the same tree can be interleaved, the way the
/// search paths walk two key ranges at once.
pub struct BPlusTree<K: Key, V: Record> {
    inner: Mutex<TreeInner<K>>,
    _value: PhantomData<V>,
}

impl<K: Key, V: Record> BPlusTree<K, V> {
    /// Opens (creating if missing) the tree named `name` under the
    /// configured data directory.
    pub fn open(config: &StorageConfig, name: &str) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = |suffix: &str| -> PathBuf {
            config.data_dir.join(format!("BPT_{}_{}.bin", name, suffix))
        };
        let truncate = !config.retrieve;
        let tree_file = StoreFile::open(&path("tree"), truncate)?;
        let node_file = StoreFile::open(&path("node"), truncate)?;
        let value_file = StoreFile::open(&path("value"), truncate)?;

        let mut inner = TreeInner {
            name: name.to_string(),
            tree_file,
            node_file,
            value_file,
            root_pos: NO_NODE,
            beg_pos: NO_NODE,
            end_pos: NO_NODE,
            node_pool: Vec::new(),
            value_pool: Vec::new(),
            cache: NodeCache::for_bytes(config.node_cache_bytes, Node::<K>::DISK_SIZE),
        };

        if inner.tree_file.end_offset()? >= HEADER_SIZE as i32 {
            inner.read_header()?;
        }
        if inner.root_pos == NO_NODE {
            inner.init_empty()?;
        }
        tracing::debug!(tree = %inner.name, root = inner.root_pos, "opened");

        Ok(Self {
            inner: Mutex::new(inner),
            _value: PhantomData,
        })
    }

    /// Looks a key up, returning its value handle.
    pub fn find(&self, key: &K) -> Result<Option<Handle>> {
        let mut inner = self.inner.lock();
        Ok(inner
            .find(key)?
            .map(|(node, idx)| Handle(node.entries[idx].1)))
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.find(key)?.is_some())
    }

    /// Value of an existing key. Fails with `NotFound` when absent.
    pub fn get(&self, key: &K) -> Result<V> {
        let mut inner = self.inner.lock();
        match inner.find(key)? {
            Some((node, idx)) => inner.read_value(node.entries[idx].1),
            None => Err(InterlockError::NotFound),
        }
    }

    /// Value of a key, or `V::default()` when absent.
    pub fn get_or_default(&self, key: &K) -> Result<V>
    where
        V: Default,
    {
        let mut inner = self.inner.lock();
        match inner.find(key)? {
            Some((node, idx)) => inner.read_value(node.entries[idx].1),
            None => Ok(V::default()),
        }
    }

    /// Overwrites the value of an existing key in place.
    pub fn set(&self, key: &K, value: &V) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.find(key)? {
            Some((node, idx)) => inner.write_value(node.entries[idx].1, value),
            None => Err(InterlockError::NotFound),
        }
    }

    /// Inserts a new key, returning the handle of its value slot. Fails
    /// with `AlreadyExists` when the key is present.
    pub fn insert(&self, key: K, value: &V) -> Result<Handle> {
        let mut inner = self.inner.lock();
        let val_pos = inner.new_value()?;
        let root_pos = inner.root_pos;
        let mut root = inner.read_node(root_pos)?;
        match inner.bp_insert(&key, val_pos, &mut root, None) {
            Ok(()) => {
                inner.write_value(val_pos, value)?;
                Ok(Handle(val_pos))
            }
            Err(err) => {
                inner.value_pool.push(val_pos);
                Err(err)
            }
        }
    }

    /// Erases a key, recycling its slots. Fails with `NotFound` when
    /// absent. Any handle previously obtained for the key is invalidated.
    pub fn erase(&self, key: &K) -> Result<()> {
        let mut inner = self.inner.lock();
        let root_pos = inner.root_pos;
        let mut root = inner.read_node(root_pos)?;
        let freed = inner.bp_erase(key, &mut root, None)?;
        inner.value_pool.push(freed);
        Ok(())
    }

    /// Reads a value directly through its handle, skipping the descent.
    pub fn get_by_handle(&self, handle: Handle) -> Result<V> {
        self.inner.lock().read_value(handle.0)
    }

    /// Rewrites a value directly through its handle.
    pub fn set_by_handle(&self, handle: Handle, value: &V) -> Result<()> {
        self.inner.lock().write_value(handle.0, value)
    }

    /// All entries with keys in `[lo, hi]`, in ascending key order.
    pub fn scan_range(&self, lo: &K, hi: &K) -> Result<Vec<Entry<K>>> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        let Some((mut node, mut idx)) = inner.lower_bound(lo)? else {
            return Ok(out);
        };
        loop {
            if idx == node.len() {
                if node.next == NO_NODE {
                    break;
                }
                node = inner.read_node(node.next)?;
                idx = 0;
                continue;
            }
            let (key, off) = node.entries[idx];
            if key > *hi {
                break;
            }
            out.push(Entry {
                key,
                handle: Handle(off),
            });
            idx += 1;
        }
        Ok(out)
    }

    /// Iterates the whole tree in ascending key order.
    pub fn iter(&self) -> Result<TreeIter<'_, K, V>> {
        let node = {
            let mut inner = self.inner.lock();
            let beg = inner.beg_pos;
            inner.read_node(beg)?
        };
        Ok(TreeIter::start(self, node, 0))
    }

    /// Iterates from the first key `>= key` to the end of the tree.
    pub fn lower_bound(&self, key: &K) -> Result<TreeIter<'_, K, V>> {
        let start = self.inner.lock().lower_bound(key)?;
        Ok(match start {
            Some((node, idx)) => TreeIter::start(self, node, idx),
            None => TreeIter::end(self),
        })
    }

    /// Iterates from the first key `> key` to the end of the tree.
    pub fn upper_bound(&self, key: &K) -> Result<TreeIter<'_, K, V>> {
        let start = self.inner.lock().upper_bound(key)?;
        Ok(match start {
            Some((node, idx)) => TreeIter::start(self, node, idx),
            None => TreeIter::end(self),
        })
    }

    /// The greatest entry, `None` on an empty tree.
    pub fn last(&self) -> Result<Option<Entry<K>>> {
        let mut inner = self.inner.lock();
        let end = inner.end_pos;
        let node = inner.read_node(end)?;
        Ok(node.entries.last().map(|&(key, off)| Entry {
            key,
            handle: Handle(off),
        }))
    }

    /// True when no key has ever been inserted (or all were erased).
    pub fn is_empty(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        let root = inner.root_pos;
        Ok(inner.read_node(root)?.is_empty())
    }

    /// Truncates all three files and reinitializes an empty root. The
    /// cache and the free-position stacks are discarded first.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.cache.drain();
        inner.node_pool.clear();
        inner.value_pool.clear();
        inner.tree_file.truncate()?;
        inner.node_file.truncate()?;
        inner.value_file.truncate()?;
        inner.root_pos = NO_NODE;
        inner.init_empty()?;
        tracing::debug!(tree = %inner.name, "cleared");
        Ok(())
    }

    /// Writes back every cached node, persists the header, and syncs.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().flush()
    }

    fn read_node_at(&self, pos: i32) -> Result<Node<K>> {
        self.inner.lock().read_node(pos)
    }

    /// Walks the whole tree and verifies its structural invariants:
    /// per-node size bounds, sorted entries, separator-equals-child-max,
    /// and leaf links agreeing with key order. Intended for tests and
    /// debugging; cost is a full scan.
    pub fn check_invariants(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let root_pos = inner.root_pos;
        let root = inner.read_node(root_pos)?;
        if !root.leaf && root.len() < 2 {
            return Err(InterlockError::Corrupted(format!(
                "internal root has {} children",
                root.len()
            )));
        }
        inner.check_node(&root, true)?;

        // Leaf chain: ascending keys, consistent prev links.
        let mut pos = inner.beg_pos;
        let mut prev_pos = NO_NODE;
        let mut prev_key: Option<K> = None;
        loop {
            let node = inner.read_node(pos)?;
            if !node.leaf {
                return Err(InterlockError::Corrupted(format!(
                    "non-leaf node {} in leaf chain",
                    pos
                )));
            }
            if node.prev != prev_pos {
                return Err(InterlockError::Corrupted(format!(
                    "leaf {} prev link {} != {}",
                    pos, node.prev, prev_pos
                )));
            }
            for &(key, _) in &node.entries {
                if let Some(prev) = prev_key {
                    if prev >= key {
                        return Err(InterlockError::Corrupted(format!(
                            "leaf chain keys out of order in node {}",
                            pos
                        )));
                    }
                }
                prev_key = Some(key);
            }
            if node.next == NO_NODE {
                if pos != inner.end_pos {
                    return Err(InterlockError::Corrupted(format!(
                        "last leaf {} != end_pos {}",
                        pos, inner.end_pos
                    )));
                }
                break;
            }
            prev_pos = pos;
            pos = node.next;
        }
        Ok(())
    }
}

impl<K: Key, V: Record> Drop for BPlusTree<K, V> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Err(err) = inner.flush() {
            tracing::warn!(tree = %inner.name, "flush on close failed: {}", err);
        }
    }
}

const HEADER_SIZE: usize = 12;

impl<K: Key> TreeInner<K> {
    fn read_header(&mut self) -> Result<()> {
        let mut raw = [0u8; HEADER_SIZE];
        self.tree_file.read_at(0, &mut raw)?;
        self.root_pos = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        self.beg_pos = i32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        self.end_pos = i32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut raw = [0u8; HEADER_SIZE];
        raw[0..4].copy_from_slice(&self.root_pos.to_le_bytes());
        raw[4..8].copy_from_slice(&self.beg_pos.to_le_bytes());
        raw[8..12].copy_from_slice(&self.end_pos.to_le_bytes());
        self.tree_file.write_at(0, &raw)
    }

    /// Allocates the empty root of a fresh (or just-cleared) tree.
    fn init_empty(&mut self) -> Result<()> {
        let pos = self.new_node()?;
        let root = Node::new(pos, true);
        self.write_node_raw(&root)?;
        self.write_node(&root)?;
        self.root_pos = pos;
        self.beg_pos = pos;
        self.end_pos = pos;
        self.write_header()
    }

    /// Pops a recycled node slot or extends the node file. The slot is
    /// zero-filled on extension so the offset stays reachable after a
    /// restart even if the node write is still sitting in the cache.
    fn new_node(&mut self) -> Result<i32> {
        if let Some(pos) = self.node_pool.pop() {
            return Ok(pos);
        }
        self.node_file.append_zeroed(Node::<K>::DISK_SIZE)
    }

    fn delete_node(&mut self, pos: i32) {
        self.cache.discard(pos);
        self.node_pool.push(pos);
    }

    /// Pops a recycled value slot or hands out the current end of the
    /// value file. The slot is only materialized by the first value
    /// write, which must happen before the next allocation.
    fn new_value(&mut self) -> Result<i32> {
        if let Some(pos) = self.value_pool.pop() {
            return Ok(pos);
        }
        self.value_file.end_offset()
    }

    fn read_node_raw(&mut self, pos: i32) -> Result<Node<K>> {
        let mut raw = vec![0u8; Node::<K>::DISK_SIZE];
        self.node_file.read_at(pos, &mut raw)?;
        Node::decode(&raw, pos)
    }

    fn write_node_raw(&mut self, node: &Node<K>) -> Result<()> {
        self.node_file.write_at(node.pos, &node.encode())
    }

    /// Cached node read; a miss fetches from disk and may push an
    /// evicted node back out.
    fn read_node(&mut self, pos: i32) -> Result<Node<K>> {
        if !self.cache.is_enabled() {
            return self.read_node_raw(pos);
        }
        if let Some(node) = self.cache.get(pos) {
            return Ok(node);
        }
        let node = self.read_node_raw(pos)?;
        if let Some((_, evicted)) = self.cache.put(pos, node.clone()) {
            self.write_node_raw(&evicted)?;
        }
        Ok(node)
    }

    /// Cached node write; the resident copy is always current, so
    /// eviction alone persists it.
    fn write_node(&mut self, node: &Node<K>) -> Result<()> {
        if !self.cache.is_enabled() {
            return self.write_node_raw(node);
        }
        if let Some((_, evicted)) = self.cache.put(node.pos, node.clone()) {
            self.write_node_raw(&evicted)?;
        }
        Ok(())
    }

    fn read_value<V: Record>(&mut self, pos: i32) -> Result<V> {
        let mut raw = vec![0u8; V::SIZE];
        self.value_file.read_at(pos, &mut raw)?;
        Ok(V::decode(&mut raw.as_slice()))
    }

    fn write_value<V: Record>(&mut self, pos: i32, value: &V) -> Result<()> {
        let mut raw = vec![0u8; V::SIZE];
        value.encode(&mut raw.as_mut_slice());
        self.value_file.write_at(pos, &raw)
    }

    fn flush(&mut self) -> Result<()> {
        for (_, node) in self.cache.drain() {
            self.write_node_raw(&node)?;
        }
        self.write_header()?;
        self.tree_file.sync()?;
        self.node_file.sync()?;
        self.value_file.sync()
    }

    /// Descends to the leaf entry holding `key`.
    fn find(&mut self, key: &K) -> Result<Option<(Node<K>, usize)>> {
        let mut u = self.read_node(self.root_pos)?;
        loop {
            let idx = u.lower_bound(key);
            if idx >= u.len() || (u.leaf && u.entries[idx].0 != *key) {
                return Ok(None);
            }
            if u.leaf {
                return Ok(Some((u, idx)));
            }
            u = self.read_node(u.entries[idx].1)?;
        }
    }

    /// Descends to the first leaf entry with key `>= key`.
    fn lower_bound(&mut self, key: &K) -> Result<Option<(Node<K>, usize)>> {
        let mut u = self.read_node(self.root_pos)?;
        loop {
            let idx = u.lower_bound(key);
            if u.leaf {
                if idx == u.len() {
                    // Key beyond every stored key; only reachable when
                    // the root is the sole leaf.
                    return Ok(None);
                }
                return Ok(Some((u, idx)));
            }
            if idx == u.len() {
                return Ok(None);
            }
            u = self.read_node(u.entries[idx].1)?;
        }
    }

    /// Descends to the first leaf entry with key `> key`.
    fn upper_bound(&mut self, key: &K) -> Result<Option<(Node<K>, usize)>> {
        let mut u = self.read_node(self.root_pos)?;
        loop {
            let idx = u.upper_bound(key);
            if u.leaf {
                if idx == u.len() {
                    return Ok(None);
                }
                return Ok(Some((u, idx)));
            }
            if idx == u.len() {
                return Ok(None);
            }
            u = self.read_node(u.entries[idx].1)?;
        }
    }

    /// Recursive insertion. `parent` carries the caller's node together
    /// with `u`'s index among its children; `None` at the root.
    ///
    /// Descent edge rule: when the new key exceeds every key of `u`, the
    /// parent separator for `u` is raised to the new key before
    /// descending into the last child.
    fn bp_insert(
        &mut self,
        key: &K,
        val: i32,
        u: &mut Node<K>,
        mut parent: Option<(&mut Node<K>, usize)>,
    ) -> Result<()> {
        let idx = u.lower_bound(key);
        if idx < u.len() && u.entries[idx].0 == *key {
            return Err(InterlockError::AlreadyExists);
        }
        if idx == u.len() {
            if let Some((p, pidx)) = parent.as_mut() {
                p.entries[*pidx].0 = *key;
            }
        }
        if u.leaf {
            u.entries.insert(idx, (*key, val));
        } else {
            let idx = if idx == u.len() { idx - 1 } else { idx };
            let mut child = self.read_node(u.entries[idx].1)?;
            self.bp_insert(key, val, &mut child, Some((&mut *u, idx)))?;
        }
        if u.len() > Node::<K>::MAX_ENTRIES {
            self.split(u, parent)
        } else {
            self.write_node(u)
        }
    }

    /// Splits an oversized node, moving its upper half into a fresh right
    /// sibling spliced into the sibling chain. A splitting root gets a
    /// new root of size 2 above it.
    fn split(&mut self, u: &mut Node<K>, parent: Option<(&mut Node<K>, usize)>) -> Result<()> {
        let v_pos = self.new_node()?;
        let mut v = Node::new(v_pos, u.leaf);
        let keep = u.len() - u.len() / 2;
        v.entries = u.entries.split_off(keep);
        v.next = u.next;
        v.prev = u.pos;
        u.next = v.pos;
        if u.pos == self.end_pos {
            self.end_pos = v.pos;
        }
        self.write_node(u)?;
        self.write_node(&v)?;
        match parent {
            None => {
                let root_pos = self.new_node()?;
                let mut root = Node::new(root_pos, false);
                root.entries.push((u.max_key(), u.pos));
                root.entries.push((v.max_key(), v.pos));
                self.write_node(&root)?;
                self.root_pos = root_pos;
            }
            Some((p, idx_u)) => {
                if v.next != NO_NODE {
                    let mut nxt = self.read_node(v.next)?;
                    nxt.prev = v.pos;
                    self.write_node(&nxt)?;
                }
                p.entries[idx_u].0 = u.max_key();
                p.entries.insert(idx_u + 1, (v.max_key(), v.pos));
            }
        }
        Ok(())
    }

    /// Recursive erase. Returns the freed value-file offset. Each frame
    /// refreshes the parent separator for its node and rebalances when
    /// the node underflows, preferring the left sibling.
    fn bp_erase(
        &mut self,
        key: &K,
        u: &mut Node<K>,
        mut parent: Option<(&mut Node<K>, usize)>,
    ) -> Result<i32> {
        let idx = u.lower_bound(key);
        if idx == u.len() || (u.leaf && u.entries[idx].0 != *key) {
            return Err(InterlockError::NotFound);
        }
        let freed;
        if u.leaf {
            freed = u.entries[idx].1;
            u.entries.remove(idx);
        } else {
            let mut child = self.read_node(u.entries[idx].1)?;
            freed = self.bp_erase(key, &mut child, Some((&mut *u, idx)))?;
        }
        if let Some((p, pidx)) = parent.as_mut() {
            if !u.is_empty() {
                p.entries[*pidx].0 = u.max_key();
            }
        }
        match parent {
            Some((p, pidx)) if u.len() < Node::<K>::MIN_ENTRIES => {
                if pidx > 0 {
                    let mut left = self.read_node(u.prev)?;
                    self.rebalance(&mut left, u, p, pidx - 1)?;
                } else {
                    let mut right = self.read_node(u.next)?;
                    self.rebalance(u, &mut right, p, pidx)?;
                }
            }
            Some(_) => self.write_node(u)?,
            None => {
                // The root writes itself unless a merge just collapsed
                // it into its only child.
                if u.pos == self.root_pos {
                    self.write_node(u)?;
                }
            }
        }
        Ok(freed)
    }

    /// Restores the size invariant for adjacent siblings `u` (left) and
    /// `v` (right), children `idx_u` and `idx_u + 1` of `p`. Merges when
    /// both sit at the minimum, otherwise lends one entry from the
    /// larger side.
    fn rebalance(
        &mut self,
        u: &mut Node<K>,
        v: &mut Node<K>,
        p: &mut Node<K>,
        idx_u: usize,
    ) -> Result<()> {
        let min = Node::<K>::MIN_ENTRIES;
        if u.len() <= min && v.len() <= min {
            if v.pos == self.end_pos {
                self.end_pos = u.pos;
            }
            u.entries.append(&mut v.entries);
            u.next = v.next;
            if u.next != NO_NODE {
                let mut nxt = self.read_node(u.next)?;
                nxt.prev = u.pos;
                self.write_node(&nxt)?;
            }
            self.write_node(u)?;
            self.delete_node(v.pos);
            if p.pos == self.root_pos && p.len() == 2 {
                // The root is down to one child; promote it.
                self.delete_node(p.pos);
                self.root_pos = u.pos;
            } else {
                p.entries[idx_u].0 = u.max_key();
                p.entries.remove(idx_u + 1);
            }
        } else {
            if u.len() > min {
                if let Some(entry) = u.entries.pop() {
                    v.entries.insert(0, entry);
                }
            } else {
                let entry = v.entries.remove(0);
                u.entries.push(entry);
            }
            p.entries[idx_u].0 = u.max_key();
            self.write_node(u)?;
            self.write_node(v)?;
        }
        Ok(())
    }
}

impl<K: Key> TreeInner<K> {
    /// Recursive invariant check for one subtree.
    fn check_node(&mut self, u: &Node<K>, is_root: bool) -> Result<()> {
        if !is_root && (u.len() < Node::<K>::MIN_ENTRIES || u.len() > Node::<K>::MAX_ENTRIES) {
            return Err(InterlockError::Corrupted(format!(
                "node {} has {} entries, bounds [{}, {}]",
                u.pos,
                u.len(),
                Node::<K>::MIN_ENTRIES,
                Node::<K>::MAX_ENTRIES
            )));
        }
        for window in u.entries.windows(2) {
            if window[0].0 >= window[1].0 {
                return Err(InterlockError::Corrupted(format!(
                    "node {} entries out of order",
                    u.pos
                )));
            }
        }
        if u.leaf {
            return Ok(());
        }
        for &(sep, child_pos) in &u.entries {
            let child = self.read_node(child_pos)?;
            if child.is_empty() || child.max_key() != sep {
                return Err(InterlockError::Corrupted(format!(
                    "separator for child {} of node {} is not its max key",
                    child_pos, u.pos
                )));
            }
            self.check_node(&child, false)?;
        }
        Ok(())
    }
}

/// Forward iterator over the leaf chain.
pub struct TreeIter<'a, K: Key, V: Record> {
    tree: &'a BPlusTree<K, V>,
    node: Option<Node<K>>,
    idx: usize,
    pending_err: Option<InterlockError>,
}

impl<'a, K: Key, V: Record> TreeIter<'a, K, V> {
    fn start(tree: &'a BPlusTree<K, V>, node: Node<K>, idx: usize) -> Self {
        Self {
            tree,
            node: (idx < node.len()).then_some(node),
            idx,
            pending_err: None,
        }
    }

    fn end(tree: &'a BPlusTree<K, V>) -> Self {
        Self {
            tree,
            node: None,
            idx: 0,
            pending_err: None,
        }
    }
}

impl<'a, K: Key, V: Record> Iterator for TreeIter<'a, K, V> {
    type Item = Result<Entry<K>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_err.take() {
            return Some(Err(err));
        }
        let node = self.node.take()?;
        let (key, off) = node.entries[self.idx];
        self.idx += 1;
        if self.idx < node.len() {
            self.node = Some(node);
        } else if node.next != NO_NODE {
            match self.tree.read_node_at(node.next) {
                Ok(next) => {
                    self.node = Some(next);
                    self.idx = 0;
                }
                Err(err) => self.pending_err = Some(err),
            }
        }
        Some(Ok(Entry {
            key,
            handle: Handle(off),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_tree(dir: &tempfile::TempDir, name: &str) -> BPlusTree<u64, i64> {
        BPlusTree::open(&StorageConfig::at(dir.path()), name).unwrap()
    }

    #[test]
    fn test_empty_tree_queries() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir, "empty");
        assert!(tree.is_empty().unwrap());
        assert!(tree.find(&1).unwrap().is_none());
        assert!(tree.get(&1).is_err());
        assert_eq!(tree.iter().unwrap().count(), 0);
        assert!(tree.lower_bound(&0).unwrap().next().is_none());
        assert!(tree.upper_bound(&0).unwrap().next().is_none());
        assert!(tree.last().unwrap().is_none());
    }

    #[test]
    fn test_insert_get_set() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir, "basic");

        let handle = tree.insert(42, &4200).unwrap();
        assert_eq!(tree.get(&42).unwrap(), 4200);
        assert_eq!(tree.get_by_handle(handle).unwrap(), 4200);

        tree.set(&42, &-1).unwrap();
        assert_eq!(tree.get(&42).unwrap(), -1);

        tree.set_by_handle(handle, &7).unwrap();
        assert_eq!(tree.get(&42).unwrap(), 7);
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir, "dup");
        tree.insert(1, &10).unwrap();
        assert!(matches!(
            tree.insert(1, &20),
            Err(InterlockError::AlreadyExists)
        ));
        assert_eq!(tree.get(&1).unwrap(), 10);
    }

    #[test]
    fn test_erase_missing_fails() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir, "missing");
        tree.insert(1, &10).unwrap();
        assert!(matches!(tree.erase(&2), Err(InterlockError::NotFound)));
        assert!(matches!(tree.set(&2, &0), Err(InterlockError::NotFound)));
        assert!(matches!(tree.get(&2), Err(InterlockError::NotFound)));
    }

    #[test]
    fn test_get_or_default() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir, "default");
        assert_eq!(tree.get_or_default(&9).unwrap(), 0);
        tree.insert(9, &90).unwrap();
        assert_eq!(tree.get_or_default(&9).unwrap(), 90);
    }

    #[test]
    fn test_scan_range_inclusive() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir, "scan");
        for k in [5u64, 10, 15, 20, 25] {
            tree.insert(k, &(k as i64)).unwrap();
        }
        let keys: Vec<u64> = tree
            .scan_range(&10, &20)
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec![10, 15, 20]);
        assert!(tree.scan_range(&26, &100).unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir, "clear");
        for k in 0..100u64 {
            tree.insert(k, &0).unwrap();
        }
        tree.clear().unwrap();
        assert!(tree.is_empty().unwrap());
        assert_eq!(tree.iter().unwrap().count(), 0);
        tree.insert(1, &1).unwrap();
        assert_eq!(tree.get(&1).unwrap(), 1);
    }

    #[test]
    fn test_handle_reuse_after_erase() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir, "reuse");
        let h1 = tree.insert(1, &100).unwrap();
        tree.erase(&1).unwrap();
        // The freed slot is the next one handed out.
        let h2 = tree.insert(2, &200).unwrap();
        assert_eq!(h1, h2);
    }
}
