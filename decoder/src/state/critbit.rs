#![allow(missing_docs)]
use std::fmt;

use bytemuck::{Pod, Zeroable};
use num_enum::TryFromPrimitive;
use solana_program::pubkey::Pubkey;

use crate::cursor::Cursor;
use crate::error::{Anomaly, BookError, BookResult, FreeListFault};
use crate::state::{wrap_account_padding, AccountFlags, Side};
// A Slab contains a slab header and a bump-allocated array of node slots. The
// slots in use form a critbit tree whose leaves are the resting orders of one
// side of the book; reclaimed slots are chained in a free list.

pub type NodeHandle = u32;

/// Size in bytes of one node slot
pub const SLOT_SIZE: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum NodeTag {
    Uninitialized = 0,
    Inner = 1,
    Leaf = 2,
    Free = 3,
    LastFree = 4,
}

/// The variant of a decoded slot, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Uninitialized,
    Inner,
    Leaf,
    Free,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Uninitialized => "uninitialized",
            NodeKind::Inner => "inner",
            NodeKind::Leaf => "leaf",
            NodeKind::Free => "free",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SlabHeader {
    pub bump_index: u32,
    _padding0: u32,
    pub free_list_len: u32,
    _padding1: u32,
    pub free_list_head: u32,
    pub root_node: u32,
    pub leaf_count: u32,
    _padding2: u32,
}

impl SlabHeader {
    pub const LEN: usize = std::mem::size_of::<Self>();

    pub fn new(
        bump_index: u32,
        free_list_len: u32,
        free_list_head: u32,
        root_node: u32,
        leaf_count: u32,
    ) -> Self {
        Self {
            bump_index,
            free_list_len,
            free_list_head,
            root_node,
            leaf_count,
            ..Self::zeroed()
        }
    }
}

const _: () = assert!(SlabHeader::LEN == 32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerNode {
    /// Number of leading key bits shared by every leaf below this node
    pub prefix_len: u32,
    pub key: u128,
    pub children: [NodeHandle; 2],
}

impl InnerNode {
    /// Picks the child a search for `search_key` continues into, along with the critical bit.
    pub fn walk_down(&self, search_key: u128) -> (NodeHandle, bool) {
        let crit_bit_mask = (1u128 << 127).checked_shr(self.prefix_len).unwrap_or(0);
        let crit_bit = (search_key & crit_bit_mask) != 0;
        (self.children[crit_bit as usize], crit_bit)
    }

    /// Whether a node keyed `key` belongs below this one as child `crit_bit`.
    pub fn holds(&self, key: u128, crit_bit: bool) -> bool {
        if self.prefix_len >= 128 {
            return false;
        }
        let prefix_mask = u128::MAX.checked_shl(128 - self.prefix_len).unwrap_or(0);
        let crit_bit_mask = (1u128 << 127) >> self.prefix_len;
        (self.key ^ key) & prefix_mask == 0 && ((key & crit_bit_mask) != 0) == crit_bit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafNode {
    /// Slot of the order in its owner's open orders account
    pub owner_slot: u8,
    pub fee_tier: u8,
    /// The key is the associated order id
    pub key: u128,
    /// Open orders account the order belongs to
    pub owner: Pubkey,
    /// Remaining quantity, in base lots
    pub quantity: u64,
    /// Kept bit for bit. See [`LeafNode::client_order_id_signed`].
    pub client_order_id: u64,
}

impl LeafNode {
    /// Parse a leaf node's price, in quote lots per base lot
    pub fn price(&self) -> u64 {
        price_from_key(self.key)
    }

    /// Get the associated order id
    pub fn order_id(&self) -> u128 {
        self.key
    }

    /// Arrival order of the order among the ones resting at the same price.
    ///
    /// Bids store their sequence number inverted, so that a larger key always
    /// means a better bid.
    pub fn seq_num(&self, side: Side) -> u64 {
        let low = self.key as u64;
        match side {
            Side::Bid => !low,
            Side::Ask => low,
        }
    }

    pub fn client_order_id_signed(&self) -> i64 {
        self.client_order_id as i64
    }
}

#[inline(always)]
pub fn price_from_key(key: u128) -> u64 {
    (key >> 64) as u64
}

/// Builds the key the exchange assigns to an order.
pub fn order_key(side: Side, price: u64, seq_num: u64) -> u128 {
    let low = match side {
        Side::Bid => !seq_num,
        Side::Ask => seq_num,
    };
    ((price as u128) << 64) | low as u128
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeNode {
    /// `None` marks the last entry of the free list
    pub next: Option<NodeHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabNode {
    Uninitialized,
    Inner(InnerNode),
    Leaf(LeafNode),
    Free(FreeNode),
}

impl SlabNode {
    /// Decodes the slot at index `slot` from its bytes.
    pub fn decode(slot: NodeHandle, data: &[u8]) -> BookResult<Self> {
        let mut cursor = Cursor::new(data);
        let tag = cursor.read_u32()?;
        let node = match NodeTag::try_from(tag)
            .map_err(|_| BookError::UnknownDiscriminant { slot, tag })?
        {
            NodeTag::Uninitialized => SlabNode::Uninitialized,
            NodeTag::Inner => {
                let prefix_len = cursor.read_u32()?;
                let key = cursor.read_u128()?;
                let children = [cursor.read_u32()?, cursor.read_u32()?];
                SlabNode::Inner(InnerNode {
                    prefix_len,
                    key,
                    children,
                })
            }
            NodeTag::Leaf => {
                let owner_slot = cursor.read_u8()?;
                let fee_tier = cursor.read_u8()?;
                cursor.skip(2)?;
                SlabNode::Leaf(LeafNode {
                    owner_slot,
                    fee_tier,
                    key: cursor.read_u128()?,
                    owner: Pubkey::new_from_array(cursor.read_array()?),
                    quantity: cursor.read_u64()?,
                    client_order_id: cursor.read_u64()?,
                })
            }
            NodeTag::Free => SlabNode::Free(FreeNode {
                next: Some(cursor.read_u32()?),
            }),
            NodeTag::LastFree => SlabNode::Free(FreeNode { next: None }),
        };
        Ok(node)
    }

    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut slot = [0u8; SLOT_SIZE];
        let tag = match self {
            SlabNode::Uninitialized => NodeTag::Uninitialized,
            SlabNode::Inner(inner) => {
                slot[4..8].copy_from_slice(&inner.prefix_len.to_le_bytes());
                slot[8..24].copy_from_slice(&inner.key.to_le_bytes());
                slot[24..28].copy_from_slice(&inner.children[0].to_le_bytes());
                slot[28..32].copy_from_slice(&inner.children[1].to_le_bytes());
                NodeTag::Inner
            }
            SlabNode::Leaf(leaf) => {
                slot[4] = leaf.owner_slot;
                slot[5] = leaf.fee_tier;
                slot[8..24].copy_from_slice(&leaf.key.to_le_bytes());
                slot[24..56].copy_from_slice(leaf.owner.as_ref());
                slot[56..64].copy_from_slice(&leaf.quantity.to_le_bytes());
                slot[64..72].copy_from_slice(&leaf.client_order_id.to_le_bytes());
                NodeTag::Leaf
            }
            SlabNode::Free(FreeNode { next: Some(next) }) => {
                slot[4..8].copy_from_slice(&next.to_le_bytes());
                NodeTag::Free
            }
            SlabNode::Free(FreeNode { next: None }) => NodeTag::LastFree,
        };
        slot[..4].copy_from_slice(&(tag as u32).to_le_bytes());
        slot
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            SlabNode::Uninitialized => NodeKind::Uninitialized,
            SlabNode::Inner(_) => NodeKind::Inner,
            SlabNode::Leaf(_) => NodeKind::Leaf,
            SlabNode::Free(_) => NodeKind::Free,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            SlabNode::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }
}

/// What to do with bytes after the last whole node slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingBytes {
    /// Fail with [`BookError::MisalignedNodeArray`]
    #[default]
    Reject,
    /// Drop them. Book accounts allocated by the exchange carry a partial slot at the end.
    Ignore,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub trailing_bytes: TrailingBytes,
}

impl DecodeOptions {
    pub fn ignore_trailing_bytes() -> Self {
        Self {
            trailing_bytes: TrailingBytes::Ignore,
        }
    }
}

/// A decoded slab: its header and every node slot of the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slab {
    header: SlabHeader,
    nodes: Vec<SlabNode>,
}

impl Slab {
    pub fn from_parts(header: SlabHeader, nodes: Vec<SlabNode>) -> Self {
        Self { header, nodes }
    }

    /// Decodes a slab header followed by its node slots.
    pub fn decode(data: &[u8], options: &DecodeOptions) -> BookResult<Self> {
        let mut cursor = Cursor::new(data);
        let header = cursor.read_pod::<SlabHeader>()?;
        let region = cursor.rest();
        let trailing = region.len() % SLOT_SIZE;
        if trailing != 0 {
            match options.trailing_bytes {
                TrailingBytes::Reject => {
                    return Err(BookError::MisalignedNodeArray {
                        len: region.len(),
                        slot_size: SLOT_SIZE,
                    })
                }
                TrailingBytes::Ignore => {
                    tracing::debug!(trailing, "ignoring bytes after the last whole slot")
                }
            }
        }
        let capacity = region.len() / SLOT_SIZE;
        if header.bump_index as usize > capacity {
            return Err(BookError::BumpIndexOutOfRange {
                bump_index: header.bump_index,
                capacity,
            });
        }
        let nodes = region
            .chunks_exact(SLOT_SIZE)
            .enumerate()
            .map(|(slot, bytes)| SlabNode::decode(slot as NodeHandle, bytes))
            .collect::<BookResult<Vec<_>>>()?;
        Ok(Self { header, nodes })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(SlabHeader::LEN + self.nodes.len() * SLOT_SIZE);
        data.extend_from_slice(bytemuck::bytes_of(&self.header));
        for node in &self.nodes {
            data.extend_from_slice(&node.encode());
        }
        data
    }

    pub fn header(&self) -> &SlabHeader {
        &self.header
    }

    pub fn bump_index(&self) -> u32 {
        self.header.bump_index
    }

    pub fn free_list_len(&self) -> u32 {
        self.header.free_list_len
    }

    pub fn free_list_head(&self) -> u32 {
        self.header.free_list_head
    }

    pub fn root_node(&self) -> u32 {
        self.header.root_node
    }

    pub fn leaf_count(&self) -> u32 {
        self.header.leaf_count
    }

    /// Number of slots in the node array
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[SlabNode] {
        &self.nodes
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&SlabNode> {
        self.nodes.get(handle as usize)
    }

    pub fn leaf(&self, handle: NodeHandle) -> Option<&LeafNode> {
        self.node(handle).and_then(SlabNode::as_leaf)
    }

    pub fn root(&self) -> Option<NodeHandle> {
        if self.header.leaf_count == 0 {
            None
        } else {
            Some(self.header.root_node)
        }
    }

    /// Every live order reachable from the root.
    ///
    /// The walk never fails. Branches that lead somewhere a live order cannot
    /// be are skipped and recorded, see [`Leaves::anomalies`].
    pub fn leaves(&self) -> Leaves<'_> {
        self.iter(true)
    }

    /// Get a key ascending or key descending iterator over all the Slab's orders
    pub fn iter(&self, key_ascending: bool) -> Leaves<'_> {
        Leaves {
            slab: self,
            search_stack: self.root().map(|root| vec![(None, root)]).unwrap_or_default(),
            visited: vec![false; self.nodes.len()],
            ascending: key_ascending,
            anomalies: Vec::new(),
        }
    }

    /// Cross-checks the header against the node array.
    ///
    /// Nothing found here is fatal; the chain's counters stay authoritative.
    pub fn diagnose(&self) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        if let Some(anomaly) = self.check_free_list() {
            anomalies.push(anomaly);
        }

        let mut leaves = self.leaves();
        let reachable = leaves.by_ref().count() as u32;
        let Leaves {
            visited,
            anomalies: walk_anomalies,
            ..
        } = leaves;
        if reachable != self.header.leaf_count {
            anomalies.push(Anomaly::LeafCountMismatch {
                reported: self.header.leaf_count,
                reachable,
            });
        }
        for (slot, node) in self
            .nodes
            .iter()
            .enumerate()
            .take(self.header.bump_index as usize)
        {
            if matches!(node, SlabNode::Inner(_) | SlabNode::Leaf(_)) && !visited[slot] {
                anomalies.push(Anomaly::OrphanedNode {
                    slot: slot as NodeHandle,
                });
            }
        }
        anomalies.extend(self.check_key_order(&visited));
        for anomaly in &anomalies {
            tracing::warn!(%anomaly, "slab is inconsistent");
        }
        let mut all = walk_anomalies;
        all.extend(anomalies);
        all
    }

    fn check_free_list(&self) -> Option<Anomaly> {
        let expected = self.header.free_list_len;
        let mut seen = vec![false; self.nodes.len()];
        let mut current = self.header.free_list_head;
        for walked in 0..expected {
            let last = walked + 1 == expected;
            let fault = match self.nodes.get(current as usize) {
                None => Some(FreeListFault::OutOfBounds { slot: current }),
                Some(_) if seen[current as usize] => Some(FreeListFault::Cycle { slot: current }),
                Some(SlabNode::Free(free)) => {
                    seen[current as usize] = true;
                    match free.next {
                        Some(next) if !last => {
                            current = next;
                            None
                        }
                        Some(_) => Some(FreeListFault::Unterminated { slot: current }),
                        None if !last => Some(FreeListFault::EndedEarly { slot: current }),
                        None => None,
                    }
                }
                Some(node) => Some(FreeListFault::NotFree {
                    slot: current,
                    kind: node.kind(),
                }),
            };
            if let Some(fault) = fault {
                return Some(Anomaly::MalformedFreeList {
                    walked,
                    expected,
                    fault,
                });
            }
        }
        None
    }

    // Every reachable child must carry its parent's prefix and critical bit,
    // which is what makes the walk come out in key order.
    fn check_key_order(&self, visited: &[bool]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        for (parent, node) in self.nodes.iter().enumerate() {
            let inner = match node {
                SlabNode::Inner(inner) if visited[parent] => inner,
                _ => continue,
            };
            for (crit_bit, &child) in inner.children.iter().enumerate() {
                let in_order = match self.node(child) {
                    Some(SlabNode::Inner(child_inner)) => {
                        child_inner.prefix_len > inner.prefix_len
                            && inner.holds(child_inner.key, crit_bit == 1)
                    }
                    Some(SlabNode::Leaf(leaf)) => inner.holds(leaf.key, crit_bit == 1),
                    _ => continue,
                };
                if !in_order {
                    anomalies.push(Anomaly::KeyOutOfOrder {
                        parent: parent as NodeHandle,
                        child,
                    });
                }
            }
        }
        anomalies
    }

    fn find_min_max(&self, find_max: bool) -> Option<NodeHandle> {
        let mut handle = self.root()?;
        for _ in 0..self.nodes.len() {
            match self.node(handle)? {
                SlabNode::Leaf(_) => return Some(handle),
                SlabNode::Inner(inner) => handle = inner.children[find_max as usize],
                _ => return None,
            }
        }
        None
    }

    /// Leaf with the smallest key: the best ask, or the worst bid.
    pub fn find_min(&self) -> Option<NodeHandle> {
        self.find_min_max(false)
    }

    /// Leaf with the largest key: the best bid, or the worst ask.
    pub fn find_max(&self) -> Option<NodeHandle> {
        self.find_min_max(true)
    }

    pub fn find_by_key(&self, search_key: u128) -> Option<NodeHandle> {
        let mut handle = self.root()?;
        for _ in 0..self.nodes.len() {
            match self.node(handle)? {
                SlabNode::Leaf(leaf) => {
                    return (leaf.key == search_key).then_some(handle);
                }
                SlabNode::Inner(inner) => {
                    let common_prefix_len = (search_key ^ inner.key).leading_zeros();
                    if common_prefix_len < inner.prefix_len {
                        return None;
                    }
                    handle = inner.walk_down(search_key).0;
                }
                _ => return None,
            }
        }
        None
    }

    pub fn find_by_client_order_id(&self, client_order_id: u64) -> Option<&LeafNode> {
        self.leaves()
            .find(|leaf| leaf.client_order_id == client_order_id)
    }

    /// Aggregated quantity of the first `depth` price levels, best price first.
    ///
    /// Follows the tree, so the levels are only in price order for a slab
    /// whose [`Slab::diagnose`] comes back empty.
    pub fn l2_depth(&self, depth: usize, side: Side) -> BookResult<Vec<L2Level>> {
        aggregate_levels(self.iter(side == Side::Ask), depth)
    }

    #[cfg(feature = "utils")]
    pub fn depth(&self) -> usize {
        let root = match self.root() {
            Some(root) => root,
            None => return 0,
        };
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![(root, 1)];
        let mut max_depth = 0;
        while let Some((current_node, current_depth)) = stack.pop() {
            match self.node(current_node) {
                Some(SlabNode::Inner(inner))
                    if !std::mem::replace(&mut visited[current_node as usize], true) =>
                {
                    stack.push((inner.children[0], current_depth + 1));
                    stack.push((inner.children[1], current_depth + 1));
                }
                Some(SlabNode::Leaf(_)) => max_depth = std::cmp::max(current_depth, max_depth),
                _ => {}
            }
        }
        max_depth
    }
}

/// One price level of an L2 view, in raw lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2Level {
    pub price: u64,
    pub quantity: u64,
}

/// Merges orders already in price priority into at most `depth` levels.
pub(crate) fn aggregate_levels<'a>(
    orders: impl IntoIterator<Item = &'a LeafNode>,
    depth: usize,
) -> BookResult<Vec<L2Level>> {
    let mut levels: Vec<L2Level> = Vec::with_capacity(depth);
    for leaf in orders {
        match levels.last_mut() {
            Some(level) if level.price == leaf.price() => {
                level.quantity = level
                    .quantity
                    .checked_add(leaf.quantity)
                    .ok_or(BookError::QuantityOverflow { price: level.price })?;
            }
            _ => {
                if levels.len() == depth {
                    break;
                }
                levels.push(L2Level {
                    price: leaf.price(),
                    quantity: leaf.quantity,
                });
            }
        }
    }
    Ok(levels)
}

/// Depth-first walk over the live leaves of a [`Slab`].
#[derive(Debug, Clone)]
pub struct Leaves<'a> {
    slab: &'a Slab,
    /// Pending slots, with the inner node that pointed at each
    search_stack: Vec<(Option<NodeHandle>, NodeHandle)>,
    visited: Vec<bool>,
    ascending: bool,
    anomalies: Vec<Anomaly>,
}

impl<'a> Leaves<'a> {
    /// Anomalies met so far.
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    fn report(&mut self, anomaly: Anomaly) {
        tracing::warn!(%anomaly, "abandoning slab branch");
        self.anomalies.push(anomaly);
    }
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a LeafNode;

    fn next(&mut self) -> Option<Self::Item> {
        let slab = self.slab;
        while let Some((parent, current)) = self.search_stack.pop() {
            let node = match slab.node(current) {
                Some(node) => node,
                None => {
                    self.report(match parent {
                        Some(parent) => Anomaly::ChildOutOfBounds {
                            parent,
                            child: current,
                        },
                        None => Anomaly::RootOutOfBounds { root: current },
                    });
                    continue;
                }
            };
            if std::mem::replace(&mut self.visited[current as usize], true) {
                self.report(Anomaly::RevisitedSlot { slot: current });
                continue;
            }
            match node {
                SlabNode::Inner(inner) => {
                    self.search_stack
                        .push((Some(current), inner.children[self.ascending as usize]));
                    self.search_stack
                        .push((Some(current), inner.children[!self.ascending as usize]));
                }
                SlabNode::Leaf(leaf) => return Some(leaf),
                other => self.report(Anomaly::UnexpectedNode {
                    slot: current,
                    kind: other.kind(),
                }),
            }
        }
        None
    }
}

/// Builds slabs the way the exchange does: bump allocation, a free list of
/// reclaimed slots, and critbit insertion and removal.
#[derive(Debug, Clone)]
pub struct SlabBuilder {
    slab: Slab,
}

impl SlabBuilder {
    pub fn new(capacity: usize) -> Self {
        Self {
            slab: Slab::from_parts(
                SlabHeader::zeroed(),
                vec![SlabNode::Uninitialized; capacity],
            ),
        }
    }

    pub fn slab(&self) -> &Slab {
        &self.slab
    }

    pub fn into_slab(self) -> Slab {
        self.slab
    }

    /// The full account bytes, padding and flags included.
    pub fn encode_account(&self, flags: AccountFlags) -> Vec<u8> {
        let mut body = flags.bits().to_le_bytes().to_vec();
        body.extend_from_slice(&self.slab.encode());
        wrap_account_padding(&body)
    }

    fn available(&self) -> usize {
        self.slab.header.free_list_len as usize + self.slab.nodes.len()
            - self.slab.header.bump_index as usize
    }

    fn allocate(&mut self, node: SlabNode) -> NodeHandle {
        let header = &mut self.slab.header;
        let handle = if header.free_list_len == 0 {
            header.bump_index += 1;
            header.bump_index - 1
        } else {
            let handle = header.free_list_head;
            if let Some(SlabNode::Free(FreeNode { next })) = self.slab.nodes.get(handle as usize) {
                header.free_list_head = next.unwrap_or(0);
            }
            header.free_list_len -= 1;
            handle
        };
        self.slab.nodes[handle as usize] = node;
        handle
    }

    fn free(&mut self, handle: NodeHandle) {
        let header = &mut self.slab.header;
        let next = (header.free_list_len != 0).then_some(header.free_list_head);
        self.slab.nodes[handle as usize] = SlabNode::Free(FreeNode { next });
        header.free_list_len += 1;
        header.free_list_head = handle;
    }

    fn inner_mut(&mut self, handle: NodeHandle) -> &mut InnerNode {
        match &mut self.slab.nodes[handle as usize] {
            SlabNode::Inner(inner) => inner,
            other => unreachable!("slot {} holds a {} node", handle, other.kind()),
        }
    }

    /// Inserts `new_leaf`, replacing and returning any leaf with the same key.
    pub fn insert_leaf(
        &mut self,
        new_leaf: LeafNode,
    ) -> BookResult<(NodeHandle, Option<LeafNode>)> {
        if self.slab.header.leaf_count == 0 {
            if self.available() == 0 {
                return Err(BookError::SlabFull {
                    capacity: self.slab.nodes.len(),
                });
            }
            let handle = self.allocate(SlabNode::Leaf(new_leaf));
            self.slab.header.root_node = handle;
            self.slab.header.leaf_count += 1;
            return Ok((handle, None));
        }
        let mut root = self.slab.header.root_node;
        let mut parent: Option<(NodeHandle, bool)> = None;
        let shared_prefix_len = loop {
            match &mut self.slab.nodes[root as usize] {
                SlabNode::Inner(inner) => {
                    let shared_prefix_len = (inner.key ^ new_leaf.key).leading_zeros();
                    if shared_prefix_len < inner.prefix_len {
                        break shared_prefix_len;
                    }
                    let (child, crit_bit) = inner.walk_down(new_leaf.key);
                    parent = Some((root, crit_bit));
                    root = child;
                }
                SlabNode::Leaf(leaf) => {
                    if leaf.key == new_leaf.key {
                        // clobber the existing leaf
                        let old_leaf = std::mem::replace(leaf, new_leaf);
                        return Ok((root, Some(old_leaf)));
                    }
                    break (leaf.key ^ new_leaf.key).leading_zeros();
                }
                other => unreachable!("slot {} holds a {} node", root, other.kind()),
            }
        };
        if self.available() < 2 {
            return Err(BookError::SlabFull {
                capacity: self.slab.nodes.len(),
            });
        }

        // a new inner node takes the place of `root`, holding it and the new leaf
        let crit_bit_mask = (1u128 << 127) >> shared_prefix_len;
        let new_leaf_crit_bit = (crit_bit_mask & new_leaf.key) != 0;
        let new_leaf_handle = self.allocate(SlabNode::Leaf(new_leaf));
        let mut children = [0; 2];
        children[new_leaf_crit_bit as usize] = new_leaf_handle;
        children[!new_leaf_crit_bit as usize] = root;
        let new_inner_handle = self.allocate(SlabNode::Inner(InnerNode {
            prefix_len: shared_prefix_len,
            key: new_leaf.key,
            children,
        }));
        match parent {
            Some((parent, crit_bit)) => {
                self.inner_mut(parent).children[crit_bit as usize] = new_inner_handle
            }
            None => self.slab.header.root_node = new_inner_handle,
        }
        self.slab.header.leaf_count += 1;
        Ok((new_leaf_handle, None))
    }

    pub fn remove_by_key(&mut self, search_key: u128) -> Option<LeafNode> {
        let mut child = self.slab.root()?;
        let mut grandparent: Option<(NodeHandle, bool)> = None;
        let mut parent: Option<(NodeHandle, bool)> = None;
        let removed_leaf = loop {
            match self.slab.node(child)? {
                SlabNode::Inner(inner) => {
                    let (next, crit_bit) = inner.walk_down(search_key);
                    grandparent = parent;
                    parent = Some((child, crit_bit));
                    child = next;
                }
                SlabNode::Leaf(leaf) if leaf.key == search_key => break *leaf,
                _ => return None,
            }
        };

        match parent {
            None => self.slab.header.root_node = 0,
            Some((parent, crit_bit)) => {
                // the sibling takes the parent's place
                let sibling = self.inner_mut(parent).children[!crit_bit as usize];
                match grandparent {
                    Some((grandparent, crit_bit)) => {
                        self.inner_mut(grandparent).children[crit_bit as usize] = sibling
                    }
                    None => self.slab.header.root_node = sibling,
                }
            }
        }
        self.free(child);
        if let Some((parent, _)) = parent {
            self.free(parent);
        }
        self.slab.header.leaf_count -= 1;
        Some(removed_leaf)
    }
}
