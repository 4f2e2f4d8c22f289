use rust_decimal::Decimal;
use thiserror::Error;

use crate::state::critbit::{NodeHandle, NodeKind};

#[allow(missing_docs)]
pub type BookResult<T = ()> = Result<T, BookError>;

/// Fatal errors. Any of these aborts the decode or conversion that raised it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BookError {
    #[error("Buffer too short: {needed} bytes needed, {remaining} remaining")]
    BufferTooShort { needed: usize, remaining: usize },
    #[error("Wrong account head padding: found {found:?}")]
    WrongAccountHeadPadding { found: Vec<u8> },
    #[error("Wrong account tail padding: found {found:?}")]
    WrongAccountTailPadding { found: Vec<u8> },
    #[error("Node region of {len} bytes is not a whole number of {slot_size} byte slots")]
    MisalignedNodeArray { len: usize, slot_size: usize },
    #[error("Bump index {bump_index} exceeds the slab capacity of {capacity} slots")]
    BumpIndexOutOfRange { bump_index: u32, capacity: usize },
    #[error("Slot {slot} carries unknown node tag {tag}")]
    UnknownDiscriminant { slot: NodeHandle, tag: u32 },
    #[error("Account flags {flags:#x} describe neither a bids nor an asks account")]
    NotAnOrderBook { flags: u64 },
    #[error("Invalid lot sizes: base {base_lot_size}, quote {quote_lot_size}")]
    InvalidLotSize {
        base_lot_size: u64,
        quote_lot_size: u64,
    },
    #[error("Lot scaling overflowed")]
    ScaleOverflow,
    #[error("{amount} is negative and has no lot equivalent")]
    NegativeAmount { amount: Decimal },
    #[error("Total quantity at price {price} exceeds u64")]
    QuantityOverflow { price: u64 },
    #[error("Slab of {capacity} slots has no room left")]
    SlabFull { capacity: usize },
}

/// Advisory findings about a decoded slab.
///
/// These never abort a decode: the leaves that are reachable stay usable and
/// the anomalies travel alongside them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Anomaly {
    #[error("Free list malformed after {walked} of {expected} entries: {fault}")]
    MalformedFreeList {
        walked: u32,
        expected: u32,
        fault: FreeListFault,
    },
    #[error("Root {root} lies outside the node array")]
    RootOutOfBounds { root: NodeHandle },
    #[error("Inner node {parent} points at slot {child} outside the node array")]
    ChildOutOfBounds { parent: NodeHandle, child: NodeHandle },
    #[error("Tree walk reached {kind} slot {slot}")]
    UnexpectedNode { slot: NodeHandle, kind: NodeKind },
    #[error("Slot {slot} is reachable more than once")]
    RevisitedSlot { slot: NodeHandle },
    #[error("Header reports {reported} leaves, {reachable} reachable")]
    LeafCountMismatch { reported: u32, reachable: u32 },
    #[error("Slot {slot} holds a live node but is not reachable from the root")]
    OrphanedNode { slot: NodeHandle },
    #[error("Slot {child} does not share the key prefix of inner node {parent} on its side")]
    KeyOutOfOrder { parent: NodeHandle, child: NodeHandle },
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FreeListFault {
    #[error("list ends at slot {slot}")]
    EndedEarly { slot: NodeHandle },
    #[error("slot {slot} still links onwards")]
    Unterminated { slot: NodeHandle },
    #[error("slot {slot} is out of bounds")]
    OutOfBounds { slot: NodeHandle },
    #[error("slot {slot} holds a {kind} node")]
    NotFree { slot: NodeHandle, kind: NodeKind },
    #[error("slot {slot} is linked twice")]
    Cycle { slot: NodeHandle },
}
