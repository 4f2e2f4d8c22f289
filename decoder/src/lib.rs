#![warn(missing_docs)]
/*!
Decoder for the market and order book accounts of a Serum style on-chain exchange.

## Overview

An exchange market is spread over several accounts. The market account holds a fixed
[`MarketState`][`state::market_state::MarketState`] record: mints, vaults, the addresses of the
queues and of the two book sides, and the lot sizes every raw price and quantity is expressed in.
Each book side lives in its own account as a slab: a header followed by an array of fixed size
node slots, bump allocated, with reclaimed slots chained in a free list. The slots in use form a
critbit tree keyed by order id, and its leaves are the resting orders.

This crate turns the raw bytes of those accounts into typed values. Fetching them, and decoding
the base64 or base58 text an RPC node wraps them in, is left to the caller.

## Decoding a market

[`decode_market`] checks the `serum` and `padding` markers around the record and returns a
[`Market`]. Its [`bids`][`Market::bids`] and [`asks`][`Market::asks`] getters name the accounts to
fetch next.

## Decoding a book side

[`decode_order_book`] reads the account flags to learn which side the account holds, decodes the
slab header and every node slot, then cross-checks the header against the node array. Structural
errors such as a bad marker or an unknown node tag abort the decode. Inconsistencies between the
header counters and the tree are reported as [`Anomaly`] values on
[`OrderBook::diagnostics`] instead: the chain's counters are authoritative and the orders that are
reachable stay usable.

Accounts allocated by the exchange end with a partial node slot. [`decode_order_book_with`] and
[`DecodeOptions::ignore_trailing_bytes`] accept those.

## Reading orders

[`Slab::leaves`][`state::critbit::Slab::leaves`] walks the tree and yields every live
[`LeafNode`][`state::critbit::LeafNode`]. [`OrderBook::sorted_orders`] and [`OrderBook::best`]
give the side in execution priority. A [`MarketBook`] pairs a market with its two sides and
converts lots into decimal prices and quantities through [`LotScale`][`utils::LotScale`].
*/

#[cfg(target_endian = "big")]
compile_error!("account records are read in place as little-endian");

/// Sequential little-endian reader
pub mod cursor;
#[doc(hidden)]
pub mod error;
/// Account layouts and the values decoded from them
pub mod state;
/// Lot size conversions
pub mod utils;

pub use error::{Anomaly, BookError, BookResult, FreeListFault};
pub use state::critbit::{DecodeOptions, TrailingBytes};
pub use state::market_state::Market;
pub use state::orderbook::{MarketBook, OrderBook};
pub use state::{AccountFlag, AccountFlags, Side};

/// Decodes a market account.
pub fn decode_market(data: &[u8]) -> BookResult<Market> {
    Market::decode(data)
}

/// Decodes a bids or asks account, rejecting any bytes after the last whole node slot.
pub fn decode_order_book(data: &[u8]) -> BookResult<OrderBook> {
    OrderBook::decode(data)
}

/// Decodes a bids or asks account, handling trailing bytes as `options` says.
pub fn decode_order_book_with(data: &[u8], options: &DecodeOptions) -> BookResult<OrderBook> {
    OrderBook::decode_with(data, options)
}
