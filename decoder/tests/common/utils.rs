use bytemuck::Zeroable;
use serum_slab_decoder::state::critbit::{order_key, LeafNode, SlabBuilder};
use serum_slab_decoder::state::market_state::MarketState;
use serum_slab_decoder::{AccountFlag, AccountFlags, Side};
use solana_program::pubkey::Pubkey;

/// Byte offsets of the slab header fields inside a book account
pub const FLAGS_OFFSET: usize = 5;
pub const BUMP_INDEX_OFFSET: usize = 13;
pub const FREE_LIST_LEN_OFFSET: usize = 21;
pub const FREE_LIST_HEAD_OFFSET: usize = 29;
pub const ROOT_NODE_OFFSET: usize = 33;
pub const LEAF_COUNT_OFFSET: usize = 37;
pub const NODES_OFFSET: usize = 45;

pub fn book_flags(side: Side) -> AccountFlags {
    let side_flag = match side {
        Side::Bid => AccountFlag::Bids,
        Side::Ask => AccountFlag::Asks,
    };
    AccountFlags::from(AccountFlag::Initialized | side_flag)
}

/// An order whose client order id is its sequence number.
pub fn order(side: Side, price: u64, seq_num: u64, quantity: u64) -> LeafNode {
    LeafNode {
        owner_slot: (seq_num % 128) as u8,
        fee_tier: 0,
        key: order_key(side, price, seq_num),
        owner: Pubkey::new_unique(),
        quantity,
        client_order_id: seq_num,
    }
}

/// A slab holding `orders`, given as (price, seq_num, quantity).
pub fn book_builder(side: Side, capacity: usize, orders: &[(u64, u64, u64)]) -> SlabBuilder {
    let mut builder = SlabBuilder::new(capacity);
    for &(price, seq_num, quantity) in orders {
        builder
            .insert_leaf(order(side, price, seq_num, quantity))
            .unwrap();
    }
    builder
}

pub fn book_account(side: Side, orders: &[(u64, u64, u64)]) -> Vec<u8> {
    book_builder(side, 2 * orders.len() + 8, orders).encode_account(book_flags(side))
}

pub fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

pub fn patch_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Inserts `len` zero bytes between the last node slot and the tail padding.
pub fn with_trailing_bytes(account: &[u8], len: usize) -> Vec<u8> {
    let (body, tail) = account.split_at(account.len() - 7);
    let mut data = body.to_vec();
    data.resize(body.len() + len, 0);
    data.extend_from_slice(tail);
    data
}

/// The BTC/USDC market: 6 decimal mints, base lots of 100 and quote lots of 10.
pub fn btc_usdc_market() -> MarketState {
    MarketState {
        account_flags: (AccountFlag::Initialized | AccountFlag::Market).bits(),
        own_address: Pubkey::new_unique(),
        vault_signer_nonce: 0,
        base_mint: Pubkey::new_unique(),
        quote_mint: Pubkey::new_unique(),
        base_vault: Pubkey::new_unique(),
        quote_vault: Pubkey::new_unique(),
        request_queue: Pubkey::new_unique(),
        event_queue: Pubkey::new_unique(),
        bids: Pubkey::new_unique(),
        asks: Pubkey::new_unique(),
        base_lot_size: 100,
        quote_lot_size: 10,
        fee_rate_bps: 22,
        ..MarketState::zeroed()
    }
}
