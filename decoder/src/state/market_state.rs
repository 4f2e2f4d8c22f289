//! The market state record describes one trading pair: its mints and vaults,
//! the queue and book accounts it owns, and the lot sizes every raw price and
//! quantity of the pair is expressed in.
#![allow(missing_docs)]
use bytemuck::{Pod, Zeroable};
use solana_program::pubkey::Pubkey;
use std::mem::size_of;

use crate::{
    cursor::Cursor,
    error::BookResult,
    state::{strip_account_padding, wrap_account_padding, AccountFlags},
    utils::LotScale,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
/// The fixed market record exactly as the chain lays it out
pub struct MarketState {
    /// Initialized, Market
    pub account_flags: u64,
    pub own_address: Pubkey,
    pub vault_signer_nonce: u64,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,

    pub base_vault: Pubkey,
    pub base_deposits_total: u64,
    pub base_fees_accrued: u64,

    pub quote_vault: Pubkey,
    pub quote_deposits_total: u64,
    pub quote_fees_accrued: u64,

    pub quote_dust_threshold: u64,

    pub request_queue: Pubkey,
    pub event_queue: Pubkey,

    pub bids: Pubkey,
    pub asks: Pubkey,

    pub base_lot_size: u64,
    pub quote_lot_size: u64,

    pub fee_rate_bps: u64,
    pub referrer_rebates_accrued: u64,
}

impl MarketState {
    /// Expected size in bytes of MarketState
    pub const LEN: usize = size_of::<Self>();
}

const _: () = assert!(MarketState::LEN == 376);

/// A decoded market account.
///
/// Later market versions append fields after the v1 record; those bytes are
/// kept verbatim in `extension` so that [`Market::encode`] reproduces the
/// account exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    state: MarketState,
    extension: Vec<u8>,
}

impl Market {
    /// Size of a v1 market account, padding included
    pub const ACCOUNT_LEN: usize = 5 + MarketState::LEN + 7;

    pub fn new(state: MarketState) -> Self {
        Self {
            state,
            extension: Vec::new(),
        }
    }

    pub fn decode(data: &[u8]) -> BookResult<Self> {
        let body = strip_account_padding(data, MarketState::LEN)?;
        let mut cursor = Cursor::new(body);
        let state = cursor.read_pod::<MarketState>()?;
        let market = Self {
            state,
            extension: cursor.rest().to_vec(),
        };
        tracing::debug!(
            own_address = %market.own_address(),
            flags = %market.flags(),
            base_lot_size = market.base_lot_size(),
            quote_lot_size = market.quote_lot_size(),
            extension_len = market.extension.len(),
            "decoded market"
        );
        Ok(market)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(MarketState::LEN + self.extension.len());
        body.extend_from_slice(bytemuck::bytes_of(&self.state));
        body.extend_from_slice(&self.extension);
        wrap_account_padding(&body)
    }

    pub fn state(&self) -> &MarketState {
        &self.state
    }

    pub fn extension(&self) -> &[u8] {
        &self.extension
    }

    pub fn flags(&self) -> AccountFlags {
        AccountFlags::from_bits(self.state.account_flags)
    }

    pub fn own_address(&self) -> Pubkey {
        self.state.own_address
    }

    pub fn vault_signer_nonce(&self) -> u64 {
        self.state.vault_signer_nonce
    }

    pub fn base_mint(&self) -> Pubkey {
        self.state.base_mint
    }

    pub fn quote_mint(&self) -> Pubkey {
        self.state.quote_mint
    }

    pub fn base_vault(&self) -> Pubkey {
        self.state.base_vault
    }

    pub fn quote_vault(&self) -> Pubkey {
        self.state.quote_vault
    }

    pub fn request_queue(&self) -> Pubkey {
        self.state.request_queue
    }

    pub fn event_queue(&self) -> Pubkey {
        self.state.event_queue
    }

    /// Address of the bids account. Fetching it is up to the caller.
    pub fn bids(&self) -> Pubkey {
        self.state.bids
    }

    /// Address of the asks account. Fetching it is up to the caller.
    pub fn asks(&self) -> Pubkey {
        self.state.asks
    }

    pub fn base_lot_size(&self) -> u64 {
        self.state.base_lot_size
    }

    pub fn quote_lot_size(&self) -> u64 {
        self.state.quote_lot_size
    }

    pub fn fee_rate_bps(&self) -> u64 {
        self.state.fee_rate_bps
    }

    /// Lot scale in native units. Use [`LotScale::with_decimals`] to get
    /// human units once the mint decimals are known.
    pub fn lot_scale(&self) -> LotScale {
        LotScale::new(self.state.base_lot_size, self.state.quote_lot_size)
    }
}
