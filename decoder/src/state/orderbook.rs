#![allow(missing_docs)]
use std::cmp::Ordering;

use rust_decimal::Decimal;
use solana_program::pubkey::Pubkey;

use crate::{
    cursor::Cursor,
    error::{Anomaly, BookError, BookResult},
    state::{
        critbit::{aggregate_levels, DecodeOptions, L2Level, LeafNode, NodeHandle, Slab, SlabHeader},
        market_state::Market,
        strip_account_padding, AccountFlags, Side,
    },
    utils::LotScale,
};

/// One side of a market's book, decoded from its account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBook {
    flags: AccountFlags,
    side: Side,
    slab: Slab,
    diagnostics: Vec<Anomaly>,
}

impl OrderBook {
    /// Size of a book account with no node slots
    pub const MIN_ACCOUNT_LEN: usize = 5 + 8 + SlabHeader::LEN + 7;

    pub fn decode(data: &[u8]) -> BookResult<Self> {
        Self::decode_with(data, &DecodeOptions::default())
    }

    pub fn decode_with(data: &[u8], options: &DecodeOptions) -> BookResult<Self> {
        let body = strip_account_padding(data, 8 + SlabHeader::LEN)?;
        let mut cursor = Cursor::new(body);
        let flags = AccountFlags::from_bits(cursor.read_u64()?);
        let side = flags
            .side()
            .ok_or(BookError::NotAnOrderBook { flags: flags.bits() })?;
        let slab = Slab::decode(cursor.rest(), options)?;
        let diagnostics = slab.diagnose();
        tracing::debug!(
            ?side,
            %flags,
            capacity = slab.capacity(),
            bump_index = slab.bump_index(),
            free_list_len = slab.free_list_len(),
            leaf_count = slab.leaf_count(),
            anomalies = diagnostics.len(),
            "decoded order book"
        );
        Ok(Self {
            flags,
            side,
            slab,
            diagnostics,
        })
    }

    pub fn flags(&self) -> AccountFlags {
        self.flags
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn slab(&self) -> &Slab {
        &self.slab
    }

    /// Inconsistencies found while decoding. Empty for a healthy account.
    pub fn diagnostics(&self) -> &[Anomaly] {
        &self.diagnostics
    }

    pub fn is_consistent(&self) -> bool {
        self.diagnostics.is_empty()
    }

    fn find_bbo(&self) -> Option<NodeHandle> {
        match self.side {
            Side::Bid => self.slab.find_max(),
            Side::Ask => self.slab.find_min(),
        }
    }

    /// The order with execution priority: highest bid or lowest ask.
    ///
    /// A consistent tree is descended directly. Otherwise every reachable
    /// order is compared, since the tree shape can no longer be trusted.
    pub fn best(&self) -> Option<&LeafNode> {
        if self.is_consistent() {
            return self.find_bbo().and_then(|handle| self.slab.leaf(handle));
        }
        self.slab
            .leaves()
            .min_by(|a, b| compare_priority(self.side, a, b))
    }

    /// Live orders, best first.
    pub fn sorted_orders(&self) -> Vec<&LeafNode> {
        let mut orders = self.slab.leaves().collect::<Vec<_>>();
        orders.sort_by(|a, b| compare_priority(self.side, a, b));
        orders
    }

    pub fn l2_depth(&self, depth: usize) -> BookResult<Vec<L2Level>> {
        if self.is_consistent() {
            return self.slab.l2_depth(depth, self.side);
        }
        aggregate_levels(self.sorted_orders(), depth)
    }
}

/// Execution priority on `side`: better price first, then earlier arrival.
pub fn compare_priority(side: Side, a: &LeafNode, b: &LeafNode) -> Ordering {
    let by_price = match side {
        Side::Bid => b.price().cmp(&a.price()),
        Side::Ask => a.price().cmp(&b.price()),
    };
    by_price.then_with(|| a.seq_num(side).cmp(&b.seq_num(side)))
}

/// An order with its price and quantity in decimal units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledOrder {
    pub order_id: u128,
    pub price: Decimal,
    pub quantity: Decimal,
    pub owner: Pubkey,
    pub client_order_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// A market together with whichever of its book sides have been decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketBook {
    market: Market,
    scale: LotScale,
    bids: Option<OrderBook>,
    asks: Option<OrderBook>,
}

impl MarketBook {
    /// The mint decimals live in the mint accounts, not in the market record.
    pub fn new(market: Market, base_decimals: u8, quote_decimals: u8) -> Self {
        let scale = market
            .lot_scale()
            .with_decimals(base_decimals, quote_decimals);
        Self {
            market,
            scale,
            bids: None,
            asks: None,
        }
    }

    /// Stores `order_book` on its side, returning the one it replaces.
    pub fn attach(&mut self, order_book: OrderBook) -> Option<OrderBook> {
        let slot = match order_book.side() {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        slot.replace(order_book)
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn lot_scale(&self) -> LotScale {
        self.scale
    }

    pub fn book(&self, side: Side) -> Option<&OrderBook> {
        match side {
            Side::Bid => self.bids.as_ref(),
            Side::Ask => self.asks.as_ref(),
        }
    }

    pub fn bids(&self) -> Option<&OrderBook> {
        self.bids.as_ref()
    }

    pub fn asks(&self) -> Option<&OrderBook> {
        self.asks.as_ref()
    }

    pub fn best_price(&self, side: Side) -> BookResult<Option<Decimal>> {
        self.book(side)
            .and_then(OrderBook::best)
            .map(|leaf| self.scale.price(leaf.price()))
            .transpose()
    }

    /// Best ask minus best bid, when both sides have orders.
    pub fn spread(&self) -> BookResult<Option<Decimal>> {
        match (self.best_price(Side::Bid)?, self.best_price(Side::Ask)?) {
            (Some(bid), Some(ask)) => Ok(Some(ask - bid)),
            _ => Ok(None),
        }
    }

    pub fn scaled_orders(&self, side: Side) -> BookResult<Vec<ScaledOrder>> {
        let book = match self.book(side) {
            Some(book) => book,
            None => return Ok(Vec::new()),
        };
        book.sorted_orders()
            .into_iter()
            .map(|leaf| {
                Ok(ScaledOrder {
                    order_id: leaf.order_id(),
                    price: self.scale.price(leaf.price())?,
                    quantity: self.scale.quantity(leaf.quantity)?,
                    owner: leaf.owner,
                    client_order_id: leaf.client_order_id,
                })
            })
            .collect()
    }

    pub fn scaled_l2(&self, side: Side, depth: usize) -> BookResult<Vec<ScaledLevel>> {
        self.book(side)
            .map(|book| book.l2_depth(depth))
            .transpose()?
            .unwrap_or_default()
            .into_iter()
            .map(|level| {
                Ok(ScaledLevel {
                    price: self.scale.price(level.price)?,
                    quantity: self.scale.quantity(level.quantity)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        critbit::{order_key, InnerNode, SlabBuilder, SlabNode},
        market_state::MarketState,
        wrap_account_padding, AccountFlag,
    };
    use bytemuck::Zeroable;

    fn book_account(side: Side, orders: &[(u64, u64, u64)]) -> Vec<u8> {
        let mut builder = SlabBuilder::new(2 * orders.len());
        for &(price, seq_num, quantity) in orders {
            builder
                .insert_leaf(LeafNode {
                    owner_slot: 0,
                    fee_tier: 0,
                    key: order_key(side, price, seq_num),
                    owner: Pubkey::new_unique(),
                    quantity,
                    client_order_id: seq_num,
                })
                .unwrap();
        }
        let side_flag = match side {
            Side::Bid => AccountFlag::Bids,
            Side::Ask => AccountFlag::Asks,
        };
        builder.encode_account(AccountFlags::from(AccountFlag::Initialized | side_flag))
    }

    fn prices_and_seqs(book: &OrderBook) -> Vec<(u64, u64)> {
        book.sorted_orders()
            .iter()
            .map(|leaf| (leaf.price(), leaf.seq_num(book.side())))
            .collect()
    }

    #[test]
    fn flags_must_name_one_side() {
        let mut data = book_account(Side::Bid, &[(10, 1, 1)]);
        let book = OrderBook::decode(&data).unwrap();
        assert_eq!(book.side(), Side::Bid);
        assert!(book.flags().is_initialized());
        assert!(book.is_consistent());

        data[5..13].copy_from_slice(&0b110_0001u64.to_le_bytes());
        assert_eq!(
            OrderBook::decode(&data),
            Err(BookError::NotAnOrderBook { flags: 0b110_0001 })
        );
        data[5..13].copy_from_slice(&0b11u64.to_le_bytes());
        assert_eq!(
            OrderBook::decode(&data),
            Err(BookError::NotAnOrderBook { flags: 0b11 })
        );
    }

    #[test]
    fn empty_book_of_minimum_size() {
        let data = book_account(Side::Ask, &[]);
        assert_eq!(data.len(), OrderBook::MIN_ACCOUNT_LEN);
        let book = OrderBook::decode(&data).unwrap();
        assert_eq!(book.slab().capacity(), 0);
        assert_eq!(book.best(), None);
        assert!(book.sorted_orders().is_empty());

        let mut short = data[..data.len() - 8].to_vec();
        short.extend_from_slice(b"padding");
        assert_eq!(
            OrderBook::decode(&short),
            Err(BookError::BufferTooShort {
                needed: OrderBook::MIN_ACCOUNT_LEN,
                remaining: OrderBook::MIN_ACCOUNT_LEN - 1
            })
        );
    }

    #[test]
    fn orders_sort_by_side_priority() {
        let orders = [(10, 4, 1), (12, 2, 1), (10, 1, 1), (11, 3, 1), (12, 5, 1)];

        let bids = OrderBook::decode(&book_account(Side::Bid, &orders)).unwrap();
        assert_eq!(
            prices_and_seqs(&bids),
            vec![(12, 2), (12, 5), (11, 3), (10, 1), (10, 4)]
        );
        assert_eq!(bids.best().map(|leaf| leaf.client_order_id), Some(2));

        let asks = OrderBook::decode(&book_account(Side::Ask, &orders)).unwrap();
        assert_eq!(
            prices_and_seqs(&asks),
            vec![(10, 1), (10, 4), (11, 3), (12, 2), (12, 5)]
        );
        assert_eq!(asks.best().map(|leaf| leaf.client_order_id), Some(1));
        assert_eq!(
            asks.l2_depth(2).unwrap(),
            vec![
                L2Level {
                    price: 10,
                    quantity: 2
                },
                L2Level {
                    price: 11,
                    quantity: 1
                }
            ]
        );
    }

    #[test]
    fn market_book_scales_both_sides() {
        let market = Market::new(MarketState {
            base_lot_size: 100,
            quote_lot_size: 10,
            ..MarketState::zeroed()
        });
        let mut market_book = MarketBook::new(market, 6, 6);
        assert_eq!(market_book.spread(), Ok(None));
        assert_eq!(market_book.scaled_orders(Side::Bid), Ok(vec![]));

        let bids = OrderBook::decode(&book_account(Side::Bid, &[(1_000, 1, 30), (990, 2, 5)]))
            .unwrap();
        let asks = OrderBook::decode(&book_account(Side::Ask, &[(1_005, 3, 10), (1_005, 4, 20)]))
            .unwrap();
        assert!(market_book.attach(bids.clone()).is_none());
        assert!(market_book.attach(asks).is_none());
        assert_eq!(market_book.attach(bids), market_book.bids().cloned());

        assert_eq!(market_book.spread(), Ok(Some(Decimal::new(5, 1))));
        let best_bid = &market_book.scaled_orders(Side::Bid).unwrap()[0];
        assert_eq!(best_bid.price, Decimal::from(100));
        assert_eq!(best_bid.quantity, Decimal::new(3, 3));
        assert_eq!(
            market_book.scaled_l2(Side::Ask, 5),
            Ok(vec![ScaledLevel {
                price: Decimal::new(1_005, 1),
                quantity: Decimal::new(3, 3)
            }])
        );

        let mut broken = MarketBook::new(Market::new(MarketState::zeroed()), 6, 6);
        broken.attach(market_book.asks().cloned().unwrap());
        assert!(matches!(
            broken.scaled_orders(Side::Ask),
            Err(BookError::InvalidLotSize { .. })
        ));
    }

    #[test]
    fn misordered_tree_falls_back_to_priority_order() {
        let order = |price, seq_num, quantity| LeafNode {
            owner_slot: 0,
            fee_tier: 0,
            key: order_key(Side::Ask, price, seq_num),
            owner: Pubkey::new_unique(),
            quantity,
            client_order_id: seq_num,
        };
        let (ten, twelve) = (order(10, 1, 5), order(12, 2, 7));
        // the higher key sits on the 0 side
        let slab = Slab::from_parts(
            SlabHeader::new(3, 0, 0, 0, 2),
            vec![
                SlabNode::Inner(InnerNode {
                    prefix_len: (ten.key ^ twelve.key).leading_zeros(),
                    key: twelve.key,
                    children: [1, 2],
                }),
                SlabNode::Leaf(twelve),
                SlabNode::Leaf(ten),
            ],
        );
        let flags = AccountFlags::from(AccountFlag::Initialized | AccountFlag::Asks);
        let mut body = flags.bits().to_le_bytes().to_vec();
        body.extend_from_slice(&slab.encode());
        let asks = OrderBook::decode(&wrap_account_padding(&body)).unwrap();

        assert!(!asks.is_consistent());
        assert!(matches!(
            asks.diagnostics()[0],
            Anomaly::KeyOutOfOrder { parent: 0, .. }
        ));
        assert_eq!(asks.best(), Some(&ten));
        assert_eq!(asks.sorted_orders(), vec![&ten, &twelve]);
        assert_eq!(
            asks.l2_depth(1),
            Ok(vec![L2Level {
                price: 10,
                quantity: 5
            }])
        );

        let mut market_book = MarketBook::new(
            Market::new(MarketState {
                base_lot_size: 1,
                quote_lot_size: 1,
                ..MarketState::zeroed()
            }),
            0,
            0,
        );
        market_book.attach(asks);
        market_book.attach(OrderBook::decode(&book_account(Side::Bid, &[(9, 3, 1)])).unwrap());
        assert_eq!(market_book.best_price(Side::Ask), Ok(Some(Decimal::from(10))));
        assert_eq!(market_book.spread(), Ok(Some(Decimal::ONE)));
    }
}
