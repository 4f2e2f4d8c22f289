use std::fmt;

use enumflags2::{bitflags, BitFlags};

use crate::error::{BookError, BookResult};

/// Crit-bit slab holding the orders of one side of the book
pub mod critbit;
/// The market configuration record
pub mod market_state;
/// Decoded order books and the views built on top of them
pub mod orderbook;

/// Every account of the exchange program starts with these bytes.
pub const ACCOUNT_HEAD_PADDING: &[u8; 5] = b"serum";
/// Every account of the exchange program ends with these bytes.
pub const ACCOUNT_TAIL_PADDING: &[u8; 7] = b"padding";

#[allow(missing_docs)]
#[bitflags]
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountFlag {
    Initialized = 1u64 << 0,
    Market = 1u64 << 1,
    OpenOrders = 1u64 << 2,
    RequestQueue = 1u64 << 3,
    EventQueue = 1u64 << 4,
    Bids = 1u64 << 5,
    Asks = 1u64 << 6,
    Disabled = 1u64 << 7,
    Closed = 1u64 << 8,
    Permissioned = 1u64 << 9,
}

/// The decoded account flags word.
///
/// Bits that do not name an [`AccountFlag`] are kept as they were, so
/// [`AccountFlags::bits`] always gives back the original word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AccountFlags {
    flags: BitFlags<AccountFlag>,
    unknown_bits: u64,
}

#[allow(missing_docs)]
impl AccountFlags {
    pub fn from_bits(raw: u64) -> Self {
        let flags = BitFlags::<AccountFlag>::from_bits_truncate(raw);
        Self {
            flags,
            unknown_bits: raw & !flags.bits(),
        }
    }

    pub fn bits(&self) -> u64 {
        self.flags.bits() | self.unknown_bits
    }

    pub fn flags(&self) -> BitFlags<AccountFlag> {
        self.flags
    }

    pub fn unknown_bits(&self) -> u64 {
        self.unknown_bits
    }

    pub fn contains(&self, flag: AccountFlag) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_initialized(&self) -> bool {
        self.contains(AccountFlag::Initialized)
    }

    pub fn is_market(&self) -> bool {
        self.contains(AccountFlag::Market)
    }

    pub fn is_open_orders(&self) -> bool {
        self.contains(AccountFlag::OpenOrders)
    }

    pub fn is_request_queue(&self) -> bool {
        self.contains(AccountFlag::RequestQueue)
    }

    pub fn is_event_queue(&self) -> bool {
        self.contains(AccountFlag::EventQueue)
    }

    pub fn is_bids(&self) -> bool {
        self.contains(AccountFlag::Bids)
    }

    pub fn is_asks(&self) -> bool {
        self.contains(AccountFlag::Asks)
    }

    /// The book side these flags describe, if exactly one of bids or asks is set.
    pub fn side(&self) -> Option<Side> {
        match (self.is_bids(), self.is_asks()) {
            (true, false) => Some(Side::Bid),
            (false, true) => Some(Side::Ask),
            _ => None,
        }
    }
}

impl From<BitFlags<AccountFlag>> for AccountFlags {
    fn from(flags: BitFlags<AccountFlag>) -> Self {
        Self {
            flags,
            unknown_bits: 0,
        }
    }
}

impl fmt::Debug for AccountFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountFlags")
            .field("flags", &self.flags)
            .field("unknown_bits", &format_args!("{:#x}", self.unknown_bits))
            .finish()
    }
}

impl fmt::Display for AccountFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = self
            .flags
            .iter()
            .map(|flag| format!("{:?}", flag))
            .collect::<Vec<_>>();
        if self.unknown_bits != 0 {
            parts.push(format!("{:#x}", self.unknown_bits));
        }
        if parts.is_empty() {
            f.write_str("(empty)")
        } else {
            f.write_str(&parts.join(" | "))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Side {
    Bid,
    Ask,
}

/// Checks the head and tail markers of an account and returns what lies between.
pub(crate) fn strip_account_padding(data: &[u8], min_body_len: usize) -> BookResult<&[u8]> {
    let needed = ACCOUNT_HEAD_PADDING.len() + min_body_len + ACCOUNT_TAIL_PADDING.len();
    if data.len() < needed {
        return Err(BookError::BufferTooShort {
            needed,
            remaining: data.len(),
        });
    }
    let (head, rest) = data.split_at(ACCOUNT_HEAD_PADDING.len());
    let (body, tail) = rest.split_at(rest.len() - ACCOUNT_TAIL_PADDING.len());
    if head != ACCOUNT_HEAD_PADDING {
        return Err(BookError::WrongAccountHeadPadding {
            found: head.to_vec(),
        });
    }
    if tail != ACCOUNT_TAIL_PADDING {
        return Err(BookError::WrongAccountTailPadding {
            found: tail.to_vec(),
        });
    }
    Ok(body)
}

pub(crate) fn wrap_account_padding(body: &[u8]) -> Vec<u8> {
    let mut data =
        Vec::with_capacity(ACCOUNT_HEAD_PADDING.len() + body.len() + ACCOUNT_TAIL_PADDING.len());
    data.extend_from_slice(ACCOUNT_HEAD_PADDING);
    data.extend_from_slice(body);
    data.extend_from_slice(ACCOUNT_TAIL_PADDING);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_decode_every_named_bit() {
        let flags = AccountFlags::from_bits(0b110_0001);
        assert!(flags.is_initialized());
        assert!(flags.is_bids());
        assert!(flags.is_asks());
        assert!(!flags.is_market());
        assert!(!flags.is_open_orders());
        assert!(!flags.is_request_queue());
        assert!(!flags.is_event_queue());
        assert_eq!(flags.side(), None);

        let market = AccountFlags::from_bits(0b11);
        assert!(market.is_initialized() && market.is_market());
        assert_eq!(
            AccountFlags::from_bits(0b1_1110),
            AccountFlags::from(
                AccountFlag::Market
                    | AccountFlag::OpenOrders
                    | AccountFlag::RequestQueue
                    | AccountFlag::EventQueue
            )
        );
    }

    #[test]
    fn unknown_bits_survive() {
        let raw = (1u64 << 63) | (1 << 40) | 0b10_0001;
        let flags = AccountFlags::from_bits(raw);
        assert_eq!(flags.unknown_bits(), (1u64 << 63) | (1 << 40));
        assert_eq!(flags.bits(), raw);
        assert_eq!(flags.side(), Some(Side::Bid));
        assert_eq!(
            flags.to_string(),
            "Initialized | Bids | 0x8000010000000000"
        );
        assert_eq!(AccountFlags::from_bits(0).to_string(), "(empty)");
    }

    #[test]
    fn padding_is_checked_on_both_ends() {
        let data = wrap_account_padding(&[1, 2, 3]);
        assert_eq!(strip_account_padding(&data, 3).unwrap(), &[1, 2, 3]);
        assert_eq!(
            strip_account_padding(&data, 4),
            Err(BookError::BufferTooShort {
                needed: 16,
                remaining: 15
            })
        );

        let mut bad_head = data.clone();
        bad_head[0] = b'S';
        assert!(matches!(
            strip_account_padding(&bad_head, 0),
            Err(BookError::WrongAccountHeadPadding { .. })
        ));

        let mut bad_tail = data;
        let last = bad_tail.len() - 1;
        bad_tail[last] = 0;
        assert_eq!(
            strip_account_padding(&bad_tail, 0),
            Err(BookError::WrongAccountTailPadding {
                found: b"paddin\0".to_vec()
            })
        );
    }
}
