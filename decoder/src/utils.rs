//! Conversions between the raw lot counts stored on chain and decimal prices
//! and quantities.
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{BookError, BookResult};

/// The lot sizes of a market, and optionally the decimals of its two mints.
///
/// With zero decimals every conversion is in native token units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotScale {
    /// Native base token units per lot
    pub base_lot_size: u64,
    /// Native quote token units per lot
    pub quote_lot_size: u64,
    /// Decimals of the base mint
    pub base_decimals: u8,
    /// Decimals of the quote mint
    pub quote_decimals: u8,
}

#[allow(missing_docs)]
impl LotScale {
    pub fn new(base_lot_size: u64, quote_lot_size: u64) -> Self {
        Self {
            base_lot_size,
            quote_lot_size,
            base_decimals: 0,
            quote_decimals: 0,
        }
    }

    pub fn with_decimals(self, base_decimals: u8, quote_decimals: u8) -> Self {
        Self {
            base_decimals,
            quote_decimals,
            ..self
        }
    }

    fn check_lot_sizes(&self) -> BookResult {
        if self.base_lot_size == 0 || self.quote_lot_size == 0 {
            return Err(BookError::InvalidLotSize {
                base_lot_size: self.base_lot_size,
                quote_lot_size: self.quote_lot_size,
            });
        }
        Ok(())
    }

    fn check_sign(amount: Decimal) -> BookResult {
        if amount < Decimal::ZERO {
            return Err(BookError::NegativeAmount { amount });
        }
        Ok(())
    }

    /// `raw_price * quote_lot * 10^base_decimals / (base_lot * 10^quote_decimals)`
    pub fn price(&self, raw_price: u64) -> BookResult<Decimal> {
        self.check_lot_sizes()?;
        let numerator = Decimal::from(raw_price)
            .checked_mul(Decimal::from(self.quote_lot_size))
            .and_then(|n| n.checked_mul(pow10(self.base_decimals)?))
            .ok_or(BookError::ScaleOverflow)?;
        let denominator = Decimal::from(self.base_lot_size)
            .checked_mul(pow10(self.quote_decimals).ok_or(BookError::ScaleOverflow)?)
            .ok_or(BookError::ScaleOverflow)?;
        numerator
            .checked_div(denominator)
            .map(|price| price.normalize())
            .ok_or(BookError::ScaleOverflow)
    }

    /// `raw_quantity * base_lot / 10^base_decimals`
    pub fn quantity(&self, raw_quantity: u64) -> BookResult<Decimal> {
        self.check_lot_sizes()?;
        Decimal::from(raw_quantity)
            .checked_mul(Decimal::from(self.base_lot_size))
            .zip(pow10(self.base_decimals))
            .and_then(|(n, d)| n.checked_div(d))
            .map(|quantity| quantity.normalize())
            .ok_or(BookError::ScaleOverflow)
    }

    /// Inverse of [`LotScale::price`], rounding toward zero.
    pub fn price_to_lots(&self, price: Decimal) -> BookResult<u64> {
        self.check_lot_sizes()?;
        Self::check_sign(price)?;
        let numerator = price
            .checked_mul(Decimal::from(self.base_lot_size))
            .zip(pow10(self.quote_decimals))
            .and_then(|(n, p)| n.checked_mul(p));
        let denominator = pow10(self.base_decimals)
            .and_then(|p| p.checked_mul(Decimal::from(self.quote_lot_size)));
        numerator
            .zip(denominator)
            .and_then(|(n, d)| n.checked_div(d))
            .and_then(|lots| lots.trunc().to_u64())
            .ok_or(BookError::ScaleOverflow)
    }

    /// Inverse of [`LotScale::quantity`], rounding toward zero.
    pub fn quantity_to_lots(&self, quantity: Decimal) -> BookResult<u64> {
        self.check_lot_sizes()?;
        Self::check_sign(quantity)?;
        pow10(self.base_decimals)
            .and_then(|p| quantity.checked_mul(p))
            .and_then(|n| n.checked_div(Decimal::from(self.base_lot_size)))
            .and_then(|lots| lots.trunc().to_u64())
            .ok_or(BookError::ScaleOverflow)
    }
}

fn pow10(exponent: u8) -> Option<Decimal> {
    10u64.checked_pow(exponent as u32).map(Decimal::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    // BTC/USDC: 6 decimal mints, a base lot of 0.0001 BTC and a quote lot of 0.00001 USDC
    fn btc_usdc() -> LotScale {
        LotScale::new(100, 10).with_decimals(6, 6)
    }

    #[test]
    fn scales_lots_into_decimals() {
        let scale = btc_usdc();
        assert_eq!(scale.price(1_234_567).unwrap(), Decimal::new(1_234_567, 1));
        assert_eq!(scale.quantity(4_771).unwrap(), Decimal::new(4_771, 4));
        assert_eq!(scale.price(0).unwrap(), Decimal::ZERO);
        assert_eq!(scale.price(1_234_567).unwrap().to_string(), "123456.7");

        let native = LotScale::new(100, 10);
        assert_eq!(native.price(51).unwrap(), Decimal::new(51, 1));
        assert_eq!(native.quantity(3).unwrap(), Decimal::from(300));
    }

    #[test]
    fn converts_back_to_lots() {
        let scale = btc_usdc();
        assert_eq!(scale.price_to_lots(Decimal::new(1_234_567, 1)).unwrap(), 1_234_567);
        assert_eq!(scale.price_to_lots(Decimal::new(12_345_679, 2)).unwrap(), 1_234_567);
        assert_eq!(scale.quantity_to_lots(Decimal::new(4_771, 4)).unwrap(), 4_771);
        assert_eq!(
            scale.quantity_to_lots(Decimal::new(-1, 0)),
            Err(BookError::NegativeAmount {
                amount: Decimal::new(-1, 0)
            })
        );
        assert!(matches!(
            scale.price_to_lots(Decimal::new(-5, 1)),
            Err(BookError::NegativeAmount { .. })
        ));
        assert_eq!(scale.price_to_lots(Decimal::ZERO), Ok(0));
        assert_eq!(
            scale.price_to_lots(Decimal::MAX),
            Err(BookError::ScaleOverflow)
        );
    }

    #[test]
    fn zero_lots_and_overflow_are_errors() {
        assert_eq!(
            LotScale::new(0, 10).price(5),
            Err(BookError::InvalidLotSize {
                base_lot_size: 0,
                quote_lot_size: 10
            })
        );
        assert!(matches!(
            LotScale::new(100, 0).quantity(5),
            Err(BookError::InvalidLotSize { .. })
        ));
        assert_eq!(
            LotScale::new(1, u64::MAX).price(u64::MAX),
            Err(BookError::ScaleOverflow)
        );
        assert_eq!(
            LotScale::new(1, 1).with_decimals(20, 0).price(1),
            Err(BookError::ScaleOverflow)
        );
    }
}
