//! Trade-level transaction costs: commission, stamp duty and transfer fee.
//!
//! Every component is computed on the exact notional and then rounded to
//! the smallest currency unit (see [`crate::domain::money`]).

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

use super::error::LedgerError;
use super::money::{self, round_money};
use super::trade::{Direction, Offset, Trade};

/// Which trade attribute decides that stamp duty is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampDutyBasis {
    /// Charged on every sell.
    Direction,
    /// Charged on every closing trade.
    Offset,
}

impl StampDutyBasis {
    pub fn applies(&self, direction: Direction, offset: Offset) -> bool {
        match self {
            StampDutyBasis::Direction => direction == Direction::Sell,
            StampDutyBasis::Offset => offset == Offset::Close,
        }
    }

    pub fn parse(s: &str) -> Option<StampDutyBasis> {
        match s.trim().to_lowercase().as_str() {
            "direction" => Some(StampDutyBasis::Direction),
            "offset" => Some(StampDutyBasis::Offset),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StampDutyBasis::Direction => "direction",
            StampDutyBasis::Offset => "offset",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferFeeRule {
    pub rate: Decimal,
    pub min_fee: Decimal,
}

/// Cost parameters, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CostConfig {
    pub commission_rate: Decimal,
    pub min_commission: Decimal,
    pub stamp_duty_rate: Decimal,
    pub stamp_duty_basis: StampDutyBasis,
    /// Keyed by upper-case exchange code. Exchanges not listed levy no fee.
    pub transfer_fees: BTreeMap<String, TransferFeeRule>,
}

impl Default for CostConfig {
    fn default() -> Self {
        let mut transfer_fees = BTreeMap::new();
        transfer_fees.insert(
            "SSE".to_string(),
            TransferFeeRule {
                rate: dec!(0.00002),
                min_fee: Decimal::ZERO,
            },
        );
        CostConfig {
            commission_rate: dec!(0.0003),
            min_commission: dec!(5),
            stamp_duty_rate: dec!(0.001),
            stamp_duty_basis: StampDutyBasis::Direction,
            transfer_fees,
        }
    }
}

impl CostConfig {
    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut fields = vec![
            ("commission_rate".to_string(), self.commission_rate),
            ("min_commission".to_string(), self.min_commission),
            ("stamp_duty_rate".to_string(), self.stamp_duty_rate),
        ];
        for (exchange, rule) in &self.transfer_fees {
            fields.push((format!("transfer_fee_rate.{exchange}"), rule.rate));
            fields.push((format!("min_transfer_fee.{exchange}"), rule.min_fee));
        }
        for (field, value) in fields {
            if value < Decimal::ZERO {
                return Err(LedgerError::validation(
                    &field,
                    format!("must be non-negative, got {value}"),
                ));
            }
        }
        Ok(())
    }

    pub fn transfer_fee_rule(&self, exchange: &str) -> Option<&TransferFeeRule> {
        self.transfer_fees.get(&exchange.trim().to_uppercase())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostBreakdown {
    pub notional: Decimal,
    pub commission: Decimal,
    pub stamp_duty: Decimal,
    pub transfer_fee: Decimal,
    pub total: Decimal,
}

impl CostBreakdown {
    pub fn zero() -> Self {
        CostBreakdown {
            notional: Decimal::ZERO,
            commission: Decimal::ZERO,
            stamp_duty: Decimal::ZERO,
            transfer_fee: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    /// total / notional, zero for an empty notional.
    pub fn cost_rate(&self) -> Decimal {
        if self.notional.is_zero() {
            Decimal::ZERO
        } else {
            self.total / self.notional
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundTripCost {
    pub buy: CostBreakdown,
    pub sell: CostBreakdown,
    pub total: Decimal,
}

impl RoundTripCost {
    pub fn cost_rate(&self) -> Decimal {
        if self.buy.notional.is_zero() {
            Decimal::ZERO
        } else {
            self.total / self.buy.notional
        }
    }
}

/// Stateless cost model over a [`CostConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct TradingCostCalculator {
    config: CostConfig,
}

const BREAKEVEN_TICK: Decimal = dec!(0.0001);
const BREAKEVEN_MAX_ITERATIONS: usize = 200;

impl TradingCostCalculator {
    pub fn new(config: CostConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CostConfig {
        &self.config
    }

    pub fn calculate_cost(
        &self,
        price: Decimal,
        volume: i64,
        direction: Direction,
        offset: Offset,
        exchange: &str,
    ) -> Result<CostBreakdown, LedgerError> {
        if price <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "price",
                format!("must be positive, got {price}"),
            ));
        }
        if volume <= 0 {
            return Err(LedgerError::validation(
                "volume",
                format!("must be positive, got {volume}"),
            ));
        }

        let notional = money::notional(price, volume)?;
        let commission = round_money(
            money::checked_mul(notional, self.config.commission_rate, "commission")?
                .max(self.config.min_commission),
        );
        let stamp_duty = if self.config.stamp_duty_basis.applies(direction, offset) {
            round_money(money::checked_mul(
                notional,
                self.config.stamp_duty_rate,
                "stamp_duty",
            )?)
        } else {
            Decimal::ZERO
        };
        let transfer_fee = match self.config.transfer_fee_rule(exchange) {
            Some(rule) => round_money(
                money::checked_mul(notional, rule.rate, "transfer_fee")?.max(rule.min_fee),
            ),
            None => Decimal::ZERO,
        };
        let total = money::checked_add(commission, stamp_duty, "total")?;
        let total = money::checked_add(total, transfer_fee, "total")?;

        Ok(CostBreakdown {
            notional,
            commission,
            stamp_duty,
            transfer_fee,
            total,
        })
    }

    pub fn cost_of(&self, trade: &Trade) -> Result<CostBreakdown, LedgerError> {
        self.calculate_cost(
            trade.price,
            trade.volume,
            trade.direction,
            trade.offset,
            &trade.exchange,
        )
    }

    /// Buy-to-open followed by sell-to-close at the same price.
    pub fn round_trip_cost(
        &self,
        price: Decimal,
        volume: i64,
        exchange: &str,
    ) -> Result<RoundTripCost, LedgerError> {
        let buy = self.calculate_cost(price, volume, Direction::Buy, Offset::Open, exchange)?;
        let sell = self.calculate_cost(price, volume, Direction::Sell, Offset::Close, exchange)?;
        let total = money::checked_add(buy.total, sell.total, "total")?;
        Ok(RoundTripCost { buy, sell, total })
    }

    /// Lowest sell price (to 0.0001) at which a round trip bought at
    /// `buy_price` does not lose money after both legs' costs.
    ///
    /// Fails when the proportional sell-side rates add up to 1 or more, since
    /// no price can then cover the costs.
    pub fn breakeven_price(
        &self,
        buy_price: Decimal,
        volume: i64,
        exchange: &str,
    ) -> Result<Decimal, LedgerError> {
        let sell_rate = self.sell_side_rate(exchange);
        if sell_rate >= Decimal::ONE {
            return Err(LedgerError::validation(
                "cost_rates",
                format!("sell-side rates sum to {sell_rate}, no breakeven price exists"),
            ));
        }
        let buy_cost = self
            .calculate_cost(buy_price, volume, Direction::Buy, Offset::Open, exchange)?
            .total;

        let net = |sell_price: Decimal| -> Result<Decimal, LedgerError> {
            let sell_cost = self
                .calculate_cost(sell_price, volume, Direction::Sell, Offset::Close, exchange)?
                .total;
            let gross = money::checked_mul(sell_price - buy_price, Decimal::from(volume), "net")?;
            let costs = money::checked_add(buy_cost, sell_cost, "net")?;
            money::checked_sub(gross, costs, "net")
        };

        let mut low = buy_price;
        let mut high = money::checked_mul(buy_price, dec!(1.1), "price")?;
        let mut iterations = 0;
        while net(high)? < Decimal::ZERO {
            low = high;
            high = money::checked_mul(high, dec!(2), "price")?;
            iterations += 1;
            if iterations >= BREAKEVEN_MAX_ITERATIONS {
                return Err(LedgerError::validation(
                    "volume",
                    "no breakeven price within search range",
                ));
            }
        }

        while high - low > BREAKEVEN_TICK && iterations < BREAKEVEN_MAX_ITERATIONS {
            let mid = low + (high - low) / dec!(2);
            if net(mid)? < Decimal::ZERO {
                low = mid;
            } else {
                high = mid;
            }
            iterations += 1;
        }

        let rounded = high.round_dp_with_strategy(4, RoundingStrategy::ToPositiveInfinity);
        // Rounding up can only raise net; keep it if it still clears costs.
        if net(rounded)? >= Decimal::ZERO {
            Ok(rounded)
        } else {
            Ok(high)
        }
    }

    /// Commission, stamp duty and transfer fee rates charged on a
    /// sell-to-close, ignoring minimums.
    fn sell_side_rate(&self, exchange: &str) -> Decimal {
        let config = &self.config;
        let mut rate = config.commission_rate;
        if config.stamp_duty_basis.applies(Direction::Sell, Offset::Close) {
            rate = rate.saturating_add(config.stamp_duty_rate);
        }
        if let Some(rule) = config.transfer_fee_rule(exchange) {
            rate = rate.saturating_add(rule.rate);
        }
        rate
    }
}
