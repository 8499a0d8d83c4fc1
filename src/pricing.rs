//! Net pricing of multi-leg orders from collected quotes.
//!
//! Buy actions add their midpoint times quantity to the net price and sell
//! actions subtract it. A positive result is a debit, a negative one a
//! credit.

use crate::error::{TradingError, TradingResult};
use crate::instrument::InstrumentIdentity;
use crate::streaming::CollectedSnapshot;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tastytrade_client::{
    Action, NewOrder, NewOrderLeg, OrderType, PriceEffect, QuoteEvent, TimeInForce,
};
use tracing::debug;

/// One leg of a prospective order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLeg {
    /// Resolved instrument.
    pub instrument: InstrumentIdentity,
    /// Side of the leg.
    pub action: Action,
    /// Contracts or shares.
    pub quantity: u32,
}

impl OrderLeg {
    /// Creates a leg.
    #[must_use]
    pub fn new(instrument: InstrumentIdentity, action: Action, quantity: u32) -> Self {
        Self {
            instrument,
            action,
            quantity,
        }
    }

    /// Checks quantity and that the action fits the instrument type.
    ///
    /// # Errors
    /// Returns `InvalidOrder` describing the problem.
    pub fn validate(&self) -> TradingResult<()> {
        if self.quantity == 0 {
            return Err(TradingError::InvalidOrder(format!(
                "quantity for {} must be positive",
                self.instrument.symbol
            )));
        }
        if self.action.is_option_action() != self.instrument.is_option() {
            return Err(TradingError::InvalidOrder(format!(
                "{} cannot be used for {} {}",
                self.action, self.instrument.instrument_type, self.instrument.symbol
            )));
        }
        Ok(())
    }

    fn sign(&self) -> Decimal {
        if self.action.is_buy() {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        }
    }
}

/// A leg with the midpoint it was priced at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLeg {
    /// The leg.
    pub leg: OrderLeg,
    /// Midpoint of the leg's quote.
    pub midpoint: Decimal,
}

/// Signed net price of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetPrice {
    /// Net price, rounded to the tick. Positive is a debit.
    pub value: Decimal,
    /// Legs in submission order.
    pub legs: Vec<PricedLeg>,
}

impl NetPrice {
    /// Debit when the net is zero or positive, credit otherwise.
    #[must_use]
    pub fn price_effect(&self) -> PriceEffect {
        if self.value < Decimal::ZERO {
            PriceEffect::Credit
        } else {
            PriceEffect::Debit
        }
    }

    /// Unsigned limit price.
    #[must_use]
    pub fn limit_price(&self) -> Decimal {
        self.value.abs()
    }

    /// Builds a limit order request at this price.
    #[must_use]
    pub fn to_limit_order(&self, time_in_force: TimeInForce) -> NewOrder {
        NewOrder {
            time_in_force,
            order_type: OrderType::Limit,
            price: Some(self.limit_price()),
            price_effect: Some(self.price_effect()),
            legs: self
                .legs
                .iter()
                .map(|priced| NewOrderLeg {
                    instrument_type: priced.leg.instrument.instrument_type,
                    symbol: priced.leg.instrument.symbol.clone(),
                    quantity: priced.leg.quantity,
                    action: priced.leg.action,
                })
                .collect(),
        }
    }
}

impl std::fmt::Display for NetPrice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let effect = match self.price_effect() {
            PriceEffect::Credit => "credit",
            _ => "debit",
        };
        write!(f, "{} {effect}", self.limit_price())
    }
}

/// Computes net prices at a fixed tick.
#[derive(Debug, Clone, Copy)]
pub struct PriceCalculator {
    tick: Decimal,
}

impl PriceCalculator {
    /// Creates a calculator.
    ///
    /// # Arguments
    /// * `tick` - Minimum price increment, e.g. 0.01. Non-positive values
    ///   disable rounding.
    #[must_use]
    pub fn new(tick: Decimal) -> Self {
        Self { tick }
    }

    /// Price increment in use.
    #[must_use]
    pub fn tick(&self) -> Decimal {
        self.tick
    }

    /// Computes the net price of legs paired with their quotes.
    ///
    /// # Errors
    /// Returns `InvalidOrder` for no legs, a zero quantity or an action
    /// that does not fit the instrument, and `MissingQuote` when a quote
    /// lacks a bid or an ask.
    pub fn net_price(&self, legs: &[(OrderLeg, QuoteEvent)]) -> TradingResult<NetPrice> {
        if legs.is_empty() {
            return Err(TradingError::InvalidOrder(
                "order must have at least one leg".to_string(),
            ));
        }

        let mut total = Decimal::ZERO;
        let mut priced = Vec::with_capacity(legs.len());
        for (leg, quote) in legs {
            leg.validate()?;
            let midpoint = quote
                .midpoint()
                .ok_or_else(|| TradingError::MissingQuote(leg.instrument.streamer_symbol.clone()))?;
            total += leg.sign() * midpoint * Decimal::from(leg.quantity);
            priced.push(PricedLeg {
                leg: leg.clone(),
                midpoint,
            });
        }

        let value = self.round(total);
        debug!(raw = %total, net = %value, legs = priced.len(), "priced order");
        Ok(NetPrice {
            value,
            legs: priced,
        })
    }

    /// Computes the net price using the quotes in a collected snapshot.
    ///
    /// # Errors
    /// Returns `MissingQuote` for the first leg whose streamer symbol has no
    /// quote in the snapshot, and the errors of [`Self::net_price`].
    pub fn net_price_from_snapshot(
        &self,
        legs: &[OrderLeg],
        snapshot: &CollectedSnapshot,
    ) -> TradingResult<NetPrice> {
        let paired = legs
            .iter()
            .map(|leg| {
                snapshot
                    .quote(&leg.instrument.streamer_symbol)
                    .map(|quote| (leg.clone(), quote.clone()))
                    .ok_or_else(|| {
                        TradingError::MissingQuote(leg.instrument.streamer_symbol.clone())
                    })
            })
            .collect::<TradingResult<Vec<_>>>()?;
        self.net_price(&paired)
    }

    fn round(&self, value: Decimal) -> Decimal {
        if self.tick <= Decimal::ZERO {
            return value;
        }
        (value / self.tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            * self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tastytrade_client::{EventKind, FeedEvent, InstrumentType};

    fn option(symbol: &str) -> InstrumentIdentity {
        InstrumentIdentity {
            symbol: format!("SPY   {symbol}"),
            streamer_symbol: format!(".SPY{symbol}"),
            instrument_type: InstrumentType::EquityOption,
            underlying: "SPY".to_string(),
        }
    }

    fn stock() -> InstrumentIdentity {
        InstrumentIdentity {
            symbol: "SPY".to_string(),
            streamer_symbol: "SPY".to_string(),
            instrument_type: InstrumentType::Equity,
            underlying: "SPY".to_string(),
        }
    }

    fn quote(symbol: &str, bid: Option<Decimal>, ask: Option<Decimal>) -> QuoteEvent {
        QuoteEvent {
            event_symbol: symbol.to_string(),
            bid_price: bid,
            ask_price: ask,
            bid_size: None,
            ask_size: None,
            received_at: Utc::now(),
        }
    }

    fn spread(long: Action, short: Action) -> Vec<(OrderLeg, QuoteEvent)> {
        let a = option("250117C500");
        let b = option("250117C510");
        vec![
            (
                OrderLeg::new(a.clone(), long, 1),
                quote(&a.streamer_symbol, Some(dec!(1.95)), Some(dec!(2.05))),
            ),
            (
                OrderLeg::new(b.clone(), short, 1),
                quote(&b.streamer_symbol, Some(dec!(0.45)), Some(dec!(0.55))),
            ),
        ]
    }

    #[test]
    fn test_debit_spread() {
        let calc = PriceCalculator::new(dec!(0.01));
        let net = calc
            .net_price(&spread(Action::BuyToOpen, Action::SellToOpen))
            .unwrap();

        assert_eq!(net.value, dec!(1.50));
        assert_eq!(net.price_effect(), PriceEffect::Debit);
        assert_eq!(net.limit_price(), dec!(1.50));
        assert_eq!(net.to_string(), "1.50 debit");
    }

    #[test]
    fn test_reversed_sides_give_credit() {
        let calc = PriceCalculator::new(dec!(0.01));
        let net = calc
            .net_price(&spread(Action::SellToOpen, Action::BuyToOpen))
            .unwrap();

        assert_eq!(net.value, dec!(-1.50));
        assert_eq!(net.price_effect(), PriceEffect::Credit);
        assert_eq!(net.limit_price(), dec!(1.50));
    }

    #[test]
    fn test_closing_actions_keep_sign() {
        let calc = PriceCalculator::new(dec!(0.01));
        let net = calc
            .net_price(&spread(Action::BuyToClose, Action::SellToClose))
            .unwrap();
        assert_eq!(net.value, dec!(1.50));
    }

    #[test]
    fn test_quantity_scales_leg() {
        let calc = PriceCalculator::new(dec!(0.01));
        let mut legs = spread(Action::BuyToOpen, Action::SellToOpen);
        legs[1].0.quantity = 2;

        let net = calc.net_price(&legs).unwrap();
        assert_eq!(net.value, dec!(1.00));
    }

    #[test]
    fn test_rounds_half_away_from_zero() {
        let calc = PriceCalculator::new(dec!(0.01));
        let leg = OrderLeg::new(stock(), Action::Buy, 1);
        let up = calc
            .net_price(&[(leg.clone(), quote("SPY", Some(dec!(1.00)), Some(dec!(1.01))))])
            .unwrap();
        assert_eq!(up.value, dec!(1.01));

        let leg = OrderLeg::new(stock(), Action::Sell, 1);
        let down = calc
            .net_price(&[(leg, quote("SPY", Some(dec!(1.00)), Some(dec!(1.01))))])
            .unwrap();
        assert_eq!(down.value, dec!(-1.01));
    }

    #[test]
    fn test_nickel_tick() {
        let calc = PriceCalculator::new(dec!(0.05));
        let leg = OrderLeg::new(stock(), Action::Buy, 1);
        let net = calc
            .net_price(&[(leg, quote("SPY", Some(dec!(1.00)), Some(dec!(1.06))))])
            .unwrap();
        assert_eq!(net.value, dec!(1.05));
    }

    #[test]
    fn test_zero_net_is_debit() {
        let calc = PriceCalculator::new(dec!(0.01));
        let a = option("250117C500");
        let legs = vec![
            (
                OrderLeg::new(a.clone(), Action::BuyToOpen, 1),
                quote(&a.streamer_symbol, Some(dec!(1)), Some(dec!(1))),
            ),
            (
                OrderLeg::new(a.clone(), Action::SellToOpen, 1),
                quote(&a.streamer_symbol, Some(dec!(1)), Some(dec!(1))),
            ),
        ];
        let net = calc.net_price(&legs).unwrap();
        assert!(net.value.is_zero());
        assert_eq!(net.price_effect(), PriceEffect::Debit);
    }

    #[test]
    fn test_one_sided_quote_is_missing() {
        let calc = PriceCalculator::new(dec!(0.01));
        let a = option("250117C500");
        let legs = vec![(
            OrderLeg::new(a.clone(), Action::BuyToOpen, 1),
            quote(&a.streamer_symbol, Some(dec!(1.00)), None),
        )];
        let err = calc.net_price(&legs).unwrap_err();
        assert!(matches!(err, TradingError::MissingQuote(s) if s == a.streamer_symbol));
    }

    #[test]
    fn test_invalid_legs() {
        let calc = PriceCalculator::new(dec!(0.01));
        assert!(matches!(
            calc.net_price(&[]),
            Err(TradingError::InvalidOrder(_))
        ));

        let zero = OrderLeg::new(stock(), Action::Buy, 0);
        assert!(matches!(
            calc.net_price(&[(zero, quote("SPY", Some(dec!(1)), Some(dec!(1))))]),
            Err(TradingError::InvalidOrder(_))
        ));

        let wrong_side = OrderLeg::new(stock(), Action::BuyToOpen, 1);
        assert!(matches!(
            calc.net_price(&[(wrong_side, quote("SPY", Some(dec!(1)), Some(dec!(1))))]),
            Err(TradingError::InvalidOrder(_))
        ));

        let share_action_on_option = OrderLeg::new(option("250117C500"), Action::Sell, 1);
        assert!(matches!(
            calc.net_price(&[(
                share_action_on_option,
                quote(".SPY250117C500", Some(dec!(1)), Some(dec!(1)))
            )]),
            Err(TradingError::InvalidOrder(_))
        ));
    }

    #[test]
    fn test_snapshot_missing_leg() {
        let calc = PriceCalculator::new(dec!(0.01));
        let a = option("250117C500");
        let b = option("250117C510");
        let mut snapshot = CollectedSnapshot::new(
            EventKind::Quote,
            [a.streamer_symbol.clone(), b.streamer_symbol.clone()],
        );
        snapshot.record(FeedEvent::Quote(quote(
            &a.streamer_symbol,
            Some(dec!(1.95)),
            Some(dec!(2.05)),
        )));

        let legs = vec![
            OrderLeg::new(a, Action::BuyToOpen, 1),
            OrderLeg::new(b.clone(), Action::SellToOpen, 1),
        ];
        let err = calc.net_price_from_snapshot(&legs, &snapshot).unwrap_err();
        assert!(matches!(err, TradingError::MissingQuote(s) if s == b.streamer_symbol));
    }

    #[test]
    fn test_limit_order_from_snapshot() {
        let calc = PriceCalculator::new(dec!(0.01));
        let a = option("250117C500");
        let b = option("250117C510");
        let mut snapshot = CollectedSnapshot::new(
            EventKind::Quote,
            [a.streamer_symbol.clone(), b.streamer_symbol.clone()],
        );
        for (_, q) in spread(Action::SellToOpen, Action::BuyToOpen) {
            snapshot.record(FeedEvent::Quote(q));
        }

        let legs = vec![
            OrderLeg::new(a.clone(), Action::SellToOpen, 1),
            OrderLeg::new(b, Action::BuyToOpen, 1),
        ];
        let order = calc
            .net_price_from_snapshot(&legs, &snapshot)
            .unwrap()
            .to_limit_order(TimeInForce::Day);

        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.price, Some(dec!(1.50)));
        assert_eq!(order.price_effect, Some(PriceEffect::Credit));
        assert_eq!(order.legs.len(), 2);
        assert_eq!(order.legs[0].symbol, a.symbol);
        assert_eq!(order.legs[0].action, Action::SellToOpen);
    }
}
