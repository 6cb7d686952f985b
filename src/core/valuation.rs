use serde::Serialize;

use super::types::Portfolio;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Valuation {
    pub total_value: f64,
    pub total_cash: f64,
}

pub fn value_portfolio(portfolio: &Portfolio) -> Valuation {
    let mut total_cash = 0.0;
    let mut positions_value = 0.0;

    for account in &portfolio.accounts {
        total_cash += clean_cash(account.cash_balance);
        positions_value += account.positions.iter().map(|p| p.value()).sum::<f64>();
    }

    Valuation {
        total_value: total_cash + positions_value,
        total_cash,
    }
}

pub(crate) fn clean_cash(balance: f64) -> f64 {
    if balance.is_finite() {
        balance.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Account, Instrument, Position};

    fn position(symbol: &str, quantity: f64, price: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            quantity,
            current_price: None,
            instrument: Instrument {
                current_price: Some(price),
                ..Instrument::default()
            },
        }
    }

    #[test]
    fn sums_cash_and_positions_across_accounts() {
        let portfolio = Portfolio {
            accounts: vec![
                Account {
                    label: "Brokerage".to_string(),
                    cash_balance: 1_000.0,
                    positions: vec![position("SPY", 10.0, 500.0)],
                },
                Account {
                    label: "Roth IRA".to_string(),
                    cash_balance: 250.0,
                    positions: vec![position("BND", 20.0, 72.5)],
                },
            ],
        };

        let valuation = value_portfolio(&portfolio);
        assert_eq!(valuation.total_cash, 1_250.0);
        assert_eq!(valuation.total_value, 1_250.0 + 5_000.0 + 1_450.0);
    }

    #[test]
    fn negative_and_garbage_cash_count_as_zero() {
        let portfolio = Portfolio {
            accounts: vec![
                Account {
                    cash_balance: -500.0,
                    ..Account::default()
                },
                Account {
                    cash_balance: f64::NAN,
                    positions: vec![position("VTI", 1.0, 200.0)],
                    ..Account::default()
                },
            ],
        };

        let valuation = value_portfolio(&portfolio);
        assert_eq!(valuation.total_cash, 0.0);
        assert_eq!(valuation.total_value, 200.0);
    }

    #[test]
    fn empty_portfolio_is_zero() {
        assert_eq!(value_portfolio(&Portfolio::default()), Valuation::default());
    }
}
