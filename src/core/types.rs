use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    FixedIncome,
    RealEstate,
    Commodities,
    Cash,
    Other,
}

impl AssetClass {
    pub const ALL: [AssetClass; 6] = [
        AssetClass::Equity,
        AssetClass::FixedIncome,
        AssetClass::RealEstate,
        AssetClass::Commodities,
        AssetClass::Cash,
        AssetClass::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AssetClass::Equity => "equity",
            AssetClass::FixedIncome => "fixed_income",
            AssetClass::RealEstate => "real_estate",
            AssetClass::Commodities => "commodities",
            AssetClass::Cash => "cash",
            AssetClass::Other => "other",
        }
    }

    // Case and separators are ignored.
    pub fn from_key(key: &str) -> Self {
        match squash(key).as_str() {
            "equity" | "equities" | "stock" | "stocks" => AssetClass::Equity,
            "fixedincome" | "bond" | "bonds" => AssetClass::FixedIncome,
            "realestate" | "reit" | "reits" | "property" => AssetClass::RealEstate,
            "commodities" | "commodity" => AssetClass::Commodities,
            "cash" | "moneymarket" => AssetClass::Cash,
            _ => AssetClass::Other,
        }
    }

    pub fn from_instrument_type(kind: &str) -> Self {
        let kind = kind.to_ascii_lowercase();
        if kind.contains("bond") || kind.contains("fixed") {
            AssetClass::FixedIncome
        } else if kind.contains("cash") {
            AssetClass::Cash
        } else {
            AssetClass::Equity
        }
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn squash(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Jurisdiction {
    #[default]
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "UK")]
    Uk,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxBucket {
    TaxFree,
    TaxDeferred,
    Taxable,
    Unknown,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Accumulation,
    Retirement,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instrument {
    pub current_price: Option<f64>,
    // Percentage points, in input order.
    pub allocation: Vec<(AssetClass, f64)>,
    pub instrument_type: Option<String>,
}

impl Instrument {
    pub fn add_weight(&mut self, class: AssetClass, weight: f64) {
        match self.allocation.iter_mut().find(|(c, _)| *c == class) {
            Some((_, existing)) => *existing += weight,
            None => self.allocation.push((class, weight)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub current_price: Option<f64>,
    pub instrument: Instrument,
}

impl Position {
    pub fn value(&self) -> f64 {
        let value = self.quantity * resolve_price(self);
        if value.is_finite() { value.max(0.0) } else { 0.0 }
    }
}

pub fn resolve_price(position: &Position) -> f64 {
    position
        .current_price
        .filter(|p| p.is_finite())
        .or(position.instrument.current_price.filter(|p| p.is_finite()))
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    pub label: String,
    pub cash_balance: f64,
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Portfolio {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub symbol: String,
    pub action: TradeAction,
    pub asset_class: AssetClass,
    pub estimated_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_quantity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub success_rate: f64,
    pub expected_value_at_retirement: f64,
    pub percentile_10: f64,
    pub median_final_value: f64,
    pub percentile_90: f64,
    pub average_years_lasted: f64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionPoint {
    pub age: u32,
    pub portfolio_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annual_income: Option<f64>,
    pub phase: Phase,
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_class_keys_accept_aliases() {
        assert_eq!(AssetClass::from_key("Fixed-Income"), AssetClass::FixedIncome);
        assert_eq!(AssetClass::from_key("bonds"), AssetClass::FixedIncome);
        assert_eq!(AssetClass::from_key("REITs"), AssetClass::RealEstate);
        assert_eq!(AssetClass::from_key("crypto"), AssetClass::Other);
    }

    #[test]
    fn instrument_type_heuristic_defaults_to_equity() {
        assert_eq!(AssetClass::from_instrument_type("Bond ETF"), AssetClass::FixedIncome);
        assert_eq!(AssetClass::from_instrument_type("fixed income fund"), AssetClass::FixedIncome);
        assert_eq!(AssetClass::from_instrument_type("Cash sweep"), AssetClass::Cash);
        assert_eq!(AssetClass::from_instrument_type("mutual fund"), AssetClass::Equity);
    }

    #[test]
    fn resolve_price_prefers_position_level_value() {
        let mut position = Position {
            symbol: "SPY".to_string(),
            quantity: 2.0,
            current_price: Some(510.0),
            instrument: Instrument {
                current_price: Some(500.0),
                ..Instrument::default()
            },
        };
        assert_eq!(resolve_price(&position), 510.0);

        position.current_price = None;
        assert_eq!(resolve_price(&position), 500.0);

        position.instrument.current_price = Some(f64::NAN);
        assert_eq!(resolve_price(&position), 0.0);
        assert_eq!(position.value(), 0.0);
    }

    #[test]
    fn negative_value_is_floored() {
        let position = Position {
            symbol: "X".to_string(),
            quantity: 3.0,
            current_price: Some(-4.0),
            instrument: Instrument::default(),
        };
        assert_eq!(position.value(), 0.0);
    }

    #[test]
    fn add_weight_merges_duplicate_classes() {
        let mut instrument = Instrument::default();
        instrument.add_weight(AssetClass::Other, 10.0);
        instrument.add_weight(AssetClass::Equity, 60.0);
        instrument.add_weight(AssetClass::Other, 30.0);
        assert_eq!(
            instrument.allocation,
            vec![(AssetClass::Other, 40.0), (AssetClass::Equity, 60.0)]
        );
    }
}
