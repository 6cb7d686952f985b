use std::collections::BTreeMap;

use serde::Serialize;

use super::types::{AssetClass, Instrument, Portfolio};
use super::valuation::{Valuation, clean_cash, value_portfolio};

// Fractions of total value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AllocationProfile {
    weights: BTreeMap<AssetClass, f64>,
}

impl AllocationProfile {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (AssetClass, f64)>,
    {
        let mut weights = BTreeMap::new();
        for (class, weight) in pairs {
            let weight = if weight.is_finite() { weight } else { 0.0 };
            *weights.entry(class).or_insert(0.0) += weight;
        }
        Self { weights }
    }

    pub fn weight(&self, class: AssetClass) -> f64 {
        self.weights.get(&class).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AssetClass, f64)> + '_ {
        self.weights.iter().map(|(class, weight)| (*class, *weight))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedPosition {
    pub account_index: usize,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub value: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub valuation: Valuation,
    pub positions: Vec<ClassifiedPosition>,
    pub profile: AllocationProfile,
}

// Strict maximum, so the first listed key keeps ties.
pub fn primary_asset_class(instrument: &Instrument) -> AssetClass {
    let mut best: Option<(AssetClass, f64)> = None;
    for &(class, weight) in &instrument.allocation {
        if !weight.is_finite() {
            continue;
        }
        match best {
            Some((_, best_weight)) if weight <= best_weight => {}
            _ => best = Some((class, weight)),
        }
    }

    match best {
        Some((class, _)) => class,
        None => AssetClass::from_instrument_type(instrument.instrument_type.as_deref().unwrap_or("")),
    }
}

pub fn classify(portfolio: &Portfolio) -> Classification {
    let valuation = value_portfolio(portfolio);
    let mut positions = Vec::new();
    let mut buckets: BTreeMap<AssetClass, f64> = BTreeMap::new();

    for (account_index, account) in portfolio.accounts.iter().enumerate() {
        *buckets.entry(AssetClass::Cash).or_insert(0.0) += clean_cash(account.cash_balance);

        for position in &account.positions {
            let value = position.value();
            spread_value(&position.instrument, value, &mut buckets);
            positions.push(ClassifiedPosition {
                account_index,
                symbol: position.symbol.clone(),
                asset_class: primary_asset_class(&position.instrument),
                value,
                price: super::types::resolve_price(position).max(0.0),
            });
        }
    }

    let profile = if valuation.total_value > 0.0 {
        AllocationProfile::from_pairs(
            buckets
                .into_iter()
                .map(|(class, value)| (class, value / valuation.total_value)),
        )
    } else {
        AllocationProfile::from_pairs(buckets.into_keys().map(|class| (class, 0.0)))
    };

    Classification {
        valuation,
        positions,
        profile,
    }
}

pub fn weighted_profile(portfolio: &Portfolio) -> AllocationProfile {
    classify(portfolio).profile
}

fn spread_value(instrument: &Instrument, value: f64, buckets: &mut BTreeMap<AssetClass, f64>) {
    let usable = instrument
        .allocation
        .iter()
        .filter(|(_, weight)| weight.is_finite() && *weight > 0.0);

    let mut spread_any = false;
    for &(class, weight) in usable {
        *buckets.entry(class).or_insert(0.0) += value * weight / 100.0;
        spread_any = true;
    }

    if !spread_any {
        *buckets.entry(primary_asset_class(instrument)).or_insert(0.0) += value;
    }
}
