use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::allocation::{AllocationProfile, classify};
use super::projection::ProjectionInputs;
use super::rebalance::RebalanceOptions;
use super::simulation::{MAX_HORIZON_YEARS, MarketShock, RetirementInputs};
use super::types::{Account, AssetClass, Instrument, Jurisdiction, Portfolio, Position};

pub fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

pub fn weight_pairs(value: Option<&Value>) -> Vec<(AssetClass, f64)> {
    let Some(map) = value.and_then(Value::as_object) else {
        return Vec::new();
    };
    map.iter()
        .map(|(key, weight)| (AssetClass::from_key(key), number(Some(weight)).unwrap_or(0.0)))
        .collect()
}

// Input order is kept; normalization happens in the rebalancer.
pub fn parse_targets(value: Option<&Value>) -> Vec<(AssetClass, f64)> {
    weight_pairs(value)
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(number(Some(&value)))
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn lenient_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    let flag = match Value::deserialize(d)? {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    };
    Ok(flag)
}

fn lenient_seed<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(Value::deserialize(d)?.as_u64())
}

fn lenient_weights<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<(AssetClass, f64)>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(weight_pairs(Some(&value)))
}

fn lenient_weight_map<'de, D>(d: D) -> Result<Option<Vec<(AssetClass, f64)>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(d)?;
    Ok(value.is_object().then(|| weight_pairs(Some(&value))))
}

fn lenient_portfolio<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Portfolio>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok((value.is_object() || value.is_array()).then(|| Portfolio::from_json(&value)))
}

fn lenient<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(d)?;
    Ok(read(&value))
}

fn lenient_list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(d)?;
    Ok(entries(&value))
}

fn read<T: DeserializeOwned + Default>(value: &Value) -> T {
    T::deserialize(value).unwrap_or_default()
}

// Entries that are not records are skipped.
fn entries<T: DeserializeOwned>(value: &Value) -> Vec<T> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .filter_map(|item| T::deserialize(item).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn magnitude(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| *v >= 0.0).unwrap_or(default)
}

fn whole(value: Option<f64>, default: u32) -> u32 {
    value
        .filter(|v| *v >= 0.0)
        .map(|v| v.floor().min(u32::MAX as f64) as u32)
        .unwrap_or(default)
}

fn horizon(value: Option<f64>, default: u32) -> u32 {
    whole(value, default).min(MAX_HORIZON_YEARS)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InstrumentPayload {
    #[serde(deserialize_with = "lenient_number")]
    current_price: Option<f64>,
    #[serde(deserialize_with = "lenient_weights")]
    allocation_asset_class: Vec<(AssetClass, f64)>,
    #[serde(deserialize_with = "lenient_text")]
    instrument_type: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient_text")]
    kind: Option<String>,
}

impl From<InstrumentPayload> for Instrument {
    fn from(payload: InstrumentPayload) -> Self {
        let mut instrument = Instrument {
            current_price: payload.current_price,
            allocation: Vec::new(),
            instrument_type: payload.instrument_type.or(payload.kind),
        };
        for (class, weight) in payload.allocation_asset_class {
            instrument.add_weight(class, weight);
        }
        instrument
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PositionPayload {
    #[serde(deserialize_with = "lenient_text")]
    symbol: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    quantity: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    current_price: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    instrument: InstrumentPayload,
}

impl From<PositionPayload> for Position {
    fn from(payload: PositionPayload) -> Self {
        Position {
            symbol: payload
                .symbol
                .map(|s| s.trim().to_ascii_uppercase())
                .unwrap_or_default(),
            quantity: magnitude(payload.quantity, 0.0),
            current_price: payload.current_price,
            instrument: payload.instrument.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AccountPayload {
    #[serde(deserialize_with = "lenient_number")]
    cash_balance: Option<f64>,
    #[serde(deserialize_with = "lenient_text")]
    name: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient_text")]
    kind: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    account_name: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    positions: Vec<PositionPayload>,
}

impl From<AccountPayload> for Account {
    fn from(payload: AccountPayload) -> Self {
        let label = [payload.name, payload.kind, payload.account_name]
            .iter()
            .flatten()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Account {
            label,
            cash_balance: payload.cash_balance.unwrap_or(0.0),
            positions: payload.positions.into_iter().map(Position::from).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PortfolioPayload {
    #[serde(deserialize_with = "lenient_list")]
    accounts: Vec<AccountPayload>,
}

impl Portfolio {
    // `{accounts: [...]}` or a bare array of accounts.
    pub fn from_json(value: &Value) -> Self {
        let accounts: Vec<AccountPayload> = match value {
            Value::Array(_) => entries(value),
            other => read::<PortfolioPayload>(other).accounts,
        };
        Portfolio {
            accounts: accounts.into_iter().map(Account::from).collect(),
        }
    }
}

impl AllocationProfile {
    pub fn from_json(value: Option<&Value>) -> Self {
        AllocationProfile::from_pairs(weight_pairs(value))
    }
}

fn jurisdiction(code: Option<&str>) -> Jurisdiction {
    match code.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
        Some("UK" | "GB") => Jurisdiction::Uk,
        _ => Jurisdiction::Us,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OptionsPayload {
    #[serde(deserialize_with = "lenient_number")]
    drift_band_pct: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    max_turnover_pct: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    transaction_cost_bps: Option<f64>,
    #[serde(deserialize_with = "lenient_flag")]
    cash_only: Option<bool>,
    #[serde(deserialize_with = "lenient_text")]
    jurisdiction: Option<String>,
}

impl RebalanceOptions {
    pub fn from_json(value: Option<&Value>) -> Self {
        let defaults = RebalanceOptions::default();
        let payload: OptionsPayload = value.map(read).unwrap_or_default();
        RebalanceOptions {
            drift_band_pct: magnitude(payload.drift_band_pct, defaults.drift_band_pct),
            max_turnover_pct: magnitude(payload.max_turnover_pct, defaults.max_turnover_pct),
            transaction_cost_bps: magnitude(
                payload.transaction_cost_bps,
                defaults.transaction_cost_bps,
            ),
            cash_only: payload.cash_only.unwrap_or(defaults.cash_only),
            jurisdiction: jurisdiction(payload.jurisdiction.as_deref()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShockPayload {
    #[serde(deserialize_with = "lenient_number")]
    year: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    year_index: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    loss_pct: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pct: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    drop_pct: Option<f64>,
}

impl ShockPayload {
    fn into_shock(self) -> Option<MarketShock> {
        Some(MarketShock {
            year: self.year.or(self.year_index)?.trunc() as i64,
            loss_pct: self.loss_pct.or(self.pct).or(self.drop_pct)?,
        })
    }
}

impl MarketShock {
    pub fn from_json(value: Option<&Value>) -> Option<Self> {
        value.map(read::<ShockPayload>)?.into_shock()
    }
}

// Fields shared by the simulation and projection requests.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlanPayload {
    #[serde(deserialize_with = "lenient_number")]
    current_value: Option<f64>,
    #[serde(deserialize_with = "lenient_portfolio")]
    portfolio: Option<Portfolio>,
    #[serde(deserialize_with = "lenient_weight_map")]
    asset_allocation: Option<Vec<(AssetClass, f64)>>,
    #[serde(deserialize_with = "lenient_weight_map")]
    allocation: Option<Vec<(AssetClass, f64)>>,
    #[serde(deserialize_with = "lenient_number")]
    years_until_retirement: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    years_to_retirement: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    annual_contribution: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    contribution: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    target_annual_income: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    num_simulations: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    shock: ShockPayload,
    #[serde(deserialize_with = "lenient_number")]
    return_shift: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    volatility_mult: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    inflation_rate: Option<f64>,
    #[serde(deserialize_with = "lenient_seed")]
    seed: Option<u64>,
    #[serde(deserialize_with = "lenient_number")]
    current_age: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    retirement_years: Option<f64>,
}

impl PlanPayload {
    // Explicit value and allocation win over the embedded portfolio.
    fn value_and_allocation(&mut self) -> (f64, AllocationProfile) {
        let embedded = self.portfolio.take().map(|p| classify(&p));
        let current_value = self
            .current_value
            .or(embedded.as_ref().map(|c| c.valuation.total_value))
            .unwrap_or(0.0)
            .max(0.0);

        let explicit = self.asset_allocation.take().or(self.allocation.take());
        let allocation = match (explicit, embedded) {
            (Some(pairs), _) => AllocationProfile::from_pairs(pairs),
            (None, Some(classification)) => classification.profile,
            (None, None) => AllocationProfile::default(),
        };
        (current_value, allocation)
    }

    fn years_to_retirement(&self) -> u32 {
        horizon(self.years_until_retirement.or(self.years_to_retirement), 0)
    }

    fn contribution(&self, default: f64) -> f64 {
        self.annual_contribution.or(self.contribution).unwrap_or(default)
    }
}

impl RetirementInputs {
    pub fn from_json(value: &Value) -> Self {
        let defaults = RetirementInputs::default();
        let mut payload: PlanPayload = read(value);
        let (current_value, allocation) = payload.value_and_allocation();
        RetirementInputs {
            current_value,
            years_to_retirement: payload.years_to_retirement(),
            target_annual_income: magnitude(payload.target_annual_income, 0.0),
            allocation,
            annual_contribution: payload.contribution(defaults.annual_contribution),
            num_simulations: whole(payload.num_simulations, defaults.num_simulations),
            shock: payload.shock.into_shock(),
            return_shift: payload.return_shift.unwrap_or(defaults.return_shift),
            volatility_mult: magnitude(payload.volatility_mult, defaults.volatility_mult),
            inflation_rate: payload.inflation_rate.unwrap_or(defaults.inflation_rate),
            seed: payload.seed,
        }
    }
}

impl ProjectionInputs {
    pub fn from_json(value: &Value) -> Self {
        let defaults = ProjectionInputs::default();
        let mut payload: PlanPayload = read(value);
        let (current_value, allocation) = payload.value_and_allocation();
        ProjectionInputs {
            current_value,
            years_to_retirement: payload.years_to_retirement(),
            allocation,
            current_age: whole(payload.current_age, defaults.current_age),
            annual_contribution: payload.contribution(defaults.annual_contribution),
            retirement_years: horizon(payload.retirement_years, defaults.retirement_years),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn portfolio_parses_nested_and_position_level_prices() {
        let raw = json!({
            "accounts": [{
                "cash_balance": "1,500.50",
                "name": "Joint",
                "type": "Brokerage",
                "positions": [
                    {"symbol": " spy ", "quantity": 10, "instrument": {
                        "current_price": 500,
                        "allocation_asset_class": {"equity": 100}
                    }},
                    {"symbol": "bnd", "quantity": "3", "current_price": 72.0,
                     "instrument": {"current_price": 70.0, "instrument_type": "bond"}}
                ]
            }]
        });

        let portfolio = Portfolio::from_json(&raw);
        let account = &portfolio.accounts[0];
        assert_eq!(account.label, "Joint Brokerage");
        assert_eq!(account.cash_balance, 1_500.5);
        assert_eq!(account.positions[0].symbol, "SPY");
        assert_eq!(account.positions[0].value(), 5_000.0);
        assert_eq!(account.positions[1].value(), 216.0);
        assert_eq!(
            account.positions[1].instrument.instrument_type.as_deref(),
            Some("bond")
        );
    }

    #[test]
    fn garbage_fields_fall_back_to_zero() {
        let raw = json!([{
            "cash_balance": "lots",
            "name": 7,
            "positions": [
                {"symbol": 42, "quantity": -5, "instrument": {"current_price": "n/a"}},
                "not a position",
                {"symbol": "VTI", "instrument": "broken"}
            ]
        }, "not an account"]);

        let portfolio = Portfolio::from_json(&raw);
        assert_eq!(portfolio.accounts.len(), 1);
        let account = &portfolio.accounts[0];
        assert_eq!(account.label, "");
        assert_eq!(account.cash_balance, 0.0);
        assert_eq!(account.positions.len(), 2);
        assert_eq!(account.positions[0].symbol, "");
        assert_eq!(account.positions[0].quantity, 0.0);
        assert_eq!(account.positions[0].value(), 0.0);
        assert_eq!(account.positions[1].symbol, "VTI");
        assert_eq!(account.positions[1].instrument, Instrument::default());
    }

    #[test]
    fn non_object_portfolio_is_empty() {
        assert_eq!(Portfolio::from_json(&json!("nope")), Portfolio::default());
        assert_eq!(Portfolio::from_json(&json!({"accounts": 3})), Portfolio::default());
    }

    #[test]
    fn allocation_keys_keep_input_order() {
        let raw = json!({"fixed_income": 50, "equity": 50, "gold": "x"});
        assert_eq!(
            weight_pairs(Some(&raw)),
            vec![
                (AssetClass::FixedIncome, 50.0),
                (AssetClass::Equity, 50.0),
                (AssetClass::Other, 0.0),
            ]
        );
    }

    #[test]
    fn rebalance_options_fall_back_to_defaults() {
        let options = RebalanceOptions::from_json(Some(&json!({
            "drift_band_pct": -3,
            "max_turnover_pct": "35",
            "transaction_cost_bps": null,
            "cash_only": "false",
            "jurisdiction": "uk"
        })));

        assert_eq!(options.drift_band_pct, 5.0);
        assert_eq!(options.max_turnover_pct, 35.0);
        assert_eq!(options.transaction_cost_bps, 10.0);
        assert!(!options.cash_only);
        assert_eq!(options.jurisdiction, Jurisdiction::Uk);

        assert_eq!(RebalanceOptions::from_json(None), RebalanceOptions::default());
        assert_eq!(
            RebalanceOptions::from_json(Some(&json!("fast"))),
            RebalanceOptions::default()
        );
    }

    #[test]
    fn retirement_inputs_derive_value_from_embedded_portfolio() {
        let raw = json!({
            "years_until_retirement": 10,
            "target_annual_income": 40000,
            "portfolio": {"accounts": [{"cash_balance": 25000, "positions": []}]},
            "shock": {"year": 2, "loss_pct": 0.3},
            "seed": 7
        });

        let inputs = RetirementInputs::from_json(&raw);
        assert_eq!(inputs.current_value, 25_000.0);
        assert_eq!(inputs.years_to_retirement, 10);
        assert_eq!(inputs.allocation.weight(AssetClass::Cash), 1.0);
        assert_eq!(
            inputs.shock,
            Some(MarketShock {
                year: 2,
                loss_pct: 0.3
            })
        );
        assert_eq!(inputs.seed, Some(7));
    }

    #[test]
    fn shock_aliases_and_incomplete_shocks() {
        assert_eq!(
            MarketShock::from_json(Some(&json!({"year_index": "3.7", "drop_pct": 0.2}))),
            Some(MarketShock {
                year: 3,
                loss_pct: 0.2
            })
        );
        assert_eq!(MarketShock::from_json(Some(&json!({"year": 1}))), None);
        assert_eq!(MarketShock::from_json(Some(&json!("crash"))), None);
    }

    #[test]
    fn projection_inputs_use_defaults() {
        let inputs = ProjectionInputs::from_json(&json!({
            "current_value": 100000,
            "asset_allocation": {"equity": 1.0}
        }));
        assert_eq!(inputs.retirement_years, 30);
        assert_eq!(inputs.current_age, 30);
        assert_eq!(inputs.years_to_retirement, 0);
        assert_eq!(inputs.allocation.weight(AssetClass::Equity), 1.0);
    }

    #[test]
    fn year_counts_are_capped_at_the_horizon() {
        let raw = json!({
            "current_value": 1000,
            "years_to_retirement": 9e18,
            "retirement_years": 4_000_000_000u64,
            "num_simulations": 5
        });

        let projection = ProjectionInputs::from_json(&raw);
        assert_eq!(projection.years_to_retirement, MAX_HORIZON_YEARS);
        assert_eq!(projection.retirement_years, MAX_HORIZON_YEARS);

        let retirement = RetirementInputs::from_json(&raw);
        assert_eq!(retirement.years_to_retirement, MAX_HORIZON_YEARS);
        assert_eq!(retirement.num_simulations, 5);
    }
}
