use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::allocation::{ClassifiedPosition, classify};
use super::types::{
    Account, AssetClass, Jurisdiction, Portfolio, TaxBucket, Trade, TradeAction, round_to, squash,
};
use super::valuation::Valuation;

// Trades below half a cent are dropped.
const MIN_TRADE_VALUE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RebalanceOptions {
    pub drift_band_pct: f64,
    pub max_turnover_pct: f64,
    pub transaction_cost_bps: f64,
    pub cash_only: bool,
    pub jurisdiction: Jurisdiction,
}

impl Default for RebalanceOptions {
    fn default() -> Self {
        Self {
            drift_band_pct: 5.0,
            max_turnover_pct: 20.0,
            transaction_cost_bps: 10.0,
            cash_only: true,
            jurisdiction: Jurisdiction::Us,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RebalanceError {
    #[error("No asset class targets configured.")]
    NoTargets,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationComparison {
    pub current_pct: BTreeMap<AssetClass, f64>,
    pub target_pct: BTreeMap<AssetClass, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceReport {
    pub enabled: bool,
    pub jurisdiction: Jurisdiction,
    pub options: RebalanceOptions,
    pub portfolio: Valuation,
    pub tax_buckets_detected: BTreeMap<TaxBucket, usize>,
    pub asset_class_allocation: AllocationComparison,
    pub trades: Vec<Trade>,
    pub estimated_transaction_cost: f64,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisabledRebalance {
    pub enabled: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RebalanceOutcome {
    Enabled(Box<RebalanceReport>),
    Disabled(DisabledRebalance),
}

impl RebalanceOutcome {
    pub fn report(&self) -> Option<&RebalanceReport> {
        match self {
            RebalanceOutcome::Enabled(report) => Some(report),
            RebalanceOutcome::Disabled(_) => None,
        }
    }
}

pub fn rebalance(
    portfolio: &Portfolio,
    targets: &[(AssetClass, f64)],
    options: &RebalanceOptions,
) -> RebalanceOutcome {
    match try_rebalance(portfolio, targets, options) {
        Ok(report) => RebalanceOutcome::Enabled(Box::new(report)),
        Err(err) => RebalanceOutcome::Disabled(DisabledRebalance {
            enabled: false,
            error: err.to_string(),
        }),
    }
}

pub fn normalize_targets(
    targets: &[(AssetClass, f64)],
) -> Result<BTreeMap<AssetClass, f64>, RebalanceError> {
    let mut merged: BTreeMap<AssetClass, f64> = BTreeMap::new();
    for &(class, pct) in targets {
        if pct.is_finite() && pct > 0.0 {
            *merged.entry(class).or_insert(0.0) += pct;
        }
    }

    let total: f64 = merged.values().sum();
    if merged.is_empty() || total <= 0.0 {
        return Err(RebalanceError::NoTargets);
    }
    for pct in merged.values_mut() {
        *pct = *pct / total * 100.0;
    }
    Ok(merged)
}

#[derive(Debug, Clone)]
struct Holding {
    symbol: String,
    value: f64,
    price: f64,
}

#[derive(Debug, Clone, Copy)]
struct Need {
    class: AssetClass,
    remaining: f64,
}

struct TradeBook<'a> {
    jurisdiction: Jurisdiction,
    holdings: &'a BTreeMap<AssetClass, Vec<Holding>>,
    trades: Vec<Trade>,
    placeholders: Vec<(AssetClass, &'static str)>,
}

impl TradeBook<'_> {
    fn buy(&mut self, class: AssetClass, value: f64) {
        let value = round_to(value, 2);
        if value < MIN_TRADE_VALUE {
            return;
        }

        let existing = self
            .holdings
            .get(&class)
            .and_then(|list| list.iter().find(|h| !h.symbol.is_empty()));
        let (symbol, price) = match existing {
            Some(holding) => (holding.symbol.clone(), holding.price),
            None => {
                let symbol = placeholder_symbol(self.jurisdiction, class);
                if !self.placeholders.iter().any(|(c, _)| *c == class) {
                    self.placeholders.push((class, symbol));
                }
                (symbol.to_string(), 0.0)
            }
        };
        self.push(symbol, TradeAction::Buy, class, value, price);
    }

    // Largest holding first; returns the amount actually sold.
    fn sell(&mut self, class: AssetClass, amount: f64) -> f64 {
        let book = self.holdings;
        let Some(holdings) = book.get(&class) else {
            return 0.0;
        };
        let mut left = amount;
        let mut sold = 0.0;
        for holding in holdings.iter().filter(|h| !h.symbol.is_empty()) {
            if left < MIN_TRADE_VALUE {
                break;
            }
            let value = round_to(left.min(holding.value), 2);
            if value < MIN_TRADE_VALUE {
                continue;
            }
            self.push(holding.symbol.clone(), TradeAction::Sell, class, value, holding.price);
            left -= value;
            sold += value;
        }
        sold
    }

    fn push(&mut self, symbol: String, action: TradeAction, class: AssetClass, value: f64, price: f64) {
        let (estimated_price, estimated_quantity) = if price > 0.0 {
            (Some(round_to(price, 4)), Some(round_to(value / price, 4)))
        } else {
            (None, None)
        };
        debug!(%symbol, ?action, asset_class = %class, value, "trade");
        self.trades.push(Trade {
            symbol,
            action,
            asset_class: class,
            estimated_value: value,
            estimated_price,
            estimated_quantity,
        });
    }
}

pub fn try_rebalance(
    portfolio: &Portfolio,
    targets: &[(AssetClass, f64)],
    options: &RebalanceOptions,
) -> Result<RebalanceReport, RebalanceError> {
    let targets = normalize_targets(targets)?;
    let classification = classify(portfolio);
    let valuation = classification.valuation;
    let total_value = valuation.total_value;

    let current = current_totals(&classification.positions, valuation.total_cash);
    let holdings = holdings_by_class(&classification.positions);

    let band = options.drift_band_pct / 100.0 * total_value;
    let mut needs = Vec::new();
    let mut excesses = Vec::new();
    let classes = current.keys().chain(targets.keys()).copied().collect::<BTreeSet<_>>();
    for class in classes {
        let target_value = targets.get(&class).copied().unwrap_or(0.0) / 100.0 * total_value;
        let delta = target_value - current.get(&class).copied().unwrap_or(0.0);
        if delta > band {
            needs.push(Need { class, remaining: delta });
        } else if delta < -band {
            excesses.push((class, -delta));
        }
    }
    debug!(total_value, band, buys = needs.len(), sells = excesses.len(), "drift evaluated");

    let mut book = TradeBook {
        jurisdiction: options.jurisdiction,
        holdings: &holdings,
        trades: Vec::new(),
        placeholders: Vec::new(),
    };

    let reserved_cash = targets.get(&AssetClass::Cash).copied().unwrap_or(0.0) / 100.0 * total_value;
    let cash_class_total = current.get(&AssetClass::Cash).copied().unwrap_or(0.0);
    let investable_cash = valuation
        .total_cash
        .min((cash_class_total - reserved_cash).max(0.0));
    let spent = fund_from_cash(&mut book, &mut needs, investable_cash);

    // Account cash carries no symbol, so only held positions can be sold.
    for (class, excess) in excesses.iter_mut() {
        if *class == AssetClass::Cash {
            *excess -= spent;
        }
        *excess = excess.min(sellable_value(&holdings, *class));
    }
    excesses.retain(|(_, excess)| *excess >= MIN_TRADE_VALUE);

    let mut notes = Vec::new();
    if options.cash_only {
        if !excesses.is_empty() {
            notes.push(
                "cash_only is enabled: overweight asset classes were not sold; disable it to allow sell-and-rebuy trades."
                    .to_string(),
            );
        }
    } else {
        let turnover_budget = options.max_turnover_pct / 100.0 * total_value;
        if sell_and_rebuy(&mut book, &mut needs, &mut excesses, turnover_budget) {
            notes.push(format!(
                "Sells were capped by the {:.1}% turnover limit; some drift remains.",
                options.max_turnover_pct
            ));
        }
    }

    let TradeBook {
        trades, placeholders, ..
    } = book;

    for (class, symbol) in &placeholders {
        notes.push(format!(
            "No existing {class} holding found; {symbol} is a placeholder symbol, substitute your preferred fund."
        ));
    }
    notes.extend(tax_guidance(options.jurisdiction).iter().map(|s| s.to_string()));

    let traded: f64 = trades.iter().map(|t| t.estimated_value.abs()).sum();
    let estimated_transaction_cost = round_to(options.transaction_cost_bps / 10_000.0 * traded, 2);

    info!(
        trades = trades.len(),
        total_value,
        estimated_transaction_cost,
        "rebalance complete"
    );

    Ok(RebalanceReport {
        enabled: true,
        jurisdiction: options.jurisdiction,
        options: *options,
        portfolio: Valuation {
            total_value: round_to(total_value, 2),
            total_cash: round_to(valuation.total_cash, 2),
        },
        tax_buckets_detected: count_tax_buckets(&portfolio.accounts, options.jurisdiction),
        asset_class_allocation: AllocationComparison {
            current_pct: percentages(&current, total_value),
            target_pct: targets.iter().map(|(class, pct)| (*class, round_to(*pct, 2))).collect(),
        },
        trades,
        estimated_transaction_cost,
        notes,
    })
}

fn fund_from_cash(book: &mut TradeBook<'_>, needs: &mut [Need], investable_cash: f64) -> f64 {
    let total_need: f64 = needs
        .iter()
        .filter(|n| n.class != AssetClass::Cash)
        .map(|n| n.remaining)
        .sum();
    if investable_cash <= 0.0 || total_need <= 0.0 {
        return 0.0;
    }

    needs.sort_by(|a, b| b.remaining.total_cmp(&a.remaining));
    let mut cash_left = investable_cash;
    for need in needs.iter_mut().filter(|n| n.class != AssetClass::Cash) {
        let share = investable_cash * need.remaining / total_need;
        let amount = share.min(need.remaining).min(cash_left);
        if amount < MIN_TRADE_VALUE {
            continue;
        }
        book.buy(need.class, amount);
        need.remaining -= amount;
        cash_left -= amount;
    }
    let spent = investable_cash - cash_left;
    debug!(spent, "cash deployed");
    spent
}

// True when the turnover budget cut a sell short.
fn sell_and_rebuy(
    book: &mut TradeBook<'_>,
    needs: &mut [Need],
    excesses: &mut [(AssetClass, f64)],
    turnover_budget: f64,
) -> bool {
    excesses.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut turnover_left = turnover_budget.max(0.0);
    let mut capped = false;

    for &(class, excess) in excesses.iter() {
        let need_left: f64 = needs.iter().map(|n| n.remaining.max(0.0)).sum();
        let wanted = excess.min(need_left);
        if wanted < MIN_TRADE_VALUE {
            continue;
        }
        if wanted > turnover_left {
            capped = true;
        }
        let amount = wanted.min(turnover_left);
        if amount < MIN_TRADE_VALUE {
            continue;
        }

        let sold = book.sell(class, amount);
        turnover_left -= sold;

        let mut proceeds = sold;
        while proceeds >= MIN_TRADE_VALUE {
            let Some(need) = needs
                .iter_mut()
                .filter(|n| n.remaining >= MIN_TRADE_VALUE)
                .max_by(|a, b| a.remaining.total_cmp(&b.remaining))
            else {
                break;
            };
            let amount = proceeds.min(need.remaining);
            book.buy(need.class, amount);
            need.remaining -= amount;
            proceeds -= amount;
        }
    }
    capped
}

fn current_totals(positions: &[ClassifiedPosition], total_cash: f64) -> BTreeMap<AssetClass, f64> {
    let mut totals = BTreeMap::new();
    if total_cash > 0.0 {
        totals.insert(AssetClass::Cash, total_cash);
    }
    for position in positions {
        *totals.entry(position.asset_class).or_insert(0.0) += position.value;
    }
    totals
}

fn holdings_by_class(positions: &[ClassifiedPosition]) -> BTreeMap<AssetClass, Vec<Holding>> {
    let mut merged: BTreeMap<AssetClass, Vec<Holding>> = BTreeMap::new();
    for position in positions {
        let list = merged.entry(position.asset_class).or_default();
        match list.iter_mut().find(|h| h.symbol == position.symbol) {
            Some(holding) => {
                holding.value += position.value;
                if holding.price <= 0.0 {
                    holding.price = position.price;
                }
            }
            None => list.push(Holding {
                symbol: position.symbol.clone(),
                value: position.value,
                price: position.price,
            }),
        }
    }
    for list in merged.values_mut() {
        list.sort_by(|a, b| b.value.total_cmp(&a.value));
    }
    merged
}

fn sellable_value(holdings: &BTreeMap<AssetClass, Vec<Holding>>, class: AssetClass) -> f64 {
    holdings
        .get(&class)
        .map(|list| {
            list.iter()
                .filter(|h| !h.symbol.is_empty())
                .map(|h| h.value)
                .sum()
        })
        .unwrap_or(0.0)
}

fn percentages(totals: &BTreeMap<AssetClass, f64>, total_value: f64) -> BTreeMap<AssetClass, f64> {
    totals
        .iter()
        .map(|(class, value)| {
            let pct = if total_value > 0.0 {
                value / total_value * 100.0
            } else {
                0.0
            };
            (*class, round_to(pct, 2))
        })
        .collect()
}

pub fn placeholder_symbol(jurisdiction: Jurisdiction, class: AssetClass) -> &'static str {
    match (jurisdiction, class) {
        (_, AssetClass::Cash) => "CASH",
        (Jurisdiction::Us, AssetClass::Equity) => "VTI",
        (Jurisdiction::Us, AssetClass::FixedIncome) => "BND",
        (Jurisdiction::Us, AssetClass::RealEstate) => "VNQ",
        (Jurisdiction::Us, AssetClass::Commodities) => "DBC",
        (Jurisdiction::Us, AssetClass::Other) => "VT",
        (Jurisdiction::Uk, AssetClass::Equity) => "VWRL",
        (Jurisdiction::Uk, AssetClass::FixedIncome) => "AGGG",
        (Jurisdiction::Uk, AssetClass::RealEstate) => "IWDP",
        (Jurisdiction::Uk, AssetClass::Commodities) => "CMOD",
        (Jurisdiction::Uk, AssetClass::Other) => "VWRL",
    }
}

pub fn tax_bucket(label: &str, jurisdiction: Jurisdiction) -> TaxBucket {
    let tokens = label_tokens(label);
    let any = |pred: fn(&str) -> bool| tokens.iter().any(|t| pred(t));
    match jurisdiction {
        Jurisdiction::Us => {
            if any(|t| t.starts_with("roth")) {
                TaxBucket::TaxFree
            } else if any(|t| {
                matches!(t, "401k" | "403b" | "457b" | "ira" | "sepira" | "simpleira")
                    || t.starts_with("traditional")
            }) {
                TaxBucket::TaxDeferred
            } else if any(|t| matches!(t, "taxable" | "brokerage")) {
                TaxBucket::Taxable
            } else {
                TaxBucket::Unknown
            }
        }
        Jurisdiction::Uk => {
            if any(|t| matches!(t, "isa" | "lisa" | "jisa")) {
                TaxBucket::TaxFree
            } else if any(|t| t.starts_with("sipp") || t.starts_with("pension") || t == "workplace") {
                TaxBucket::TaxDeferred
            } else if any(|t| matches!(t, "gia" | "general" | "taxable" | "brokerage")) {
                TaxBucket::Taxable
            } else {
                TaxBucket::Unknown
            }
        }
    }
}

// Words of an account label; hyphens and brackets stay inside a word ("401-k", "403(b)").
fn label_tokens(label: &str) -> Vec<String> {
    label
        .split(|c: char| c.is_whitespace() || matches!(c, '_' | '/' | ',' | '&' | '.' | '+' | ':'))
        .map(squash)
        .filter(|t| !t.is_empty())
        .collect()
}

fn count_tax_buckets(accounts: &[Account], jurisdiction: Jurisdiction) -> BTreeMap<TaxBucket, usize> {
    let mut counts = BTreeMap::from([
        (TaxBucket::TaxFree, 0),
        (TaxBucket::TaxDeferred, 0),
        (TaxBucket::Taxable, 0),
        (TaxBucket::Unknown, 0),
    ]);
    for account in accounts {
        *counts.entry(tax_bucket(&account.label, jurisdiction)).or_insert(0) += 1;
    }
    counts
}

fn tax_guidance(jurisdiction: Jurisdiction) -> &'static [&'static str] {
    match jurisdiction {
        Jurisdiction::Us => &[
            "Prefer rebalancing inside 401(k)/IRA accounts, where trades do not realize capital gains.",
            "Hold bonds and other income-heavy assets in tax-deferred accounts; keep the highest-growth assets in Roth accounts.",
            "Sells in taxable brokerage accounts may realize capital gains; check cost basis and holding periods first.",
        ],
        Jurisdiction::Uk => &[
            "Prefer rebalancing inside ISAs and SIPPs, where gains and income are sheltered from tax.",
            "Use the annual ISA allowance for new money before a General Investment Account.",
            "Sells in a General Investment Account may realize gains subject to CGT above the annual exempt amount.",
        ],
    }
}
