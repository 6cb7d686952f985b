use std::f64::consts::PI;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use super::allocation::AllocationProfile;
use super::types::{AssetClass, SimulationResult, round_to};

pub const RETIREMENT_YEARS: u32 = 30;
pub const MAX_HORIZON_YEARS: u32 = 150;
pub const CASH_RETURN: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnAssumption {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketAssumptions {
    pub equity: ReturnAssumption,
    pub bonds: ReturnAssumption,
    pub real_estate: ReturnAssumption,
    pub cash_return: f64,
}

impl MarketAssumptions {
    pub fn base() -> Self {
        Self {
            equity: ReturnAssumption { mean: 0.07, std: 0.18 },
            bonds: ReturnAssumption { mean: 0.04, std: 0.05 },
            real_estate: ReturnAssumption { mean: 0.06, std: 0.12 },
            cash_return: CASH_RETURN,
        }
    }

    pub fn adjusted(return_shift: f64, volatility_mult: f64) -> Self {
        let shift = if return_shift.is_finite() { return_shift } else { 0.0 };
        let mult = if volatility_mult.is_finite() {
            volatility_mult.max(0.0)
        } else {
            1.0
        };
        let adjust = |a: ReturnAssumption| ReturnAssumption {
            mean: a.mean + shift,
            std: a.std * mult,
        };
        let base = Self::base();
        Self {
            equity: adjust(base.equity),
            bonds: adjust(base.bonds),
            real_estate: adjust(base.real_estate),
            cash_return: base.cash_return,
        }
    }

    pub fn expected_return(&self, allocation: &AllocationProfile) -> f64 {
        allocation.weight(AssetClass::Equity) * self.equity.mean
            + allocation.weight(AssetClass::FixedIncome) * self.bonds.mean
            + allocation.weight(AssetClass::RealEstate) * self.real_estate.mean
            + allocation.weight(AssetClass::Cash) * self.cash_return
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketShock {
    pub year: i64,
    pub loss_pct: f64,
}

impl MarketShock {
    fn applies_in(&self, years_to_retirement: u32) -> bool {
        (0..years_to_retirement as i64).contains(&self.year)
            && self.loss_pct > 0.0
            && self.loss_pct < 1.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetirementInputs {
    pub current_value: f64,
    pub years_to_retirement: u32,
    pub target_annual_income: f64,
    pub allocation: AllocationProfile,
    pub annual_contribution: f64,
    pub num_simulations: u32,
    pub shock: Option<MarketShock>,
    pub return_shift: f64,
    pub volatility_mult: f64,
    pub inflation_rate: f64,
    pub seed: Option<u64>,
}

impl Default for RetirementInputs {
    fn default() -> Self {
        Self {
            current_value: 0.0,
            years_to_retirement: 0,
            target_annual_income: 0.0,
            allocation: AllocationProfile::default(),
            annual_contribution: 0.0,
            num_simulations: 10_000,
            shock: None,
            return_shift: 0.0,
            volatility_mult: 1.0,
            inflation_rate: 0.025,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrialOutcome {
    value_at_retirement: f64,
    final_value: f64,
    years_lasted: u32,
}

#[derive(Debug, Clone, Copy)]
struct TrialPlan<'a> {
    start_value: f64,
    years_to_retirement: u32,
    withdrawal: f64,
    contribution: f64,
    inflation: f64,
    shock: Option<MarketShock>,
    market: MarketAssumptions,
    allocation: &'a AllocationProfile,
}

pub fn simulate(inputs: &RetirementInputs) -> SimulationResult {
    let trials = inputs.num_simulations.max(1);
    let base_seed = inputs.seed.unwrap_or_else(rand::random);
    let years_to_retirement = inputs.years_to_retirement.min(MAX_HORIZON_YEARS);
    let plan = TrialPlan {
        start_value: finite_or_zero(inputs.current_value).max(0.0),
        years_to_retirement,
        withdrawal: finite_or_zero(inputs.target_annual_income).max(0.0),
        contribution: finite_or_zero(inputs.annual_contribution),
        inflation: finite_or_zero(inputs.inflation_rate).max(0.0),
        shock: inputs.shock.filter(|s| s.applies_in(years_to_retirement)),
        market: MarketAssumptions::adjusted(inputs.return_shift, inputs.volatility_mult),
        allocation: &inputs.allocation,
    };
    debug!(trials, base_seed, shock = ?plan.shock, "starting retirement simulation");

    let outcomes: Vec<TrialOutcome> = (0..trials)
        .into_par_iter()
        .map(|trial| {
            let mut rng = NormalRng::new(derive_seed(base_seed, trial));
            run_trial(&plan, &mut rng)
        })
        .collect();

    let successes = outcomes
        .iter()
        .filter(|o| o.years_lasted == RETIREMENT_YEARS)
        .count();
    let mut final_values: Vec<f64> = outcomes.iter().map(|o| o.final_value).collect();
    final_values.sort_by(|a, b| a.total_cmp(b));

    let n = outcomes.len() as f64;
    let mean_at_retirement = outcomes.iter().map(|o| o.value_at_retirement).sum::<f64>() / n;
    let average_years_lasted = outcomes.iter().map(|o| o.years_lasted as f64).sum::<f64>() / n;
    let success_rate = round_to(successes as f64 / n * 100.0, 1);

    info!(trials, success_rate, "retirement simulation complete");

    SimulationResult {
        success_rate,
        expected_value_at_retirement: round_to(mean_at_retirement, 2),
        percentile_10: round_to(nearest_rank(&final_values, 10.0), 2),
        median_final_value: round_to(nearest_rank(&final_values, 50.0), 2),
        percentile_90: round_to(nearest_rank(&final_values, 90.0), 2),
        average_years_lasted: round_to(average_years_lasted, 1),
        generated_at: Utc::now(),
    }
}

fn run_trial(plan: &TrialPlan<'_>, rng: &mut NormalRng) -> TrialOutcome {
    let mut balance = plan.start_value;

    for year in 0..plan.years_to_retirement {
        let r = portfolio_return(plan.allocation, &plan.market, rng);
        balance = balance * (1.0 + r) + plan.contribution;
        if let Some(shock) = plan.shock.filter(|s| s.year == year as i64) {
            balance *= 1.0 - shock.loss_pct;
        }
    }
    let value_at_retirement = balance;

    let mut withdrawal = plan.withdrawal;
    let mut years_lasted = 0;
    let mut depleted = false;
    for year in 0..RETIREMENT_YEARS {
        if year > 0 {
            withdrawal *= 1.0 + plan.inflation;
        }
        let r = portfolio_return(plan.allocation, &plan.market, rng);
        balance = balance * (1.0 + r) - withdrawal;

        if !depleted {
            // A zero withdrawal from a zero balance is still a funded year.
            let funded = balance > 0.0 || (balance == 0.0 && withdrawal <= 0.0);
            if funded {
                years_lasted += 1;
            } else {
                depleted = true;
            }
        }
    }

    TrialOutcome {
        value_at_retirement,
        final_value: if depleted { 0.0 } else { balance.max(0.0) },
        years_lasted,
    }
}

// Draw order is equity, bonds, real estate.
fn portfolio_return(allocation: &AllocationProfile, market: &MarketAssumptions, rng: &mut NormalRng) -> f64 {
    let equity = draw(market.equity, rng);
    let bonds = draw(market.bonds, rng);
    let real_estate = draw(market.real_estate, rng);

    allocation.weight(AssetClass::Equity) * equity
        + allocation.weight(AssetClass::FixedIncome) * bonds
        + allocation.weight(AssetClass::RealEstate) * real_estate
        + allocation.weight(AssetClass::Cash) * market.cash_return
}

fn draw(assumption: ReturnAssumption, rng: &mut NormalRng) -> f64 {
    (assumption.mean + assumption.std * rng.standard_normal()).max(-1.0)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

pub fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64) * p / 100.0).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

fn derive_seed(base_seed: u64, trial: u32) -> u64 {
    splitmix64(base_seed ^ (((trial as u64) << 1) | 1))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct NormalRng {
    inner: StdRng,
    cached_normal: Option<f64>,
}

impl NormalRng {
    fn new(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
            cached_normal: None,
        }
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.inner.random::<f64>().max(1e-12);
        let u2 = self.inner.random::<f64>();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}
