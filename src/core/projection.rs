use tracing::debug;

use super::allocation::AllocationProfile;
use super::simulation::{MAX_HORIZON_YEARS, MarketAssumptions, RETIREMENT_YEARS};
use super::types::{Phase, ProjectionPoint, round_to};

pub const WITHDRAWAL_RATE: f64 = 0.04;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionInputs {
    pub current_value: f64,
    pub years_to_retirement: u32,
    pub allocation: AllocationProfile,
    pub current_age: u32,
    pub annual_contribution: f64,
    pub retirement_years: u32,
}

impl Default for ProjectionInputs {
    fn default() -> Self {
        Self {
            current_value: 0.0,
            years_to_retirement: 0,
            allocation: AllocationProfile::default(),
            current_age: 30,
            annual_contribution: 0.0,
            retirement_years: RETIREMENT_YEARS,
        }
    }
}

pub fn project(inputs: &ProjectionInputs) -> Vec<ProjectionPoint> {
    let expected_return = MarketAssumptions::base().expected_return(&inputs.allocation);
    let contribution = if inputs.annual_contribution.is_finite() {
        inputs.annual_contribution
    } else {
        0.0
    };
    let mut balance = if inputs.current_value.is_finite() {
        inputs.current_value.max(0.0)
    } else {
        0.0
    };

    let years_to_retirement = inputs.years_to_retirement.min(MAX_HORIZON_YEARS);
    let retirement_years = inputs.retirement_years.min(MAX_HORIZON_YEARS);
    let mut points = Vec::with_capacity(years_to_retirement as usize + 1 + retirement_years as usize);
    points.push(ProjectionPoint {
        age: inputs.current_age,
        portfolio_value: round_to(balance, 2),
        annual_income: None,
        phase: Phase::Accumulation,
    });

    for year in 1..=years_to_retirement {
        balance = balance * (1.0 + expected_return) + contribution;
        points.push(ProjectionPoint {
            age: inputs.current_age.saturating_add(year),
            portfolio_value: round_to(balance, 2),
            annual_income: None,
            phase: Phase::Accumulation,
        });
    }

    let retirement_age = inputs.current_age.saturating_add(years_to_retirement);
    for year in 1..=retirement_years {
        let income = balance * WITHDRAWAL_RATE;
        balance = (balance * (1.0 + expected_return) - income).max(0.0);
        points.push(ProjectionPoint {
            age: retirement_age.saturating_add(year),
            portfolio_value: round_to(balance, 2),
            annual_income: Some(round_to(income, 2)),
            phase: Phase::Retirement,
        });
    }

    debug!(points = points.len(), expected_return, "projection generated");
    points
}
