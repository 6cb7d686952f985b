mod allocation;
mod parse;
mod projection;
mod rebalance;
mod simulation;
mod types;
mod valuation;

pub use allocation::{
    AllocationProfile, Classification, ClassifiedPosition, classify, primary_asset_class,
    weighted_profile,
};
pub use parse::{number, parse_targets, weight_pairs};
pub use projection::{ProjectionInputs, WITHDRAWAL_RATE, project};
pub use rebalance::{
    AllocationComparison, DisabledRebalance, RebalanceError, RebalanceOptions, RebalanceOutcome,
    RebalanceReport, normalize_targets, placeholder_symbol, rebalance, tax_bucket, try_rebalance,
};
pub use simulation::{
    CASH_RETURN, MAX_HORIZON_YEARS, MarketAssumptions, MarketShock, RETIREMENT_YEARS,
    RetirementInputs, ReturnAssumption, nearest_rank, simulate,
};
pub use types::{
    Account, AssetClass, Instrument, Jurisdiction, Phase, Portfolio, Position, ProjectionPoint,
    SimulationResult, TaxBucket, Trade, TradeAction, resolve_price,
};
pub use valuation::{Valuation, value_portfolio};
