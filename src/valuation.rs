// src/valuation.rs
//! Current value and profit/loss of investment holdings.
use crate::error::EngineError;
use crate::models::{Investment, InvestmentKind, InvestmentView, NewInvestment, PortfolioSummary};
use crate::numeric::{percent_of, round2};
use crate::prices::PriceSources;
use chrono::Utc;
use futures::future::join_all;
use log::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Valuation {
    pub current_price: f64,
    pub current_value: f64,
    pub profit: f64,
    pub profit_percent: f64,
}

pub fn validate_holding(quantity: f64, invested_amount: f64) -> Result<(), EngineError> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(EngineError::InvalidInput(
            "Quantity must be positive".to_string(),
        ));
    }
    if !invested_amount.is_finite() || invested_amount <= 0.0 {
        return Err(EngineError::InvalidInput(
            "Invested amount must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Unit price that makes the holding break even.
pub fn fallback_price(holding: &Investment) -> f64 {
    holding.invested_amount / holding.quantity
}

/// Spot price for the holding, or its break-even price if the lookup fails.
/// Never errors: valuations are display data and must stay available.
pub async fn resolve_current_price(sources: &PriceSources, holding: &Investment) -> f64 {
    let source = sources.for_kind(holding.kind);
    match source.spot_price(&holding.asset).await {
        Ok(price) => price,
        Err(e) => {
            warn!(
                "Price lookup for {} via {} failed, using cost basis: {}",
                holding.asset,
                source.name(),
                e
            );
            fallback_price(holding)
        }
    }
}

pub fn compute_valuation(holding: &Investment, current_price: f64) -> Result<Valuation, EngineError> {
    validate_holding(holding.quantity, holding.invested_amount)?;
    let current_value = current_price * holding.quantity;
    let profit = current_value - holding.invested_amount;
    Ok(Valuation {
        current_price,
        current_value: round2(current_value),
        profit: round2(profit),
        profit_percent: round2(percent_of(profit, holding.invested_amount)),
    })
}

/// Values every holding. Prices are fetched concurrently and each falls back
/// independently of the others.
pub async fn value_holdings(
    sources: &PriceSources,
    holdings: Vec<Investment>,
) -> Result<Vec<InvestmentView>, EngineError> {
    for holding in &holdings {
        validate_holding(holding.quantity, holding.invested_amount)?;
    }
    let prices = join_all(
        holdings
            .iter()
            .map(|holding| resolve_current_price(sources, holding)),
    )
    .await;

    holdings
        .into_iter()
        .zip(prices)
        .map(|(investment, price)| {
            let valuation = compute_valuation(&investment, price)?;
            Ok(InvestmentView {
                investment,
                current_price: valuation.current_price,
                current_value: valuation.current_value,
                profit: valuation.profit,
                profit_percent: valuation.profit_percent,
            })
        })
        .collect()
}

pub fn summarize(views: &[InvestmentView]) -> PortfolioSummary {
    let total_invested: f64 = views.iter().map(|v| v.investment.invested_amount).sum();
    let total_value: f64 = views.iter().map(|v| v.current_value).sum();
    let total_profit = total_value - total_invested;
    PortfolioSummary {
        total_invested: round2(total_invested),
        total_value: round2(total_value),
        total_profit: round2(total_profit),
        total_profit_percent: round2(percent_of(total_profit, total_invested)),
    }
}

/// Validates an investment submission. Asset symbols are stored uppercase.
pub fn create_investment(user_id: &str, request: &NewInvestment) -> Result<Investment, EngineError> {
    let (asset, kind, quantity, invested_amount) = match (
        request.asset.as_deref().map(str::trim),
        request.kind.as_deref(),
        request.quantity,
        request.invested_amount,
    ) {
        (Some(asset), Some(kind), Some(quantity), Some(invested))
            if !asset.is_empty() && !kind.is_empty() =>
        {
            (asset, kind, quantity, invested)
        }
        _ => {
            return Err(EngineError::InvalidInput(
                "All fields are required".to_string(),
            ))
        }
    };
    validate_holding(quantity, invested_amount)?;
    let kind: InvestmentKind = kind.parse().map_err(EngineError::InvalidInput)?;
    let now = Utc::now();

    Ok(Investment {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        asset: asset.to_uppercase(),
        kind,
        quantity,
        invested_amount,
        purchase_date: request.purchase_date.unwrap_or(now),
        created_at: now,
    })
}
