// src/loan.rs
//! EMI computation and repayment progress for loans.
use crate::error::EngineError;
use crate::models::{Loan, LoanView, NewLoan};
use crate::numeric::{percent_of, round2};
use chrono::Utc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoanProgress {
    pub remaining_balance: f64,
    pub progress_percent: f64,
}

/// Equated monthly installment for `principal` at `annual_rate_percent` over
/// `tenure_months` installments.
///
/// A zero rate repays the principal in equal parts. Otherwise the standard
/// amortization formula is used and the result is rounded to cents.
pub fn compute_emi(
    principal: f64,
    annual_rate_percent: f64,
    tenure_months: u32,
) -> Result<f64, EngineError> {
    if !principal.is_finite() || principal <= 0.0 {
        return Err(EngineError::InvalidInput(
            "principal must be positive".to_string(),
        ));
    }
    if !annual_rate_percent.is_finite() || annual_rate_percent < 0.0 {
        return Err(EngineError::InvalidInput(
            "interest rate must not be negative".to_string(),
        ));
    }
    if tenure_months == 0 {
        return Err(EngineError::InvalidInput(
            "tenure must be at least 1 month".to_string(),
        ));
    }

    let months = f64::from(tenure_months);
    let monthly_rate = annual_rate_percent / 12.0 / 100.0;
    let emi = if monthly_rate == 0.0 {
        principal / months
    } else {
        // r / (1 - (1 + r)^-n), kept in ln_1p/exp_m1 form so long tenures
        // and tiny rates stay finite.
        let discount = -(-months * monthly_rate.ln_1p()).exp_m1();
        round2(principal * monthly_rate / discount)
    };

    if !emi.is_finite() || emi <= 0.0 {
        return Err(EngineError::InvalidInput(
            "loan terms do not produce a payable installment".to_string(),
        ));
    }
    Ok(emi)
}

/// Converts a submitted tenure to a whole number of months.
pub fn tenure_months(raw: f64) -> Result<u32, EngineError> {
    if !raw.is_finite() || raw < 1.0 || raw.fract() != 0.0 || raw > f64::from(u32::MAX) {
        return Err(EngineError::InvalidInput(
            "tenure must be a whole number of months, at least 1".to_string(),
        ));
    }
    Ok(raw as u32)
}

/// Outstanding balance and repayment progress. Recomputed on every read.
pub fn compute_remaining(loan: &Loan) -> LoanProgress {
    let paid = f64::from(loan.paid_months);
    // EMI is rounded, so emi * tenure can overshoot the principal slightly.
    let remaining_balance = round2((loan.amount - loan.emi * paid).max(0.0));
    let progress_percent = percent_of(paid, f64::from(loan.tenure)).clamp(0.0, 100.0);
    LoanProgress {
        remaining_balance,
        progress_percent,
    }
}

/// Sets the absolute number of months paid. Moving the counter backwards is allowed.
pub fn update_paid_months(loan: &Loan, new_paid_months: i64) -> Result<Loan, EngineError> {
    if new_paid_months < 0 || new_paid_months > i64::from(loan.tenure) {
        return Err(EngineError::OutOfRange {
            value: new_paid_months,
            max: loan.tenure,
        });
    }
    Ok(Loan {
        paid_months: new_paid_months as u32,
        ..loan.clone()
    })
}

/// Validates a loan submission and freezes its EMI into a new record.
pub fn create_loan(user_id: &str, request: &NewLoan) -> Result<Loan, EngineError> {
    let (amount, rate, raw_tenure) = match (request.amount, request.interest_rate, request.tenure) {
        (Some(amount), Some(rate), Some(tenure)) => (amount, rate, tenure),
        _ => {
            return Err(EngineError::InvalidInput(
                "All fields are required".to_string(),
            ))
        }
    };
    let tenure = tenure_months(raw_tenure)?;
    let emi = compute_emi(amount, rate, tenure)?;
    let now = Utc::now();

    Ok(Loan {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        amount,
        interest_rate: rate,
        tenure,
        emi,
        paid_months: 0,
        start_date: request.start_date.unwrap_or(now),
        created_at: now,
    })
}

pub fn loan_view(loan: Loan) -> LoanView {
    let progress = compute_remaining(&loan);
    LoanView {
        loan,
        remaining_balance: progress.remaining_balance,
        progress_percent: progress.progress_percent,
    }
}
