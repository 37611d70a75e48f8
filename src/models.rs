// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: String,
    pub user_id: String,
    /// Principal borrowed.
    pub amount: f64,
    /// Annual interest rate in percent.
    pub interest_rate: f64,
    /// Number of monthly installments.
    pub tenure: u32,
    /// Fixed when the loan is created and never recomputed.
    pub emi: f64,
    pub paid_months: u32,
    pub start_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InvestmentKind {
    Stock,
    Crypto,
}

impl fmt::Display for InvestmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvestmentKind::Stock => write!(f, "stock"),
            InvestmentKind::Crypto => write!(f, "crypto"),
        }
    }
}

impl FromStr for InvestmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stock" => Ok(InvestmentKind::Stock),
            "crypto" => Ok(InvestmentKind::Crypto),
            _ => Err("Type must be either stock or crypto".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub id: String,
    pub user_id: String,
    pub asset: String,
    #[serde(rename = "type")]
    pub kind: InvestmentKind,
    pub quantity: f64,
    pub invested_amount: f64,
    pub purchase_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseCategory {
    Food,
    Transport,
    Bills,
    Fun,
    Other,
}

impl FromStr for ExpenseCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "food" => Ok(ExpenseCategory::Food),
            "transport" => Ok(ExpenseCategory::Transport),
            "bills" => Ok(ExpenseCategory::Bills),
            "fun" => Ok(ExpenseCategory::Fun),
            "other" => Ok(ExpenseCategory::Other),
            _ => Err("Invalid category".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub category: ExpenseCategory,
    pub description: String,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Stored account. Never serialized to clients; see [`UserProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        UserProfile {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

// Request bodies. Numeric fields are loose on purpose so that bad values
// reach validation and produce a 400 with a message instead of a decode error.

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLoan {
    pub amount: Option<f64>,
    pub interest_rate: Option<f64>,
    pub tenure: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidMonthsUpdate {
    pub paid_months: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvestment {
    pub asset: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub quantity: Option<f64>,
    pub invested_amount: Option<f64>,
    pub purchase_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct NewExpense {
    pub amount: Option<f64>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// Read views: stored record plus derived fields.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoanView {
    #[serde(flatten)]
    pub loan: Loan,
    pub remaining_balance: f64,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentView {
    #[serde(flatten)]
    pub investment: Investment,
    pub current_price: f64,
    pub current_value: f64,
    pub profit: f64,
    pub profit_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub total_invested: f64,
    pub total_value: f64,
    pub total_profit: f64,
    pub total_profit_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldingSlice {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total_expenses: f64,
    pub total_investments: f64,
    pub total_loans: f64,
    pub outstanding_loans: f64,
    pub expenses_by_category: BTreeMap<ExpenseCategory, f64>,
    pub portfolio: PortfolioSummary,
    pub investments: Vec<HoldingSlice>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_investment_serializes_kind_as_type() {
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let inv = Investment {
            id: "i1".into(),
            user_id: "u1".into(),
            asset: "BTC".into(),
            kind: InvestmentKind::Crypto,
            quantity: 0.5,
            invested_amount: 20000.0,
            purchase_date: when,
            created_at: when,
        };
        let json = serde_json::to_value(&inv).unwrap();
        assert_eq!(json["type"], "crypto");
        assert_eq!(json["investedAmount"], 20000.0);
        assert_eq!(json["userId"], "u1");
    }

    #[test]
    fn test_kind_and_category_parse_case_insensitively() {
        assert_eq!("Stock".parse::<InvestmentKind>(), Ok(InvestmentKind::Stock));
        assert!("bond".parse::<InvestmentKind>().is_err());
        assert_eq!(" FUN ".parse::<ExpenseCategory>(), Ok(ExpenseCategory::Fun));
        assert!("rent".parse::<ExpenseCategory>().is_err());
    }

    #[test]
    fn test_loan_view_flattens_loan_fields() {
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let view = LoanView {
            loan: Loan {
                id: "l1".into(),
                user_id: "u1".into(),
                amount: 1200.0,
                interest_rate: 0.0,
                tenure: 12,
                emi: 100.0,
                paid_months: 3,
                start_date: when,
                created_at: when,
            },
            remaining_balance: 900.0,
            progress_percent: 25.0,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["paidMonths"], 3);
        assert_eq!(json["remainingBalance"], 900.0);
        assert_eq!(json["interestRate"], 0.0);
    }
}
