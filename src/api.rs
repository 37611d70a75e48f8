// src/api.rs
use crate::assistant::{Assistant, FinancialSnapshot};
use crate::auth::{hash_password, new_salt, normalize_email, verify_password, TokenKeys, MIN_PASSWORD_LEN};
use crate::db::{delete_record, get_record, list_records, save_record, Record, Store};
use crate::error::ApiError;
use crate::loan::{create_loan, loan_view, update_paid_months};
use crate::models::{
    AuthResponse, ChatRequest, ChatResponse, Dashboard, Expense, ExpenseCategory, HoldingSlice,
    Investment, Loan, LoginRequest, MessageResponse, NewExpense, NewInvestment, NewLoan,
    PaidMonthsUpdate, RegisterRequest, User, UserProfile,
};
use crate::numeric::round2;
use crate::prices::PriceSources;
use crate::valuation::{create_investment, summarize, value_holdings};
use chrono::Utc;
use log::{error, info};
use serde_json::json;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Everything a handler needs, shared across requests.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub prices: PriceSources,
    pub assistant: Assistant,
    pub tokens: TokenKeys,
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .map(|| "FinMate API is running");

    health
        .or(auth_routes(state.clone()))
        .or(expense_routes(state.clone()))
        .or(loan_routes(state.clone()))
        .or(investment_routes(state.clone()))
        .or(dashboard_routes(state))
        .recover(handle_rejection)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Resolves the bearer token to the caller's user id.
fn with_user(
    state: Arc<AppState>,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(|header: Option<String>, state: Arc<AppState>| async move {
            state
                .tokens
                .authorize(header.as_deref())
                .map_err(warp::reject::custom)
        })
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn auth_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let register = warp::path!("api" / "auth" / "register")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(register_handler);

    let login = warp::path!("api" / "auth" / "login")
        .and(warp::post())
        .and(with_state(state))
        .and(json_body())
        .and_then(login_handler);

    register.or(login)
}

fn expense_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "expenses")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_expenses_handler);

    let add = warp::path!("api" / "expenses")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(add_expense_handler);

    let delete = warp::path!("api" / "expenses" / String)
        .and(warp::delete())
        .and(with_user(state.clone()))
        .and(with_state(state))
        .and_then(delete_handler::<Expense>);

    list.or(add).or(delete)
}

fn loan_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "loans")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_loans_handler);

    let add = warp::path!("api" / "loans")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(add_loan_handler);

    let update = warp::path!("api" / "loans" / String)
        .and(warp::patch())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(update_loan_handler);

    let delete = warp::path!("api" / "loans" / String)
        .and(warp::delete())
        .and(with_user(state.clone()))
        .and(with_state(state))
        .and_then(delete_handler::<Loan>);

    list.or(add).or(update).or(delete)
}

fn investment_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "investments")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_investments_handler);

    let summary = warp::path!("api" / "investments" / "summary")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(portfolio_summary_handler);

    let add = warp::path!("api" / "investments")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(add_investment_handler);

    let delete = warp::path!("api" / "investments" / String)
        .and(warp::delete())
        .and(with_user(state.clone()))
        .and(with_state(state))
        .and_then(delete_handler::<Investment>);

    list.or(summary).or(add).or(delete)
}

fn dashboard_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let dashboard = warp::path!("api" / "dashboard")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(dashboard_handler);

    let chat = warp::path!("api" / "ai")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state))
        .and(json_body())
        .and_then(chat_handler);

    dashboard.or(chat)
}

async fn register_handler(
    state: Arc<AppState>,
    request: RegisterRequest,
) -> Result<impl Reply, Rejection> {
    let email = normalize_email(&request.email)?;
    if request.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))
        .into());
    }

    let salt = new_salt();
    let user = User {
        id: Uuid::new_v4().to_string(),
        name: request.name.trim().to_string(),
        email,
        password_hash: hash_password(&request.password, &salt)?,
        salt,
        created_at: Utc::now(),
    };

    match state.store.create_user(&user).await {
        Ok(true) => {
            info!("User {} registered.", user.id);
            let token = state.tokens.create_token(&user.id)?;
            let response = AuthResponse {
                token,
                user: UserProfile::from(&user),
            };
            Ok(warp::reply::with_status(
                warp::reply::json(&response),
                StatusCode::CREATED,
            ))
        }
        Ok(false) => Err(ApiError::Conflict("User already exists".to_string()).into()),
        Err(e) => {
            error!("Failed to register user: {}", e);
            Err(ApiError::from(e).into())
        }
    }
}

async fn login_handler(
    state: Arc<AppState>,
    request: LoginRequest,
) -> Result<impl Reply, Rejection> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());
    let email = normalize_email(&request.email).map_err(|_| invalid())?;

    match state.store.find_user(&email).await {
        Ok(Some(user)) if verify_password(&request.password, &user.salt, &user.password_hash) => {
            info!("User {} logged in.", user.id);
            let token = state.tokens.create_token(&user.id)?;
            Ok(warp::reply::json(&AuthResponse {
                token,
                user: UserProfile::from(&user),
            }))
        }
        Ok(_) => Err(invalid().into()),
        Err(e) => {
            error!("Failed to look up user: {}", e);
            Err(ApiError::from(e).into())
        }
    }
}

async fn list_expenses_handler(
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    match list_records::<Expense>(state.store.as_ref(), &user_id).await {
        Ok(mut expenses) => {
            expenses.sort_by(|a, b| b.date.cmp(&a.date));
            info!("Expenses retrieved successfully.");
            Ok(warp::reply::json(&expenses))
        }
        Err(e) => {
            error!("Failed to retrieve expenses: {}", e);
            Err(ApiError::from(e).into())
        }
    }
}

async fn add_expense_handler(
    user_id: String,
    state: Arc<AppState>,
    request: NewExpense,
) -> Result<impl Reply, Rejection> {
    let (amount, category) = match (request.amount, request.category.as_deref()) {
        (Some(amount), Some(category)) => (amount, category),
        _ => {
            return Err(
                ApiError::Validation("Amount and category are required".to_string()).into(),
            )
        }
    };
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ApiError::Validation("Amount must be positive".to_string()).into());
    }
    let category: ExpenseCategory = category.parse().map_err(ApiError::Validation)?;
    let now = Utc::now();
    let expense = Expense {
        id: Uuid::new_v4().to_string(),
        user_id,
        amount,
        category,
        description: request.description.unwrap_or_default(),
        date: request.date.unwrap_or(now),
        created_at: now,
    };

    created(state.store.as_ref(), expense, "expense").await
}

async fn list_loans_handler(
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    match list_records::<Loan>(state.store.as_ref(), &user_id).await {
        Ok(mut loans) => {
            loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let views: Vec<_> = loans.into_iter().map(loan_view).collect();
            info!("Loans retrieved successfully.");
            Ok(warp::reply::json(&views))
        }
        Err(e) => {
            error!("Failed to retrieve loans: {}", e);
            Err(ApiError::from(e).into())
        }
    }
}

async fn add_loan_handler(
    user_id: String,
    state: Arc<AppState>,
    request: NewLoan,
) -> Result<impl Reply, Rejection> {
    let loan = create_loan(&user_id, &request).map_err(ApiError::from)?;
    created(state.store.as_ref(), loan, "loan").await
}

async fn update_loan_handler(
    id: String,
    user_id: String,
    state: Arc<AppState>,
    request: PaidMonthsUpdate,
) -> Result<impl Reply, Rejection> {
    let paid_months = request
        .paid_months
        .ok_or_else(|| ApiError::Validation("Invalid paid months value".to_string()))?;

    let loan = match get_record::<Loan>(state.store.as_ref(), &user_id, &id).await {
        Ok(Some(loan)) => loan,
        Ok(None) => return Err(ApiError::NotFound("Loan not found".to_string()).into()),
        Err(e) => {
            error!("Failed to load loan {}: {}", id, e);
            return Err(ApiError::from(e).into());
        }
    };

    let updated = update_paid_months(&loan, paid_months).map_err(ApiError::from)?;
    match save_record(state.store.as_ref(), &updated).await {
        Ok(_) => {
            info!("Loan {} updated to {} paid months.", id, updated.paid_months);
            Ok(warp::reply::json(&loan_view(updated)))
        }
        Err(e) => {
            error!("Failed to update loan {}: {}", id, e);
            Err(ApiError::from(e).into())
        }
    }
}

async fn list_investments_handler(
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let mut holdings = match list_records::<Investment>(state.store.as_ref(), &user_id).await {
        Ok(holdings) => holdings,
        Err(e) => {
            error!("Failed to retrieve investments: {}", e);
            return Err(ApiError::from(e).into());
        }
    };
    holdings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let views = value_holdings(&state.prices, holdings)
        .await
        .map_err(ApiError::from)?;
    info!("Valued {} investments.", views.len());
    Ok(warp::reply::json(&views))
}

async fn portfolio_summary_handler(
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let holdings = list_records::<Investment>(state.store.as_ref(), &user_id)
        .await
        .map_err(ApiError::from)?;
    let views = value_holdings(&state.prices, holdings)
        .await
        .map_err(ApiError::from)?;
    Ok(warp::reply::json(&summarize(&views)))
}

async fn add_investment_handler(
    user_id: String,
    state: Arc<AppState>,
    request: NewInvestment,
) -> Result<impl Reply, Rejection> {
    let investment = create_investment(&user_id, &request).map_err(ApiError::from)?;
    created(state.store.as_ref(), investment, "investment").await
}

async fn dashboard_handler(
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let store = state.store.as_ref();
    let expenses = list_records::<Expense>(store, &user_id)
        .await
        .map_err(ApiError::from)?;
    let loans = list_records::<Loan>(store, &user_id)
        .await
        .map_err(ApiError::from)?;
    let holdings = list_records::<Investment>(store, &user_id)
        .await
        .map_err(ApiError::from)?;
    let views = value_holdings(&state.prices, holdings)
        .await
        .map_err(ApiError::from)?;

    let mut by_category: BTreeMap<ExpenseCategory, f64> = BTreeMap::new();
    for expense in &expenses {
        *by_category.entry(expense.category).or_default() += expense.amount;
    }
    let portfolio = summarize(&views);
    let dashboard = Dashboard {
        total_expenses: round2(expenses.iter().map(|e| e.amount).sum()),
        total_investments: portfolio.total_invested,
        total_loans: round2(loans.iter().map(|l| l.amount).sum()),
        outstanding_loans: round2(
            loans
                .iter()
                .map(|l| loan_view(l.clone()).remaining_balance)
                .sum(),
        ),
        expenses_by_category: by_category
            .into_iter()
            .map(|(category, total)| (category, round2(total)))
            .collect(),
        portfolio,
        investments: views
            .iter()
            .map(|v| HoldingSlice {
                name: v.investment.asset.clone(),
                value: v.current_value,
            })
            .collect(),
    };
    Ok(warp::reply::json(&dashboard))
}

async fn chat_handler(
    user_id: String,
    state: Arc<AppState>,
    request: ChatRequest,
) -> Result<impl Reply, Rejection> {
    let message = match request.message.as_deref().map(str::trim) {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => return Err(ApiError::Validation("Message is required".to_string()).into()),
    };

    let store = state.store.as_ref();
    let expenses = list_records::<Expense>(store, &user_id)
        .await
        .map_err(ApiError::from)?;
    let holdings = list_records::<Investment>(store, &user_id)
        .await
        .map_err(ApiError::from)?;
    let loans = list_records::<Loan>(store, &user_id)
        .await
        .map_err(ApiError::from)?;

    let snapshot = FinancialSnapshot {
        total_expenses: expenses.iter().map(|e| e.amount).sum(),
        total_invested: holdings.iter().map(|h| h.invested_amount).sum(),
        total_loans: loans.iter().map(|l| l.amount).sum(),
        expense_count: expenses.len(),
        investment_count: holdings.len(),
        loan_count: loans.len(),
    };
    let response = state.assistant.reply(&message, &snapshot).await;
    Ok(warp::reply::json(&ChatResponse { response }))
}

async fn created<T: Record>(
    store: &dyn Store,
    record: T,
    label: &str,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Rejection> {
    match save_record(store, &record).await {
        Ok(_) => {
            info!("Created {} {}.", label, record.id());
            Ok(warp::reply::with_status(
                warp::reply::json(&record),
                StatusCode::CREATED,
            ))
        }
        Err(e) => {
            error!("Failed to create {}: {}", label, e);
            Err(ApiError::from(e).into())
        }
    }
}

async fn delete_handler<T: Record>(
    id: String,
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let label = T::COLLECTION.as_str();
    match delete_record::<T>(state.store.as_ref(), &user_id, &id).await {
        Ok(true) => {
            info!("Deleted {} {}.", label, id);
            Ok(warp::reply::json(&MessageResponse {
                message: format!("{} deleted successfully", singular(label)),
            }))
        }
        Ok(false) => Err(ApiError::NotFound(format!("{} not found", singular(label))).into()),
        Err(e) => {
            error!("Failed to delete {} {}: {}", label, id, e);
            Err(ApiError::from(e).into())
        }
    }
}

/// "loans" -> "Loan"
fn singular(collection: &str) -> String {
    let name = collection.trim_end_matches('s');
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Renders every rejection as `{"error": ...}` with a matching status.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<ApiError>() {
        (e.status(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": message })),
        status,
    ))
}
