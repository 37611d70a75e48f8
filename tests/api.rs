//! End-to-end tests for the HTTP API against the in-memory store.

use async_trait::async_trait;
use chrono::Duration;
use finmate::api::{routes, AppState};
use finmate::assistant::Assistant;
use finmate::auth::TokenKeys;
use finmate::db::MemoryStore;
use finmate::prices::{PriceError, PriceSource, PriceSources};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Reply};

struct FixedPrices(HashMap<&'static str, f64>);

#[async_trait]
impl PriceSource for FixedPrices {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn spot_price(&self, symbol: &str) -> Result<f64, PriceError> {
        self.0
            .get(symbol)
            .copied()
            .ok_or_else(|| PriceError::UnknownSymbol(symbol.to_string()))
    }
}

struct Offline;

#[async_trait]
impl PriceSource for Offline {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn spot_price(&self, symbol: &str) -> Result<f64, PriceError> {
        Err(PriceError::Unavailable(symbol.to_string()))
    }
}

fn app() -> impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone {
    let stocks = FixedPrices(HashMap::from([("AAPL", 175.50)]));
    let state = AppState {
        store: Arc::new(MemoryStore::new()),
        prices: PriceSources::new(Arc::new(stocks), Arc::new(Offline)),
        assistant: Assistant::new(None),
        tokens: TokenKeys::new("integration-secret", Duration::hours(1)),
    };
    routes(Arc::new(state))
}

fn body(res: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
    serde_json::from_slice(res.body()).unwrap()
}

async fn register<F>(api: &F, email: &str) -> String
where
    F: Filter + Clone + Send + Sync + 'static,
    F::Extract: Reply + Send,
{
    let res = warp::test::request()
        .method("POST")
        .path("/api/auth/register")
        .json(&json!({"name": "Test", "email": email, "password": "secret123"}))
        .reply(api)
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    body(&res)["token"].as_str().unwrap().to_string()
}

async fn send<F>(api: &F, method: &str, path: &str, token: &str, payload: Option<Value>) -> (StatusCode, Value)
where
    F: Filter + Clone + Send + Sync + 'static,
    F::Extract: Reply + Send,
{
    let mut request = warp::test::request()
        .method(method)
        .path(path)
        .header("authorization", format!("Bearer {}", token));
    if let Some(payload) = payload {
        request = request.json(&payload);
    }
    let res = request.reply(api).await;
    (res.status(), body(&res))
}

#[tokio::test]
async fn test_health() {
    let res = warp::test::request().path("/health").reply(&app()).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_register_then_login() {
    let api = app();
    register(&api, "ana@example.com").await;

    let res = warp::test::request()
        .method("POST")
        .path("/api/auth/login")
        .json(&json!({"email": "ANA@example.com", "password": "secret123"}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let login = body(&res);
    assert_eq!(login["user"]["email"], "ana@example.com");
    assert!(login["user"].get("passwordHash").is_none());

    let res = warp::test::request()
        .method("POST")
        .path("/api/auth/login")
        .json(&json!({"email": "ana@example.com", "password": "wrong-pass"}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let api = app();
    register(&api, "dup@example.com").await;
    let res = warp::test::request()
        .method("POST")
        .path("/api/auth/register")
        .json(&json!({"name": "Again", "email": "dup@example.com", "password": "secret123"}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let res = warp::test::request().path("/api/loans").reply(&app()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body(&res)["error"], "No token, authorization denied");
}

#[tokio::test]
async fn test_loan_lifecycle() {
    let api = app();
    let token = register(&api, "loans@example.com").await;

    let (status, loan) = send(
        &api,
        "POST",
        "/api/loans",
        &token,
        Some(json!({"amount": 5000, "interestRate": 8.5, "tenure": 24})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(loan["emi"].as_f64().unwrap() > 0.0);
    assert_eq!(loan["paidMonths"], 0);
    let id = loan["id"].as_str().unwrap().to_string();

    let (status, updated) = send(
        &api,
        "PATCH",
        &format!("/api/loans/{}", id),
        &token,
        Some(json!({"paidMonths": 24})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(updated["remainingBalance"].as_f64().unwrap() <= 0.01);
    assert_eq!(updated["progressPercent"], 100.0);
    assert_eq!(updated["emi"], loan["emi"]);

    let (status, _) = send(
        &api,
        "PATCH",
        &format!("/api/loans/{}", id),
        &token,
        Some(json!({"paidMonths": 25})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, loans) = send(&api, "GET", "/api/loans", &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loans.as_array().unwrap().len(), 1);
    assert_eq!(loans[0]["paidMonths"], 24);

    let (status, _) = send(&api, "DELETE", &format!("/api/loans/{}", id), &token, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&api, "DELETE", &format!("/api/loans/{}", id), &token, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_loan_is_a_client_error() {
    let api = app();
    let token = register(&api, "bad-loan@example.com").await;
    for payload in [
        json!({"amount": 0, "interestRate": 5, "tenure": 12}),
        json!({"amount": 1000, "interestRate": -1, "tenure": 12}),
        json!({"amount": 1000, "interestRate": 5, "tenure": 0}),
        json!({"amount": 1000, "interestRate": 5, "tenure": 6.5}),
        json!({"amount": 1000, "tenure": 12}),
    ] {
        let (status, err) = send(&api, "POST", "/api/loans", &token, Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err["error"].is_string());
    }
}

#[tokio::test]
async fn test_extreme_loan_terms_keep_listing_readable() {
    let api = app();
    let token = register(&api, "long-loan@example.com").await;

    let (status, loan) = send(
        &api,
        "POST",
        "/api/loans",
        &token,
        Some(json!({"amount": 5000, "interestRate": 12, "tenure": 100000})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(loan["emi"], 50.0);

    let (status, loan) = send(
        &api,
        "POST",
        "/api/loans",
        &token,
        Some(json!({"amount": 5000, "interestRate": 1e-20, "tenure": 24})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(loan["emi"].as_f64().unwrap() > 0.0);

    let (status, _) = send(
        &api,
        "POST",
        "/api/loans",
        &token,
        Some(json!({"amount": 0.01, "interestRate": 5, "tenure": 360})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, loans) = send(&api, "GET", "/api/loans", &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loans.as_array().unwrap().len(), 2);
    let (status, _) = send(&api, "GET", "/api/dashboard", &token, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_users_cannot_touch_each_others_loans() {
    let api = app();
    let alice = register(&api, "alice@example.com").await;
    let mallory = register(&api, "mallory@example.com").await;

    let (_, loan) = send(
        &api,
        "POST",
        "/api/loans",
        &alice,
        Some(json!({"amount": 1200, "interestRate": 0, "tenure": 12})),
    )
    .await;
    let path = format!("/api/loans/{}", loan["id"].as_str().unwrap());

    let (status, _) = send(&api, "PATCH", &path, &mallory, Some(json!({"paidMonths": 3}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&api, "DELETE", &path, &mallory, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listed) = send(&api, "GET", "/api/loans", &mallory, None).await;
    assert!(listed.as_array().unwrap().is_empty());

    let (_, listed) = send(&api, "GET", "/api/loans", &alice, None).await;
    assert_eq!(listed[0]["paidMonths"], 0);
}

#[tokio::test]
async fn test_investment_valuation() {
    let api = app();
    let token = register(&api, "investor@example.com").await;

    let (status, created) = send(
        &api,
        "POST",
        "/api/investments",
        &token,
        Some(json!({"asset": "aapl", "type": "Stock", "quantity": 10, "investedAmount": 1500})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["asset"], "AAPL");
    assert_eq!(created["type"], "stock");
    assert!(created.get("currentValue").is_none());

    send(
        &api,
        "POST",
        "/api/investments",
        &token,
        Some(json!({"asset": "bitcoin", "type": "crypto", "quantity": 0.5, "investedAmount": 20000})),
    )
    .await;

    let (status, listed) = send(&api, "GET", "/api/investments", &token, None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    let aapl = listed.iter().find(|h| h["asset"] == "AAPL").unwrap();
    assert_eq!(aapl["currentPrice"], 175.5);
    assert_eq!(aapl["currentValue"], 1755.0);
    assert_eq!(aapl["profit"], 255.0);
    assert_eq!(aapl["profitPercent"], 17.0);

    // crypto feed is offline: valued at cost, not an error
    let btc = listed.iter().find(|h| h["asset"] == "BITCOIN").unwrap();
    assert_eq!(btc["currentValue"], 20000.0);
    assert_eq!(btc["profit"], 0.0);
    assert_eq!(btc["profitPercent"], 0.0);

    let (status, summary) = send(&api, "GET", "/api/investments/summary", &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["totalInvested"], 21500.0);
    assert_eq!(summary["totalValue"], 21755.0);
    assert_eq!(summary["totalProfit"], 255.0);
}

#[tokio::test]
async fn test_invalid_investment_is_rejected() {
    let api = app();
    let token = register(&api, "bad-inv@example.com").await;
    for payload in [
        json!({"asset": "AAPL", "type": "stock", "quantity": 0, "investedAmount": 100}),
        json!({"asset": "AAPL", "type": "stock", "quantity": 1, "investedAmount": -100}),
        json!({"asset": "AAPL", "type": "bond", "quantity": 1, "investedAmount": 100}),
        json!({"type": "stock", "quantity": 1, "investedAmount": 100}),
    ] {
        let (status, _) = send(&api, "POST", "/api/investments", &token, Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_expenses_and_dashboard() {
    let api = app();
    let token = register(&api, "spender@example.com").await;

    for (amount, category, date) in [
        (12.5, "food", "2024-01-05T12:00:00Z"),
        (40.0, "Transport", "2024-01-07T08:00:00Z"),
        (7.5, "food", "2024-01-06T19:30:00Z"),
    ] {
        let (status, _) = send(
            &api,
            "POST",
            "/api/expenses",
            &token,
            Some(json!({"amount": amount, "category": category, "date": date})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _) = send(
        &api,
        "POST",
        "/api/expenses",
        &token,
        Some(json!({"amount": 5, "category": "rent"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, expenses) = send(&api, "GET", "/api/expenses", &token, None).await;
    let amounts: Vec<f64> = expenses
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["amount"].as_f64().unwrap())
        .collect();
    assert_eq!(amounts, vec![40.0, 7.5, 12.5]);

    send(
        &api,
        "POST",
        "/api/loans",
        &token,
        Some(json!({"amount": 1200, "interestRate": 0, "tenure": 12})),
    )
    .await;

    let (status, dashboard) = send(&api, "GET", "/api/dashboard", &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dashboard["totalExpenses"], 60.0);
    assert_eq!(dashboard["expensesByCategory"]["food"], 20.0);
    assert_eq!(dashboard["expensesByCategory"]["transport"], 40.0);
    assert_eq!(dashboard["totalLoans"], 1200.0);
    assert_eq!(dashboard["outstandingLoans"], 1200.0);
    assert_eq!(dashboard["totalInvestments"], 0.0);
}

#[tokio::test]
async fn test_assistant_without_proxy_summarizes() {
    let api = app();
    let token = register(&api, "chat@example.com").await;
    send(
        &api,
        "POST",
        "/api/loans",
        &token,
        Some(json!({"amount": 5000, "interestRate": 8.5, "tenure": 24})),
    )
    .await;

    let (status, reply) = send(
        &api,
        "POST",
        "/api/ai",
        &token,
        Some(json!({"message": "How am I doing?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(reply["response"].as_str().unwrap().contains("$5000.00 in loans"));

    let (status, _) = send(&api, "POST", "/api/ai", &token, Some(json!({"message": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let api = app();
    let token = register(&api, "typo@example.com").await;
    let res = warp::test::request()
        .method("POST")
        .path("/api/loans")
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body("{not json")
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
