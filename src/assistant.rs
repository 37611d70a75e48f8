// src/assistant.rs
//! Chat replies about the user's finances.
//!
//! With no completion service configured the reply is a canned summary of the
//! user's totals. Otherwise the totals are sent as context to an
//! OpenAI-compatible chat endpoint.
use async_trait::async_trait;
use log::{error, info};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

pub const UNAVAILABLE_REPLY: &str = "I'm having trouble connecting to the AI service right now. However, I can see your financial data. Would you like me to provide some general financial tips instead?";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinancialSnapshot {
    pub total_expenses: f64,
    pub total_invested: f64,
    pub total_loans: f64,
    pub expense_count: usize,
    pub investment_count: usize,
    pub loan_count: usize,
}

impl FinancialSnapshot {
    pub fn context(&self, question: &str) -> String {
        format!(
            "User's Financial Summary:\n\
             - Total Expenses: ${:.2}\n\
             - Total Investments: ${:.2}\n\
             - Total Loans: ${:.2}\n\
             - Number of Expenses: {}\n\
             - Number of Investments: {}\n\
             - Number of Loans: {}\n\
             \n\
             User Question: {}\n",
            self.total_expenses,
            self.total_invested,
            self.total_loans,
            self.expense_count,
            self.investment_count,
            self.loan_count,
            question
        )
    }
}

#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError>;
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    response: Option<String>,
}

impl ChatCompletion {
    fn into_text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .or(self.response)
            .unwrap_or_else(|| "No response from AI".to_string())
    }
}

/// OpenAI-compatible chat completion proxy.
pub struct ProxyCompletion {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl ProxyCompletion {
    pub fn new(client: Client, url: String, api_key: Option<String>, model: String) -> Self {
        ProxyCompletion {
            client,
            url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl TextCompletion for ProxyCompletion {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": 150,
            "temperature": 0.7,
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let completion = request
            .send()
            .await?
            .error_for_status()?
            .json::<ChatCompletion>()
            .await?;
        Ok(completion.into_text())
    }
}

pub struct Assistant {
    completion: Option<Arc<dyn TextCompletion>>,
}

impl Assistant {
    pub fn new(completion: Option<Arc<dyn TextCompletion>>) -> Self {
        Assistant { completion }
    }

    pub async fn reply(&self, message: &str, snapshot: &FinancialSnapshot) -> String {
        let completion = match &self.completion {
            Some(completion) => completion,
            None => return mock_reply(message, snapshot),
        };

        let system = format!(
            "You are a helpful financial advisor. {}. Provide concise, actionable advice in 2-3 sentences.",
            snapshot.context(message)
        );
        match completion.complete(&system, message).await {
            Ok(text) => {
                info!("AI reply generated.");
                text
            }
            Err(e) => {
                error!("AI chat error: {}", e);
                UNAVAILABLE_REPLY.to_string()
            }
        }
    }
}

fn mock_reply(message: &str, snapshot: &FinancialSnapshot) -> String {
    format!(
        "I understand you're asking about: \"{}\". Based on your financial data, you have ${:.2} in expenses, ${:.2} in investments, and ${:.2} in loans. To get personalized AI advice, please configure the AI_PROXY_URL in your environment variables.",
        message, snapshot.total_expenses, snapshot.total_invested, snapshot.total_loans
    )
}
