// src/lib.rs
//! FinMate: personal finance tracking service.
//!
//! Users record expenses, loans and investments. Loans get an EMI and
//! repayment progress ([`loan`]); investments are valued against spot prices
//! from external quote services ([`valuation`], [`prices`]).
pub mod api;
pub mod assistant;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod loan;
pub mod models;
pub mod numeric;
pub mod prices;
pub mod valuation;
