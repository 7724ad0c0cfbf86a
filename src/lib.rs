//! Seedflow Settlement Library
//!
//! Parametric settlement core for insurance-linked loans: oracle report
//! normalization, consensus, premium and payout pricing, and guarded
//! on-chain submission, plus the HTTP surface the server binary exposes.

pub mod app_state;
pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use error::SettlementError;
