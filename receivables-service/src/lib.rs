//! Receivables Service - Invoice, payment and credit note ledger for wholesale orders.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
