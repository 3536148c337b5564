//! Core domain types and logic.

pub mod money;
pub mod bar;
pub mod corporate_action;
pub mod adjustment;
pub mod trade;
pub mod cost;
pub mod position;
pub mod account;
pub mod registry;
pub mod aggregator;
pub mod config_validation;
pub mod error;
