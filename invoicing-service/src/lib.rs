//! Invoicing Service - invoice numbering, PPN totals and invoice lifecycle.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;

pub use error::InvoicingError;
