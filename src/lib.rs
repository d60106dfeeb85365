//! DFe Hub: certificate-based discovery of Brazilian fiscal documents.
//!
//! Discovery runs present an A1 digital certificate to the SEFAZ
//! distribution webservice over mutual TLS, walk the NSU-cursored stream
//! of NFe documents, classify the certificate holder's role in each one
//! and record the result keyed by the 44-digit access key. A separate,
//! explicit import step promotes discovered documents into the
//! authoritative NFe tables.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod schema;
pub mod services;
pub mod utils;
