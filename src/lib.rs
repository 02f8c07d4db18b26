//! Visor CRM Backend Library
//!
//! This library backs the Visor CRM API: client record enrichment over a
//! hosted record store, dashboard aggregations, quotation metrics and a
//! WhatsApp chat relay for advisor interventions.
//!
//! # Modules
//!
//! - `aggregates`: Pure aggregation functions over enriched clients.
//! - `chat`: Chat history viewer and advisor relay service.
//! - `config`: Configuration management.
//! - `enrichment`: Client record derivation logic.
//! - `errors`: Error handling types.
//! - `filters`: Derived-field filter engine.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `pagination`: Paginated client listing with two reconciliation paths.
//! - `polling`: Optional background store poll.
//! - `quotes`: Quotation metrics engine.
//! - `store`: Hosted record store adapter.
//! - `whatsapp`: WhatsApp Cloud API client.

pub mod aggregates;
pub mod chat;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod filters;
pub mod handlers;
pub mod models;
pub mod pagination;
pub mod polling;
pub mod quotes;
pub mod store;
pub mod whatsapp;
