//! CRM Inbox - inbound `WhatsApp` pipeline for an energy-brokerage CRM
//!
//! Receives provider webhooks, records every inbound message exactly once,
//! analyzes bills sent as images or PDFs, and answers with an automated reply.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   HTTP (axum)                         │
//! │   /webhook (verify, deliveries) │ /api/files │ health │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │                Inbound pipeline                       │
//! │  classify │ media fetch │ extraction │ responder │ …  │
//! └──────┬──────────────┬──────────────────┬─────────────┘
//!        │              │                  │
//!   SQLite store   WhatsApp Cloud API   Anthropic API
//! ```

pub mod api;
pub mod attachments;
pub mod channels;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod phone;
pub mod pipeline;

pub use config::Config;
pub use db::DbPool;
pub use error::{Error, Result};
pub use pipeline::{InboundPipeline, PipelineSettings, WebhookReport};
