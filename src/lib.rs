//! Meridian - routing and semantic-cache decision engine
//!
//! Sits in front of interchangeable text-generation providers and decides,
//! per request, whether a cached response can be reused and otherwise which
//! provider to call, falling back across providers on failure while tracking
//! their health and each tenant's spend.

pub mod advisory;
pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod fingerprint;
pub mod gateway;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod request;
pub mod routing;
pub mod store;

pub use gateway::{Gateway, GatewayBuilder, GatewayError, GatewayResponse, ResponseSource};
pub use request::{Message, Request};
