//! Representative discovery, callback and rating API library.
//!
//! Clients find available representatives near them, request a callback, and
//! rate the interaction afterwards. The library holds the pure geo ranking,
//! the callback state machine, the per-target rating aggregator, the store
//! contracts with their Postgres and in-memory implementations, and the HTTP
//! handlers wiring them together.
//!
//! # Modules
//!
//! - `api`: HTTP handlers, routes and caller identity.
//! - `core`: Domain logic, models and errors.
//! - `data`: Store contracts and their implementations.
//! - `integrations`: Outbound webhook notifications.
//! - `callback_handler`: Callback request endpoints.
//! - `callback_workflow`: Callback lifecycle state machine.
//! - `caller`: Caller identity extracted from gateway headers.
//! - `circuit_breaker`: Timeout and circuit breaker around store calls.
//! - `config`: Configuration management.
//! - `db`: Database connection and migrations.
//! - `errors`: Error handling types.
//! - `geo`: Haversine distance and nearest-representative ranking.
//! - `handlers`: Shared state, health and representative endpoints.
//! - `memory_store`: In-process store implementation.
//! - `models`: Core data models.
//! - `notifier`: Callback event webhook client.
//! - `pg_store`: Postgres store implementation.
//! - `rating_aggregator`: Rating submission and average recomputation.
//! - `rating_handler`: Rating endpoints.
//! - `routes`: Router assembly.
//! - `store`: Persistence contracts.
//! - `validation`: Input validation helpers.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod callback_handler;
pub mod callback_workflow;
pub mod caller;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod geo;
pub mod handlers;
pub mod memory_store;
pub mod models;
pub mod notifier;
pub mod pg_store;
pub mod rating_aggregator;
pub mod rating_handler;
pub mod routes;
pub mod store;
pub mod validation;
