//! # Culmax - MAX! Heating Control over CUL
//!
//! Culmax turns a host with a serial-attached CUL transceiver stick into the
//! hub ("cube") of a population of MAX! heating-control devices: radiator
//! thermostats, wall thermostats, shutter contacts and push buttons on a
//! narrowband sub-GHz link.
//!
//! The stick enforces the regulatory 1% duty-cycle rule, so transmit time is
//! a budget that must be queried, spent and re-queried. The crate's job is
//! correctness on both sides of that constraint:
//!
//! - **Wire codec**: decode and encode every Moritz message shape, with
//!   their bit-packed, scaled and table-encoded fields.
//! - **Duty-cycle transceiver**: one loop owning the serial line, gating
//!   sends on the remaining budget, reconnecting with backoff on failure.
//! - **Session router**: pairing state machine, acknowledgement
//!   deduplication, per-device state cache and event emission.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use culmax::config::Config;
//! use culmax::hub::CulHub;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let hub = CulHub::new(&config)?;
//!
//!     let handle = hub.handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.shutdown();
//!     });
//!
//!     hub.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`protocol`] - message types and the frame codec (pure, no I/O)
//! - [`cul`] - the duty-cycle transceiver owning the serial line
//! - [`hub`] - session router, device cache, events, command surface
//! - [`config`] - configuration management
//!
//! ## Architecture
//!
//! ```text
//! serial bytes ⇄ Transceiver (budget-gated) ⇄ raw frame lines
//!                       ⇅ bounded queues ⇅
//!              Session Router (codec, state machine)
//!                       ⇅
//!        state snapshots + events → external consumers
//! ```
//!
//! External layers (an HTTP control surface, a persistence layer) consume
//! [`hub::Event`]s and snapshots; the core itself persists nothing.

pub mod config;
pub mod cul;
pub mod hub;
pub mod logutil;
pub mod protocol;
