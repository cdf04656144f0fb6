#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for the bilateral off-chain VASP payment protocol.
//!
//! Provides an Axum dispatcher for the server side of the protocol and a
//! `reqwest`-based [`transport::Transport`](vasp_core::transport::Transport)
//! implementation for the client side.
//!
//! # Feature Flags
//!
//! - `server` — the Axum request dispatcher
//! - `client` — the reqwest-backed [`Transport`](vasp_core::transport::Transport)
//! - `telemetry` — tracing instrumentation

pub mod error;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;
