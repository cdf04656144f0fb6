#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core protocol types for the bilateral off-chain VASP payment protocol.
//!
//! This crate implements the off-chain portion of a two-party VASP payment
//! handshake: a pair of VASPs agree on an ordered sequence of commands that
//! carry a payment object through a small status lattice, without touching
//! any blockchain. It is transport-agnostic; [`vasp-http`](../vasp_http)
//! provides an Axum/reqwest transport for it.
//!
//! # Modules
//!
//! - [`address`] - Bech32 VASP address encoding
//! - [`record`] - Structured record field semantics (write-once/updatable)
//! - [`shared_object`] - Versioned shared object base
//! - [`payment`] - The payment object and its actors
//! - [`status`] - The payment status lattice
//! - [`command`] - Protocol commands
//! - [`wire`] - Request/response wire types
//! - [`executor`] - Per-channel command sequencing
//! - [`hooks`] - The `BusinessContext` collaborator trait
//! - [`processor`] - Payment status progression
//! - [`channel`] - The bilateral channel state machine
//! - [`transport`] - The outbound-delivery collaborator trait
//! - [`vasp`] - The VASP root, owning one channel per counterparty
//! - [`storage`] - Transactional key-value storage with crash recovery
//! - [`config`] - Runtime configuration
//! - [`error`] - The crate's error taxonomy
//!
//! # Feature flags
//!
//! - `telemetry` - enables `tracing` instrumentation
//! - `cli` - enables `clap::ValueEnum`/`clap::Args` derives on config types

pub mod address;
pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod payment;
pub mod processor;
pub mod record;
pub mod shared_object;
pub mod status;
pub mod storage;
pub mod transport;
pub mod vasp;
pub mod wire;
