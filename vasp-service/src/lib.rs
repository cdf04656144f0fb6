#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Bilateral off-chain VASP payment protocol node.
//!
//! A runnable node that wires [`vasp_core::vasp::OffChainVasp`] to an Axum
//! HTTP server and a `reqwest`-backed transport, using
//! [`business::LocalBusinessContext`] as a demo compliance/settlement
//! collaborator.
//!
//! # Modules
//!
//! - [`business`] — a sample [`BusinessContext`](vasp_core::hooks::BusinessContext) implementation
//! - [`config`] — environment-variable configuration
//! - [`error`] — service-level error type
//! - [`util`] — graceful shutdown

pub mod business;
pub mod config;
pub mod error;
pub mod util;
