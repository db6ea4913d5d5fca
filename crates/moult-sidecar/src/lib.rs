//! Hot-upgrade sidecar process.
//!
//! Serves a well-known port and, when a newer generation of itself starts
//! up alongside it, hands that generation its listening socket over a Unix
//! rendezvous socket so the port never refuses a connection. The binary in
//! `main.rs` wires these modules together; they are exposed as a library
//! so the integration tests can drive whole upgrade scenarios in-process.

pub mod acquire;
pub mod config;
pub mod readiness;
pub mod server;
pub mod telemetry;
