//! Pair-Programming Live Relay
//!
//! Bridges browser clients to a streaming live agent over WebSockets. The
//! `relay` binary is a thin wrapper around this library.

pub mod config;
pub mod router;
pub mod state;
pub mod ws;
