//! Core types for live agent sessions: the backend contract, the session
//! registry, agent profiles and the per-connection tool service.

pub mod live;
pub mod profile;
pub mod session;
pub mod tools;
