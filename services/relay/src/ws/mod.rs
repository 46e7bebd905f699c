//! Live Session Relay over WebSockets
//!
//! One connection maps to one live agent session. The submodules split the
//! work as follows:
//!
//! - `codec`: the JSON frame format spoken with the browser client.
//! - `pump`: the agent-to-client and client-to-agent tracks.
//! - `bridge`: delivers tool events on the same connection.
//! - `session`: connection lifecycle, from upgrade to teardown.

mod bridge;
pub mod codec;
pub mod error;
pub mod pump;
pub mod session;

use std::sync::Arc;
use tokio::sync::Mutex;

/// The write half of a connection, shared by the outbound track and the tool bridge.
pub type SharedSink<S> = Arc<Mutex<S>>;

pub use session::{SessionManager, ws_handler};
