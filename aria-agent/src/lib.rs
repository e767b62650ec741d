//! Agent kernel: the deterministic think → tool → observe loop, with its
//! session state machine, model router, and circuit breakers.

pub mod breaker;
pub mod context;
pub mod conversation;
pub mod fsm;
pub mod kernel;
pub mod provider;
pub mod rig_provider;
pub mod router;

pub use kernel::AgentKernel;
pub use router::{ModelRouter, RouterConfig};
