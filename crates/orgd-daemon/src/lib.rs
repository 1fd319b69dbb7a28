//! orgd daemon library target.
//!
//! Exposes the router, shared state, and the update fan-out machinery for
//! integration tests. The `orgd` binary in `main.rs` depends on this
//! library target.

pub mod error;
pub mod ident;
pub mod routes;
pub mod state;
pub mod tree;
pub mod updates;
