//! Shared runtime state for the daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Everything here is
//! cheap to share: the pool multiplexes connections internally and the
//! update registry guards itself.

use std::sync::Arc;

use sqlx::PgPool;

use crate::updates::UpdateRegistry;

/// Static build metadata included in health / server-info responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Live streaming subscribers; every mutating handler publishes here.
    pub registry: Arc<UpdateRegistry>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            registry: Arc::new(UpdateRegistry::new()),
            build: BuildInfo {
                service: "orgd",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}
