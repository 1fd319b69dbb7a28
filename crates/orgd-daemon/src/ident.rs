//! Request identity.
//!
//! The daemon assumes a pre-authenticated deployment: whatever sits in front
//! of it (reverse proxy, auth gateway, or the client's own trusted channel)
//! stamps the caller's user and tenant uuids onto these headers. The daemon
//! only parses them; it does not authenticate.

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_HEADER: &str = "x-orgd-user";
pub const TENANT_HEADER: &str = "x-orgd-tenant";

/// The current caller, as resolved from the request context.
#[derive(Debug, Clone, Copy)]
pub struct Ident {
    pub user: Uuid,
    pub tenant: Uuid,
}

impl Ident {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        Ok(Self {
            user: parse_uuid_header(headers, USER_HEADER)?,
            tenant: parse_uuid_header(headers, TENANT_HEADER)?,
        })
    }
}

fn parse_uuid_header(headers: &HeaderMap, name: &str) -> Result<Uuid, ApiError> {
    let value = headers
        .get(name)
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))?;
    let value = value
        .to_str()
        .map_err(|_| ApiError::Unauthorized(format!("invalid {name} header")))?;
    Uuid::parse_str(value).map_err(|_| ApiError::Unauthorized(format!("invalid {name} header")))
}
