//! Inserts for tenant bootstrap (`CreateTenant`).
//!
//! The service resolves defaults (uuid, kind, active) before calling these,
//! so every field arrives concrete.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use orgd_schemas::{TenantKind, UserKind};

pub struct NewTenant<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub kind: TenantKind,
    pub descr: Option<&'a str>,
    pub active: bool,
    pub properties: serde_json::Value,
}

pub async fn insert_tenant(pool: &PgPool, tenant: &NewTenant<'_>) -> Result<()> {
    sqlx::query(
        r#"
        insert into tenants (id, name, kind, descr, active, properties)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(tenant.id)
    .bind(tenant.name)
    .bind(tenant.kind.as_str())
    .bind(tenant.descr)
    .bind(tenant.active)
    .bind(&tenant.properties)
    .execute(pool)
    .await
    .context("insert_tenant failed")?;
    Ok(())
}

pub struct NewUser<'a> {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: &'a str,
    pub email: &'a str,
    pub kind: UserKind,
    pub active: bool,
    pub descr: Option<&'a str>,
    pub properties: serde_json::Value,
}

pub async fn insert_user(pool: &PgPool, user: &NewUser<'_>) -> Result<()> {
    sqlx::query(
        r#"
        insert into users (id, tenant_id, name, email, kind, active, descr, properties)
        values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(user.id)
    .bind(user.tenant_id)
    .bind(user.name)
    .bind(user.email)
    .bind(user.kind.as_str())
    .bind(user.active)
    .bind(user.descr)
    .bind(&user.properties)
    .execute(pool)
    .await
    .context("insert_user failed")?;
    Ok(())
}
