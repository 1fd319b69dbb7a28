//! Queries over the `nodes` table.
//!
//! The optimistic-concurrency writes (`update_node_data`,
//! `update_node_parent`) condition the UPDATE on the version the caller read
//! and report `rows_affected`; the retry loop lives in the service layer.

use anyhow::{anyhow, Context, Result};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use orgd_schemas::{Node, NodeKind};

const NODE_COLS: &str = "id, user_id, name, kind, descr, active, parent, version";

fn node_from_row(row: &PgRow) -> Result<Node> {
    let kind: String = row.try_get("kind")?;
    Ok(Node {
        uuid: row.try_get("id")?,
        user: row.try_get("user_id")?,
        name: row.try_get("name")?,
        kind: NodeKind::parse(&kind).ok_or_else(|| anyhow!("invalid node kind: {kind}"))?,
        descr: row.try_get("descr")?,
        active: row.try_get("active")?,
        parent: row.try_get("parent")?,
        version: row.try_get("version")?,
    })
}

/// Insert a node and return the persisted row (version starts at 0).
pub async fn insert_node(pool: &PgPool, node: &Node) -> Result<Node> {
    let row = sqlx::query(&format!(
        r#"
        insert into nodes (id, user_id, name, kind, descr, active, parent)
        values ($1, $2, $3, $4, $5, $6, $7)
        returning {NODE_COLS}
        "#,
    ))
    .bind(node.uuid)
    .bind(node.user)
    .bind(&node.name)
    .bind(node.kind.as_str())
    .bind(&node.descr)
    .bind(node.active)
    .bind(node.parent)
    .fetch_one(pool)
    .await
    .context("insert_node failed")?;

    node_from_row(&row)
}

/// Fetch a single node owned by `user`. `None` if it does not exist for
/// this user.
pub async fn fetch_node(pool: &PgPool, id: Uuid, user: Uuid) -> Result<Option<Node>> {
    let row = sqlx::query(&format!(
        "select {NODE_COLS} from nodes where id = $1 and user_id = $2",
    ))
    .bind(id)
    .bind(user)
    .fetch_optional(pool)
    .await
    .context("fetch_node failed")?;

    row.as_ref().map(node_from_row).transpose()
}

/// True if `id` names a node owned by `user`.
pub async fn parent_exists(pool: &PgPool, id: Uuid, user: Uuid) -> Result<bool> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("select id from nodes where id = $1 and user_id = $2")
            .bind(id)
            .bind(user)
            .fetch_optional(pool)
            .await
            .context("parent_exists failed")?;

    Ok(row.is_some())
}

/// Version-conditioned update of the mutable data fields. Returns the number
/// of rows changed: 0 means the version moved under the caller.
pub async fn update_node_data(
    pool: &PgPool,
    node: &Node,
    user: Uuid,
    expected_version: i64,
) -> Result<u64> {
    let res = sqlx::query(
        r#"
        update nodes
           set name = $1, active = $2, kind = $3, descr = $4, version = version + 1
         where id = $5 and user_id = $6 and version = $7
        "#,
    )
    .bind(&node.name)
    .bind(node.active)
    .bind(node.kind.as_str())
    .bind(&node.descr)
    .bind(node.uuid)
    .bind(user)
    .bind(expected_version)
    .execute(pool)
    .await
    .context("update_node_data failed")?;

    Ok(res.rows_affected())
}

/// Version-conditioned re-parenting. `parent = None` moves to root level.
pub async fn update_node_parent(
    pool: &PgPool,
    id: Uuid,
    user: Uuid,
    parent: Option<Uuid>,
    expected_version: i64,
) -> Result<u64> {
    let res = sqlx::query(
        r#"
        update nodes
           set parent = $1, version = version + 1
         where id = $2 and user_id = $3 and version = $4
        "#,
    )
    .bind(parent)
    .bind(id)
    .bind(user)
    .bind(expected_version)
    .execute(pool)
    .await
    .context("update_node_parent failed")?;

    Ok(res.rows_affected())
}

/// Delete by (id, user). Returns rows deleted (0 = not found for this user).
pub async fn delete_node(pool: &PgPool, id: Uuid, user: Uuid) -> Result<u64> {
    let res = sqlx::query("delete from nodes where id = $1 and user_id = $2")
        .bind(id)
        .bind(user)
        .execute(pool)
        .await
        .context("delete_node failed")?;

    Ok(res.rows_affected())
}

/// All rows reachable from the user's roots, ordered `(parent, name)` with
/// root-level rows first. Tree assembly happens in the service layer.
pub async fn load_tree_rows(pool: &PgPool, user: Uuid) -> Result<Vec<Node>> {
    let rows = sqlx::query(&format!(
        r#"
        with recursive tree as (
            select {NODE_COLS}
              from nodes
             where user_id = $1 and parent is null
            union all
            select n.id, n.user_id, n.name, n.kind, n.descr, n.active, n.parent, n.version
              from nodes n
              join tree t on n.parent = t.id
             where n.user_id = $1
        )
        select {NODE_COLS}
          from tree
         order by parent nulls first, name
        "#,
    ))
    .bind(user)
    .fetch_all(pool)
    .await
    .context("load_tree_rows failed")?;

    rows.iter().map(node_from_row).collect()
}
