//! Axum router and all HTTP handlers for the daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Every mutating handler runs the same shape: resolve identity, execute SQL
//! through `orgd-db`, then hand the committed change to the update registry,
//! which fans it out to all live streaming subscribers.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use tokio_stream::{wrappers::ReceiverStream, StreamExt as _};
use tracing::{debug, info};
use uuid::Uuid;

use orgd_schemas::{
    CompleteDay, CreateNodeReq, CreateTenantReq, Date, Day, DayColorDefinitions, ErrorCode,
    HealthResponse, Month, MoveNodeReq, Node, NodeOp, NodeTree, ServerInfo, ServiceError,
    SetColorReq, StatusReply, TenantKind, Update, UserKind,
};

use crate::{
    error::{db_err, ApiError},
    ident::Ident,
    state::AppState,
    tree::assemble_tree,
    updates::{Subscriber, SubscriptionGuard},
};

/// Optimistic-concurrency envelope: retries after a version conflict.
const MAX_UPDATE_RETRIES: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/server-info", get(server_info))
        .route("/v1/day-colors", get(day_colors))
        .route("/v1/days/:year/:month/:mday", get(get_day))
        .route("/v1/days/color", post(set_color_on_day))
        .route("/v1/days", post(set_day))
        .route("/v1/months/:year/:month", get(get_month))
        .route("/v1/tenants", post(create_tenant))
        .route("/v1/nodes", get(get_nodes).post(create_node))
        .route("/v1/nodes/update", post(update_node))
        .route("/v1/nodes/move", post(move_node))
        .route("/v1/nodes/:uuid", delete(delete_node))
        .route("/v1/updates", get(subscribe_to_updates))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        service: st.build.service.to_string(),
        version: st.build.version.to_string(),
    })
}

// ---------------------------------------------------------------------------
// GET /v1/server-info
// ---------------------------------------------------------------------------

pub(crate) async fn server_info(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut properties = BTreeMap::new();
    properties.insert("service".to_string(), st.build.service.to_string());
    properties.insert("version".to_string(), st.build.version.to_string());
    Json(ServerInfo { properties })
}

// ---------------------------------------------------------------------------
// GET /v1/day-colors
// ---------------------------------------------------------------------------

pub(crate) async fn day_colors(
    State(st): State<Arc<AppState>>,
) -> Result<Json<DayColorDefinitions>, ApiError> {
    let day_colors = orgd_db::days::day_color_definitions(&st.pool)
        .await
        .map_err(db_err)?;
    Ok(Json(DayColorDefinitions { day_colors }))
}

// ---------------------------------------------------------------------------
// GET /v1/days/:year/:month/:mday
// ---------------------------------------------------------------------------

pub(crate) async fn get_day(
    State(st): State<Arc<AppState>>,
    Path((year, month, mday)): Path<(i32, u32, u32)>,
    headers: HeaderMap,
) -> Result<Json<CompleteDay>, ApiError> {
    let ident = Ident::from_headers(&headers)?;
    let date = Date::new(year, month, mday);
    let stored = to_naive(&date)?;

    let row = orgd_db::days::fetch_day(&st.pool, ident.user, stored)
        .await
        .map_err(db_err)?;

    let reply = match row {
        Some(row) => CompleteDay {
            day: Day {
                date: Date::from_naive(row.date),
                user: row.user_id,
                color: row.color,
                has_notes: row.notes.is_some(),
                has_report: row.report.is_some(),
            },
            notes: row.notes,
            report: row.report,
        },
        // No stored row: synthesize an empty day for the requested date.
        None => CompleteDay {
            day: Day {
                date,
                user: ident.user,
                color: None,
                has_notes: false,
                has_report: false,
            },
            notes: None,
            report: None,
        },
    };

    Ok(Json(reply))
}

// ---------------------------------------------------------------------------
// GET /v1/months/:year/:month
// ---------------------------------------------------------------------------

pub(crate) async fn get_month(
    State(st): State<Arc<AppState>>,
    Path((year, month)): Path<(i32, u32)>,
    headers: HeaderMap,
) -> Result<Json<Month>, ApiError> {
    let ident = Ident::from_headers(&headers)?;
    if month > 11 {
        return Err(ServiceError::new(
            ErrorCode::ConstraintFailed,
            format!("month {month} out of range 0..=11"),
        )
        .into());
    }

    let rows = orgd_db::days::month_days(&st.pool, ident.user, year, month + 1)
        .await
        .map_err(db_err)?;

    let days = rows
        .into_iter()
        .map(|row| Day {
            date: Date::from_naive(row.date),
            user: row.user_id,
            color: row.color,
            has_notes: row.has_notes,
            has_report: row.has_report,
        })
        .collect();

    Ok(Json(Month { year, month, days }))
}

// ---------------------------------------------------------------------------
// POST /v1/days/color
// ---------------------------------------------------------------------------

pub(crate) async fn set_color_on_day(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SetColorReq>,
) -> Result<Json<StatusReply>, ApiError> {
    let ident = Ident::from_headers(&headers)?;
    let stored = to_naive(&req.date)?;

    // Empty color clears: stored as NULL.
    let color = Some(req.color.as_str()).filter(|c| !c.is_empty());

    orgd_db::days::upsert_day_color(&st.pool, ident.user, stored, color)
        .await
        .map_err(db_err)?;

    debug!("updated color for {} of user {}", req.date, ident.user);

    st.registry.publish(Update::DayColor {
        date: req.date,
        user: ident.user,
        color: color.map(str::to_string),
    });

    Ok(Json(StatusReply::ok()))
}

// ---------------------------------------------------------------------------
// POST /v1/days
// ---------------------------------------------------------------------------

pub(crate) async fn set_day(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CompleteDay>,
) -> Result<Json<StatusReply>, ApiError> {
    let ident = Ident::from_headers(&headers)?;
    let stored = to_naive(&req.day.date)?;

    // Absent entries are stored as NULL; empty strings count as absent.
    let notes = none_if_empty(req.notes);
    let report = none_if_empty(req.report);
    let record = CompleteDay {
        day: Day {
            date: req.day.date,
            user: ident.user,
            color: none_if_empty(req.day.color),
            has_notes: notes.is_some(),
            has_report: report.is_some(),
        },
        notes,
        report,
    };

    orgd_db::days::upsert_day(
        &st.pool,
        ident.user,
        stored,
        record.day.color.as_deref(),
        record.notes.as_deref(),
        record.report.as_deref(),
    )
    .await
    .map_err(db_err)?;

    st.registry.publish(Update::Day(record));

    Ok(Json(StatusReply::ok()))
}

// ---------------------------------------------------------------------------
// POST /v1/tenants
// ---------------------------------------------------------------------------

pub(crate) async fn create_tenant(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTenantReq>,
) -> Result<Json<StatusReply>, ApiError> {
    let ident = Ident::from_headers(&headers)?;

    // Basic checks before anything is created.
    if req.tenant.name.is_empty() {
        return Err(ServiceError::from_code(ErrorCode::MissingTenantName).into());
    }
    for user in &req.users {
        if user.email.is_empty() {
            return Err(ServiceError::from_code(ErrorCode::MissingUserEmail).into());
        }
        if user.name.is_empty() {
            return Err(ServiceError::from_code(ErrorCode::MissingUserName).into());
        }
    }

    let mut tenant = req.tenant;
    if tenant.uuid.is_nil() {
        tenant.uuid = Uuid::new_v4();
    }
    let kind = tenant.kind.unwrap_or(TenantKind::Guest);
    let active = tenant.active.unwrap_or(true);
    tenant.kind = Some(kind);
    tenant.active = Some(active);

    orgd_db::tenants::insert_tenant(
        &st.pool,
        &orgd_db::tenants::NewTenant {
            id: tenant.uuid,
            name: &tenant.name,
            kind,
            descr: tenant.descr.as_deref(),
            active,
            properties: serde_json::to_value(&tenant.properties)
                .map_err(|e| ApiError::Internal(e.into()))?,
        },
    )
    .await
    .map_err(db_err)?;

    info!(
        "user {} has created tenant name={}, id={}, kind={}",
        ident.user,
        tenant.name,
        tenant.uuid,
        kind.as_str()
    );

    for user in &req.users {
        let id = if user.uuid.is_nil() { Uuid::new_v4() } else { user.uuid };
        // The submitted kind wins; the default only applies when absent.
        let kind = user.kind.unwrap_or(UserKind::Regular);
        let active = user.active.unwrap_or(true);

        orgd_db::tenants::insert_user(
            &st.pool,
            &orgd_db::tenants::NewUser {
                id,
                tenant_id: tenant.uuid,
                name: &user.name,
                email: &user.email,
                kind,
                active,
                descr: user.descr.as_deref(),
                properties: serde_json::to_value(&user.properties)
                    .map_err(|e| ApiError::Internal(e.into()))?,
            },
        )
        .await
        .map_err(db_err)?;

        info!(
            "user {} has created user name={}, id={}, kind={}, tenant={}",
            ident.user,
            user.name,
            id,
            kind.as_str(),
            tenant.uuid
        );
    }

    Ok(Json(StatusReply::with_tenant(tenant)))
}

// ---------------------------------------------------------------------------
// POST /v1/nodes
// ---------------------------------------------------------------------------

pub(crate) async fn create_node(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateNodeReq>,
) -> Result<Json<StatusReply>, ApiError> {
    let ident = Ident::from_headers(&headers)?;
    debug!("request to create node {} for user {}", req.node.uuid, ident.user);

    if let Some(parent) = req.node.parent {
        validate_parent(&st, parent, ident.user).await?;
    }

    let node = Node {
        uuid: if req.node.uuid.is_nil() {
            Uuid::new_v4()
        } else {
            req.node.uuid
        },
        user: ident.user,
        version: 0,
        ..req.node
    };

    let stored = orgd_db::nodes::insert_node(&st.pool, &node)
        .await
        .map_err(db_err)?;

    st.registry.publish(Update::Node {
        op: NodeOp::Added,
        node: stored.clone(),
    });

    Ok(Json(StatusReply::with_node(stored)))
}

// ---------------------------------------------------------------------------
// POST /v1/nodes/update
// ---------------------------------------------------------------------------

pub(crate) async fn update_node(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<Node>,
) -> Result<Json<StatusReply>, ApiError> {
    let ident = Ident::from_headers(&headers)?;
    debug!("request to update node {} for user {}", req.uuid, ident.user);

    let mut retry = 0;
    loop {
        let existing = fetch_node(&st, req.uuid, ident.user).await?;

        // Re-parenting goes through MoveNode only.
        if req.parent != existing.parent {
            return Err(ServiceError::new(
                ErrorCode::DifferentParent,
                "UpdateNode cannot move nodes in the tree",
            )
            .into());
        }

        // Write the data only if the version is still what we read.
        let affected = orgd_db::nodes::update_node_data(&st.pool, &req, ident.user, existing.version)
            .await
            .map_err(db_err)?;
        if affected > 0 {
            break;
        }

        debug!("update_node: version moved under us; retrying");
        if retry >= MAX_UPDATE_RETRIES {
            return Err(ServiceError::new(
                ErrorCode::DatabaseUpdateFailed,
                "failed to update, despite retrying",
            )
            .into());
        }
        retry += 1;
        tokio::time::sleep(RETRY_BACKOFF).await;
    }

    let current = fetch_node(&st, req.uuid, ident.user).await?;

    st.registry.publish(Update::Node {
        op: NodeOp::Updated,
        node: current.clone(),
    });

    Ok(Json(StatusReply::with_node(current)))
}

// ---------------------------------------------------------------------------
// POST /v1/nodes/move
// ---------------------------------------------------------------------------

pub(crate) async fn move_node(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<MoveNodeReq>,
) -> Result<Json<StatusReply>, ApiError> {
    let ident = Ident::from_headers(&headers)?;
    debug!("request to move node {} for user {}", req.uuid, ident.user);

    let mut retry = 0;
    loop {
        let existing = fetch_node(&st, req.uuid, ident.user).await?;

        if existing.parent == req.parent_uuid {
            return Ok(Json(StatusReply {
                error: ErrorCode::NoChanges,
                message: "The parent has not changed; ignoring the request".to_string(),
                node: None,
                tenant: None,
            }));
        }

        if req.parent_uuid == Some(req.uuid) {
            return Err(ServiceError::new(
                ErrorCode::ConstraintFailed,
                "A node cannot be its own parent",
            )
            .into());
        }

        if let Some(parent) = req.parent_uuid {
            validate_parent(&st, parent, ident.user).await?;
            // Walk the ancestor chain of the new parent; attaching below a
            // descendant would cut the subtree loose as a cycle.
            if ancestor_chain_contains(&st, parent, req.uuid, ident.user).await? {
                return Err(ServiceError::new(
                    ErrorCode::ConstraintFailed,
                    "Move would create a cycle in the tree",
                )
                .into());
            }
        }

        let affected = orgd_db::nodes::update_node_parent(
            &st.pool,
            req.uuid,
            ident.user,
            req.parent_uuid,
            existing.version,
        )
        .await
        .map_err(db_err)?;
        if affected > 0 {
            break;
        }

        debug!("move_node: version moved under us; retrying");
        if retry >= MAX_UPDATE_RETRIES {
            return Err(ServiceError::new(
                ErrorCode::DatabaseUpdateFailed,
                "failed to update, despite retrying",
            )
            .into());
        }
        retry += 1;
        tokio::time::sleep(RETRY_BACKOFF).await;
    }

    let current = fetch_node(&st, req.uuid, ident.user).await?;

    st.registry.publish(Update::Node {
        op: NodeOp::Moved,
        node: current.clone(),
    });

    Ok(Json(StatusReply::with_node(current)))
}

// ---------------------------------------------------------------------------
// DELETE /v1/nodes/:uuid
// ---------------------------------------------------------------------------

pub(crate) async fn delete_node(
    State(st): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<StatusReply>, ApiError> {
    let ident = Ident::from_headers(&headers)?;
    debug!("request to delete node {uuid} for user {}", ident.user);

    // Snapshot first: the reply and the published update carry the node as
    // it was before deletion.
    let node = fetch_node(&st, uuid, ident.user).await?;

    let affected = orgd_db::nodes::delete_node(&st.pool, uuid, ident.user)
        .await
        .map_err(db_err)?;
    if affected == 0 {
        return Err(
            ServiceError::new(ErrorCode::NotFound, format!("node {uuid} not found")).into(),
        );
    }

    st.registry.publish(Update::Node {
        op: NodeOp::Deleted,
        node: node.clone(),
    });

    Ok(Json(StatusReply::with_node(node)))
}

// ---------------------------------------------------------------------------
// GET /v1/nodes
// ---------------------------------------------------------------------------

pub(crate) async fn get_nodes(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<NodeTree>, ApiError> {
    let ident = Ident::from_headers(&headers)?;

    let rows = orgd_db::nodes::load_tree_rows(&st.pool, ident.user)
        .await
        .map_err(db_err)?;

    Ok(Json(NodeTree {
        root: assemble_tree(rows),
    }))
}

// ---------------------------------------------------------------------------
// GET /v1/updates  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn subscribe_to_updates(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ident = Ident::from_headers(&headers)?;

    let (sub, rx) = Subscriber::attach(&st.registry);
    info!("client {} subscribed to updates as subscriber {}", ident.user, sub.id());

    // The guard rides inside the stream: when the client disconnects the
    // stream is dropped, the reactor finishes, and the registry forgets it.
    let guard = SubscriptionGuard::new(sub, Arc::clone(&st.registry));
    let events = ReceiverStream::new(rx).filter_map(move |update| {
        let _live = &guard;
        let data = serde_json::to_string(update.as_ref()).ok()?;
        Some(Ok::<_, Infallible>(
            Event::default().event(update.event_name()).data(data),
        ))
    });

    let mut resp_headers = HeaderMap::new();
    resp_headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));

    Ok((resp_headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn to_naive(date: &Date) -> Result<chrono::NaiveDate, ApiError> {
    date.to_naive().ok_or_else(|| {
        ServiceError::new(
            ErrorCode::ConstraintFailed,
            format!("{date} is not a valid calendar date"),
        )
        .into()
    })
}

/// Single node lookup scoped to the current user, or NOT_FOUND.
async fn fetch_node(st: &AppState, id: Uuid, user: Uuid) -> Result<Node, ApiError> {
    orgd_db::nodes::fetch_node(&st.pool, id, user)
        .await
        .map_err(db_err)?
        .ok_or_else(|| ServiceError::new(ErrorCode::NotFound, format!("node {id} not found")).into())
}

/// A parent reference must name a node owned by the current user.
async fn validate_parent(st: &AppState, parent: Uuid, user: Uuid) -> Result<(), ApiError> {
    let ok = orgd_db::nodes::parent_exists(&st.pool, parent, user)
        .await
        .map_err(db_err)?;
    if ok {
        Ok(())
    } else {
        Err(ServiceError::new(
            ErrorCode::InvalidParent,
            "Parent id must exist and be owned by the user",
        )
        .into())
    }
}

/// True if `target` appears on the ancestor chain starting at `start`.
/// The walk is finite because persisted trees are acyclic.
async fn ancestor_chain_contains(
    st: &AppState,
    start: Uuid,
    target: Uuid,
    user: Uuid,
) -> Result<bool, ApiError> {
    let mut cursor = Some(start);
    while let Some(id) = cursor {
        if id == target {
            return Ok(true);
        }
        cursor = fetch_node(st, id, user).await?.parent;
    }
    Ok(false)
}
