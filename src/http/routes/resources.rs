//! Read-only resource groups backed by one table each.
//!
//! Every group answers `GET /` with a page of rows and `GET /{id}` with a
//! single row. Statements go through the pool's query executor, so each one
//! is logged with its duration and row count.

use crate::http::AppState;
use crate::http::error::ApiError;
use crate::models::{DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT, QueryParam};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A table exposed under `/api/<table>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Camiones,
    Conductores,
}

impl Resource {
    pub const ALL: [Resource; 2] = [Resource::Camiones, Resource::Conductores];

    pub fn table(self) -> &'static str {
        match self {
            Self::Camiones => "camiones",
            Self::Conductores => "conductores",
        }
    }

    /// Name of one row, used in not-found messages.
    pub fn singular(self) -> &'static str {
        match self {
            Self::Camiones => "camion",
            Self::Conductores => "conductor",
        }
    }

    pub fn mount_path(self) -> String {
        format!("/api/{}", self.table())
    }

    fn list_sql(self) -> String {
        format!(
            "SELECT * FROM {} ORDER BY id LIMIT $1 OFFSET $2",
            self.table()
        )
    }

    fn by_id_sql(self) -> String {
        format!("SELECT * FROM {} WHERE id::text = $1", self.table())
    }
}

/// Paging parameters for listings.
#[derive(Debug, Default, Deserialize)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Page {
    pub fn limit(&self) -> u32 {
        self.limit
            .map(|l| l.clamp(1, MAX_ROW_LIMIT))
            .unwrap_or(DEFAULT_ROW_LIMIT)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

async fn list(
    state: &AppState,
    resource: Resource,
    page: Page,
) -> Result<Json<Vec<Map<String, Value>>>, ApiError> {
    let params = [
        QueryParam::from(page.limit()),
        QueryParam::from(page.offset()),
    ];
    let result = state.db.execute(&resource.list_sql(), &params).await?;
    Ok(Json(result.rows))
}

async fn fetch_one(
    state: &AppState,
    resource: Resource,
    id: String,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let params = [QueryParam::from(id.as_str())];
    let result = state.db.execute(&resource.by_id_sql(), &params).await?;
    result
        .rows
        .into_iter()
        .next()
        .map(Json)
        .ok_or(ApiError::NotFound {
            resource: resource.singular(),
            id,
        })
}

/// Routes for one resource, to be nested under [`Resource::mount_path`].
pub fn router(resource: Resource) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(
                move |State(state): State<AppState>, Query(page): Query<Page>| async move {
                    list(&state, resource, page).await
                },
            ),
        )
        .route(
            "/{id}",
            get(
                move |State(state): State<AppState>, Path(id): Path<String>| async move {
                    fetch_one(&state, resource, id).await
                },
            ),
        )
}
