//! Administrative ticket endpoints.
//!
//! Ticket summaries never include ticket bodies or authentication
//! attributes. Reads go through the expiration-checked registry path, so an
//! expired ticket answers 404 and is evicted on the way.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use cas_ticket::cleaner::CleanupReport;
use cas_ticket::logout::LogoutRequest;
use cas_ticket::model::{Ticket, TicketKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::bootstrap::AppState;
use crate::error::ApiError;

/// Admin view of a ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSummary {
    pub id: String,
    pub kind: TicketKind,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_time_used: OffsetDateTime,
    pub count_of_uses: u32,
    pub expiration_policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granting_ticket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Number of tickets tracked on a granting ticket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracked_tickets: Option<usize>,
}

impl From<&Ticket> for TicketSummary {
    fn from(ticket: &Ticket) -> Self {
        let state = ticket.state();
        Self {
            id: state.id.clone(),
            kind: ticket.kind(),
            creation_time: state.creation_time,
            last_time_used: state.last_time_used,
            count_of_uses: state.count_of_uses,
            expiration_policy: state.expiration_policy.name().to_string(),
            granting_ticket_id: state.granting_ticket_id.clone(),
            principal: ticket.authentication().map(|a| a.principal.id.clone()),
            service: ticket.service().map(|s| s.id().to_string()),
            tracked_tickets: ticket
                .as_granting()
                .map(|_| ticket.tracked_ticket_ids().len()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketPageResponse {
    pub tickets: Vec<TicketSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub removed: u64,
    pub logout_requests: Vec<LogoutRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Statistics {
    pub sessions: u64,
    pub service_tickets: u64,
    pub proxy_granting_tickets: u64,
    pub proxy_tickets: u64,
    pub total: u64,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<TicketPageResponse>, ApiError> {
    let limit = params.limit.unwrap_or(state.max_page_size);
    if limit == 0 || limit > state.max_page_size {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            state.max_page_size
        )));
    }

    let page = state
        .registry
        .fetch_page(params.cursor.as_deref(), limit)
        .await?;
    Ok(Json(TicketPageResponse {
        tickets: page.tickets.iter().map(TicketSummary::from).collect(),
        next_cursor: page.next_cursor,
    }))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TicketSummary>, ApiError> {
    let ticket = state
        .registry
        .get_ticket(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(id))?;
    Ok(Json(TicketSummary::from(&ticket)))
}

/// Revokes a ticket with its descendants. Ending a session also notifies
/// the services that took part in it.
pub async fn delete_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let ticket = state
        .registry
        .get_ticket_unchecked(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;

    let logout_requests = if ticket.kind().is_granting() {
        state.logout_manager.perform_logout(&ticket).await
    } else {
        Vec::new()
    };
    let removed = state.registry.delete_ticket(&id).await?;
    tracing::info!(ticket_id = %id, removed, "Ticket revoked through admin API");

    Ok(Json(DeleteResponse {
        removed,
        logout_requests,
    }))
}

pub async fn run_cleaner(State(state): State<AppState>) -> (StatusCode, Json<CleanupReport>) {
    let report = state.cleaner.clean().await;
    let status = match report.status {
        cas_ticket::cleaner::CleanupStatus::Completed => StatusCode::OK,
        _ => StatusCode::CONFLICT,
    };
    (status, Json(report))
}

pub async fn statistics(State(state): State<AppState>) -> Result<Json<Statistics>, ApiError> {
    let registry = &state.registry;
    Ok(Json(Statistics {
        sessions: registry.session_count().await?,
        service_tickets: registry.service_ticket_count().await?,
        proxy_granting_tickets: registry
            .count_tickets(Some(TicketKind::ProxyGrantingTicket))
            .await?,
        proxy_tickets: registry.count_tickets(Some(TicketKind::ProxyTicket)).await?,
        total: registry.count_tickets(None).await?,
    }))
}

pub async fn sessions(
    State(state): State<AppState>,
    Path(principal): Path<String>,
) -> Result<Json<Vec<TicketSummary>>, ApiError> {
    let sessions = state.registry.sessions_for(&principal).await?;
    Ok(Json(sessions.iter().map(TicketSummary::from).collect()))
}
