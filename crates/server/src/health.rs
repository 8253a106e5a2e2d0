use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use rentdesk_agent::InventoryService;
use rentdesk_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    inventory: Arc<InventoryService>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub inventory: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, inventory: Arc<InventoryService>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, inventory })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    inventory: Arc<InventoryService>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool, inventory)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let inventory = inventory_check(&state.inventory).await;
    let ready = database.status == "ready" && inventory.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "rentdesk-server runtime initialized".to_string(),
        },
        database,
        inventory,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn inventory_check(inventory: &InventoryService) -> HealthCheck {
    inventory
        .read(|state| match state.check_invariants() {
            Ok(()) => HealthCheck {
                status: "ready",
                detail: format!(
                    "revision {}, {} devices, {} active rentals",
                    state.revision,
                    state.devices.len(),
                    state.rentals.iter().map(|(_, devices)| devices.len()).sum::<usize>()
                ),
            },
            Err(violation) => HealthCheck { status: "degraded", detail: violation.to_string() },
        })
        .await
}
