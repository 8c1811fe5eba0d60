//! Minimal request handler that acquires the store connection per request,
//! bounded by its own deadline, and maps unavailability to 503.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use docstore_link::{AcquisitionCoordinator, HttpConnectionFactory, StoreConfig};
use serde_json::{json, Value};

type Store = AcquisitionCoordinator<HttpConnectionFactory>;

const REQUEST_DEADLINE: Duration = Duration::from_secs(4);

async fn get_patient(
    State(store): State<Store>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let conn = store
        .acquire_within(REQUEST_DEADLINE)
        .await
        .map_err(|err| {
            let status = if err.is_unavailable() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(json!({ "message": err.to_string() })))
        })?;

    match conn.find_by_id("patients", &id).await {
        Ok(Some(patient)) => Ok(Json(patient)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "patient not found" })),
        )),
        Err(err) => {
            let status = if err.is_connection_fault() {
                let stale = store.report_stale(&conn, &err);
                eprintln!("{stale}");
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_GATEWAY
            };
            Err((status, Json(json!({ "message": err.to_string() }))))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let store = AcquisitionCoordinator::http(StoreConfig::from_env()?);
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "OK" })) }))
        .route("/api/patient/:id", get(get_patient))
        .with_state(store);

    let port = std::env::var("PORT").unwrap_or_else(|_| "5001".to_owned());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    println!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
