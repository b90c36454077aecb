mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use simulation_core::SimulationService;

pub fn router(service: Arc<SimulationService>) -> Router {
    Router::new()
        .route("/simulate", post(handlers::simulate))
        .route("/health", get(handlers::health))
        .with_state(service)
}
