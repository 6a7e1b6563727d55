// Export route modules
pub mod inference;
pub mod reply;
pub mod status;
pub mod tools;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(reply::routes(state.clone()))
        .merge(tools::routes(state.clone()))
        .merge(inference::routes(state))
        .merge(status::routes())
}
