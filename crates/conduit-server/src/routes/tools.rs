use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct ToolsResponse {
    tools: Vec<Value>,
}

// The catalogue advertised to models, with each tool's confirmation policy
async fn list_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.agent.registry().describe(),
    })
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/tools", get(list_tools))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use crate::testing::{app, body_json};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use conduit::models::tool::Tool;
    use conduit::resolver::StaticConfigStore;
    use conduit::tools::{ToolOutput, ToolRegistry, ToolSpec};
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_list_tools() {
        let registry = ToolRegistry::new(vec![
            ToolSpec::from_fn(
                Tool::new("vfs_delete", "Delete a path", json!({"type": "object"})),
                |_| async { Ok(ToolOutput::text("gone")) },
            )
            .with_confirmation(),
        ])
        .unwrap();
        let app = app(StaticConfigStore::new(), registry);

        let request = Request::builder()
            .uri("/tools")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "vfs_delete");
        assert_eq!(body["tools"][0]["requires_confirmation"], true);
    }
}
