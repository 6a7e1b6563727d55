use crate::error::ApiError;
use crate::state::AppState;
use axum::{extract::State, routing::post, Json, Router};
use conduit::providers::base::Provider;
use conduit::providers::factory::get_provider;
use conduit::resolver::Ability;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize, Serialize)]
struct EmbedRequest {
    texts: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct EmbedResponse {
    model: String,
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RerankRequest {
    query: String,
    documents: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RerankResponse {
    model: String,
    scores: Vec<f32>,
}

async fn provider_for(state: &AppState, ability: Ability) -> Result<Arc<dyn Provider>, ApiError> {
    let resolved = state.agent.resolver().resolve(ability).await?;
    Ok(get_provider(&resolved)?)
}

async fn embed(
    State(state): State<AppState>,
    Json(request): Json<EmbedRequest>,
) -> Result<Json<EmbedResponse>, ApiError> {
    if request.texts.is_empty() {
        return Err(ApiError::BadRequest("texts must not be empty".to_string()));
    }
    let provider = provider_for(&state, Ability::Embedding).await?;
    let embeddings = provider.embed(&request.texts).await?;
    Ok(Json(EmbedResponse {
        model: provider.model().to_string(),
        embeddings,
    }))
}

async fn rerank(
    State(state): State<AppState>,
    Json(request): Json<RerankRequest>,
) -> Result<Json<RerankResponse>, ApiError> {
    if request.documents.is_empty() {
        return Err(ApiError::BadRequest(
            "documents must not be empty".to_string(),
        ));
    }
    let provider = provider_for(&state, Ability::Rerank).await?;
    let scores = provider.rerank(&request.query, &request.documents).await?;
    Ok(Json(RerankResponse {
        model: provider.model().to_string(),
        scores,
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/embed", post(embed))
        .route("/rerank", post(rerank))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app, body_json, provider_record};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use conduit::resolver::StaticConfigStore;
    use conduit::tools::ToolRegistry;
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn post_json<T: Serialize>(uri: &str, body: &T) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    fn store(base_url: &str, api_format: &str) -> StaticConfigStore {
        StaticConfigStore::new()
            .with_provider(provider_record("upstream", api_format, base_url))
            .with_binding(Ability::Embedding, "embedder", "upstream")
            .with_binding(Ability::Rerank, "reranker", "upstream")
    }

    #[tokio::test]
    async fn test_embed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.5]},
                    {"index": 0, "embedding": [0.25, 0.75]}
                ]
            })))
            .mount(&mock_server)
            .await;

        let app = app(
            store(&mock_server.uri(), "openai"),
            ToolRegistry::new(Vec::new()).unwrap(),
        );
        let request = EmbedRequest {
            texts: vec!["a".to_string(), "b".to_string()],
        };
        let response = app.oneshot(post_json("/embed", &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: EmbedResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.model, "embedder");
        assert_eq!(body.embeddings, vec![vec![0.25, 0.75], vec![0.5]]);
    }

    #[tokio::test]
    async fn test_rerank() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"index": 1, "relevance_score": 0.75},
                    {"index": 0, "relevance_score": 0.25}
                ]
            })))
            .mount(&mock_server)
            .await;

        let app = app(
            store(&mock_server.uri(), "openai"),
            ToolRegistry::new(Vec::new()).unwrap(),
        );
        let request = RerankRequest {
            query: "q".to_string(),
            documents: vec!["first".to_string(), "second".to_string()],
        };
        let response = app.oneshot(post_json("/rerank", &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: RerankResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.scores, vec![0.25, 0.75]);
    }

    #[tokio::test]
    async fn test_rerank_unsupported_format() {
        let app = app(
            store("https://api.anthropic.com", "anthropic"),
            ToolRegistry::new(Vec::new()).unwrap(),
        );
        let request = RerankRequest {
            query: "q".to_string(),
            documents: vec!["first".to_string()],
        };
        let response = app.oneshot(post_json("/rerank", &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_embed_rejects_empty_input() {
        let app = app(
            StaticConfigStore::new(),
            ToolRegistry::new(Vec::new()).unwrap(),
        );
        let request = EmbedRequest { texts: Vec::new() };
        let response = app.oneshot(post_json("/embed", &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_embed_without_model_is_unavailable() {
        let app = app(
            StaticConfigStore::new(),
            ToolRegistry::new(Vec::new()).unwrap(),
        );
        let request = EmbedRequest {
            texts: vec!["a".to_string()],
        };
        let response = app.oneshot(post_json("/embed", &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
