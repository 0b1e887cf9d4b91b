//! Search API handler
//!
//! GET /search, the only read path the web layer uses. Fuzzy lookup runs
//! against the in-memory trigram index; matching rows are then loaded from
//! the canonical store.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::models::Recall;
use crate::search::SearchQuery;
use crate::AppState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

/// GET /search query parameters
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Query text (required)
    pub q: String,
    pub country: Option<String>,
    pub category: Option<String>,
    pub hazard: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Similarity floor override; the default favors recall over precision
    pub min_similarity: Option<f64>,
}

/// One search result: the canonical row plus its similarity
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub similarity: f64,
    #[serde(flatten)]
    pub recall: Recall,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub count: usize,
}

/// GET /search
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    let query = SearchQuery {
        text: params.q,
        country: params.country,
        category: params.category,
        hazard_type: params.hazard,
        min_similarity: params
            .min_similarity
            .unwrap_or(state.orchestrator.config().search_min_similarity)
            .clamp(0.0, 1.0),
        limit: params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
        offset: params.offset.unwrap_or(0),
    };

    let hits = state.search.search(&query).await;

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        // Index entries can briefly outlive their rows between a fold and
        // the next refresh; skip those rather than failing the query.
        if let Some(recall) = crate::db::recalls::load_recall(&state.db, hit.recall_id).await? {
            results.push(SearchResult {
                similarity: hit.similarity,
                recall,
            });
        }
    }

    let count = results.len();
    Ok(Json(SearchResponse { results, count }))
}
