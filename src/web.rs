use crate::dictionary::{DEFAULT_CACHE_SIZE, DEFAULT_DICTIONARY_URL, DictionaryProxy, LookupError};
use crate::highlight::{DEFAULT_COLOR, Highlight, HighlightDraft, NotePatch};
use crate::passage;
use crate::render::{Segment, render_passage};
use crate::repository::{HighlightRepository, MEMORY_URL, RepositoryError};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info};

type SharedState = Arc<AppState>;

const HIGHLIGHT_NOT_FOUND: &str = "Highlight not found";

pub struct AppState {
    pub repository: HighlightRepository,
    pub dictionary: DictionaryProxy,
}

impl AppState {
    pub fn new(repository: HighlightRepository, dictionary: DictionaryProxy) -> Self {
        Self {
            repository,
            dictionary,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub store_url: String,
    pub dictionary_url: String,
    pub dictionary_cache_size: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            store_url: MEMORY_URL.to_string(),
            dictionary_url: DEFAULT_DICTIONARY_URL.to_string(),
            dictionary_cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] RepositoryError),
    #[error("failed to set up dictionary client: {0}")]
    Dictionary(#[from] LookupError),
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let repository = HighlightRepository::open(&config.store_url)?;
    let dictionary = DictionaryProxy::new(&config.dictionary_url, config.dictionary_cache_size)?;
    let router = build_router(AppState::new(repository, dictionary));
    info!(
        %config.addr,
        store = %config.store_url,
        dictionary = %config.dictionary_url,
        cache = config.dictionary_cache_size,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Server Error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "success": false, "message": self.message });
        (self.status, Json(payload)).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InvalidDraft(reason) => ApiError::bad_request(reason.to_string()),
            other => {
                error!(error = %other, "highlight store failure");
                ApiError::internal()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

/// Dictionary routes answer with a bare `{message}` on failure.
impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            LookupError::NotFound => (StatusCode::NOT_FOUND, "Word not found"),
            LookupError::Transport(_) | LookupError::Decode(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error")
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let state: SharedState = Arc::new(state);
    let api = Router::new()
        .route("/highlight", get(list_highlights))
        .route("/highlight/createHighlight", post(create_highlight))
        .route("/highlight/updateHighlight/:id", put(update_highlight))
        .route("/highlight/deleteHighlight/:id", delete(delete_highlight))
        .route("/highlight/:id", get(get_highlight))
        .route("/dictionary/:word", get(lookup_word))
        .route("/lookup/:word", get(lookup_word))
        .route("/passage", get(api_passage));
    Router::new()
        .route("/", get(home))
        .route("/healthz", get(health))
        .nest("/api", api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "readmark" }))
}

async fn list_highlights(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({ "success": true, "data": state.repository.list() }))
}

async fn get_highlight(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let highlight = state
        .repository
        .get(&id)
        .ok_or_else(|| ApiError::not_found(HIGHLIGHT_NOT_FOUND))?;
    Ok(success(&highlight))
}

async fn create_highlight(
    State(state): State<SharedState>,
    payload: Result<Json<HighlightDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(draft) = payload?;
    let created = state.repository.insert(draft)?;
    info!(id = %created.id, "highlight created");
    Ok((StatusCode::CREATED, success(&created)))
}

async fn update_highlight(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: Result<Json<NotePatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(patch) = payload?;
    let updated = state
        .repository
        .update_note(&id, patch)?
        .ok_or_else(|| ApiError::not_found(HIGHLIGHT_NOT_FOUND))?;
    Ok(success(&updated))
}

async fn delete_highlight(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .repository
        .delete(&id)?
        .ok_or_else(|| ApiError::not_found(HIGHLIGHT_NOT_FOUND))?;
    info!(%id, "highlight deleted");
    Ok(Json(json!({ "success": true, "message": "Highlight deleted" })))
}

async fn lookup_word(
    State(state): State<SharedState>,
    Path(word): Path<String>,
) -> Result<Json<Value>, LookupError> {
    state.dictionary.lookup(&word).await.map(Json)
}

async fn api_passage() -> impl IntoResponse {
    Json(json!({ "success": true, "data": passage::paragraphs() }))
}

fn success(highlight: &Highlight) -> Json<Value> {
    Json(json!({ "success": true, "data": highlight }))
}

async fn home(State(state): State<SharedState>) -> impl IntoResponse {
    let highlights = state.repository.list();
    Html(render_home(&highlights))
}

fn render_home(highlights: &[Highlight]) -> String {
    let view = render_passage(highlights);
    let paragraphs: Vec<Vec<SegmentView<'_>>> = view
        .paragraphs
        .into_iter()
        .map(|segments| segments.into_iter().map(SegmentView::from).collect())
        .collect();
    let items: Vec<HighlightItem<'_>> = highlights
        .iter()
        .map(|highlight| HighlightItem {
            text: &highlight.text,
            note: highlight.note.as_deref().filter(|note| !note.trim().is_empty()),
            color: css_color(&highlight.color),
            created: highlight.created_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();
    let template = ReadingTemplate {
        title: view.title,
        instructions: passage::INSTRUCTIONS,
        paragraphs,
        highlights: items,
    };
    template.render().unwrap_or_else(|err| {
        error!(error = %err, "failed to render reading page");
        render_error_page()
    })
}

fn render_error_page() -> String {
    r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>readmark • Error</title>
  </head>
  <body>
    <main>
      <h1>Something went wrong</h1>
      <p>The reading page could not be rendered.</p>
    </main>
  </body>
</html>"#
        .to_string()
}

/// Colors end up inside a `style` attribute, so only plain hex values and
/// named colors get through.
fn css_color(color: &str) -> &str {
    let hex = color.strip_prefix('#').is_some_and(|digits| {
        matches!(digits.len(), 3 | 4 | 6 | 8) && digits.chars().all(|c| c.is_ascii_hexdigit())
    });
    let named = !color.is_empty() && color.chars().all(|c| c.is_ascii_alphabetic());
    if hex || named { color } else { DEFAULT_COLOR }
}

struct SegmentView<'a> {
    text: &'a str,
    color: Option<&'a str>,
    highlight_id: &'a str,
}

impl<'a> From<Segment<'a>> for SegmentView<'a> {
    fn from(segment: Segment<'a>) -> Self {
        match segment {
            Segment::Plain { text } => Self {
                text,
                color: None,
                highlight_id: "",
            },
            Segment::Highlighted {
                text,
                color,
                highlight_id,
            } => Self {
                text,
                color: Some(css_color(color)),
                highlight_id,
            },
        }
    }
}

struct HighlightItem<'a> {
    text: &'a str,
    note: Option<&'a str>,
    color: &'a str,
    created: String,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>{{ title }} • readmark</title>
    <style>
      body { font-family: Georgia, serif; max-width: 46rem; margin: 2rem auto; padding: 0 1rem; line-height: 1.6; }
      mark { padding: 0 1px; border-radius: 2px; }
      .note { color: #555; font-style: italic; }
    </style>
  </head>
  <body>
    <main>
      <h5>{{ title }}</h5>
      <p><em>{{ instructions }}</em></p>
      {% for paragraph in paragraphs %}
      <p class="selectable-text" data-paragraph="{{ loop.index0 }}">{% for segment in paragraph %}{% match segment.color %}{% when Some with (color) %}<mark data-highlight-id="{{ segment.highlight_id }}" style="background-color: {{ color }}">{{ segment.text }}</mark>{% when None %}{{ segment.text }}{% endmatch %}{% endfor %}</p>
      {% endfor %}
      <section id="highlights">
        <h6>Highlights ({{ highlights.len() }})</h6>
        {% if highlights.is_empty() %}
        <p>No highlights yet.</p>
        {% else %}
        <ul>
          {% for item in highlights %}
          <li>
            <span style="border-left: 4px solid {{ item.color }}; padding-left: 0.5rem">{{ item.text }}</span>
            <small>{{ item.created }}</small>
            {% match item.note %}{% when Some with (note) %}<div class="note">{{ note }}</div>{% when None %}<div class="note">No note added</div>{% endmatch %}
          </li>
          {% endfor %}
        </ul>
        {% endif %}
      </section>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct ReadingTemplate<'a> {
    title: &'a str,
    instructions: &'a str,
    paragraphs: Vec<Vec<SegmentView<'a>>>,
    highlights: Vec<HighlightItem<'a>>,
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use crate::span::Span;
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    fn test_router() -> (Router, HighlightRepository) {
        let repository = HighlightRepository::ephemeral();
        let dictionary = DictionaryProxy::new("http://127.0.0.1:9", 0).unwrap();
        (
            build_router(AppState::new(repository.clone(), dictionary)),
            repository,
        )
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_list() {
        let (router, _) = test_router();
        let (status, created) = send(
            router.clone(),
            json_request(
                "POST",
                "/api/highlight/createHighlight",
                json!({
                    "text": "sustainability",
                    "position": {"paragraphIndex": 0, "startOffset": 15, "endOffset": 29}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["success"], true);
        assert_eq!(created["data"]["color"], DEFAULT_COLOR);
        assert_eq!(created["data"]["position"]["startOffset"], 15);
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let (status, listed) = send(
            router,
            Request::get("/api/highlight").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
        assert_eq!(listed["data"][0]["id"], id.as_str());
    }

    #[tokio::test]
    async fn update_changes_only_the_note() {
        let (router, repository) = test_router();
        let original = repository
            .insert(
                HighlightDraft::new("pillars")
                    .with_color("#aaf")
                    .with_position(Some(Span::new(0, 10, 17))),
            )
            .unwrap();
        let (status, updated) = send(
            router.clone(),
            json_request(
                "PUT",
                &format!("/api/highlight/updateHighlight/{}", original.id),
                json!({"note": "three of them"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["data"]["note"], "three of them");
        let stored = repository.get(&original.id).unwrap();
        assert_eq!(stored.text, original.text);
        assert_eq!(stored.color, original.color);
        assert_eq!(stored.position, original.position);
        assert_eq!(stored.created_at, original.created_at);

        let (status, body) = send(
            router,
            json_request(
                "PUT",
                &format!("/api/highlight/updateHighlight/{}", original.id),
                json!({"note": "x", "text": "rewritten"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(repository.get(&original.id).unwrap().text, "pillars");
    }

    #[tokio::test]
    async fn delete_is_idempotent_from_the_callers_view() {
        let (router, repository) = test_router();
        let record = repository.insert(HighlightDraft::new("equity")).unwrap();
        let uri = format!("/api/highlight/deleteHighlight/{}", record.id);

        let (status, body) = send(
            router.clone(),
            Request::delete(uri.as_str()).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Highlight deleted");

        let (status, body) = send(
            router.clone(),
            Request::delete(uri.as_str()).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"success": false, "message": HIGHLIGHT_NOT_FOUND}));

        let (status, listed) = send(
            router,
            Request::get("/api/highlight").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(listed["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (router, _) = test_router();
        let (status, body) = send(
            router.clone(),
            Request::get("/api/highlight/not-an-id").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], HIGHLIGHT_NOT_FOUND);

        let (status, _) = send(
            router,
            json_request(
                "PUT",
                "/api/highlight/updateHighlight/65f0c0ffee0000000000abcd",
                json!({"note": "n"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_drafts_are_bad_requests() {
        let (router, repository) = test_router();
        for body in [
            json!({"text": ""}),
            json!({"note": "no text"}),
            json!({"text": "word", "position": {"paragraphIndex": 0, "startOffset": 5, "endOffset": 5}}),
            json!({"text": "word", "position": {"paragraphIndex": 0, "startOffset": -1, "endOffset": 5}}),
        ] {
            let (status, payload) = send(
                router.clone(),
                json_request("POST", "/api/highlight/createHighlight", body),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(payload["success"], false);
            assert!(payload["message"].as_str().is_some_and(|m| !m.is_empty()));
        }
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn dictionary_upstream_failure_is_a_server_error() {
        let (router, _) = test_router();
        let (status, body) = send(
            router,
            Request::get("/api/dictionary/Equity").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"message": "Server error"}));
    }

    #[tokio::test]
    async fn dictionary_proxies_the_first_entry() {
        use axum::routing::get as route_get;

        let upstream = Router::new().route(
            "/:word",
            route_get(|Path(word): Path<String>| async move {
                if word == "equity" {
                    (StatusCode::OK, Json(json!([{"word": "equity"}, {"word": "other"}])))
                } else {
                    (StatusCode::NOT_FOUND, Json(json!({"title": "No Definitions Found"})))
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });
        let router = build_router(AppState::new(
            HighlightRepository::ephemeral(),
            DictionaryProxy::new(format!("http://{addr}"), 4).unwrap(),
        ));

        let (status, body) = send(
            router.clone(),
            Request::get("/api/dictionary/EQUITY").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"word": "equity"}));

        let (status, body) = send(
            router,
            Request::get("/api/lookup/qwzx").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"message": "Word not found"}));
    }

    #[tokio::test]
    async fn passage_and_health() {
        let (router, _) = test_router();
        let (status, body) = send(
            router.clone(),
            Request::get("/api/passage").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), passage::paragraph_count());

        let (status, body) = send(router, Request::get("/healthz").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn reading_page_marks_highlights() {
        let (router, repository) = test_router();
        repository
            .insert(
                HighlightDraft::new("sustainability")
                    .with_color("#8bc34a")
                    .with_position(Some(Span::new(0, 15, 29))),
            )
            .unwrap();
        repository
            .insert(HighlightDraft::new("<script>x</script>").with_note("  "))
            .unwrap();
        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("background-color: #8bc34a\">sustainability</mark>"));
        assert!(html.contains("No note added"));
        assert!(!html.contains("<script>x"));
        assert_eq!(html.matches("class=\"selectable-text\"").count(), 5);
    }

    #[tokio::test]
    async fn out_of_range_positions_are_kept_as_note_only() {
        let (router, repository) = test_router();
        let (status, created) = send(
            router.clone(),
            json_request(
                "POST",
                "/api/highlight/createHighlight",
                json!({
                    "text": "ghost",
                    "position": {"paragraphIndex": 9, "startOffset": 0, "endOffset": 5}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["data"]["position"]["paragraphIndex"], 9);
        assert!(repository.list()[0].is_note_only());

        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("ghost"));
        assert!(!html.contains("<mark"));
    }

    #[test]
    fn css_colors_are_filtered() {
        assert_eq!(css_color("#ffeb3b"), "#ffeb3b");
        assert_eq!(css_color("tomato"), "tomato");
        assert_eq!(css_color("red; background: url(x)"), DEFAULT_COLOR);
        assert_eq!(css_color("#12"), DEFAULT_COLOR);
    }
}
