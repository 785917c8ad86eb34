//! HTTP surface
//!
//! Wires stores, pipelines and background services together and exposes
//! them over axum:
//! - `GET /api/data`: collector fan-out over every configured source
//! - `POST /predict`, `GET /status`, `GET /history`, `GET /ux-agent-latest`
//! - `POST /orders`, `GET /orders/summary`, `GET /orders/history`
//! - `POST /reviews`, `GET /quality`
//! - `GET /churn/latest`, `GET /churn/history`

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pulse_collect::{create_client, SourceCollector};
use pulse_core::{
    CollectionReport, HistoryFilter, HistoryQuery, OrderRecord, SentimentFilter, SessionInput, SessionRecord,
    SignalSource, StreamId, ValidationError,
};
use pulse_runtime::{
    DeliverySummary, FoodQualitySummary, MemoryStreamLog, OrderEvent, OrderPipeline, OrderResponse,
    PackagingClassifier, PipelineError, QualityBoard, QualitySnapshot, ReviewProducer, RiskBoard, RiskMonitor,
    RiskScorer, RiskSnapshot, SessionPipeline, SessionResponse, SessionScorer, StreamConsumer, StreamError,
    TextScorer, UxSummary, SESSION_OVERVIEW_LEN,
};
use pulse_store::{
    AggregateStore, DecayStateStore, FileAggregateStore, FileStateBackend, HistoryLog, JsonlHistory,
    MemoryAggregateStore, MemoryHistory, MemoryStateBackend, StateBackend, StoreError,
};

use crate::config::{PulseConfig, StorageMode};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionPipeline>,
    pub orders: Arc<OrderPipeline>,
    pub delivery_state: Arc<DecayStateStore>,
    pub collector: SourceCollector,
    pub sources: Arc<Vec<SignalSource>>,
    pub producer: ReviewProducer,
    pub quality: QualityBoard,
    pub aggregates: Arc<dyn AggregateStore>,
    pub risk: RiskBoard,
}

/// Everything `serve` runs
pub struct Services {
    pub state: AppState,
    pub consumer: StreamConsumer,
    pub monitor: RiskMonitor,
}

impl Services {
    pub fn build(config: &PulseConfig) -> Result<Self> {
        let client = create_client(&config.collector).context("building HTTP client")?;
        let collector = SourceCollector::with_client(client.clone());
        let scorer_timeout = std::time::Duration::from_millis(config.scorers.timeout_ms);

        let dir = &config.data_dir;
        let file = config.storage == StorageMode::File;
        if file {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }

        let backend = |name: &str| -> Box<dyn StateBackend> {
            if file {
                Box::new(FileStateBackend::new(dir.join(name)))
            } else {
                Box::new(MemoryStateBackend::new())
            }
        };
        let ux_state = Arc::new(DecayStateStore::open(backend("ux_state.json"), config.ux_decay)?);
        let delivery_state = Arc::new(DecayStateStore::open(
            backend("delivery_state.json"),
            config.delivery_decay,
        )?);

        let session_history: Arc<dyn HistoryLog<SessionRecord>>;
        let order_history: Arc<dyn HistoryLog<OrderRecord>>;
        let aggregates: Arc<dyn AggregateStore>;
        if file {
            session_history = Arc::new(JsonlHistory::<SessionRecord>::new(dir.join("sessions.jsonl")));
            order_history = Arc::new(JsonlHistory::<OrderRecord>::new(dir.join("orders.jsonl")));
            aggregates = Arc::new(FileAggregateStore::new(dir.join("quality_aggregate.json")));
        } else {
            session_history = Arc::new(MemoryHistory::<SessionRecord>::new());
            order_history = Arc::new(MemoryHistory::<OrderRecord>::new());
            aggregates = Arc::new(MemoryAggregateStore::new());
        }

        let sessions = SessionPipeline::new(
            Arc::new(SessionScorer::new(client.clone(), config.scorers.session.clone())),
            ux_state,
            session_history,
        )
        .with_scorer_timeout(scorer_timeout);

        let orders = OrderPipeline::new(
            Arc::new(PackagingClassifier::new(client.clone(), config.scorers.packaging.clone())),
            order_history,
        )
        .with_weights(config.fusion)
        .with_state(delivery_state.clone())
        .with_scorer_timeout(scorer_timeout);

        let stream = Arc::new(MemoryStreamLog::with_max_len(config.stream_max_len));
        let producer = ReviewProducer::new(stream.clone(), &config.consumer.text_field);
        let consumer = StreamConsumer::new(
            config.consumer.clone(),
            stream,
            Arc::new(TextScorer::new(client.clone(), config.scorers.text.clone())),
            aggregates.clone(),
        );

        let monitor = RiskMonitor::new(
            config.monitor.clone(),
            collector.clone(),
            config.sources.clone(),
            Arc::new(RiskScorer::new(client, config.scorers.churn.clone())),
        );

        let state = AppState {
            sessions: Arc::new(sessions),
            orders: Arc::new(orders),
            delivery_state,
            collector,
            sources: Arc::new(config.sources.clone()),
            producer,
            quality: consumer.board(),
            aggregates,
            risk: monitor.board(),
        };

        Ok(Self {
            state,
            consumer,
            monitor,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/data", get(api_data))
        .route("/status", get(status))
        .route("/history", get(session_history))
        .route("/predict", post(predict))
        .route("/ux-agent-latest", get(ux_latest))
        .route("/orders", post(analyze_order))
        .route("/orders/summary", get(delivery_summary))
        .route("/orders/history", get(order_history))
        .route("/reviews", post(submit_review))
        .route("/quality", get(quality))
        .route("/churn/latest", get(churn_latest))
        .route("/churn/history", get(churn_history))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve until `cancel` fires
pub async fn serve(listen: &str, state: AppState, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("listening on {}", listen))?;
    info!("HTTP surface listening on {}", listen);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("HTTP server failed")
}

/// Error body `{"detail": ...}` with a matching status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl ToString) -> Self {
        Self {
            status,
            detail: detail.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(v) => v.into(),
            other => {
                error!("Storage failure: {}", other);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, other)
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(v) => v.into(),
            PipelineError::Scoring(s) => ApiError::new(StatusCode::BAD_GATEWAY, s),
            PipelineError::Persistence(p) => p.into(),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Rejected(_) => ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e),
            StreamError::Backend(_) => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e),
        }
    }
}

fn pending(message: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "pending", "message": message })),
    )
        .into_response()
}

/// Query string of the history endpoints
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub search: Option<String>,
    pub sentiment: Option<String>,
}

impl HistoryParams {
    fn to_query(&self) -> Result<(usize, HistoryQuery), ValidationError> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(HistoryQuery::default().limit);

        let sentiment: SentimentFilter = self.sentiment.as_deref().unwrap_or("All").parse()?;
        let mut filter = HistoryFilter::default().with_sentiment(sentiment);
        if let Some(search) = &self.search {
            filter = filter.with_search(search);
        }

        Ok((page, HistoryQuery::page(page, limit)?.with_filter(filter)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryPage<R> {
    pub page: usize,
    pub limit: usize,
    pub data: Vec<R>,
}

fn history_page<R: pulse_core::Record>(
    history: &dyn HistoryLog<R>,
    params: &HistoryParams,
) -> Result<HistoryPage<R>, ApiError> {
    let (page, query) = params.to_query()?;
    Ok(HistoryPage {
        page,
        limit: query.limit,
        data: history.query(&query)?,
    })
}

async fn api_data(State(state): State<AppState>) -> Json<CollectionReport> {
    Json(state.collector.collect(&state.sources).await)
}

async fn status(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.sessions.status()?).into_response())
}

async fn session_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage<SessionRecord>>, ApiError> {
    Ok(Json(history_page(state.sessions.history().as_ref(), &params)?))
}

async fn predict(
    State(state): State<AppState>,
    Json(input): Json<SessionInput>,
) -> Result<Json<SessionResponse>, ApiError> {
    Ok(Json(state.sessions.process(input).await?))
}

async fn ux_latest(State(state): State<AppState>) -> Result<Response, ApiError> {
    let global = state.sessions.status()?;
    match UxSummary::load(state.sessions.history().as_ref(), global, SESSION_OVERVIEW_LEN)? {
        Some(summary) => Ok(Json(summary).into_response()),
        None => Ok(pending("No sessions scored yet")),
    }
}

async fn analyze_order(
    State(state): State<AppState>,
    Json(event): Json<OrderEvent>,
) -> Result<Json<OrderResponse>, ApiError> {
    Ok(Json(state.orders.process(event).await?))
}

async fn delivery_summary(State(state): State<AppState>) -> Result<Response, ApiError> {
    match DeliverySummary::load(state.orders.history().as_ref())? {
        Some(summary) => {
            let mut body = serde_json::to_value(&summary)
                .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e))?;
            body["global_score"] = json!(state.delivery_state.get()?.score);
            Ok(Json(body).into_response())
        }
        None => Ok(Json(json!({ "status": "no_data" })).into_response()),
    }
}

async fn order_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage<OrderRecord>>, ApiError> {
    // sentiment bands are cut on the 0-10 session scale, orders score 1-5
    let sentiment: SentimentFilter = params.sentiment.as_deref().unwrap_or("All").parse()?;
    if sentiment != SentimentFilter::All {
        return Err(ValidationError::Invalid {
            field: "sentiment",
            reason: "not supported for order history".to_string(),
        }
        .into());
    }
    Ok(Json(history_page(state.orders.history().as_ref(), &params)?))
}

#[derive(Debug, Deserialize)]
pub struct ReviewSubmission {
    pub review: String,
}

async fn submit_review(
    State(state): State<AppState>,
    Json(submission): Json<ReviewSubmission>,
) -> Result<Response, ApiError> {
    let id: StreamId = state.producer.append(&submission.review).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "id": id }))).into_response())
}

async fn quality(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut snapshot = state.quality.snapshot();
    if snapshot.aggregate.is_none() {
        // consumer not running or nothing scored since start: fall back to the persisted aggregate
        snapshot = QualitySnapshot {
            aggregate: state.aggregates.load()?,
            recent: Vec::new(),
        };
    }

    match FoodQualitySummary::from_snapshot(snapshot) {
        Some(summary) => Ok(Json(summary).into_response()),
        None => Ok(pending("No reviews scored yet")),
    }
}

async fn churn_latest(State(state): State<AppState>) -> Response {
    match state.risk.latest() {
        Some(latest) => Json(json!({
            "status": "success",
            "data": latest,
            "rolling_average_20": state.risk.rolling_average(),
        }))
        .into_response(),
        None => pending("Waiting for data"),
    }
}

async fn churn_history(State(state): State<AppState>) -> Json<serde_json::Value> {
    let data: Vec<RiskSnapshot> = state.risk.snapshots();
    Json(json!({ "status": "success", "data": data }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use pulse_core::PackagingStatus;
    use pulse_runtime::{ConsumerConfig, FnScorer, MonitorConfig, RiskFactors, ScoreError, SharedScorer};

    struct Harness {
        state: AppState,
        consumer: StreamConsumer,
    }

    fn harness(session_raw: f64) -> Harness {
        let config = PulseConfig {
            storage: StorageMode::Memory,
            sources: Vec::new(),
            ..Default::default()
        };
        let mut services = Services::build(&config).unwrap();

        // swap remote models for local ones
        let session_scorer: SharedScorer<SessionInput> =
            Arc::new(FnScorer::new("fixed", move |_: &SessionInput| Ok(session_raw)));
        let ux_state = Arc::new(DecayStateStore::in_memory(config.ux_decay).unwrap());
        services.state.sessions = Arc::new(SessionPipeline::new(
            session_scorer,
            ux_state,
            Arc::new(MemoryHistory::<SessionRecord>::new()),
        ));

        let classifier: SharedScorer<str, PackagingStatus> =
            Arc::new(FnScorer::new("intact", |_: &str| Ok(PackagingStatus::Intact)));
        services.state.orders = Arc::new(
            OrderPipeline::new(classifier, Arc::new(MemoryHistory::<OrderRecord>::new()))
                .with_state(services.state.delivery_state.clone()),
        );

        let stream = Arc::new(MemoryStreamLog::new());
        services.state.producer = ReviewProducer::new(stream.clone(), "review");
        let text_scorer: SharedScorer<str> = Arc::new(FnScorer::new("len", |text: &str| {
            if text.is_empty() {
                Err(ScoreError::Rejected("empty".to_string()))
            } else {
                Ok(0.75)
            }
        }));
        let consumer = StreamConsumer::new(
            ConsumerConfig::default(),
            stream,
            text_scorer,
            services.state.aggregates.clone(),
        );
        services.state.quality = consumer.board();

        let churn: SharedScorer<RiskFactors> = Arc::new(FnScorer::new("zero", |_: &RiskFactors| Ok(0.0)));
        let monitor = RiskMonitor::new(
            MonitorConfig::default(),
            services.state.collector.clone(),
            Vec::new(),
            churn,
        );
        services.state.risk = monitor.board();

        Harness {
            state: services.state,
            consumer,
        }
    }

    async fn body_json(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn session(text: &str) -> SessionInput {
        SessionInput {
            logs: vec![0.3; 10],
            behavior: vec![0.5; 5],
            review_text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_predict_status_and_history() {
        let h = harness(8.0);

        let Json(response) = predict(State(h.state.clone()), Json(session("Smooth checkout")))
            .await
            .unwrap();
        // 8.0 amplifies past the top and clips
        assert!((response.session_score - 10.0).abs() < 1e-9);
        assert_eq!(response.total_sessions_analyzed, 1);

        let (code, body) = body_json(status(State(h.state.clone())).await.unwrap()).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["total_sessions"], 1);

        let params = HistoryParams {
            search: Some("checkout".to_string()),
            sentiment: Some("positive".to_string()),
            ..Default::default()
        };
        let Json(page) = session_history(State(h.state.clone()), Query(params)).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 20);
        assert_eq!(page.data.len(), 1);

        let (code, body) = body_json(ux_latest(State(h.state.clone())).await.unwrap()).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["overview"]["status"], "HEALTHY");
    }

    #[tokio::test]
    async fn test_invalid_requests_map_to_422() {
        let h = harness(5.0);

        let mut bad = session("short logs");
        bad.logs.truncate(3);
        let err = predict(State(h.state.clone()), Json(bad)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let params = HistoryParams {
            limit: Some(500),
            ..Default::default()
        };
        let err = session_history(State(h.state.clone()), Query(params)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let params = HistoryParams {
            sentiment: Some("ecstatic".to_string()),
            ..Default::default()
        };
        assert!(session_history(State(h.state.clone()), Query(params)).await.is_err());
    }

    #[tokio::test]
    async fn test_orders_feed_delivery_summary() {
        let h = harness(5.0);

        let (_, empty) = body_json(delivery_summary(State(h.state.clone())).await.unwrap()).await;
        assert_eq!(empty["status"], "no_data");

        let event: OrderEvent = serde_json::from_value(json!({
            "order_id": "A-1",
            "estimated_delivery_time": "2024-05-01T12:00:00Z",
            "actual_delivery_time": "2024-05-01T12:20:00Z",
            "weather": "Fog",
            "image_filename": "A-1.jpg"
        }))
        .unwrap();

        let Json(response) = analyze_order(State(h.state.clone()), Json(event)).await.unwrap();
        // Poor (2.0) and intact (5.0)
        assert!((response.report.final_score - 2.9).abs() < 1e-9);

        let (code, body) = body_json(delivery_summary(State(h.state.clone())).await.unwrap()).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["kpis"]["orders_processed"], 1);
        assert_eq!(body["kpis"]["critical_alerts"], 0);
        assert_eq!(body["latest_order"]["action_taken"], "Flagged for Review");

        let Json(page) = order_history(State(h.state.clone()), Query(HistoryParams::default()))
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);

        let params = HistoryParams {
            sentiment: Some("all".to_string()),
            search: Some("Fog".to_string()),
            ..Default::default()
        };
        let Json(page) = order_history(State(h.state.clone()), Query(params)).await.unwrap();
        assert_eq!(page.data.len(), 1);

        // a 1-5 order score must not be bucketed with the session bands
        let params = HistoryParams {
            sentiment: Some("negative".to_string()),
            ..Default::default()
        };
        let err = order_history(State(h.state.clone()), Query(params)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_reviews_flow_into_quality() {
        let mut h = harness(5.0);

        let pending = quality(State(h.state.clone())).await.unwrap();
        assert_eq!(pending.status(), StatusCode::ACCEPTED);

        let submission = ReviewSubmission {
            review: "Crispy fries".to_string(),
        };
        let accepted = submit_review(State(h.state.clone()), Json(submission)).await.unwrap();
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);

        let blank = ReviewSubmission {
            review: "  ".to_string(),
        };
        let err = submit_review(State(h.state.clone()), Json(blank)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        h.consumer.poll_once().await.unwrap();

        let (code, body) = body_json(quality(State(h.state.clone())).await.unwrap()).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["holisticScore"], 0.75);
        assert_eq!(body["recent"][0]["text"], "Crispy fries");
    }

    #[tokio::test]
    async fn test_api_data_and_churn_without_sources() {
        let h = harness(5.0);

        let Json(report) = api_data(State(h.state.clone())).await;
        assert!(report.is_empty());

        assert_eq!(churn_latest(State(h.state.clone())).await.status(), StatusCode::ACCEPTED);
        let Json(history) = churn_history(State(h.state.clone())).await;
        assert_eq!(history["data"].as_array().unwrap().len(), 0);
    }
}
