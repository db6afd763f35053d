use crate::handler::TaskHandler;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{
    AgentCard, AgentFault, SwitchyardResult, TaskRequest, TaskResponse, AGENT_CARD_PATH,
    DEADLINE_EXCEEDED, TASKS_PATH,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shared application state.
pub struct WorkerState {
    /// Card served at the discovery path.
    pub card: AgentCard,
    /// Handler that runs tasks.
    pub handler: Arc<dyn TaskHandler>,
}

/// Serves the agent protocol for one [`TaskHandler`].
pub struct WorkerServer;

impl WorkerServer {
    /// Router with the card, task and health endpoints.
    pub fn build(card: AgentCard, handler: Arc<dyn TaskHandler>) -> Router {
        let state = Arc::new(WorkerState { card, handler });
        Router::new()
            .route(AGENT_CARD_PATH, get(card_handler))
            .route(TASKS_PATH, post(task_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Serve on `listener` until `shutdown` resolves. The card's endpoint is
    /// rewritten to the listener's address.
    pub async fn serve(
        mut card: AgentCard,
        handler: Arc<dyn TaskHandler>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> SwitchyardResult<()> {
        let addr = listener.local_addr()?;
        card.endpoint = endpoint_for(addr);
        info!(agent_id = %card.id, endpoint = %card.endpoint, "Worker listening");

        let app = Self::build(card, handler);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// Bind `addr` and serve in a background task.
    pub async fn spawn(
        mut card: AgentCard,
        handler: Arc<dyn TaskHandler>,
        addr: &str,
    ) -> SwitchyardResult<RunningWorker> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        card.endpoint = endpoint_for(local);

        let app = Self::build(card.clone(), handler);
        let agent_id = card.id.clone();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                })
                .await;
            if let Err(e) = result {
                error!(agent_id = %agent_id, error = %e, "Worker server stopped");
            }
        });
        info!(agent_id = %card.id, endpoint = %card.endpoint, "Worker spawned");

        Ok(RunningWorker {
            card,
            stop: Some(stop),
            handle,
        })
    }
}

fn endpoint_for(addr: SocketAddr) -> String {
    format!("http://{addr}")
}

/// A worker serving in the background. Shuts down gracefully when dropped.
pub struct RunningWorker {
    card: AgentCard,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RunningWorker {
    /// The card as served, endpoint included.
    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Base URL the worker listens on.
    pub fn endpoint(&self) -> &str {
        &self.card.endpoint
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for RunningWorker {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn card_handler(State(state): State<Arc<WorkerState>>) -> Json<AgentCard> {
    Json(state.card.seen_at(Utc::now()))
}

async fn health_handler(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "agent_id": state.card.id}))
}

async fn task_handler(
    State(state): State<Arc<WorkerState>>,
    Json(request): Json<TaskRequest>,
) -> (StatusCode, Json<TaskResponse>) {
    let task_id = request.task_id;
    let remaining = (request.deadline - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        warn!(agent_id = %state.card.id, task_id = %task_id, "Task arrived after its deadline");
        return (
            StatusCode::REQUEST_TIMEOUT,
            Json(TaskResponse::err(
                task_id,
                AgentFault::new(DEADLINE_EXCEEDED, "task arrived after its deadline"),
            )),
        );
    }

    match tokio::time::timeout(remaining, state.handler.handle(request.payload)).await {
        Ok(Ok(result)) => {
            info!(agent_id = %state.card.id, task_id = %task_id, "Task completed");
            (StatusCode::OK, Json(TaskResponse::ok(task_id, result)))
        }
        Ok(Err(fault)) => {
            warn!(agent_id = %state.card.id, task_id = %task_id, kind = %fault.kind, "Task failed");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(TaskResponse::err(task_id, fault)),
            )
        }
        Err(_) => {
            warn!(agent_id = %state.card.id, task_id = %task_id, "Task ran past its deadline");
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(TaskResponse::err(
                    task_id,
                    AgentFault::new(DEADLINE_EXCEEDED, "task did not finish before its deadline"),
                )),
            )
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::handler::{DelayedHandler, EchoHandler};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use switchyard_core::deadline_after;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct Refuse;

    #[async_trait]
    impl TaskHandler for Refuse {
        async fn handle(
            &self,
            _payload: serde_json::Value,
        ) -> Result<serde_json::Value, AgentFault> {
            Err(AgentFault::new("no_word", "nothing to guess"))
        }
    }

    fn app(handler: Arc<dyn TaskHandler>) -> Router {
        let card = AgentCard::new("echo", "Echo", "http://localhost:9000").with_skill("echo");
        WorkerServer::build(card, handler)
    }

    fn task_request(deadline: chrono::DateTime<Utc>) -> Request<Body> {
        let body = TaskRequest {
            task_id: Uuid::new_v4(),
            payload: json!({"word": "apple"}),
            deadline,
        };
        Request::post(TASKS_PATH)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn read_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_serves_agent_card() {
        let response = app(Arc::new(EchoHandler))
            .oneshot(Request::get(AGENT_CARD_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let card: AgentCard = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(card.id, "echo");
        assert!(card.has_skill("echo"));
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(Arc::new(EchoHandler))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = read_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["agent_id"], "echo");
    }

    #[tokio::test]
    async fn test_task_round_trip() {
        let response = app(Arc::new(EchoHandler))
            .oneshot(task_request(deadline_after(Duration::from_secs(5))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["result"], json!({"word": "apple"}));
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_handler_fault_is_structured() {
        let response = app(Arc::new(Refuse))
            .oneshot(task_request(deadline_after(Duration::from_secs(5))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let reply: TaskResponse = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(reply.error.unwrap().kind, "no_word");
    }

    #[tokio::test]
    async fn test_expired_task_rejected() {
        let response = app(Arc::new(EchoHandler))
            .oneshot(task_request(Utc::now() - chrono::Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let reply: TaskResponse = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(reply.error.unwrap().kind, DEADLINE_EXCEEDED);
    }

    #[tokio::test]
    async fn test_slow_handler_cut_at_deadline() {
        let slow = DelayedHandler::new(EchoHandler, Duration::from_secs(30));
        let response = app(Arc::new(slow))
            .oneshot(task_request(deadline_after(Duration::from_millis(100))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let request = Request::post(TASKS_PATH)
            .header("content-type", "application/json")
            .body(Body::from("{\"nope\": true}"))
            .unwrap();
        let response = app(Arc::new(EchoHandler)).oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_spawned_worker_advertises_bound_endpoint() {
        let worker = WorkerServer::spawn(
            AgentCard::new("echo", "Echo", "http://placeholder"),
            Arc::new(EchoHandler),
            "127.0.0.1:0",
        )
        .await
        .unwrap();
        assert!(worker.endpoint().starts_with("http://127.0.0.1:"));

        let url = worker.card().card_url();
        let card: AgentCard = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(card.endpoint, worker.endpoint());
        worker.shutdown().await;
    }
}
