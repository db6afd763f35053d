use async_trait::async_trait;
use reqwest::StatusCode;
use switchyard_core::{
    join_url, AgentCard, AgentTransport, SwitchyardError, SwitchyardResult, TaskRequest,
    TaskResponse, TransportError, AGENT_CARD_PATH, TASKS_PATH,
};
use tracing::debug;

/// [`AgentTransport`] over HTTP/JSON.
///
/// The underlying client has no timeout of its own; the channel bounds every
/// exchange.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with a fresh `reqwest` client.
    pub fn new() -> SwitchyardResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("switchyard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SwitchyardError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn discover(&self, endpoint: &str) -> Result<AgentCard, TransportError> {
        let url = join_url(endpoint, AGENT_CARD_PATH);
        debug!(url = %url, "Fetching agent card");

        let response = self.client.get(&url).send().await.map_err(map_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &url));
        }
        response.json::<AgentCard>().await.map_err(|e| {
            TransportError::invalid(format!("undecodable agent card from {url}: {e}"))
        })
    }

    async fn send_task(
        &self,
        endpoint: &str,
        request: &TaskRequest,
    ) -> Result<serde_json::Value, TransportError> {
        let url = join_url(endpoint, TASKS_PATH);
        debug!(url = %url, task_id = %request.task_id, "Sending task");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_reqwest)?;

        // A structured body wins over the status code: workers may report
        // their own failures with a non-2xx status.
        let parsed = serde_json::from_slice::<TaskResponse>(&body);
        match parsed {
            Ok(reply) => {
                if reply.task_id != request.task_id {
                    return Err(TransportError::invalid(format!(
                        "task id mismatch: sent {}, got {}",
                        request.task_id, reply.task_id
                    )));
                }
                if let Some(fault) = reply.error {
                    return Err(TransportError::new(
                        fault.failure_kind(),
                        format!("{}: {}", fault.kind, fault.message),
                    ));
                }
                if !status.is_success() {
                    return Err(classify_status(status, &url));
                }
                Ok(reply.result.unwrap_or(serde_json::Value::Null))
            }
            Err(_) if !status.is_success() => Err(classify_status(status, &url)),
            Err(e) => Err(TransportError::invalid(format!(
                "undecodable task response from {url}: {e}"
            ))),
        }
    }
}

/// Map a non-2xx status without a usable body to a failure kind.
pub fn classify_status(status: StatusCode, url: &str) -> TransportError {
    let message = format!("{url} answered {status}");
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            TransportError::timeout(message)
        }
        StatusCode::TOO_MANY_REQUESTS => TransportError::refused(message),
        s if s.is_server_error() => TransportError::refused(message),
        _ => TransportError::invalid(message),
    }
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::refused(err.to_string())
    } else if err.is_decode() {
        TransportError::invalid(err.to_string())
    } else {
        TransportError::refused(err.to_string())
    }
}
