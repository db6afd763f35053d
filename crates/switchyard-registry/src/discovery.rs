use crate::registry::AgentRegistry;
use futures_util::future::join_all;
use switchyard_core::{AgentCard, SwitchyardResult, TransportError};
use tracing::{info, warn};

/// Outcome of one refresh pass.
#[derive(Debug, Default, Clone)]
pub struct RefreshReport {
    /// Agent ids whose cards were (re-)registered.
    pub registered: Vec<String>,
    /// Endpoints that did not answer with a usable card.
    pub failed: Vec<(String, TransportError)>,
}

impl RefreshReport {
    /// Whether every endpoint answered.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl AgentRegistry {
    /// Fetch the card published at `endpoint` and register it.
    pub async fn discover(&self, endpoint: &str) -> SwitchyardResult<AgentCard> {
        let card = self.fetch_card(endpoint).await?;
        if card.endpoint.trim_end_matches('/') != endpoint.trim_end_matches('/') {
            warn!(
                agent_id = %card.id,
                probed = %endpoint,
                advertised = %card.endpoint,
                "Agent advertises a different endpoint than the one probed"
            );
        }
        self.register(card.clone());
        Ok(card)
    }

    /// Re-issue discovery to every known endpoint concurrently.
    ///
    /// Responders are re-registered with a fresh expiry; endpoints that fail
    /// are only reported, their entries are left to expire on their own.
    pub async fn refresh(&self) -> RefreshReport {
        let endpoints = self.known_endpoints();
        let probes = endpoints.into_iter().map(|endpoint| async move {
            let result = self.fetch_card(&endpoint).await;
            (endpoint, result)
        });

        let mut report = RefreshReport::default();
        for (endpoint, result) in join_all(probes).await {
            match result {
                Ok(card) => {
                    report.registered.push(card.id.clone());
                    self.register(card);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Discovery failed");
                    report.failed.push((endpoint, e));
                }
            }
        }

        info!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            "Discovery refresh complete"
        );
        report
    }

    async fn fetch_card(&self, endpoint: &str) -> Result<AgentCard, TransportError> {
        let card = tokio::time::timeout(self.discovery_timeout, self.transport.discover(endpoint))
            .await
            .map_err(|_| {
                TransportError::timeout(format!(
                    "discovery of {endpoint} exceeded {}ms",
                    self.discovery_timeout.as_millis()
                ))
            })??;

        if card.id.trim().is_empty() {
            return Err(TransportError::invalid(format!(
                "agent at {endpoint} published a card without an id"
            )));
        }
        Ok(card)
    }
}
