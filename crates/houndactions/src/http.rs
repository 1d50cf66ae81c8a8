use async_trait::async_trait;
use houndcore::{
    ActionRequest, ActionResponse, BackendIngest, IngestRequest, IngestResponse, PageAutomation,
    StepError,
};

/// Page-automation surface reached over HTTP. Each action is POSTed
/// as its JSON envelope to `<base>/action`; the peer answers with the
/// response envelope.
pub struct HttpAutomation {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAutomation {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn action_url(&self) -> String {
        format!("{}/action", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl PageAutomation for HttpAutomation {
    async fn dispatch(&self, request: ActionRequest) -> Result<ActionResponse, StepError> {
        tracing::debug!(action = %request.action, endpoint = %self.endpoint, "dispatching over http");
        let response = self
            .client
            .post(self.action_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| StepError::Network(format!("automation endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StepError::Network(format!(
                "automation endpoint returned {status}"
            )));
        }
        response
            .json::<ActionResponse>()
            .await
            .map_err(|e| StepError::Network(format!("malformed action response: {e}")))
    }
}

/// Ingestion backend reached over HTTP, POSTing entity envelopes to
/// `<base>/ingest`.
pub struct HttpIngest {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIngest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn ingest_url(&self) -> String {
        format!("{}/ingest", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl BackendIngest for HttpIngest {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, StepError> {
        tracing::debug!(entity_type = %request.entity_type, "ingesting entity over http");
        let response = self
            .client
            .post(self.ingest_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| StepError::Network(format!("ingest endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StepError::Network(format!(
                "ingest endpoint returned {status}"
            )));
        }
        response
            .json::<IngestResponse>()
            .await
            .map_err(|e| StepError::Network(format!("malformed ingest response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trailing_slash_normalized() {
        let automation = HttpAutomation::new("http://localhost:9222/");
        assert_eq!(automation.action_url(), "http://localhost:9222/action");
        let ingest = HttpIngest::new("http://localhost:8080");
        assert_eq!(ingest.ingest_url(), "http://localhost:8080/ingest");
    }
}
