use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use colloquy_core::{RemoteContextId, RemoteError, Turn};

use crate::store::{ContextInfo, ContextStore};
use crate::wire::{
    AppendTurnRequest, AppendTurnResponse, ContextsPayload, CreateContextRequest,
    CreateContextResponse, DeleteContextResponse, TurnsPayload,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(3),
        }
    }

    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// reqwest client for the remote context store's REST surface.
pub struct HttpContextStore {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpContextStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, RemoteError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| RemoteError::Protocol(format!("invalid base url {}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Protocol(format!(
                "base url {} cannot hold a path",
                config.base_url
            )));
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(config.timeout))
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            timeout: config.timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL plus `segments`, each percent-encoded as one path segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn dispatch(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let req = match &self.api_key {
            Some(key) => req.bearer_auth(key.expose_secret()),
            None => req,
        };
        req.header("accept", "application/json")
            .send()
            .await
            .map_err(|e| self.classify(e))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = self.dispatch(req).await?;
        check_status(resp).await
    }

    /// Read the body; `None` for an empty body.
    async fn body<T: DeserializeOwned>(&self, resp: Response) -> Result<Option<T>, RemoteError> {
        let bytes = resp.bytes().await.map_err(|e| self.classify(e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RemoteError::Protocol(format!("malformed payload: {e}")))
    }

    async fn required<T: DeserializeOwned>(&self, resp: Response) -> Result<T, RemoteError> {
        self.body(resp)
            .await?
            .ok_or_else(|| RemoteError::Protocol("empty response body".into()))
    }

    fn classify(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if e.is_decode() {
            RemoteError::Protocol(e.to_string())
        } else {
            RemoteError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl ContextStore for HttpContextStore {
    async fn health_check(&self) -> Result<(), RemoteError> {
        self.send(self.client.get(self.url(&["contexts"]))).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>, RemoteError> {
        let resp = self.send(self.client.get(self.url(&["contexts"]))).await?;
        let payload: ContextsPayload = self.required(resp).await?;
        Ok(payload.into_contexts())
    }

    #[instrument(skip(self))]
    async fn create_context(&self, label: &str) -> Result<RemoteContextId, RemoteError> {
        let req = self
            .client
            .post(self.url(&["contexts"]))
            .json(&CreateContextRequest { label });
        let resp = self.send(req).await?;
        let created: CreateContextResponse = self.required(resp).await?;
        if created.id.is_empty() {
            return Err(RemoteError::Protocol("create returned an empty id".into()));
        }
        debug!(remote_context_id = %created.id, "remote context created");
        Ok(created.id)
    }

    #[instrument(skip(self, turn), fields(remote_context_id = %id, content_hash = %turn.content_hash))]
    async fn append_turn(&self, id: &RemoteContextId, turn: &Turn) -> Result<(), RemoteError> {
        let req = self
            .client
            .post(self.url(&["contexts", id.as_str(), "turns"]))
            .json(&AppendTurnRequest::from(turn));
        let resp = self.send(req).await?;
        match self.body::<AppendTurnResponse>(resp).await? {
            Some(AppendTurnResponse { accepted: false }) => {
                Err(RemoteError::Protocol("turn not accepted".into()))
            }
            _ => Ok(()),
        }
    }

    #[instrument(skip(self), fields(remote_context_id = %id))]
    async fn get_turns(&self, id: &RemoteContextId, limit: usize) -> Result<Vec<Turn>, RemoteError> {
        let req = self
            .client
            .get(self.url(&["contexts", id.as_str(), "turns"]))
            .query(&[("limit", limit)]);
        let resp = self.send(req).await?;
        let payload: TurnsPayload = self.required(resp).await?;
        let turns = payload.into_turns()?;
        if turns.len() > limit {
            return Err(RemoteError::Protocol(format!(
                "asked for at most {limit} turns, got {}",
                turns.len()
            )));
        }
        Ok(turns)
    }

    #[instrument(skip(self), fields(remote_context_id = %id))]
    async fn delete_context(&self, id: &RemoteContextId) -> Result<bool, RemoteError> {
        let req = self.client.delete(self.url(&["contexts", id.as_str()]));
        let resp = self.dispatch(req).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let resp = check_status(resp).await?;
        Ok(self
            .body::<DeleteContextResponse>(resp)
            .await?
            .map_or(true, |r| r.deleted))
    }
}

async fn check_status(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status.as_u16(), body))
}
