use std::time::Duration;

use async_trait::async_trait;
use murmur_types::api::{HistoryEntry, HistoryRequest, HistoryResponse, SendMessageRequest};
use murmur_types::{PeerId, UserId};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::backend::{HistorySource, MessageStore};
use crate::error::CollaboratorError;

pub const HISTORY_ROUTE: &str = "api/messages/getmsg";
pub const SEND_ROUTE: &str = "api/messages/addmsg";

/// Longest slice of an error body kept in [`CollaboratorError::Status`].
const ERROR_BODY_LIMIT: usize = 200;

/// REST client for the chat server's message endpoints.
///
/// Serves as both the [`HistorySource`] and the [`MessageStore`] of a
/// session.
pub struct HttpApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let mut base_url = Url::parse(base_url)?;
        // `join` replaces the last path segment unless the base ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn post<T: Serialize>(&self, route: &str, body: &T) -> Result<RequestBuilder, CollaboratorError> {
        let url = self.base_url.join(route)?;
        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    /// Send `request` and return the body of a 2xx answer.
    async fn execute(&self, request: RequestBuilder) -> Result<String, CollaboratorError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl HistorySource for HttpApi {
    async fn fetch_history(
        &self,
        from: &UserId,
        to: &PeerId,
    ) -> Result<Vec<HistoryEntry>, CollaboratorError> {
        let request = self.post(
            HISTORY_ROUTE,
            &HistoryRequest {
                from: from.clone(),
                to: to.clone(),
            },
        )?;
        let body = self.execute(request).await?;

        let entries = serde_json::from_str::<HistoryResponse>(&body)?.into_entries();
        debug!(%from, %to, count = entries.len(), "fetched history");
        Ok(entries)
    }
}

#[async_trait]
impl MessageStore for HttpApi {
    async fn persist(&self, request: &SendMessageRequest) -> Result<(), CollaboratorError> {
        let builder = self.post(SEND_ROUTE, request)?;
        self.execute(builder).await?;
        debug!(from = %request.from, to = %request.to, "message stored");
        Ok(())
    }
}
