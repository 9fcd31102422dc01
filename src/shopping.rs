use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ShoppingListConfig;
use crate::reply::ReplyBody;

/// One line of a shopping list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub quantity: i64,
    pub name: String,
}

/// The shopping-list service. Every operation returns a ready-to-display body.
#[async_trait]
pub trait ShoppingList: Send + Sync {
    async fn retrieve_latest(&self) -> Result<ReplyBody>;
    async fn complete_list(&self) -> Result<ReplyBody>;
    async fn append(&self, item: Item) -> Result<ReplyBody>;
}

/// Client for the shopping-list service's HTTP API
pub struct HttpShoppingList {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpShoppingList {
    pub fn new(config: &ShoppingListConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<ReplyBody> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let response = request
            .send()
            .await
            .with_context(|| {
                format!("Failed to send {} request to shopping list service", what)
            })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!("Shopping list service returned no content for {}", what);
            return Ok(ReplyBody::default());
        }
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Shopping list service error ({}): {}", status, error_body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }
}

#[async_trait]
impl ShoppingList for HttpShoppingList {
    async fn retrieve_latest(&self) -> Result<ReplyBody> {
        let request = self.client.get(self.endpoint("lists/latest"));
        self.send(request, "retrieve").await
    }

    async fn complete_list(&self) -> Result<ReplyBody> {
        let request = self.client.post(self.endpoint("lists/latest/complete"));
        self.send(request, "complete").await
    }

    async fn append(&self, item: Item) -> Result<ReplyBody> {
        let request = self
            .client
            .post(self.endpoint("lists/latest/items"))
            .json(&item);
        self.send(request, "append").await
    }
}
