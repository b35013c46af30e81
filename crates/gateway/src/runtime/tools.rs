//! Tool dispatch.
//!
//! Tools live in a separate service; the gateway discovers the catalog at
//! boot and forwards invocations over HTTP. The dispatcher trait keeps the
//! loop testable with scripted tools.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use parley_domain::chat::ToolDefinition;
use parley_domain::config::ToolsConfig;
use parley_domain::{Error, Result};

/// Per-request context threaded into every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    /// The caller's bearer credential, forwarded verbatim to the tool
    /// service when present.
    pub forwarded_credential: Option<String>,
}

/// Executes named tools against their inputs.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// The catalog advertised to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one tool to completion. The result is the raw text fed back to
    /// the model as the tool result.
    async fn execute(&self, name: &str, input: &Value, ctx: &ToolContext) -> Result<String>;
}

/// HTTP-backed dispatcher talking to the tool service.
pub struct HttpToolDispatcher {
    client: reqwest::Client,
    base_url: String,
    catalog: Vec<ToolDefinition>,
}

impl HttpToolDispatcher {
    /// Connect to the tool service and fetch its catalog. A catalog fetch
    /// failure degrades to an empty catalog instead of refusing to boot:
    /// chat still works, just without tools.
    pub async fn connect(cfg: &ToolsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(crate::runtime::from_reqwest)?;

        let base_url = cfg.base_url.trim_end_matches('/').to_string();

        let catalog = match Self::fetch_catalog(&client, &base_url).await {
            Ok(catalog) => {
                tracing::info!(tools = catalog.len(), "tool catalog loaded");
                catalog
            }
            Err(e) => {
                tracing::warn!(error = %e, "tool service unreachable, starting with empty catalog");
                Vec::new()
            }
        };

        Ok(Self {
            client,
            base_url,
            catalog,
        })
    }

    async fn fetch_catalog(client: &reqwest::Client, base_url: &str) -> Result<Vec<ToolDefinition>> {
        let resp = client
            .get(format!("{base_url}/tools"))
            .send()
            .await
            .map_err(crate::runtime::from_reqwest)?
            .error_for_status()
            .map_err(crate::runtime::from_reqwest)?;
        let catalog = resp
            .json::<Vec<ToolDefinition>>()
            .await
            .map_err(crate::runtime::from_reqwest)?;
        Ok(catalog)
    }
}

#[async_trait]
impl ToolDispatcher for HttpToolDispatcher {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.clone()
    }

    async fn execute(&self, name: &str, input: &Value, ctx: &ToolContext) -> Result<String> {
        let mut req = self
            .client
            .post(format!("{}/tools/{name}", self.base_url))
            .json(&serde_json::json!({
                "input": input,
                "user_id": ctx.user_id,
            }));
        if let Some(credential) = &ctx.forwarded_credential {
            req = req.bearer_auth(credential);
        }

        let resp = req.send().await.map_err(crate::runtime::from_reqwest)?;
        let status = resp.status();
        let body = resp.text().await.map_err(crate::runtime::from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Tool {
                tool: name.to_owned(),
                message: format!("tool service returned {status}: {body}"),
            });
        }
        Ok(body)
    }
}
