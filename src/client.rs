use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct QueryRequest {
    query: String,
}

#[derive(Serialize)]
struct SetContextRequest {
    context: String,
}

#[derive(Debug, Deserialize)]
pub struct ContextsResponse {
    #[serde(default)]
    pub contexts: Vec<String>,
    #[serde(default)]
    pub current: Option<String>,
}

#[derive(Deserialize)]
struct CommandsResponse {
    #[serde(default)]
    commands: Vec<String>,
}

#[derive(Deserialize)]
struct AckResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the kubectl-ai web backend. All endpoints are JSON except
/// `query`, whose body streams newline-delimited records and is handed back
/// undrained.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Submit a query. Returns the streaming response; the caller drives the
    /// body through the stream consumer.
    pub async fn query(&self, query: &str) -> Result<reqwest::Response> {
        let url = format!("{}/api/query", self.base_url);

        let request = QueryRequest {
            query: query.to_string(),
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Query failed with status: {}. Is the kubectl-ai server running?",
                response.status()
            ));
        }

        Ok(response)
    }

    pub async fn contexts(&self) -> Result<ContextsResponse> {
        let url = format!("{}/api/contexts", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to list contexts: {}", response.status()));
        }

        Ok(response.json().await?)
    }

    pub async fn set_context(&self, context: &str) -> Result<()> {
        let url = format!("{}/api/contexts/set", self.base_url);

        let request = SetContextRequest {
            context: context.to_string(),
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to switch context: {}", response.status()));
        }

        let ack: AckResponse = response.json().await?;
        if !ack.success {
            return Err(anyhow!(
                "Context switch rejected: {}",
                ack.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        Ok(())
    }

    pub async fn available_commands(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/available-commands", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to fetch example queries: {}",
                response.status()
            ));
        }

        let commands: CommandsResponse = response.json().await?;
        Ok(commands.commands)
    }

    pub async fn reset_conversation(&self) -> Result<()> {
        let url = format!("{}/api/reset_conversation", self.base_url);

        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to reset conversation: {}",
                response.status()
            ));
        }

        let ack: AckResponse = response.json().await?;
        if !ack.success {
            return Err(anyhow!(
                "Reset rejected: {}",
                ack.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        Ok(())
    }
}
