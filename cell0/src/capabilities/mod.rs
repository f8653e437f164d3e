//! Pluggable external capability providers (spec §1 "deliberately out of
//! scope" / §4.4 CLASSIFY's "optional capability provider").
//!
//! Model providers, search, TTS, the secret store, and the vector store are
//! all external collaborators behind one uniform async interface —
//! analogous to the teacher's `CapabilityProvider` trait, simplified away
//! from the RTFS type system since this core speaks plain JSON, not RTFS
//! values.

use crate::error::{CellError, CellResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// A single external capability (LLM completion, web search, TTS, secret
/// fetch, vector similarity search, ...). `call` takes/returns JSON so the
/// core never needs to know a provider's native SDK types.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    async fn call(&self, operation: &str, input: serde_json::Value) -> CellResult<serde_json::Value>;
}

#[derive(Clone, Default)]
pub struct CapabilityMarketplace {
    providers: Arc<std::sync::RwLock<HashMap<String, Arc<dyn CapabilityProvider>>>>,
}

impl CapabilityMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn CapabilityProvider>) {
        let name = provider.metadata().name.clone();
        self.providers.write().unwrap().insert(name, provider);
    }

    pub async fn call(
        &self,
        provider: &str,
        operation: &str,
        input: serde_json::Value,
    ) -> CellResult<serde_json::Value> {
        let provider = {
            let guard = self.providers.read().unwrap();
            guard.get(provider).cloned()
        };
        let provider = provider.ok_or_else(|| CellError::ProviderUnavailable(provider.to_string()))?;
        provider.call(operation, input).await
    }
}

/// Development/bootstrap stand-in for a real provider, mirroring the
/// teacher's `LocalProvider`: safe to run with no external network access,
/// never used in a production deployment.
pub struct NoopProvider {
    metadata: ProviderMetadata,
}

impl NoopProvider {
    pub fn new(name: &str) -> Self {
        Self {
            metadata: ProviderMetadata {
                name: name.to_string(),
                version: "0.0.0-noop".to_string(),
                description: format!("no-op stand-in for {name}"),
            },
        }
    }
}

#[async_trait]
impl CapabilityProvider for NoopProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn call(&self, operation: &str, input: serde_json::Value) -> CellResult<serde_json::Value> {
        Ok(serde_json::json!({
            "provider": self.metadata.name,
            "operation": operation,
            "echo": input,
            "note": "no-op provider; wire a real capability provider in production",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_provider_is_unavailable() {
        let market = CapabilityMarketplace::new();
        let result = market.call("llm", "complete", serde_json::json!({})).await;
        assert!(matches!(result, Err(CellError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn noop_provider_echoes_input() {
        let market = CapabilityMarketplace::new();
        market.register(Arc::new(NoopProvider::new("llm")));
        let result = market
            .call("llm", "complete", serde_json::json!({"prompt": "hi"}))
            .await
            .unwrap();
        assert_eq!(result["echo"]["prompt"], "hi");
    }
}
