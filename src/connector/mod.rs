pub mod http;
pub mod reliable;

pub use http::HttpConnector;
pub use reliable::ReliableConnector;

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use std::pin::Pin;

// ─── Contract ────────────────────────────────────────────────────────────────

/// One generation request to a reasoning-tier connector.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.3,
            max_tokens: 1500,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

pub type TextStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// Reasoning-tier connector. No contract is placed on output structure;
/// recovering structure is entirely the caller's parsing layer's burden.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connector identifier (e.g. "planner", "fast", "strong").
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String>;

    /// Streamed variant. The default buffers the whole generation and
    /// yields it as a single chunk; connectors with native streaming
    /// override this.
    async fn generate_stream(&self, request: &GenerationRequest) -> anyhow::Result<TextStream> {
        let text = self.generate(request).await?;
        Ok(Box::pin(stream::once(async move { Ok(text) })))
    }
}

/// Connector for offline operation: every generation fails, pushing
/// callers onto their rule-based fallbacks (the analyzer's keyword plan,
/// the presenter's template).
pub struct NullConnector;

#[async_trait]
impl Connector for NullConnector {
    fn name(&self) -> &str {
        "offline"
    }

    async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<String> {
        anyhow::bail!("no connector configured")
    }
}

// ─── Tiers ───────────────────────────────────────────────────────────────────

/// Ranked verification tiers. Used only for specialist calls, never for
/// user-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SpecialistTier {
    Fast,
    Strong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    struct FixedConnector(&'static str);

    #[async_trait]
    impl Connector for FixedConnector {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn default_stream_yields_whole_generation() {
        let connector = FixedConnector("hello");
        let request = GenerationRequest::new("hi");
        let mut stream = connector.generate_stream(&request).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "hello");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn request_builder_sets_fields() {
        let request = GenerationRequest::new("plan this")
            .with_system("you are a planner")
            .with_temperature(0.1)
            .with_max_tokens(800);
        assert_eq!(request.system.as_deref(), Some("you are a planner"));
        assert_eq!(request.max_tokens, 800);
        assert!((request.temperature - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(SpecialistTier::Fast < SpecialistTier::Strong);
        assert_eq!(SpecialistTier::Strong.to_string(), "strong");
    }
}
