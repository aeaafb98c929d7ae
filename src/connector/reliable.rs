use super::{Connector, GenerationRequest};
use async_trait::async_trait;
use std::time::Duration;

/// Check if an error is non-retryable (client errors that won't resolve with retries).
fn is_non_retryable(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    if is_quota_exhausted(&msg) {
        return true;
    }

    // Check for reqwest status errors (returned by .error_for_status())
    if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>()
        && let Some(status) = reqwest_err.status()
    {
        let code = status.as_u16();
        // 4xx client errors are non-retryable, except:
        // - 429 Too Many Requests (rate limiting, transient)
        // - 408 Request Timeout (transient)
        return status.is_client_error() && code != 429 && code != 408;
    }
    // String fallback: scan for any 4xx status code in error message
    for word in msg.split(|c: char| !c.is_ascii_digit()) {
        if let Ok(code) = word.parse::<u16>()
            && (400..500).contains(&code)
        {
            return code != 429 && code != 408;
        }
    }
    false
}

fn is_quota_exhausted(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("insufficient_quota")
        || lower.contains("exceeded your current quota")
        || lower.contains("billing")
}

/// Connector wrapper with retry + fallback behavior.
///
/// Tries each inner connector in order; within one connector, transient
/// failures are retried with exponential backoff before falling through to
/// the next.
pub struct ReliableConnector {
    connectors: Vec<(String, Box<dyn Connector>)>,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl ReliableConnector {
    pub fn new(
        connectors: Vec<(String, Box<dyn Connector>)>,
        max_retries: u32,
        base_backoff_ms: u64,
    ) -> Self {
        Self {
            connectors,
            max_retries,
            base_backoff_ms: base_backoff_ms.max(50),
        }
    }
}

#[async_trait]
impl Connector for ReliableConnector {
    fn name(&self) -> &str {
        self.connectors
            .first()
            .map_or("reliable", |(name, _)| name.as_str())
    }

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        let mut failures = Vec::new();

        for (connector_name, connector) in &self.connectors {
            let mut backoff_ms = self.base_backoff_ms;

            for attempt in 0..=self.max_retries {
                match connector.generate(request).await {
                    Ok(text) => {
                        if attempt > 0 {
                            tracing::info!(
                                connector = connector_name.as_str(),
                                attempt,
                                "Connector recovered after retries"
                            );
                        }
                        return Ok(text);
                    }
                    Err(err) => {
                        if is_non_retryable(&err) {
                            tracing::warn!(
                                connector = connector_name.as_str(),
                                "Non-retryable error, falling through: {err}"
                            );
                            failures.push(format!("{connector_name}: {err}"));
                            break;
                        }
                        if attempt == self.max_retries {
                            tracing::warn!(
                                connector = connector_name.as_str(),
                                "Retries exhausted: {err}"
                            );
                            failures.push(format!("{connector_name}: {err}"));
                            break;
                        }
                        tracing::debug!(
                            connector = connector_name.as_str(),
                            attempt,
                            backoff_ms,
                            "Transient connector failure, backing off"
                        );
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = backoff_ms.saturating_mul(2);
                    }
                }
            }
        }

        anyhow::bail!("all connectors failed: [{}]", failures.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyConnector {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                anyhow::bail!("HTTP 503: temporarily unavailable");
            }
            Ok("recovered".to_string())
        }
    }

    struct AlwaysClientError;

    #[async_trait]
    impl Connector for AlwaysClientError {
        fn name(&self) -> &str {
            "broken"
        }

        async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<String> {
            anyhow::bail!("HTTP 401: unauthorized")
        }
    }

    struct AlwaysOk(&'static str);

    #[async_trait]
    impl Connector for AlwaysOk {
        fn name(&self) -> &str {
            "ok"
        }

        async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let reliable = ReliableConnector::new(
            vec![(
                "flaky".into(),
                Box::new(FlakyConnector {
                    fail_first: 2,
                    calls: AtomicU32::new(0),
                }),
            )],
            3,
            50,
        );
        let text = reliable
            .generate(&GenerationRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "recovered");
    }

    #[tokio::test]
    async fn falls_through_on_client_error() {
        let reliable = ReliableConnector::new(
            vec![
                ("broken".into(), Box::new(AlwaysClientError) as Box<dyn Connector>),
                ("ok".into(), Box::new(AlwaysOk("fallback")) as Box<dyn Connector>),
            ],
            3,
            50,
        );
        let text = reliable
            .generate(&GenerationRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "fallback");
    }

    #[tokio::test]
    async fn reports_all_failures_when_exhausted() {
        let reliable = ReliableConnector::new(
            vec![("broken".into(), Box::new(AlwaysClientError) as Box<dyn Connector>)],
            1,
            50,
        );
        let err = reliable
            .generate(&GenerationRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn quota_errors_are_non_retryable() {
        let err = anyhow::anyhow!("insufficient_quota: please check billing");
        assert!(is_non_retryable(&err));
    }

    #[test]
    fn rate_limit_status_is_retryable() {
        let err = anyhow::anyhow!("HTTP 429: too many requests");
        assert!(!is_non_retryable(&err));
    }

    #[test]
    fn plain_4xx_in_message_is_non_retryable() {
        let err = anyhow::anyhow!("HTTP 404: model not found");
        assert!(is_non_retryable(&err));
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = anyhow::anyhow!("HTTP 502: bad gateway");
        assert!(!is_non_retryable(&err));
    }
}
