use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::QuizSettings;
use crate::error::IngestionError;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Where quiz spreadsheets come from.
#[async_trait]
pub trait QuizSource: Send + Sync {
    /// Comma-delimited export of the quiz sheet, header row included.
    async fn fetch_csv(&self, quiz_id: &str) -> Result<String, IngestionError>;
}

/// Published Google Sheets export over HTTP.
pub struct HttpQuizSource {
    http_client: Client,
    base_url: Url,
    timeout: Duration,
    retry: RetryConfig,
}

impl HttpQuizSource {
    pub fn new(settings: &QuizSettings) -> Result<Self> {
        let base_url = Url::parse(&settings.sheet_base_url)
            .with_context(|| format!("Invalid sheet base URL {}", settings.sheet_base_url))?;
        let timeout = settings.fetch_timeout();
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for quiz source")?;

        Ok(Self {
            http_client,
            base_url,
            timeout,
            retry: RetryConfig::with_attempts(settings.fetch_attempts),
        })
    }

    pub fn sheet_url(&self, quiz_id: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("gid", quiz_id)
            .append_pair("single", "true")
            .append_pair("output", "csv");
        url
    }

    async fn fetch_once(&self, quiz_id: &str) -> Result<String, IngestionError> {
        let url = self.sheet_url(quiz_id);
        debug!(quiz_id, url = %url, "Fetching quiz sheet");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|source| self.classify(quiz_id, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestionError::Status {
                quiz_id: quiz_id.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|source| self.classify(quiz_id, source))
    }

    fn classify(&self, quiz_id: &str, source: reqwest::Error) -> IngestionError {
        if source.is_timeout() {
            IngestionError::Timeout {
                quiz_id: quiz_id.to_string(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            IngestionError::Fetch {
                quiz_id: quiz_id.to_string(),
                source,
            }
        }
    }
}

#[async_trait]
impl QuizSource for HttpQuizSource {
    async fn fetch_csv(&self, quiz_id: &str) -> Result<String, IngestionError> {
        retry_async_with_config(&self.retry, IngestionError::is_transient, || {
            self.fetch_once(quiz_id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_url_carries_gid_and_csv_output() {
        let source = HttpQuizSource::new(&QuizSettings {
            sheet_base_url: "https://docs.google.com/spreadsheets/d/e/abc/pub".into(),
            ..QuizSettings::default()
        })
        .unwrap();

        assert_eq!(
            source.sheet_url("66546920").as_str(),
            "https://docs.google.com/spreadsheets/d/e/abc/pub?gid=66546920&single=true&output=csv"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = HttpQuizSource::new(&QuizSettings {
            sheet_base_url: "not a url".into(),
            ..QuizSettings::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn silent_server_times_out_after_every_attempt() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            // hold sockets open without ever answering
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        let source = HttpQuizSource::new(&QuizSettings {
            sheet_base_url: format!("http://127.0.0.1:{port}/pub"),
            fetch_timeout_secs: 1,
            fetch_attempts: 2,
            ..QuizSettings::default()
        })
        .unwrap();

        let err = source.fetch_csv("66546920").await.unwrap_err();

        assert!(
            matches!(err, IngestionError::Timeout { ref quiz_id, seconds: 1 } if quiz_id == "66546920"),
            "unexpected error: {err}"
        );
        assert_eq!(err.kind(), "timeout");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }
}
