use crate::config::UnreadConfig;
use crate::error::{RelayError, RelayResult};
use crate::websocket::UserId;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Source of a user's unread notification count
#[async_trait]
pub trait UnreadCountProvider: Send + Sync {
    async fn unread_count(&self, user_id: &UserId) -> RelayResult<u64>;
}

/// Build the provider selected by configuration
pub fn provider_from_config(config: &UnreadConfig) -> RelayResult<Arc<dyn UnreadCountProvider>> {
    match &config.service_url {
        Some(url) => Ok(Arc::new(HttpUnreadCountProvider::new(
            url,
            Duration::from_millis(config.timeout_ms),
        )?)),
        None => {
            tracing::warn!("UNREAD_COUNT_SERVICE_URL not set, get_unread_count will fail");
            Ok(Arc::new(UnavailableUnreadCountProvider))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCountBody {
    #[serde(alias = "count", alias = "unread_count")]
    unread_count: u64,
}

/// Queries `GET {base}/users/{userId}/unread-count` on the inbox service
#[derive(Clone)]
pub struct HttpUnreadCountProvider {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpUnreadCountProvider {
    pub fn new(base_url: &str, timeout: Duration) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {}", e)))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| RelayError::Config(format!("invalid unread count service URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RelayError::Config(format!(
                "unread count service URL cannot be a base: {}",
                base_url
            )));
        }

        Ok(Self { client, base_url })
    }

    /// User ids are percent-encoded as a single path segment
    fn url_for(&self, user_id: &UserId) -> RelayResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RelayError::Config("unread count service URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["users", user_id.as_str(), "unread-count"]);
        Ok(url)
    }
}

#[async_trait]
impl UnreadCountProvider for HttpUnreadCountProvider {
    async fn unread_count(&self, user_id: &UserId) -> RelayResult<u64> {
        let body: UnreadCountBody = self
            .client
            .get(self.url_for(user_id)?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.unread_count)
    }
}

/// Used when no unread-count service is configured
pub struct UnavailableUnreadCountProvider;

#[async_trait]
impl UnreadCountProvider for UnavailableUnreadCountProvider {
    async fn unread_count(&self, _user_id: &UserId) -> RelayResult<u64> {
        Err(RelayError::upstream("unread count service is not configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_trims_trailing_slash() {
        let provider =
            HttpUnreadCountProvider::new("http://inbox:8080/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            provider.url_for(&UserId::new("u1")).unwrap().as_str(),
            "http://inbox:8080/api/users/u1/unread-count"
        );
    }

    #[test]
    fn test_url_for_encodes_user_id() {
        let provider =
            HttpUnreadCountProvider::new("http://inbox:8080/api", Duration::from_secs(1)).unwrap();
        let url = provider.url_for(&UserId::new("a/b?c#d")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://inbox:8080/api/users/a%2Fb%3Fc%23d/unread-count"
        );
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            HttpUnreadCountProvider::new("not a url", Duration::from_secs(1)),
            Err(RelayError::Config(_))
        ));
        assert!(matches!(
            HttpUnreadCountProvider::new("mailto:inbox@example.com", Duration::from_secs(1)),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn test_body_accepts_count_aliases() {
        let body: UnreadCountBody = serde_json::from_str(r#"{"unreadCount": 3}"#).unwrap();
        assert_eq!(body.unread_count, 3);
        let body: UnreadCountBody = serde_json::from_str(r#"{"count": 5}"#).unwrap();
        assert_eq!(body.unread_count, 5);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_upstream_error() {
        let provider = provider_from_config(&UnreadConfig {
            service_url: None,
            timeout_ms: 100,
        })
        .unwrap();
        let err = provider.unread_count(&UserId::new("u1")).await.unwrap_err();
        assert!(matches!(err, RelayError::UpstreamUnavailable(_)));
    }
}
