use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::error::{ExporterError, Result};
use crate::providers::gitlab::types::{Page, PageInfo};

const RETRY_DELAY_SECONDS: u64 = 2;
const PAGE_SIZE: u32 = 50;

/// Transport settings for [`GitLabClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    /// Extra attempts on rate limiting, server errors and connection failures
    pub max_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }
}

/// Thin REST v4 client: authentication, retries and header-based pagination.
pub struct GitLabClient {
    client: Client,
    api_url: Url,
    token: Option<Token>,
    max_retries: u32,
}

impl GitLabClient {
    pub fn new(base_url: &str, token: Option<Token>, options: &ClientOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("gitlab-ci-pipelines-exporter/", env!("CARGO_PKG_VERSION")))
            .timeout(options.timeout)
            .build()
            .map_err(|e| ExporterError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base = Url::parse(base_url)
            .map_err(|e| ExporterError::Config(format!("Invalid base URL: {e}")))?;

        // Url::join drops the last path segment unless it ends with a slash,
        // which would lose the prefix of self-hosted instances under a sub-path.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let api_url = base
            .join("api/v4/")
            .map_err(|e| ExporterError::Config(format!("Invalid API base URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
            max_retries: options.max_retries,
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path)
            .map_err(|e| ExporterError::Config(format!("Invalid API path {path}: {e}")))
    }

    /// Send a GET request, retrying on network errors, rate limits and 5xx.
    async fn send(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = self.endpoint(path)?;

        let mut retry_count = 0;
        loop {
            let request = self.auth_request(self.client.get(url.clone()).query(query));

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if retry_count >= self.max_retries {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({e}), retrying in {RETRY_DELAY_SECONDS}s ({}/{})...",
                        retry_count + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.max_retries {
                    if self.max_retries == 0 {
                        return Err(api_error(response).await);
                    }
                    return Err(ExporterError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: self.max_retries,
                    });
                }

                warn!(
                    "GitLab API error (status {status}) on {path}. Waiting {RETRY_DELAY_SECONDS} seconds before retry {}/{}...",
                    retry_count + 1,
                    self.max_retries
                );

                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                retry_count += 1;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ExporterError::Unauthorized(status.as_u16()));
            }

            if !status.is_success() {
                return Err(api_error(response).await);
            }

            return Ok(response);
        }
    }

    /// Fetch a single JSON resource.
    pub(super) async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(path, query).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch one page of a list endpoint with the fixed page size.
    pub(super) async fn get_page<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
        page: u32,
    ) -> Result<Page<T>>
    where
        T: DeserializeOwned,
    {
        let mut query = query.to_vec();
        query.push(("per_page", PAGE_SIZE.to_string()));
        query.push(("page", page.to_string()));

        let response = self.send(path, &query).await?;
        let info = page_info(response.headers(), page);
        let body = response.bytes().await?;
        let items: Vec<T> = serde_json::from_slice(&body)?;

        debug!(
            "Fetched page {}/{} of {path} ({} items)",
            info.page,
            info.total_pages.map_or_else(|| "?".to_string(), |t| t.to_string()),
            items.len()
        );

        Ok(Page { items, info })
    }

    /// Walk every page of a list endpoint and concatenate the results.
    pub(super) async fn get_all<T>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut all_items = Vec::new();
        let mut page = 1;

        loop {
            let Page { items, info } = self.get_page(path, query, page).await?;
            all_items.extend(items);

            match info.next() {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(all_items)
    }
}

async fn api_error(response: Response) -> ExporterError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());
    ExporterError::Api { status, message }
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn page_info(headers: &HeaderMap, requested: u32) -> PageInfo {
    PageInfo {
        page: header_number(headers, "x-page").unwrap_or(requested),
        total_pages: header_number(headers, "x-total-pages"),
        next_page: header_number(headers, "x-next-page"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn builds_api_url_from_base() {
        let client = GitLabClient::new("https://gitlab.com", None, &ClientOptions::default()).unwrap();
        assert_eq!(client.api_url().as_str(), "https://gitlab.com/api/v4/");
    }

    #[test]
    fn keeps_sub_path_of_self_hosted_instance() {
        let client =
            GitLabClient::new("https://example.com/gitlab", None, &ClientOptions::default()).unwrap();
        assert_eq!(client.api_url().as_str(), "https://example.com/gitlab/api/v4/");
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = GitLabClient::new("not a url", None, &ClientOptions::default());
        assert!(matches!(result, Err(ExporterError::Config(_))));
    }

    #[test]
    fn parses_pagination_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-page", HeaderValue::from_static("2"));
        headers.insert("x-total-pages", HeaderValue::from_static("4"));
        headers.insert("x-next-page", HeaderValue::from_static("3"));

        let info = page_info(&headers, 2);
        assert_eq!(info.page, 2);
        assert_eq!(info.total_pages, Some(4));
        assert_eq!(info.next_page, Some(3));
    }

    #[test]
    fn empty_next_page_header_means_last_page() {
        let mut headers = HeaderMap::new();
        headers.insert("x-next-page", HeaderValue::from_static(""));

        let info = page_info(&headers, 5);
        assert_eq!(info.page, 5);
        assert_eq!(info.total_pages, None);
        assert_eq!(info.next(), None);
    }

    #[tokio::test]
    async fn sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/1/pipelines/7")
            .match_query(mockito::Matcher::Any)
            .match_header("authorization", "Bearer glpat-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": 7, "ref": "main", "status": "success", "duration": 3, "created_at": "2024-01-01T00:00:00Z"}"#)
            .create_async()
            .await;

        let client = GitLabClient::new(
            &server.url(),
            Some(Token::from("glpat-test")),
            &ClientOptions::default(),
        )
        .unwrap();

        let pipeline = client.get_pipeline(1, 7).await.unwrap();
        assert_eq!(pipeline.id, 7);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn maps_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/1/pipelines/7")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body(r#"{"message": "401 Unauthorized"}"#)
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), None, &ClientOptions::default()).unwrap();
        let result = client.get_pipeline(1, 7).await;
        assert!(matches!(result, Err(ExporterError::Unauthorized(401))));
    }

    #[tokio::test]
    async fn reports_server_error_without_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/1/pipelines/7")
            .match_query(mockito::Matcher::Any)
            .with_status(502)
            .with_body("bad gateway")
            .expect(1)
            .create_async()
            .await;

        let options = ClientOptions {
            max_retries: 0,
            ..ClientOptions::default()
        };
        let client = GitLabClient::new(&server.url(), None, &options).unwrap();
        let result = client.get_pipeline(1, 7).await;

        match result {
            Err(ExporterError::Api { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("expected API error, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_rate_limited_requests() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/1/pipelines/7")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let options = ClientOptions {
            max_retries: 1,
            ..ClientOptions::default()
        };
        let client = GitLabClient::new(&server.url(), None, &options).unwrap();
        let result = client.get_pipeline(1, 7).await;

        assert!(matches!(
            result,
            Err(ExporterError::ApiErrorAfterRetries {
                status: 429,
                retries: 1
            })
        ));
        mock.assert_async().await;
    }
}
