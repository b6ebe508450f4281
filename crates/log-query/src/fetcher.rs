//! Remote log listing
//!
//! `LogFetcher` is the seam between sharding and the wire; `CloudLoggingClient`
//! implements it against the Cloud Logging v2 REST API.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use transport::{HttpClient, PageClient};

pub const DEFAULT_ENDPOINT: &str = "https://logging.googleapis.com";
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Streams raw entries matching a filter.
pub trait LogFetcher: Send + Sync {
    /// Push every matching entry onto `sender` in order, then drop it.
    ///
    /// Returns `Error::Cancelled` when `cancel` fires first.
    fn list_entries(
        &self,
        cancel: CancellationToken,
        resource_names: Vec<String>,
        filter: String,
        sender: mpsc::Sender<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesRequest<'a> {
    resource_names: &'a [String],
    filter: &'a str,
    order_by: &'static str,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesResponse {
    #[serde(default)]
    entries: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListLogsResponse {
    #[serde(default)]
    log_names: Vec<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct CloudLoggingClient {
    pages: PageClient,
    endpoint: String,
    page_size: u32,
}

impl CloudLoggingClient {
    /// `client` is normally a `RetryHttpClient` over a `BaseHttpClient` that
    /// injects the bearer token.
    pub fn new(client: Arc<dyn HttpClient>, endpoint: impl Into<String>, page_size: u32) -> Self {
        Self {
            pages: PageClient::new(client),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        }
    }

    fn url(&self, path: &str) -> Result<reqwest::Url> {
        reqwest::Url::parse(&format!("{}/v2/{path}", self.endpoint))
            .map_err(|e| Error::InvalidConfig(format!("invalid logging endpoint: {e}")))
    }

    #[instrument(skip_all, fields(filter_len = filter.len()))]
    async fn stream_entries(
        &self,
        cancel: CancellationToken,
        resource_names: Vec<String>,
        filter: String,
        sender: mpsc::Sender<Value>,
    ) -> Result<()> {
        let url = self.url("entries:list")?;
        let page_size = self.page_size;
        let request_generator = |page_token: Option<&str>| -> transport::Result<reqwest::Request> {
            let body = serde_json::to_vec(&ListEntriesRequest {
                resource_names: &resource_names,
                filter: &filter,
                order_by: "timestamp asc",
                page_size,
                page_token,
            })
            .map_err(|e| transport::Error::Decode(format!("encoding entries:list body: {e}")))?;
            let mut request = reqwest::Request::new(reqwest::Method::POST, url.clone());
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *request.body_mut() = Some(body.into());
            Ok(request)
        };

        let mut pages = self.pages.pages(request_generator, |page: &ListEntriesResponse| {
            page.next_page_token.clone()
        });
        let mut sent = 0usize;
        while let Some(page) = pages.next(&cancel).await? {
            for entry in page.entries {
                if sender.send(entry).await.is_err() {
                    debug!(sent, "entry receiver dropped, stopping listing");
                    return Ok(());
                }
                sent += 1;
            }
        }
        debug!(sent, pages = pages.fetched(), "listing complete");
        Ok(())
    }

    /// Names of the logs under `parent` (e.g. `projects/my-project`).
    pub async fn list_log_names(
        &self,
        cancel: &CancellationToken,
        parent: &str,
    ) -> Result<Vec<String>> {
        let url = self.url(&format!("{}/logs", parent.trim_matches('/')))?;
        let page_size = self.page_size.to_string();
        let pages = self
            .pages
            .get_all(
                cancel,
                |page_token: Option<&str>| {
                    let mut url = url.clone();
                    {
                        let mut query = url.query_pairs_mut();
                        query.append_pair("pageSize", &page_size);
                        if let Some(token) = page_token {
                            query.append_pair("pageToken", token);
                        }
                    }
                    Ok(reqwest::Request::new(reqwest::Method::GET, url))
                },
                |page: &ListLogsResponse| page.next_page_token.clone(),
            )
            .await?;
        Ok(pages.into_iter().flat_map(|p| p.log_names).collect())
    }
}

impl LogFetcher for CloudLoggingClient {
    fn list_entries(
        &self,
        cancel: CancellationToken,
        resource_names: Vec<String>,
        filter: String,
        sender: mpsc::Sender<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.stream_entries(cancel, resource_names, filter, sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use transport::BaseHttpClient;

    #[derive(Default)]
    struct Recorded {
        bodies: Vec<Value>,
        log_queries: Vec<HashMap<String, String>>,
    }

    /// Fake logging API: two entry pages and two log-name pages.
    async fn logging_server(recorded: Arc<Mutex<Recorded>>) -> String {
        let entries_state = recorded.clone();
        let router = Router::new()
            .route(
                "/v2/entries:list",
                post(move |Json(body): Json<Value>| {
                    let recorded = entries_state.clone();
                    async move {
                        let token = body.get("pageToken").and_then(Value::as_str).map(String::from);
                        recorded.lock().unwrap().bodies.push(body);
                        match token.as_deref() {
                            None => Json(json!({
                                "entries": [
                                    {"timestamp": "2024-05-01T00:00:01Z", "insertId": "a"},
                                    {"timestamp": "2024-05-01T00:00:02Z", "insertId": "b"}
                                ],
                                "nextPageToken": "page-2"
                            })),
                            _ => Json(json!({
                                "entries": [{"timestamp": "2024-05-01T00:00:03Z", "insertId": "c"}]
                            })),
                        }
                    }
                }),
            )
            .route(
                "/v2/projects/{project}/logs",
                get(move |Path(project): Path<String>, Query(query): Query<HashMap<String, String>>| {
                    let recorded = recorded.clone();
                    async move {
                        let token = query.get("pageToken").cloned();
                        recorded.lock().unwrap().log_queries.push(query);
                        match token {
                            None => Json(json!({
                                "logNames": [format!("projects/{project}/logs/events")],
                                "nextPageToken": "more"
                            })),
                            Some(_) => Json(json!({
                                "logNames": [format!("projects/{project}/logs/cloudaudit.googleapis.com%2Factivity")]
                            })),
                        }
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(endpoint: String) -> CloudLoggingClient {
        let base = Arc::new(BaseHttpClient::new(reqwest::Client::new(), vec![]));
        CloudLoggingClient::new(base, endpoint, 2)
    }

    #[tokio::test]
    async fn list_entries_streams_every_page_in_order() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let client = client(logging_server(recorded.clone()).await);
        let (tx, mut rx) = mpsc::channel(1);

        let fetch = client.list_entries(
            CancellationToken::new(),
            vec!["projects/my-project".into()],
            "resource.type=\"k8s_cluster\"".into(),
            tx,
        );
        let collect = async {
            let mut ids = Vec::new();
            while let Some(entry) = rx.recv().await {
                ids.push(entry["insertId"].as_str().unwrap().to_string());
            }
            ids
        };
        let (result, ids) = tokio::join!(fetch, collect);

        result.unwrap();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.bodies.len(), 2);
        let first = &recorded.bodies[0];
        assert_eq!(first["resourceNames"], json!(["projects/my-project"]));
        assert_eq!(first["filter"], "resource.type=\"k8s_cluster\"");
        assert_eq!(first["orderBy"], "timestamp asc");
        assert_eq!(first["pageSize"], 2);
        assert!(first.get("pageToken").is_none());
        assert_eq!(recorded.bodies[1]["pageToken"], "page-2");
    }

    #[tokio::test]
    async fn list_entries_honours_cancellation() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let client = client(logging_server(recorded.clone()).await);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(8);

        let err = client
            .list_entries(cancel, vec!["projects/p".into()], String::new(), tx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(recorded.lock().unwrap().bodies.is_empty());
    }

    #[tokio::test]
    async fn dropped_receiver_ends_listing_quietly() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let client = client(logging_server(recorded.clone()).await);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        client
            .list_entries(CancellationToken::new(), vec!["projects/p".into()], String::new(), tx)
            .await
            .unwrap();
        assert_eq!(recorded.lock().unwrap().bodies.len(), 1);
    }

    #[tokio::test]
    async fn list_log_names_collects_all_pages() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let client = client(logging_server(recorded.clone()).await);

        let names = client
            .list_log_names(&CancellationToken::new(), "projects/my-project")
            .await
            .unwrap();

        assert_eq!(
            names,
            vec![
                "projects/my-project/logs/events",
                "projects/my-project/logs/cloudaudit.googleapis.com%2Factivity",
            ]
        );
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.log_queries.len(), 2);
        assert_eq!(recorded.log_queries[0].get("pageSize").map(String::as_str), Some("2"));
        assert_eq!(recorded.log_queries[1].get("pageToken").map(String::as_str), Some("more"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let client = client("http://127.0.0.1:1".into());
        let (tx, _rx) = mpsc::channel(8);
        let err = client
            .list_entries(CancellationToken::new(), vec![], String::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(transport::Error::Transport(_))));
    }
}
