//! Page-token pagination over any `HttpClient`
//!
//! No retry happens here; wrap the inner client in `RetryHttpClient` for that.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::HttpClient;
use crate::error::{Error, Result};

pub struct PageClient {
    client: Arc<dyn HttpClient>,
}

impl PageClient {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// Cursor over the pages of one paginated listing.
    ///
    /// `request_generator` builds the request for a page token (`None` for the
    /// first page); `next_page_token` extracts the following token from a
    /// decoded page. An absent or empty token ends the listing.
    pub fn pages<T, G, N>(&self, request_generator: G, next_page_token: N) -> Pages<'_, T, G, N>
    where
        T: DeserializeOwned,
        G: FnMut(Option<&str>) -> Result<reqwest::Request>,
        N: Fn(&T) -> Option<String>,
    {
        Pages {
            client: self,
            request_generator,
            next_page_token,
            token: None,
            done: false,
            fetched: 0,
            _page: PhantomData,
        }
    }

    /// Hand every page to `on_page` in order.
    pub async fn for_each_page<T, G, N, F>(
        &self,
        cancel: &CancellationToken,
        request_generator: G,
        next_page_token: N,
        mut on_page: F,
    ) -> Result<()>
    where
        T: DeserializeOwned,
        G: FnMut(Option<&str>) -> Result<reqwest::Request>,
        N: Fn(&T) -> Option<String>,
        F: FnMut(T) -> Result<()>,
    {
        let mut pages = self.pages(request_generator, next_page_token);
        while let Some(page) = pages.next(cancel).await? {
            on_page(page)?;
        }
        Ok(())
    }

    /// Collect every page in order.
    pub async fn get_all<T, G, N>(
        &self,
        cancel: &CancellationToken,
        request_generator: G,
        next_page_token: N,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        G: FnMut(Option<&str>) -> Result<reqwest::Request>,
        N: Fn(&T) -> Option<String>,
    {
        let mut all = Vec::new();
        self.for_each_page(cancel, request_generator, next_page_token, |page| {
            all.push(page);
            Ok(())
        })
        .await?;
        Ok(all)
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        request: reqwest::Request,
    ) -> Result<T> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            page = self.send_and_decode(request) => page,
        }
    }

    async fn send_and_decode<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        let response = self.client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("reading page body: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Lazily fetched pages; see `PageClient::pages`.
pub struct Pages<'a, T, G, N> {
    client: &'a PageClient,
    request_generator: G,
    next_page_token: N,
    token: Option<String>,
    done: bool,
    fetched: usize,
    _page: PhantomData<fn() -> T>,
}

impl<T, G, N> Pages<'_, T, G, N>
where
    T: DeserializeOwned,
    G: FnMut(Option<&str>) -> Result<reqwest::Request>,
    N: Fn(&T) -> Option<String>,
{
    /// Fetch the next page, or `None` once the listing is exhausted.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        let request = (self.request_generator)(self.token.as_deref())?;
        let page: T = self.client.fetch_page(cancel, request).await?;
        self.fetched += 1;

        self.token = (self.next_page_token)(&page).filter(|t| !t.is_empty());
        if self.token.is_none() {
            debug!(pages = self.fetched, "pagination finished");
            self.done = true;
        }
        Ok(Some(page))
    }

    /// Pages fetched so far.
    pub fn fetched(&self) -> usize {
        self.fetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize)]
    struct Page {
        items: Vec<u32>,
        #[serde(rename = "nextPageToken", default)]
        next_page_token: Option<String>,
    }

    /// Serves `pages[i]` for `pageToken=i` (no token means 0).
    struct FakeListing {
        pages: Vec<(u16, String)>,
        requested: Mutex<Vec<Option<String>>>,
    }

    impl FakeListing {
        fn new(pages: Vec<(u16, &str)>) -> Arc<Self> {
            Arc::new(Self {
                pages: pages.into_iter().map(|(s, b)| (s, b.to_string())).collect(),
                requested: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpClient for FakeListing {
        fn execute(
            &self,
            request: reqwest::Request,
        ) -> Pin<Box<dyn Future<Output = Result<reqwest::Response>> + Send + '_>> {
            let token = request
                .url()
                .query_pairs()
                .find(|(k, _)| k == "pageToken")
                .map(|(_, v)| v.into_owned());
            let idx: usize = token.as_deref().map_or(0, |t| t.parse().unwrap());
            self.requested.lock().unwrap().push(token);
            let (status, body) = self.pages[idx].clone();
            Box::pin(async move {
                Ok(reqwest::Response::from(
                    http::Response::builder().status(status).body(body).unwrap(),
                ))
            })
        }
    }

    /// Never answers.
    struct HangingClient;

    impl HttpClient for HangingClient {
        fn execute(
            &self,
            _request: reqwest::Request,
        ) -> Pin<Box<dyn Future<Output = Result<reqwest::Response>> + Send + '_>> {
            Box::pin(std::future::pending())
        }
    }

    fn generator(token: Option<&str>) -> Result<reqwest::Request> {
        let mut url: reqwest::Url = "https://logging.example.test/v2/logs".parse().unwrap();
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }
        Ok(reqwest::Request::new(reqwest::Method::GET, url))
    }

    fn next_token(page: &Page) -> Option<String> {
        page.next_page_token.clone()
    }

    #[tokio::test]
    async fn get_all_follows_tokens_until_empty() {
        let listing = FakeListing::new(vec![
            (200, r#"{"items":[1,2],"nextPageToken":"1"}"#),
            (200, r#"{"items":[3],"nextPageToken":"2"}"#),
            (200, r#"{"items":[4,5],"nextPageToken":""}"#),
        ]);
        let client = PageClient::new(listing.clone());

        let pages: Vec<Page> = client
            .get_all(&CancellationToken::new(), generator, next_token)
            .await
            .unwrap();

        let items: Vec<u32> = pages.into_iter().flat_map(|p| p.items).collect();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            *listing.requested.lock().unwrap(),
            vec![None, Some("1".into()), Some("2".into())]
        );
    }

    #[tokio::test]
    async fn absent_token_ends_listing() {
        let listing = FakeListing::new(vec![(200, r#"{"items":[7]}"#)]);
        let client = PageClient::new(listing.clone());

        let mut seen = Vec::new();
        client
            .for_each_page(&CancellationToken::new(), generator, next_token, |page: Page| {
                seen.extend(page.items);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![7]);
        assert_eq!(listing.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cursor_reports_exhaustion_once() {
        let listing = FakeListing::new(vec![
            (200, r#"{"items":[1],"nextPageToken":"1"}"#),
            (200, r#"{"items":[2]}"#),
        ]);
        let client = PageClient::new(listing.clone());
        let cancel = CancellationToken::new();

        let mut pages = client.pages(generator, next_token);
        assert!(pages.next(&cancel).await.unwrap().is_some());
        assert!(pages.next(&cancel).await.unwrap().is_some());
        assert!(pages.next(&cancel).await.unwrap().is_none());
        assert!(pages.next(&cancel).await.unwrap().is_none());
        assert_eq!(pages.fetched(), 2);
        assert_eq!(listing.requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn error_status_stops_pagination() {
        let listing = FakeListing::new(vec![
            (200, r#"{"items":[1],"nextPageToken":"1"}"#),
            (400, "invalid filter"),
        ]);
        let client = PageClient::new(listing.clone());

        let mut pages_seen = 0;
        let err = client
            .for_each_page(&CancellationToken::new(), generator, next_token, |_: Page| {
                pages_seen += 1;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(pages_seen, 1);
        match err {
            Error::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "invalid filter");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_page_is_decode_error() {
        let listing = FakeListing::new(vec![(200, "not json")]);
        let client = PageClient::new(listing);

        let err = client
            .get_all::<Page, _, _>(&CancellationToken::new(), generator, next_token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_nothing() {
        let listing = FakeListing::new(vec![(200, r#"{"items":[1]}"#)]);
        let client = PageClient::new(listing.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .get_all::<Page, _, _>(&cancel, generator, next_token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(listing.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_request() {
        let client = PageClient::new(Arc::new(HangingClient));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = client
            .get_all::<Page, _, _>(&cancel, generator, next_token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn on_page_error_aborts() {
        let listing = FakeListing::new(vec![
            (200, r#"{"items":[1],"nextPageToken":"1"}"#),
            (200, r#"{"items":[2]}"#),
        ]);
        let client = PageClient::new(listing.clone());

        let err = client
            .for_each_page(&CancellationToken::new(), generator, next_token, |_: Page| {
                Err(Error::Decode("consumer rejected page".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(listing.requested.lock().unwrap().len(), 1);
    }
}
