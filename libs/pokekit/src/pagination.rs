//! Offset/limit pagination over list endpoints
//!
//! A [`Page`] is one list response. Navigate manually with
//! [`Page::next_page`], or turn it into a lazy stream of items
//! ([`Page::into_items`]) or pages ([`Page::into_pages`]). Streams fetch one
//! page at a time and stop at the first error.
//!
//! ```ignore
//! use futures_util::StreamExt;
//!
//! let page = poke.resource("pokemon").list(20, 0).await?;
//! let mut items = page.into_items();
//! while let Some(item) = items.next().await {
//!     println!("{}", item?.name);
//! }
//! ```

use crate::cache::FetchOptions;
use crate::client::Poke;
use crate::error::ApiError;
use crate::transport::RequestSpec;
use futures_core::Stream;
use pin_project_lite::pin_project;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Opaque pointer to another page (the absolute URL the API returned)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Query pairs of the cursor; values made of digits become numbers.
    fn info(&self) -> BTreeMap<String, CursorParam> {
        let Ok(url) = url::Url::parse(&self.0) else {
            return BTreeMap::new();
        };
        let mut info = BTreeMap::new();
        for (key, value) in url.query_pairs() {
            // first occurrence wins
            info.entry(key.into_owned())
                .or_insert_with(|| CursorParam::parse(&value));
        }
        info
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One query parameter of a cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorParam {
    Number(u64),
    Text(String),
}

impl CursorParam {
    fn parse(value: &str) -> Self {
        if !value.is_empty()
            && value.bytes().all(|b| b.is_ascii_digit())
            && let Ok(n) = value.parse()
        {
            return Self::Number(n);
        }
        Self::Text(value.to_owned())
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

/// Wire shape of a list response
#[derive(Debug, Deserialize)]
struct RawPage<T> {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    previous: Option<String>,
    results: Vec<T>,
}

/// One page of a list endpoint. Immutable; navigation returns new pages.
pub struct Page<T> {
    items: Vec<T>,
    next: Option<Cursor>,
    previous: Option<Cursor>,
    total_count: Option<u64>,
    client: Poke,
    request: RequestSpec,
    options: FetchOptions,
}

impl<T: DeserializeOwned> Page<T> {
    pub(crate) fn from_value(
        value: &Value,
        client: Poke,
        request: RequestSpec,
        options: FetchOptions,
    ) -> Result<Self, ApiError> {
        let raw = RawPage::<T>::deserialize(value).map_err(|e| ApiError::Decode {
            message: format!("not a list response: {e}"),
        })?;
        Ok(Self {
            items: raw.results,
            next: raw.next.filter(|s| !s.is_empty()).map(Cursor),
            previous: raw.previous.filter(|s| !s.is_empty()).map(Cursor),
            total_count: raw.count,
            client,
            request,
            options,
        })
    }

    /// Fetch the page after this one; `Ok(None)` on the last page.
    ///
    /// # Errors
    /// Returns `ApiError` if the fetch fails.
    pub async fn next_page(&self) -> Result<Option<Page<T>>, ApiError> {
        match &self.next {
            Some(cursor) => self.follow(cursor).await.map(Some),
            None => Ok(None),
        }
    }

    /// Fetch the page before this one; `Ok(None)` on the first page.
    ///
    /// # Errors
    /// Returns `ApiError` if the fetch fails.
    pub async fn previous_page(&self) -> Result<Option<Page<T>>, ApiError> {
        match &self.previous {
            Some(cursor) => self.follow(cursor).await.map(Some),
            None => Ok(None),
        }
    }

    async fn follow(&self, cursor: &Cursor) -> Result<Page<T>, ApiError> {
        fetch_page(
            self.client.clone(),
            self.request.follow(cursor.as_str()),
            self.options,
        )
        .await
    }
}

impl<T> Page<T> {
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// `count` reported by the API (total across all pages)
    #[must_use]
    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    #[must_use]
    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.next.as_ref()
    }

    #[must_use]
    pub fn previous_cursor(&self) -> Option<&Cursor> {
        self.previous.as_ref()
    }

    /// Query parameters of the next cursor, e.g. `{"limit": 20, "offset": 40}`
    #[must_use]
    pub fn next_page_info(&self) -> Option<BTreeMap<String, CursorParam>> {
        self.next.as_ref().map(Cursor::info)
    }

    #[must_use]
    pub fn previous_page_info(&self) -> Option<BTreeMap<String, CursorParam>> {
        self.previous.as_ref().map(Cursor::info)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    /// Lazy stream over the items of this page and every following page
    #[must_use]
    pub fn into_items(self) -> ItemStream<T> {
        ItemStream {
            buffer: self.items.into(),
            next: self.next,
            done: false,
            client: self.client,
            request: self.request,
            options: self.options,
            current_fetch: None,
        }
    }

    /// Lazy stream that yields this page, then every following page
    #[must_use]
    pub fn into_pages(self) -> PageStream<T> {
        PageStream {
            first: Some(self),
            next: None,
            done: false,
            current_fetch: None,
        }
    }
}

impl<T> fmt::Debug for Page<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("items", &self.items.len())
            .field("total_count", &self.total_count)
            .field("next", &self.next)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

type PageFuture<T> = Pin<Box<dyn Future<Output = Result<Page<T>, ApiError>> + Send>>;

pub async fn fetch_page<T: DeserializeOwned>(
    client: Poke,
    request: RequestSpec,
    options: FetchOptions,
) -> Result<Page<T>, ApiError> {
    let value = client.fetch(&request, &options).await?;
    Page::from_value(&value, client, request, options)
}

fn boxed_fetch<T>(client: Poke, request: RequestSpec, options: FetchOptions) -> PageFuture<T>
where
    T: DeserializeOwned + Send + 'static,
{
    Box::pin(fetch_page(client, request, options))
}

pin_project! {
    /// Items across pages, in the order the API returns them.
    ///
    /// Holds at most one page of items at a time.
    pub struct ItemStream<T> {
        buffer: VecDeque<T>,
        next: Option<Cursor>,
        done: bool,
        client: Poke,
        request: RequestSpec,
        options: FetchOptions,
        #[pin]
        current_fetch: Option<PageFuture<T>>,
    }
}

impl<T> Stream for ItemStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Item = Result<T, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.buffer.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }

            if *this.done {
                return Poll::Ready(None);
            }

            if let Some(fut) = this.current_fetch.as_mut().as_pin_mut() {
                match fut.poll(cx) {
                    Poll::Ready(Ok(page)) => {
                        this.current_fetch.set(None);
                        *this.next = page.next;
                        this.buffer.extend(page.items);
                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        this.current_fetch.set(None);
                        *this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            let Some(cursor) = this.next.take() else {
                *this.done = true;
                continue;
            };
            tracing::debug!(cursor = %cursor, "fetching next page");
            let fut = boxed_fetch(
                this.client.clone(),
                this.request.follow(cursor.as_str()),
                *this.options,
            );
            this.current_fetch.set(Some(fut));
        }
    }
}

pin_project! {
    /// Whole pages, starting with the page the stream was created from.
    pub struct PageStream<T> {
        first: Option<Page<T>>,
        next: Option<(Poke, RequestSpec, FetchOptions)>,
        done: bool,
        #[pin]
        current_fetch: Option<PageFuture<T>>,
    }
}

impl<T> PageStream<T> {
    fn emit(next: &mut Option<(Poke, RequestSpec, FetchOptions)>, done: &mut bool, page: &Page<T>) {
        match &page.next {
            Some(cursor) => {
                *next = Some((
                    page.client.clone(),
                    page.request.follow(cursor.as_str()),
                    page.options,
                ));
            }
            None => *done = true,
        }
    }
}

impl<T> Stream for PageStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Item = Result<Page<T>, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(page) = this.first.take() {
                Self::emit(this.next, this.done, &page);
                return Poll::Ready(Some(Ok(page)));
            }

            if *this.done {
                return Poll::Ready(None);
            }

            if let Some(fut) = this.current_fetch.as_mut().as_pin_mut() {
                match fut.poll(cx) {
                    Poll::Ready(Ok(page)) => {
                        this.current_fetch.set(None);
                        Self::emit(this.next, this.done, &page);
                        return Poll::Ready(Some(Ok(page)));
                    }
                    Poll::Ready(Err(e)) => {
                        this.current_fetch.set(None);
                        *this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            let Some((client, request, options)) = this.next.take() else {
                *this.done = true;
                continue;
            };
            this.current_fetch
                .set(Some(boxed_fetch(client, request, options)));
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::PokeConfig;
    use crate::resource::NamedResource;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: &str = "https://pokeapi.test/api/v2";

    /// Serves `total` fake pokemon from `/pokemon?limit&offset`; offsets in
    /// `fail_at` answer 503.
    struct FakeList {
        total: u64,
        fail_at: Vec<u64>,
        calls: AtomicUsize,
    }

    impl FakeList {
        fn new(total: u64) -> Self {
            Self {
                total,
                fail_at: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn page_url(limit: u64, offset: u64) -> String {
            format!("{BASE}/pokemon?offset={offset}&limit={limit}")
        }
    }

    #[async_trait]
    impl Transport for FakeList {
        async fn execute(&self, spec: &RequestSpec) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let url = url::Url::parse(&spec.target).unwrap();
            let mut limit = 20;
            let mut offset = 0;
            for (k, v) in url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .chain(spec.params.iter().cloned())
            {
                match k.as_str() {
                    "limit" => limit = v.parse().unwrap(),
                    "offset" => offset = v.parse().unwrap(),
                    _ => {}
                }
            }
            if self.fail_at.contains(&offset) {
                return Err(ApiError::from_status(
                    http::StatusCode::SERVICE_UNAVAILABLE,
                    "down",
                ));
            }

            let end = (offset + limit).min(self.total);
            let results: Vec<Value> = (offset..end)
                .map(|i| json!({"name": format!("mon-{}", i + 1), "url": format!("{BASE}/pokemon/{}/", i + 1)}))
                .collect();
            let next = (end < self.total).then(|| Self::page_url(limit, end));
            let previous = (offset > 0).then(|| Self::page_url(limit, offset.saturating_sub(limit)));
            Ok(json!({"count": self.total, "next": next, "previous": previous, "results": results}))
        }
    }

    fn client(list: FakeList) -> (Poke, Arc<FakeList>) {
        let list = Arc::new(list);
        let poke = Poke::with_transport(list.clone(), PokeConfig::for_testing(BASE)).unwrap();
        (poke, list)
    }

    #[tokio::test]
    async fn twelve_items_in_three_pages() {
        let (poke, list) = client(FakeList::new(12));
        let first = poke.list_page::<NamedResource>("pokemon", 5, 0).await.unwrap();
        assert_eq!(first.total_count(), Some(12));

        let items: Vec<_> = first.into_items().collect().await;
        assert_eq!(items.len(), 12);
        let names: Vec<String> = items.into_iter().map(|r| r.unwrap().name).collect();
        assert_eq!(names.first().map(String::as_str), Some("mon-1"));
        assert_eq!(names.last().map(String::as_str), Some("mon-12"));
        assert_eq!(list.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn manual_navigation_does_not_mutate() {
        let (poke, _) = client(FakeList::new(12));
        let first = poke.list_page::<NamedResource>("pokemon", 5, 0).await.unwrap();
        assert!(first.has_next());
        assert!(!first.has_previous());

        let info = first.next_page_info().unwrap();
        assert_eq!(info["offset"], CursorParam::Number(5));
        assert_eq!(info["limit"].as_u64(), Some(5));

        let second = first.next_page().await.unwrap().unwrap();
        let third = second.next_page().await.unwrap().unwrap();
        assert_eq!(first.items().len(), 5);
        assert_eq!(second.items()[0].name, "mon-6");
        assert_eq!(third.items().len(), 2);
        assert!(!third.has_next());
        assert!(third.next_cursor().is_none());
        assert!(third.next_page().await.unwrap().is_none());

        let back = third.previous_page().await.unwrap().unwrap();
        assert_eq!(back.items()[0].name, "mon-6");
    }

    #[tokio::test]
    async fn page_stream_yields_every_page() {
        let (poke, _) = client(FakeList::new(12));
        let pages: Vec<_> = poke
            .list_page::<NamedResource>("pokemon", 5, 0)
            .await
            .unwrap()
            .into_pages()
            .collect()
            .await;
        let sizes: Vec<usize> = pages.iter().map(|p| p.as_ref().unwrap().items().len()).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
    }

    #[tokio::test]
    async fn error_halts_iteration() {
        let (poke, list) = client(FakeList {
            fail_at: vec![5],
            ..FakeList::new(12)
        });
        let items: Vec<_> = poke
            .list_page::<NamedResource>("pokemon", 5, 0)
            .await
            .unwrap()
            .into_items()
            .collect()
            .await;

        assert_eq!(items.len(), 6);
        assert!(items[..5].iter().all(Result::is_ok));
        assert!(items[5].as_ref().unwrap_err().is_service_unavailable());
        assert_eq!(list.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_resource() {
        let (poke, _) = client(FakeList::new(0));
        let page = poke.list_page::<NamedResource>("pokemon", 5, 0).await.unwrap();
        assert!(page.items().is_empty());
        let items: Vec<_> = page.into_items().collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn empty_page_with_next_continues() {
        struct Gappy;

        #[async_trait]
        impl Transport for Gappy {
            async fn execute(&self, spec: &RequestSpec) -> Result<Value, ApiError> {
                if spec.target.ends_with("page=2") {
                    Ok(json!({"next": null, "results": [{"name": "late", "url": "u"}]}))
                } else {
                    Ok(json!({"next": format!("{BASE}/gappy?page=2"), "results": []}))
                }
            }
        }

        let poke = Poke::with_transport(Arc::new(Gappy), PokeConfig::for_testing(BASE)).unwrap();
        let items: Vec<_> = poke
            .list_page::<NamedResource>("gappy", 5, 0)
            .await
            .unwrap()
            .into_items()
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().name, "late");
    }

    #[tokio::test]
    async fn non_list_body_is_decode_error() {
        struct NotAList;

        #[async_trait]
        impl Transport for NotAList {
            async fn execute(&self, _spec: &RequestSpec) -> Result<Value, ApiError> {
                Ok(json!({"id": 25}))
            }
        }

        let poke =
            Poke::with_transport(Arc::new(NotAList), PokeConfig::for_testing(BASE)).unwrap();
        let err = poke
            .list_page::<NamedResource>("pokemon", 5, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[test]
    fn cursor_params() {
        assert_eq!(CursorParam::parse("20"), CursorParam::Number(20));
        assert_eq!(CursorParam::parse("-1"), CursorParam::Text("-1".to_owned()));
        assert_eq!(CursorParam::parse(""), CursorParam::Text(String::new()));
        assert_eq!(
            Cursor("not a url".to_owned()).info(),
            BTreeMap::<String, CursorParam>::new()
        );
    }
}
