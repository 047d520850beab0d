//! Synchronous facade over [`crate::Poke`]
//!
//! Each client owns a small tokio runtime and blocks the calling thread on
//! it. Clones share the runtime, the cache and the in-flight registry, so
//! identical calls from several threads still cost one fetch.
//!
//! Do not call these methods from inside an async runtime; use
//! [`crate::Poke`] there.
//!
//! ```ignore
//! let poke = pokekit::blocking::Poke::new()?;
//! for item in poke.resource("pokemon").list(100, 0)? {
//!     println!("{}", item?.name);
//! }
//! ```

use crate::cache::{FetchOptions, ResponseCache};
use crate::config::PokeConfig;
use crate::error::ApiError;
use crate::expand::{ExpandOptions, Expanded};
use crate::pagination::{Cursor, CursorParam, ItemStream};
use crate::resource::{IdOrName, NamedResource};
use crate::transport::{RequestSpec, Transport};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn build_runtime() -> Result<Arc<Runtime>, ApiError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("pokekit-blocking")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| ApiError::Config {
            message: format!("failed to start runtime: {e}"),
        })
}

/// Blocking PokeAPI client
#[derive(Clone)]
pub struct Poke {
    inner: crate::Poke,
    runtime: Arc<Runtime>,
}

impl Poke {
    /// # Errors
    /// Returns `ApiError::Config` if the runtime or the transport cannot be built.
    pub fn new() -> Result<Self, ApiError> {
        Self::from_config(PokeConfig::default())
    }

    /// # Errors
    /// Returns `ApiError::Config` if the configuration is invalid or the
    /// runtime or the transport cannot be built.
    pub fn from_config(config: PokeConfig) -> Result<Self, ApiError> {
        let runtime = build_runtime()?;
        // HttpClient spawns its buffer worker on build
        let inner = {
            let _guard = runtime.enter();
            crate::Poke::from_config(config)?
        };
        Ok(Self { inner, runtime })
    }

    /// # Errors
    /// Returns `ApiError::Config` if the configuration is invalid or the
    /// runtime cannot be built.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: PokeConfig,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            inner: crate::Poke::with_transport(transport, config)?,
            runtime: build_runtime()?,
        })
    }

    /// The async client sharing this client's cache
    #[must_use]
    pub fn as_async(&self) -> &crate::Poke {
        &self.inner
    }

    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        self.inner.cache()
    }

    /// # Errors
    /// See [`crate::Poke::fetch`].
    pub fn fetch(&self, spec: &RequestSpec, options: &FetchOptions) -> Result<Arc<Value>, ApiError> {
        self.runtime.block_on(self.inner.fetch(spec, options))
    }

    /// # Errors
    /// See [`crate::Poke::get_json`].
    pub fn get_json(&self, path: &str) -> Result<Arc<Value>, ApiError> {
        self.runtime.block_on(self.inner.get_json(path))
    }

    /// # Errors
    /// See [`crate::Poke::get_by_url`].
    pub fn get_by_url(&self, url: &str) -> Result<Arc<Value>, ApiError> {
        self.runtime.block_on(self.inner.get_by_url(url))
    }

    #[must_use]
    pub fn resource<'a>(&'a self, name: &'a str) -> Resource<'a> {
        Resource { client: self, name }
    }

    /// # Errors
    /// See [`crate::Poke::list_page`].
    pub fn list_page<T>(&self, endpoint: &str, limit: u64, offset: u64) -> Result<Page<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        let page = self
            .runtime
            .block_on(self.inner.list_page(endpoint, limit, offset))?;
        Ok(self.wrap(page))
    }

    /// # Errors
    /// See [`crate::Poke::expand`].
    pub fn expand(&self, value: &Value, options: &ExpandOptions) -> Result<Expanded, ApiError> {
        self.runtime.block_on(self.inner.expand(value, options))
    }

    /// # Errors
    /// See [`crate::Poke::expand_from`].
    pub fn expand_from(
        &self,
        spec: &RequestSpec,
        options: &ExpandOptions,
    ) -> Result<Expanded, ApiError> {
        self.runtime.block_on(self.inner.expand_from(spec, options))
    }

    fn wrap<T>(&self, page: crate::Page<T>) -> Page<T> {
        Page {
            page,
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl fmt::Debug for Poke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("blocking::Poke")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// Blocking counterpart of [`crate::Resource`]
#[derive(Debug, Clone, Copy)]
pub struct Resource<'a> {
    client: &'a Poke,
    name: &'a str,
}

impl Resource<'_> {
    /// # Errors
    /// See [`crate::Resource::get`].
    pub fn get(&self, id: impl Into<IdOrName>) -> Result<Arc<Value>, ApiError> {
        self.get_with(id, &FetchOptions::default())
    }

    /// # Errors
    /// See [`crate::Resource::get_with`].
    pub fn get_with(
        &self,
        id: impl Into<IdOrName>,
        options: &FetchOptions,
    ) -> Result<Arc<Value>, ApiError> {
        let client = self.client;
        client
            .runtime
            .block_on(client.inner.resource(self.name).get_with(id, options))
    }

    /// # Errors
    /// See [`crate::Resource::get_as`].
    pub fn get_as<T: DeserializeOwned>(&self, id: impl Into<IdOrName>) -> Result<T, ApiError> {
        let value = self.get(id)?;
        crate::client::decode(&value)
    }

    /// # Errors
    /// See [`crate::Resource::list`].
    pub fn list(&self, limit: u64, offset: u64) -> Result<Page<NamedResource>, ApiError> {
        self.list_with(limit, offset, &FetchOptions::default())
    }

    /// # Errors
    /// See [`crate::Resource::list_with`].
    pub fn list_with(
        &self,
        limit: u64,
        offset: u64,
        options: &FetchOptions,
    ) -> Result<Page<NamedResource>, ApiError> {
        let client = self.client;
        let page = client.runtime.block_on(
            client
                .inner
                .resource(self.name)
                .list_with(limit, offset, options),
        )?;
        Ok(client.wrap(page))
    }
}

/// One page of a list endpoint; iterating it walks every following page.
pub struct Page<T> {
    page: crate::Page<T>,
    runtime: Arc<Runtime>,
}

impl<T: DeserializeOwned> Page<T> {
    /// # Errors
    /// Returns `ApiError` if the fetch fails.
    pub fn next_page(&self) -> Result<Option<Page<T>>, ApiError> {
        let next = self.runtime.block_on(self.page.next_page())?;
        Ok(next.map(|page| self.sibling(page)))
    }

    /// # Errors
    /// Returns `ApiError` if the fetch fails.
    pub fn previous_page(&self) -> Result<Option<Page<T>>, ApiError> {
        let previous = self.runtime.block_on(self.page.previous_page())?;
        Ok(previous.map(|page| self.sibling(page)))
    }

    fn sibling(&self, page: crate::Page<T>) -> Page<T> {
        Page {
            page,
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl<T> Page<T> {
    #[must_use]
    pub fn items(&self) -> &[T] {
        self.page.items()
    }

    #[must_use]
    pub fn total_count(&self) -> Option<u64> {
        self.page.total_count()
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page.has_next()
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.page.has_previous()
    }

    #[must_use]
    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.page.next_cursor()
    }

    #[must_use]
    pub fn next_page_info(&self) -> Option<BTreeMap<String, CursorParam>> {
        self.page.next_page_info()
    }

    #[must_use]
    pub fn previous_page_info(&self) -> Option<BTreeMap<String, CursorParam>> {
        self.page.previous_page_info()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.page.into_vec()
    }
}

impl<T> fmt::Debug for Page<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.page, f)
    }
}

impl<T> IntoIterator for Page<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Item = Result<T, ApiError>;
    type IntoIter = PageIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        PageIter {
            stream: self.page.into_items(),
            runtime: self.runtime,
        }
    }
}

/// Items of a page and every following page, fetched on demand.
///
/// Yields an error at most once, then ends.
pub struct PageIter<T> {
    stream: ItemStream<T>,
    runtime: Arc<Runtime>,
}

impl<T> Iterator for PageIter<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Item = Result<T, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

impl<T> fmt::Debug for PageIter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageIter").finish_non_exhaustive()
    }
}
