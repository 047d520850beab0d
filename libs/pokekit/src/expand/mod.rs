//! Bounded breadth-first expansion of embedded references
//!
//! Given a payload, [`Poke::expand`](crate::Poke::expand) fetches the
//! references selected by the path filters, then the references inside
//! those payloads, level by level, up to `depth` levels and `max_requests`
//! fetches. The result is a copy of the input where each fetched reference
//! carries its data under [`EXPANDED_KEY`]. The input is never modified.
//!
//! ```ignore
//! let pikachu = poke.resource("pokemon").get("pikachu").await?;
//! let expanded = poke
//!     .expand(&pikachu, &ExpandOptions::new().paths(["abilities.ability"]).depth(2))
//!     .await?;
//! println!("{}", expanded.value["abilities"][0]["ability"]["__expanded__"]["name"]);
//! ```

mod path;

pub use path::{EXPANDED_KEY, PathFilter};

use crate::cache::FetchOptions;
use crate::client::Poke;
use crate::config::ExpandDefaults;
use crate::error::ApiError;
use crate::transport::RequestSpec;
use futures_util::StreamExt;
use path::{Pointer, immediate_refs, ref_url};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Expansion limits and filters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandOptions {
    /// Dotted paths selecting the first level; empty means every reference
    /// directly under the root
    pub paths: Vec<String>,
    /// Levels to follow; 0 returns the input unchanged
    pub depth: usize,
    /// Ceiling on fetches for the whole call, failed ones included
    pub max_requests: usize,
    /// Fetches in flight at once within a level (at least 1)
    pub concurrency: usize,
    /// Cache control for every fetch of the call
    pub fetch: FetchOptions,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self::from_defaults(&ExpandDefaults::default())
    }
}

impl ExpandOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_defaults(defaults: &ExpandDefaults) -> Self {
        Self {
            paths: Vec::new(),
            depth: defaults.depth,
            max_requests: defaults.max_requests,
            concurrency: defaults.concurrency.max(1),
            fetch: FetchOptions::default(),
        }
    }

    #[must_use]
    pub fn paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn fetch_options(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }
}

/// A reference whose fetch failed; its node carries no side-channel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionFailure {
    pub url: String,
    pub error: ApiError,
}

/// Output of one expansion call
///
/// `value` is a tree: a reference reached along several paths is fetched
/// once but materialised under each of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Expanded {
    /// Copy of the input with fetched data attached
    pub value: Value,
    /// Fetches attempted
    pub requests: usize,
    pub failures: Vec<ExpansionFailure>,
}

impl Expanded {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// State of one expansion call; dropped when the call returns.
struct Traversal<'c> {
    client: &'c Poke,
    fetch: FetchOptions,
    concurrency: usize,
    remaining: usize,
    visited: HashSet<String>,
    fetched: HashMap<String, Arc<Value>>,
    failures: Vec<ExpansionFailure>,
}

pub async fn expand(
    client: &Poke,
    root: &Value,
    options: &ExpandOptions,
) -> Result<Expanded, ApiError> {
    let filters = options
        .paths
        .iter()
        .map(|p| p.parse::<PathFilter>())
        .collect::<Result<Vec<_>, _>>()?;

    let seeds = seed_pointers(root, &filters);
    for ptr in &seeds {
        if ptr.get(root).is_some_and(|node| node.get(EXPANDED_KEY).is_some()) {
            return Err(ApiError::ReservedKey {
                path: ptr.to_string(),
            });
        }
    }
    let seed_urls: Vec<String> = seeds
        .iter()
        .filter_map(|ptr| ptr.get(root).and_then(ref_url))
        .map(str::to_owned)
        .collect();

    let mut traversal = Traversal {
        client,
        fetch: options.fetch,
        concurrency: options.concurrency.max(1),
        remaining: options.max_requests,
        visited: HashSet::new(),
        fetched: HashMap::new(),
        failures: Vec::new(),
    };
    traversal.fetch_levels(seed_urls, options.depth).await;

    let value = traversal.materialize(root, &seeds, options.depth)?;
    tracing::debug!(
        requests = traversal.visited.len(),
        failures = traversal.failures.len(),
        "expansion finished"
    );
    Ok(Expanded {
        value,
        requests: traversal.visited.len(),
        failures: traversal.failures,
    })
}

/// First-level references: filter matches, or the root's immediate refs.
fn seed_pointers(root: &Value, filters: &[PathFilter]) -> Vec<Pointer> {
    if filters.is_empty() {
        return immediate_refs(root);
    }
    let mut seen = HashSet::new();
    filters
        .iter()
        .flat_map(|filter| filter.select(root))
        .filter(|ptr| seen.insert(ptr.clone()))
        .collect()
}

impl Traversal<'_> {
    async fn fetch_levels(&mut self, mut urls: Vec<String>, depth: usize) {
        for level in 1..=depth {
            let mut batch = Vec::new();
            for url in urls {
                if batch.len() == self.remaining {
                    break;
                }
                if self.visited.insert(url.clone()) {
                    batch.push(url);
                }
            }
            if batch.is_empty() {
                break;
            }
            self.remaining -= batch.len();
            tracing::debug!(
                level,
                requests = batch.len(),
                remaining = self.remaining,
                "expanding level"
            );

            let client = self.client;
            let fetch = self.fetch;
            let results: Vec<(String, Result<Arc<Value>, ApiError>)> =
                futures_util::stream::iter(batch)
                    .map(move |url| async move {
                        let result = client.fetch(&RequestSpec::get(url.clone()), &fetch).await;
                        (url, result)
                    })
                    .buffered(self.concurrency)
                    .collect()
                    .await;

            let mut next = Vec::new();
            for (url, result) in results {
                match result {
                    Ok(payload) => {
                        next.extend(
                            immediate_refs(&payload)
                                .iter()
                                .filter_map(|ptr| ptr.get(&payload).and_then(ref_url))
                                .map(str::to_owned),
                        );
                        self.fetched.insert(url, payload);
                    }
                    Err(error) => {
                        tracing::warn!(url = %url, error = %error, "reference fetch failed");
                        self.failures.push(ExpansionFailure { url, error });
                    }
                }
            }
            urls = next;
        }
    }

    fn materialize(&self, root: &Value, seeds: &[Pointer], depth: usize) -> Result<Value, ApiError> {
        let mut out = root.clone();
        if depth == 0 {
            return Ok(out);
        }
        let mut ancestors = Vec::new();
        for ptr in seeds {
            if let Some(node) = ptr.get_mut(&mut out) {
                self.annotate(node, ptr, depth, &mut ancestors)?;
            }
        }
        Ok(out)
    }

    /// Attach the fetched payload of reference `node`, expanded `levels - 1`
    /// further levels.
    fn annotate(
        &self,
        node: &mut Value,
        at: &Pointer,
        levels: usize,
        ancestors: &mut Vec<String>,
    ) -> Result<(), ApiError> {
        let Some(url) = ref_url(node).map(str::to_owned) else {
            return Ok(());
        };
        let Some(payload) = self.fetched.get(&url) else {
            return Ok(());
        };
        if node.get(EXPANDED_KEY).is_some() {
            return Err(ApiError::ReservedKey {
                path: at.to_string(),
            });
        }

        let expanded =
            self.expand_payload(&url, payload, &at.key(EXPANDED_KEY), levels - 1, ancestors)?;
        if let Value::Object(map) = node {
            map.insert(EXPANDED_KEY.to_owned(), expanded);
        }
        Ok(())
    }

    /// Copy `payload` with its references expanded `levels` deep.
    ///
    /// Every path reaching a URL gets its own copy, so a payload shared by
    /// `n` parents appears `n` times in the output. Fetching stays deduped.
    fn expand_payload(
        &self,
        url: &str,
        payload: &Value,
        at: &Pointer,
        levels: usize,
        ancestors: &mut Vec<String>,
    ) -> Result<Value, ApiError> {
        let mut out = payload.clone();
        // a payload already being expanded higher up is attached raw
        if levels == 0 || ancestors.iter().any(|a| a == url) {
            return Ok(out);
        }

        ancestors.push(url.to_owned());
        for ptr in immediate_refs(payload) {
            if let Some(child) = ptr.get_mut(&mut out) {
                self.annotate(child, &at.join(&ptr), levels, ancestors)?;
            }
        }
        ancestors.pop();
        Ok(out)
    }
}
