#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Caching, deduplicating client for the PokeAPI hypermedia API
//!
//! - [`Poke`]: async client; identical concurrent requests share one fetch
//!   and successful responses are cached with a TTL
//! - [`Page`]: offset/limit pagination with manual navigation and lazy
//!   item/page streams
//! - [`Poke::expand`]: bounded breadth-first expansion of embedded
//!   `{"name", "url"}` references
//! - [`blocking::Poke`]: the same operations for synchronous callers
//!
//! ```ignore
//! use futures_util::StreamExt;
//! use pokekit::{ExpandOptions, Poke};
//!
//! let poke = Poke::new()?;
//!
//! let mut pokemon = poke.resource("pokemon").list(50, 0).await?.into_items();
//! while let Some(item) = pokemon.next().await {
//!     println!("{}", item?.name);
//! }
//!
//! let pikachu = poke.resource("pokemon").get("pikachu").await?;
//! let expanded = poke
//!     .expand(&pikachu, &ExpandOptions::new().paths(["types.type"]))
//!     .await?;
//! ```

pub mod blocking;
mod cache;
mod client;
mod config;
mod error;
mod expand;
mod humantime_serde;
mod key;
mod pagination;
mod resource;
mod transport;

pub use cache::{CacheEntry, CacheStats, FetchOptions, ResponseCache};
pub use client::Poke;
pub use config::{CacheConfig, DEFAULT_BASE_URL, ENV_PREFIX, ExpandDefaults, PokeConfig};
pub use error::{ApiError, ClientErrorKind};
pub use expand::{EXPANDED_KEY, ExpandOptions, Expanded, ExpansionFailure, PathFilter};
pub use key::RequestKey;
pub use pagination::{Cursor, CursorParam, ItemStream, Page, PageStream};
pub use resource::{IdOrName, NamedResource, Resource};
pub use transport::{HttpTransport, RequestSpec, Transport};

pub use pokekit_http;
