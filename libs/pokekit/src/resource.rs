use crate::cache::FetchOptions;
use crate::client::Poke;
use crate::error::ApiError;
use crate::pagination::Page;
use crate::transport::RequestSpec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Reference to another resource, as embedded in API payloads
/// (`{"name": "pikachu", "url": "https://pokeapi.co/api/v2/pokemon/25/"}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedResource {
    #[serde(default)]
    pub name: String,
    pub url: String,
}

impl NamedResource {
    /// Numeric id from the last path segment of `url`, if there is one.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        self.url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .and_then(|segment| segment.parse().ok())
    }
}

/// Path component identifying one resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdOrName {
    Id(u64),
    Name(String),
}

impl From<u64> for IdOrName {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<u32> for IdOrName {
    fn from(id: u32) -> Self {
        Self::Id(u64::from(id))
    }
}

impl From<&str> for IdOrName {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for IdOrName {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for IdOrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// One API endpoint, e.g. `poke.resource("pokemon")`
#[derive(Debug, Clone, Copy)]
pub struct Resource<'a> {
    client: &'a Poke,
    name: &'a str,
}

impl<'a> Resource<'a> {
    pub(crate) fn new(client: &'a Poke, name: &'a str) -> Self {
        Self { client, name }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    fn spec_for(&self, id: &IdOrName) -> Result<RequestSpec, ApiError> {
        let id = id.to_string();
        if id.is_empty() || id.contains('/') {
            return Err(ApiError::InvalidRequest {
                message: format!("invalid {} identifier '{id}'", self.name),
            });
        }
        Ok(RequestSpec::get(format!("{}/{id}", self.name)))
    }

    /// # Errors
    /// Returns `ApiError` if the identifier is malformed or the fetch fails.
    pub async fn get(&self, id: impl Into<IdOrName>) -> Result<Arc<Value>, ApiError> {
        self.get_with(id, &FetchOptions::default()).await
    }

    /// # Errors
    /// Returns `ApiError` if the identifier is malformed or the fetch fails.
    pub async fn get_with(
        &self,
        id: impl Into<IdOrName>,
        options: &FetchOptions,
    ) -> Result<Arc<Value>, ApiError> {
        let spec = self.spec_for(&id.into())?;
        self.client.fetch(&spec, options).await
    }

    /// Fetch one resource and decode it into `T`.
    ///
    /// # Errors
    /// Returns `ApiError::Decode` if the payload does not match `T`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        id: impl Into<IdOrName>,
    ) -> Result<T, ApiError> {
        let value = self.get(id).await?;
        crate::client::decode(&value)
    }

    /// First page of the listing.
    ///
    /// # Errors
    /// Returns `ApiError` if the fetch fails or the body is not a list.
    pub async fn list(&self, limit: u64, offset: u64) -> Result<Page<NamedResource>, ApiError> {
        self.list_with(limit, offset, &FetchOptions::default())
            .await
    }

    /// # Errors
    /// Returns `ApiError` if the fetch fails or the body is not a list.
    pub async fn list_with(
        &self,
        limit: u64,
        offset: u64,
        options: &FetchOptions,
    ) -> Result<Page<NamedResource>, ApiError> {
        self.client
            .list_page_with(self.name, limit, offset, options)
            .await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn named_resource_id() {
        let r = NamedResource {
            name: "pikachu".to_owned(),
            url: "https://pokeapi.co/api/v2/pokemon/25/".to_owned(),
        };
        assert_eq!(r.id(), Some(25));

        let r = NamedResource {
            name: "x".to_owned(),
            url: "https://pokeapi.co/api/v2/pokemon/".to_owned(),
        };
        assert_eq!(r.id(), None);
    }

    #[test]
    fn named_resource_without_name() {
        let r: NamedResource =
            serde_json::from_str(r#"{"url":"https://pokeapi.co/api/v2/evolution-chain/10/"}"#)
                .unwrap();
        assert!(r.name.is_empty());
        assert_eq!(r.id(), Some(10));
    }

    #[test]
    fn id_or_name_display() {
        assert_eq!(IdOrName::from(25u32).to_string(), "25");
        assert_eq!(IdOrName::from("pikachu").to_string(), "pikachu");
    }
}
