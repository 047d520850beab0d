use crate::error::ApiError;
use std::fmt;
use std::sync::Arc;

/// Identity of a logical fetch; the cache and single-flight key.
///
/// Derived keys are `METHOD absolute-url` with the query pairs sorted by
/// name then value, ignored parameters removed, the fragment dropped and a
/// trailing `/` trimmed from the path. So
/// `https://pokeapi.co/api/v2/pokemon/?offset=20&limit=20` and
/// `https://pokeapi.co/api/v2/pokemon?limit=20&offset=20` are the same key.
///
/// Any string converts into an opaque key (`RequestKey::from("pokemon:25")`),
/// which is handy for driving [`ResponseCache`](crate::ResponseCache)
/// directly.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(Arc<str>);

impl RequestKey {
    /// Derive a key from an absolute URL plus extra query pairs.
    ///
    /// # Errors
    /// Returns `ApiError::InvalidRequest` if `url` is not absolute.
    pub fn for_request(
        method: &http::Method,
        url: &str,
        params: &[(String, String)],
        ignored_params: &[String],
    ) -> Result<Self, ApiError> {
        let mut parsed = url::Url::parse(url).map_err(|e| ApiError::InvalidRequest {
            message: format!("cannot derive request key from '{url}': {e}"),
        })?;

        let mut pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .chain(params.iter().cloned())
            .filter(|(k, _)| !ignored_params.iter().any(|ignored| ignored == k))
            .collect();
        pairs.sort();

        parsed.set_fragment(None);
        if pairs.is_empty() {
            parsed.set_query(None);
        } else {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&pairs)
                .finish();
            parsed.set_query(Some(&query));
        }

        let path = parsed.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/').to_owned();
            parsed.set_path(&trimmed);
        }

        Ok(Self(Arc::from(format!("{method} {parsed}"))))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestKey {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl From<String> for RequestKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestKey").field(&&*self.0).finish()
    }
}
