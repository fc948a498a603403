//! Query options for list and fetch operations.

/// Chunk prefetch behavior on item fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOption {
    /// The server returns chunk placeholders; content is downloaded on
    /// demand via `ItemManager::download_content`.
    Auto,
    /// The server streams chunk ciphertexts inline.
    Medium,
}

impl PrefetchOption {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Medium => "medium",
        }
    }
}

/// Options shared by list/fetch/upload calls. Builder-style:
///
/// ```
/// use vaultsync_core::FetchOptions;
///
/// let options = FetchOptions::new().limit(50).prefetch(vaultsync_core::PrefetchOption::Medium);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub(crate) limit: Option<usize>,
    pub(crate) stoken: Option<String>,
    pub(crate) iterator: Option<String>,
    pub(crate) prefetch: Option<PrefetchOption>,
    pub(crate) with_collection: Option<bool>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page size for list calls.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Scope the call to changes after this sync token.
    pub fn stoken(mut self, stoken: impl Into<String>) -> Self {
        self.stoken = Some(stoken.into());
        self
    }

    /// Continuation token from a previous page.
    pub fn iterator(mut self, iterator: impl Into<String>) -> Self {
        self.iterator = Some(iterator.into());
        self
    }

    pub fn prefetch(mut self, prefetch: PrefetchOption) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    /// Include the owning collection's item in item list responses.
    pub fn with_collection(mut self, with_collection: bool) -> Self {
        self.with_collection = Some(with_collection);
        self
    }

    /// Render as query parameters; `include_stoken` is false for calls
    /// where the stoken travels elsewhere or must not apply.
    pub(crate) fn to_query(&self, include_stoken: bool) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if include_stoken {
            if let Some(stoken) = &self.stoken {
                query.push(("stoken", stoken.clone()));
            }
        }
        if let Some(limit) = self.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(iterator) = &self.iterator {
            query.push(("iterator", iterator.clone()));
        }
        if let Some(prefetch) = &self.prefetch {
            query.push(("prefetch", prefetch.as_str().to_string()));
        }
        if let Some(with_collection) = self.with_collection {
            query.push(("withCollection", with_collection.to_string()));
        }
        query
    }
}
