//! The universe: every entity code an ingestion run may touch.
//!
//! Codes are normalized to their market-prefixed form, de-duplicated and kept
//! in source order. Codes starting with `9` are excluded; upstream rarely has
//! statements for them.

use crate::error::{Error, Result};
use crate::source::HttpStatementSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// One listed entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub code: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Universe {
    listings: Vec<Listing>,
}

impl Universe {
    pub fn new(listings: impl IntoIterator<Item = Listing>) -> Self {
        let mut seen = HashSet::new();
        let listings = listings
            .into_iter()
            .filter(|l| !digits(l.code.trim()).starts_with('9'))
            .map(|l| Listing {
                code: market_code(l.code.trim()),
                name: l.name,
            })
            .filter(|l| !l.code.is_empty() && seen.insert(l.code.clone()))
            .collect();
        Self { listings }
    }

    /// Parse a universe file: one code per line, optionally `code,name`.
    /// Blank lines and `#` comments are ignored.
    pub fn parse(content: &str) -> Self {
        Self::new(content.lines().filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (code, name) = line.split_once(',').unwrap_or((line, ""));
            Some(Listing {
                code: code.trim().to_string(),
                name: name.trim().to_string(),
            })
        }))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Universe(format!("cannot read {}: {e}", path.display())))?;
        let universe = Self::parse(&content);
        if universe.is_empty() {
            return Err(Error::Universe(format!(
                "{} lists no usable codes",
                path.display()
            )));
        }
        Ok(universe)
    }

    /// Keep only the codes accepted by `keep`, preserving order.
    pub fn restrict(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self {
            listings: self
                .listings
                .iter()
                .filter(|l| keep(&l.code))
                .cloned()
                .collect(),
        }
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.listings.iter().map(|l| l.code.as_str())
    }

    pub fn listings(&self) -> &[Listing] {
        &self.listings
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

/// Add the exchange prefix to a bare code: `6…` is Shanghai, `0…`/`3…`
/// Shenzhen, `4…`/`8…` Beijing; anything else defaults to Shanghai.
/// Codes that already carry a prefix are returned unchanged.
pub fn market_code(code: &str) -> String {
    let upper = code.to_ascii_uppercase();
    if ["SH", "SZ", "BJ"].iter().any(|p| upper.starts_with(p)) {
        return upper;
    }
    let prefix = match upper.chars().next() {
        Some('6') => "SH",
        Some('0' | '3') => "SZ",
        Some('4' | '8') => "BJ",
        Some(_) => "SH",
        None => return String::new(),
    };
    format!("{prefix}{upper}")
}

fn digits(code: &str) -> &str {
    code.trim_start_matches(|c: char| c.is_ascii_alphabetic())
}

// ---------------------------------------------------------------------------
// Upstream listing with a local cache
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CachedListings {
    timestamp: DateTime<Utc>,
    count: usize,
    data: Vec<Listing>,
}

/// JSON cache of the upstream code listing.
pub struct UniverseCache {
    path: PathBuf,
    max_age: chrono::Duration,
}

impl UniverseCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: chrono::Duration::days(7),
        }
    }

    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Cached listings, if present and younger than the max age.
    pub fn load(&self) -> Option<Vec<Listing>> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let cached: CachedListings = match serde_json::from_str(&content) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable universe cache");
                return None;
            }
        };
        (Utc::now() - cached.timestamp < self.max_age).then_some(cached.data)
    }

    pub fn save(&self, listings: &[Listing]) -> Result<()> {
        let cached = CachedListings {
            timestamp: Utc::now(),
            count: listings.len(),
            data: listings.to_vec(),
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&cached)?)?;
        Ok(())
    }
}

/// How many times the upstream listing is attempted, and the wait between.
pub const LISTING_ATTEMPTS: u32 = 5;
pub const LISTING_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Enumerate the universe from upstream, preferring a fresh cache.
pub async fn fetch_universe(
    source: &HttpStatementSource,
    cache: Option<&UniverseCache>,
) -> Result<Universe> {
    if let Some(listings) = cache.and_then(UniverseCache::load) {
        info!(count = listings.len(), "using cached universe");
        return Ok(Universe::new(listings));
    }

    let mut last_err = None;
    for attempt in 1..=LISTING_ATTEMPTS {
        match source.list_codes().await {
            Ok(listings) if !listings.is_empty() => {
                if let Some(cache) = cache {
                    if let Err(e) = cache.save(&listings) {
                        warn!(error = %e, "could not save universe cache");
                    }
                }
                let universe = Universe::new(listings);
                info!(count = universe.len(), "universe fetched from upstream");
                return Ok(universe);
            }
            Ok(_) => last_err = Some("upstream listed no codes".to_string()),
            Err(e) => last_err = Some(e.to_string()),
        }
        if attempt < LISTING_ATTEMPTS {
            warn!(
                attempt,
                max = LISTING_ATTEMPTS,
                error = last_err.as_deref().unwrap_or_default(),
                "universe listing failed, retrying"
            );
            tokio::time::sleep(LISTING_RETRY_DELAY).await;
        }
    }

    Err(Error::Universe(format!(
        "listing failed after {LISTING_ATTEMPTS} attempts: {}",
        last_err.unwrap_or_default()
    )))
}
