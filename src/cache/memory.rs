use crate::cache::key::{DerivativeKey, Variant};
use crate::fetch::OriginStore;
use crate::transform::{render_derivative, FitPolicy};
use crate::DerivativeError;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type PendingDerivative = Shared<BoxFuture<'static, Result<Bytes, DerivativeError>>>;

/// Whether a response was served from memory or computed for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// A stored derivative. Immutable once inserted.
#[derive(Debug, Clone)]
pub struct DerivativeEntry {
    pub bytes: Bytes,
    pub variant: Variant,
}

impl DerivativeEntry {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Point-in-time view of one cache instance.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub transforms: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_rate_percent(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    transforms: AtomicU64,
    errors: AtomicU64,
}

struct InFlight {
    token: u64,
    pending: PendingDerivative,
}

#[derive(Default)]
struct CacheState {
    entries: DashMap<DerivativeKey, DerivativeEntry>,
    // A miss stores its result only while its own slot is still here;
    // invalidation removes the slot first.
    in_flight: DashMap<DerivativeKey, InFlight>,
    next_token: AtomicU64,
    counters: Counters,
}

/// In-memory cache of encoded image derivatives for one family of
/// resources.
///
/// A miss fetches the original from the [`OriginStore`], renders the
/// requested variant with this cache's [`FitPolicy`], and stores the
/// result. Concurrent misses for the same key share a single
/// fetch-and-transform. Entries live until they are invalidated; there is
/// no TTL and no size-based eviction.
///
/// Cloning is cheap and every clone shares the same entries.
#[derive(Clone)]
pub struct DerivativeCache {
    store: Arc<dyn OriginStore>,
    fit: FitPolicy,
    state: Arc<CacheState>,
}

impl DerivativeCache {
    pub fn new(store: Arc<dyn OriginStore>, fit: FitPolicy) -> Self {
        Self { store, fit, state: Arc::new(CacheState::default()) }
    }

    pub fn fit(&self) -> FitPolicy {
        self.fit
    }

    pub fn store(&self) -> &Arc<dyn OriginStore> {
        &self.store
    }

    /// Returns the derivative bytes for `(resource_id, variant)`, computing
    /// and storing them on first access.
    ///
    /// # Errors
    /// - `Validation` for an empty resource id
    /// - `NotFound` when the resource has no stored original
    /// - `UpstreamFetch` when the origin store fails
    /// - `Transform` when the original cannot be decoded or re-encoded
    ///
    /// A failed miss stores nothing; the next call starts over.
    pub async fn get(&self, resource_id: &str, variant: Variant) -> crate::Result<(Bytes, CacheStatus)> {
        let key = DerivativeKey::new(resource_id, variant)?;

        if let Some(bytes) = self.lookup(&key) {
            self.state.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache.key = %key, "derivative cache hit");
            return Ok((bytes, CacheStatus::Hit));
        }

        self.state.counters.misses.fetch_add(1, Ordering::Relaxed);
        let pending = self.join_in_flight(&key);
        let bytes = pending.await?;
        Ok((bytes, CacheStatus::Miss))
    }

    /// Inserts precomputed bytes, replacing any entry for the same key.
    pub fn put(&self, resource_id: &str, variant: Variant, bytes: impl Into<Bytes>) -> crate::Result<()> {
        let key = DerivativeKey::new(resource_id, variant)?;
        let bytes = bytes.into();
        tracing::debug!(cache.key = %key, size = bytes.len(), "derivative stored directly");
        self.state.entries.insert(key, DerivativeEntry { bytes, variant });
        Ok(())
    }

    /// Removes every variant cached for `resource_id`. Returns how many
    /// entries were dropped.
    ///
    /// Misses already running for the resource finish for their own callers
    /// but will not repopulate the cache.
    pub fn invalidate(&self, resource_id: &str) -> usize {
        // Slots before entries: a miss that stored just ahead of this is
        // swept by the entry pass, one that has not yet stored finds its
        // slot gone.
        self.state.in_flight.retain(|key, _| !key.belongs_to(resource_id));

        let before = self.state.entries.len();
        self.state.entries.retain(|key, _| !key.belongs_to(resource_id));
        let removed = before.saturating_sub(self.state.entries.len());

        tracing::info!(resource_id, removed, "invalidated derivatives");
        removed
    }

    /// Removes exactly one entry. Returns whether it existed.
    pub fn invalidate_key(&self, resource_id: &str, variant: Variant) -> bool {
        let Ok(key) = DerivativeKey::new(resource_id, variant) else {
            return false;
        };
        let removed = self.state.entries.remove(&key).is_some();
        tracing::debug!(cache.key = %key, removed, "invalidated derivative");
        removed
    }

    /// Returns the stored entry for a key without touching the origin.
    pub fn peek(&self, resource_id: &str, variant: Variant) -> Option<DerivativeEntry> {
        let key = DerivativeKey::new(resource_id, variant).ok()?;
        self.state.entries.get(&key).map(|e| e.value().clone())
    }

    pub fn contains(&self, resource_id: &str, variant: Variant) -> bool {
        self.peek(resource_id, variant).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.state.counters;
        CacheStats {
            entry_count: self.state.entries.len(),
            total_size_bytes: self.state.entries.iter().map(|e| e.len() as u64).sum(),
            in_flight: self.state.in_flight.len(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            transforms: counters.transforms.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, key: &DerivativeKey) -> Option<Bytes> {
        self.state.entries.get(key).map(|e| e.bytes.clone())
    }

    fn join_in_flight(&self, key: &DerivativeKey) -> PendingDerivative {
        match self.state.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!(cache.key = %key, "joining in-flight derivative");
                existing.get().pending.clone()
            }
            Entry::Vacant(slot) => {
                let token = self.state.next_token.fetch_add(1, Ordering::Relaxed);
                // Spawned so the work completes and clears its slot even if
                // every requester goes away. The slot lock is held until the
                // insert below, so the task cannot finish before it exists.
                let handle = tokio::spawn(compute(
                    Arc::clone(&self.state),
                    Arc::clone(&self.store),
                    self.fit,
                    key.clone(),
                    token,
                ));
                let pending = handle
                    .map(|joined| {
                        joined.unwrap_or_else(|e| {
                            Err(DerivativeError::Transform(format!("Derivative task failed: {}", e)))
                        })
                    })
                    .boxed()
                    .shared();
                slot.insert(InFlight { token, pending: pending.clone() });
                pending
            }
        }
    }
}

async fn compute(
    state: Arc<CacheState>,
    store: Arc<dyn OriginStore>,
    fit: FitPolicy,
    key: DerivativeKey,
    token: u64,
) -> Result<Bytes, DerivativeError> {
    // Another flight may have stored the entry between our lookup and
    // registering this one.
    let existing = state.entries.get(&key).map(|e| e.bytes.clone());
    let outcome = match existing {
        Some(bytes) => Ok(bytes),
        None => fetch_and_render(&state, store.as_ref(), fit, &key).await,
    };

    // Store under the slot lock so an invalidation cannot slip between the
    // ownership check and the insert.
    let stored = state.in_flight.remove_if(&key, |_, flight| {
        if flight.token != token {
            return false;
        }
        if let Ok(bytes) = &outcome {
            state.entries.insert(
                key.clone(),
                DerivativeEntry { bytes: bytes.clone(), variant: key.variant() },
            );
        }
        true
    });

    match &outcome {
        Ok(_) if stored.is_none() => {
            tracing::debug!(cache.key = %key, "resource invalidated during miss; result not stored");
        }
        Ok(_) => {}
        Err(DerivativeError::NotFound(_)) => {
            tracing::debug!(cache.key = %key, "no original for derivative");
        }
        Err(e) => {
            state.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                resource_id = key.resource_id(),
                variant = %key.variant(),
                error = %e,
                "failed to produce derivative"
            );
        }
    }

    outcome
}

async fn fetch_and_render(
    state: &CacheState,
    store: &dyn OriginStore,
    fit: FitPolicy,
    key: &DerivativeKey,
) -> Result<Bytes, DerivativeError> {
    let resource_id = key.resource_id();
    let variant = key.variant();

    let meta = store.resource_meta(resource_id).await?;
    if !meta.has_original {
        return Err(DerivativeError::NotFound(format!("No original stored for {}", resource_id)));
    }

    tracing::info!(resource_id, %variant, "derivative cache miss, fetching original");
    let original = store.fetch_original(resource_id).await?;

    state.counters.transforms.fetch_add(1, Ordering::Relaxed);
    let target = variant.target_size();
    let rendered = tokio::task::spawn_blocking(move || render_derivative(&original, target, fit))
        .await
        .map_err(|e| DerivativeError::Transform(format!("Transform task failed: {}", e)))??;

    Ok(Bytes::from(rendered))
}
