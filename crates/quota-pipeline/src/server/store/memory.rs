//! In-process token bucket store.
//!
//! Buckets are created lazily, full, the first time a `(type, key)` pair is
//! seen, and refill continuously at the type's `per_second` rate up to its
//! `size`. All state lives behind one lock that is never held across an
//! await point.

use anyhow::{Context, bail};
use async_trait::async_trait;
use core::{str::FromStr, time::Duration};
use parking_lot::Mutex;
use quota_pipeline_core::{
    BucketState, BucketStatus, QuotaStore, Request, StatusQuery, StatusResult, StoreError,
};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Smallest sleep a `WAIT` performs between refill checks.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// A named bucket definition: capacity and refill rate.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketType {
    pub name: String,
    pub size: u64,
    pub per_second: f64,
}

impl FromStr for BucketType {
    type Err = anyhow::Error;

    /// Parses `name:size:per_second`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.split(':').map(str::trim);
        let (Some(name), Some(size), Some(per_second), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("expected `name:size:per_second`");
        };

        if name.is_empty() {
            bail!("bucket type name must not be empty");
        }
        let size: u64 = size.parse().context("invalid bucket size")?;
        if size == 0 {
            bail!("bucket size must be greater than 0");
        }
        let per_second: f64 = per_second.parse().context("invalid refill rate")?;
        if !per_second.is_finite() || per_second <= 0.0 {
            bail!("refill rate must be a positive number");
        }

        Ok(Self {
            name: name.to_string(),
            size,
            per_second,
        })
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn refill(&mut self, ty: &BucketType, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (ty.size as f64).min(self.tokens + elapsed * ty.per_second);
        self.last = now;
    }

    fn state(&self, ty: &BucketType) -> BucketState {
        let missing = ty.size as f64 - self.tokens;
        let until_full = if missing > 0.0 {
            (missing / ty.per_second).ceil() as u64
        } else {
            0
        };

        BucketState {
            conformant: None,
            delayed: None,
            remaining: self.tokens.floor() as u64,
            reset: unix_now() + until_full,
            limit: ty.size,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Number of tokens a consuming request asks for.
fn requested(request: &Request, ty: &BucketType) -> u64 {
    if request.all {
        ty.size
    } else {
        request.count.map_or(1, u64::from)
    }
}

/// Token buckets held in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    types: HashMap<String, BucketType>,
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

impl MemoryStore {
    pub fn new(types: impl IntoIterator<Item = BucketType>) -> Self {
        Self {
            types: types.into_iter().map(|ty| (ty.name.clone(), ty)).collect(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_type(&self, name: &str) -> Result<&BucketType, StoreError> {
        self.types
            .get(name)
            .ok_or_else(|| StoreError::UnknownBucketType {
                bucket_type: name.to_string(),
            })
    }

    /// Runs `f` against the refilled bucket addressed by `request`.
    fn with_bucket<R>(
        &self,
        request: &Request,
        f: impl FnOnce(&BucketType, &mut Bucket) -> R,
    ) -> Result<R, StoreError> {
        let ty = self.bucket_type(&request.bucket_type)?;
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry((request.bucket_type.clone(), request.key.clone()))
            .or_insert_with(|| Bucket {
                tokens: ty.size as f64,
                last: now,
            });
        bucket.refill(ty, now);
        Ok(f(ty, bucket))
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn take(&self, request: &Request) -> Result<BucketState, StoreError> {
        self.with_bucket(request, |ty, bucket| {
            let count = requested(request, ty) as f64;
            let conformant = bucket.tokens >= count;
            if conformant {
                bucket.tokens -= count;
            }
            BucketState {
                conformant: Some(conformant),
                ..bucket.state(ty)
            }
        })
    }

    async fn wait(&self, request: &Request) -> Result<BucketState, StoreError> {
        let ty = self.bucket_type(&request.bucket_type)?;
        let count = requested(request, ty);
        if count > ty.size {
            return Err(StoreError::InvalidRequest {
                reason: format!(
                    "WAIT for {count} tokens exceeds the size of bucket type {} ({})",
                    ty.name, ty.size
                ),
            });
        }

        let count = count as f64;
        let mut delayed = false;
        loop {
            let outcome = self.with_bucket(request, |ty, bucket| {
                if bucket.tokens >= count {
                    bucket.tokens -= count;
                    Ok(bucket.state(ty))
                } else {
                    let deficit = count - bucket.tokens;
                    Err(Duration::from_secs_f64(deficit / ty.per_second).max(MIN_WAIT))
                }
            })?;

            match outcome {
                Ok(state) => {
                    return Ok(BucketState {
                        conformant: Some(true),
                        delayed: Some(delayed),
                        ..state
                    });
                }
                Err(pause) => {
                    delayed = true;
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    async fn put(&self, request: &Request) -> Result<BucketState, StoreError> {
        self.with_bucket(request, |ty, bucket| {
            let size = ty.size as f64;
            bucket.tokens = match request.count {
                Some(count) if !request.all => size.min(bucket.tokens + f64::from(count)),
                _ => size,
            };
            bucket.state(ty)
        })
    }

    async fn get(&self, request: &Request) -> Result<BucketState, StoreError> {
        self.with_bucket(request, |ty, bucket| bucket.state(ty))
    }

    async fn status(&self, query: &StatusQuery) -> Result<StatusResult, StoreError> {
        let ty = self.bucket_type(&query.bucket_type)?;
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        let mut items: Vec<BucketStatus> = buckets
            .iter_mut()
            .filter(|((name, key), _)| *name == query.bucket_type && key.starts_with(&query.prefix))
            .map(|((_, key), bucket)| {
                bucket.refill(ty, now);
                let state = bucket.state(ty);
                BucketStatus {
                    instance: key.clone(),
                    remaining: state.remaining,
                    reset: state.reset,
                    limit: state.limit,
                }
            })
            .collect();
        items.sort_by(|a, b| a.instance.cmp(&b.instance));

        Ok(StatusResult { items })
    }
}
