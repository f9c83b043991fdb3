//! Query cache and retry layer on top of a [`Fetcher`].
//!
//! - Queries: per-key cache of successful responses with a staleness window,
//!   in-flight de-duplication, retries with exponential backoff, and
//!   online-only gating.
//! - Mutations: never cached; retried under their own policy and invalidate
//!   query keys by prefix on success.
//!
//! Only a missing response or a server failure with `code >= 500` is
//! retried. Undecryptable answers, unknown operations, a decoded
//! `status:false` answer and 4xx codes are final. Toasts and the error
//! overlay are shown once per logical call, for the attempt that is returned.
//!
//! When connectivity returns, stale cached queries are refetched (see
//! [`QueryClient::spawn_refetch_on_reconnect`]).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use common::{ErrorKind, NetworkResponse};
use serde_json::Value;
use tokio::{
    sync::{watch, OnceCell},
    task::JoinHandle,
    time,
    time::Instant,
};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::manager::{ApiRequest, HeldCall, NetworkManager};
use crate::resolver::SideEffect;
use crate::transport::Transport;

/// Hierarchical cache key such as `["app", "FETCH_PROFILE"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// `true` if `prefix` equals the leading parts of this key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// The fetch primitive the cache wraps.
///
/// `fetch` holds back user-facing notices; the cache releases them only for
/// the attempt it returns.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, request: ApiRequest) -> impl Future<Output = HeldCall> + Send;

    fn release(&self, notices: Vec<SideEffect>);

    fn is_online(&self) -> bool;
}

impl<T: Transport> Fetcher for NetworkManager<T> {
    fn fetch(&self, request: ApiRequest) -> impl Future<Output = HeldCall> + Send {
        self.call_held(request)
    }

    fn release(&self, notices: Vec<SideEffect>) {
        NetworkManager::release(self, notices);
    }

    fn is_online(&self) -> bool {
        self.connectivity().is_online()
    }
}

/// Whether connectivity gates a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetworkMode {
    /// While offline, answer locally without invoking the fetcher.
    #[default]
    Online,
    /// Always invoke the fetcher.
    Always,
}

/// Retry count and exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `min(base * 2^attempt, max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub stale_time: Duration,
    pub retry: RetryPolicy,
    pub network_mode: NetworkMode,
}

#[derive(Debug, Clone)]
pub struct MutationOptions {
    pub retry: RetryPolicy,
    pub network_mode: NetworkMode,
    /// Query key prefixes dropped after a successful mutation.
    pub invalidates: Vec<QueryKey>,
}

impl MutationOptions {
    pub fn invalidating(mut self, prefix: QueryKey) -> Self {
        self.invalidates.push(prefix);
        self
    }
}

/// Defaults applied by [`QueryClient::query_options`] and [`QueryClient::mutation_options`].
#[derive(Debug, Clone)]
pub struct QueryDefaults {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub query_retry: u32,
    pub mutation_retry: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl QueryDefaults {
    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            stale_time: Duration::from_secs(cfg.query_stale_time_secs),
            gc_time: Duration::from_secs(cfg.query_gc_time_secs),
            query_retry: cfg.query_retry,
            mutation_retry: cfg.mutation_retry,
            base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
            max_delay: Duration::from_millis(cfg.retry_max_delay_ms),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedQuery {
    request: ApiRequest,
    response: NetworkResponse<Value>,
    fetched_at: Instant,
}

type InFlight = Arc<OnceCell<NetworkResponse<Value>>>;

struct Shared<F> {
    fetcher: F,
    defaults: QueryDefaults,
    cache: ArcSwap<HashMap<QueryKey, CachedQuery>>,
    in_flight: Mutex<HashMap<QueryKey, InFlight>>,
}

/// Cache and retry front-end. Cheap to clone.
pub struct QueryClient<F> {
    shared: Arc<Shared<F>>,
}

impl<F> Clone for QueryClient<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: Fetcher> QueryClient<F> {
    pub fn new(fetcher: F, defaults: QueryDefaults) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetcher,
                defaults,
                cache: ArcSwap::from_pointee(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.shared.fetcher
    }

    pub fn query_options(&self) -> QueryOptions {
        let d = &self.shared.defaults;
        QueryOptions {
            stale_time: d.stale_time,
            retry: RetryPolicy {
                retries: d.query_retry,
                base_delay: d.base_delay,
                max_delay: d.max_delay,
            },
            network_mode: NetworkMode::Online,
        }
    }

    pub fn mutation_options(&self) -> MutationOptions {
        let d = &self.shared.defaults;
        MutationOptions {
            retry: RetryPolicy {
                retries: d.mutation_retry,
                base_delay: d.base_delay,
                max_delay: d.max_delay,
            },
            network_mode: NetworkMode::Online,
            invalidates: Vec::new(),
        }
    }

    /// Fetch `key`, serving a fresh cached response when there is one.
    ///
    /// Concurrent queries for the same key share one fetch.
    pub async fn query(&self, key: QueryKey, request: ApiRequest, options: &QueryOptions) -> NetworkResponse<Value> {
        let cached = self.shared.cache.load().get(&key).cloned();
        if let Some(entry) = &cached {
            if entry.fetched_at.elapsed() < options.stale_time {
                debug!(%key, "query served from cache");
                return entry.response.clone();
            }
        }

        if options.network_mode == NetworkMode::Online && !self.shared.fetcher.is_online() {
            debug!(%key, cached = cached.is_some(), "query paused: offline");
            return cached.map_or_else(NetworkResponse::offline, |entry| entry.response);
        }

        let cell = lock(&self.shared.in_flight)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let response = cell
            .get_or_init(|| async {
                let response = self.with_retry(request.clone(), &options.retry).await;
                if response.success {
                    self.store(key.clone(), request, response.clone());
                }
                response
            })
            .await
            .clone();

        let mut in_flight = lock(&self.shared.in_flight);
        if in_flight.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            in_flight.remove(&key);
        }
        response
    }

    /// Run a mutation and invalidate the configured prefixes on success.
    pub async fn mutate(&self, request: ApiRequest, options: &MutationOptions) -> NetworkResponse<Value> {
        if options.network_mode == NetworkMode::Online && !self.shared.fetcher.is_online() {
            debug!(operation = %request.operation, "mutation paused: offline");
            return NetworkResponse::offline();
        }

        let response = self.with_retry(request, &options.retry).await;
        if response.success {
            for prefix in &options.invalidates {
                self.invalidate(prefix);
            }
        }
        response
    }

    /// Drop every cached query whose key starts with `prefix`.
    pub fn invalidate(&self, prefix: &QueryKey) {
        self.shared.cache.rcu(|cache| {
            cache
                .iter()
                .filter(|(key, _)| !key.starts_with(prefix))
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect::<HashMap<_, _>>()
        });
        debug!(%prefix, "queries invalidated");
    }

    /// Cached response for `key`, fresh or stale.
    pub fn cached(&self, key: &QueryKey) -> Option<NetworkResponse<Value>> {
        self.shared.cache.load().get(key).map(|entry| entry.response.clone())
    }

    /// Drop entries older than the garbage-collection window. Returns how many were dropped.
    pub fn collect_garbage(&self) -> usize {
        let gc_time = self.shared.defaults.gc_time;
        let mut dropped = 0;
        self.shared.cache.rcu(|cache| {
            let kept: HashMap<_, _> = cache
                .iter()
                .filter(|(_, entry)| entry.fetched_at.elapsed() < gc_time)
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect();
            dropped = cache.len() - kept.len();
            kept
        });
        if dropped > 0 {
            info!(dropped, "query cache swept");
        }
        dropped
    }

    /// Spawn a background task that sweeps the cache every `interval`.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // The first tick fires immediately; nothing is stale yet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                client.collect_garbage();
            }
        })
    }

    /// Refetch every cached query past its staleness window. Returns how
    /// many were refetched.
    pub async fn refetch_stale(&self) -> usize {
        let stale_time = self.shared.defaults.stale_time;
        let stale: Vec<(QueryKey, ApiRequest)> = self
            .shared
            .cache
            .load()
            .iter()
            .filter(|(_, entry)| entry.fetched_at.elapsed() >= stale_time)
            .map(|(key, entry)| (key.clone(), entry.request.clone()))
            .collect();
        let options = QueryOptions {
            stale_time: Duration::ZERO,
            ..self.query_options()
        };
        for (key, request) in &stale {
            self.query(key.clone(), request.clone(), &options).await;
        }
        stale.len()
    }

    /// Spawn a task that refetches stale queries whenever `updates` goes
    /// from offline to online.
    ///
    /// The task lives until the sending side is dropped.
    pub fn spawn_refetch_on_reconnect(&self, mut updates: watch::Receiver<bool>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut online = *updates.borrow_and_update();
            while updates.changed().await.is_ok() {
                let now = *updates.borrow_and_update();
                if now && !online {
                    let refetched = client.refetch_stale().await;
                    info!(refetched, "stale queries refetched after reconnect");
                }
                online = now;
            }
            debug!("reconnect subscription closed");
        })
    }

    fn store(&self, key: QueryKey, request: ApiRequest, response: NetworkResponse<Value>) {
        let entry = CachedQuery {
            request,
            response,
            fetched_at: Instant::now(),
        };
        self.shared.cache.rcu(|cache| {
            let mut next = HashMap::clone(cache);
            next.insert(key.clone(), entry.clone());
            next
        });
    }

    async fn with_retry(&self, request: ApiRequest, policy: &RetryPolicy) -> NetworkResponse<Value> {
        let mut attempt = 0;
        loop {
            let held = self.shared.fetcher.fetch(request.clone()).await;
            if !retryable(&held) || attempt >= policy.retries {
                self.shared.fetcher.release(held.notices);
                return held.response;
            }
            let delay = policy.delay(attempt);
            debug!(
                operation = %request.operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                code = held.response.code,
                dropped_notices = held.notices.len(),
                "retrying"
            );
            time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn retryable(held: &HeldCall) -> bool {
    held.classification.as_ref().is_some_and(|c| {
        matches!(c.kind, ErrorKind::TransportNoResponse | ErrorKind::ServerError) && c.code >= 500
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
