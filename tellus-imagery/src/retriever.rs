use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;

use tellus_jobs::AsyncReturn;

#[derive(thiserror::Error, Debug)]
pub enum RetrieveError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(u16),
}

/// Fetches tile payloads from a remote source. The future runs on a worker,
/// never on the render thread.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, url: String) -> AsyncReturn<Result<Bytes, RetrieveError>>;
}

/// HTTP retriever that streams response bodies chunk by chunk.
pub struct HttpRetriever {
    client: reqwest::Client,
}

impl HttpRetriever {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        #[cfg(not(target_arch = "wasm32"))]
        let client = match reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                bevy::log::error!("http client rejected its timeouts, using defaults: {err}");
                reqwest::Client::new()
            }
        };
        #[cfg(target_arch = "wasm32")]
        let client = {
            let _ = (connect_timeout, read_timeout);
            reqwest::Client::new()
        };
        Self { client }
    }
}

impl Retriever for HttpRetriever {
    fn retrieve(&self, url: String) -> AsyncReturn<Result<Bytes, RetrieveError>> {
        let client = self.client.clone();
        Box::pin(async move {
            let response = client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(RetrieveError::Status(response.status().as_u16()));
            }
            let total_size = response.content_length().unwrap_or(0);
            let mut bytes_stream = response.bytes_stream();
            let mut bytes = Vec::<u8>::with_capacity(total_size as usize);
            while let Some(chunk) = bytes_stream.next().await {
                bytes.extend_from_slice(&chunk?);
            }
            Ok(Bytes::from(bytes))
        })
    }
}

struct HostEntry {
    failures: u32,
    last_failure: instant::Instant,
}

/// Shared record of whether the network is worth trying: a global switch plus
/// per-host failure tracking. A host that keeps failing is treated as
/// unavailable until the retry interval elapses.
pub struct NetworkStatus {
    enabled: AtomicBool,
    max_failures: u32,
    retry_interval: Duration,
    hosts: Mutex<HashMap<String, HostEntry>>,
}

impl NetworkStatus {
    pub fn new(max_failures: u32, retry_interval: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            max_failures: max_failures.max(1),
            retry_interval,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_network_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_network_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_host_available(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        let mut hosts = lock_hosts(&self.hosts);
        let Some(entry) = hosts.get(&host) else {
            return true;
        };
        if entry.failures < self.max_failures {
            return true;
        }
        if entry.last_failure.elapsed() >= self.retry_interval {
            hosts.remove(&host);
            return true;
        }
        false
    }

    pub fn log_failure(&self, url: &str) {
        let Some(host) = host_of(url) else {
            return;
        };
        let mut hosts = lock_hosts(&self.hosts);
        let entry = hosts.entry(host).or_insert(HostEntry {
            failures: 0,
            last_failure: instant::Instant::now(),
        });
        entry.failures += 1;
        entry.last_failure = instant::Instant::now();
    }

    pub fn log_success(&self, url: &str) {
        if let Some(host) = host_of(url) {
            lock_hosts(&self.hosts).remove(&host);
        }
    }
}

fn host_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed.host_str().map(str::to_owned)
}

fn lock_hosts(hosts: &Mutex<HashMap<String, HostEntry>>) -> std::sync::MutexGuard<'_, HashMap<String, HostEntry>> {
    match hosts.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
