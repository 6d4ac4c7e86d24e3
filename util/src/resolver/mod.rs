#[cfg(test)]
mod resolver_test;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use tokio::sync::oneshot;

use crate::error::*;

pub type LookupFuture = Pin<Box<dyn Future<Output = Result<Vec<SocketAddr>>> + Send>>;
pub type LookupFn = Arc<dyn (Fn(String) -> LookupFuture) + Send + Sync>;

type Waiter = oneshot::Sender<Result<Vec<SocketAddr>>>;

/// Hostname resolver shared by all streams of an agent.
///
/// Concurrent `resolve` calls for the same host share one underlying
/// lookup; each caller still counts as a pending request until its result
/// is delivered. `close` fails every pending request with `ErrCancelled`
/// without running the lookup continuations.
pub struct Resolver {
    lookup: LookupFn,
    queries: Arc<SyncMutex<HashMap<String, Vec<Waiter>>>>,
    closed: Arc<AtomicBool>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self::with_lookup(Arc::new(|host: String| -> LookupFuture {
            Box::pin(async move {
                let addrs: Vec<SocketAddr> = tokio::net::lookup_host(host).await?.collect();
                if addrs.is_empty() {
                    Err(Error::ErrHostNotFound)
                } else {
                    Ok(addrs)
                }
            })
        }))
    }

    /// Builds a resolver around a custom lookup, used by tests to model
    /// slow or unreachable DNS.
    pub fn with_lookup(lookup: LookupFn) -> Self {
        Resolver {
            lookup,
            queries: Arc::new(SyncMutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resolves `host` (a `host:port` pair) to socket addresses.
    pub async fn resolve(&self, host: &str) -> Result<Vec<SocketAddr>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrCancelled);
        }

        let (tx, rx) = oneshot::channel();
        let run_lookup = {
            let mut queries = self.queries.lock().unwrap();
            match queries.get_mut(host) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    queries.insert(host.to_owned(), vec![tx]);
                    true
                }
            }
        };

        if run_lookup {
            let lookup = Arc::clone(&self.lookup);
            let queries = Arc::clone(&self.queries);
            let host = host.to_owned();
            tokio::spawn(async move {
                let result = (lookup)(host.clone()).await;
                let waiters = {
                    let mut queries = queries.lock().unwrap();
                    // Gone already if the resolver was closed meanwhile.
                    queries.remove(&host).unwrap_or_default()
                };
                for waiter in waiters {
                    let _ = waiter.send(match &result {
                        Ok(addrs) => Ok(addrs.clone()),
                        Err(err) => Err(Error::Other(err.to_string())),
                    });
                }
            });
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ErrCancelled),
        }
    }

    /// Number of caller requests still waiting for a result.
    pub fn pending_requests(&self) -> usize {
        let queries = self.queries.lock().unwrap();
        queries.values().map(Vec::len).sum()
    }

    /// Number of distinct lookups in flight.
    pub fn in_flight_queries(&self) -> usize {
        let queries = self.queries.lock().unwrap();
        queries.len()
    }

    /// Cancels every pending request. Their callers get `ErrCancelled`;
    /// lookup results arriving later are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let waiters: Vec<Waiter> = {
            let mut queries = self.queries.lock().unwrap();
            queries.drain().flat_map(|(_, w)| w).collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Err(Error::ErrCancelled));
        }
    }
}
