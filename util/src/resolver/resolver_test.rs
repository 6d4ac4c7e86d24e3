use std::time::Duration;

use tokio::sync::mpsc;

use super::*;

fn blocking_lookup() -> (LookupFn, Arc<SyncMutex<Vec<mpsc::Sender<()>>>>) {
    // A lookup that never completes until released, standing in for a DNS
    // server that has gone away.
    let gates: Arc<SyncMutex<Vec<mpsc::Sender<()>>>> = Arc::new(SyncMutex::new(vec![]));
    let gates2 = Arc::clone(&gates);
    let lookup: LookupFn = Arc::new(move |_host: String| -> LookupFuture {
        let (tx, mut rx) = mpsc::channel(1);
        gates2.lock().unwrap().push(tx);
        Box::pin(async move {
            rx.recv().await;
            Ok(vec!["203.0.113.1:3478".parse().unwrap()])
        })
    });
    (lookup, gates)
}

#[tokio::test]
async fn test_resolver_shares_in_flight_query() {
    let (lookup, _gates) = blocking_lookup();
    let resolver = Arc::new(Resolver::with_lookup(lookup));

    let r1 = Arc::clone(&resolver);
    let h1 = tokio::spawn(async move { r1.resolve("stun.example.net:3478").await });
    let r2 = Arc::clone(&resolver);
    let h2 = tokio::spawn(async move { r2.resolve("stun.example.net:3478").await });

    // Both requests pending, one underlying query.
    let mut waited = 0;
    while resolver.pending_requests() < 2 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(resolver.pending_requests(), 2);
    assert_eq!(resolver.in_flight_queries(), 1);

    resolver.close();

    let res1 = h1.await.unwrap();
    let res2 = h2.await.unwrap();
    assert_eq!(res1, Err(Error::ErrCancelled));
    assert_eq!(res2, Err(Error::ErrCancelled));
    assert_eq!(resolver.pending_requests(), 0);
}

#[tokio::test]
async fn test_resolver_rejects_after_close() {
    let (lookup, _gates) = blocking_lookup();
    let resolver = Resolver::with_lookup(lookup);

    resolver.close();
    let result = resolver.resolve("stun.example.net:3478").await;
    assert_eq!(result, Err(Error::ErrCancelled));
}

#[tokio::test]
async fn test_resolver_delivers_to_all_waiters() {
    let (lookup, gates) = blocking_lookup();
    let resolver = Arc::new(Resolver::with_lookup(lookup));

    let r1 = Arc::clone(&resolver);
    let h1 = tokio::spawn(async move { r1.resolve("turn.example.net:3478").await });
    let r2 = Arc::clone(&resolver);
    let h2 = tokio::spawn(async move { r2.resolve("turn.example.net:3478").await });

    let mut waited = 0;
    while resolver.pending_requests() < 2 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }

    // Release the single underlying lookup.
    let gate = gates.lock().unwrap().remove(0);
    gate.try_send(()).unwrap();

    let addrs1 = h1.await.unwrap().unwrap();
    let addrs2 = h2.await.unwrap().unwrap();
    assert_eq!(addrs1, addrs2);
    assert_eq!(addrs1[0], "203.0.113.1:3478".parse().unwrap());
    assert_eq!(resolver.in_flight_queries(), 0);
}
