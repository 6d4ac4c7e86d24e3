use std::net::SocketAddr;

use super::*;
use crate::candidate::candidate_base::CandidateBaseConfig;
use crate::candidate::candidate_host::CandidateHostConfig;
use crate::candidate::candidate_server_reflexive::CandidateServerReflexiveConfig;
use crate::transport::TransportType;

fn host(addr: &str, component: u16) -> Arc<dyn Candidate + Send + Sync> {
    Arc::new(
        CandidateHostConfig {
            base_config: CandidateBaseConfig {
                transport: TransportType::Udp,
                address: addr.parse().unwrap(),
                component,
                ..CandidateBaseConfig::default()
            },
        }
        .new_candidate_host()
        .unwrap(),
    )
}

fn srflx(addr: &str, base: SocketAddr, component: u16) -> Arc<dyn Candidate + Send + Sync> {
    Arc::new(
        CandidateServerReflexiveConfig {
            base_config: CandidateBaseConfig {
                transport: TransportType::Udp,
                address: addr.parse().unwrap(),
                component,
                ..CandidateBaseConfig::default()
            },
            rel_addr: base.ip().to_string(),
            rel_port: base.port(),
        }
        .new_candidate_server_reflexive()
        .unwrap(),
    )
}

#[tokio::test]
async fn test_form_pairs_matches_component_and_family() {
    let cl = CheckList::new();
    let locals = vec![host("10.0.0.1:1000", 1), host("10.0.0.1:1001", 2)];
    let remotes = vec![
        host("10.0.0.2:2000", 1),
        host("10.0.0.2:2001", 2),
        host("[2001:db8::2]:2000", 1), // v6 against v4 locals: pruned
    ];

    let formed = cl.form_pairs(&locals, &remotes, true).await;
    assert_eq!(formed, 2);

    for p in cl.snapshot().await {
        assert_eq!(p.local.component(), p.remote.component());
        assert_eq!(p.local.addr().is_ipv4(), p.remote.addr().is_ipv4());
    }
}

#[tokio::test]
async fn test_form_pairs_substitutes_srflx_base() {
    let cl = CheckList::new();
    let base: SocketAddr = "10.0.0.1:1000".parse().unwrap();
    let locals = vec![
        host("10.0.0.1:1000", 1),
        srflx("203.0.113.7:40000", base, 1),
    ];
    let remotes = vec![host("10.0.0.2:2000", 1)];

    // The reflexive local collapses onto its base: one pair, not two.
    let formed = cl.form_pairs(&locals, &remotes, true).await;
    assert_eq!(formed, 1);

    let pairs = cl.snapshot().await;
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].local.candidate_type(), CandidateType::Host);
    assert_eq!(pairs[0].local.addr(), base);
}

#[tokio::test]
async fn test_form_pairs_is_idempotent() {
    let cl = CheckList::new();
    let locals = vec![host("10.0.0.1:1000", 1)];
    let remotes = vec![host("10.0.0.2:2000", 1)];

    assert_eq!(cl.form_pairs(&locals, &remotes, true).await, 1);
    assert_eq!(cl.form_pairs(&locals, &remotes, true).await, 0);
    assert_eq!(cl.len().await, 1);
}

#[tokio::test]
async fn test_initial_states_one_waiting_per_foundation() {
    let cl = CheckList::new();
    // Two locals on the same interface share a foundation; remotes on
    // distinct addresses split them into two foundation groups.
    let locals = vec![host("10.0.0.1:1000", 1)];
    let remotes = vec![host("10.0.0.2:2000", 1), host("10.0.0.3:2000", 1)];
    cl.form_pairs(&locals, &remotes, true).await;

    let waiting = cl
        .snapshot()
        .await
        .iter()
        .filter(|p| p.state() == CandidatePairState::Waiting)
        .count();
    assert_eq!(waiting, 2, "one waiting pair per foundation group");
}

#[tokio::test]
async fn test_unfreeze_foundation() {
    let cl = CheckList::new();
    let locals = vec![host("10.0.0.1:1000", 1), host("10.0.0.1:1000", 2)];
    let remotes = vec![host("10.0.0.2:2000", 1), host("10.0.0.2:2000", 2)];
    cl.form_pairs(&locals, &remotes, true).await;

    let pairs = cl.snapshot().await;
    let frozen: Vec<_> = pairs
        .iter()
        .filter(|p| p.state() == CandidatePairState::Frozen)
        .collect();
    // Components share the address, so both pairs have one foundation:
    // the second is frozen until the first succeeds.
    assert_eq!(frozen.len(), 1);

    let foundation = pair_foundation(frozen[0]);
    cl.unfreeze_foundation(&foundation).await;
    assert_eq!(frozen[0].state(), CandidatePairState::Waiting);
}

#[tokio::test]
async fn test_next_waiting_is_priority_ordered() {
    let cl = CheckList::new();
    let locals = vec![host("10.0.0.1:1000", 1)];
    let remotes = vec![host("10.0.0.2:2000", 1), host("10.0.0.3:2000", 1)];
    cl.form_pairs(&locals, &remotes, true).await;

    let first = cl.next_waiting().await.unwrap();
    let best = cl
        .snapshot()
        .await
        .iter()
        .map(|p| p.priority())
        .max()
        .unwrap();
    assert_eq!(first.priority(), best);
}

#[tokio::test]
async fn test_triggered_queue_fifo_and_dedup() {
    let cl = CheckList::new();
    let locals = vec![host("10.0.0.1:1000", 1)];
    let remotes = vec![host("10.0.0.2:2000", 1), host("10.0.0.3:2000", 1)];
    cl.form_pairs(&locals, &remotes, true).await;

    let pairs = cl.snapshot().await;
    cl.push_triggered(Arc::clone(&pairs[0])).await;
    cl.push_triggered(Arc::clone(&pairs[1])).await;
    cl.push_triggered(Arc::clone(&pairs[0])).await; // dup

    assert_eq!(*cl.pop_triggered().await.unwrap(), *pairs[0]);
    assert_eq!(*cl.pop_triggered().await.unwrap(), *pairs[1]);
    assert!(cl.pop_triggered().await.is_none());
}

#[tokio::test]
async fn test_exhaustion() {
    let cl = CheckList::new();
    let locals = vec![host("10.0.0.1:1000", 1)];
    let remotes = vec![host("10.0.0.2:2000", 1)];
    cl.form_pairs(&locals, &remotes, true).await;

    assert!(!cl.is_exhausted(1).await);

    for p in cl.snapshot().await {
        p.set_state(CandidatePairState::Failed);
    }
    assert!(cl.is_exhausted(1).await);

    // A component with no pairs at all is not "exhausted": it may not
    // have received remote candidates yet.
    assert!(!cl.is_exhausted(7).await);
}

#[tokio::test]
async fn test_fail_pairs_referencing_candidate() {
    let cl = CheckList::new();
    let gone = host("10.0.0.1:1000", 1);
    let locals = vec![Arc::clone(&gone)];
    let remotes = vec![host("10.0.0.2:2000", 1)];
    cl.form_pairs(&locals, &remotes, true).await;

    cl.fail_pairs_referencing(&*gone).await;
    assert!(cl
        .snapshot()
        .await
        .iter()
        .all(|p| p.state() == CandidatePairState::Failed));
}
