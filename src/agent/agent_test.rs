use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use stun::message::*;
use stun::xoraddr::XorMappedAddress;
use tokio::sync::mpsc;
use util::net::{Net, VirtualNet};

use super::*;
use crate::compat::NominationMode;
use crate::sdp::unmarshal_candidate;
use crate::state::ComponentState;
use crate::url::{ProtoType, SchemeType, Url};

fn test_config(vnet: &Arc<VirtualNet>, ip: &str, controlling: bool) -> AgentConfig {
    AgentConfig {
        controlling,
        local_addrs: vec![ip.parse().unwrap()],
        net: Some(Net::new(Some(Arc::clone(vnet)))),
        check_interval: Some(Duration::from_millis(10)),
        initial_rto: Some(Duration::from_millis(40)),
        ..AgentConfig::default()
    }
}

fn capture_events(agent: &Agent) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel(128);
    agent.on_event(Box::new(move |event| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(event).await;
        })
    }));
    rx
}

async fn wait_for_gathering_done(events: &mut mpsc::Receiver<AgentEvent>, stream_id: u32) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(AgentEvent::CandidateGatheringDone { stream_id: sid })) if sid == stream_id => {
                return;
            }
            Ok(Some(_)) => {}
            _ => panic!("gathering never finished for stream {stream_id}"),
        }
    }
}

async fn wait_for_state(agent: &Agent, stream_id: u32, component_id: u16, state: ComponentState) {
    for _ in 0..500 {
        if agent.component_state(stream_id, component_id).await == Ok(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "stream {stream_id} component {component_id} never reached {state}, still {:?}",
        agent.component_state(stream_id, component_id).await
    );
}

/// Signals credentials and candidates both ways through their SDP
/// string form, the way a real offer/answer exchange would.
async fn exchange(a: &Agent, sa: u32, b: &Agent, sb: u32) {
    let (a_ufrag, a_pwd) = a.get_local_credentials(sa).await.unwrap();
    let (b_ufrag, b_pwd) = b.get_local_credentials(sb).await.unwrap();
    b.set_remote_credentials(sb, &a_ufrag, &a_pwd).await.unwrap();
    a.set_remote_credentials(sa, &b_ufrag, &b_pwd).await.unwrap();

    let a_cands = a.get_local_candidates(sa, 1).await.unwrap();
    let lines: Vec<String> = a_cands.iter().map(|c| c.marshal()).collect();
    let parsed = lines
        .iter()
        .map(|l| {
            let c: Arc<dyn Candidate + Send + Sync> = Arc::new(unmarshal_candidate(l).unwrap());
            c
        })
        .collect();
    b.set_remote_candidates(sb, 1, parsed).await.unwrap();

    let b_cands = b.get_local_candidates(sb, 1).await.unwrap();
    let lines: Vec<String> = b_cands.iter().map(|c| c.marshal()).collect();
    let parsed = lines
        .iter()
        .map(|l| {
            let c: Arc<dyn Candidate + Send + Sync> = Arc::new(unmarshal_candidate(l).unwrap());
            c
        })
        .collect();
    a.set_remote_candidates(sa, 1, parsed).await.unwrap();
}

async fn connect_two(
    a_config: AgentConfig,
    b_config: AgentConfig,
) -> (Agent, u32, Agent, u32, mpsc::Receiver<AgentEvent>, mpsc::Receiver<AgentEvent>) {
    let a = Agent::new(a_config).unwrap();
    let b = Agent::new(b_config).unwrap();
    let mut a_events = capture_events(&a);
    let mut b_events = capture_events(&b);

    let sa = a.add_stream(1).await.unwrap();
    let sb = b.add_stream(1).await.unwrap();

    a.gather_candidates(sa).await.unwrap();
    b.gather_candidates(sb).await.unwrap();
    wait_for_gathering_done(&mut a_events, sa).await;
    wait_for_gathering_done(&mut b_events, sb).await;

    exchange(&a, sa, &b, sb).await;

    (a, sa, b, sb, a_events, b_events)
}

// Basic loopback: both agents reach Ready with one nominated pair and
// data crosses byte-for-byte.
#[tokio::test]
async fn test_connectivity_loopback() {
    let vnet = VirtualNet::new();
    let (a, sa, b, sb, _ae, _be) = connect_two(
        test_config(&vnet, "10.0.0.1", true),
        test_config(&vnet, "10.0.0.2", false),
    )
    .await;

    wait_for_state(&a, sa, 1, ComponentState::Ready).await;
    wait_for_state(&b, sb, 1, ComponentState::Ready).await;

    assert!(a.get_selected_pair(sa, 1).await.unwrap().is_some());
    assert!(b.get_selected_pair(sb, 1).await.unwrap().is_some());

    // b listens, a talks.
    let (data_tx, mut data_rx) = mpsc::channel::<Vec<u8>>(8);
    b.attach_recv(
        sb,
        1,
        Box::new(move |data| {
            let data_tx = data_tx.clone();
            Box::pin(async move {
                let _ = data_tx.send(data).await;
            })
        }),
    )
    .await
    .unwrap();

    let payload = b"12345678 hello over ice";
    a.send(sa, 1, payload).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), data_rx.recv())
        .await
        .expect("no data arrived")
        .unwrap();
    assert_eq!(received, payload);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

// Two components (think RTP + RTCP): Ready only once both have a
// nominated pair.
#[tokio::test]
async fn test_two_component_stream_reaches_ready() {
    let vnet = VirtualNet::new();
    let a = Agent::new(test_config(&vnet, "10.0.0.1", true)).unwrap();
    let b = Agent::new(test_config(&vnet, "10.0.0.2", false)).unwrap();
    let mut a_events = capture_events(&a);
    let mut b_events = capture_events(&b);

    let sa = a.add_stream(2).await.unwrap();
    let sb = b.add_stream(2).await.unwrap();

    a.gather_candidates(sa).await.unwrap();
    b.gather_candidates(sb).await.unwrap();
    wait_for_gathering_done(&mut a_events, sa).await;
    wait_for_gathering_done(&mut b_events, sb).await;

    let (a_ufrag, a_pwd) = a.get_local_credentials(sa).await.unwrap();
    let (b_ufrag, b_pwd) = b.get_local_credentials(sb).await.unwrap();
    b.set_remote_credentials(sb, &a_ufrag, &a_pwd).await.unwrap();
    a.set_remote_credentials(sa, &b_ufrag, &b_pwd).await.unwrap();

    for component_id in [1u16, 2] {
        let a_cands = a.get_local_candidates(sa, component_id).await.unwrap();
        let parsed = a_cands
            .iter()
            .map(|c| {
                let c: Arc<dyn Candidate + Send + Sync> =
                    Arc::new(unmarshal_candidate(&c.marshal()).unwrap());
                c
            })
            .collect();
        b.set_remote_candidates(sb, component_id, parsed).await.unwrap();

        let b_cands = b.get_local_candidates(sb, component_id).await.unwrap();
        let parsed = b_cands
            .iter()
            .map(|c| {
                let c: Arc<dyn Candidate + Send + Sync> =
                    Arc::new(unmarshal_candidate(&c.marshal()).unwrap());
                c
            })
            .collect();
        a.set_remote_candidates(sa, component_id, parsed).await.unwrap();
    }

    for component_id in [1u16, 2] {
        wait_for_state(&a, sa, component_id, ComponentState::Ready).await;
        wait_for_state(&b, sb, component_id, ComponentState::Ready).await;
        assert!(a
            .get_selected_pair(sa, component_id)
            .await
            .unwrap()
            .is_some());
    }

    a.close().await.unwrap();
    b.close().await.unwrap();
}

// Role conflict: both sides start controlling; the tie-breakers settle
// it and both still converge.
#[tokio::test]
async fn test_role_conflict_resolves() {
    let vnet = VirtualNet::new();
    let (a, sa, b, sb, _ae, _be) = connect_two(
        test_config(&vnet, "10.0.0.1", true),
        test_config(&vnet, "10.0.0.2", true),
    )
    .await;

    wait_for_state(&a, sa, 1, ComponentState::Ready).await;
    wait_for_state(&b, sb, 1, ComponentState::Ready).await;

    assert_ne!(
        a.role(),
        b.role(),
        "exactly one agent must have flipped to controlled"
    );

    a.close().await.unwrap();
    b.close().await.unwrap();
}

// Aggressive nomination on the controlling side against a regular
// controlled peer.
#[tokio::test]
async fn test_aggressive_nomination() {
    let vnet = VirtualNet::new();
    let mut a_config = test_config(&vnet, "10.0.0.1", true);
    a_config.nomination_mode = NominationMode::Aggressive;
    let b_config = test_config(&vnet, "10.0.0.2", false);

    let (a, sa, b, sb, a_events, _be) = connect_two(a_config, b_config).await;

    wait_for_state(&a, sa, 1, ComponentState::Ready).await;
    wait_for_state(&b, sb, 1, ComponentState::Ready).await;

    let pair = a.get_selected_pair(sa, 1).await.unwrap().unwrap();
    assert!(pair.is_nominated());

    drop(a_events);
    a.close().await.unwrap();
    b.close().await.unwrap();
}

// A stubbed STUN server hands out a fixed mapping: exactly one
// server-reflexive candidate appears, based on the host candidate.
#[tokio::test]
async fn test_gather_server_reflexive() {
    let vnet = VirtualNet::new();
    let net = Net::new(Some(Arc::clone(&vnet)));

    // STUN server answering every Binding request with a fixed
    // XOR-MAPPED-ADDRESS of 203.0.113.7:40000.
    let server = net.bind("10.0.0.99:3478".parse().unwrap()).await.unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while let Ok((n, from)) = server.recv_from(&mut buf).await {
            if !is_message(&buf[..n]) {
                continue;
            }
            let Ok(req) = Message::unmarshal_binary(&buf[..n]) else {
                continue;
            };
            let mut res = Message::new();
            res.build(&[
                Box::new(req),
                Box::new(BINDING_SUCCESS),
                Box::new(XorMappedAddress {
                    ip: "203.0.113.7".parse().unwrap(),
                    port: 40000,
                }),
            ])
            .unwrap();
            let _ = server.send_to(&res.raw, from).await;
        }
    });

    let mut config = test_config(&vnet, "10.0.0.1", true);
    config.stun_server = Some(Url {
        scheme: SchemeType::Stun,
        host: "10.0.0.99".to_owned(),
        port: 3478,
        username: String::new(),
        password: String::new(),
        proto: ProtoType::Udp,
    });

    let agent = Agent::new(config).unwrap();
    let mut events = capture_events(&agent);
    let stream_id = agent.add_stream(1).await.unwrap();
    agent.gather_candidates(stream_id).await.unwrap();
    wait_for_gathering_done(&mut events, stream_id).await;

    let candidates = agent.get_local_candidates(stream_id, 1).await.unwrap();
    let hosts: Vec<_> = candidates
        .iter()
        .filter(|c| c.candidate_type() == CandidateType::Host)
        .collect();
    let srflx: Vec<_> = candidates
        .iter()
        .filter(|c| c.candidate_type() == CandidateType::ServerReflexive)
        .collect();

    assert_eq!(hosts.len(), 1);
    assert_eq!(srflx.len(), 1);

    let s = &srflx[0];
    assert_eq!(s.addr(), "203.0.113.7:40000".parse().unwrap());
    assert_eq!(s.priority() >> 24, 100);

    let related = s.related_address().unwrap();
    assert_eq!(related.address, hosts[0].addr().ip().to_string());
    assert_eq!(related.port, hosts[0].addr().port());

    agent.close().await.unwrap();
}

// A black-holed remote: every check times out, the pair fails, and the
// component ends up Failed.
#[tokio::test]
async fn test_component_fails_on_exhausted_checklist() {
    let vnet = VirtualNet::new();
    let mut config = test_config(&vnet, "10.0.0.1", true);
    config.max_binding_requests = Some(3);

    let agent = Agent::new(config).unwrap();
    let mut events = capture_events(&agent);
    let stream_id = agent.add_stream(1).await.unwrap();
    agent.gather_candidates(stream_id).await.unwrap();
    wait_for_gathering_done(&mut events, stream_id).await;

    agent
        .set_remote_credentials(stream_id, "remoteufragzz", "remotepwdremotepwdremotepwd00000")
        .await
        .unwrap();
    let ghost: Arc<dyn Candidate + Send + Sync> = Arc::new(
        unmarshal_candidate("99 1 udp 2130706431 10.9.9.9 9999 typ host").unwrap(),
    );
    agent
        .set_remote_candidates(stream_id, 1, vec![ghost])
        .await
        .unwrap();

    wait_for_state(&agent, stream_id, 1, ComponentState::Failed).await;

    agent.close().await.unwrap();
}

// After remove_stream, no callback may fire for the stream.
#[tokio::test]
async fn test_remove_stream_silences_callbacks() {
    let vnet = VirtualNet::new();
    let (a, sa, b, sb, _ae, mut b_events) = connect_two(
        test_config(&vnet, "10.0.0.1", true),
        test_config(&vnet, "10.0.0.2", false),
    )
    .await;

    wait_for_state(&a, sa, 1, ComponentState::Ready).await;
    wait_for_state(&b, sb, 1, ComponentState::Ready).await;

    let recv_count = Arc::new(AtomicUsize::new(0));
    let recv_count2 = Arc::clone(&recv_count);
    b.attach_recv(
        sb,
        1,
        Box::new(move |_data| {
            let recv_count2 = Arc::clone(&recv_count2);
            Box::pin(async move {
                recv_count2.fetch_add(1, AtomicOrdering::SeqCst);
            })
        }),
    )
    .await
    .unwrap();

    b.remove_stream(sb).await.unwrap();

    // Drain whatever was queued before removal; nothing new may appear.
    while b_events.try_recv().is_ok() {}

    let _ = a.send(sa, 1, b"shout into the void").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(recv_count.load(AtomicOrdering::SeqCst), 0);
    assert!(
        b_events.try_recv().is_err(),
        "no event may fire for a removed stream"
    );

    // And the stream is gone from the facade.
    assert_eq!(
        b.send(sb, 1, b"x").await.unwrap_err(),
        Error::ErrStreamNotFound
    );

    a.close().await.unwrap();
    b.close().await.unwrap();
}

// Facade misuse is reported synchronously and leaves state alone.
#[tokio::test]
async fn test_facade_misuse_errors() {
    let vnet = VirtualNet::new();
    let agent = Agent::new(test_config(&vnet, "10.0.0.1", true)).unwrap();

    assert_eq!(agent.add_stream(0).await.unwrap_err(), Error::ErrNoComponents);
    assert_eq!(
        agent.send(42, 1, b"x").await.unwrap_err(),
        Error::ErrStreamNotFound
    );

    let stream_id = agent.add_stream(2).await.unwrap();
    assert_eq!(stream_id, 1);
    assert_eq!(
        agent.send(stream_id, 3, b"x").await.unwrap_err(),
        Error::ErrComponentNotFound
    );
    // No nominated pair yet.
    assert_eq!(
        agent.send(stream_id, 1, b"x").await.unwrap_err(),
        Error::ErrNotReady
    );
    assert_eq!(
        agent
            .set_remote_credentials(stream_id, "", "pwd")
            .await
            .unwrap_err(),
        Error::ErrRemoteUfragEmpty
    );
    assert_eq!(
        agent.set_port_range(stream_id, 1, 9000, 8000).await.unwrap_err(),
        Error::ErrInvertedPortRange
    );

    // Streams count up from 1.
    assert_eq!(agent.add_stream(1).await.unwrap(), 2);

    agent.close().await.unwrap();
    assert_eq!(agent.close().await.unwrap_err(), Error::ErrClosed);
}

// Supplied credentials must clear the RFC entropy floors.
#[tokio::test]
async fn test_local_credential_entropy_floors() {
    let vnet = VirtualNet::new();

    let mut config = test_config(&vnet, "10.0.0.1", true);
    config.local_ufrag = "ab".to_owned(); // under 24 bits
    assert!(matches!(
        Agent::new(config),
        Err(Error::ErrLocalUfragInsufficientBits)
    ));

    let mut config = test_config(&vnet, "10.0.0.1", true);
    config.local_pwd = "shortpwd".to_owned(); // under 128 bits
    assert!(matches!(
        Agent::new(config),
        Err(Error::ErrLocalPwdInsufficientBits)
    ));
}

// Stream names are stored and component port ranges constrain binds.
#[tokio::test]
async fn test_stream_name_and_port_range() {
    let vnet = VirtualNet::new();
    let agent = Agent::new(test_config(&vnet, "10.0.0.1", true)).unwrap();
    let mut events = capture_events(&agent);

    let stream_id = agent.add_stream(1).await.unwrap();
    agent.set_stream_name(stream_id, "audio").await.unwrap();
    agent.set_port_range(stream_id, 1, 50000, 50010).await.unwrap();

    agent.gather_candidates(stream_id).await.unwrap();
    wait_for_gathering_done(&mut events, stream_id).await;

    let candidates = agent.get_local_candidates(stream_id, 1).await.unwrap();
    assert!(!candidates.is_empty());
    for c in &candidates {
        let port = c.addr().port();
        assert!((50000..=50010).contains(&port), "port {port} out of range");
    }

    agent.close().await.unwrap();
}
