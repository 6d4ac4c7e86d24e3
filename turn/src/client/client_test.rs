use std::net::IpAddr;

use stun::xoraddr::XorMappedAddress;
use tokio::time::Duration;
use util::net::{Net, VirtualNet};

use super::*;

fn short_rtx() -> RtxConfig {
    RtxConfig {
        rto: Duration::from_millis(30),
        rc: 3,
        rm: 2,
        reliable: false,
    }
}

struct StubTurnServer {
    conn: Arc<dyn Conn + Send + Sync>,
    realm: String,
    nonce: String,
    relayed: SocketAddr,
    // Number of 437 answers to give before succeeding.
    mismatches: u16,
    // Observed client traffic past allocation.
    seen_tx: Option<mpsc::Sender<ServerSaw>>,
}

#[derive(Debug, PartialEq, Eq)]
enum ServerSaw {
    SendIndication(Vec<u8>),
    ChannelData(u16, Vec<u8>),
}

impl StubTurnServer {
    fn start(self) {
        tokio::spawn(async move {
            let mut mismatches = self.mismatches;
            let mut buf = vec![0u8; 1500];
            loop {
                let Ok((n, from)) = self.conn.recv_from(&mut buf).await else {
                    return;
                };
                if ChannelData::is_channel_data(&buf[..n]) {
                    let mut cd = ChannelData {
                        raw: buf[..n].to_vec(),
                        ..Default::default()
                    };
                    cd.decode().unwrap();
                    if let Some(tx) = &self.seen_tx {
                        let _ = tx.send(ServerSaw::ChannelData(cd.number.0, cd.data)).await;
                    }
                    continue;
                }
                if !is_message(&buf[..n]) {
                    continue;
                }
                let req = match Message::unmarshal_binary(&buf[..n]) {
                    Ok(m) => m,
                    Err(_) => continue,
                };

                // Send indications carry data out to the peer.
                if req.typ.class == MessageClass::Indication {
                    if req.typ.method == METHOD_SEND {
                        let mut data = Data::default();
                        data.get_from(&req).unwrap();
                        if let Some(tx) = &self.seen_tx {
                            let _ = tx.send(ServerSaw::SendIndication(data.0)).await;
                        }
                    }
                    continue;
                }

                let mut res = Message::new();
                match req.typ.method {
                    METHOD_ALLOCATE if !req.contains(ATTR_MESSAGE_INTEGRITY) => {
                        // Anonymous attempt: demand credentials.
                        res.build(&[
                            Box::new(req),
                            Box::new(MessageType::new(
                                METHOD_ALLOCATE,
                                MessageClass::ErrorResponse,
                            )),
                            Box::new(CODE_UNAUTHORIZED),
                            Box::new(Realm::new(ATTR_REALM, self.realm.clone())),
                            Box::new(Nonce::new(ATTR_NONCE, self.nonce.clone())),
                        ])
                        .unwrap();
                    }
                    METHOD_ALLOCATE if mismatches > 0 => {
                        mismatches -= 1;
                        res.build(&[
                            Box::new(req),
                            Box::new(MessageType::new(
                                METHOD_ALLOCATE,
                                MessageClass::ErrorResponse,
                            )),
                            Box::new(CODE_ALLOC_MISMATCH),
                        ])
                        .unwrap();
                    }
                    METHOD_ALLOCATE => {
                        res.build(&[
                            Box::new(req),
                            Box::new(MessageType::new(
                                METHOD_ALLOCATE,
                                MessageClass::SuccessResponse,
                            )),
                            Box::new(XorRelayed(self.relayed)),
                            Box::new(Lifetime(Duration::from_secs(600))),
                        ])
                        .unwrap();
                    }
                    method @ (METHOD_CREATE_PERMISSION | METHOD_CHANNEL_BIND | METHOD_REFRESH) => {
                        res.build(&[
                            Box::new(req),
                            Box::new(MessageType::new(method, MessageClass::SuccessResponse)),
                        ])
                        .unwrap();
                    }
                    _ => continue,
                }
                let _ = self.conn.send_to(&res.raw, from).await;
            }
        });
    }
}

// Setter shim so the stub can emit XOR-RELAYED-ADDRESS.
struct XorRelayed(SocketAddr);

impl Setter for XorRelayed {
    fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
        XorMappedAddress {
            ip: self.0.ip(),
            port: self.0.port(),
        }
        .add_to_as(m, ATTR_XOR_RELAYED_ADDRESS)
    }
}

async fn setup(mismatches: u16) -> (Client, SocketAddr) {
    setup_with_observer(mismatches, None).await
}

async fn setup_with_observer(
    mismatches: u16,
    seen_tx: Option<mpsc::Sender<ServerSaw>>,
) -> (Client, SocketAddr) {
    let vnet = VirtualNet::new();
    let net = Net::new(Some(vnet));

    let server_conn = net.bind("10.1.0.1:3478".parse().unwrap()).await.unwrap();
    let server_addr = server_conn.local_addr().unwrap();
    let relayed: SocketAddr = "10.1.0.1:50000".parse().unwrap();

    StubTurnServer {
        conn: server_conn,
        realm: "example.org".to_owned(),
        nonce: "obMatJos2AAACf//499k954d6OL34oL9FSTvy64sA".to_owned(),
        relayed,
        mismatches,
        seen_tx,
    }
    .start();

    let client_conn = net.bind("10.1.0.2:0".parse().unwrap()).await.unwrap();
    let client = Client::new(ClientConfig {
        turn_serv_addr: server_addr,
        username: "user".to_owned(),
        password: "pass".to_owned(),
        realm: String::new(),
        software: String::new(),
        rtx: short_rtx(),
        conn: client_conn,
    });
    client.listen().await.unwrap();

    (client, relayed)
}

#[tokio::test]
async fn test_allocate_authenticates_on_401() {
    let (client, relayed) = setup(0).await;

    let relay_conn = client.allocate().await.unwrap();
    assert_eq!(relay_conn.local_addr().unwrap(), relayed);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_allocate_retries_437_once() {
    let (client, relayed) = setup(1).await;

    let relay_conn = client.allocate().await.unwrap();
    assert_eq!(relay_conn.local_addr().unwrap(), relayed);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_allocate_persistent_437_fails() {
    // Two mismatches exceed the single retry: the allocation fails but
    // the failure is an error, not a wedged client.
    let (client, _relayed) = setup(2).await;

    let result = client.allocate().await;
    assert!(matches!(result, Err(Error::ErrAllocateFailed(_))));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_relay_send_indication_then_channel_data() {
    let (seen_tx, mut seen_rx) = mpsc::channel(16);
    let (client, _relayed) = setup_with_observer(0, Some(seen_tx)).await;

    let relay_conn = client.allocate().await.unwrap();
    let peer: SocketAddr = "10.1.0.77:7000".parse().unwrap();

    // Before a channel is bound, data leaves as a Send indication
    // (with the permission installed on first use).
    relay_conn.send_to(b"first", peer).await.unwrap();
    let saw = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saw, ServerSaw::SendIndication(b"first".to_vec()));

    // After ChannelBind, the same send uses the 4-byte framing.
    relay_conn.bind(peer).await.unwrap();
    relay_conn.send_to(b"second", peer).await.unwrap();
    let saw = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saw, ServerSaw::ChannelData(0x4000, b"second".to_vec()));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_second_allocate_is_refused() {
    let (client, _relayed) = setup(0).await;

    let _relay_conn = client.allocate().await.unwrap();
    let second = client.allocate().await;
    assert!(matches!(second, Err(Error::ErrOneAllocateOnly)));

    client.close().await.unwrap();
}
