use super::*;
use crate::proto::PROTO_UDP;

#[test]
fn test_requested_transport_round_trip() {
    let mut m = Message::new();
    m.write_header();

    let rt = RequestedTransport {
        protocol: PROTO_UDP,
    };
    rt.add_to(&mut m).unwrap();

    let mut got = RequestedTransport::default();
    got.get_from(&m).unwrap();
    assert_eq!(got, rt);
    assert_eq!(got.to_string(), "protocol: UDP");
}

#[test]
fn test_requested_transport_wire_layout() {
    let mut m = Message::new();
    m.write_header();
    RequestedTransport {
        protocol: PROTO_UDP,
    }
    .add_to(&mut m)
    .unwrap();

    // Protocol byte followed by three RFFU zeros.
    assert_eq!(m.get(ATTR_REQUESTED_TRANSPORT).unwrap(), vec![17, 0, 0, 0]);
}
