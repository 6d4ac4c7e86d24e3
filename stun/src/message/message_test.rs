use super::*;
use crate::textattrs::TextAttribute;

#[test]
fn test_message_type_round_trip() {
    let types = [
        BINDING_REQUEST,
        BINDING_SUCCESS,
        BINDING_ERROR,
        BINDING_INDICATION,
        MessageType::new(METHOD_ALLOCATE, MessageClass::Request),
        MessageType::new(METHOD_REFRESH, MessageClass::SuccessResponse),
        MessageType::new(METHOD_SEND, MessageClass::Indication),
        MessageType::new(METHOD_CHANNEL_BIND, MessageClass::ErrorResponse),
    ];
    for t in types {
        assert_eq!(MessageType::from_value(t.value()), t, "{t}");
    }
}

#[test]
fn test_binding_request_value() {
    // 0x0001: Binding request, straight from RFC 5389.
    assert_eq!(BINDING_REQUEST.value(), 0x0001);
    assert_eq!(BINDING_SUCCESS.value(), 0x0101);
    assert_eq!(BINDING_ERROR.value(), 0x0111);
}

#[test]
fn test_message_decode_encode_round_trip() -> Result<()> {
    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_REQUEST),
        Box::new(TransactionId::new()),
        Box::new(TextAttribute::new(ATTR_SOFTWARE, "icelink test".to_owned())),
    ])?;
    m.add(ATTR_PRIORITY, &0x6e7f1effu32.to_be_bytes());

    let decoded = Message::unmarshal_binary(&m.raw)?;
    assert_eq!(decoded, m);
    assert_eq!(decoded.raw, m.raw);

    // And once more through the decoded copy.
    let mut re = decoded.clone();
    re.encode();
    assert_eq!(re.raw, m.raw);

    Ok(())
}

#[test]
fn test_message_decode_too_short() {
    let result = Message::unmarshal_binary(&[0u8; MESSAGE_HEADER_SIZE - 1]);
    assert_eq!(result.unwrap_err(), Error::ErrTooShort);

    // Header promises more attribute bytes than the packet carries.
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])
        .unwrap();
    m.add(ATTR_PRIORITY, &[0, 0, 0, 1]);
    let truncated = &m.raw[..m.raw.len() - 2];
    assert_eq!(
        Message::unmarshal_binary(truncated).unwrap_err(),
        Error::ErrTooShort
    );
}

#[test]
fn test_message_decode_bad_magic() {
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])
        .unwrap();
    m.raw[4] = 0x42;
    let result = Message::unmarshal_binary(&m.raw);
    assert!(matches!(result.unwrap_err(), Error::ErrBadMagic(_)));
}

#[test]
fn test_message_decode_odd_alignment() {
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])
        .unwrap();
    // Hand-corrupt the length field to a non-multiple of 4.
    m.raw[2..4].copy_from_slice(&3u16.to_be_bytes());
    m.raw.extend_from_slice(&[0, 0, 0]);
    let result = Message::unmarshal_binary(&m.raw);
    assert_eq!(result.unwrap_err(), Error::ErrOddAlignment);
}

#[test]
fn test_message_attribute_padding() -> Result<()> {
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
    // 5 bytes of value must occupy 8 on the wire.
    m.add(ATTR_DATA, &[1, 2, 3, 4, 5]);
    assert_eq!(m.length as usize, ATTRIBUTE_HEADER_SIZE + 8);

    let decoded = Message::unmarshal_binary(&m.raw)?;
    assert_eq!(decoded.get(ATTR_DATA)?, vec![1, 2, 3, 4, 5]);
    Ok(())
}

#[test]
fn test_message_unknown_comprehension_required() {
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])
        .unwrap();
    // 0x7777 is comprehension-required and unknown to this stack;
    // 0x8777 is optional and must be tolerated.
    m.add(AttrType(0x7777), &[0, 0, 0, 0]);
    m.add(AttrType(0x8777), &[0, 0, 0, 0]);

    match m.check_unknown_attributes() {
        Err(Error::ErrUnknownComprehensionRequired(types)) => {
            assert_eq!(types, vec![0x7777]);
        }
        other => panic!("expected unknown-attribute error, got {other:?}"),
    }

    let mut clean = Message::new();
    clean
        .build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])
        .unwrap();
    clean.add(ATTR_PRIORITY, &[0, 0, 0, 1]);
    assert!(clean.check_unknown_attributes().is_ok());
}

#[test]
fn test_is_message() {
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])
        .unwrap();
    assert!(is_message(&m.raw));

    // Too short.
    assert!(!is_message(&m.raw[..8]));

    // ChannelData-shaped first byte.
    let mut cd = m.raw.clone();
    cd[0] = 0x40;
    assert!(!is_message(&cd));

    // Wrong cookie.
    let mut bad = m.raw.clone();
    bad[5] = 0;
    assert!(!is_message(&bad));
}

#[test]
fn test_message_responds_with_request_id() -> Result<()> {
    let mut req = Message::new();
    req.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;

    let mut res = Message::new();
    res.build(&[Box::new(req.clone()), Box::new(BINDING_SUCCESS)])?;
    assert_eq!(res.transaction_id, req.transaction_id);
    assert_eq!(res.typ, BINDING_SUCCESS);
    Ok(())
}
