use super::*;

#[test]
fn test_channel_data_encode_decode() {
    let mut cd = ChannelData {
        data: b"some payload".to_vec(),
        number: ChannelNumber(MIN_CHANNEL_NUMBER + 3),
        raw: vec![],
    };
    cd.encode();

    let mut decoded = ChannelData {
        raw: cd.raw.clone(),
        ..Default::default()
    };
    decoded.decode().unwrap();
    assert_eq!(decoded.number, cd.number);
    assert_eq!(decoded.data, cd.data);

    // UDP framing carries no padding: 4-byte header plus payload.
    assert_eq!(cd.raw.len(), CHANNEL_DATA_HEADER_SIZE + cd.data.len());
}

#[test]
fn test_channel_data_decode_padded() {
    // TCP framing pads to 4 bytes; the length field still names the
    // unpadded payload.
    let mut raw = vec![0x40, 0x01, 0x00, 0x02, 0xab, 0xcd, 0x00, 0x00];
    let mut cd = ChannelData {
        raw: raw.drain(..).collect(),
        ..Default::default()
    };
    cd.decode().unwrap();
    assert_eq!(cd.number, ChannelNumber(0x4001));
    assert_eq!(cd.data, vec![0xab, 0xcd]);
}

#[test]
fn test_channel_data_decode_errors() {
    let mut short = ChannelData {
        raw: vec![0x40, 0x00, 0x00],
        ..Default::default()
    };
    assert_eq!(short.decode(), Err(Error::ErrBadChannelDataLength));

    let mut bad_number = ChannelData {
        raw: vec![0x3f, 0xff, 0x00, 0x00],
        ..Default::default()
    };
    assert_eq!(bad_number.decode(), Err(Error::ErrChannelNumberOutOfRange));

    let mut truncated = ChannelData {
        raw: vec![0x40, 0x00, 0x00, 0x08, 0x01, 0x02],
        ..Default::default()
    };
    assert_eq!(truncated.decode(), Err(Error::ErrBadChannelDataLength));
}

#[test]
fn test_is_channel_data() {
    let mut cd = ChannelData {
        data: vec![1, 2, 3],
        number: ChannelNumber(0x4000),
        raw: vec![],
    };
    cd.encode();
    assert!(ChannelData::is_channel_data(&cd.raw));

    // STUN-shaped or plain traffic is not channel data.
    assert!(!ChannelData::is_channel_data(&[0x00, 0x01, 0x00, 0x00]));
    assert!(!ChannelData::is_channel_data(&[0x80, 0x00, 0x00, 0x00]));
    assert!(!ChannelData::is_channel_data(&[0x40]));
}
