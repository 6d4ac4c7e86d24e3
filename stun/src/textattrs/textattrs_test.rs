use super::*;

#[test]
fn test_text_attribute_round_trip() -> Result<()> {
    let mut m = Message::new();
    m.write_header();

    let software = TextAttribute::new(ATTR_SOFTWARE, "icelink/0.1".to_owned());
    software.add_to(&mut m)?;

    let got = TextAttribute::get_from_as(&m, ATTR_SOFTWARE)?;
    assert_eq!(got, software);
    assert_eq!(got.to_string(), "icelink/0.1");
    Ok(())
}

#[test]
fn test_username_round_trip() -> Result<()> {
    let mut m = Message::new();
    m.write_header();

    Username::new(ATTR_USERNAME, "remoteufrag:localufrag".to_owned()).add_to(&mut m)?;

    let got = Username::get_from_as(&m, ATTR_USERNAME)?;
    assert_eq!(got.text, "remoteufrag:localufrag");
    Ok(())
}

#[test]
fn test_text_attribute_overflow() {
    let mut m = Message::new();
    m.write_header();

    let oversize = TextAttribute::new(ATTR_USERNAME, "x".repeat(1024));
    assert_eq!(
        oversize.add_to(&mut m),
        Err(Error::ErrAttributeSizeOverflow)
    );
}

#[test]
fn test_text_attribute_unsupported_type() {
    let mut m = Message::new();
    m.write_header();

    let bogus = TextAttribute::new(ATTR_PRIORITY, "nope".to_owned());
    assert!(bogus.add_to(&mut m).is_err());
    assert!(TextAttribute::get_from_as(&m, ATTR_PRIORITY).is_err());
}
