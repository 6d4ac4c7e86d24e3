use super::*;

#[test]
fn test_controlling_round_trip() -> Result<(), stun::Error> {
    let mut m = Message::new();
    m.write_header();

    AttrControlling(4321).add_to(&mut m)?;

    let mut got = AttrControlling::default();
    got.get_from(&m)?;
    assert_eq!(got.0, 4321);

    let mut control = AttrControl::default();
    control.get_from(&m)?;
    assert_eq!(control.role, Role::Controlling);
    assert_eq!(control.tie_breaker.0, 4321);
    Ok(())
}

#[test]
fn test_controlled_round_trip() -> Result<(), stun::Error> {
    let mut m = Message::new();
    m.write_header();

    AttrControlled(0xdeadbeefcafe).add_to(&mut m)?;

    let mut control = AttrControl::default();
    control.get_from(&m)?;
    assert_eq!(control.role, Role::Controlled);
    assert_eq!(control.tie_breaker.0, 0xdeadbeefcafe);
    Ok(())
}

#[test]
fn test_control_absent() {
    let mut m = Message::new();
    m.write_header();

    let mut control = AttrControl::default();
    assert_eq!(
        control.get_from(&m),
        Err(stun::Error::ErrAttributeNotFound)
    );
}

#[test]
fn test_tie_breaker_wire_size() -> Result<(), stun::Error> {
    let mut m = Message::new();
    m.write_header();
    TieBreaker(7).add_to_as(&mut m, ATTR_ICE_CONTROLLING)?;

    let v = m.get(ATTR_ICE_CONTROLLING)?;
    assert_eq!(v.len(), TIE_BREAKER_SIZE);
    Ok(())
}
