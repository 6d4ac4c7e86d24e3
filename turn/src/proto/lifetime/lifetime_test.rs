use super::*;

#[test]
fn test_lifetime_round_trip() {
    let mut m = Message::new();
    m.write_header();

    let lt = Lifetime(Duration::from_secs(600));
    lt.add_to(&mut m).unwrap();

    let mut got = Lifetime::default();
    got.get_from(&m).unwrap();
    assert_eq!(got, lt);
    assert_eq!(got.to_string(), "600s");
}

#[test]
fn test_lifetime_bad_size() {
    let mut m = Message::new();
    m.write_header();
    m.add(ATTR_LIFETIME, &[0, 0, 1]);

    let mut got = Lifetime::default();
    assert!(got.get_from(&m).is_err());
}
