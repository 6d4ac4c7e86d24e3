use super::*;

#[test]
fn test_attr_type_ranges() {
    assert!(ATTR_USERNAME.comprehension_required());
    assert!(ATTR_PRIORITY.comprehension_required());
    assert!(ATTR_FINGERPRINT.comprehension_optional());
    assert!(ATTR_ICE_CONTROLLING.comprehension_optional());
}

#[test]
fn test_attr_type_display() {
    assert_eq!(ATTR_XORMAPPED_ADDRESS.to_string(), "XOR-MAPPED-ADDRESS");
    assert_eq!(ATTR_USE_CANDIDATE.to_string(), "USE-CANDIDATE");
    assert_eq!(AttrType(0x7f7f).to_string(), "0x7f7f");
}

#[test]
fn test_padding() {
    assert_eq!(nearest_padded_value_length(0), 0);
    assert_eq!(nearest_padded_value_length(1), 4);
    assert_eq!(nearest_padded_value_length(4), 4);
    assert_eq!(nearest_padded_value_length(5), 8);
    assert_eq!(nearest_padded_value_length(20), 20);
}

#[test]
fn test_unknown_comprehension_required_listing() {
    let attrs = Attributes(vec![
        RawAttribute {
            typ: ATTR_USERNAME,
            length: 0,
            value: vec![],
        },
        RawAttribute {
            typ: AttrType(0x0077),
            length: 0,
            value: vec![],
        },
        RawAttribute {
            typ: AttrType(0x8077),
            length: 0,
            value: vec![],
        },
    ]);

    let unknown = attrs.unknown_comprehension_required(KNOWN_ATTRIBUTES);
    assert_eq!(unknown, vec![AttrType(0x0077)]);
}
