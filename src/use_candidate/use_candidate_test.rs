use super::*;

#[test]
fn test_use_candidate_attr() -> Result<(), stun::Error> {
    let mut m = Message::new();
    m.write_header();
    assert!(!UseCandidateAttr::is_set(&m));

    UseCandidateAttr::new().add_to(&mut m)?;
    assert!(UseCandidateAttr::is_set(&m));
    assert_eq!(m.get(ATTR_USE_CANDIDATE)?, Vec::<u8>::new());
    Ok(())
}
