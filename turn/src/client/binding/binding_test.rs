use super::*;

#[test]
fn test_binding_manager_assigns_from_0x4000() {
    let mut m = BindingManager::new();
    let b = m.create("203.0.113.1:5000".parse().unwrap()).unwrap();
    assert_eq!(b.number, ChannelNumber(MIN_CHANNEL_NUMBER));

    let b2 = m.create("203.0.113.2:5000".parse().unwrap()).unwrap();
    assert_eq!(b2.number, ChannelNumber(MIN_CHANNEL_NUMBER + 1));
    assert_eq!(m.size(), 2);
}

#[test]
fn test_binding_manager_lookups() {
    let mut m = BindingManager::new();
    let addr: SocketAddr = "203.0.113.1:5000".parse().unwrap();
    let b = m.create(addr).unwrap();

    assert_eq!(m.find_by_addr(&addr), Some(b));
    assert_eq!(m.find_by_number(b.number.0), Some(b));
    assert_eq!(m.find_by_number(0x7FFF), None);
}

#[test]
fn test_binding_manager_rejects_duplicate_addr() {
    let mut m = BindingManager::new();
    let addr: SocketAddr = "203.0.113.1:5000".parse().unwrap();
    assert!(m.create(addr).is_some());
    assert!(m.create(addr).is_none());
}

#[test]
fn test_binding_manager_delete() {
    let mut m = BindingManager::new();
    let addr: SocketAddr = "203.0.113.1:5000".parse().unwrap();
    let b = m.create(addr).unwrap();

    assert!(m.delete_by_addr(&addr));
    assert!(!m.delete_by_addr(&addr));
    assert_eq!(m.find_by_number(b.number.0), None);
    assert_eq!(m.size(), 0);
}
