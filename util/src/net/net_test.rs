use super::*;

#[tokio::test]
async fn test_virtual_net_round_trip() -> Result<()> {
    let vnet = VirtualNet::new();
    let net = Net::new(Some(vnet));
    assert!(net.is_virtual());

    let a = net.bind("10.0.0.1:1000".parse().unwrap()).await?;
    let b = net.bind("10.0.0.2:2000".parse().unwrap()).await?;

    a.send_to(b"hello", b.local_addr()?).await?;

    let mut buf = [0u8; 64];
    let (n, from) = b.recv_from(&mut buf).await?;
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(from, a.local_addr()?);

    Ok(())
}

#[tokio::test]
async fn test_virtual_net_preserves_order() -> Result<()> {
    let vnet = VirtualNet::new();
    let net = Net::new(Some(vnet));

    let a = net.bind("10.0.0.1:1000".parse().unwrap()).await?;
    let b = net.bind("10.0.0.2:2000".parse().unwrap()).await?;
    let baddr = b.local_addr()?;

    for i in 0u8..32 {
        a.send_to(&[i], baddr).await?;
    }
    for i in 0u8..32 {
        let mut buf = [0u8; 4];
        let (n, _) = b.recv_from(&mut buf).await?;
        assert_eq!((n, buf[0]), (1, i));
    }

    Ok(())
}

#[tokio::test]
async fn test_virtual_net_ephemeral_ports() -> Result<()> {
    let vnet = VirtualNet::new();
    let net = Net::new(Some(vnet));

    let a = net.bind("10.0.0.1:0".parse().unwrap()).await?;
    let b = net.bind("10.0.0.1:0".parse().unwrap()).await?;
    assert_ne!(a.local_addr()?.port(), b.local_addr()?.port());
    assert!(a.local_addr()?.port() >= EPHEMERAL_PORT_START);

    Ok(())
}

#[tokio::test]
async fn test_virtual_net_rejects_duplicate_bind() {
    let vnet = VirtualNet::new();
    let laddr: SocketAddr = "10.0.0.1:1000".parse().unwrap();

    let _a = vnet.bind(laddr).unwrap();
    let result = vnet.bind(laddr);
    assert!(result.is_err(), "second bind of {laddr} should fail");
}

#[tokio::test]
async fn test_virtual_net_black_hole_send_succeeds() -> Result<()> {
    let vnet = VirtualNet::new();
    let net = Net::new(Some(vnet));

    let a = net.bind("10.0.0.1:1000".parse().unwrap()).await?;
    // No listener: the datagram vanishes but the send itself is fine,
    // like UDP to an unreachable address.
    let n = a.send_to(b"lost", "10.9.9.9:9999".parse().unwrap()).await?;
    assert_eq!(n, 4);

    Ok(())
}

#[tokio::test]
async fn test_virtual_conn_close_unbinds() -> Result<()> {
    let vnet = VirtualNet::new();
    let laddr: SocketAddr = "10.0.0.1:1000".parse().unwrap();

    let a = vnet.bind(laddr)?;
    a.close().await?;
    assert_eq!(a.close().await, Err(Error::ErrClosed));

    // The address is free again.
    let _b = vnet.bind(laddr)?;

    Ok(())
}
