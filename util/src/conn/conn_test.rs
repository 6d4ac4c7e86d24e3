use super::*;

#[tokio::test]
async fn test_udp_conn_round_trip() -> Result<()> {
    let a = UdpConn::bind("127.0.0.1:0".parse().unwrap()).await?;
    let b = UdpConn::bind("127.0.0.1:0".parse().unwrap()).await?;

    let baddr = b.local_addr()?;
    a.send_to(b"hello", baddr).await?;

    let mut buf = [0u8; 64];
    let (n, from) = b.recv_from(&mut buf).await?;
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(from, a.local_addr()?);

    Ok(())
}

#[tokio::test]
async fn test_udp_conn_connected_send() -> Result<()> {
    let a = UdpConn::bind("127.0.0.1:0".parse().unwrap()).await?;
    let b = UdpConn::bind("127.0.0.1:0".parse().unwrap()).await?;

    a.connect(b.local_addr()?).await?;
    assert_eq!(a.remote_addr(), Some(b.local_addr()?));

    a.send(b"ping").await?;
    let mut buf = [0u8; 64];
    let (n, _) = b.recv_from(&mut buf).await?;
    assert_eq!(&buf[..n], b"ping");

    Ok(())
}
