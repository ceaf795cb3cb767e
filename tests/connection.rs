use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use toredis::{Client, CloseReason, Error, Frame};

/// A one-connection mock server. Bytes sent on the returned sender are written to the client;
/// bytes read from the client come out of the returned receiver. Dropping the sender closes
/// the connection.
async fn create_tcp_server() -> Result<
    (SocketAddr, UnboundedSender<Vec<u8>>, UnboundedReceiver<Vec<u8>>),
    std::io::Error,
> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let local_addr = listener.local_addr()?;

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (request_tx, request_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            let (mut read_half, mut write_half) = socket.into_split();

            tokio::spawn(async move {
                let mut buf = vec![0; 4096];
                while let Ok(n) = read_half.read(&mut buf).await {
                    if n == 0 || request_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            });

            while let Some(data) = reply_rx.recv().await {
                if write_half.write_all(&data).await.is_err() {
                    break;
                }
            }
        }
    });

    Ok((local_addr, reply_tx, request_rx))
}

/// Collects request bytes until `expected.len()` bytes have arrived.
async fn expect_request(requests: &mut UnboundedReceiver<Vec<u8>>, expected: &[u8]) {
    let mut received = Vec::new();
    while received.len() < expected.len() {
        received.extend(requests.recv().await.unwrap());
    }

    assert_eq!(received, expected);
}

async fn connected(addr: SocketAddr) -> Client {
    let mut client = Client::new(Handle::current());
    client
        .connect(&addr.ip().to_string(), addr.port())
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn test_get_over_tcp() {
    let (addr, replies, mut requests) = create_tcp_server().await.unwrap();
    let client = connected(addr).await;

    let reply = client.execute("GET", ["mykey"]);
    expect_request(&mut requests, b"*2\r\n$3\r\nGET\r\n$5\r\nmykey\r\n").await;
    replies.send(b"$7\r\nmyvalue\r\n".to_vec()).unwrap();

    assert_eq!(reply.await.unwrap(), Frame::Bulk(Bytes::from("myvalue")));
}

#[tokio::test]
async fn test_reply_split_across_writes() {
    let (addr, replies, mut requests) = create_tcp_server().await.unwrap();
    let client = connected(addr).await;

    let reply = client.execute("HGETALL", ["user"]);
    expect_request(&mut requests, b"*2\r\n$7\r\nHGETALL\r\n$4\r\nuser\r\n").await;

    let bytes = b"*4\r\n$4\r\nname\r\n$5\r\nalice\r\n$3\r\nage\r\n:30\r\n";
    for chunk in bytes.chunks(3) {
        replies.send(chunk.to_vec()).unwrap();
    }

    let expected = Frame::Array(vec![
        Frame::Bulk(Bytes::from("name")),
        Frame::Bulk(Bytes::from("alice")),
        Frame::Bulk(Bytes::from("age")),
        Frame::Integer(30),
    ]);
    assert_eq!(reply.await.unwrap(), expected);
}

#[tokio::test]
async fn test_large_bulk_reply() {
    let (addr, replies, mut requests) = create_tcp_server().await.unwrap();
    let client = connected(addr).await;

    let reply = client.execute("GET", ["big"]);
    expect_request(&mut requests, b"*2\r\n$3\r\nGET\r\n$3\r\nbig\r\n").await;

    let payload = vec![b'x'; 100_000];
    let mut bytes = format!("${}\r\n", payload.len()).into_bytes();
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(b"\r\n");
    replies.send(bytes).unwrap();

    assert_eq!(reply.await.unwrap(), Frame::Bulk(Bytes::from(payload)));
}

#[tokio::test]
async fn test_multi_word_command_over_tcp() {
    let (addr, replies, mut requests) = create_tcp_server().await.unwrap();
    let client = connected(addr).await;

    let reply = client.execute("config get", ["maxmemory"]);
    expect_request(
        &mut requests,
        b"*3\r\n$6\r\nCONFIG\r\n$3\r\nGET\r\n$9\r\nmaxmemory\r\n",
    )
    .await;
    replies
        .send(b"*2\r\n$9\r\nmaxmemory\r\n$1\r\n0\r\n".to_vec())
        .unwrap();

    let frame = reply.await.unwrap();
    assert_eq!(frame.to_string(), r#"["maxmemory", "0"]"#);
}

#[tokio::test]
async fn test_server_closes_connection() {
    let (addr, replies, _requests) = create_tcp_server().await.unwrap();
    let client = connected(addr).await;

    drop(replies);

    assert_eq!(client.closed().await, Some(CloseReason::PeerClosed));
    assert!(matches!(client.ping((), |_| {}), Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut client = Client::new(Handle::current());
    let result = client.connect("127.0.0.1", addr.port()).await;

    assert!(matches!(result, Err(Error::Io(_))));
    assert!(client.state().is_none());
}
