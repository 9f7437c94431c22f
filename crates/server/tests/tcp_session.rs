//! A real client over loopback TCP: authenticate, receive the view, disconnect.

use std::time::Duration;

use ironworks_net::{
    compute_schema_hash, encode_client_message, AuthRequest, ClientMessage, FrameDecoder,
    ServerMessage,
};
use ironworks_server::{Server, ServerConfig};
use ironworks_world::{ChunkPersistence, MemoryStore, World};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;

async fn read_messages(stream: &mut TcpStream, decoder: &mut FrameDecoder, want: usize) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    let mut buf = [0u8; 4096];
    while messages.len() < want {
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("server answered in time")
            .expect("read");
        assert!(n > 0, "server closed early after {} messages", messages.len());
        decoder.extend(&buf[..n]);
        while let Some(message) = decoder.next_server_message().expect("valid frame") {
            messages.push(message);
        }
    }
    messages
}

#[tokio::test]
async fn client_authenticates_and_receives_its_view() {
    let config = ServerConfig {
        bind: "127.0.0.1:0".into(),
        view_distance: 1,
        ..ServerConfig::default()
    };
    let store = MemoryStore::new();
    let world = World::new(5, 64, Box::new(store.clone()));
    let server = Server::bind_with_world(config, world).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(server.run(async {
        let _ = stop_rx.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let frame = encode_client_message(&ClientMessage::Auth(AuthRequest {
        name: "ada".into(),
        schema_hash: compute_schema_hash(),
    }))
    .unwrap();
    // Split the frame across two writes to exercise reassembly.
    stream.write_all(&frame[..3]).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(&frame[3..]).await.unwrap();

    let mut decoder = FrameDecoder::new();
    let messages = read_messages(&mut stream, &mut decoder, 10).await;
    match &messages[0] {
        ServerMessage::AuthResponse(resp) => assert!(resp.accepted),
        other => panic!("expected auth response, got {other:?}"),
    }
    let snapshots = messages
        .iter()
        .filter(|m| matches!(m, ServerMessage::ChunkData(_)))
        .count();
    assert_eq!(snapshots, 9);

    drop(stream);
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), running)
        .await
        .expect("server stopped in time")
        .unwrap()
        .unwrap();

    let saved = store.load_player("ada").unwrap().expect("player record saved");
    assert_eq!((saved.x, saved.y), (0.0, 0.0));
}

#[tokio::test]
async fn garbage_drops_the_connection() {
    let config = ServerConfig {
        bind: "127.0.0.1:0".into(),
        ..ServerConfig::default()
    };
    let world = World::new(5, 64, Box::new(MemoryStore::new()));
    let server = Server::bind_with_world(config, world).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(server.run(async {
        let _ = stop_rx.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // Length 2, unknown tag 0xEE.
    stream.write_all(&[0x00, 0x02, 0xEE, 0x00]).await.unwrap();

    let mut buf = [0u8; 64];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("server closed in time")
        .unwrap_or(0);
    assert_eq!(n, 0);

    stop_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), running)
        .await
        .expect("server stopped in time")
        .unwrap()
        .unwrap();
}
