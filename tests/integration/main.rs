//! End-to-end tests exercising two in-process peers over real loopback UDP
//! sockets — no mocked transport, no shared process state beyond the OS
//! socket layer.

use anyhow::{Context, Result};
use p2p_core::crypto::Identity;
use p2p_core::merkle;
use p2p_core::store::ContentStore;
use p2p_core::wire::{Message, MessageType};
use p2p_node::correlator::Correlator;
use p2p_node::download;
use p2p_node::reassemble;
use p2p_node::sender::{send_datum_request, send_request_by_id};
use p2p_node::session::SessionTable;
use p2p_node::transport::Transport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

struct Peer {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    identity: Arc<Identity>,
    sessions: Arc<SessionTable>,
    correlator: Arc<Correlator>,
    store: Arc<ContentStore>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl Peer {
    async fn spawn(peer_name: &str) -> Result<Self> {
        let identity = Arc::new(Identity::generate());
        let socket = Transport::bind("127.0.0.1", 0).await?;
        let addr = socket.local_addr()?;
        let sessions = Arc::new(SessionTable::new());
        let correlator = Arc::new(Correlator::new());
        let store = Arc::new(ContentStore::new());

        let transport = Transport {
            socket: socket.clone(),
            identity: identity.clone(),
            peer_name: peer_name.to_string(),
            sessions: sessions.clone(),
            correlator: correlator.clone(),
            store: store.clone(),
            encryption_enabled: false,
        };

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let task = tokio::spawn(async move {
            transport.run(shutdown_rx).await;
        });

        Ok(Peer {
            socket,
            addr,
            identity,
            sessions,
            correlator,
            store,
            shutdown_tx,
            task,
        })
    }

    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.task.abort();
        let _ = self.task.await;
    }

    fn next_id(&self) -> u32 {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }
}

#[tokio::test]
async fn ping_gets_unsigned_ok() -> Result<()> {
    let a = Peer::spawn("alice").await?;
    let b = Peer::spawn("bob").await?;

    let msg = Message::new(a.next_id(), MessageType::Ping, vec![]);
    let reply = send_request_by_id(&a.socket, &a.correlator, b.addr, &msg)
        .await
        .context("ping should receive a reply")?;
    assert!(reply.is_empty());

    a.shutdown().await;
    b.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn hello_establishes_a_session_on_the_receiving_peer() -> Result<()> {
    let a = Peer::spawn("alice").await?;
    let b = Peer::spawn("bob").await?;

    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&a.identity.public_key_bytes());
    body.extend_from_slice(b"alice");

    let mut msg = Message::new(a.next_id(), MessageType::Hello, body);
    msg.signature = Some(a.identity.sign(&msg.signable_bytes()));

    let reply = send_request_by_id(&a.socket, &a.correlator, b.addr, &msg)
        .await
        .context("hello should receive a reply")?;
    assert!(reply.len() >= 4 + 64);

    assert!(b.sessions.has_session(&a.addr.to_string()));

    a.shutdown().await;
    b.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn root_request_reflects_the_peers_loaded_tree() -> Result<()> {
    let a = Peer::spawn("alice").await?;
    let b = Peer::spawn("bob").await?;

    let root = [7u8; 32];
    b.store.set_root(root);

    let msg = Message::new(a.next_id(), MessageType::RootRequest, vec![]);
    let reply = send_request_by_id(&a.socket, &a.correlator, b.addr, &msg)
        .await
        .context("root request should receive a reply")?;
    assert_eq!(reply, root);

    a.shutdown().await;
    b.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn datum_request_for_missing_hash_yields_no_datum() -> Result<()> {
    let a = Peer::spawn("alice").await?;
    let b = Peer::spawn("bob").await?;

    let missing = [9u8; 32];
    let msg = Message::new(a.next_id(), MessageType::DatumRequest, missing.to_vec());
    let result = send_datum_request(&a.socket, &a.correlator, b.addr, &msg, missing).await;

    // NoDatum closes the by-hash waiter rather than delivering a body.
    assert!(result.is_err());

    a.shutdown().await;
    b.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn full_tree_download_and_reassembly_round_trip() -> Result<()> {
    let source_dir = std::env::temp_dir().join(format!(
        "p2p-integration-src-{}",
        std::process::id()
    ));
    let dest_dir = std::env::temp_dir().join(format!(
        "p2p-integration-dst-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&source_dir);
    let _ = std::fs::remove_dir_all(&dest_dir);
    std::fs::create_dir_all(&source_dir)?;
    std::fs::write(source_dir.join("a.txt"), b"hello from alice\n")?;
    std::fs::write(source_dir.join("b.txt"), vec![0x5Au8; 4096])?;
    std::fs::create_dir_all(source_dir.join("sub"))?;
    std::fs::write(source_dir.join("sub").join("c.txt"), b"nested\n")?;

    let built = merkle::build_from_path(&source_dir)?;

    let seeder = Peer::spawn("seeder").await?;
    for (h, node) in &built.nodes {
        seeder.store.insert(*h, bytes::Bytes::from(node.encode()));
    }
    seeder.store.set_root(built.root);

    let leecher = Peer::spawn("leecher").await?;

    download::download_tree(
        leecher.socket.clone(),
        leecher.correlator.clone(),
        leecher.store.clone(),
        seeder.addr,
        built.root,
        8,
    )
    .await
    .context("download should succeed")?;

    assert_eq!(leecher.store.len(), built.nodes.len());

    reassemble::rebuild_file_system(&leecher.store, &built.root, &dest_dir)
        .context("reassembly should succeed")?;

    assert_eq!(
        std::fs::read(dest_dir.join("a.txt"))?,
        std::fs::read(source_dir.join("a.txt"))?
    );
    assert_eq!(
        std::fs::read(dest_dir.join("b.txt"))?,
        std::fs::read(source_dir.join("b.txt"))?
    );
    assert_eq!(
        std::fs::read(dest_dir.join("sub").join("c.txt"))?,
        std::fs::read(source_dir.join("sub").join("c.txt"))?
    );

    let _ = std::fs::remove_dir_all(&source_dir);
    let _ = std::fs::remove_dir_all(&dest_dir);

    seeder.shutdown().await;
    leecher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn nat_traversal_request_triggers_a_punch_ping_at_the_target() -> Result<()> {
    let origin = Peer::spawn("origin").await?;
    let relay = Peer::spawn("relay").await?;
    let target = Peer::spawn("target").await?;

    let endpoint = p2p_core::wire::Endpoint::from_socket_addr(target.addr);
    let mut msg = Message::new(
        origin.next_id(),
        MessageType::NatTraversalRequest,
        endpoint.encode(),
    );
    msg.signature = Some(origin.identity.sign(&msg.signable_bytes()));

    origin.socket.send_to(&msg.encode(), relay.addr).await?;

    // Fire-and-forget: give the relay a moment to forward, then confirm the
    // target's socket actually received something (the unsigned punch Ping).
    tokio::time::sleep(Duration::from_millis(150)).await;

    let mut buf = [0u8; 1500];
    let recv = tokio::time::timeout(Duration::from_millis(200), target.socket.recv_from(&mut buf)).await;
    assert!(recv.is_ok(), "target should have received a punch datagram");

    origin.shutdown().await;
    relay.shutdown().await;
    target.shutdown().await;
    Ok(())
}
