//! Periodic maintenance: an unconditional Hello to the directory server to
//! keep its NAT mapping alive, then the session sweep (keep-alive pings for
//! idle-but-not-stale sessions, eviction for sessions past the expiry
//! window). Grounded on the original's `Start__maintenance__loop`, which
//! pings its central server every tick before ever looking at peer sessions.

use crate::handlers::{hello_body, sign};
use crate::session::SessionTable;
use p2p_core::crypto::Identity;
use p2p_core::wire::{extension, Message, MessageType};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

pub struct MaintenanceConfig {
    pub tick: Duration,
    pub keepalive_after: Duration,
    pub expire_after: Duration,
    /// UDP address of the directory server, if it participates in the
    /// protocol. `None` skips the per-tick directory Hello entirely.
    pub directory_addr: Option<SocketAddr>,
    pub identity: Arc<Identity>,
    pub peer_name: String,
    pub encryption_enabled: bool,
}

/// Run the maintenance loop until `shutdown` fires. Each tick: ping the
/// directory server unconditionally, then evict sessions idle past
/// `expire_after` and ping every remaining session idle past
/// `keepalive_after`.
pub async fn run(
    socket: Arc<UdpSocket>,
    sessions: Arc<SessionTable>,
    config: MaintenanceConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.tick);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = interval.tick() => {
                ping_directory_server(&socket, &config).await;
                sweep_once(&socket, &sessions, &config).await;
            }
        }
    }
}

/// Send a signed Hello to the directory server, independent of any peer
/// session — this is the keep-alive that holds the server's NAT mapping
/// for us open, not a per-session concern.
async fn ping_directory_server(socket: &UdpSocket, config: &MaintenanceConfig) {
    let Some(addr) = config.directory_addr else {
        return;
    };

    let mut extensions = extension::NAT;
    if config.encryption_enabled {
        extensions |= extension::ENCRYPTION;
    }
    let hello = Message::new(
        rand::random(),
        MessageType::Hello,
        hello_body(extensions, &config.identity.public_key_bytes(), &config.peer_name),
    );
    let hello = sign(&config.identity, hello);

    if let Err(e) = socket.send_to(&hello.encode(), addr).await {
        tracing::debug!(%addr, error = %e, "directory server keep-alive failed");
    } else {
        tracing::debug!(%addr, "sent keep-alive Hello to directory server");
    }
}

async fn sweep_once(socket: &UdpSocket, sessions: &SessionTable, config: &MaintenanceConfig) {
    let expired = sessions.remove_idle_since(config.expire_after);
    for addr in &expired {
        tracing::debug!(%addr, "session expired after idle window");
    }

    for addr in sessions.idle_since(config.keepalive_after) {
        let Ok(target) = addr.parse::<std::net::SocketAddr>() else { continue };
        let ping = Message::new(0, MessageType::Ping, vec![]);
        if let Err(e) = socket.send_to(&ping.encode(), target).await {
            tracing::debug!(%addr, error = %e, "keep-alive ping failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(keepalive_after: Duration, expire_after: Duration) -> MaintenanceConfig {
        MaintenanceConfig {
            tick: Duration::from_secs(30),
            keepalive_after,
            expire_after,
            directory_addr: None,
            identity: Arc::new(Identity::generate()),
            peer_name: "tester".to_string(),
            encryption_enabled: false,
        }
    }

    #[tokio::test]
    async fn sweep_evicts_sessions_past_expiry_before_pinging() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let sessions = Arc::new(SessionTable::new());
        sessions.touch("127.0.0.1:1");

        let config = test_config(Duration::from_secs(0), Duration::from_secs(0));

        sweep_once(&socket, &sessions, &config).await;
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn sweep_keeps_sessions_within_expiry_and_pings_them() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let sessions = Arc::new(SessionTable::new());
        sessions.touch("127.0.0.1:2");

        let config = test_config(Duration::from_secs(0), Duration::from_secs(600));

        sweep_once(&socket, &sessions, &config).await;
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn directory_ping_is_a_no_op_without_a_configured_address() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = test_config(Duration::from_secs(0), Duration::from_secs(600));
        // No panic, no send attempted: directory_addr is None.
        ping_directory_server(&socket, &config).await;
    }

    #[tokio::test]
    async fn directory_ping_sends_a_signed_hello_regardless_of_sessions() {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut config = test_config(Duration::from_secs(0), Duration::from_secs(600));
        config.directory_addr = Some(server_addr);

        ping_directory_server(&client, &config).await;

        let mut buf = [0u8; 512];
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        let received = Message::decode(&buf[..len]).unwrap();
        assert_eq!(received.ty, MessageType::Hello);
        assert!(received.signature.is_some());
    }
}
