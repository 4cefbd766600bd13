//! The send-with-timeout core used by every outbound request.
//!
//! Three attempts, doubling backoff starting at 2 seconds (2s, 4s, 8s),
//! cumulative wait bounded at 14 seconds. A reply delivered through the
//! correlator at any point short-circuits the remaining attempts.

use crate::correlator::Correlator;
use p2p_core::wire::Message;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

const BACKOFFS: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no reply after {0} attempts")]
    NoReply(usize),
    #[error("peer closed the request (no matching content)")]
    Closed,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Send `message` to `addr` repeatedly until a reply arrives on `rx` or the
/// attempt budget is exhausted. `rx` must already be registered with the
/// correlator under the key the reply will arrive on.
pub async fn send_with_timeout(
    socket: &UdpSocket,
    addr: SocketAddr,
    message: &Message,
    mut rx: oneshot::Receiver<Vec<u8>>,
) -> Result<Vec<u8>, SendError> {
    let bytes = message.encode();
    for (attempt, backoff) in BACKOFFS.iter().enumerate() {
        socket.send_to(&bytes, addr).await?;
        match tokio::time::timeout(*backoff, &mut rx).await {
            Ok(Ok(body)) => return Ok(body),
            Ok(Err(_)) => return Err(SendError::Closed),
            Err(_elapsed) => {
                tracing::debug!(attempt, %addr, "no reply within backoff, retrying");
            }
        }
    }
    Err(SendError::NoReply(BACKOFFS.len()))
}

/// Register a wait on `correlator` and drive [`send_with_timeout`] for a
/// request keyed by message id (Ping, Hello, RootRequest, KeyExchange).
pub async fn send_request_by_id(
    socket: &UdpSocket,
    correlator: &Correlator,
    addr: SocketAddr,
    message: &Message,
) -> Result<Vec<u8>, SendError> {
    let rx = correlator.register_by_id(message.id);
    let result = send_with_timeout(socket, addr, message, rx).await;
    if result.is_err() {
        correlator.remove_by_id(message.id);
    }
    result
}

/// Register a wait on `correlator` and drive [`send_with_timeout`] for a
/// DatumRequest keyed by the requested content hash.
pub async fn send_datum_request(
    socket: &UdpSocket,
    correlator: &Correlator,
    addr: SocketAddr,
    message: &Message,
    requested_hash: [u8; 32],
) -> Result<Vec<u8>, SendError> {
    let rx = correlator.register_by_hash(requested_hash);
    let result = send_with_timeout(socket, addr, message, rx).await;
    if result.is_err() {
        correlator.remove_by_hash(requested_hash);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2p_core::wire::MessageType;

    #[tokio::test(start_paused = true)]
    async fn immediate_reply_short_circuits_retries() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        tx.send(vec![9, 9, 9]).unwrap();

        let msg = Message::new(1, MessageType::Ping, vec![]);
        let result = send_with_timeout(&socket, echo_addr, &msg, rx).await;
        assert_eq!(result.unwrap(), vec![9, 9, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_all_attempts_returns_no_reply() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (_tx, rx) = oneshot::channel();

        let msg = Message::new(2, MessageType::Ping, vec![]);
        let result = send_with_timeout(&socket, target, &msg, rx).await;
        assert!(matches!(result, Err(SendError::NoReply(3))));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_reports_closed_not_timeout() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (tx, rx) = oneshot::channel::<Vec<u8>>();
        drop(tx);

        let msg = Message::new(3, MessageType::DatumRequest, vec![]);
        let result = send_with_timeout(&socket, target, &msg, rx).await;
        assert!(matches!(result, Err(SendError::Closed)));
    }
}
