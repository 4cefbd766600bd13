//! The single UDP receive loop: decode, verify, dispatch, send replies.
//!
//! One task owns the socket's receive half. Every datagram is decoded once
//! and dispatched through [`handlers::handle_datagram`]; the handler's
//! output datagrams are sent back out on the same socket. There is no
//! per-connection task — session state lives in [`SessionTable`], not in
//! task-local storage, so a single loop is sufficient.

use crate::correlator::Correlator;
use crate::handlers::{self, HandlerContext, Outbound};
use crate::session::SessionTable;
use p2p_core::crypto::Identity;
use p2p_core::store::ContentStore;
use p2p_core::wire::Message;
use std::sync::Arc;
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 65536;

pub struct Transport {
    pub socket: Arc<UdpSocket>,
    pub identity: Arc<Identity>,
    pub peer_name: String,
    pub sessions: Arc<SessionTable>,
    pub correlator: Arc<Correlator>,
    pub store: Arc<ContentStore>,
    pub encryption_enabled: bool,
}

impl Transport {
    pub async fn bind(bind_addr: &str, bind_port: u16) -> std::io::Result<Arc<UdpSocket>> {
        let socket = UdpSocket::bind((bind_addr, bind_port)).await?;
        Ok(Arc::new(socket))
    }

    /// Run the receive loop until `shutdown` fires. Every decode error or
    /// unknown message type is logged and the datagram dropped — it never
    /// stops the loop.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("transport receive loop shutting down");
                        return;
                    }
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => self.handle_one(&buf[..len], from).await,
                        Err(e) => tracing::warn!(error = %e, "recv_from failed"),
                    }
                }
            }
        }
    }

    async fn handle_one(&self, data: &[u8], from: std::net::SocketAddr) {
        let msg = match Message::decode(data) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(%from, error = %e, "dropping undecodable datagram");
                return;
            }
        };

        let ctx = HandlerContext {
            identity: &self.identity,
            peer_name: &self.peer_name,
            sessions: &self.sessions,
            correlator: &self.correlator,
            store: &self.store,
            encryption_enabled: self.encryption_enabled,
        };

        for outbound in handlers::handle_datagram(&ctx, from, msg) {
            let (to, reply) = match outbound {
                Outbound::Reply(m) => (from, m),
                Outbound::To(addr, m) => (addr, m),
            };
            if let Err(e) = self.socket.send_to(&reply.encode(), to).await {
                tracing::warn!(%to, error = %e, "failed to send reply datagram");
            }
        }
    }
}
