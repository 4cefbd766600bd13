//! Bounded-concurrency parallel breadth-first downloader.
//!
//! Each BFS layer is fetched with at most `concurrency` DatumRequests in
//! flight at once. A node is never inserted into the store until its bytes
//! have been checked against the hash that was requested, so a verification
//! failure never poisons the store with unverified content. A single
//! subtree that fails — a timeout, a bad hash, a malformed reply — is
//! abandoned on its own; the rest of the tree is still fetched best-effort.

use crate::correlator::Correlator;
use crate::sender::{send_datum_request, SendError};
use p2p_core::crypto;
use p2p_core::merkle::{Hash, Node};
use p2p_core::store::ContentStore;
use p2p_core::wire::{Message, MessageType};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("fetching {hash:02x?}: {source}")]
    Fetch { hash: [u8; 4], source: SendError },
    #[error("node {hash:02x?} failed hash verification")]
    Verification { hash: [u8; 4] },
    #[error("node {hash:02x?} could not be decoded: {source}")]
    Decode {
        hash: [u8; 4],
        source: p2p_core::merkle::MerkleError,
    },
    #[error("reply body for {hash:02x?} was malformed")]
    MalformedReply { hash: [u8; 4] },
    #[error("download task panicked")]
    TaskPanicked,
}

fn short(hash: &Hash) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Download the tree rooted at `root` from `peer`, verifying every node
/// before it lands in `store`. Best-effort: a subtree whose fetch fails is
/// dropped rather than failing the whole call. Returns once every subtree
/// has either landed or been abandoned, with `store`'s root pointer set.
pub async fn download_tree(
    socket: Arc<UdpSocket>,
    correlator: Arc<Correlator>,
    store: Arc<ContentStore>,
    peer: SocketAddr,
    root: Hash,
    concurrency: usize,
) -> Result<(), DownloadError> {
    if !store.has(&root) {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut frontier = vec![root];

        while !frontier.is_empty() {
            let mut tasks = Vec::with_capacity(frontier.len());
            for hash in frontier.drain(..) {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let socket = socket.clone();
                let correlator = correlator.clone();
                let store = store.clone();
                tasks.push(tokio::spawn(async move {
                    let _permit = permit;
                    fetch_and_store(&socket, &correlator, &store, peer, hash).await
                }));
            }

            // A subtree that fails to fetch is abandoned, not fatal to the
            // rest of the tree: one unreachable node shouldn't sink a
            // download that's otherwise fine.
            let mut next_frontier = Vec::new();
            for task in tasks {
                match task.await {
                    Ok(Ok(node)) => next_frontier.extend(children_of(&node)),
                    Ok(Err(err)) => tracing::warn!(%err, "abandoning subtree"),
                    Err(_) => tracing::warn!("download task panicked, abandoning subtree"),
                }
            }
            frontier = next_frontier;
        }
    }

    store.set_root(root);
    Ok(())
}

fn children_of(node: &Node) -> Vec<Hash> {
    match node {
        Node::Chunk(_) => vec![],
        Node::Directory(entries) => entries.iter().map(|e| e.hash).collect(),
        Node::BigFile(children) | Node::BigDirectory(children) => children.clone(),
    }
}

async fn fetch_and_store(
    socket: &UdpSocket,
    correlator: &Correlator,
    store: &ContentStore,
    peer: SocketAddr,
    hash: Hash,
) -> Result<Node, DownloadError> {
    let request_id = rand::random::<u32>();
    let request = Message::new(request_id, MessageType::DatumRequest, hash.to_vec());

    let body = send_datum_request(socket, correlator, peer, &request, hash)
        .await
        .map_err(|source| DownloadError::Fetch {
            hash: short(&hash),
            source,
        })?;

    // The correlator hands back everything after the 32-byte hash prefix
    // that the Datum reply carried: a one-byte seal flag, then the payload.
    if body.is_empty() {
        return Err(DownloadError::MalformedReply { hash: short(&hash) });
    }
    let (flag, payload) = (body[0], &body[1..]);
    if flag != 0 {
        // Sealed bodies require a negotiated session key the bare downloader
        // doesn't have; callers that need sealed transport use the sender's
        // session-aware path instead.
        return Err(DownloadError::MalformedReply { hash: short(&hash) });
    }

    let data = bytes::Bytes::copy_from_slice(payload);
    store
        .insert_verified(&hash, data.clone())
        .map_err(|_| DownloadError::Verification { hash: short(&hash) })?;

    let actual = crypto::hash(&data);
    debug_assert_eq!(actual, hash);

    Node::decode(&data).map_err(|source| DownloadError::Decode {
        hash: short(&hash),
        source,
    })
}
