//! p2p-cli — a thin operator shell around the protocol core.
//!
//! Each invocation opens its own ephemeral socket and in-memory store; it
//! never talks to a running p2p-node process. That keeps the tool simple at
//! the cost of being unable to inspect a live daemon's session table — see
//! DESIGN.md for the tradeoff.

use anyhow::{bail, Context, Result};
use p2p_core::crypto::Identity;
use p2p_core::merkle;
use p2p_core::store::ContentStore;
use p2p_core::wire::{Message, MessageType};
use p2p_directory::DirectoryClient;
use p2p_node::correlator::Correlator;
use p2p_node::download;
use p2p_node::reassemble;
use p2p_node::sender::send_request_by_id;
use p2p_node::session::SessionTable;
use p2p_node::transport::Transport;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

fn print_usage() {
    println!("Usage: p2p-cli [--key <path>] [--name <peer-name>] <command>");
    println!();
    println!("Directory");
    println!("  register <directory-url> <name>     Publish this identity's key under <name>");
    println!("  peers <directory-url>                List registered peer names");
    println!("  whois <directory-url> <name>         Show a peer's public key and addresses");
    println!();
    println!("Direct protocol");
    println!("  ping <addr>                          Send Ping, wait for Ok");
    println!("  hello <addr>                         Send Hello, wait for HelloReply");
    println!("  root <addr>                          Send RootRequest, print the remote root hash");
    println!();
    println!("Content");
    println!("  tree <path>                          Build a Merkle tree locally, print the root hash");
    println!("  download <addr> <hash-hex> <dest>    Download and reassemble a tree from a peer");
    println!();
    println!("Options:");
    println!("  --key <path>     Identity PEM file (generated if missing; default ./identity.pem)");
    println!("  --name <name>    Peer name sent in Hello (default \"p2p-cli\")");
}

struct Options {
    key_path: PathBuf,
    peer_name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let (options, command) = parse_options(&raw_args)?;

    match command.as_slice() {
        [] | ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        ["register", directory_url, name] => cmd_register(&options, directory_url, name).await,
        ["peers", directory_url] => cmd_peers(directory_url).await,
        ["whois", directory_url, name] => cmd_whois(directory_url, name).await,
        ["ping", addr] => cmd_ping(&options, addr).await,
        ["hello", addr] => cmd_hello(&options, addr).await,
        ["root", addr] => cmd_root(&options, addr).await,
        ["tree", path] => cmd_tree(path),
        ["download", addr, hash_hex, dest] => cmd_download(&options, addr, hash_hex, dest).await,
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn parse_options(args: &[String]) -> Result<(Options, Vec<&str>)> {
    let mut key_path = PathBuf::from("./identity.pem");
    let mut peer_name = "p2p-cli".to_string();
    let mut remaining = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--key" => {
                i += 1;
                key_path = PathBuf::from(args.get(i).context("--key requires a path")?);
            }
            "--name" => {
                i += 1;
                peer_name = args.get(i).context("--name requires a value")?.clone();
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    Ok((Options { key_path, peer_name }, remaining))
}

// ── Directory commands ──────────────────────────────────────────────────────

async fn cmd_register(options: &Options, directory_url: &str, name: &str) -> Result<()> {
    let identity = p2p_core::keyfile::load_or_generate(&options.key_path)?;
    let client = DirectoryClient::new(directory_url);
    client.register(name, &identity.public_key_bytes()).await?;
    println!("registered {name} with directory {directory_url}");
    Ok(())
}

async fn cmd_peers(directory_url: &str) -> Result<()> {
    let client = DirectoryClient::new(directory_url);
    for name in client.list_peers().await? {
        println!("{name}");
    }
    Ok(())
}

async fn cmd_whois(directory_url: &str, name: &str) -> Result<()> {
    let client = DirectoryClient::new(directory_url);
    let key = client.lookup_key(name).await?;
    println!("public key: {}", hex::encode(key));
    for addr in client.lookup_addresses(name).await? {
        println!("address: {addr}");
    }
    Ok(())
}

// ── Direct protocol commands ─────────────────────────────────────────────────

/// Bind an ephemeral socket and start its receive loop, returning the
/// handles needed to issue requests and a closure to shut it down cleanly.
async fn spawn_session(
    identity: Arc<Identity>,
    peer_name: String,
) -> Result<(Arc<tokio::net::UdpSocket>, Arc<Correlator>, Arc<ContentStore>, impl FnOnce())> {
    let socket = Transport::bind("0.0.0.0", 0).await?;
    let sessions = Arc::new(SessionTable::new());
    let correlator = Arc::new(Correlator::new());
    let store = Arc::new(ContentStore::new());

    let transport = Transport {
        socket: socket.clone(),
        identity,
        peer_name,
        sessions,
        correlator: correlator.clone(),
        store: store.clone(),
        encryption_enabled: false,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move {
        transport.run(shutdown_rx).await;
    });

    let stop = move || {
        let _ = shutdown_tx.send(true);
        handle.abort();
    };

    Ok((socket, correlator, store, stop))
}

async fn cmd_ping(options: &Options, addr: &str) -> Result<()> {
    let identity = Arc::new(p2p_core::keyfile::load_or_generate(&options.key_path)?);
    let target: SocketAddr = addr.parse().context("invalid address")?;
    let (socket, correlator, _store, stop) = spawn_session(identity, options.peer_name.clone()).await?;

    let msg = Message::new(rand_id(), MessageType::Ping, vec![]);
    let result = send_request_by_id(&socket, &correlator, target, &msg).await;
    stop();

    match result {
        Ok(_) => println!("ok"),
        Err(e) => bail!("no reply: {e}"),
    }
    Ok(())
}

async fn cmd_hello(options: &Options, addr: &str) -> Result<()> {
    let identity = Arc::new(p2p_core::keyfile::load_or_generate(&options.key_path)?);
    let target: SocketAddr = addr.parse().context("invalid address")?;
    let (socket, correlator, _store, stop) = spawn_session(identity.clone(), options.peer_name.clone()).await?;

    let mut body = Vec::with_capacity(4 + 64 + options.peer_name.len());
    body.extend_from_slice(&p2p_core::wire::extension::NAT.to_be_bytes());
    body.extend_from_slice(&identity.public_key_bytes());
    body.extend_from_slice(options.peer_name.as_bytes());

    let mut msg = Message::new(rand_id(), MessageType::Hello, body);
    msg.signature = Some(identity.sign(&msg.signable_bytes()));

    let result = send_request_by_id(&socket, &correlator, target, &msg).await;
    stop();

    match result {
        Ok(reply_body) => println!("hello reply ({} bytes)", reply_body.len()),
        Err(e) => bail!("no reply: {e}"),
    }
    Ok(())
}

async fn cmd_root(options: &Options, addr: &str) -> Result<()> {
    let identity = Arc::new(p2p_core::keyfile::load_or_generate(&options.key_path)?);
    let target: SocketAddr = addr.parse().context("invalid address")?;
    let (socket, correlator, _store, stop) = spawn_session(identity, options.peer_name.clone()).await?;

    let msg = Message::new(rand_id(), MessageType::RootRequest, vec![]);
    let result = send_request_by_id(&socket, &correlator, target, &msg).await;
    stop();

    match result {
        Ok(body) if body.len() == 32 => println!("root: {}", hex::encode(body)),
        Ok(_) => println!("peer has no root loaded"),
        Err(e) => bail!("no reply: {e}"),
    }
    Ok(())
}

fn rand_id() -> u32 {
    // A local request id only needs to be unique among this process's own
    // in-flight requests, not globally unpredictable.
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
}

// ── Content commands ──────────────────────────────────────────────────────────

fn cmd_tree(path: &str) -> Result<()> {
    let tree = merkle::build_from_path(std::path::Path::new(path))?;
    println!("root: {}", hex::encode(tree.root));
    println!("nodes: {}", tree.nodes.len());
    Ok(())
}

async fn cmd_download(options: &Options, addr: &str, hash_hex: &str, dest: &str) -> Result<()> {
    let identity = Arc::new(p2p_core::keyfile::load_or_generate(&options.key_path)?);
    let target: SocketAddr = addr.parse().context("invalid address")?;
    let hash_bytes = hex::decode(hash_hex).context("hash must be hex")?;
    if hash_bytes.len() != 32 {
        bail!("hash must be 32 bytes (64 hex characters)");
    }
    let mut root = [0u8; 32];
    root.copy_from_slice(&hash_bytes);

    let (socket, correlator, store, stop) = spawn_session(identity, options.peer_name.clone()).await?;
    let download_result =
        download::download_tree(socket, correlator, store.clone(), target, root, 32).await;
    stop();
    download_result.context("download failed")?;

    reassemble::rebuild_file_system(&store, &root, std::path::Path::new(dest))
        .context("reassembling downloaded tree")?;
    println!("downloaded {hash_hex} to {dest}");
    Ok(())
}
