//! The content-addressed Merkle model: typed nodes, their byte encoding,
//! and the builder that turns a local filesystem path into a tree.
//!
//! A node's hash is always SHA-256 of its full encoded bytes, including the
//! one-byte type prefix. The forest is a DAG: identical sub-content always
//! encodes to identical bytes and therefore collapses to one store entry.

use crate::crypto::hash;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const MAX_CHUNK_PAYLOAD: usize = 1024;
pub const MAX_DIRECTORY_ENTRIES: usize = 16;
pub const MAX_FANOUT: usize = 32;
pub const NAME_LEN: usize = 32;

pub type Hash = [u8; 32];

const TYPE_CHUNK: u8 = 0x00;
const TYPE_DIRECTORY: u8 = 0x01;
const TYPE_BIG_FILE: u8 = 0x02;
const TYPE_BIG_DIRECTORY: u8 = 0x03;

/// A single entry in a Directory node: a name right-padded with zero bytes
/// to [`NAME_LEN`], and the hash of the named child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; NAME_LEN],
    pub hash: Hash,
}

impl DirEntry {
    pub fn new(name: &str, hash: Hash) -> Result<Self, MerkleError> {
        let bytes = name.as_bytes();
        if bytes.len() > NAME_LEN {
            return Err(MerkleError::NameTooLong(name.to_string()));
        }
        let mut padded = [0u8; NAME_LEN];
        padded[..bytes.len()].copy_from_slice(bytes);
        Ok(DirEntry { name: padded, hash })
    }

    pub fn name_str(&self) -> String {
        let trimmed = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&self.name[..trimmed]).into_owned()
    }
}

/// A content-addressed block. The four variants are distinguished on the
/// wire by a one-byte type prefix, which is itself part of the hashed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Leaf of a file: up to [`MAX_CHUNK_PAYLOAD`] raw payload bytes.
    Chunk(Vec<u8>),
    /// Leaf of a directory: up to [`MAX_DIRECTORY_ENTRIES`] (name, hash) pairs.
    Directory(Vec<DirEntry>),
    /// Internal node aggregating file chunks or lower BigFile nodes.
    BigFile(Vec<Hash>),
    /// Internal node aggregating Directory leaves or lower BigDirectory nodes.
    BigDirectory(Vec<Hash>),
}

impl Node {
    pub fn type_byte(&self) -> u8 {
        match self {
            Node::Chunk(_) => TYPE_CHUNK,
            Node::Directory(_) => TYPE_DIRECTORY,
            Node::BigFile(_) => TYPE_BIG_FILE,
            Node::BigDirectory(_) => TYPE_BIG_DIRECTORY,
        }
    }

    /// Encode the node to its full byte layout, prefix included. This is
    /// exactly the buffer whose SHA-256 is the node's hash.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.type_byte()];
        match self {
            Node::Chunk(payload) => buf.extend_from_slice(payload),
            Node::Directory(entries) => {
                for entry in entries {
                    buf.extend_from_slice(&entry.name);
                    buf.extend_from_slice(&entry.hash);
                }
            }
            Node::BigFile(children) | Node::BigDirectory(children) => {
                for child in children {
                    buf.extend_from_slice(child);
                }
            }
        }
        buf
    }

    pub fn hash(&self) -> Hash {
        hash(&self.encode())
    }

    /// Decode a node from its full encoded bytes (as received in a Datum
    /// body, after the requested hash has already been stripped off).
    pub fn decode(data: &[u8]) -> Result<Self, MerkleError> {
        if data.is_empty() {
            return Err(MerkleError::EmptyEncoding);
        }
        let (ty, rest) = (data[0], &data[1..]);
        match ty {
            TYPE_CHUNK => {
                if rest.len() > MAX_CHUNK_PAYLOAD {
                    return Err(MerkleError::ChunkTooLarge(rest.len()));
                }
                Ok(Node::Chunk(rest.to_vec()))
            }
            TYPE_DIRECTORY => {
                if rest.len() % 64 != 0 {
                    return Err(MerkleError::MalformedDirectory);
                }
                let count = rest.len() / 64;
                if count > MAX_DIRECTORY_ENTRIES {
                    return Err(MerkleError::TooManyEntries(count));
                }
                let mut entries = Vec::with_capacity(count);
                for i in 0..count {
                    let start = i * 64;
                    let mut name = [0u8; NAME_LEN];
                    name.copy_from_slice(&rest[start..start + 32]);
                    let mut child = [0u8; 32];
                    child.copy_from_slice(&rest[start + 32..start + 64]);
                    entries.push(DirEntry { name, hash: child });
                }
                Ok(Node::Directory(entries))
            }
            TYPE_BIG_FILE | TYPE_BIG_DIRECTORY => {
                if rest.len() % 32 != 0 {
                    return Err(MerkleError::MalformedInternalNode);
                }
                let count = rest.len() / 32;
                if count > MAX_FANOUT {
                    return Err(MerkleError::FanoutTooLarge(count));
                }
                let mut children = Vec::with_capacity(count);
                for i in 0..count {
                    let start = i * 32;
                    let mut child = [0u8; 32];
                    child.copy_from_slice(&rest[start..start + 32]);
                    children.push(child);
                }
                Ok(if ty == TYPE_BIG_FILE {
                    Node::BigFile(children)
                } else {
                    Node::BigDirectory(children)
                })
            }
            other => Err(MerkleError::UnknownType(other)),
        }
    }
}

/// The output of a build: every node produced, keyed by hash, plus the root.
pub struct BuiltTree {
    pub nodes: BTreeMap<Hash, Node>,
    pub root: Hash,
}

/// Build the Merkle tree rooted at `path` (a file or a directory, recursed
/// into). Children within a directory are visited in the order the local
/// filesystem scan returns them; the protocol does not mandate sorting.
pub fn build_from_path(path: &Path) -> Result<BuiltTree, MerkleError> {
    let mut nodes = BTreeMap::new();
    let root = build_node(path, &mut nodes)?;
    Ok(BuiltTree { nodes, root })
}

fn build_node(path: &Path, nodes: &mut BTreeMap<Hash, Node>) -> Result<Hash, MerkleError> {
    let metadata = fs::metadata(path)?;
    if metadata.is_dir() {
        build_directory(path, nodes)
    } else {
        build_file(path, nodes)
    }
}

fn insert(nodes: &mut BTreeMap<Hash, Node>, node: Node) -> Hash {
    let h = node.hash();
    nodes.insert(h, node);
    h
}

fn build_file(path: &Path, nodes: &mut BTreeMap<Hash, Node>) -> Result<Hash, MerkleError> {
    use std::io::Read;

    let mut file = fs::File::open(path)?;
    let mut chunk_hashes = Vec::new();
    let mut buf = vec![0u8; MAX_CHUNK_PAYLOAD];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let h = insert(nodes, Node::Chunk(buf[..n].to_vec()));
        chunk_hashes.push(h);
    }

    if chunk_hashes.is_empty() {
        return Ok(insert(nodes, Node::Chunk(Vec::new())));
    }

    Ok(build_upper_layers(chunk_hashes, nodes, Node::BigFile as fn(Vec<Hash>) -> Node))
}

fn build_directory(path: &Path, nodes: &mut BTreeMap<Hash, Node>) -> Result<Hash, MerkleError> {
    let mut entries = Vec::new();
    let mut read_dir: Vec<_> = fs::read_dir(path)?.collect::<std::io::Result<_>>()?;
    read_dir.sort_by_key(|e| e.path());

    for entry in read_dir {
        let child_path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let child_root = build_node(&child_path, nodes)?;
        entries.push(DirEntry::new(&name, child_root)?);
    }

    let mut leaf_hashes = Vec::new();
    if entries.is_empty() {
        leaf_hashes.push(insert(nodes, Node::Directory(Vec::new())));
    } else {
        for group in entries.chunks(MAX_DIRECTORY_ENTRIES) {
            leaf_hashes.push(insert(nodes, Node::Directory(group.to_vec())));
        }
    }

    Ok(build_upper_layers(
        leaf_hashes,
        nodes,
        Node::BigDirectory as fn(Vec<Hash>) -> Node,
    ))
}

/// Fold a list of child hashes into internal layers of fan-out ≤ 32 until a
/// single hash remains. If the input already has exactly one hash, no
/// internal node is created and that hash is returned directly — a
/// single-chunk file or single-group directory needs no Big* wrapper.
fn build_upper_layers(
    mut level: Vec<Hash>,
    nodes: &mut BTreeMap<Hash, Node>,
    make_node: fn(Vec<Hash>) -> Node,
) -> Hash {
    while level.len() > 1 {
        let mut next = Vec::new();
        for group in level.chunks(MAX_FANOUT) {
            next.push(insert(nodes, make_node(group.to_vec())));
        }
        level = next;
    }
    level[0]
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum MerkleError {
    #[error("entry name exceeds {NAME_LEN} bytes: {0:?}")]
    NameTooLong(String),

    #[error("node encoding is empty")]
    EmptyEncoding,

    #[error("chunk payload of {0} bytes exceeds the {MAX_CHUNK_PAYLOAD}-byte maximum")]
    ChunkTooLarge(usize),

    #[error("directory body length is not a multiple of 64")]
    MalformedDirectory,

    #[error("directory has {0} entries, exceeding the {MAX_DIRECTORY_ENTRIES} maximum")]
    TooManyEntries(usize),

    #[error("internal node body length is not a multiple of 32")]
    MalformedInternalNode,

    #[error("internal node has {0} children, exceeding the {MAX_FANOUT} maximum")]
    FanoutTooLarge(usize),

    #[error("unknown node type byte: {0}")]
    UnknownType(u8),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}
