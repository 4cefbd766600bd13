//! Inbound message dispatch: one closed match over [`MessageType`], not a
//! pluggable handler registry. The set of message types is fixed by the
//! wire format, so a match the compiler can check for exhaustiveness is
//! both clearer and safer than indirection through a trait object table.

use crate::correlator::Correlator;
use crate::session::SessionTable;
use p2p_core::crypto::{self, EphemeralSecret, Identity};
use p2p_core::merkle::Hash;
use p2p_core::store::ContentStore;
use p2p_core::wire::{Message, MessageType};
use p256::ecdsa::VerifyingKey;
use std::net::SocketAddr;

pub struct HandlerContext<'a> {
    pub identity: &'a Identity,
    pub peer_name: &'a str,
    pub sessions: &'a SessionTable,
    pub correlator: &'a Correlator,
    pub store: &'a ContentStore,
    pub encryption_enabled: bool,
}

/// A datagram this node decides to emit as a result of handling an inbound
/// one: a direct reply to the sender, or a relay to a third address.
pub enum Outbound {
    Reply(Message),
    To(SocketAddr, Message),
}

pub(crate) fn hello_body(extensions: u32, public_key: &[u8; 64], peer_name: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + 64 + peer_name.len());
    body.extend_from_slice(&extensions.to_be_bytes());
    body.extend_from_slice(public_key);
    body.extend_from_slice(peer_name.as_bytes());
    body
}

fn parse_hello_body(body: &[u8]) -> Option<(u32, [u8; 64], String)> {
    if body.len() < 4 + 64 {
        return None;
    }
    let extensions = u32::from_be_bytes(body[0..4].try_into().ok()?);
    let mut key = [0u8; 64];
    key.copy_from_slice(&body[4..68]);
    let name = String::from_utf8_lossy(&body[68..]).into_owned();
    Some((extensions, key, name))
}

pub(crate) fn sign(identity: &Identity, mut msg: Message) -> Message {
    let sig = identity.sign(&msg.signable_bytes());
    msg.signature = Some(sig);
    msg
}

/// Verify `msg`'s trailing signature, if any, against `key`. A missing
/// signature is always a failure — callers only reach this for message
/// types [`MessageType::is_signed`] marks as required.
fn signature_ok(msg: &Message, key: &VerifyingKey) -> bool {
    match msg.signature {
        Some(sig) => crypto::verify_signature(key, &msg.signable_bytes(), &sig),
        None => false,
    }
}

fn session_error(msg: &Message, reason: &str) -> Vec<Outbound> {
    vec![Outbound::Reply(Message::new(
        msg.id,
        MessageType::Error,
        reason.as_bytes().to_vec(),
    ))]
}

/// Handle one inbound datagram, returning zero or more datagrams this node
/// emits in response. Response-type messages (replies to our own earlier
/// requests) are delivered through the correlator and never produce an
/// `Outbound`.
pub fn handle_datagram(ctx: &HandlerContext<'_>, from: SocketAddr, msg: Message) -> Vec<Outbound> {
    match msg.ty {
        MessageType::Ping => vec![Outbound::Reply(sign_if_needed(
            ctx,
            Message::new(msg.id, MessageType::Ok, vec![]),
        ))],

        MessageType::Hello => handle_hello(ctx, from, &msg),
        MessageType::HelloReply => handle_hello_reply(ctx, from, &msg),

        MessageType::RootRequest => handle_root_request(ctx, from, &msg),
        MessageType::DatumRequest => handle_datum_request(ctx, from, &msg),
        MessageType::KeyExchange => handle_key_exchange(ctx, from, &msg),
        MessageType::NatTraversalRequest => handle_nat_traversal_request(ctx, from, &msg),
        MessageType::NatTraversalRelay => handle_nat_traversal_relay(ctx, from, &msg),

        MessageType::RootReply => handle_root_reply(ctx, from, &msg),
        MessageType::NoDatum => handle_no_datum(ctx, from, &msg),

        // Unsigned response types: hand the body to whichever correlation
        // table the original request registered with. No reply is ever
        // produced for a reply.
        MessageType::Ok | MessageType::Error => {
            ctx.correlator.deliver_by_id(msg.id, msg.body);
            vec![]
        }

        MessageType::Datum => {
            if let Some(hash) = extract_hash(&msg.body) {
                ctx.correlator.deliver_by_hash(hash, msg.body[32..].to_vec());
            }
            vec![]
        }
    }
}

fn extract_hash(body: &[u8]) -> Option<Hash> {
    if body.len() < 32 {
        return None;
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&body[..32]);
    Some(hash)
}

fn sign_if_needed(ctx: &HandlerContext<'_>, msg: Message) -> Message {
    if msg.ty.is_signed() {
        sign(ctx.identity, msg)
    } else {
        msg
    }
}

fn handle_hello(ctx: &HandlerContext<'_>, from: SocketAddr, msg: &Message) -> Vec<Outbound> {
    let Some((extensions, peer_key, peer_name)) = parse_hello_body(&msg.body) else {
        return vec![Outbound::Reply(Message::new(
            msg.id,
            MessageType::Error,
            b"malformed Hello body".to_vec(),
        ))];
    };
    let Ok(verifying_key) = crypto::decode_public_key(&peer_key) else {
        return vec![Outbound::Reply(Message::new(
            msg.id,
            MessageType::Error,
            b"invalid public key".to_vec(),
        ))];
    };
    if !signature_ok(msg, &verifying_key) {
        tracing::debug!(%from, "dropping Hello with an invalid signature");
        return session_error(msg, "invalid signature");
    }

    let addr = from.to_string();
    ctx.sessions.record_hello(&addr, peer_name, verifying_key);

    let mut our_extensions = p2p_core::wire::extension::NAT;
    if ctx.encryption_enabled {
        our_extensions |= p2p_core::wire::extension::ENCRYPTION;
    }

    let reply = Message::new(
        msg.id,
        MessageType::HelloReply,
        hello_body(our_extensions, &ctx.identity.public_key_bytes(), ctx.peer_name),
    );
    let mut outbound = vec![Outbound::Reply(sign(ctx.identity, reply))];

    if extensions & p2p_core::wire::extension::ENCRYPTION != 0 && ctx.encryption_enabled {
        // Both sides support encryption: start a KeyExchange ourselves
        // rather than waiting for the peer to. Our ephemeral stays pending
        // until the peer's own KeyExchange carries back its half.
        let ephemeral = EphemeralSecret::generate();
        let exchange_body = ephemeral.public_key_bytes().to_vec();
        ctx.sessions.set_pending_ephemeral(&addr, ephemeral);
        let exchange = Message::new(rand::random(), MessageType::KeyExchange, exchange_body);
        outbound.push(Outbound::To(from, sign(ctx.identity, exchange)));
    }

    outbound
}

fn handle_hello_reply(ctx: &HandlerContext<'_>, from: SocketAddr, msg: &Message) -> Vec<Outbound> {
    let Some((_extensions, peer_key, peer_name)) = parse_hello_body(&msg.body) else {
        tracing::debug!(%from, "dropping malformed HelloReply");
        return vec![];
    };
    let Ok(verifying_key) = crypto::decode_public_key(&peer_key) else {
        tracing::debug!(%from, "dropping HelloReply with an undecodable public key");
        return vec![];
    };
    if !signature_ok(msg, &verifying_key) {
        tracing::debug!(%from, "dropping HelloReply with an invalid signature");
        return vec![];
    }

    ctx.sessions.record_hello(&from.to_string(), peer_name, verifying_key);
    ctx.correlator.deliver_by_id(msg.id, msg.body.clone());
    vec![]
}

fn handle_root_request(ctx: &HandlerContext<'_>, from: SocketAddr, msg: &Message) -> Vec<Outbound> {
    let addr = from.to_string();
    if !ctx.sessions.has_session(&addr) {
        return session_error(msg, "no session established");
    }
    ctx.sessions.touch(&addr);

    let body = ctx.store.root().map(|h| h.to_vec()).unwrap_or_default();
    let reply = Message::new(msg.id, MessageType::RootReply, body);
    vec![Outbound::Reply(sign(ctx.identity, reply))]
}

fn handle_datum_request(ctx: &HandlerContext<'_>, from: SocketAddr, msg: &Message) -> Vec<Outbound> {
    let addr = from.to_string();
    if !ctx.sessions.has_session(&addr) {
        return session_error(msg, "no session established");
    }
    ctx.sessions.touch(&addr);

    let Some(hash) = extract_hash(&msg.body) else {
        return vec![Outbound::Reply(Message::new(
            msg.id,
            MessageType::Error,
            b"malformed DatumRequest body".to_vec(),
        ))];
    };

    match ctx.store.get(&hash) {
        Some(data) => {
            let mut body = Vec::with_capacity(33 + data.len());
            body.extend_from_slice(&hash);
            body.push(0); // 0 = sent unsealed; a sender may choose to seal instead.
            body.extend_from_slice(&data);
            vec![Outbound::Reply(sign(
                ctx.identity,
                Message::new(msg.id, MessageType::Datum, body),
            ))]
        }
        None => {
            let mut body = Vec::with_capacity(32);
            body.extend_from_slice(&hash);
            vec![Outbound::Reply(sign(
                ctx.identity,
                Message::new(msg.id, MessageType::NoDatum, body),
            ))]
        }
    }
}

fn handle_key_exchange(ctx: &HandlerContext<'_>, from: SocketAddr, msg: &Message) -> Vec<Outbound> {
    let addr = from.to_string();
    let Some(verifying_key) = ctx.sessions.verifying_key(&addr) else {
        return session_error(msg, "no session established");
    };
    if !signature_ok(msg, &verifying_key) {
        tracing::debug!(%from, "dropping KeyExchange with an invalid signature");
        return session_error(msg, "invalid signature");
    }
    if msg.body.len() != 64 {
        return session_error(msg, "malformed KeyExchange body");
    }
    ctx.sessions.touch(&addr);

    if let Some(pending) = ctx.sessions.take_pending_ephemeral(&addr) {
        // The peer's half of a KeyExchange we initiated: derive against the
        // ephemeral we already advertised, not a freshly generated one, so
        // both sides land on the same shared key.
        let Ok(shared) = pending.derive_session_key(&msg.body) else {
            return session_error(msg, "invalid ephemeral public key");
        };
        ctx.sessions.record_key_exchange(&addr, pending, shared, true);
        return vec![];
    }

    let already_established = ctx.sessions.shared_key(&addr).is_some();

    let ephemeral = EphemeralSecret::generate();
    let Ok(shared) = ephemeral.derive_session_key(&msg.body) else {
        return session_error(msg, "invalid ephemeral public key");
    };
    let our_public = ephemeral.public_key_bytes();

    ctx.sessions.record_key_exchange(&addr, ephemeral, shared, true);

    if already_established {
        // A rekey: accept it silently rather than re-triggering a reply
        // that would bounce back and forth forever.
        return vec![];
    }

    let reply = Message::new(msg.id, MessageType::KeyExchange, our_public.to_vec());
    vec![Outbound::Reply(sign(ctx.identity, reply))]
}

fn handle_nat_traversal_request(
    ctx: &HandlerContext<'_>,
    from: SocketAddr,
    msg: &Message,
) -> Vec<Outbound> {
    use p2p_core::wire::Endpoint;

    let addr = from.to_string();
    let Some(verifying_key) = ctx.sessions.verifying_key(&addr) else {
        return session_error(msg, "no session established");
    };
    if !signature_ok(msg, &verifying_key) {
        tracing::debug!(%from, "dropping NatTraversalRequest with an invalid signature");
        return session_error(msg, "invalid signature");
    }
    let Ok(target) = Endpoint::decode(&msg.body) else {
        return vec![];
    };
    ctx.sessions.touch(&addr);

    let relay_body = Endpoint::from_socket_addr(from).encode();
    let relay = Message::new(msg.id, MessageType::NatTraversalRelay, relay_body);
    vec![Outbound::To(target.to_socket_addr(), sign(ctx.identity, relay))]
}

fn handle_nat_traversal_relay(ctx: &HandlerContext<'_>, from: SocketAddr, msg: &Message) -> Vec<Outbound> {
    use p2p_core::wire::Endpoint;

    let addr = from.to_string();
    let Some(verifying_key) = ctx.sessions.verifying_key(&addr) else {
        return session_error(msg, "no session established");
    };
    if !signature_ok(msg, &verifying_key) {
        tracing::debug!(%from, "dropping NatTraversalRelay with an invalid signature");
        return session_error(msg, "invalid signature");
    }
    let Ok(origin) = Endpoint::decode(&msg.body) else {
        return vec![];
    };
    ctx.sessions.touch(&addr);

    // Fire-and-forget hole punch: no reply is awaited, matching the
    // peer's observed never-blocks-on-a-relay behavior.
    let punch = Message::new(msg.id, MessageType::Ping, vec![]);
    vec![Outbound::To(origin.to_socket_addr(), sign_if_needed(ctx, punch))]
}

fn handle_root_reply(ctx: &HandlerContext<'_>, from: SocketAddr, msg: &Message) -> Vec<Outbound> {
    let addr = from.to_string();
    let Some(verifying_key) = ctx.sessions.verifying_key(&addr) else {
        tracing::debug!(%from, "dropping RootReply from a session with no cached key");
        return vec![];
    };
    if !signature_ok(msg, &verifying_key) {
        tracing::debug!(%from, "dropping RootReply with an invalid signature");
        return vec![];
    }
    ctx.sessions.touch(&addr);
    ctx.correlator.deliver_by_id(msg.id, msg.body.clone());
    vec![]
}

fn handle_no_datum(ctx: &HandlerContext<'_>, from: SocketAddr, msg: &Message) -> Vec<Outbound> {
    let Some(hash) = extract_hash(&msg.body) else {
        return vec![];
    };
    let addr = from.to_string();
    let Some(verifying_key) = ctx.sessions.verifying_key(&addr) else {
        tracing::debug!(%from, "dropping NoDatum from a session with no cached key");
        return vec![];
    };
    if !signature_ok(msg, &verifying_key) {
        tracing::debug!(%from, "dropping NoDatum with an invalid signature");
        return vec![];
    }
    ctx.sessions.touch(&addr);
    ctx.correlator.close_by_hash(hash);
    vec![]
}
