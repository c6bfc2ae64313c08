//! Wire framing for cluster broadcasts: frame, then compress-if-smaller,
//! then encrypt-if-enabled, in that fixed order; `dispatch_frame` peels
//! the same layers off in reverse, dropping anything that doesn't parse.

use bytes::Bytes;
use chain_core::contracts::Keyring;
use tracing::warn;

use crate::compress;
use crate::error::{PubSubError, PubSubResult};

pub const NODE_ID_LEN: usize = 20;

const TAG_BROADCAST: u8 = 0;
const TAG_DIRECT_BROADCAST: u8 = 1;
const TAG_COMPRESS: u8 = 2;
const TAG_ENCRYPT: u8 = 3;

pub type NodeId = [u8; NODE_ID_LEN];

/// Options a caller may set per-broadcast to override the adapter's
/// default compression/encryption posture.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastOptions {
    pub disable_compression: bool,
    pub disable_encryption: bool,
}

#[derive(Debug, Clone)]
pub enum DecodedFrame {
    Broadcast { from: NodeId, payload: Bytes },
    DirectBroadcast { from: NodeId, dest: NodeId, topic: String, payload: Bytes },
}

/// Frame `payload` as a plain broadcast: `[tag=Broadcast][self_id][payload]`.
fn frame_broadcast(self_id: NodeId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + NODE_ID_LEN + payload.len());
    buf.push(TAG_BROADCAST);
    buf.extend_from_slice(&self_id);
    buf.extend_from_slice(payload);
    buf
}

/// Frame a direct broadcast: inner = `[dest(20)][topic_len(4 BE)][topic][payload]`,
/// then wrapped the same way as a plain broadcast but tagged `DirectBroadcast`.
fn frame_direct_broadcast(self_id: NodeId, dest: NodeId, topic: &str, payload: &[u8]) -> Vec<u8> {
    let topic_bytes = topic.as_bytes();
    let mut inner = Vec::with_capacity(NODE_ID_LEN + 4 + topic_bytes.len() + payload.len());
    inner.extend_from_slice(&dest);
    inner.extend_from_slice(&(topic_bytes.len() as u32).to_be_bytes());
    inner.extend_from_slice(topic_bytes);
    inner.extend_from_slice(payload);

    let mut buf = Vec::with_capacity(1 + NODE_ID_LEN + inner.len());
    buf.push(TAG_DIRECT_BROADCAST);
    buf.extend_from_slice(&self_id);
    buf.extend_from_slice(&inner);
    buf
}

fn maybe_compress(frame: Vec<u8>, disabled: bool) -> Vec<u8> {
    if disabled {
        return frame;
    }
    let compressed = compress::compress(&frame);
    if compressed.len() < frame.len() {
        let mut tagged = Vec::with_capacity(1 + compressed.len());
        tagged.push(TAG_COMPRESS);
        tagged.extend_from_slice(&compressed);
        tagged
    } else {
        frame
    }
}

fn maybe_encrypt(frame: Vec<u8>, keyring: Option<&dyn Keyring>, disabled: bool) -> PubSubResult<Vec<u8>> {
    if disabled {
        return Ok(frame);
    }
    let keyring = keyring.ok_or(PubSubError::EncryptionRequired)?;
    let ciphertext = keyring.encrypt(&frame, b"").map_err(|e| PubSubError::Keyring(e.to_string()))?;
    let mut tagged = Vec::with_capacity(1 + ciphertext.len());
    tagged.push(TAG_ENCRYPT);
    tagged.extend_from_slice(&ciphertext);
    Ok(tagged)
}

/// Build the on-wire bytes for a plain broadcast.
pub fn build_broadcast(
    self_id: NodeId,
    payload: &[u8],
    keyring: Option<&dyn Keyring>,
    opts: BroadcastOptions,
) -> PubSubResult<Vec<u8>> {
    let frame = frame_broadcast(self_id, payload);
    let frame = maybe_compress(frame, opts.disable_compression);
    maybe_encrypt(frame, keyring, opts.disable_encryption)
}

/// Build the on-wire bytes for a direct broadcast targeted at `dest`.
pub fn build_direct_broadcast(
    self_id: NodeId,
    dest: NodeId,
    topic: &str,
    payload: &[u8],
    keyring: Option<&dyn Keyring>,
    opts: BroadcastOptions,
) -> PubSubResult<Vec<u8>> {
    let frame = frame_direct_broadcast(self_id, dest, topic, payload);
    let frame = maybe_compress(frame, opts.disable_compression);
    maybe_encrypt(frame, keyring, opts.disable_encryption)
}

/// Strictly peel encrypt/compress layers off `bytes` and discriminate the
/// inner frame kind. Any structural mismatch (wrong tag given the
/// encryption posture, truncated length, bad dest id) is reported as
/// `MalformedFrame` rather than silently tolerated; callers log and drop.
pub fn dispatch_frame(
    bytes: &[u8],
    self_id: NodeId,
    keyring: Option<&dyn Keyring>,
    encryption_required: bool,
) -> PubSubResult<DecodedFrame> {
    let mut buf;
    let mut cursor: &[u8] = bytes;

    if let Some((&TAG_ENCRYPT, rest)) = cursor.split_first() {
        let keyring = keyring.ok_or(PubSubError::EncryptionRequired)?;
        buf = keyring.decrypt(rest, b"").map_err(|e| PubSubError::Keyring(e.to_string()))?;
        cursor = &buf;
    } else if encryption_required {
        return Err(PubSubError::EncryptionRequired);
    }

    if let Some((&TAG_COMPRESS, rest)) = cursor.split_first() {
        buf = compress::decompress(rest)
            .ok_or_else(|| PubSubError::MalformedFrame("bad compressed payload".into()))?;
        cursor = &buf;
    }

    let (&tag, rest) = cursor
        .split_first()
        .ok_or_else(|| PubSubError::MalformedFrame("empty frame".into()))?;
    if rest.len() < NODE_ID_LEN {
        return Err(PubSubError::MalformedFrame("frame shorter than a node id".into()));
    }
    let mut from = [0u8; NODE_ID_LEN];
    from.copy_from_slice(&rest[..NODE_ID_LEN]);
    let rest = &rest[NODE_ID_LEN..];

    match tag {
        TAG_BROADCAST => Ok(DecodedFrame::Broadcast { from, payload: Bytes::copy_from_slice(rest) }),
        TAG_DIRECT_BROADCAST => {
            if rest.len() < NODE_ID_LEN + 4 {
                return Err(PubSubError::MalformedFrame("direct broadcast header truncated".into()));
            }
            let mut dest = [0u8; NODE_ID_LEN];
            dest.copy_from_slice(&rest[..NODE_ID_LEN]);
            let rest = &rest[NODE_ID_LEN..];
            let topic_len = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
            let rest = &rest[4..];
            if rest.len() < topic_len {
                return Err(PubSubError::MalformedFrame("direct broadcast topic truncated".into()));
            }
            let topic = String::from_utf8(rest[..topic_len].to_vec())
                .map_err(|_| PubSubError::MalformedFrame("topic is not valid utf8".into()))?;
            let payload = Bytes::copy_from_slice(&rest[topic_len..]);
            if dest != self_id {
                warn!("chain-pubsub: dropping direct broadcast addressed to another node");
                return Err(PubSubError::MalformedFrame("direct broadcast addressed elsewhere".into()));
            }
            Ok(DecodedFrame::DirectBroadcast { from, dest, topic, payload })
        }
        other => Err(PubSubError::MalformedFrame(format!("unknown frame tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct XorKeyring;

    impl Keyring for XorKeyring {
        fn encrypt(&self, plaintext: &[u8], _aad: &[u8]) -> chain_core::ChainResult<Vec<u8>> {
            Ok(plaintext.iter().map(|b| b ^ 0x5a).collect())
        }
        fn decrypt(&self, ciphertext: &[u8], _aad: &[u8]) -> chain_core::ChainResult<Vec<u8>> {
            Ok(ciphertext.iter().map(|b| b ^ 0x5a).collect())
        }
        fn message_sign(&self, _message: &[u8]) -> chain_core::ChainResult<Vec<u8>> {
            Ok(Vec::new())
        }
        fn message_verify(&self, _message: &[u8], _signature: &[u8]) -> chain_core::ChainResult<bool> {
            Ok(true)
        }
        fn message_encrypt(&self, plaintext: &[u8]) -> chain_core::ChainResult<Vec<u8>> {
            self.encrypt(plaintext, b"")
        }
        fn message_decrypt(&self, ciphertext: &[u8]) -> chain_core::ChainResult<Vec<u8>> {
            self.decrypt(ciphertext, b"")
        }
    }

    fn node(tag: u8) -> NodeId {
        let mut id = [0u8; NODE_ID_LEN];
        id[0] = tag;
        id
    }

    #[test]
    fn broadcast_round_trips_without_encryption() {
        let wire = build_broadcast(node(1), b"hello", None, BroadcastOptions::default()).unwrap();
        match dispatch_frame(&wire, node(1), None, false).unwrap() {
            DecodedFrame::Broadcast { from, payload } => {
                assert_eq!(from, node(1));
                assert_eq!(&payload[..], b"hello");
            }
            _ => panic!("expected broadcast"),
        }
    }

    #[test]
    fn broadcast_round_trips_with_encryption() {
        let keyring = XorKeyring;
        let wire = build_broadcast(node(2), b"secret payload", Some(&keyring), BroadcastOptions::default()).unwrap();
        match dispatch_frame(&wire, node(2), Some(&keyring), true).unwrap() {
            DecodedFrame::Broadcast { payload, .. } => assert_eq!(&payload[..], b"secret payload"),
            _ => panic!("expected broadcast"),
        }
    }

    #[test]
    fn encryption_required_but_missing_tag_is_rejected() {
        let wire = build_broadcast(node(3), b"x", None, BroadcastOptions::default()).unwrap();
        assert!(dispatch_frame(&wire, node(3), None, true).is_err());
    }

    #[test]
    fn direct_broadcast_round_trips() {
        let wire =
            build_direct_broadcast(node(4), node(9), "room:1", b"payload", None, BroadcastOptions::default()).unwrap();
        match dispatch_frame(&wire, node(9), None, false).unwrap() {
            DecodedFrame::DirectBroadcast { from, dest, topic, payload } => {
                assert_eq!(from, node(4));
                assert_eq!(dest, node(9));
                assert_eq!(topic, "room:1");
                assert_eq!(&payload[..], b"payload");
            }
            _ => panic!("expected direct broadcast"),
        }
    }

    #[test]
    fn direct_broadcast_addressed_to_another_node_is_dropped() {
        let wire =
            build_direct_broadcast(node(4), node(9), "room:1", b"payload", None, BroadcastOptions::default()).unwrap();
        assert!(dispatch_frame(&wire, node(1), None, false).is_err());
    }

    #[test]
    fn large_payload_compresses_in_the_wire_build() {
        let payload = vec![b'z'; 8192];
        let wire = build_broadcast(node(5), &payload, None, BroadcastOptions::default()).unwrap();
        assert!(wire.len() < payload.len());
        match dispatch_frame(&wire, node(5), None, false).unwrap() {
            DecodedFrame::Broadcast { payload: got, .. } => assert_eq!(&got[..], &payload[..]),
            _ => panic!("expected broadcast"),
        }
    }
}
