//! External-primitive contracts: trait boundaries for collaborators this
//! crate treats as black boxes, namely a cluster adapter, a key management
//! service, and an SSE cookie-session store. None of these are implemented
//! here; `chain-pubsub`/`chain-socket` depend on concrete implementations
//! supplied by the embedding application.

use async_trait::async_trait;

use crate::error::ChainResult;

/// A cluster pub/sub transport. `"dummy"` is a reserved name meaning
/// process-local only: callers bypass compression/encryption for it.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    async fn subscribe(&self, topic: &str);

    async fn unsubscribe(&self, topic: &str);

    async fn broadcast(&self, topic: &str, bytes: &[u8]) -> ChainResult<()>;
}

/// AEAD + signing primitive used to frame pub/sub messages and to sign/
/// verify/encrypt arbitrary payloads (e.g. cookie session values).
pub trait Keyring: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> ChainResult<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> ChainResult<Vec<u8>>;

    fn message_sign(&self, message: &[u8]) -> ChainResult<Vec<u8>>;

    fn message_verify(&self, message: &[u8], signature: &[u8]) -> ChainResult<bool>;

    fn message_encrypt(&self, plaintext: &[u8]) -> ChainResult<Vec<u8>>;

    fn message_decrypt(&self, ciphertext: &[u8]) -> ChainResult<Vec<u8>>;
}

/// Cookie-backed session store consulted by the SSE transport to resume a
/// session across reconnects. `cookie_value` is the opaque cookie payload;
/// `data` is an opaque blob the store may use to validate/sign it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, cookie_value: &str) -> ChainResult<Option<(String, Vec<u8>)>>;

    async fn put(&self, socket_id: &str, data: &[u8]) -> ChainResult<String>;

    async fn delete(&self, socket_id: &str) -> ChainResult<()>;
}
