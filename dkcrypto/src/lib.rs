pub mod dk_aes;
pub mod dk_chacha;
pub mod dk_crypto;

pub use dk_crypto::{chunk_nonce, CipherEngine, CypherMode, FileKeyMaterial};
