//! Signed anonymous voter ids.
//!
//! Audience members without an account get a random voter id plus an
//! HMAC-SHA256 signature over it. Presenting both proves the id was issued
//! by this server, so ids cannot be made up to vote repeatedly.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use livepoll_common::IdGenerator;
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A voter id and its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedVoterId {
    pub user_id: String,
    pub signature: String,
}

/// Issues and verifies signed voter ids.
#[derive(Clone)]
pub struct VotingTokenService {
    secret: Vec<u8>,
    id_gen: IdGenerator,
}

impl VotingTokenService {
    /// Create a service signing with `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Issue a fresh random voter id.
    #[must_use]
    pub fn issue(&self) -> SignedVoterId {
        let user_id = self.id_gen.generate_uuid_v4();
        let signature = self.sign(&user_id);
        SignedVoterId { user_id, signature }
    }

    /// Signature of `data`, base64url without padding.
    #[must_use]
    pub fn sign(&self, data: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(data).finalize().into_bytes())
    }

    /// Check a signature in constant time.
    #[must_use]
    pub fn verify(&self, data: &str, signature: &str) -> bool {
        let Ok(expected) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        self.mac(data).verify_slice(&expected).is_ok()
    }

    fn mac(&self, data: &str) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(data.as_bytes());
        mac
    }
}
