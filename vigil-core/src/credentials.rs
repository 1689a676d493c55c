//! Credential issuance and beacon signature verification.
//!
//! Agents are headless: they cannot perform an interactive login, so every
//! request is authenticated by an HMAC-SHA256 over the exact raw body
//! bytes, keyed with a per-agent pre-shared key issued once at
//! registration. Body-level HMAC authenticates identity and integrity in
//! one step without TLS client certificates or session tokens.

use crate::{error::CredentialError, new_agent_id, AgentId};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a freshly issued PSK (256 bits).
const PSK_BYTES: usize = 32;

// ============================================================================
// PRE-SHARED KEY
// ============================================================================

/// Per-agent pre-shared key.
///
/// Stored verbatim: it is a symmetric secret, not a password, so exact
/// fast verification matters more than secrecy-at-rest hashing. The
/// `Debug` impl redacts the secret so it cannot leak through logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Psk(String);

impl Psk {
    /// Wrap an existing secret (e.g. loaded from agent-side config).
    pub fn from_string(secret: String) -> Self {
        Self(secret)
    }

    /// The raw secret. Callers are expected to hand this to the agent
    /// exactly once at registration or feed it into HMAC computation.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Psk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Psk(<redacted>)")
    }
}

/// Issue credentials for a new agent: a random identifier and a 256-bit
/// random secret, hex-encoded. The secret is returned to the caller exactly
/// once; after registration it is only ever used for verification.
pub fn issue_credential() -> (AgentId, Psk) {
    let mut secret = [0u8; PSK_BYTES];
    OsRng.fill_bytes(&mut secret);
    (new_agent_id(), Psk(hex::encode(secret)))
}

// ============================================================================
// BODY SIGNING
// ============================================================================

/// Compute the hex HMAC-SHA256 signature over the exact request body bytes.
pub fn sign_body(psk: &Psk, body: &[u8]) -> String {
    // HMAC-SHA256 accepts keys of any length; new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(psk.expose().as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any size"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature over `body` in constant time.
///
/// Fails closed: malformed hex, wrong length, and mismatched digests all
/// yield an error, and callers collapse every variant into the same
/// opaque rejection.
pub fn verify_body(psk: &Psk, body: &[u8], signature_hex: &str) -> Result<(), CredentialError> {
    let expected = hex::decode(signature_hex).map_err(|_| CredentialError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(psk.expose().as_bytes())
        .map_err(|_| CredentialError::MalformedSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| CredentialError::InvalidSignature)
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
