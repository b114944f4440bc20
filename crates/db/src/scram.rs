//! SCRAM-SHA-256 client side, as used by the RethinkDB V1_0 handshake.
//!
//! The key derivation helpers are public so that test doubles of the server
//! can compute the same proofs and signatures.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::ConnectionError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 18;

/// Upper bound on the server-chosen PBKDF2 iteration count. RethinkDB uses 4096.
pub const MAX_ITERATIONS: u32 = 1 << 20;

/// Channel binding header `n,,` base64-encoded.
pub const CHANNEL_BINDING: &str = "biws";

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// `Hi()` from RFC 5802: PBKDF2 with HMAC-SHA-256 and a single output block.
pub fn salted_password(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut block = Vec::with_capacity(salt.len() + 4);
    block.extend_from_slice(salt);
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut previous = hmac(password.as_bytes(), &block);
    let mut result = previous;
    for _ in 1..iterations {
        previous = hmac(password.as_bytes(), &previous);
        for (acc, byte) in result.iter_mut().zip(previous.iter()) {
            *acc ^= byte;
        }
    }
    result
}

/// `ClientKey XOR HMAC(H(ClientKey), AuthMessage)`.
pub fn client_proof(salted_password: &[u8; 32], auth_message: &str) -> [u8; 32] {
    let client_key = hmac(salted_password, b"Client Key");
    let stored_key = Sha256::digest(client_key);
    let signature = hmac(&stored_key, auth_message.as_bytes());

    let mut proof = client_key;
    for (p, s) in proof.iter_mut().zip(signature.iter()) {
        *p ^= s;
    }
    proof
}

/// `HMAC(HMAC(SaltedPassword, "Server Key"), AuthMessage)`.
pub fn server_signature(salted_password: &[u8; 32], auth_message: &str) -> [u8; 32] {
    let server_key = hmac(salted_password, b"Server Key");
    hmac(&server_key, auth_message.as_bytes())
}

/// Escape a username for the `n=` attribute.
pub fn escape_username(user: &str) -> String {
    user.replace('=', "=3D").replace(',', "=2C")
}

/// Look up a single-letter attribute in a SCRAM message.
pub fn attribute<'a>(message: &'a str, key: char) -> Option<&'a str> {
    message.split(',').find_map(|part| {
        let (name, value) = part.split_once('=')?;
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c == key => Some(value),
            _ => None,
        }
    })
}

/// Client state between the first and final SCRAM messages.
pub struct ScramClient {
    password: String,
    nonce: String,
    client_first_bare: String,
}

impl ScramClient {
    pub fn new(user: &str, password: &str) -> Self {
        let mut raw = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        Self::with_nonce(user, password, STANDARD.encode(raw))
    }

    pub fn with_nonce(user: &str, password: &str, nonce: impl Into<String>) -> Self {
        let nonce = nonce.into();
        let client_first_bare = format!("n={},r={}", escape_username(user), nonce);
        Self {
            password: password.to_string(),
            nonce,
            client_first_bare,
        }
    }

    /// The `client-first-message`, including the GS2 header.
    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Answer the server's challenge, producing the `client-final-message`
    /// and the signature the server must later present.
    pub fn respond(self, server_first: &str) -> Result<(String, ServerVerifier), ConnectionError> {
        if let Some(extension) = attribute(server_first, 'm') {
            return Err(ConnectionError::auth(format!(
                "unsupported mandatory extension '{extension}'"
            )));
        }

        let server_nonce = attribute(server_first, 'r')
            .ok_or_else(|| ConnectionError::protocol("server challenge is missing a nonce"))?;
        if !server_nonce.starts_with(&self.nonce) || server_nonce.len() == self.nonce.len() {
            return Err(ConnectionError::auth("server nonce does not extend client nonce"));
        }

        let salt = attribute(server_first, 's')
            .ok_or_else(|| ConnectionError::protocol("server challenge is missing a salt"))?;
        let salt = STANDARD
            .decode(salt)
            .map_err(|e| ConnectionError::protocol(format!("invalid salt encoding: {e}")))?;

        let iterations: u32 = attribute(server_first, 'i')
            .ok_or_else(|| ConnectionError::protocol("server challenge is missing an iteration count"))?
            .parse()
            .map_err(|_| ConnectionError::protocol("invalid iteration count"))?;
        if iterations == 0 {
            return Err(ConnectionError::protocol("iteration count must be positive"));
        }
        if iterations > MAX_ITERATIONS {
            return Err(ConnectionError::protocol(format!(
                "iteration count {iterations} exceeds {MAX_ITERATIONS}"
            )));
        }

        let without_proof = format!("c={},r={}", CHANNEL_BINDING, server_nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare, server_first, without_proof);

        let salted = salted_password(&self.password, &salt, iterations);
        let proof = client_proof(&salted, &auth_message);
        let verifier = ServerVerifier {
            expected: server_signature(&salted, &auth_message),
        };

        Ok((format!("{},p={}", without_proof, STANDARD.encode(proof)), verifier))
    }
}

/// Checks the `server-final-message`.
pub struct ServerVerifier {
    expected: [u8; 32],
}

impl ServerVerifier {
    pub fn verify(&self, server_final: &str) -> Result<(), ConnectionError> {
        if let Some(error) = attribute(server_final, 'e') {
            return Err(ConnectionError::auth(error.to_string()));
        }
        let signature = attribute(server_final, 'v')
            .ok_or_else(|| ConnectionError::protocol("server final message is missing a signature"))?;
        let signature = STANDARD
            .decode(signature)
            .map_err(|e| ConnectionError::protocol(format!("invalid signature encoding: {e}")))?;

        if bool::from(signature.as_slice().ct_eq(&self.expected)) {
            Ok(())
        } else {
            Err(ConnectionError::auth("server signature mismatch"))
        }
    }
}
