//! HTTP authentication for the WS-Man endpoint
//!
//! Basic authentication is a header; NTLM is a three-leg challenge-response
//! carried in `Authorization: Negotiate` headers. The NTLMv2 messages built
//! here cover the exchange WinRM endpoints expect; session-key sealing is
//! not performed (transport confidentiality comes from TLS).

use crate::TransportError;
use md4::{Digest, Md4};
use secrecy::{ExposeSecret, SecretString};

const NTLMSSP_SIGNATURE: &[u8] = b"NTLMSSP\0";
const MSG_NEGOTIATE: u32 = 1;
const MSG_AUTHENTICATE: u32 = 3;

// NTLMSSP_NEGOTIATE_UNICODE | OEM | REQUEST_TARGET | NTLM | ALWAYS_SIGN |
// EXTENDED_SESSIONSECURITY
const NEGOTIATE_FLAGS: u32 = 0x0000_0001
    | 0x0000_0002
    | 0x0000_0004
    | 0x0000_0200
    | 0x0000_8000
    | 0x0008_0000;
const AUTHENTICATE_FLAGS: u32 = 0x0000_0001 | 0x0000_0200 | 0x0000_8000 | 0x0008_0000;

/// NTLM challenge-response state for one endpoint
#[derive(Debug, Clone)]
pub struct NtlmExchange {
    username: String,
    password: SecretString,
    domain: String,
    workstation: String,
}

/// A security buffer descriptor: length, allocated length, offset
fn push_buffer(message: &mut Vec<u8>, len: u16, offset: u32) {
    message.extend_from_slice(&len.to_le_bytes());
    message.extend_from_slice(&len.to_le_bytes());
    message.extend_from_slice(&offset.to_le_bytes());
}

fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

impl NtlmExchange {
    /// Create an exchange for the given account
    pub fn new(username: impl Into<String>, password: SecretString, domain: Option<String>) -> Self {
        let workstation = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "WORKSTATION".to_string());

        Self {
            username: username.into(),
            password,
            domain: domain.unwrap_or_default(),
            workstation,
        }
    }

    /// Build the Type 1 (Negotiate) message
    pub fn negotiate_message(&self) -> Vec<u8> {
        let domain = self.domain.as_bytes();
        let workstation = self.workstation.as_bytes();

        let mut message = NTLMSSP_SIGNATURE.to_vec();
        message.extend_from_slice(&MSG_NEGOTIATE.to_le_bytes());
        message.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());

        // Payload starts after the 32-byte fixed header: workstation first
        push_buffer(&mut message, domain.len() as u16, 32 + workstation.len() as u32);
        push_buffer(&mut message, workstation.len() as u16, 32);

        message.extend_from_slice(workstation);
        message.extend_from_slice(domain);
        message
    }

    /// Build the Type 3 (Authenticate) message answering a Type 2 challenge
    pub fn authenticate_message(&self, challenge: &[u8]) -> Result<Vec<u8>, TransportError> {
        if challenge.len() < 32 || !challenge.starts_with(NTLMSSP_SIGNATURE) {
            return Err(TransportError::Authentication(
                "malformed NTLM challenge message".to_string(),
            ));
        }
        let server_challenge = &challenge[24..32];
        let client_challenge: [u8; 8] = rand::random();

        let nt_response = self.ntlmv2_response(server_challenge, &client_challenge);
        let lm_response = self.lmv2_response(server_challenge, &client_challenge);

        let domain = utf16le(&self.domain);
        let user = utf16le(&self.username);
        let workstation = utf16le(&self.workstation);

        // Fixed part: signature(8) type(4) + six buffers(8*6) + flags(4) +
        // version(8) + MIC(16)
        let base_offset: u32 = 88;
        let lm_offset = base_offset;
        let nt_offset = lm_offset + lm_response.len() as u32;
        let domain_offset = nt_offset + nt_response.len() as u32;
        let user_offset = domain_offset + domain.len() as u32;
        let workstation_offset = user_offset + user.len() as u32;
        let session_key_offset = workstation_offset + workstation.len() as u32;

        let mut message = NTLMSSP_SIGNATURE.to_vec();
        message.extend_from_slice(&MSG_AUTHENTICATE.to_le_bytes());
        push_buffer(&mut message, lm_response.len() as u16, lm_offset);
        push_buffer(&mut message, nt_response.len() as u16, nt_offset);
        push_buffer(&mut message, domain.len() as u16, domain_offset);
        push_buffer(&mut message, user.len() as u16, user_offset);
        push_buffer(&mut message, workstation.len() as u16, workstation_offset);
        push_buffer(&mut message, 0, session_key_offset);
        message.extend_from_slice(&AUTHENTICATE_FLAGS.to_le_bytes());
        message.extend_from_slice(&[0u8; 8]); // version
        message.extend_from_slice(&[0u8; 16]); // MIC

        message.extend_from_slice(&lm_response);
        message.extend_from_slice(&nt_response);
        message.extend_from_slice(&domain);
        message.extend_from_slice(&user);
        message.extend_from_slice(&workstation);
        Ok(message)
    }

    /// NTLMv2 hash: HMAC-MD5(NT hash, UTF16LE(upper(user) + domain))
    fn ntlmv2_hash(&self) -> [u8; 16] {
        let nt_hash = self.nt_hash();
        let identity = format!("{}{}", self.username.to_uppercase(), self.domain.to_uppercase());
        hmac_md5(&nt_hash, &utf16le(&identity))
    }

    fn ntlmv2_response(&self, server_challenge: &[u8], client_challenge: &[u8]) -> Vec<u8> {
        let hash = self.ntlmv2_hash();

        let mut blob = Vec::new();
        blob.extend_from_slice(&1u32.to_le_bytes()); // blob signature
        blob.extend_from_slice(&0u32.to_le_bytes()); // reserved
        blob.extend_from_slice(&windows_timestamp().to_le_bytes());
        blob.extend_from_slice(client_challenge);
        blob.extend_from_slice(&0u32.to_le_bytes());

        let mut data = server_challenge.to_vec();
        data.extend_from_slice(&blob);
        let proof = hmac_md5(&hash, &data);

        let mut response = proof.to_vec();
        response.extend_from_slice(&blob);
        response
    }

    fn lmv2_response(&self, server_challenge: &[u8], client_challenge: &[u8]) -> Vec<u8> {
        let hash = self.ntlmv2_hash();
        let mut data = server_challenge.to_vec();
        data.extend_from_slice(client_challenge);

        let mut response = hmac_md5(&hash, &data).to_vec();
        response.extend_from_slice(client_challenge);
        response
    }

    /// NT hash: MD4 of the UTF-16LE password
    fn nt_hash(&self) -> [u8; 16] {
        let mut hasher = Md4::new();
        hasher.update(utf16le(self.password.expose_secret()));
        let digest = hasher.finalize();

        let mut hash = [0u8; 16];
        hash.copy_from_slice(&digest);
        hash
    }
}

fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut key_block = [0u8; 64];
    if key.len() > 64 {
        key_block[..16].copy_from_slice(&md5::compute(key).0);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Vec::with_capacity(64 + data.len());
    for b in key_block.iter() {
        inner.push(b ^ 0x36);
    }
    inner.extend_from_slice(data);
    let inner_hash = md5::compute(&inner);

    let mut outer = Vec::with_capacity(64 + 16);
    for b in key_block.iter() {
        outer.push(b ^ 0x5c);
    }
    outer.extend_from_slice(&inner_hash.0);
    md5::compute(&outer).0
}

/// Current time as a Windows FILETIME (100ns ticks since 1601-01-01)
fn windows_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    const EPOCH_DIFF_SECS: u64 = 11_644_473_600;
    const TICKS_PER_SECOND: u64 = 10_000_000;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    (now + EPOCH_DIFF_SECS) * TICKS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn exchange() -> NtlmExchange {
        NtlmExchange::new(
            "jdoe",
            Secret::new("hunter2".to_string()),
            Some("CORP".to_string()),
        )
    }

    #[test]
    fn test_negotiate_message_shape() {
        let message = exchange().negotiate_message();
        assert!(message.starts_with(b"NTLMSSP\0"));
        assert_eq!(&message[8..12], &1u32.to_le_bytes());
        // Domain appears after the workstation in the payload
        let tail = &message[32..];
        assert!(tail.ends_with(b"CORP"));
    }

    #[test]
    fn test_authenticate_message_shape() {
        let mut challenge = b"NTLMSSP\0".to_vec();
        challenge.extend_from_slice(&2u32.to_le_bytes());
        challenge.resize(24, 0);
        challenge.extend_from_slice(&[0xA1; 8]); // server challenge
        challenge.resize(48, 0);

        let message = exchange().authenticate_message(&challenge).unwrap();
        assert!(message.starts_with(b"NTLMSSP\0"));
        assert_eq!(&message[8..12], &3u32.to_le_bytes());
        // Username buffer content is UTF-16LE
        let user = utf16le("jdoe");
        assert!(message
            .windows(user.len())
            .any(|window| window == user.as_slice()));
    }

    #[test]
    fn test_authenticate_rejects_short_challenge() {
        assert!(exchange().authenticate_message(b"short").is_err());
    }

    #[test]
    fn test_hmac_md5_known_vector() {
        // RFC 2202 test case 1
        let key = [0x0b; 16];
        let digest = hmac_md5(&key, b"Hi There");
        assert_eq!(
            digest,
            [
                0x92, 0x94, 0x72, 0x7a, 0x36, 0x38, 0xbb, 0x1c, 0x13, 0xf4, 0x8e, 0xf8, 0x15,
                0x8b, 0xfc, 0x9d
            ]
        );
    }

    #[test]
    fn test_nt_hash_is_stable() {
        let a = exchange().nt_hash();
        let b = exchange().nt_hash();
        assert_eq!(a, b);
    }
}
