use tracing::{self, error};

// For signature verification
use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
type HmacSha256 = Hmac<Sha256>;

/// Commit messages longer than this are cut before they are logged or stored
pub const MAX_COMMIT_MSG_LEN: usize = 500;

/// Helper function for verifying GitHub webhook signature
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    // Expected format: "sha256=..."
    let Some(git_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    // GitHub provides the signature as hex
    match hex_decode(git_signature) {
        // Constant-time comparison
        Ok(git_signature_bytes) => mac.verify_slice(&git_signature_bytes).is_ok(),
        Err(_) => {
            error!("Signature verification failed: signature is not hex");
            false
        }
    }
}

/// Truncates a commit message on a char boundary at [`MAX_COMMIT_MSG_LEN`] bytes.
pub fn truncate_message(s: &str) -> String {
    if s.len() <= MAX_COMMIT_MSG_LEN {
        return s.to_string();
    }
    let mut end = MAX_COMMIT_MSG_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"ref":"refs/heads/master"}"#;
        assert!(verify_github_signature("topsecret", body, &sign("topsecret", body)));
    }

    #[test]
    fn rejects_wrong_secret_prefix_or_encoding() {
        let body = b"payload";
        assert!(!verify_github_signature("a", body, &sign("b", body)));
        assert!(!verify_github_signature("a", body, "sha1=deadbeef"));
        assert!(!verify_github_signature("a", body, "sha256=not-hex"));
    }

    #[test]
    fn truncates_long_messages_only() {
        assert_eq!(truncate_message("short"), "short");
        let long = "é".repeat(400);
        let cut = truncate_message(&long);
        assert!(cut.ends_with("... (truncated)"));
        assert!(cut.len() <= MAX_COMMIT_MSG_LEN + "... (truncated)".len());
    }
}
