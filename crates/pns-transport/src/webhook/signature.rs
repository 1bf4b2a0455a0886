//! Request signatures: `t=<timestamp>, v<version>=<hex hmac-sha256>`.
//!
//! The signed content is `v<version>:<timestamp>:<body>`, so receivers can
//! reject replayed or tampered requests.

use hmac::{Hmac, Mac};
use pns_core::{PushError, PushResult};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header value signing `body` sent at `timestamp` (ms since the epoch)
pub fn signature_header(secret: &str, version: u32, timestamp: i64, body: &str) -> PushResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PushError::configuration(format!("Invalid webhook secret: {e}")))?;
    mac.update(format!("v{version}:{timestamp}:{body}").as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp}, v{version}={signature}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_header_format() {
        let header = signature_header("secret123", 1, 1_700_000_000_000, r#"{"a":1}"#).unwrap();
        let (t, v) = header.split_once(", ").unwrap();
        assert_eq!(t, "t=1700000000000");
        let signature = v.strip_prefix("v1=").unwrap();
        assert_eq!(signature.len(), 64);

        // Stable for the same input, different for another version
        assert_eq!(
            header,
            signature_header("secret123", 1, 1_700_000_000_000, r#"{"a":1}"#).unwrap()
        );
        assert!(
            signature_header("secret123", 2, 1_700_000_000_000, r#"{"a":1}"#)
                .unwrap()
                .contains(", v2=")
        );
    }

    #[test]
    fn test_signature_matches_hmac_of_versioned_content() {
        let mut mac = HmacSha256::new_from_slice(b"k").unwrap();
        mac.update(b"v1:42:body");
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(
            signature_header("k", 1, 42, "body").unwrap(),
            format!("t=42, v1={expected}")
        );
    }
}
