//! HMAC-signed webhook adapter (GitHub-style `sha256=<hex>` signatures).

use crate::adapter::{HookAdapter, HookOutcome, InboundRequest};
use hmac::{Hmac, Mac};
use loomcore::{TriggerMessage, VerifyError, WorkflowId};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
const SIGNATURE_HEADER: &str = "x-signature-256";

pub struct HmacAdapter {
    secret: Vec<u8>,
}

impl HmacAdapter {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn verify(&self, body: &[u8], signature: &str) -> Result<(), VerifyError> {
        let hex_sig = signature.strip_prefix("sha256=").unwrap_or(signature);
        let expected = hex_decode(hex_sig).ok_or(VerifyError::SignatureMismatch)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| VerifyError::SignatureMismatch)?;
        mac.update(body);
        // verify_slice is constant-time.
        mac.verify_slice(&expected)
            .map_err(|_| VerifyError::SignatureMismatch)
    }
}

impl HookAdapter for HmacAdapter {
    fn provider(&self) -> &str {
        "hmac"
    }

    fn handle(
        &self,
        req: &InboundRequest,
        workflow_id: WorkflowId,
    ) -> Result<HookOutcome, VerifyError> {
        let signature = req
            .header(SIGNATURE_HEADER)
            .ok_or_else(|| VerifyError::MissingParameter(SIGNATURE_HEADER.to_string()))?;
        self.verify(&req.body, signature)?;

        Ok(HookOutcome::Trigger(TriggerMessage {
            workflow_id,
            method: req.method.to_ascii_uppercase(),
            url: req.path.clone(),
            query: req.query.clone(),
            body: req.parse_body()?,
        }))
    }
}

/// Hex-encoded HMAC-SHA256 of a body. Generates signatures for outbound
/// deliveries and test fixtures.
pub fn compute_body_signature(secret: &[u8], body: &[u8]) -> Result<String, VerifyError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| VerifyError::SignatureMismatch)?;
    mac.update(body);
    Ok(mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn request(body: &[u8], signature: Option<String>) -> InboundRequest {
        let mut headers = HashMap::new();
        if let Some(sig) = signature {
            headers.insert(SIGNATURE_HEADER.to_string(), sig);
        }
        InboundRequest {
            method: "POST".to_string(),
            path: "/api/hooks/x".to_string(),
            query: HashMap::new(),
            headers,
            body: body.to_vec(),
            content_type: Some("application/json".to_string()),
        }
    }

    // RFC 4231 test vector 2.
    #[test]
    fn known_hmac_vector() {
        let sig = compute_body_signature(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn valid_signature_accepted_with_and_without_prefix() {
        let adapter = HmacAdapter::new(b"secret".to_vec());
        let body = br#"{"event": "push"}"#;
        let sig = compute_body_signature(b"secret", body).unwrap();

        let req = request(body, Some(format!("sha256={sig}")));
        assert!(adapter.handle(&req, Uuid::new_v4()).is_ok());

        let req = request(body, Some(sig));
        assert!(adapter.handle(&req, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn tampered_body_rejected() {
        let adapter = HmacAdapter::new(b"secret".to_vec());
        let sig = compute_body_signature(b"secret", br#"{"event": "push"}"#).unwrap();
        let req = request(br#"{"event": "tampered"}"#, Some(format!("sha256={sig}")));
        assert!(matches!(
            adapter.handle(&req, Uuid::new_v4()),
            Err(VerifyError::SignatureMismatch)
        ));
    }

    #[test]
    fn missing_signature_header_rejected() {
        let adapter = HmacAdapter::new(b"secret".to_vec());
        let req = request(b"{}", None);
        assert!(matches!(
            adapter.handle(&req, Uuid::new_v4()),
            Err(VerifyError::MissingParameter(_))
        ));
    }
}
