//! Enterprise-messaging callback adapter.
//!
//! Two-phase handshake shared by enterprise suite providers:
//!
//! - GET verification: the query carries `msg_signature`, `timestamp`,
//!   `nonce` and an encrypted `echostr` challenge. The signature is a
//!   SHA-256 digest over the lexicographically sorted callback token,
//!   timestamp, nonce and ciphertext. On success the decrypted echo
//!   string is returned verbatim; unverified data is never echoed.
//! - POST delivery: the body carries the ciphertext (XML `<Encrypt>`
//!   element or JSON `encrypt` field), verified the same way, then
//!   decrypted. The recovered payload is XML; tag names are normalized
//!   to lower case before downstream nodes see it.
//!
//! Ciphertext framing is AES-256-GCM with a base64 key: `nonce (12
//! bytes) || ciphertext`, transported as base64.

use crate::adapter::{HookAdapter, HookOutcome, InboundRequest};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use loomcore::{TriggerMessage, VerifyError, WorkflowId};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const NONCE_SIZE: usize = 12;

pub struct SuiteAdapter {
    token: String,
    cipher: Aes256Gcm,
}

impl SuiteAdapter {
    /// `aes_key_b64` is the provider-issued base64 of a 32-byte key.
    pub fn new(token: impl Into<String>, aes_key_b64: &str) -> Result<Self, VerifyError> {
        let key = BASE64
            .decode(aes_key_b64)
            .map_err(|_| VerifyError::MalformedPayload("invalid AES key encoding".to_string()))?;
        let key: [u8; 32] = key
            .try_into()
            .map_err(|_| VerifyError::MalformedPayload("AES key must be 32 bytes".to_string()))?;
        Ok(Self {
            token: token.into(),
            cipher: Aes256Gcm::new(&key.into()),
        })
    }

    /// SHA-256 digest of the sorted (token, timestamp, nonce, data)
    /// tuple, hex-encoded. The sort makes the scheme order-independent
    /// on the wire.
    pub fn signature(&self, timestamp: &str, nonce: &str, data: &str) -> String {
        let mut parts = [self.token.as_str(), timestamp, nonce, data];
        parts.sort_unstable();
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        hex_encode(&hasher.finalize())
    }

    fn verify(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        data: &str,
    ) -> Result<(), VerifyError> {
        let expected = self.signature(timestamp, nonce, data);
        if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            Ok(())
        } else {
            Err(VerifyError::SignatureMismatch)
        }
    }

    fn decrypt(&self, ciphertext_b64: &str) -> Result<String, VerifyError> {
        let raw = BASE64
            .decode(ciphertext_b64.trim())
            .map_err(|_| VerifyError::DecryptionFailed)?;
        if raw.len() <= NONCE_SIZE {
            return Err(VerifyError::DecryptionFailed);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VerifyError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| VerifyError::DecryptionFailed)
    }

    /// Encrypt a plaintext the way the provider would. Used to produce
    /// outbound confirmations and test fixtures.
    pub fn seal(&self, plaintext: &str) -> Result<String, VerifyError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VerifyError::DecryptionFailed)?;
        let mut framed = nonce.to_vec();
        framed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(framed))
    }

    fn extract_ciphertext(req: &InboundRequest) -> Result<String, VerifyError> {
        let body = req.body_str()?;
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') {
            let json: Value = serde_json::from_str(trimmed)
                .map_err(|e| VerifyError::MalformedPayload(format!("invalid JSON body: {e}")))?;
            return json
                .get("encrypt")
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| VerifyError::MissingParameter("encrypt".to_string()));
        }
        let value = xml_to_value(body)?;
        value
            .get("encrypt")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| VerifyError::MissingParameter("Encrypt".to_string()))
    }
}

impl HookAdapter for SuiteAdapter {
    fn provider(&self) -> &str {
        "suite"
    }

    fn handle(
        &self,
        req: &InboundRequest,
        workflow_id: WorkflowId,
    ) -> Result<HookOutcome, VerifyError> {
        let signature = req.query("msg_signature")?;
        let timestamp = req.query("timestamp")?;
        let nonce = req.query("nonce")?;

        if req.method.eq_ignore_ascii_case("GET") {
            // Verification phase: echo the decrypted challenge verbatim.
            let echostr = req.query("echostr")?;
            self.verify(signature, timestamp, nonce, echostr)?;
            let echo = self.decrypt(echostr)?;
            return Ok(HookOutcome::Echo(echo));
        }

        // Delivery phase: verify, decrypt, normalize.
        let ciphertext = Self::extract_ciphertext(req)?;
        self.verify(signature, timestamp, nonce, &ciphertext)?;
        let plaintext = self.decrypt(&ciphertext)?;
        let body = xml_to_value(&plaintext)?;

        Ok(HookOutcome::Trigger(TriggerMessage {
            workflow_id,
            method: req.method.to_ascii_uppercase(),
            url: req.path.clone(),
            query: req.query.clone(),
            body,
        }))
    }
}

/// Parse an XML document into a JSON value, normalizing every tag name
/// to lower case. Leaf elements become strings; repeated sibling tags
/// collapse into arrays.
pub fn xml_to_value(xml: &str) -> Result<Value, VerifyError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // Stack frame per open element: (tag, children, text).
    let mut stack: Vec<(String, Map<String, Value>, String)> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let tag = String::from_utf8_lossy(start.name().as_ref()).to_lowercase();
                stack.push((tag, Map::new(), String::new()));
            }
            Ok(Event::Text(text)) => {
                if let Some((_, _, buf)) = stack.last_mut() {
                    let decoded = text
                        .xml_content()
                        .map_err(|e| VerifyError::MalformedPayload(e.to_string()))?;
                    buf.push_str(&decoded);
                }
            }
            Ok(Event::CData(cdata)) => {
                if let Some((_, _, buf)) = stack.last_mut() {
                    buf.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Ok(Event::End(_)) => {
                let (tag, children, text) = stack
                    .pop()
                    .ok_or_else(|| VerifyError::MalformedPayload("unbalanced XML".to_string()))?;
                let value = if children.is_empty() {
                    Value::String(text)
                } else {
                    Value::Object(children)
                };
                match stack.last_mut() {
                    Some((_, parent, _)) => insert_child(parent, tag, value),
                    None => root = Some(value),
                }
            }
            Ok(Event::Empty(start)) => {
                let tag = String::from_utf8_lossy(start.name().as_ref()).to_lowercase();
                match stack.last_mut() {
                    Some((_, parent, _)) => insert_child(parent, tag, Value::String(String::new())),
                    None => root = Some(Value::String(String::new())),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(VerifyError::MalformedPayload(format!("invalid XML: {e}"))),
        }
    }

    if !stack.is_empty() {
        return Err(VerifyError::MalformedPayload("unbalanced XML".to_string()));
    }
    root.ok_or_else(|| VerifyError::MalformedPayload("empty XML document".to_string()))
}

fn insert_child(parent: &mut Map<String, Value>, tag: String, value: Value) {
    match parent.get_mut(&tag) {
        None => {
            parent.insert(tag, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time byte comparison (XOR-based).
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::HookOutcome;
    use std::collections::HashMap;
    use uuid::Uuid;

    const KEY_B64: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8="; // 0x00..0x1f

    fn adapter() -> SuiteAdapter {
        SuiteAdapter::new("callback-token", KEY_B64).unwrap()
    }

    fn get_request(adapter: &SuiteAdapter, echo_plain: &str, tamper: bool) -> InboundRequest {
        let echostr = adapter.seal(echo_plain).unwrap();
        let mut signature = adapter.signature("1700000000", "nonce1", &echostr);
        if tamper {
            let flipped = if signature.starts_with('0') { '1' } else { '0' };
            signature.replace_range(0..1, &flipped.to_string());
        }
        let mut query = HashMap::new();
        query.insert("msg_signature".to_string(), signature);
        query.insert("timestamp".to_string(), "1700000000".to_string());
        query.insert("nonce".to_string(), "nonce1".to_string());
        query.insert("echostr".to_string(), echostr);
        InboundRequest {
            method: "GET".to_string(),
            path: "/api/hooks/x".to_string(),
            query,
            headers: HashMap::new(),
            body: Vec::new(),
            content_type: None,
        }
    }

    #[test]
    fn verification_echo_round_trips_byte_exact() {
        let adapter = adapter();
        let challenge = "随机 echo ¿challenge? 42";
        let req = get_request(&adapter, challenge, false);
        match adapter.handle(&req, Uuid::new_v4()).unwrap() {
            HookOutcome::Echo(echo) => assert_eq!(echo, challenge),
            HookOutcome::Trigger(_) => panic!("GET phase must echo"),
        }
    }

    #[test]
    fn invalid_signature_never_returns_echo() {
        let adapter = adapter();
        let req = get_request(&adapter, "secret echo", true);
        let err = adapter.handle(&req, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, VerifyError::SignatureMismatch));
    }

    #[test]
    fn delivery_verifies_decrypts_and_normalizes_tags() {
        let adapter = adapter();
        let plaintext =
            "<xml><ToUser>alice</ToUser><MsgType>text</MsgType><Content>hi</Content></xml>";
        let encrypt = adapter.seal(plaintext).unwrap();
        let signature = adapter.signature("1700000001", "n2", &encrypt);

        let mut query = HashMap::new();
        query.insert("msg_signature".to_string(), signature);
        query.insert("timestamp".to_string(), "1700000001".to_string());
        query.insert("nonce".to_string(), "n2".to_string());

        let body = format!("<xml><Encrypt>{encrypt}</Encrypt></xml>");
        let req = InboundRequest {
            method: "POST".to_string(),
            path: "/api/hooks/x".to_string(),
            query,
            headers: HashMap::new(),
            body: body.into_bytes(),
            content_type: Some("text/xml".to_string()),
        };

        match adapter.handle(&req, Uuid::new_v4()).unwrap() {
            HookOutcome::Trigger(trigger) => {
                assert_eq!(trigger.body["touser"], "alice");
                assert_eq!(trigger.body["msgtype"], "text");
                assert_eq!(trigger.body["content"], "hi");
            }
            HookOutcome::Echo(_) => panic!("POST phase must deliver"),
        }
    }

    #[test]
    fn tampered_delivery_is_rejected() {
        let adapter = adapter();
        let encrypt = adapter.seal("<xml><A>1</A></xml>").unwrap();
        let signature = adapter.signature("1700000002", "n3", &encrypt);

        let mut query = HashMap::new();
        query.insert("msg_signature".to_string(), signature);
        query.insert("timestamp".to_string(), "1700000002".to_string());
        // The nonce the signature was computed over does not match.
        query.insert("nonce".to_string(), "other-nonce".to_string());

        let body = format!("<xml><Encrypt>{encrypt}</Encrypt></xml>");
        let req = InboundRequest {
            method: "POST".to_string(),
            path: "/api/hooks/x".to_string(),
            query,
            headers: HashMap::new(),
            body: body.into_bytes(),
            content_type: Some("text/xml".to_string()),
        };

        assert!(matches!(
            adapter.handle(&req, Uuid::new_v4()),
            Err(VerifyError::SignatureMismatch)
        ));
    }

    #[test]
    fn missing_parameters_are_rejected() {
        let adapter = adapter();
        let req = InboundRequest {
            method: "GET".to_string(),
            path: "/api/hooks/x".to_string(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            content_type: None,
        };
        assert!(matches!(
            adapter.handle(&req, Uuid::new_v4()),
            Err(VerifyError::MissingParameter(_))
        ));
    }

    #[test]
    fn garbled_ciphertext_fails_decryption() {
        let adapter = adapter();
        assert!(matches!(
            adapter.decrypt("bm90IHJlYWwgY2lwaGVydGV4dA=="),
            Err(VerifyError::DecryptionFailed)
        ));
        assert!(matches!(
            adapter.decrypt("!!!"),
            Err(VerifyError::DecryptionFailed)
        ));
    }

    #[test]
    fn xml_repeated_tags_become_arrays() {
        let value =
            xml_to_value("<xml><Item>a</Item><Item>b</Item><N>1</N></xml>").unwrap();
        assert_eq!(value["item"], serde_json::json!(["a", "b"]));
        assert_eq!(value["n"], "1");
    }

    #[test]
    fn xml_nested_elements_and_cdata() {
        let value = xml_to_value(
            "<xml><User><Name><![CDATA[李雷]]></Name><Id>7</Id></User></xml>",
        )
        .unwrap();
        assert_eq!(value["user"]["name"], "李雷");
        assert_eq!(value["user"]["id"], "7");
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(xml_to_value("<xml><Open></xml>").is_err());
        assert!(xml_to_value("").is_err());
    }
}
