use dashmap::DashMap;
use loomcore::{TriggerMessage, VerifyError, WorkflowId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// An inbound HTTP-shaped message, before any provider processing.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names lower-cased at construction.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl InboundRequest {
    pub fn query(&self, name: &str) -> Result<&str, VerifyError> {
        self.query
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| VerifyError::MissingParameter(name.to_string()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_str(&self) -> Result<&str, VerifyError> {
        std::str::from_utf8(&self.body)
            .map_err(|_| VerifyError::MalformedPayload("body is not UTF-8".to_string()))
    }

    fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }

    /// Parse the body by content type: JSON structurally, anything else
    /// as raw text. GET and DELETE read no body.
    pub fn parse_body(&self) -> Result<Value, VerifyError> {
        match self.method.to_ascii_uppercase().as_str() {
            "GET" | "DELETE" => Ok(Value::Null),
            _ if self.body.is_empty() => Ok(Value::Null),
            _ if self.is_json() => serde_json::from_slice(&self.body)
                .map_err(|e| VerifyError::MalformedPayload(format!("invalid JSON body: {e}"))),
            _ => Ok(Value::String(self.body_str()?.to_string())),
        }
    }
}

/// What handling an inbound request produced.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// GET verification phase: return this string verbatim as the HTTP
    /// response body. The provider's protocol requires a byte-exact echo.
    Echo(String),
    /// Delivery phase: hand this trigger to the mediator.
    Trigger(TriggerMessage),
}

/// Provider strategy: every provider shares the two-phase shape but
/// brings its own signature and decryption scheme.
pub trait HookAdapter: Send + Sync {
    fn provider(&self) -> &str;

    fn handle(
        &self,
        req: &InboundRequest,
        workflow_id: WorkflowId,
    ) -> Result<HookOutcome, VerifyError>;
}

/// The inbound method must match the webhook action's configured method.
pub fn check_method(expected: &str, got: &str) -> Result<(), VerifyError> {
    if expected.eq_ignore_ascii_case(got) {
        Ok(())
    } else {
        Err(VerifyError::MethodMismatch {
            got: got.to_ascii_uppercase(),
            want: expected.to_ascii_uppercase(),
        })
    }
}

/// No handshake, no crypto: body parsed by content type.
pub struct PlainAdapter;

impl HookAdapter for PlainAdapter {
    fn provider(&self) -> &str {
        "plain"
    }

    fn handle(
        &self,
        req: &InboundRequest,
        workflow_id: WorkflowId,
    ) -> Result<HookOutcome, VerifyError> {
        Ok(HookOutcome::Trigger(TriggerMessage {
            workflow_id,
            method: req.method.to_ascii_uppercase(),
            url: req.path.clone(),
            query: req.query.clone(),
            body: req.parse_body()?,
        }))
    }
}

/// Routing table from provider key to adapter, read-mostly after boot.
pub struct AdapterSet {
    adapters: DashMap<String, Arc<dyn HookAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        let set = Self {
            adapters: DashMap::new(),
        };
        set.register(Arc::new(PlainAdapter));
        set
    }

    pub fn register(&self, adapter: Arc<dyn HookAdapter>) {
        tracing::info!(provider = adapter.provider(), "registering hook adapter");
        self.adapters
            .insert(adapter.provider().to_string(), adapter);
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn HookAdapter>, VerifyError> {
        self.adapters
            .get(provider)
            .map(|a| a.value().clone())
            .ok_or_else(|| VerifyError::UnknownProvider(provider.to_string()))
    }
}

impl Default for AdapterSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn request(method: &str, content_type: Option<&str>, body: &[u8]) -> InboundRequest {
        InboundRequest {
            method: method.to_string(),
            path: "/api/hooks/test".to_string(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: body.to_vec(),
            content_type: content_type.map(String::from),
        }
    }

    #[test]
    fn method_match_is_case_insensitive() {
        assert!(check_method("POST", "post").is_ok());
        assert!(check_method("post", "POST").is_ok());
    }

    #[test]
    fn method_mismatch_is_rejected() {
        let err = check_method("POST", "PUT").unwrap_err();
        assert!(matches!(err, VerifyError::MethodMismatch { .. }));
    }

    #[test]
    fn json_body_parses_structurally() {
        let req = request("POST", Some("application/json"), br#"{"a": 1}"#);
        assert_eq!(req.parse_body().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn invalid_json_body_is_rejected() {
        let req = request("POST", Some("application/json"), b"{nope");
        assert!(req.parse_body().is_err());
    }

    #[test]
    fn text_body_passes_through_raw() {
        let req = request("POST", Some("text/plain"), b"hello");
        assert_eq!(req.parse_body().unwrap(), json!("hello"));
    }

    #[test]
    fn get_and_delete_read_no_body() {
        let req = request("GET", Some("application/json"), br#"{"a": 1}"#);
        assert_eq!(req.parse_body().unwrap(), Value::Null);
        let req = request("DELETE", None, b"ignored");
        assert_eq!(req.parse_body().unwrap(), Value::Null);
    }

    #[test]
    fn plain_adapter_builds_trigger() {
        let wf = Uuid::new_v4();
        let mut req = request("POST", Some("application/json"), br#"{"k": "v"}"#);
        req.query.insert("x".to_string(), "1".to_string());

        let outcome = PlainAdapter.handle(&req, wf).unwrap();
        match outcome {
            HookOutcome::Trigger(t) => {
                assert_eq!(t.workflow_id, wf);
                assert_eq!(t.method, "POST");
                assert_eq!(t.body, json!({"k": "v"}));
                assert_eq!(t.query.get("x").map(String::as_str), Some("1"));
            }
            HookOutcome::Echo(_) => panic!("plain adapter never echoes"),
        }
    }

    #[test]
    fn adapter_set_rejects_unknown_provider() {
        let set = AdapterSet::new();
        assert!(set.get("plain").is_ok());
        assert!(matches!(
            set.get("nope"),
            Err(VerifyError::UnknownProvider(_))
        ));
    }
}
