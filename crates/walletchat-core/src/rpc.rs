//! JSON-RPC payloads exchanged over the relay.
//!
//! The chat protocol speaks four methods. Each is modelled as a [`ChatMethod`]
//! variant so the router can match exhaustively instead of dispatching on
//! strings. Every method carries fixed publish options (tag, TTL, prompt) for
//! its request and its response.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatError, ChatResult};

const ONE_DAY_SECS: u64 = 24 * 60 * 60;
const THIRTY_SECONDS: u64 = 30;

pub const JSONRPC_VERSION: &str = "2.0";

/// The closed set of chat RPC methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatMethod {
    #[serde(rename = "wc_chatInvite")]
    Invite,
    #[serde(rename = "wc_chatMessage")]
    Message,
    #[serde(rename = "wc_chatLeave")]
    Leave,
    #[serde(rename = "wc_chatPing")]
    Ping,
}

impl ChatMethod {
    pub const ALL: [ChatMethod; 4] = [
        ChatMethod::Invite,
        ChatMethod::Message,
        ChatMethod::Leave,
        ChatMethod::Ping,
    ];

    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMethod::Invite => "wc_chatInvite",
            ChatMethod::Message => "wc_chatMessage",
            ChatMethod::Leave => "wc_chatLeave",
            ChatMethod::Ping => "wc_chatPing",
        }
    }

    /// Parse a wire method name.
    ///
    /// Returns `UnsupportedMethod` for anything outside the chat protocol.
    pub fn from_method(method: &str) -> ChatResult<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == method)
            .ok_or_else(|| ChatError::UnsupportedMethod(method.to_string()))
    }

    /// Publish options for a request of this method.
    pub fn request_options(&self) -> PublishOptions {
        match self {
            ChatMethod::Invite => PublishOptions::new(2000, ONE_DAY_SECS, true),
            ChatMethod::Message => PublishOptions::new(2002, ONE_DAY_SECS, true),
            ChatMethod::Leave => PublishOptions::new(2004, ONE_DAY_SECS, true),
            ChatMethod::Ping => PublishOptions::new(2006, THIRTY_SECONDS, false),
        }
    }

    /// Publish options for a response to this method.
    pub fn response_options(&self) -> PublishOptions {
        match self {
            ChatMethod::Invite => PublishOptions::new(2001, ONE_DAY_SECS, false),
            ChatMethod::Message => PublishOptions::new(2003, ONE_DAY_SECS, false),
            ChatMethod::Leave => PublishOptions::new(2005, ONE_DAY_SECS, false),
            ChatMethod::Ping => PublishOptions::new(2007, THIRTY_SECONDS, false),
        }
    }
}

impl std::fmt::Display for ChatMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay publish options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    pub tag: u32,
    /// Seconds the relay keeps the message for offline subscribers.
    pub ttl: u64,
    /// Whether the receiving wallet should prompt the user.
    pub prompt: bool,
}

impl PublishOptions {
    pub const fn new(tag: u32, ttl: u64, prompt: bool) -> Self {
        Self { tag, ttl, prompt }
    }
}

/// JSON-RPC error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: i64,
    pub message: String,
}

impl ErrorResponse {
    pub const USER_REJECTED: i64 = 5000;
    pub const USER_DISCONNECTED: i64 = 6000;
    pub const UNAUTHORIZED: i64 = 3000;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const USER_REJECTED_MESSAGE: &'static str = "User rejected.";
    pub const USER_DISCONNECTED_MESSAGE: &'static str = "User disconnected.";

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The invitee declined the invite.
    pub fn user_rejected() -> Self {
        Self::new(Self::USER_REJECTED, Self::USER_REJECTED_MESSAGE)
    }

    /// The peer left the thread.
    pub fn user_disconnected() -> Self {
        Self::new(Self::USER_DISCONNECTED, Self::USER_DISCONNECTED_MESSAGE)
    }

    pub fn is_user_rejected(&self) -> bool {
        self.message == Self::USER_REJECTED_MESSAGE
    }
}

/// Generate a JSON-RPC id: milliseconds since epoch scaled by 1000 plus
/// three random digits.
pub fn payload_id() -> u64 {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let extra: u64 = rand::rng().random_range(0..1000);
    millis * 1000 + extra
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new<P: Serialize>(method: ChatMethod, params: &P) -> ChatResult<Self> {
        Ok(Self {
            id: payload_id(),
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.as_str().to_string(),
            params: serde_json::to_value(params)?,
        })
    }

    /// Typed view of `params`.
    pub fn params<P: for<'de> Deserialize<'de>>(&self) -> ChatResult<P> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| ChatError::InvalidParams(format!("{}: {}", self.method, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResult {
    pub id: u64,
    pub jsonrpc: String,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub id: u64,
    pub jsonrpc: String,
    pub error: ErrorResponse,
}

/// Either half of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponse {
    Result(JsonRpcResult),
    Error(JsonRpcError),
}

impl JsonRpcResponse {
    pub fn result<R: Serialize>(id: u64, result: &R) -> ChatResult<Self> {
        Ok(JsonRpcResponse::Result(JsonRpcResult {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: serde_json::to_value(result)?,
        }))
    }

    pub fn error(id: u64, error: ErrorResponse) -> Self {
        JsonRpcResponse::Error(JsonRpcError {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            error,
        })
    }

    pub fn id(&self) -> u64 {
        match self {
            JsonRpcResponse::Result(r) => r.id,
            JsonRpcResponse::Error(e) => e.id,
        }
    }

    /// Collapse into a `Result` over the success value and the error body.
    pub fn into_outcome(self) -> Result<Value, ErrorResponse> {
        match self {
            JsonRpcResponse::Result(r) => Ok(r.result),
            JsonRpcResponse::Error(e) => Err(e.error),
        }
    }
}

/// Anything that can arrive in a relay envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcPayload {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl JsonRpcPayload {
    pub fn id(&self) -> u64 {
        match self {
            JsonRpcPayload::Request(r) => r.id,
            JsonRpcPayload::Response(r) => r.id(),
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcPayload {
    fn from(request: JsonRpcRequest) -> Self {
        JsonRpcPayload::Request(request)
    }
}

impl From<JsonRpcResponse> for JsonRpcPayload {
    fn from(response: JsonRpcResponse) -> Self {
        JsonRpcPayload::Response(response)
    }
}

// ============================================================================
// Method params and results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteParams {
    pub invite_auth: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResult {
    pub response_auth: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageParams {
    pub message_auth: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResult {
    pub receipt_auth: String,
}

/// Params for leave and ping, which carry nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyParams {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_round_trip() {
        for method in ChatMethod::ALL {
            assert_eq!(ChatMethod::from_method(method.as_str()).unwrap(), method);
        }
    }

    #[test]
    fn test_unknown_method() {
        let err = ChatMethod::from_method("wc_sessionPing").unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedMethod(m) if m == "wc_sessionPing"));
    }

    #[test]
    fn test_publish_options() {
        assert_eq!(
            ChatMethod::Invite.request_options(),
            PublishOptions::new(2000, ONE_DAY_SECS, true)
        );
        assert_eq!(ChatMethod::Leave.response_options().tag, 2005);
        let ping = ChatMethod::Ping.request_options();
        assert_eq!(ping.tag, 2006);
        assert_eq!(ping.ttl, 30);
        assert!(!ping.prompt);
    }

    #[test]
    fn test_payload_id_is_time_scaled() {
        let before = chrono::Utc::now().timestamp_millis() as u64 * 1000;
        let id = payload_id();
        assert!(id >= before);
        assert!(id < before + 10_000_000);
    }

    #[test]
    fn test_payload_classification() {
        let request = JsonRpcRequest::new(ChatMethod::Ping, &EmptyParams::default()).unwrap();
        let json = serde_json::to_string(&JsonRpcPayload::from(request.clone())).unwrap();
        let parsed: JsonRpcPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JsonRpcPayload::Request(request));

        let json = r#"{"id":7,"jsonrpc":"2.0","result":true}"#;
        let parsed: JsonRpcPayload = serde_json::from_str(json).unwrap();
        assert!(matches!(
            parsed,
            JsonRpcPayload::Response(JsonRpcResponse::Result(ref r)) if r.result == Value::Bool(true)
        ));

        let json = r#"{"id":7,"jsonrpc":"2.0","error":{"code":5000,"message":"User rejected."}}"#;
        let parsed: JsonRpcPayload = serde_json::from_str(json).unwrap();
        match parsed {
            JsonRpcPayload::Response(response) => {
                assert_eq!(response.id(), 7);
                let err = response.into_outcome().unwrap_err();
                assert!(err.is_user_rejected());
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_typed_params() {
        let request = JsonRpcRequest::new(
            ChatMethod::Invite,
            &InviteParams {
                invite_auth: "a.b.c".to_string(),
            },
        )
        .unwrap();
        assert_eq!(request.params["inviteAuth"], "a.b.c");
        let params: InviteParams = request.params().unwrap();
        assert_eq!(params.invite_auth, "a.b.c");

        let bad: ChatResult<MessageParams> = request.params();
        assert!(matches!(bad, Err(ChatError::InvalidParams(_))));
    }
}
