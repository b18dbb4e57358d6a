//! Wire types of the action control protocol (`/init`, `/run`).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::descriptor::{ActionCode, ActionDescriptor};

/// Port the action runtime listens on inside its container.
pub const RUNTIME_PORT: u16 = 8080;

/// Placeholder for protocol fields that have no local meaning.
const LOCAL: &str = "local";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitValue {
    pub binary: bool,
    pub main: String,
    pub code: String,
}

/// Body of `POST /init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitRequest {
    pub value: InitValue,
}

impl InitRequest {
    pub fn for_action(action: &ActionDescriptor) -> Self {
        let code = match &action.code {
            ActionCode::Binary(bytes) => STANDARD.encode(bytes),
            ActionCode::Script(source) => source.clone(),
        };
        Self {
            value: InitValue {
                binary: action.code.is_binary(),
                main: action.main.clone(),
                code,
            },
        }
    }
}

/// Response of `POST /init`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitResponse {
    #[serde(rename = "OK", default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// Body of `POST /run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub value: serde_json::Value,
    pub action_name: String,
    pub activation_id: String,
    /// Epoch milliseconds, as a string.
    pub deadline: String,
    // required by the protocol, unused locally
    pub api_host: String,
    pub api_key: String,
    pub namespace: String,
    pub allow_concurrent: String,
}

impl RunRequest {
    pub fn new(action: &ActionDescriptor, params: serde_json::Value, now_ms: i64) -> Self {
        Self {
            value: params,
            action_name: action.name.clone(),
            activation_id: uuid::Uuid::new_v4().simple().to_string(),
            deadline: (now_ms + action.limits.timeout_ms as i64).to_string(),
            api_host: LOCAL.to_string(),
            api_key: LOCAL.to_string(),
            namespace: LOCAL.to_string(),
            allow_concurrent: "true".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binary_code_is_base64() {
        let action =
            ActionDescriptor::new("worker", ActionCode::Binary(b"PK\x03\x04".to_vec())).unwrap();
        let init = InitRequest::for_action(&action);
        assert!(init.value.binary);
        assert_eq!(init.value.code, "UEsDBA==");
        assert_eq!(init.value.main, "main");
    }

    #[test]
    fn test_script_code_is_plain_text() {
        let action =
            ActionDescriptor::new("worker", ActionCode::Script("exports.main = x".into())).unwrap();
        let body = serde_json::to_value(InitRequest::for_action(&action)).unwrap();
        assert_eq!(
            body,
            json!({"value": {"binary": false, "main": "main", "code": "exports.main = x"}})
        );
    }

    #[test]
    fn test_init_response_ok_flag() {
        let ok: InitResponse = serde_json::from_value(json!({"OK": true})).unwrap();
        assert_eq!(ok.ok, Some(true));
        let err: InitResponse = serde_json::from_value(json!({"error": "bad zip"})).unwrap();
        assert_eq!(err.ok, None);
        assert_eq!(err.error, Some(json!("bad zip")));
    }

    #[test]
    fn test_run_request_fields() {
        let action = ActionDescriptor::new("worker", ActionCode::Script("x".into()))
            .unwrap()
            .with_limits(5_000, 0);
        let req = RunRequest::new(&action, json!({"source": "file.jpg"}), 1_000);
        assert_eq!(req.deadline, "6000");
        assert_eq!(req.action_name, "worker");
        assert_eq!(req.activation_id.len(), 32);
        assert_eq!(req.api_host, "local");
        assert_eq!(req.allow_concurrent, "true");
    }
}
