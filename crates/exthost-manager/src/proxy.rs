//! Typed calls to the extension service running inside a host.

use std::collections::BTreeMap;

use exthost_rpc::{ext_host_context, RpcError, RpcProtocol, RpcProxy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::extensions::{ExtensionDescriptionDelta, ExtensionIdentifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivationKind {
    Normal,
    /// Must not wait for a host that is still starting.
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionActivationReason {
    pub startup: bool,
    pub extension_id: ExtensionIdentifier,
    pub activation_event: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteAuthorityResolverErrorCode {
    Unknown,
    NotAvailable,
    TemporarilyNotAvailable,
    NoResolverFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAuthority {
    pub authority: String,
    /// `host:port` to connect to.
    pub connect_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAuthorityValue {
    pub authority: ResolvedAuthority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveAuthorityError {
    pub message: Option<String>,
    pub code: RemoteAuthorityResolverErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// Outcome of resolving a remote authority.
///
/// Resolver errors and transport failures share the `Error` shape; the
/// latter always carry `RemoteAuthorityResolverErrorCode::Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResolveAuthorityResult {
    Ok { value: ResolvedAuthorityValue },
    Error { error: ResolveAuthorityError },
}

impl ResolveAuthorityResult {
    #[must_use]
    pub fn unknown(message: impl Into<String>, detail: Option<Value>) -> Self {
        Self::Error {
            error: ResolveAuthorityError {
                message: Some(message.into()),
                code: RemoteAuthorityResolverErrorCode::Unknown,
                detail,
            },
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Everything before the first `+` of a remote authority.
#[must_use]
pub fn remote_authority_prefix(authority: &str) -> &str {
    authority
        .split_once('+')
        .map_or(authority, |(prefix, _)| prefix)
}

/// Failure detail attached to `Unknown` resolver errors.
#[must_use]
pub fn error_detail(err: &RpcError) -> Value {
    serde_json::to_value(err.to_payload())
        .unwrap_or_else(|_| Value::String(err.to_string()))
}

#[derive(Clone)]
pub struct ExtensionHostProxy {
    proxy: RpcProxy,
}

impl ExtensionHostProxy {
    #[must_use]
    pub fn new(rpc: &RpcProtocol) -> Self {
        Self {
            proxy: rpc.get_proxy(ext_host_context::EXT_HOST_EXTENSION_SERVICE),
        }
    }

    pub async fn resolve_authority(
        &self,
        remote_authority: &str,
        resolve_attempt: u32,
    ) -> Result<ResolveAuthorityResult, RpcError> {
        self.proxy
            .call_typed(
                "$resolveAuthority",
                vec![json!(remote_authority), json!(resolve_attempt)],
            )
            .await
    }

    /// `None` when no resolver handles `remote_authority`.
    pub async fn get_canonical_uri(
        &self,
        remote_authority: &str,
        uri: &str,
    ) -> Result<Option<String>, RpcError> {
        self.proxy
            .call_typed("$getCanonicalURI", vec![json!(remote_authority), json!(uri)])
            .await
    }

    pub async fn start_extension_host(
        &self,
        delta: &ExtensionDescriptionDelta,
    ) -> Result<(), RpcError> {
        self.proxy
            .call("$startExtensionHost", vec![serde_json::to_value(delta)?])
            .await
            .map(drop)
    }

    pub async fn extension_tests_execute(&self) -> Result<i32, RpcError> {
        self.proxy.call_typed("$extensionTestsExecute", vec![]).await
    }

    pub async fn activate_by_event(
        &self,
        activation_event: &str,
        kind: ActivationKind,
    ) -> Result<(), RpcError> {
        self.proxy
            .call(
                "$activateByEvent",
                vec![json!(activation_event), serde_json::to_value(kind)?],
            )
            .await
            .map(drop)
    }

    pub async fn activate(
        &self,
        extension: &ExtensionIdentifier,
        reason: &ExtensionActivationReason,
    ) -> Result<bool, RpcError> {
        self.proxy
            .call_typed(
                "$activate",
                vec![serde_json::to_value(extension)?, serde_json::to_value(reason)?],
            )
            .await
    }

    pub async fn set_remote_environment(
        &self,
        env: &BTreeMap<String, Option<String>>,
    ) -> Result<(), RpcError> {
        self.proxy
            .call("$setRemoteEnvironment", vec![serde_json::to_value(env)?])
            .await
            .map(drop)
    }

    pub async fn delta_extensions(
        &self,
        delta: &ExtensionDescriptionDelta,
    ) -> Result<(), RpcError> {
        self.proxy
            .call("$deltaExtensions", vec![serde_json::to_value(delta)?])
            .await
            .map(drop)
    }

    pub async fn test_latency(&self, n: u32) -> Result<u32, RpcError> {
        self.proxy.call_typed("$test_latency", vec![json!(n)]).await
    }

    /// Uploads `payload` and returns the byte count the host received.
    pub async fn test_up(&self, payload: String) -> Result<usize, RpcError> {
        self.proxy.call_typed("$test_up", vec![Value::String(payload)]).await
    }

    /// Downloads `size` bytes from the host.
    pub async fn test_down(&self, size: usize) -> Result<String, RpcError> {
        self.proxy.call_typed("$test_down", vec![json!(size)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_prefix_stops_at_plus() {
        assert_eq!(remote_authority_prefix("ssh-remote+my-box"), "ssh-remote");
        assert_eq!(remote_authority_prefix("wsl"), "wsl");
    }

    #[test]
    fn resolve_result_wire_shape() {
        let err = ResolveAuthorityResult::unknown("Cannot resolve authority", None);
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"type": "error", "error": {"message": "Cannot resolve authority", "code": "Unknown"}})
        );
        let ok: ResolveAuthorityResult = serde_json::from_value(json!({
            "type": "ok",
            "value": {"authority": {"authority": "test+a", "connectTo": "localhost:8000"}}
        }))
        .unwrap();
        assert!(ok.is_ok());
    }
}
