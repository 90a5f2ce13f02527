use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of the boundary owns the object behind an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyKind {
    MainThread,
    ExtHost,
}

/// Statically known name of an object that can be called across the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyIdentifier {
    pub sid: &'static str,
    pub nid: u32,
    pub kind: ProxyKind,
}

impl ProxyIdentifier {
    #[must_use]
    pub const fn main_thread(sid: &'static str, nid: u32) -> Self {
        Self {
            sid,
            nid,
            kind: ProxyKind::MainThread,
        }
    }

    #[must_use]
    pub const fn ext_host(sid: &'static str, nid: u32) -> Self {
        Self {
            sid,
            nid,
            kind: ProxyKind::ExtHost,
        }
    }

    /// Looks up a known identifier by its numeric wire id.
    #[must_use]
    pub fn from_nid(nid: u32) -> Option<Self> {
        main_context::ALL
            .iter()
            .chain(ext_host_context::ALL.iter())
            .copied()
            .find(|id| id.nid == nid)
    }
}

impl std::fmt::Display for ProxyIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sid)
    }
}

/// Objects living on the workbench side, called by the extension host.
pub mod main_context {
    use super::ProxyIdentifier;

    pub const MAIN_THREAD_EXTENSION_SERVICE: ProxyIdentifier =
        ProxyIdentifier::main_thread("MainThreadExtensionService", 1);
    pub const MAIN_THREAD_TREE_VIEWS: ProxyIdentifier =
        ProxyIdentifier::main_thread("MainThreadTreeViews", 2);

    pub const ALL: &[ProxyIdentifier] = &[MAIN_THREAD_EXTENSION_SERVICE, MAIN_THREAD_TREE_VIEWS];
}

/// Objects living inside the extension host, called by the workbench.
pub mod ext_host_context {
    use super::ProxyIdentifier;

    pub const EXT_HOST_EXTENSION_SERVICE: ProxyIdentifier =
        ProxyIdentifier::ext_host("ExtHostExtensionService", 101);
    pub const EXT_HOST_TREE_VIEWS: ProxyIdentifier =
        ProxyIdentifier::ext_host("ExtHostTreeViews", 102);

    pub const ALL: &[ProxyIdentifier] = &[EXT_HOST_EXTENSION_SERVICE, EXT_HOST_TREE_VIEWS];
}

/// Wire envelope exchanged over a message passing protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RpcMessage {
    Request {
        req: u32,
        #[serde(rename = "rpcId")]
        rpc_id: u32,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Acknowledged {
        req: u32,
    },
    Cancel {
        req: u32,
    },
    ReplyOk {
        req: u32,
        #[serde(default)]
        result: Value,
    },
    ReplyErr {
        req: u32,
        error: RpcErrorPayload,
    },
}

impl RpcMessage {
    #[must_use]
    pub fn req(&self) -> u32 {
        match self {
            Self::Request { req, .. }
            | Self::Acknowledged { req }
            | Self::Cancel { req }
            | Self::ReplyOk { req, .. }
            | Self::ReplyErr { req, .. } => *req,
        }
    }
}

/// Structured error carried by `replyErr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcErrorPayload {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl RpcErrorPayload {
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            code: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Which side started the exchange a logged message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestInitiator {
    LocalSide,
    OtherSide,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_uses_camel_case_tags() {
        let message = RpcMessage::Request {
            req: 7,
            rpc_id: main_context::MAIN_THREAD_TREE_VIEWS.nid,
            method: "$refresh".to_string(),
            args: vec![json!("view")],
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"type": "request", "req": 7, "rpcId": 2, "method": "$refresh", "args": ["view"]})
        );
        let reply: RpcMessage =
            serde_json::from_value(json!({"type": "replyOk", "req": 7})).unwrap();
        assert_eq!(
            reply,
            RpcMessage::ReplyOk {
                req: 7,
                result: Value::Null
            }
        );
    }

    #[test]
    fn identifiers_are_unique_across_contexts() {
        let all: Vec<_> = main_context::ALL
            .iter()
            .chain(ext_host_context::ALL.iter())
            .collect();
        for (index, id) in all.iter().enumerate() {
            assert!(
                all[index + 1..].iter().all(|other| other.nid != id.nid),
                "duplicate nid {}",
                id.nid
            );
        }
        assert_eq!(
            ProxyIdentifier::from_nid(102),
            Some(ext_host_context::EXT_HOST_TREE_VIEWS)
        );
        assert_eq!(ProxyIdentifier::from_nid(9999), None);
    }
}
