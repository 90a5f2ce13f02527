//! Minimal extension host side of the channel.
//!
//! `StubExtensionHostService` keeps extension bookkeeping, answers activation
//! requests by reporting back to the main side, and serves the latency probe.
//! It does not load extension code.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use exthost_rpc::{
    arg, ext_host_context, main_context, ChannelTransport, MessagePassingProtocol, RpcError,
    RpcHandler, RpcProtocol, RpcProxy,
};
use exthost_treeview::{ExtHostTreeViews, RpcMainThreadTreeViews};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::error::HostError;
use crate::extensions::{ExtensionDescriptionDelta, ExtensionHostExtensions, ExtensionIdentifier};
use crate::handshake::{remote_handshake, TerminationAwareTransport};
use crate::proxy::{
    remote_authority_prefix, ActivationKind, ExtensionActivationReason,
    RemoteAuthorityResolverErrorCode, ResolveAuthorityError, ResolveAuthorityResult,
};
use crate::worker_host::WorkerSetup;

pub struct StubExtensionHostService {
    main: RpcProxy,
    extensions: Mutex<ExtensionHostExtensions>,
    activated: Mutex<FxHashSet<ExtensionIdentifier>>,
    environment: Mutex<BTreeMap<String, Option<String>>>,
}

impl StubExtensionHostService {
    #[must_use]
    pub fn new(rpc: &RpcProtocol) -> Arc<Self> {
        Arc::new(Self {
            main: rpc.get_proxy(main_context::MAIN_THREAD_EXTENSION_SERVICE),
            extensions: Mutex::new(ExtensionHostExtensions::new()),
            activated: Mutex::new(FxHashSet::default()),
            environment: Mutex::new(BTreeMap::new()),
        })
    }

    #[must_use]
    pub fn my_extensions(&self) -> Vec<ExtensionIdentifier> {
        self.extensions.lock().my_extensions()
    }

    #[must_use]
    pub fn environment(&self) -> BTreeMap<String, Option<String>> {
        self.environment.lock().clone()
    }

    /// Reports `extension` as activated once. Returns whether it ran now.
    async fn activate_extension(
        &self,
        extension: &ExtensionIdentifier,
        reason: &ExtensionActivationReason,
    ) -> Result<bool, RpcError> {
        if !self.activated.lock().insert(extension.clone()) {
            return Ok(false);
        }
        let id = serde_json::to_value(extension)?;
        self.main
            .call("$onWillActivateExtension", vec![id.clone()])
            .await?;
        self.main
            .call(
                "$onDidActivateExtension",
                vec![
                    id,
                    json!(0.0),
                    json!(0.0),
                    json!(0.0),
                    serde_json::to_value(reason)?,
                ],
            )
            .await?;
        Ok(true)
    }

    async fn activate_by_event(
        &self,
        activation_event: &str,
        kind: ActivationKind,
    ) -> Result<(), RpcError> {
        let matching: Vec<ExtensionIdentifier> = {
            let extensions = self.extensions.lock();
            let mine = extensions.my_extensions();
            extensions
                .all_extensions()
                .into_iter()
                .filter(|extension| mine.contains(&extension.identifier))
                .filter(|extension| {
                    extension
                        .activation_events
                        .iter()
                        .any(|event| event == "*" || event == activation_event)
                })
                .map(|extension| extension.identifier)
                .collect()
        };
        debug!(
            "{activation_event} ({kind:?}) activates {} extension(s)",
            matching.len()
        );
        for extension in matching {
            let reason = ExtensionActivationReason {
                startup: false,
                extension_id: extension.clone(),
                activation_event: activation_event.to_string(),
            };
            self.activate_extension(&extension, &reason).await?;
        }
        Ok(())
    }

    fn apply_delta(&self, args: &[Value], method: &str) -> Result<(), RpcError> {
        let delta: ExtensionDescriptionDelta = arg(method, args, 0)?;
        let mut extensions = self.extensions.lock();
        extensions.delta(&delta);
        info!(
            "{method}: running {} extension(s)",
            extensions.my_extensions().len()
        );
        Ok(())
    }
}

#[async_trait]
impl RpcHandler for StubExtensionHostService {
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        _token: CancellationToken,
    ) -> Result<Value, RpcError> {
        match method {
            "$startExtensionHost" | "$deltaExtensions" => {
                self.apply_delta(&args, method)?;
                Ok(Value::Null)
            }
            "$activateByEvent" => {
                let activation_event: String = arg(method, &args, 0)?;
                let kind: ActivationKind = arg(method, &args, 1)?;
                self.activate_by_event(&activation_event, kind).await?;
                Ok(Value::Null)
            }
            "$activate" => {
                let extension: ExtensionIdentifier = arg(method, &args, 0)?;
                let reason: ExtensionActivationReason = arg(method, &args, 1)?;
                if !self.extensions.lock().contains_extension(&extension) {
                    return Ok(Value::Bool(false));
                }
                self.activate_extension(&extension, &reason).await?;
                Ok(Value::Bool(true))
            }
            "$resolveAuthority" => {
                let authority: String = arg(method, &args, 0)?;
                let result = ResolveAuthorityResult::Error {
                    error: ResolveAuthorityError {
                        message: Some(format!(
                            "No remote extension installed to resolve {}.",
                            remote_authority_prefix(&authority)
                        )),
                        code: RemoteAuthorityResolverErrorCode::NoResolverFound,
                        detail: None,
                    },
                };
                Ok(serde_json::to_value(result)?)
            }
            "$getCanonicalURI" => Ok(Value::Null),
            "$extensionTestsExecute" => Ok(json!(0)),
            "$setRemoteEnvironment" => {
                let env: BTreeMap<String, Option<String>> = arg(method, &args, 0)?;
                self.environment.lock().extend(env);
                Ok(Value::Null)
            }
            "$test_latency" => {
                let n: u32 = arg(method, &args, 0)?;
                Ok(json!(n))
            }
            "$test_up" => {
                let payload: String = arg(method, &args, 0)?;
                Ok(json!(payload.len()))
            }
            "$test_down" => {
                let size: usize = arg(method, &args, 0)?;
                Ok(Value::String("x".repeat(size)))
            }
            other => Err(RpcError::UnknownMethod {
                actor: ext_host_context::EXT_HOST_EXTENSION_SERVICE.sid.to_string(),
                method: other.to_string(),
            }),
        }
    }
}

/// Registers every extension host side identifier on `transport`.
pub fn bind_stub(
    transport: Arc<dyn MessagePassingProtocol>,
    config: &ManagerConfig,
) -> Result<(RpcProtocol, Arc<StubExtensionHostService>), RpcError> {
    let rpc = RpcProtocol::new(transport, config.rpc.options(), None);
    let service = StubExtensionHostService::new(&rpc);
    rpc.set(ext_host_context::EXT_HOST_EXTENSION_SERVICE, service.clone());
    let main_tree_views =
        RpcMainThreadTreeViews::new(rpc.get_proxy(main_context::MAIN_THREAD_TREE_VIEWS));
    let tree_views =
        ExtHostTreeViews::new(Arc::new(main_tree_views), config.tree.refresh_debounce);
    rpc.set(ext_host_context::EXT_HOST_TREE_VIEWS, tree_views);
    if let Err(err) = rpc.assert_registered(ext_host_context::ALL) {
        rpc.dispose();
        return Err(err);
    }
    Ok((rpc, service))
}

/// Remote side for a [`WorkerExtensionHost`](crate::worker_host::WorkerExtensionHost).
#[must_use]
pub fn stub_worker_setup(config: ManagerConfig) -> WorkerSetup {
    Arc::new(move |transport: ChannelTransport| {
        bind_stub(Arc::new(transport), &config)
            .map(|(rpc, _)| rpc)
            .map_err(|err| HostError::Worker(err.to_string()))
    })
}

/// Runs the stub host over `transport` until the workbench sends `terminate`.
pub async fn serve<T: MessagePassingProtocol>(
    transport: T,
    config: &ManagerConfig,
) -> Result<(), HostError> {
    let init_data = remote_handshake(&transport, config.host.handshake_timeout).await?;
    debug!("extension host initialized with {init_data}");

    let transport = Arc::new(TerminationAwareTransport::new(transport));
    let terminated = transport.terminated();
    let (rpc, _service) = bind_stub(transport, config)?;
    info!("extension host ready");

    terminated.cancelled().await;
    info!("extension host terminating");
    rpc.drain().await;
    rpc.dispose();
    Ok(())
}
