//! Main-side extension service customer.
//!
//! The host reports activation progress and asks the workbench to activate
//! other extensions through `MainThreadExtensionService`.

use std::sync::Arc;

use async_trait::async_trait;
use exthost_rpc::{
    arg, main_context, Customer, CustomerContext, CustomerRegistry, RpcError, RpcErrorPayload,
    RpcHandler,
};
use exthost_treeview::{MainThreadTreeViews, TreeViewSink};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::extensions::ExtensionIdentifier;
use crate::proxy::ExtensionActivationReason;

/// Timings reported with `$onDidActivateExtension`, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActivationTimes {
    pub code_loading_time: f64,
    pub activate_call_time: f64,
    pub activate_resolved_time: f64,
}

/// Workbench-side extension service the customer reports into.
#[async_trait]
pub trait InternalExtensionService: Send + Sync {
    async fn activate_by_id(
        &self,
        extension: ExtensionIdentifier,
        reason: ExtensionActivationReason,
    ) -> Result<(), RpcError>;

    fn on_will_activate_extension(&self, extension: &ExtensionIdentifier);

    fn on_did_activate_extension(
        &self,
        extension: &ExtensionIdentifier,
        times: ActivationTimes,
        reason: &ExtensionActivationReason,
    );

    fn on_extension_activation_error(
        &self,
        extension: &ExtensionIdentifier,
        error: &RpcErrorPayload,
    );

    fn on_extension_runtime_error(&self, extension: &ExtensionIdentifier, error: &RpcErrorPayload);
}

/// Logs every report and remembers which extensions finished activating.
#[derive(Default)]
pub struct TracingExtensionService {
    activated: Mutex<Vec<ExtensionIdentifier>>,
}

impl TracingExtensionService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn activated(&self) -> Vec<ExtensionIdentifier> {
        self.activated.lock().clone()
    }
}

#[async_trait]
impl InternalExtensionService for TracingExtensionService {
    async fn activate_by_id(
        &self,
        extension: ExtensionIdentifier,
        reason: ExtensionActivationReason,
    ) -> Result<(), RpcError> {
        info!(
            "activation of {extension} requested by the host ({})",
            reason.activation_event
        );
        Ok(())
    }

    fn on_will_activate_extension(&self, extension: &ExtensionIdentifier) {
        info!("activating {extension}");
    }

    fn on_did_activate_extension(
        &self,
        extension: &ExtensionIdentifier,
        times: ActivationTimes,
        reason: &ExtensionActivationReason,
    ) {
        info!(
            "activated {extension} on {} (load {:.1}ms, call {:.1}ms, resolve {:.1}ms)",
            reason.activation_event,
            times.code_loading_time,
            times.activate_call_time,
            times.activate_resolved_time
        );
        self.activated.lock().push(extension.clone());
    }

    fn on_extension_activation_error(
        &self,
        extension: &ExtensionIdentifier,
        error: &RpcErrorPayload,
    ) {
        error!("activating {extension} failed: {}", error.message);
    }

    fn on_extension_runtime_error(&self, extension: &ExtensionIdentifier, error: &RpcErrorPayload) {
        warn!("{extension} reported an error: {}", error.message);
    }
}

pub struct MainThreadExtensionService {
    service: Arc<dyn InternalExtensionService>,
}

impl MainThreadExtensionService {
    #[must_use]
    pub fn new(context: &CustomerContext, service: Arc<dyn InternalExtensionService>) -> Arc<Self> {
        info!(
            "extension service bound to {} host",
            context.extension_host_kind()
        );
        Arc::new(Self { service })
    }
}

impl Customer for MainThreadExtensionService {
    fn name(&self) -> &str {
        main_context::MAIN_THREAD_EXTENSION_SERVICE.sid
    }
}

#[async_trait]
impl RpcHandler for MainThreadExtensionService {
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        _token: CancellationToken,
    ) -> Result<Value, RpcError> {
        let extension: ExtensionIdentifier = arg(method, &args, 0)?;
        match method {
            "$activateExtension" => {
                let reason = arg(method, &args, 1)?;
                self.service.activate_by_id(extension, reason).await?;
            }
            "$onWillActivateExtension" => self.service.on_will_activate_extension(&extension),
            "$onDidActivateExtension" => {
                let times = ActivationTimes {
                    code_loading_time: arg(method, &args, 1)?,
                    activate_call_time: arg(method, &args, 2)?,
                    activate_resolved_time: arg(method, &args, 3)?,
                };
                let reason = arg(method, &args, 4)?;
                self.service
                    .on_did_activate_extension(&extension, times, &reason);
            }
            "$onExtensionActivationError" => {
                let error = arg(method, &args, 1)?;
                self.service
                    .on_extension_activation_error(&extension, &error);
            }
            "$onExtensionRuntimeError" => {
                let error = arg(method, &args, 1)?;
                self.service.on_extension_runtime_error(&extension, &error);
            }
            other => {
                return Err(RpcError::UnknownMethod {
                    actor: main_context::MAIN_THREAD_EXTENSION_SERVICE.sid.to_string(),
                    method: other.to_string(),
                })
            }
        }
        Ok(Value::Null)
    }
}

/// Registry with every main-side customer a host expects.
#[must_use]
pub fn workbench_customers(
    service: Arc<dyn InternalExtensionService>,
    tree_views: Arc<dyn TreeViewSink>,
) -> CustomerRegistry {
    CustomerRegistry::new()
        .with_named(main_context::MAIN_THREAD_EXTENSION_SERVICE, move |context| {
            Ok(MainThreadExtensionService::new(context, service.clone()))
        })
        .with_named(main_context::MAIN_THREAD_TREE_VIEWS, move |context| {
            Ok(MainThreadTreeViews::new(context, tree_views.clone()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use exthost_rpc::{in_memory_pair, RpcOptions, RpcProtocol};
    use serde_json::json;

    #[tokio::test]
    async fn did_activate_reaches_the_service() {
        let (left, right) = in_memory_pair();
        let main = RpcProtocol::new(Arc::new(left), RpcOptions::default(), None);
        let host = RpcProtocol::new(Arc::new(right), RpcOptions::default(), None);
        let service = Arc::new(TracingExtensionService::new());
        let context = CustomerContext::new(main.clone(), None, "LocalProcess");
        main.set(
            main_context::MAIN_THREAD_EXTENSION_SERVICE,
            MainThreadExtensionService::new(&context, service.clone()),
        );

        let reason = json!({"startup": false, "extensionId": "Pub.Ext", "activationEvent": "onView:x"});
        host.get_proxy(main_context::MAIN_THREAD_EXTENSION_SERVICE)
            .call(
                "$onDidActivateExtension",
                vec![json!("Pub.Ext"), json!(1.0), json!(2.0), json!(3.0), reason],
            )
            .await
            .unwrap();
        assert_eq!(service.activated(), vec![ExtensionIdentifier::new("pub.ext")]);

        let err = host
            .get_proxy(main_context::MAIN_THREAD_EXTENSION_SERVICE)
            .call("$nope", vec![json!("Pub.Ext")])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote(_)));
        main.dispose();
        host.dispose();
    }
}
