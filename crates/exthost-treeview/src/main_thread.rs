//! Workbench side of the tree view bridge.
//!
//! `MainThreadTreeViews` keeps what the host told it about each view and
//! forwards it to a [`TreeViewSink`], the renderer's entry point. Requests
//! towards the host go through the `ExtHostTreeViews` proxy.

use std::sync::Arc;

use async_trait::async_trait;
use exthost_rpc::{
    arg, ext_host_context, main_context, Customer, CustomerContext, CustomerError, RpcError,
    RpcHandler, RpcProxy,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dnd::TreeDataTransferDto;
use crate::types::{RevealItem, RevealOptions, TreeItemDto, TreeItemHandle, TreeViewRegistration};

/// Receives view updates on the workbench side.
pub trait TreeViewSink: Send + Sync {
    fn on_register(&self, view_id: &str, registration: &TreeViewRegistration);

    /// `None` asks for the whole view to be refetched.
    fn on_refresh(&self, view_id: &str, items: Option<&IndexMap<TreeItemHandle, TreeItemDto>>);

    fn on_reveal(&self, view_id: &str, item: Option<&RevealItem>, options: &RevealOptions);

    fn on_message(&self, view_id: &str, message: &str);

    fn on_title(&self, view_id: &str, title: &str, description: Option<&str>);

    fn on_unregister(&self, _view_id: &str) {}
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTreeViewSink;

impl TreeViewSink for TracingTreeViewSink {
    fn on_register(&self, view_id: &str, registration: &TreeViewRegistration) {
        info!(
            "tree view '{view_id}' registered (collapse all: {}, multi select: {}, dnd: {})",
            registration.show_collapse_all,
            registration.can_select_many,
            registration.can_drag_and_drop
        );
    }

    fn on_refresh(&self, view_id: &str, items: Option<&IndexMap<TreeItemHandle, TreeItemDto>>) {
        match items {
            Some(items) => debug!("tree view '{view_id}' refreshed {} item(s)", items.len()),
            None => debug!("tree view '{view_id}' refreshed"),
        }
    }

    fn on_reveal(&self, view_id: &str, item: Option<&RevealItem>, _options: &RevealOptions) {
        match item {
            Some(item) => debug!("tree view '{view_id}' reveals '{}'", item.item.handle),
            None => debug!("tree view '{view_id}' reveals itself"),
        }
    }

    fn on_message(&self, view_id: &str, message: &str) {
        debug!("tree view '{view_id}' message: {message}");
    }

    fn on_title(&self, view_id: &str, title: &str, description: Option<&str>) {
        debug!(
            "tree view '{view_id}' title: {title} ({})",
            description.unwrap_or_default()
        );
    }
}

/// What the workbench knows about one view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MainThreadViewState {
    pub registration: TreeViewRegistration,
    pub title: String,
    pub description: Option<String>,
    pub message: String,
}

pub struct MainThreadTreeViews {
    proxy: RpcProxy,
    sink: Arc<dyn TreeViewSink>,
    views: Mutex<IndexMap<String, MainThreadViewState>>,
}

impl MainThreadTreeViews {
    #[must_use]
    pub fn new(context: &CustomerContext, sink: Arc<dyn TreeViewSink>) -> Arc<Self> {
        Arc::new(Self {
            proxy: context.get_proxy(ext_host_context::EXT_HOST_TREE_VIEWS),
            sink,
            views: Mutex::new(IndexMap::new()),
        })
    }

    #[must_use]
    pub fn view(&self, view_id: &str) -> Option<MainThreadViewState> {
        self.views.lock().get(view_id).cloned()
    }

    #[must_use]
    pub fn view_ids(&self) -> Vec<String> {
        self.views.lock().keys().cloned().collect()
    }

    /// Children of `parent`, or the roots. `None` when the host cancelled the fetch.
    pub async fn get_children(
        &self,
        view_id: &str,
        parent: Option<&str>,
    ) -> Result<Option<Vec<TreeItemDto>>, RpcError> {
        self.proxy
            .call_typed("$getChildren", vec![json!(view_id), json!(parent)])
            .await
    }

    pub async fn has_resolve(&self, view_id: &str) -> Result<bool, RpcError> {
        self.proxy
            .call_typed("$hasResolve", vec![json!(view_id)])
            .await
    }

    pub async fn resolve(
        &self,
        view_id: &str,
        handle: &str,
        token: CancellationToken,
    ) -> Result<Option<TreeItemDto>, RpcError> {
        let value = self
            .proxy
            .call_with_cancellation("$resolve", vec![json!(view_id), json!(handle)], token)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn set_expanded(
        &self,
        view_id: &str,
        handle: &str,
        expanded: bool,
    ) -> Result<(), RpcError> {
        self.proxy
            .call(
                "$setExpanded",
                vec![json!(view_id), json!(handle), json!(expanded)],
            )
            .await?;
        Ok(())
    }

    pub async fn set_selection(&self, view_id: &str, handles: &[&str]) -> Result<(), RpcError> {
        self.proxy
            .call("$setSelection", vec![json!(view_id), json!(handles)])
            .await?;
        Ok(())
    }

    pub async fn set_visible(&self, view_id: &str, visible: bool) -> Result<(), RpcError> {
        self.proxy
            .call("$setVisible", vec![json!(view_id), json!(visible)])
            .await?;
        Ok(())
    }

    pub async fn on_drop(
        &self,
        view_id: &str,
        transfer: &TreeDataTransferDto,
        target_handle: &str,
    ) -> Result<(), RpcError> {
        self.proxy
            .call(
                "$onDrop",
                vec![
                    json!(view_id),
                    serde_json::to_value(transfer)?,
                    json!(target_handle),
                ],
            )
            .await?;
        Ok(())
    }

    /// Applies `update` to a registered view; updates for unknown views are dropped.
    fn with_view(&self, view_id: &str, update: impl FnOnce(&mut MainThreadViewState)) -> bool {
        match self.views.lock().get_mut(view_id) {
            Some(state) => {
                update(state);
                true
            }
            None => {
                debug!("ignoring update for unregistered tree view '{view_id}'");
                false
            }
        }
    }
}

impl Customer for MainThreadTreeViews {
    fn name(&self) -> &str {
        main_context::MAIN_THREAD_TREE_VIEWS.sid
    }

    fn dispose(&self) -> Result<(), CustomerError> {
        let views: Vec<String> = self.views.lock().drain(..).map(|(id, _)| id).collect();
        for view_id in views {
            self.sink.on_unregister(&view_id);
        }
        Ok(())
    }
}

#[async_trait]
impl RpcHandler for MainThreadTreeViews {
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        _token: CancellationToken,
    ) -> Result<Value, RpcError> {
        match method {
            "$registerTreeViewDataProvider" => {
                let view_id: String = arg(method, &args, 0)?;
                let registration: TreeViewRegistration = arg(method, &args, 1)?;
                self.views.lock().insert(
                    view_id.clone(),
                    MainThreadViewState {
                        registration,
                        ..MainThreadViewState::default()
                    },
                );
                self.sink.on_register(&view_id, &registration);
            }
            "$refresh" => {
                let view_id: String = arg(method, &args, 0)?;
                let items: Option<IndexMap<TreeItemHandle, TreeItemDto>> = arg(method, &args, 1)?;
                if self.with_view(&view_id, |_| {}) {
                    self.sink.on_refresh(&view_id, items.as_ref());
                }
            }
            "$reveal" => {
                let view_id: String = arg(method, &args, 0)?;
                let item: Option<RevealItem> = arg(method, &args, 1)?;
                let options: Option<RevealOptions> = arg(method, &args, 2)?;
                if self.with_view(&view_id, |_| {}) {
                    self.sink
                        .on_reveal(&view_id, item.as_ref(), &options.unwrap_or_default());
                }
            }
            "$setMessage" => {
                let view_id: String = arg(method, &args, 0)?;
                let message: String = arg(method, &args, 1)?;
                if self.with_view(&view_id, |state| state.message.clone_from(&message)) {
                    self.sink.on_message(&view_id, &message);
                }
            }
            "$setTitle" => {
                let view_id: String = arg(method, &args, 0)?;
                let title: String = arg(method, &args, 1)?;
                let description: Option<String> = arg(method, &args, 2)?;
                let updated = self.with_view(&view_id, |state| {
                    state.title.clone_from(&title);
                    state.description.clone_from(&description);
                });
                if updated {
                    self.sink
                        .on_title(&view_id, &title, description.as_deref());
                }
            }
            other => {
                return Err(RpcError::UnknownMethod {
                    actor: main_context::MAIN_THREAD_TREE_VIEWS.sid.to_string(),
                    method: other.to_string(),
                })
            }
        }
        Ok(Value::Null)
    }
}
