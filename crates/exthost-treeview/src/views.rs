//! Extension host registry of tree views.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exthost_rpc::{arg, ext_host_context, Customer, CustomerError, RpcError, RpcHandler};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::commands::CommandsConverter;
use crate::dnd::TreeDataTransferDto;
use crate::error::TreeViewError;
use crate::provider::TreeDataProvider;
use crate::proxy::MainThreadTreeViewsShape;
use crate::types::TreeItemHandle;
use crate::view::{AnyTreeView, ExtHostTreeView, TreeViewOptions};

/// Command argument as sent by the workbench.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommandArgument {
    #[serde(rename_all = "camelCase")]
    TreeItem {
        tree_view_id: String,
        handle: TreeItemHandle,
    },
    Value { value: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedArgument<E> {
    /// Element behind a tree item argument; `None` when the view or handle is gone.
    Element(Option<E>),
    Value(Value),
}

pub struct ExtHostTreeViews {
    proxy: Arc<dyn MainThreadTreeViewsShape>,
    commands: Arc<CommandsConverter>,
    debounce: Duration,
    views: Mutex<IndexMap<String, Arc<dyn AnyTreeView>>>,
}

impl ExtHostTreeViews {
    #[must_use]
    pub fn new(proxy: Arc<dyn MainThreadTreeViewsShape>, debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            proxy,
            commands: Arc::new(CommandsConverter::new()),
            debounce,
            views: Mutex::new(IndexMap::new()),
        })
    }

    #[must_use]
    pub fn commands(&self) -> &Arc<CommandsConverter> {
        &self.commands
    }

    /// Creates the view and registers it with the workbench.
    ///
    /// The view answers requests as soon as it exists; a failed registration
    /// removes it again.
    pub async fn create_tree_view<P: TreeDataProvider>(
        &self,
        view_id: &str,
        options: TreeViewOptions<P>,
    ) -> Result<Arc<ExtHostTreeView<P>>, TreeViewError> {
        let registration = options.registration();
        let view = ExtHostTreeView::new(
            view_id,
            options,
            self.proxy.clone(),
            self.commands.clone(),
            self.debounce,
        );
        let replaced = self
            .views
            .lock()
            .insert(view_id.to_string(), view.clone() as Arc<dyn AnyTreeView>);
        if let Some(replaced) = replaced {
            warn!("tree view '{view_id}' registered twice, disposing the previous one");
            replaced.dispose_view();
        }

        if let Err(err) = self
            .proxy
            .register_tree_view_data_provider(view_id, registration)
            .await
        {
            self.remove_view(view_id, &view);
            view.dispose();
            return Err(err);
        }
        Ok(view)
    }

    pub async fn register_tree_data_provider<P: TreeDataProvider>(
        &self,
        view_id: &str,
        provider: Arc<P>,
    ) -> Result<Arc<ExtHostTreeView<P>>, TreeViewError> {
        self.create_tree_view(view_id, TreeViewOptions::new(provider))
            .await
    }

    fn remove_view<P: TreeDataProvider>(&self, view_id: &str, view: &Arc<ExtHostTreeView<P>>) {
        let mut views = self.views.lock();
        let ours = views.get(view_id).is_some_and(|current| {
            std::ptr::eq(
                Arc::as_ptr(current).cast::<()>(),
                Arc::as_ptr(view).cast::<()>(),
            )
        });
        if ours {
            views.shift_remove(view_id);
        }
    }

    /// Unregisters and disposes `view_id`. False when no such view exists.
    pub fn dispose_tree_view(&self, view_id: &str) -> bool {
        let removed = self.views.lock().shift_remove(view_id);
        match removed {
            Some(view) => {
                view.dispose_view();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn view_ids(&self) -> Vec<String> {
        self.views.lock().keys().cloned().collect()
    }

    fn view(&self, view_id: &str) -> Result<Arc<dyn AnyTreeView>, TreeViewError> {
        self.views
            .lock()
            .get(view_id)
            .cloned()
            .ok_or_else(|| TreeViewError::NotRegistered(view_id.to_string()))
    }

    /// Maps a tree item argument back to the element it stands for.
    #[must_use]
    pub fn process_argument<E: Clone + 'static>(
        &self,
        argument: CommandArgument,
    ) -> ProcessedArgument<E> {
        match argument {
            CommandArgument::Value { value } => ProcessedArgument::Value(value),
            CommandArgument::TreeItem {
                tree_view_id,
                handle,
            } => {
                let element = self
                    .views
                    .lock()
                    .get(&tree_view_id)
                    .cloned()
                    .and_then(|view| view.element_any(&handle))
                    .and_then(|element| element.downcast::<E>().ok())
                    .map(|element| *element);
                if element.is_none() {
                    debug!("no element for handle '{handle}' in tree view '{tree_view_id}'");
                }
                ProcessedArgument::Element(element)
            }
        }
    }

    pub fn process_arguments<E: Clone + 'static>(
        &self,
        arguments: Vec<CommandArgument>,
    ) -> Vec<ProcessedArgument<E>> {
        arguments
            .into_iter()
            .map(|argument| self.process_argument(argument))
            .collect()
    }
}

impl Customer for ExtHostTreeViews {
    fn name(&self) -> &str {
        ext_host_context::EXT_HOST_TREE_VIEWS.sid
    }

    fn dispose(&self) -> Result<(), CustomerError> {
        let views: Vec<_> = self.views.lock().drain(..).map(|(_, view)| view).collect();
        for view in views {
            view.dispose_view();
        }
        Ok(())
    }
}

#[async_trait]
impl RpcHandler for ExtHostTreeViews {
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        token: CancellationToken,
    ) -> Result<Value, RpcError> {
        match method {
            "$getChildren" => {
                let view_id: String = arg(method, &args, 0)?;
                let parent: Option<String> = arg(method, &args, 1)?;
                let children = self.view(&view_id)?.children(parent.as_deref()).await?;
                Ok(serde_json::to_value(children)?)
            }
            "$resolve" => {
                let view_id: String = arg(method, &args, 0)?;
                let handle: String = arg(method, &args, 1)?;
                let item = self.view(&view_id)?.resolve(&handle, token).await?;
                Ok(serde_json::to_value(item)?)
            }
            "$hasResolve" => {
                let view_id: String = arg(method, &args, 0)?;
                Ok(Value::Bool(self.view(&view_id)?.can_resolve()))
            }
            "$setExpanded" => {
                let view_id: String = arg(method, &args, 0)?;
                let handle: String = arg(method, &args, 1)?;
                let expanded: bool = arg(method, &args, 2)?;
                self.view(&view_id)?.expanded(&handle, expanded);
                Ok(Value::Null)
            }
            "$setSelection" => {
                let view_id: String = arg(method, &args, 0)?;
                let handles: Vec<TreeItemHandle> = arg(method, &args, 1)?;
                self.view(&view_id)?.selection(handles);
                Ok(Value::Null)
            }
            "$setVisible" => {
                let view_id: String = arg(method, &args, 0)?;
                let visible: bool = arg(method, &args, 1)?;
                self.view(&view_id)?.visibility(visible);
                Ok(Value::Null)
            }
            "$onDrop" => {
                let view_id: String = arg(method, &args, 0)?;
                let transfer: TreeDataTransferDto = arg(method, &args, 1)?;
                let target: String = arg(method, &args, 2)?;
                self.view(&view_id)?
                    .drop_transfer(transfer, &target)
                    .await?;
                Ok(Value::Null)
            }
            other => Err(RpcError::UnknownMethod {
                actor: ext_host_context::EXT_HOST_TREE_VIEWS.sid.to_string(),
                method: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for ExtHostTreeViews {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtHostTreeViews")
            .field("views", &self.view_ids())
            .finish_non_exhaustive()
    }
}
