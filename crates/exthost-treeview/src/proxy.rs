//! Extension host view of the main-side tree view service.

use async_trait::async_trait;
use exthost_rpc::RpcProxy;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::error::TreeViewError;
use crate::types::{RevealItem, RevealOptions, TreeItemDto, TreeItemHandle, TreeViewRegistration};

/// Items to refresh keyed by handle. `None` refreshes the whole view.
pub type RefreshItems = Option<IndexMap<TreeItemHandle, TreeItemDto>>;

#[async_trait]
pub trait MainThreadTreeViewsShape: Send + Sync {
    async fn register_tree_view_data_provider(
        &self,
        view_id: &str,
        registration: TreeViewRegistration,
    ) -> Result<(), TreeViewError>;

    async fn refresh(&self, view_id: &str, items: RefreshItems) -> Result<(), TreeViewError>;

    async fn reveal(
        &self,
        view_id: &str,
        item: Option<RevealItem>,
        options: RevealOptions,
    ) -> Result<(), TreeViewError>;

    async fn set_message(&self, view_id: &str, message: &str) -> Result<(), TreeViewError>;

    async fn set_title(
        &self,
        view_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<(), TreeViewError>;
}

/// [`MainThreadTreeViewsShape`] over an RPC channel.
pub struct RpcMainThreadTreeViews {
    proxy: RpcProxy,
}

impl RpcMainThreadTreeViews {
    #[must_use]
    pub fn new(proxy: RpcProxy) -> Self {
        Self { proxy }
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), TreeViewError> {
        self.proxy.call(method, args).await?;
        Ok(())
    }
}

#[async_trait]
impl MainThreadTreeViewsShape for RpcMainThreadTreeViews {
    async fn register_tree_view_data_provider(
        &self,
        view_id: &str,
        registration: TreeViewRegistration,
    ) -> Result<(), TreeViewError> {
        self.send(
            "$registerTreeViewDataProvider",
            vec![json!(view_id), serde_json::to_value(registration)?],
        )
        .await
    }

    async fn refresh(&self, view_id: &str, items: RefreshItems) -> Result<(), TreeViewError> {
        let items = serde_json::to_value(items)?;
        self.send("$refresh", vec![json!(view_id), items]).await
    }

    async fn reveal(
        &self,
        view_id: &str,
        item: Option<RevealItem>,
        options: RevealOptions,
    ) -> Result<(), TreeViewError> {
        let item = serde_json::to_value(item)?;
        let options = serde_json::to_value(options)?;
        self.send("$reveal", vec![json!(view_id), item, options]).await
    }

    async fn set_message(&self, view_id: &str, message: &str) -> Result<(), TreeViewError> {
        self.send("$setMessage", vec![json!(view_id), json!(message)])
            .await
    }

    async fn set_title(
        &self,
        view_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<(), TreeViewError> {
        self.send(
            "$setTitle",
            vec![json!(view_id), json!(title), json!(description)],
        )
        .await
    }
}
