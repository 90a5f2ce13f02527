//! Contract between a tree view and the extension that feeds it.

use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::types::{TreeDataChange, TreeItem};

/// Supplies elements and their descriptions to one tree view.
///
/// Elements are cache keys: two equal elements are the same node. The view
/// never drops or mutates an element it got from the provider.
#[async_trait]
pub trait TreeDataProvider: Send + Sync + 'static {
    type Element: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    async fn get_tree_item(&self, element: &Self::Element) -> Result<TreeItem, ProviderError>;

    /// Children of `element`, or the roots when `None`.
    async fn get_children(
        &self,
        element: Option<&Self::Element>,
    ) -> Result<Vec<Self::Element>, ProviderError>;

    /// Whether [`TreeDataProvider::get_parent`] is implemented. Required by `reveal`.
    fn supports_get_parent(&self) -> bool {
        false
    }

    async fn get_parent(
        &self,
        _element: &Self::Element,
    ) -> Result<Option<Self::Element>, ProviderError> {
        Ok(None)
    }

    /// Whether [`TreeDataProvider::resolve_tree_item`] is implemented.
    fn supports_resolve(&self) -> bool {
        false
    }

    /// Fills in tooltip and command on demand. `None` keeps `item` as is.
    async fn resolve_tree_item(
        &self,
        _item: &TreeItem,
        _element: &Self::Element,
        _token: CancellationToken,
    ) -> Result<Option<TreeItem>, ProviderError> {
        Ok(None)
    }

    /// Change notifications, if the provider ever changes.
    fn subscribe(&self) -> Option<broadcast::Receiver<TreeDataChange<Self::Element>>> {
        None
    }
}
