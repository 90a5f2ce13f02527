//! Drag and drop payloads.
//!
//! On the wire a transfer is a list of `(mime type, string)` pairs. Tree item
//! drags carry a JSON list of handles under [`TREE_ITEM_DATA_TRANSFER_TYPE`];
//! those are turned back into cached elements before a drop controller sees
//! them.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, TreeViewError};

pub const TREE_ITEM_DATA_TRANSFER_TYPE: &str = "application/vnd.code.tree";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TreeDataTransferDto {
    pub items: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferItem<E> {
    Text(String),
    /// Dragged tree elements that are still cached.
    Elements(Vec<E>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDataTransfer<E> {
    pub items: IndexMap<String, TransferItem<E>>,
}

impl<E> TreeDataTransfer<E> {
    /// Converts a wire transfer, resolving dragged handles with `lookup`.
    ///
    /// The tree item entry is dropped when none of its handles resolve.
    pub fn from_dto(
        dto: TreeDataTransferDto,
        lookup: impl Fn(&str) -> Option<E>,
    ) -> Result<Self, TreeViewError> {
        let mut items = IndexMap::with_capacity(dto.items.len());
        for (mime, value) in dto.items {
            if mime != TREE_ITEM_DATA_TRANSFER_TYPE {
                items.insert(mime, TransferItem::Text(value));
                continue;
            }
            let handles: Vec<String> = serde_json::from_str(&value)
                .map_err(|err| TreeViewError::InvalidTransfer(err.to_string()))?;
            let elements: Vec<E> = handles.iter().filter_map(|handle| lookup(handle)).collect();
            if !elements.is_empty() {
                items.insert(mime, TransferItem::Elements(elements));
            }
        }
        Ok(Self { items })
    }

    #[must_use]
    pub fn get(&self, mime: &str) -> Option<&TransferItem<E>> {
        self.items.get(mime)
    }
}

/// Receives drops onto elements of one view.
#[async_trait]
pub trait DragAndDropController<E>: Send + Sync {
    async fn on_drop(&self, transfer: TreeDataTransfer<E>, target: E) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(handle: &str) -> Option<u32> {
        match handle {
            "0/0:a" => Some(1),
            "0/0:b" => Some(2),
            _ => None,
        }
    }

    #[test]
    fn dragged_handles_become_elements() {
        let dto = TreeDataTransferDto {
            items: vec![
                ("text/plain".to_string(), "hello".to_string()),
                (
                    TREE_ITEM_DATA_TRANSFER_TYPE.to_string(),
                    r#"["0/0:a","0/9:gone","0/0:b"]"#.to_string(),
                ),
            ],
        };
        let transfer = TreeDataTransfer::from_dto(dto, lookup).unwrap();
        assert_eq!(
            transfer.get(TREE_ITEM_DATA_TRANSFER_TYPE),
            Some(&TransferItem::Elements(vec![1, 2]))
        );
        assert_eq!(
            transfer.get("text/plain"),
            Some(&TransferItem::Text("hello".to_string()))
        );
    }

    #[test]
    fn unresolvable_tree_entry_is_removed() {
        let dto = TreeDataTransferDto {
            items: vec![(
                TREE_ITEM_DATA_TRANSFER_TYPE.to_string(),
                r#"["0/0:stale"]"#.to_string(),
            )],
        };
        let transfer = TreeDataTransfer::from_dto(dto, lookup).unwrap();
        assert!(transfer.items.is_empty());
    }

    #[test]
    fn malformed_handle_list_is_rejected() {
        let dto = TreeDataTransferDto {
            items: vec![(TREE_ITEM_DATA_TRANSFER_TYPE.to_string(), "{".to_string())],
        };
        assert!(matches!(
            TreeDataTransfer::<u32>::from_dto(dto, lookup),
            Err(TreeViewError::InvalidTransfer(_))
        ));
    }
}
