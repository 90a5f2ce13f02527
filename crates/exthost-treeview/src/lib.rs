//! Tree view bridge between extension providers and the workbench.
//! - types: tree items and their wire form
//! - node: handle derivation and the per-view node cache
//! - view/views: extension host views and their registry
//! - main_thread: workbench side and its renderer sink
//! - commands/dnd: command delegation and drag and drop payloads

pub mod commands;
pub mod disposable;
pub mod dnd;
pub mod error;
pub mod main_thread;
mod node;
pub mod provider;
pub mod proxy;
pub mod types;
pub mod view;
pub mod views;

pub use commands::{CommandsConverter, DELEGATING_COMMAND_ID};
pub use disposable::DisposableStore;
pub use dnd::{
    DragAndDropController, TransferItem, TreeDataTransfer, TreeDataTransferDto,
    TREE_ITEM_DATA_TRANSFER_TYPE,
};
pub use error::{ProviderError, TreeViewError};
pub use main_thread::{MainThreadTreeViews, MainThreadViewState, TracingTreeViewSink, TreeViewSink};
pub use node::{ID_HANDLE_PREFIX, LABEL_HANDLE_PREFIX};
pub use provider::TreeDataProvider;
pub use proxy::{MainThreadTreeViewsShape, RefreshItems, RpcMainThreadTreeViews};
pub use types::{
    AccessibilityInformation, Command, CommandDto, ExpansionEvent, IconPath, MarkdownString,
    RevealItem, RevealOptions, SelectionChangeEvent, ThemeIcon, Tooltip, TreeDataChange, TreeItem,
    TreeItemCollapsibleState, TreeItemDto, TreeItemHandle, TreeItemLabel, TreeViewRegistration,
    VisibilityChangeEvent,
};
pub use view::{ExtHostTreeView, TreeViewOptions};
pub use views::{CommandArgument, ExtHostTreeViews, ProcessedArgument};
