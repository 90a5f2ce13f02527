//! One registered tree view on the extension host side.
//!
//! Provider change notifications and message updates go through one channel
//! that a background task drains with a trailing debounce. Each flush runs
//! to completion before the next batch is collected, so refreshes never
//! overlap.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::commands::CommandsConverter;
use crate::dnd::{DragAndDropController, TreeDataTransfer, TreeDataTransferDto};
use crate::disposable::DisposableStore;
use crate::error::TreeViewError;
use crate::node::{NodeCache, TreeNode};
use crate::provider::TreeDataProvider;
use crate::proxy::MainThreadTreeViewsShape;
use crate::types::{
    icon_uri, ExpansionEvent, IconPath, RevealItem, RevealOptions, SelectionChangeEvent,
    TreeDataChange, TreeItem, TreeItemDto, TreeItemHandle, TreeViewRegistration,
    VisibilityChangeEvent,
};

const EVENT_CAPACITY: usize = 64;

pub struct TreeViewOptions<P: TreeDataProvider> {
    pub tree_data_provider: Arc<P>,
    pub show_collapse_all: bool,
    pub can_select_many: bool,
    pub drag_and_drop_controller: Option<Arc<dyn DragAndDropController<P::Element>>>,
}

impl<P: TreeDataProvider> TreeViewOptions<P> {
    #[must_use]
    pub fn new(tree_data_provider: Arc<P>) -> Self {
        Self {
            tree_data_provider,
            show_collapse_all: false,
            can_select_many: false,
            drag_and_drop_controller: None,
        }
    }

    #[must_use]
    pub fn registration(&self) -> TreeViewRegistration {
        TreeViewRegistration {
            show_collapse_all: self.show_collapse_all,
            can_select_many: self.can_select_many,
            can_drag_and_drop: self.drag_and_drop_controller.is_some(),
        }
    }
}

enum ViewChange<E> {
    Data(TreeDataChange<E>),
    Message,
}

/// Changes collected during one debounce window. `None` stands for the root.
struct RefreshBatch<E> {
    elements: Vec<Option<E>>,
    message: bool,
}

impl<E> RefreshBatch<E> {
    fn new() -> Self {
        Self {
            elements: Vec::new(),
            message: false,
        }
    }

    fn push(&mut self, change: ViewChange<E>, pending: &watch::Sender<usize>) {
        let was_empty = self.elements.is_empty();
        match change {
            ViewChange::Message => self.message = true,
            ViewChange::Data(TreeDataChange::All) => self.elements.push(None),
            ViewChange::Data(TreeDataChange::Element(element)) => self.elements.push(Some(element)),
            ViewChange::Data(TreeDataChange::Elements(elements)) => {
                self.elements.extend(elements.into_iter().map(Some));
            }
        }
        if was_empty && !self.elements.is_empty() {
            pending.send_modify(|pending| *pending += 1);
        }
    }
}

#[derive(Default)]
struct Presentation {
    visible: bool,
    selected: Vec<TreeItemHandle>,
    message: String,
    title: String,
    description: Option<String>,
}

pub struct ExtHostTreeView<P: TreeDataProvider> {
    view_id: String,
    provider: Arc<P>,
    drag_and_drop: Option<Arc<dyn DragAndDropController<P::Element>>>,
    proxy: Arc<dyn MainThreadTreeViewsShape>,
    commands: Arc<CommandsConverter>,
    cache: Mutex<NodeCache<P::Element>>,
    presentation: Mutex<Presentation>,
    refresh_cancellation: Mutex<CancellationToken>,
    pending_refreshes: Arc<watch::Sender<usize>>,
    changes: mpsc::UnboundedSender<ViewChange<P::Element>>,
    on_expand: broadcast::Sender<ExpansionEvent<P::Element>>,
    on_collapse: broadcast::Sender<ExpansionEvent<P::Element>>,
    on_selection: broadcast::Sender<SelectionChangeEvent<P::Element>>,
    on_visibility: broadcast::Sender<VisibilityChangeEvent>,
    shutdown: CancellationToken,
}

impl<P: TreeDataProvider> ExtHostTreeView<P> {
    pub(crate) fn new(
        view_id: impl Into<String>,
        options: TreeViewOptions<P>,
        proxy: Arc<dyn MainThreadTreeViewsShape>,
        commands: Arc<CommandsConverter>,
        debounce: Duration,
    ) -> Arc<Self> {
        let (changes, receiver) = mpsc::unbounded_channel();
        let (pending_refreshes, _) = watch::channel(0);
        let shutdown = CancellationToken::new();
        let view = Arc::new(Self {
            view_id: view_id.into(),
            provider: options.tree_data_provider,
            drag_and_drop: options.drag_and_drop_controller,
            proxy,
            commands,
            cache: Mutex::new(NodeCache::default()),
            presentation: Mutex::new(Presentation::default()),
            refresh_cancellation: Mutex::new(CancellationToken::new()),
            pending_refreshes: Arc::new(pending_refreshes),
            changes,
            on_expand: broadcast::channel(EVENT_CAPACITY).0,
            on_collapse: broadcast::channel(EVENT_CAPACITY).0,
            on_selection: broadcast::channel(EVENT_CAPACITY).0,
            on_visibility: broadcast::channel(EVENT_CAPACITY).0,
            shutdown: shutdown.clone(),
        });

        if let Some(provider_changes) = view.provider.subscribe() {
            tokio::spawn(forward_provider_changes(
                provider_changes,
                view.changes.clone(),
                shutdown.clone(),
            ));
        }
        tokio::spawn(run_refresh_loop(
            Arc::downgrade(&view),
            receiver,
            view.pending_refreshes.clone(),
            debounce,
            shutdown,
        ));
        view
    }

    #[must_use]
    pub fn view_id(&self) -> &str {
        &self.view_id
    }

    /// Items under `parent_handle`, or the roots.
    ///
    /// An unknown parent handle yields an empty list. `None` means the fetch
    /// was cancelled by a full refresh.
    pub async fn get_children(
        &self,
        parent_handle: Option<&str>,
    ) -> Result<Option<Vec<TreeItemDto>>, TreeViewError> {
        let parent = {
            let cache = self.cache.lock();
            let parent = match parent_handle {
                Some(handle) => match cache.element(handle) {
                    Some(element) => Some(element.clone()),
                    None => {
                        error!("No tree item with id '{handle}' found.");
                        return Ok(Some(Vec::new()));
                    }
                },
                None => None,
            };
            if let Some(children) = cache.children_of(parent_handle) {
                return Ok(Some(cache.items(children)));
            }
            parent
        };
        self.fetch_children_nodes(parent.as_ref()).await
    }

    #[must_use]
    pub fn get_extension_element(&self, handle: &str) -> Option<P::Element> {
        self.cache.lock().element(handle).cloned()
    }

    async fn fetch_children_nodes(
        &self,
        parent: Option<&P::Element>,
    ) -> Result<Option<Vec<TreeItemDto>>, TreeViewError> {
        let token = self.refresh_cancellation.lock().child_token();
        let parent_handle = {
            let mut cache = self.cache.lock();
            cache.clear_children(parent);
            parent
                .and_then(|parent| cache.nodes.get(parent))
                .map(|node| node.item.handle.clone())
        };

        let fetched = tokio::select! {
            () = token.cancelled() => return Ok(None),
            fetched = self.fetch_tree_items(parent) => fetched?,
        };
        if token.is_cancelled() {
            return Ok(None);
        }

        let mut cache = self.cache.lock();
        if let Some(handle) = &parent_handle {
            if cache.node_by_handle(handle).is_none() {
                debug!("parent '{handle}' left the cache while its children were fetched");
                return Ok(None);
            }
        }
        if cache.children_of(parent_handle.as_deref()).is_some() {
            cache.clear_children(parent);
        }

        let mut registered = Vec::with_capacity(fetched.len());
        let mut items = Vec::with_capacity(fetched.len());
        for (element, item) in fetched {
            match self.register_node(&mut cache, element.clone(), item, parent_handle.as_deref()) {
                Ok(dto) => {
                    registered.push(element);
                    items.push(dto);
                }
                Err(err) => {
                    for element in &registered {
                        cache.clear(element);
                    }
                    match parent {
                        Some(parent) => {
                            if let Some(node) = cache.nodes.get_mut(parent) {
                                node.children = None;
                            }
                        }
                        None => cache.roots = None,
                    }
                    return Err(err);
                }
            }
        }
        Ok(Some(items))
    }

    async fn fetch_tree_items(
        &self,
        parent: Option<&P::Element>,
    ) -> Result<Vec<(P::Element, TreeItem)>, TreeViewError> {
        let elements = self.provider.get_children(parent).await?;
        let items = try_join_all(
            elements
                .iter()
                .map(|element| self.provider.get_tree_item(element)),
        )
        .await?;
        Ok(elements.into_iter().zip(items).collect())
    }

    fn register_node(
        &self,
        cache: &mut NodeCache<P::Element>,
        element: P::Element,
        item: TreeItem,
        parent: Option<&str>,
    ) -> Result<TreeItemDto, TreeViewError> {
        let node = self.create_tree_node(cache, &element, item, parent);
        if let Some(id) = &node.extension_item.id {
            if cache.elements.contains_key(&node.item.handle) {
                node.dispose();
                return Err(TreeViewError::DuplicateElement(id.clone()));
            }
        }
        let dto = node.item.clone();
        cache.add_node(element, node);
        cache.add_to_parent(dto.handle.clone(), parent);
        Ok(dto)
    }

    fn create_tree_node(
        &self,
        cache: &NodeCache<P::Element>,
        element: &P::Element,
        extension_item: TreeItem,
        parent: Option<&str>,
    ) -> TreeNode {
        let disposables = DisposableStore::new();
        let handle = cache.create_handle(element, &extension_item, parent, false);
        let (icon, icon_dark, theme_icon) = match &extension_item.icon_path {
            Some(IconPath::Theme(theme)) => (None, None, Some(theme.clone())),
            Some(IconPath::Single(path)) => {
                let icon = icon_uri(path);
                (Some(icon.clone()), Some(icon), None)
            }
            Some(IconPath::LightDark { light, dark }) => {
                (Some(icon_uri(light)), Some(icon_uri(dark)), None)
            }
            None => (None, None, None),
        };
        let item = TreeItemDto {
            handle,
            parent_handle: parent.map(str::to_string),
            label: extension_item.label.clone(),
            description: extension_item.description.clone(),
            resource_uri: extension_item.resource_uri.clone(),
            tooltip: extension_item.tooltip.clone(),
            command: extension_item
                .command
                .as_ref()
                .map(|command| self.commands.to_internal(command, &disposables)),
            context_value: extension_item.context_value.clone(),
            icon,
            icon_dark,
            theme_icon,
            collapsible_state: extension_item.collapsible_state.unwrap_or_default(),
            accessibility_information: extension_item.accessibility_information.clone(),
        };
        TreeNode {
            item,
            extension_item,
            parent: parent.map(str::to_string),
            children: None,
            disposables,
        }
    }

    #[must_use]
    pub fn has_resolve(&self) -> bool {
        self.provider.supports_resolve()
    }

    /// Fills in tooltip and command of a cached item.
    pub async fn resolve_tree_item(
        &self,
        handle: &str,
        token: CancellationToken,
    ) -> Result<Option<TreeItemDto>, TreeViewError> {
        if !self.provider.supports_resolve() {
            return Ok(None);
        }
        let cached = {
            let cache = self.cache.lock();
            cache.element(handle).and_then(|element| {
                cache
                    .nodes
                    .get(element)
                    .map(|node| (element.clone(), node.extension_item.clone()))
            })
        };
        let Some((element, extension_item)) = cached else {
            return Ok(None);
        };

        let resolved = self
            .provider
            .resolve_tree_item(&extension_item, &element, token)
            .await?
            .unwrap_or(extension_item);

        let mut cache = self.cache.lock();
        let Some(node) = cache.nodes.get_mut(&element) else {
            return Ok(None);
        };
        node.item.tooltip = resolved.tooltip;
        node.item.command = resolved
            .command
            .as_ref()
            .map(|command| self.commands.to_internal(command, &node.disposables));
        Ok(Some(node.item.clone()))
    }

    /// Asks the workbench to show `element`, loading its ancestors first.
    ///
    /// `None` reveals the view itself.
    pub async fn reveal(
        &self,
        element: Option<&P::Element>,
        options: Option<RevealOptions>,
    ) -> Result<(), TreeViewError> {
        let options = options.unwrap_or_default();
        if !self.provider.supports_get_parent() {
            return Err(TreeViewError::GetParentRequired);
        }
        let Some(element) = element else {
            return self.proxy.reveal(&self.view_id, None, options).await;
        };

        self.wait_for_refreshes().await;
        let parent_chain = self.resolve_unknown_parent_chain(element).await?;
        let item = self.resolve_tree_node(element, parent_chain.last()).await?;
        self.proxy
            .reveal(
                &self.view_id,
                Some(RevealItem { item, parent_chain }),
                options,
            )
            .await
    }

    async fn wait_for_refreshes(&self) {
        let mut pending = self.pending_refreshes.subscribe();
        let _ = pending.wait_for(|pending| *pending == 0).await;
    }

    /// Ancestors of `element`, root first, each loaded into the cache.
    async fn resolve_unknown_parent_chain(
        &self,
        element: &P::Element,
    ) -> Result<Vec<TreeItemDto>, TreeViewError> {
        let mut ancestors = Vec::new();
        let mut current = element.clone();
        while let Some(parent) = self.resolve_parent(&current).await? {
            ancestors.push(parent.clone());
            current = parent;
        }

        let mut chain: Vec<TreeItemDto> = Vec::with_capacity(ancestors.len());
        for ancestor in ancestors.iter().rev() {
            let node = self.resolve_tree_node(ancestor, chain.last()).await?;
            chain.push(node);
        }
        Ok(chain)
    }

    async fn resolve_parent(
        &self,
        element: &P::Element,
    ) -> Result<Option<P::Element>, TreeViewError> {
        let cached = {
            let cache = self.cache.lock();
            cache.nodes.get(element).map(|node| {
                node.parent
                    .as_deref()
                    .and_then(|parent| cache.element(parent).cloned())
            })
        };
        match cached {
            Some(parent) => Ok(parent),
            None => Ok(self.provider.get_parent(element).await?),
        }
    }

    async fn resolve_tree_node(
        &self,
        element: &P::Element,
        parent: Option<&TreeItemDto>,
    ) -> Result<TreeItemDto, TreeViewError> {
        if let Some(node) = self.cache.lock().nodes.get(element) {
            return Ok(node.item.clone());
        }
        let item = self.provider.get_tree_item(element).await?;
        let parent_handle = parent.map(|parent| parent.handle.as_str());
        let handle = self
            .cache
            .lock()
            .create_handle(element, &item, parent_handle, true);
        self.get_children(parent_handle).await?;

        let resolved = self
            .cache
            .lock()
            .node_by_handle(&handle)
            .map(|node| node.item.clone());
        resolved.ok_or(TreeViewError::CannotResolve(handle))
    }

    async fn refresh(&self, elements: Vec<Option<P::Element>>) -> Result<(), TreeViewError> {
        if elements.iter().any(Option::is_none) {
            let previous = std::mem::replace(
                &mut *self.refresh_cancellation.lock(),
                CancellationToken::new(),
            );
            previous.cancel();
            self.cache.lock().clear_all();
            return self.proxy.refresh(&self.view_id, None).await;
        }

        let elements: Vec<P::Element> = elements.into_iter().flatten().collect();
        let handles = self.cache.lock().handles_to_refresh(&elements);
        if handles.is_empty() {
            return Ok(());
        }
        self.refresh_handles(handles).await
    }

    async fn refresh_handles(&self, handles: Vec<TreeItemHandle>) -> Result<(), TreeViewError> {
        let refreshed =
            try_join_all(handles.iter().map(|handle| self.refresh_node(handle))).await?;
        let items: IndexMap<TreeItemHandle, TreeItemDto> = handles
            .into_iter()
            .zip(refreshed)
            .filter_map(|(handle, item)| item.map(|item| (handle, item)))
            .collect();
        if items.is_empty() {
            return Ok(());
        }
        self.proxy.refresh(&self.view_id, Some(items)).await
    }

    async fn refresh_node(&self, handle: &str) -> Result<Option<TreeItemDto>, TreeViewError> {
        let element = {
            let mut cache = self.cache.lock();
            let Some(element) = cache.element(handle).cloned() else {
                return Ok(None);
            };
            if !cache.nodes.contains_key(&element) {
                return Ok(None);
            }
            cache.clear_children(Some(&element));
            element
        };

        let item = self.provider.get_tree_item(&element).await?;

        let mut cache = self.cache.lock();
        let Some(parent) = cache.nodes.get(&element).map(|node| node.parent.clone()) else {
            return Ok(None);
        };
        let node = self.create_tree_node(&cache, &element, item, parent.as_deref());
        let dto = node.item.clone();
        if let Some(existing) = cache.replace_node(&element, node) {
            existing.dispose();
        }
        Ok(Some(dto))
    }

    async fn flush(&self, batch: RefreshBatch<P::Element>) {
        if !batch.elements.is_empty() {
            if let Err(err) = self.refresh(batch.elements).await {
                error!("refreshing tree view '{}' failed: {err}", self.view_id);
            }
        }
        if batch.message {
            let message = self.presentation.lock().message.clone();
            if let Err(err) = self.proxy.set_message(&self.view_id, &message).await {
                error!("updating the message of '{}' failed: {err}", self.view_id);
            }
        }
    }

    pub fn set_expanded(&self, handle: &str, expanded: bool) {
        let Some(element) = self.get_extension_element(handle) else {
            return;
        };
        let event = ExpansionEvent { element };
        let _ = if expanded {
            self.on_expand.send(event)
        } else {
            self.on_collapse.send(event)
        };
    }

    pub fn set_selection(&self, handles: Vec<TreeItemHandle>) {
        {
            let mut presentation = self.presentation.lock();
            if presentation.selected == handles {
                return;
            }
            presentation.selected = handles;
        }
        let _ = self.on_selection.send(SelectionChangeEvent {
            selection: self.selected_elements(),
        });
    }

    /// Selected elements that are still cached.
    #[must_use]
    pub fn selected_elements(&self) -> Vec<P::Element> {
        let selected = self.presentation.lock().selected.clone();
        let cache = self.cache.lock();
        selected
            .iter()
            .filter_map(|handle| cache.element(handle).cloned())
            .collect()
    }

    pub fn set_visible(&self, visible: bool) {
        {
            let mut presentation = self.presentation.lock();
            if presentation.visible == visible {
                return;
            }
            presentation.visible = visible;
        }
        let _ = self.on_visibility.send(VisibilityChangeEvent { visible });
    }

    #[must_use]
    pub fn visible(&self) -> bool {
        self.presentation.lock().visible
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.presentation.lock().message.clone()
    }

    /// Stores `message`; the workbench gets it with the next debounced flush.
    pub fn set_message(&self, message: impl Into<String>) {
        self.presentation.lock().message = message.into();
        let _ = self.changes.send(ViewChange::Message);
    }

    #[must_use]
    pub fn title(&self) -> String {
        self.presentation.lock().title.clone()
    }

    pub async fn set_title(&self, title: impl Into<String>) -> Result<(), TreeViewError> {
        let (title, description) = {
            let mut presentation = self.presentation.lock();
            presentation.title = title.into();
            (presentation.title.clone(), presentation.description.clone())
        };
        self.proxy
            .set_title(&self.view_id, &title, description.as_deref())
            .await
    }

    #[must_use]
    pub fn description(&self) -> Option<String> {
        self.presentation.lock().description.clone()
    }

    pub async fn set_description(&self, description: Option<String>) -> Result<(), TreeViewError> {
        let title = {
            let mut presentation = self.presentation.lock();
            presentation.description.clone_from(&description);
            presentation.title.clone()
        };
        self.proxy
            .set_title(&self.view_id, &title, description.as_deref())
            .await
    }

    /// Hands a drop onto `target_handle` to the drag and drop controller.
    pub async fn on_drop(
        &self,
        transfer: TreeDataTransfer<P::Element>,
        target_handle: &str,
    ) -> Result<(), TreeViewError> {
        let Some(target) = self.get_extension_element(target_handle) else {
            return Ok(());
        };
        match &self.drag_and_drop {
            Some(controller) => Ok(controller.on_drop(transfer, target).await?),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn subscribe_expand(&self) -> broadcast::Receiver<ExpansionEvent<P::Element>> {
        self.on_expand.subscribe()
    }

    #[must_use]
    pub fn subscribe_collapse(&self) -> broadcast::Receiver<ExpansionEvent<P::Element>> {
        self.on_collapse.subscribe()
    }

    #[must_use]
    pub fn subscribe_selection(&self) -> broadcast::Receiver<SelectionChangeEvent<P::Element>> {
        self.on_selection.subscribe()
    }

    #[must_use]
    pub fn subscribe_visibility(&self) -> broadcast::Receiver<VisibilityChangeEvent> {
        self.on_visibility.subscribe()
    }

    pub fn dispose(&self) {
        self.shutdown.cancel();
        self.refresh_cancellation.lock().cancel();
        self.cache.lock().clear_all();
    }
}

async fn forward_provider_changes<E: Clone + Send + 'static>(
    mut provider_changes: broadcast::Receiver<TreeDataChange<E>>,
    changes: mpsc::UnboundedSender<ViewChange<E>>,
    shutdown: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            () = shutdown.cancelled() => return,
            change = provider_changes.recv() => change,
        };
        let change = match change {
            Ok(change) => change,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("missed {skipped} tree data change(s), refreshing everything");
                TreeDataChange::All
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if changes.send(ViewChange::Data(change)).is_err() {
            return;
        }
    }
}

async fn run_refresh_loop<P: TreeDataProvider>(
    view: Weak<ExtHostTreeView<P>>,
    mut changes: mpsc::UnboundedReceiver<ViewChange<P::Element>>,
    pending: Arc<watch::Sender<usize>>,
    debounce: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            () = shutdown.cancelled() => return,
            change = changes.recv() => match change {
                Some(change) => change,
                None => return,
            },
        };
        let mut batch = RefreshBatch::new();
        batch.push(first, &pending);

        let deadline = tokio::time::sleep(debounce);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    pending.send_replace(0);
                    return;
                }
                () = &mut deadline => break,
                change = changes.recv() => match change {
                    Some(change) => {
                        batch.push(change, &pending);
                        deadline.as_mut().reset(Instant::now() + debounce);
                    }
                    None => break,
                },
            }
        }

        let refreshing = !batch.elements.is_empty();
        let Some(view) = view.upgrade() else {
            pending.send_replace(0);
            return;
        };
        view.flush(batch).await;
        drop(view);
        if refreshing {
            pending.send_modify(|pending| *pending = pending.saturating_sub(1));
        }
    }
}

/// Object-safe face of a view, used to dispatch wire calls by view id.
#[async_trait]
pub(crate) trait AnyTreeView: Send + Sync {
    async fn children(
        &self,
        parent_handle: Option<&str>,
    ) -> Result<Option<Vec<TreeItemDto>>, TreeViewError>;

    async fn resolve(
        &self,
        handle: &str,
        token: CancellationToken,
    ) -> Result<Option<TreeItemDto>, TreeViewError>;

    fn can_resolve(&self) -> bool;

    fn expanded(&self, handle: &str, expanded: bool);

    fn selection(&self, handles: Vec<TreeItemHandle>);

    fn visibility(&self, visible: bool);

    async fn drop_transfer(
        &self,
        transfer: TreeDataTransferDto,
        target_handle: &str,
    ) -> Result<(), TreeViewError>;

    fn element_any(&self, handle: &str) -> Option<Box<dyn Any + Send>>;

    fn dispose_view(&self);
}

#[async_trait]
impl<P: TreeDataProvider> AnyTreeView for ExtHostTreeView<P> {
    async fn children(
        &self,
        parent_handle: Option<&str>,
    ) -> Result<Option<Vec<TreeItemDto>>, TreeViewError> {
        self.get_children(parent_handle).await
    }

    async fn resolve(
        &self,
        handle: &str,
        token: CancellationToken,
    ) -> Result<Option<TreeItemDto>, TreeViewError> {
        self.resolve_tree_item(handle, token).await
    }

    fn can_resolve(&self) -> bool {
        self.has_resolve()
    }

    fn expanded(&self, handle: &str, expanded: bool) {
        self.set_expanded(handle, expanded);
    }

    fn selection(&self, handles: Vec<TreeItemHandle>) {
        self.set_selection(handles);
    }

    fn visibility(&self, visible: bool) {
        self.set_visible(visible);
    }

    async fn drop_transfer(
        &self,
        transfer: TreeDataTransferDto,
        target_handle: &str,
    ) -> Result<(), TreeViewError> {
        let transfer =
            TreeDataTransfer::from_dto(transfer, |handle| self.get_extension_element(handle))?;
        self.on_drop(transfer, target_handle).await
    }

    fn element_any(&self, handle: &str) -> Option<Box<dyn Any + Send>> {
        self.get_extension_element(handle)
            .map(|element| Box::new(element) as Box<dyn Any + Send>)
    }

    fn dispose_view(&self) {
        self.dispose();
    }
}
