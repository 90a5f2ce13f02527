use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use expect_test::expect;
use exthost_rpc::{
    ext_host_context, in_memory_pair, main_context, Customer, CustomerContext, RpcError,
    RpcHandler, RpcOptions, RpcProtocol,
};
use exthost_treeview::{
    Command, CommandArgument, DragAndDropController, ExtHostTreeView, ExtHostTreeViews,
    MainThreadTreeViews, MainThreadTreeViewsShape, ProcessedArgument, ProviderError, RefreshItems,
    RevealItem, RevealOptions, RpcMainThreadTreeViews, TransferItem, TreeDataChange,
    TreeDataProvider, TreeDataTransfer, TreeItem, TreeItemCollapsibleState, TreeItemDto,
    TreeItemHandle, TreeViewError, TreeViewOptions, TreeViewRegistration, TreeViewSink,
    DELEGATING_COMMAND_ID, TREE_ITEM_DATA_TRANSFER_TYPE,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const DEBOUNCE: Duration = Duration::from_millis(200);
const VIEW: &str = "outline";

#[derive(Clone)]
struct Entry {
    parent: Option<String>,
    label: String,
    id: Option<String>,
    command: Option<Command>,
}

struct Provider {
    nodes: Mutex<IndexMap<String, Entry>>,
    changes: broadcast::Sender<TreeDataChange<String>>,
    parents: bool,
    delay: Duration,
    children_calls: AtomicUsize,
}

impl Provider {
    fn new() -> Self {
        Self {
            nodes: Mutex::new(IndexMap::new()),
            changes: broadcast::channel(16).0,
            parents: true,
            delay: Duration::ZERO,
            children_calls: AtomicUsize::new(0),
        }
    }

    fn without_parents(mut self) -> Self {
        self.parents = false;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn node(self, element: &str, parent: Option<&str>, label: &str, id: Option<&str>) -> Self {
        self.nodes.lock().insert(
            element.to_string(),
            Entry {
                parent: parent.map(str::to_string),
                label: label.to_string(),
                id: id.map(str::to_string),
                command: None,
            },
        );
        self
    }

    fn command(self, element: &str, command: Command) -> Self {
        if let Some(entry) = self.nodes.lock().get_mut(element) {
            entry.command = Some(command);
        }
        self
    }

    fn change(&self, change: TreeDataChange<String>) {
        self.changes.send(change).unwrap();
    }
}

fn sample() -> Provider {
    Provider::new()
        .node("a", None, "a", None)
        .node("b", None, "b/c", None)
        .node("n1", None, "Node 1", Some("n1"))
        .node("child", Some("n1"), "Child", None)
}

#[async_trait]
impl TreeDataProvider for Provider {
    type Element = String;

    async fn get_tree_item(&self, element: &String) -> Result<TreeItem, ProviderError> {
        let nodes = self.nodes.lock();
        let entry = nodes
            .get(element)
            .ok_or_else(|| ProviderError::from(format!("unknown element {element}")))?;
        let has_children = nodes
            .values()
            .any(|node| node.parent.as_deref() == Some(element.as_str()));
        let mut item = TreeItem::new(entry.label.as_str()).with_collapsible_state(if has_children {
            TreeItemCollapsibleState::Collapsed
        } else {
            TreeItemCollapsibleState::None
        });
        if let Some(id) = &entry.id {
            item = item.with_id(id.clone());
        }
        if let Some(command) = &entry.command {
            item = item.with_command(command.clone());
        }
        Ok(item)
    }

    async fn get_children(&self, element: Option<&String>) -> Result<Vec<String>, ProviderError> {
        self.children_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self
            .nodes
            .lock()
            .iter()
            .filter(|(_, entry)| entry.parent.as_ref() == element)
            .map(|(element, _)| element.clone())
            .collect())
    }

    fn supports_get_parent(&self) -> bool {
        self.parents
    }

    async fn get_parent(&self, element: &String) -> Result<Option<String>, ProviderError> {
        Ok(self
            .nodes
            .lock()
            .get(element)
            .and_then(|entry| entry.parent.clone()))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<TreeDataChange<String>>> {
        Some(self.changes.subscribe())
    }
}

/// Records what the host sends to the workbench.
#[derive(Default)]
struct RecordingMain {
    calls: Mutex<Vec<(&'static str, Value)>>,
    reject_registration: bool,
}

impl RecordingMain {
    fn methods(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|(method, _)| *method).collect()
    }

    fn recorded(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| *name == method)
            .map(|(_, value)| value.clone())
            .collect()
    }
}

#[async_trait]
impl MainThreadTreeViewsShape for RecordingMain {
    async fn register_tree_view_data_provider(
        &self,
        view_id: &str,
        registration: TreeViewRegistration,
    ) -> Result<(), TreeViewError> {
        if self.reject_registration {
            return Err(RpcError::TransportClosed.into());
        }
        self.calls.lock().push((
            "register",
            json!({ "view": view_id, "dnd": registration.can_drag_and_drop }),
        ));
        Ok(())
    }

    async fn refresh(&self, _view_id: &str, items: RefreshItems) -> Result<(), TreeViewError> {
        let handles = items.map(|items| items.keys().cloned().collect::<Vec<_>>());
        self.calls.lock().push(("refresh", json!(handles)));
        Ok(())
    }

    async fn reveal(
        &self,
        _view_id: &str,
        item: Option<RevealItem>,
        options: RevealOptions,
    ) -> Result<(), TreeViewError> {
        let value = json!({
            "item": item.as_ref().map(|item| item.item.handle.clone()),
            "parentChain": item
                .as_ref()
                .map(|item| handles(&item.parent_chain))
                .unwrap_or_default(),
            "select": options.select,
        });
        self.calls.lock().push(("reveal", value));
        Ok(())
    }

    async fn set_message(&self, _view_id: &str, message: &str) -> Result<(), TreeViewError> {
        self.calls.lock().push(("message", json!(message)));
        Ok(())
    }

    async fn set_title(
        &self,
        _view_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<(), TreeViewError> {
        self.calls
            .lock()
            .push(("title", json!([title, description])));
        Ok(())
    }
}

fn handles(items: &[TreeItemDto]) -> Vec<TreeItemHandle> {
    items.iter().map(|item| item.handle.clone()).collect()
}

async fn open(
    provider: Provider,
) -> (
    Arc<ExtHostTreeViews>,
    Arc<ExtHostTreeView<Provider>>,
    Arc<Provider>,
    Arc<RecordingMain>,
) {
    let main = Arc::new(RecordingMain::default());
    let views = ExtHostTreeViews::new(main.clone(), DEBOUNCE);
    let provider = Arc::new(provider);
    let view = views
        .create_tree_view(VIEW, TreeViewOptions::new(provider.clone()))
        .await
        .unwrap();
    (views, view, provider, main)
}

#[tokio::test]
async fn children_get_label_and_id_handles() {
    let (_views, view, _provider, main) = open(sample()).await;

    let roots = view.get_children(None).await.unwrap().unwrap();
    assert_eq!(handles(&roots), vec!["0/0:a", "0/0:b//c", "1/n1"]);
    let children = view.get_children(Some("1/n1")).await.unwrap().unwrap();
    assert_eq!(handles(&children), vec!["1/n1/0:Child"]);
    assert_eq!(children[0].parent_handle.as_deref(), Some("1/n1"));
    assert_eq!(view.get_extension_element("1/n1/0:Child").as_deref(), Some("child"));

    let json = serde_json::to_string_pretty(&roots[2]).unwrap();
    expect![[r#"
{
  "handle": "1/n1",
  "label": {
    "label": "Node 1"
  },
  "collapsibleState": "collapsed"
}"#]]
    .assert_eq(&json);
    assert_eq!(main.methods(), vec!["register"]);
}

#[tokio::test]
async fn same_labels_take_increasing_counters() {
    let provider = Provider::new()
        .node("x", None, "same", None)
        .node("y", None, "same", None);
    let (_views, view, _provider, _main) = open(provider).await;

    let roots = view.get_children(None).await.unwrap().unwrap();
    assert_eq!(handles(&roots), vec!["0/0:same", "0/1:same"]);
}

#[tokio::test]
async fn cached_children_are_served_without_the_provider() {
    let (_views, view, provider, _main) = open(sample()).await;

    view.get_children(None).await.unwrap();
    view.get_children(None).await.unwrap();
    assert_eq!(provider.children_calls.load(Ordering::SeqCst), 1);

    let unknown = view.get_children(Some("0/9:nope")).await.unwrap();
    assert_eq!(unknown, Some(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn burst_of_changes_refreshes_once_with_the_covering_handle() {
    let (_views, view, provider, main) = open(sample()).await;
    view.get_children(None).await.unwrap();
    view.get_children(Some("1/n1")).await.unwrap();

    for round in 0..5 {
        let element = if round % 2 == 0 { "child" } else { "n1" };
        provider.change(TreeDataChange::Element(element.to_string()));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(DEBOUNCE * 3).await;

    assert_eq!(main.recorded("refresh"), vec![json!(["1/n1"])]);
    // The refreshed node lost its cached children.
    assert_eq!(view.get_extension_element("1/n1/0:Child"), None);
    assert_eq!(view.get_extension_element("1/n1").as_deref(), Some("n1"));
}

#[tokio::test(start_paused = true)]
async fn full_refresh_drops_cached_nodes_and_delegated_commands() {
    let provider = sample().command(
        "a",
        Command::new("outline.open", "Open").with_arguments(vec![json!(1)]),
    );
    let (views, view, provider, main) = open(provider).await;

    let roots = view.get_children(None).await.unwrap().unwrap();
    let command = roots[0].command.clone().unwrap();
    assert_eq!(command.id, DELEGATING_COMMAND_ID);
    assert_eq!(views.commands().delegated(), 1);
    assert_eq!(
        views.commands().from_internal(&command).map(|command| command.command),
        Some("outline.open".to_string())
    );

    provider.change(TreeDataChange::All);
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(main.recorded("refresh"), vec![Value::Null]);
    assert_eq!(views.commands().delegated(), 0);
    assert_eq!(view.get_extension_element("0/0:a"), None);

    let roots = view.get_children(None).await.unwrap().unwrap();
    assert_eq!(provider.children_calls.load(Ordering::SeqCst), 2);
    assert_eq!(roots[2].handle, "1/n1");
}

#[tokio::test(start_paused = true)]
async fn full_refresh_cancels_an_inflight_fetch() {
    let (_views, view, provider, main) = open(sample().slow(Duration::from_secs(1))).await;

    let fetch = tokio::spawn({
        let view = view.clone();
        async move { view.get_children(None).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    provider.change(TreeDataChange::All);

    assert_eq!(fetch.await.unwrap(), Ok(None));
    assert_eq!(main.recorded("refresh"), vec![Value::Null]);
    assert_eq!(view.get_extension_element("1/n1"), None);
}

#[tokio::test]
async fn duplicate_ids_roll_back_the_fetch() {
    let provider = Provider::new()
        .node("x", None, "first", Some("same"))
        .node("y", None, "second", Some("same"));
    let (_views, view, _provider, _main) = open(provider).await;

    let err = view.get_children(None).await.unwrap_err();
    assert_eq!(err, TreeViewError::DuplicateElement("same".to_string()));
    assert_eq!(
        err.to_string(),
        "Element with id same is already registered"
    );
    assert_eq!(view.get_extension_element("1/same"), None);
}

#[tokio::test]
async fn reveal_loads_the_parent_chain_first() {
    let (_views, view, _provider, main) = open(sample()).await;

    view.reveal(Some(&"child".to_string()), None).await.unwrap();

    assert_eq!(
        main.recorded("reveal"),
        vec![json!({
            "item": "1/n1/0:Child",
            "parentChain": ["1/n1"],
            "select": true,
        })]
    );
    assert_eq!(view.get_extension_element("1/n1/0:Child").as_deref(), Some("child"));
}

#[tokio::test]
async fn reveal_requires_get_parent() {
    let (_views, view, _provider, main) = open(sample().without_parents()).await;

    let err = view.reveal(Some(&"a".to_string()), None).await.unwrap_err();
    assert_eq!(err, TreeViewError::GetParentRequired);
    assert!(main.recorded("reveal").is_empty());
}

#[tokio::test(start_paused = true)]
async fn reveal_waits_for_a_pending_refresh() {
    let (_views, view, provider, main) = open(sample()).await;
    view.get_children(None).await.unwrap();

    provider.change(TreeDataChange::Element("a".to_string()));
    tokio::time::sleep(Duration::from_millis(1)).await;
    view.reveal(Some(&"a".to_string()), None).await.unwrap();

    assert_eq!(main.methods(), vec!["register", "refresh", "reveal"]);
}

#[tokio::test(start_paused = true)]
async fn messages_are_flushed_with_the_debounce() {
    let (_views, view, _provider, main) = open(sample()).await;

    view.set_message("Loading");
    view.set_message("Ready");
    assert!(main.recorded("message").is_empty());
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(main.recorded("message"), vec![json!("Ready")]);
    assert_eq!(view.message(), "Ready");

    view.set_title("Outline").await.unwrap();
    view.set_description(Some("3 items".to_string())).await.unwrap();
    assert_eq!(
        main.recorded("title"),
        vec![json!(["Outline", null]), json!(["Outline", "3 items"])]
    );
}

#[tokio::test]
async fn unknown_views_and_methods_are_rejected() {
    let (views, _view, _provider, _main) = open(sample()).await;

    let err = views
        .handle("$getChildren", vec![json!("missing")], CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No tree view with id 'missing' registered.");

    for args in [vec![], vec![json!(VIEW)]] {
        let err = views
            .handle("$bogus", args, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::UnknownMethod { ref method, .. } if method == "$bogus"));
    }
}

#[tokio::test]
async fn failed_registration_removes_the_view() {
    let main = Arc::new(RecordingMain {
        reject_registration: true,
        ..RecordingMain::default()
    });
    let views = ExtHostTreeViews::new(main, DEBOUNCE);

    let result = views
        .create_tree_view(VIEW, TreeViewOptions::new(Arc::new(sample())))
        .await;
    assert!(matches!(result, Err(TreeViewError::Rpc(RpcError::TransportClosed))));
    assert!(views.view_ids().is_empty());
}

#[derive(Default)]
struct DropRecorder {
    drops: Mutex<Vec<(Vec<String>, Option<String>, String)>>,
}

#[async_trait]
impl DragAndDropController<String> for DropRecorder {
    async fn on_drop(
        &self,
        transfer: TreeDataTransfer<String>,
        target: String,
    ) -> Result<(), ProviderError> {
        let elements = match transfer.get(TREE_ITEM_DATA_TRANSFER_TYPE) {
            Some(TransferItem::Elements(elements)) => elements.clone(),
            _ => Vec::new(),
        };
        let text = match transfer.get("text/plain") {
            Some(TransferItem::Text(text)) => Some(text.clone()),
            _ => None,
        };
        self.drops.lock().push((elements, text, target));
        Ok(())
    }
}

#[tokio::test]
async fn drop_hands_cached_elements_to_the_controller() {
    let main = Arc::new(RecordingMain::default());
    let views = ExtHostTreeViews::new(main.clone(), DEBOUNCE);
    let recorder = Arc::new(DropRecorder::default());
    let options = TreeViewOptions {
        drag_and_drop_controller: Some(recorder.clone() as Arc<dyn DragAndDropController<String>>),
        ..TreeViewOptions::new(Arc::new(sample()))
    };
    let view = views.create_tree_view(VIEW, options).await.unwrap();
    view.get_children(None).await.unwrap();
    assert_eq!(main.recorded("register"), vec![json!({ "view": VIEW, "dnd": true })]);

    let transfer = json!({
        "items": [
            [TREE_ITEM_DATA_TRANSFER_TYPE, "[\"1/n1\",\"0/7:gone\"]"],
            ["text/plain", "hello"],
        ]
    });
    views
        .handle(
            "$onDrop",
            vec![json!(VIEW), transfer, json!("0/0:a")],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        *recorder.drops.lock(),
        vec![(
            vec!["n1".to_string()],
            Some("hello".to_string()),
            "a".to_string()
        )]
    );
}

#[tokio::test]
async fn workbench_state_changes_raise_view_events() {
    let (views, view, _provider, _main) = open(sample()).await;
    view.get_children(None).await.unwrap();
    let mut expand = view.subscribe_expand();
    let mut selection = view.subscribe_selection();
    let mut visibility = view.subscribe_visibility();

    views
        .handle("$setExpanded", vec![json!(VIEW), json!("1/n1"), json!(true)], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(expand.try_recv().unwrap().element, "n1");

    let selected = json!(["0/0:a", "1/n1"]);
    views
        .handle("$setSelection", vec![json!(VIEW), selected.clone()], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        selection.try_recv().unwrap().selection,
        vec!["a".to_string(), "n1".to_string()]
    );
    views
        .handle("$setSelection", vec![json!(VIEW), selected], CancellationToken::new())
        .await
        .unwrap();
    assert!(selection.try_recv().is_err());

    views
        .handle("$setVisible", vec![json!(VIEW), json!(true)], CancellationToken::new())
        .await
        .unwrap();
    assert!(visibility.try_recv().unwrap().visible);
    assert!(view.visible());
}

#[tokio::test]
async fn command_arguments_map_back_to_elements() {
    let (views, view, _provider, _main) = open(sample()).await;
    view.get_children(None).await.unwrap();

    let arguments: Vec<CommandArgument> = serde_json::from_value(json!([
        { "type": "treeItem", "treeViewId": VIEW, "handle": "1/n1" },
        { "type": "treeItem", "treeViewId": "elsewhere", "handle": "1/n1" },
        { "type": "value", "value": 3 },
    ]))
    .unwrap();
    assert_eq!(
        views.process_arguments::<String>(arguments),
        vec![
            ProcessedArgument::Element(Some("n1".to_string())),
            ProcessedArgument::Element(None),
            ProcessedArgument::Value(json!(3)),
        ]
    );
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl TreeViewSink for RecordingSink {
    fn on_register(&self, view_id: &str, _registration: &TreeViewRegistration) {
        self.events.lock().push(format!("register {view_id}"));
    }

    fn on_refresh(&self, view_id: &str, items: Option<&IndexMap<TreeItemHandle, TreeItemDto>>) {
        let count = items.map_or(0, IndexMap::len);
        self.events.lock().push(format!("refresh {view_id} {count}"));
    }

    fn on_reveal(&self, view_id: &str, item: Option<&RevealItem>, _options: &RevealOptions) {
        let handle = item.map(|item| item.item.handle.as_str()).unwrap_or("-");
        self.events.lock().push(format!("reveal {view_id} {handle}"));
    }

    fn on_message(&self, view_id: &str, message: &str) {
        self.events.lock().push(format!("message {view_id} {message}"));
    }

    fn on_title(&self, view_id: &str, title: &str, _description: Option<&str>) {
        self.events.lock().push(format!("title {view_id} {title}"));
    }

    fn on_unregister(&self, view_id: &str) {
        self.events.lock().push(format!("unregister {view_id}"));
    }
}

#[tokio::test(start_paused = true)]
async fn workbench_and_host_agree_over_rpc() {
    let (left, right) = in_memory_pair();
    let main_rpc = RpcProtocol::new(Arc::new(left), RpcOptions::default(), None);
    let host_rpc = RpcProtocol::new(Arc::new(right), RpcOptions::default(), None);

    let sink = Arc::new(RecordingSink::default());
    let context = CustomerContext::new(main_rpc.clone(), None, "local");
    let workbench = MainThreadTreeViews::new(&context, sink.clone());
    main_rpc.set(main_context::MAIN_THREAD_TREE_VIEWS, workbench.clone());

    let host = ExtHostTreeViews::new(
        Arc::new(RpcMainThreadTreeViews::new(
            host_rpc.get_proxy(main_context::MAIN_THREAD_TREE_VIEWS),
        )),
        DEBOUNCE,
    );
    host_rpc.set(ext_host_context::EXT_HOST_TREE_VIEWS, host.clone());

    let view = host
        .create_tree_view(VIEW, TreeViewOptions::new(Arc::new(sample())))
        .await
        .unwrap();
    assert_eq!(workbench.view_ids(), vec![VIEW.to_string()]);

    let roots = workbench.get_children(VIEW, None).await.unwrap().unwrap();
    assert_eq!(handles(&roots), vec!["0/0:a", "0/0:b//c", "1/n1"]);
    assert!(!workbench.has_resolve(VIEW).await.unwrap());

    view.set_message("Indexing");
    tokio::time::sleep(DEBOUNCE * 2).await;
    view.set_title("Outline").await.unwrap();
    let state = workbench.view(VIEW).unwrap();
    assert_eq!(state.message, "Indexing");
    assert_eq!(state.title, "Outline");

    workbench.dispose().unwrap();
    assert_eq!(
        *sink.events.lock(),
        vec![
            "register outline",
            "message outline Indexing",
            "title outline Outline",
            "unregister outline",
        ]
    );
    assert!(workbench.view_ids().is_empty());
}
