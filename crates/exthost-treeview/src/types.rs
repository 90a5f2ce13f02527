//! Tree items as providers describe them and as they travel over the wire.
//! - TreeItem: provider-facing description of one element
//! - TreeItemDto: cached projection sent to the workbench, keyed by handle
//! - TreeDataChange: provider change notification

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque node identity shared by both sides of the channel.
pub type TreeItemHandle = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeItemLabel {
    pub label: String,
    /// Highlighted `[start, end)` ranges of `label`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Vec<(u32, u32)>>,
}

impl TreeItemLabel {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            highlights: None,
        }
    }

    /// An empty highlight list is dropped.
    #[must_use]
    pub fn with_highlights(mut self, highlights: Vec<(u32, u32)>) -> Self {
        self.highlights = (!highlights.is_empty()).then_some(highlights);
        self
    }
}

impl From<&str> for TreeItemLabel {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for TreeItemLabel {
    fn from(label: String) -> Self {
        Self::new(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreeItemCollapsibleState {
    #[default]
    None,
    Collapsed,
    Expanded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeIcon {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ThemeIcon {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            color: None,
        }
    }
}

/// Where an item's icon comes from. Paths may be plain file paths or URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconPath {
    Theme(ThemeIcon),
    Single(String),
    LightDark { light: String, dark: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownString {
    pub value: String,
    #[serde(default)]
    pub is_trusted: bool,
    #[serde(default)]
    pub support_theme_icons: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tooltip {
    Plain(String),
    Markdown(MarkdownString),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityInformation {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Command bound to an item by its provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub command: String,
    pub title: String,
    pub tooltip: Option<String>,
    pub arguments: Vec<Value>,
}

impl Command {
    #[must_use]
    pub fn new(command: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            title: title.into(),
            tooltip: None,
            arguments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Command as sent to the workbench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDto {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
}

/// Provider-facing tree item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeItem {
    /// Stable identity across refreshes. Must be unique within one view.
    pub id: Option<String>,
    pub label: Option<TreeItemLabel>,
    pub description: Option<String>,
    pub resource_uri: Option<String>,
    pub tooltip: Option<Tooltip>,
    pub command: Option<Command>,
    pub context_value: Option<String>,
    pub icon_path: Option<IconPath>,
    pub collapsible_state: Option<TreeItemCollapsibleState>,
    pub accessibility_information: Option<AccessibilityInformation>,
}

impl TreeItem {
    #[must_use]
    pub fn new(label: impl Into<TreeItemLabel>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_resource(resource_uri: impl Into<String>) -> Self {
        Self {
            resource_uri: Some(resource_uri.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_collapsible_state(mut self, state: TreeItemCollapsibleState) -> Self {
        self.collapsible_state = Some(state);
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    #[must_use]
    pub fn with_tooltip(mut self, tooltip: Tooltip) -> Self {
        self.tooltip = Some(tooltip);
        self
    }

    #[must_use]
    pub fn with_icon_path(mut self, icon_path: IconPath) -> Self {
        self.icon_path = Some(icon_path);
        self
    }

    #[must_use]
    pub fn with_context_value(mut self, context_value: impl Into<String>) -> Self {
        self.context_value = Some(context_value.into());
        self
    }
}

/// Cached projection of one element, as the workbench sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeItemDto {
    pub handle: TreeItemHandle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_handle: Option<TreeItemHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<TreeItemLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<Tooltip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_dark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_icon: Option<ThemeIcon>,
    #[serde(default)]
    pub collapsible_state: TreeItemCollapsibleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility_information: Option<AccessibilityInformation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealOptions {
    pub select: bool,
    pub focus: bool,
    pub expand: bool,
}

impl Default for RevealOptions {
    fn default() -> Self {
        Self {
            select: true,
            focus: false,
            expand: false,
        }
    }
}

/// Node to reveal plus its ancestors, root first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealItem {
    pub item: TreeItemDto,
    pub parent_chain: Vec<TreeItemDto>,
}

/// Options the workbench needs to render a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TreeViewRegistration {
    pub show_collapse_all: bool,
    pub can_select_many: bool,
    pub can_drag_and_drop: bool,
}

/// Provider change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeDataChange<E> {
    /// The whole tree changed.
    All,
    Element(E),
    Elements(Vec<E>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionEvent<E> {
    pub element: E,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChangeEvent<E> {
    pub selection: Vec<E>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityChangeEvent {
    pub visible: bool,
}

/// Last path segment of a URI or path, ignoring a trailing separator.
pub(crate) fn resource_basename(uri: &str) -> &str {
    let trimmed = uri.trim_end_matches('/');
    trimmed
        .rsplit_once('/')
        .map_or(trimmed, |(_, name)| name)
}

/// Plain paths become `file://` URIs.
pub(crate) fn icon_uri(path: &str) -> String {
    if path.contains("://") {
        path.to_string()
    } else {
        format!("file://{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_ignores_trailing_separator() {
        assert_eq!(resource_basename("file:///workspace/src/"), "src");
        assert_eq!(resource_basename("file:///workspace/main.st"), "main.st");
        assert_eq!(resource_basename("plain"), "plain");
    }

    #[test]
    fn empty_highlights_are_dropped() {
        assert_eq!(TreeItemLabel::new("a").with_highlights(Vec::new()).highlights, None);
        assert_eq!(
            TreeItemLabel::new("abc").with_highlights(vec![(0, 1)]).highlights,
            Some(vec![(0, 1)])
        );
    }

    #[test]
    fn dto_omits_absent_fields() {
        let dto = TreeItemDto {
            handle: "0/0:a".to_string(),
            parent_handle: None,
            label: Some("a".into()),
            description: None,
            resource_uri: None,
            tooltip: Some(Tooltip::Plain("tip".to_string())),
            command: None,
            context_value: None,
            icon: None,
            icon_dark: None,
            theme_icon: None,
            collapsible_state: TreeItemCollapsibleState::Collapsed,
            accessibility_information: None,
        };
        assert_eq!(
            serde_json::to_value(&dto).unwrap(),
            serde_json::json!({
                "handle": "0/0:a",
                "label": {"label": "a"},
                "tooltip": "tip",
                "collapsibleState": "collapsed"
            })
        );
    }
}
