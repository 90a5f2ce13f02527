//! Extension bookkeeping shared by hosts and managers.
//! - ExtensionIdentifier: case-insensitive id that keeps its original casing
//! - ExtensionDescriptionDelta: incremental change to a host's extension set
//! - ExtensionHostExtensions: all known extensions plus the ones a host runs

use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smol_str::SmolStr;

#[derive(Debug, Clone)]
pub struct ExtensionIdentifier {
    value: SmolStr,
    key: SmolStr,
}

impl ExtensionIdentifier {
    pub fn new(value: impl AsRef<str>) -> Self {
        let value = value.as_ref();
        Self {
            value: SmolStr::new(value),
            key: SmolStr::new(value.to_lowercase()),
        }
    }

    /// The identifier as originally written.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl PartialEq for ExtensionIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ExtensionIdentifier {}

impl Hash for ExtensionIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for ExtensionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl From<&str> for ExtensionIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for ExtensionIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de> Deserialize<'de> for ExtensionIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDescription {
    pub identifier: ExtensionIdentifier,
    #[serde(default)]
    pub version: String,
    /// Location the extension was loaded from, as a URI string.
    pub extension_location: String,
    #[serde(default)]
    pub activation_events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
}

impl ExtensionDescription {
    pub fn new(id: impl AsRef<str>, extension_location: impl Into<String>) -> Self {
        Self {
            identifier: ExtensionIdentifier::new(id),
            version: "0.0.0".to_string(),
            extension_location: extension_location.into(),
            activation_events: Vec::new(),
            main: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDescriptionDelta {
    #[serde(default)]
    pub to_remove: Vec<ExtensionIdentifier>,
    #[serde(default)]
    pub to_add: Vec<ExtensionDescription>,
    #[serde(default)]
    pub my_to_remove: Vec<ExtensionIdentifier>,
    #[serde(default)]
    pub my_to_add: Vec<ExtensionIdentifier>,
}

impl ExtensionDescriptionDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty()
            && self.to_add.is_empty()
            && self.my_to_remove.is_empty()
            && self.my_to_add.is_empty()
    }
}

/// Every extension known to a host, and the subset the host runs.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHostExtensions {
    all: IndexMap<ExtensionIdentifier, ExtensionDescription>,
    mine: IndexSet<ExtensionIdentifier>,
}

impl ExtensionHostExtensions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state expressed as a delta from an empty host.
    #[must_use]
    pub fn to_delta(&self) -> ExtensionDescriptionDelta {
        ExtensionDescriptionDelta {
            to_remove: Vec::new(),
            to_add: self.all.values().cloned().collect(),
            my_to_remove: Vec::new(),
            my_to_add: self.mine.iter().cloned().collect(),
        }
    }

    /// Replaces the state and returns the delta from the previous one.
    ///
    /// An extension whose location changed is reported as removed and added.
    pub fn set(
        &mut self,
        all: Vec<ExtensionDescription>,
        mine: Vec<ExtensionIdentifier>,
    ) -> ExtensionDescriptionDelta {
        let mut next_all = IndexMap::with_capacity(all.len());
        for extension in all {
            next_all.insert(extension.identifier.clone(), extension);
        }
        let next_mine: IndexSet<ExtensionIdentifier> = mine.into_iter().collect();

        let changed = |from: &IndexMap<ExtensionIdentifier, ExtensionDescription>,
                       extension: &ExtensionDescription| {
            from.get(&extension.identifier)
                .is_none_or(|other| other.extension_location != extension.extension_location)
        };
        let delta = ExtensionDescriptionDelta {
            to_remove: self
                .all
                .values()
                .filter(|extension| changed(&next_all, extension))
                .map(|extension| extension.identifier.clone())
                .collect(),
            to_add: next_all
                .values()
                .filter(|extension| changed(&self.all, extension))
                .cloned()
                .collect(),
            my_to_remove: self
                .mine
                .iter()
                .filter(|id| !next_mine.contains(*id))
                .cloned()
                .collect(),
            my_to_add: next_mine
                .iter()
                .filter(|id| !self.mine.contains(*id))
                .cloned()
                .collect(),
        };

        self.all = next_all;
        self.mine = next_mine;
        delta
    }

    /// Applies removals first, then additions.
    pub fn delta(&mut self, delta: &ExtensionDescriptionDelta) {
        for id in &delta.to_remove {
            self.all.shift_remove(id);
        }
        for id in &delta.my_to_remove {
            self.mine.shift_remove(id);
        }
        for extension in &delta.to_add {
            self.all
                .insert(extension.identifier.clone(), extension.clone());
        }
        for id in &delta.my_to_add {
            self.mine.insert(id.clone());
        }
    }

    #[must_use]
    pub fn contains_extension(&self, id: &ExtensionIdentifier) -> bool {
        self.mine.contains(id)
    }

    #[must_use]
    pub fn all_extensions(&self) -> Vec<ExtensionDescription> {
        self.all.values().cloned().collect()
    }

    #[must_use]
    pub fn my_extensions(&self) -> Vec<ExtensionIdentifier> {
        self.mine.iter().cloned().collect()
    }
}
