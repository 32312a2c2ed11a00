//! Attached asset lists (css, js, libraries, settings).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AssetGroup {
    kind: String,
    items: Vec<String>,
}

/// Assets attached to a render tree, grouped by asset kind.
///
/// Both the kinds and the items inside each kind keep first-seen order, and a
/// repeated item is ignored. Output built from the same contributions is
/// therefore byte-identical no matter how often they are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attached {
    groups: Vec<AssetGroup>,
}

impl Attached {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: impl Into<String>, item: impl Into<String>) -> Self {
        self.add(kind, item);
        self
    }

    pub fn add(&mut self, kind: impl Into<String>, item: impl Into<String>) {
        let kind = kind.into();
        let item = item.into();
        let group = match self.groups.iter().position(|group| group.kind == kind) {
            Some(index) => &mut self.groups[index],
            None => {
                self.groups.push(AssetGroup {
                    kind,
                    items: Vec::new(),
                });
                let last = self.groups.len() - 1;
                &mut self.groups[last]
            }
        };
        if !group.items.contains(&item) {
            group.items.push(item);
        }
    }

    pub fn merge(&mut self, other: &Attached) {
        for group in &other.groups {
            for item in &group.items {
                self.add(group.kind.clone(), item.clone());
            }
        }
    }

    pub fn get(&self, kind: &str) -> &[String] {
        self.groups
            .iter()
            .find(|group| group.kind == kind)
            .map(|group| group.items.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups
            .iter()
            .map(|group| (group.kind.as_str(), group.items.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|group| group.items.is_empty())
    }
}
