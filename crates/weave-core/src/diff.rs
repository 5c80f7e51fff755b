//! Widget tree diffing.
//!
//! Children are matched by `(key, kind)`, each previous node at most once.
//! The child list is brought from the previous order to the next one with
//! removals (back to front), then one pass over the target order that moves
//! matched nodes into place and inserts new ones. Matched nodes are then
//! diffed recursively.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collections::map::HashMap;
use crate::error::PatchError;
use crate::widget::{WidgetId, WidgetNode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Patch {
    /// Changed props or event subscriptions of an existing node.
    Update {
        id: WidgetId,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        set: IndexMap<String, Value>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        unset: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        events: Option<Vec<String>>,
    },
    Insert {
        parent: WidgetId,
        index: usize,
        node: WidgetNode,
    },
    Remove {
        parent: WidgetId,
        id: WidgetId,
    },
    Move {
        parent: WidgetId,
        id: WidgetId,
        from: usize,
        to: usize,
    },
    /// The whole node changed identity.
    Replace {
        id: WidgetId,
        node: WidgetNode,
    },
}

/// Minimal patch list that turns `previous` into `next`.
pub fn diff(previous: &WidgetNode, next: &WidgetNode) -> Vec<Patch> {
    let mut patches = Vec::new();
    if previous.kind != next.kind || previous.key != next.key {
        patches.push(Patch::Replace {
            id: previous.id.clone(),
            node: next.clone(),
        });
        return patches;
    }
    diff_node(previous, next, &mut patches);
    patches
}

fn diff_node(previous: &WidgetNode, next: &WidgetNode, patches: &mut Vec<Patch>) {
    let set: IndexMap<String, Value> = next
        .props
        .iter()
        .filter(|(name, value)| previous.props.get(*name) != Some(value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let unset: Vec<String> = previous
        .props
        .keys()
        .filter(|name| !next.props.contains_key(*name))
        .cloned()
        .collect();
    let events = (previous.events != next.events).then(|| next.events.clone());
    if !set.is_empty() || !unset.is_empty() || events.is_some() {
        patches.push(Patch::Update {
            id: next.id.clone(),
            set,
            unset,
            events,
        });
    }
    diff_children(&next.id, &previous.children, &next.children, patches);
}

fn identity(node: &WidgetNode) -> (&str, &str) {
    (node.key.as_str(), node.kind.as_str())
}

fn diff_children(
    parent: &WidgetId,
    previous: &[WidgetNode],
    next: &[WidgetNode],
    patches: &mut Vec<Patch>,
) {
    let mut desired: HashMap<(&str, &str), usize> = HashMap::new();
    for child in next {
        *desired.entry(identity(child)).or_default() += 1;
    }
    let kept: Vec<bool> = previous
        .iter()
        .map(|child| match desired.get_mut(&identity(child)) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        })
        .collect();
    let mut current: Vec<Option<&WidgetNode>> = previous.iter().map(Some).collect();

    for index in (0..current.len()).rev() {
        if let Some(child) = current[index] {
            if !kept[index] {
                current.remove(index);
                patches.push(Patch::Remove {
                    parent: parent.clone(),
                    id: child.id.clone(),
                });
            }
        }
    }

    let mut matched = Vec::new();
    for (target_index, child) in next.iter().enumerate() {
        let found = current[target_index..]
            .iter()
            .position(|slot| slot.is_some_and(|node| identity(node) == identity(child)))
            .map(|offset| offset + target_index);
        match found {
            Some(current_index) => {
                let existing = current.remove(current_index);
                current.insert(target_index, existing);
                if current_index != target_index {
                    patches.push(Patch::Move {
                        parent: parent.clone(),
                        id: child.id.clone(),
                        from: current_index,
                        to: target_index,
                    });
                }
                if let Some(existing) = existing {
                    matched.push((existing, child));
                }
            }
            None => {
                current.insert(target_index, None);
                patches.push(Patch::Insert {
                    parent: parent.clone(),
                    index: target_index,
                    node: child.clone(),
                });
            }
        }
    }

    for (existing, child) in matched {
        diff_node(existing, child, patches);
    }
}

/// Applies patches in order, the way a client would.
pub fn apply_patches(tree: &mut WidgetNode, patches: &[Patch]) -> Result<(), PatchError> {
    for patch in patches {
        apply_patch(tree, patch)?;
    }
    Ok(())
}

fn apply_patch(tree: &mut WidgetNode, patch: &Patch) -> Result<(), PatchError> {
    match patch {
        Patch::Update {
            id,
            set,
            unset,
            events,
        } => {
            let node = tree
                .find_mut(id)
                .ok_or_else(|| PatchError::MissingNode(id.clone()))?;
            for name in unset {
                node.props.shift_remove(name);
            }
            for (name, value) in set {
                node.props.insert(name.clone(), value.clone());
            }
            if let Some(events) = events {
                node.events = events.clone();
            }
        }
        Patch::Insert {
            parent,
            index,
            node,
        } => {
            let parent_node = find_parent(tree, parent)?;
            let len = parent_node.children.len();
            if *index > len {
                return Err(PatchError::IndexOutOfRange {
                    parent: parent.clone(),
                    index: *index,
                    len,
                });
            }
            parent_node.children.insert(*index, node.clone());
        }
        Patch::Remove { parent, id } => {
            let parent_node = find_parent(tree, parent)?;
            let position = parent_node
                .children
                .iter()
                .rposition(|child| &child.id == id)
                .ok_or_else(|| PatchError::MissingNode(id.clone()))?;
            parent_node.children.remove(position);
        }
        Patch::Move {
            parent,
            id,
            from,
            to,
        } => {
            let parent_node = find_parent(tree, parent)?;
            let len = parent_node.children.len();
            if *from >= len || *to >= len {
                return Err(PatchError::IndexOutOfRange {
                    parent: parent.clone(),
                    index: (*from).max(*to),
                    len,
                });
            }
            if &parent_node.children[*from].id != id {
                return Err(PatchError::MissingNode(id.clone()));
            }
            let child = parent_node.children.remove(*from);
            parent_node.children.insert(*to, child);
        }
        Patch::Replace { id, node } => {
            let target = tree
                .find_mut(id)
                .ok_or_else(|| PatchError::MissingNode(id.clone()))?;
            *target = node.clone();
        }
    }
    Ok(())
}

fn find_parent<'a>(tree: &'a mut WidgetNode, parent: &WidgetId) -> Result<&'a mut WidgetNode, PatchError> {
    tree.find_mut(parent)
        .ok_or_else(|| PatchError::MissingNode(parent.clone()))
}
