//! The directory entry tree
//!
//! Entries live in an arena and are addressed by [`PropertyId`] handles that
//! stay valid for as long as the entry is attached; a deleted entry's slot
//! goes to the next entry added. Each storage keeps its children in a map
//! ordered by [`EntryName`], which is exactly the order the on-disk sibling
//! tree has to follow.
//!
//! On-disk sibling links are directory indices. They are rebuilt from the
//! ordered maps by [`PropertyTable::pre_write`]: indices are assigned in
//! depth-first preorder (root first), then each storage's children are linked
//! as a balanced chain around the middle child. Every node is written black.

use super::name::EntryName;
use super::record::{NodeColor, Property, PropertyType};
use crate::consts::*;
use crate::error::{CfbError, Result};
use crate::storage::BigBlockSize;
use fixedbitset::FixedBitSet;
use std::collections::BTreeMap;
use std::io::Write;

/// Handle to an entry in a [`PropertyTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(usize);

#[derive(Debug, Clone)]
struct Node {
    property: Property,
    parent: Option<PropertyId>,
    children: BTreeMap<EntryName, PropertyId>,
}

/// In-memory directory tree of a compound file
#[derive(Debug, Clone)]
pub struct PropertyTable {
    block_size: BigBlockSize,
    nodes: Vec<Option<Node>>,
    /// Emptied arena slots, handed out again by `attach`
    free: Vec<usize>,
    /// Entries in directory index order, valid after `pre_write`
    order: Vec<PropertyId>,
}

impl PropertyTable {
    /// Create a table holding only a root entry
    pub fn new(block_size: BigBlockSize) -> Self {
        let root = Node {
            property: Property::root(),
            parent: None,
            children: BTreeMap::new(),
        };
        Self {
            block_size,
            nodes: vec![Some(root)],
            free: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Build the tree from the directory stream's bytes.
    ///
    /// Only entries reachable from the root are kept. Unreachable records are
    /// dropped and their slots reused on the next write.
    pub fn load(data: &[u8], block_size: BigBlockSize) -> Result<Self> {
        let records: Vec<&[u8]> = data.chunks_exact(PROPERTY_SIZE).collect();
        if records.is_empty() {
            return Err(CfbError::Corrupted("Directory stream is empty".to_string()));
        }

        let root = Property::from_bytes(records[0], 0, block_size)?;
        if root.property_type() != PropertyType::Root {
            return Err(CfbError::Corrupted(format!(
                "First directory entry is {:?}, not the root",
                root.property_type()
            )));
        }

        let root_child = root.child();
        let mut table = Self {
            block_size,
            nodes: vec![Some(Node {
                property: root,
                parent: None,
                children: BTreeMap::new(),
            })],
            free: Vec::new(),
            order: Vec::new(),
        };

        let mut visited = FixedBitSet::with_capacity(records.len());
        visited.insert(0);

        // (parent, root of its sibling tree)
        let mut pending = vec![(table.root(), root_child)];

        while let Some((parent, subtree)) = pending.pop() {
            let mut siblings = vec![subtree];
            while let Some(index) = siblings.pop() {
                if index == NOSTREAM {
                    continue;
                }
                let slot = index as usize;
                if index > MAXREGSID || slot >= records.len() {
                    return Err(CfbError::Corrupted(format!(
                        "Directory link to entry {} out of {}",
                        index,
                        records.len()
                    )));
                }
                if visited.put(slot) {
                    return Err(CfbError::Corrupted(format!(
                        "Directory entry {} is linked more than once",
                        index
                    )));
                }

                let property = Property::from_bytes(records[slot], index, block_size)?;
                match property.property_type() {
                    PropertyType::Directory | PropertyType::Document => {},
                    other => {
                        return Err(CfbError::Corrupted(format!(
                            "Directory entry {} of type {:?} cannot be a child",
                            index, other
                        )));
                    },
                }

                siblings.push(property.previous());
                siblings.push(property.next());
                let child = property.child();
                let is_directory = property.is_directory();

                let id = table.attach(parent, property).map_err(|e| match e {
                    CfbError::NameCollision(name) => CfbError::Corrupted(format!(
                        "Duplicate directory entry name '{}'",
                        name
                    )),
                    other => other,
                })?;
                if is_directory {
                    pending.push((id, child));
                }
            }
        }

        log::debug!(
            "Loaded {} directory entries from {} records",
            table.len(),
            records.len()
        );
        Ok(table)
    }

    /// Handle of the root entry
    pub fn root(&self) -> PropertyId {
        PropertyId(0)
    }

    pub fn block_size(&self) -> BigBlockSize {
        self.block_size
    }

    /// Number of attached entries, root included
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Always false; the root cannot be removed
    pub fn is_empty(&self) -> bool {
        false
    }

    fn node(&self, id: PropertyId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: PropertyId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// The entry behind `id`, or `None` once it has been deleted
    pub fn get(&self, id: PropertyId) -> Option<&Property> {
        self.node(id).map(|n| &n.property)
    }

    pub fn get_mut(&mut self, id: PropertyId) -> Option<&mut Property> {
        self.node_mut(id).map(|n| &mut n.property)
    }

    /// Storage that holds `id`; `None` for the root
    pub fn parent(&self, id: PropertyId) -> Option<PropertyId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Children of `parent` in sibling tree order.
    ///
    /// Streams and deleted entries have no children. Each call starts a
    /// fresh walk.
    pub fn children(&self, parent: PropertyId) -> impl Iterator<Item = PropertyId> + '_ {
        self.node(parent)
            .into_iter()
            .flat_map(|n| n.children.values().copied())
    }

    /// Number of direct children of `parent`
    pub fn child_count(&self, parent: PropertyId) -> usize {
        self.node(parent).map_or(0, |n| n.children.len())
    }

    /// Look up a direct child by name, ignoring case
    pub fn find_child(&self, parent: PropertyId, name: &str) -> Option<PropertyId> {
        let key = EntryName::from_disk(name);
        self.node(parent)
            .and_then(|n| n.children.get(&key))
            .copied()
    }

    /// Attach `property` under `parent`.
    ///
    /// Fails with `NameCollision` (leaving the tree unchanged) when a sibling
    /// already uses the name.
    pub fn add_child(&mut self, parent: PropertyId, property: Property) -> Result<PropertyId> {
        if property.property_type() == PropertyType::Root {
            return Err(CfbError::InvalidArgument(
                "A container has exactly one root entry".to_string(),
            ));
        }
        if property.property_type() == PropertyType::Unknown {
            return Err(CfbError::InvalidArgument(
                "Cannot attach an unallocated entry".to_string(),
            ));
        }
        let mut property = property;
        property.set_index(None);
        property.set_links(NOSTREAM, NOSTREAM, NOSTREAM);
        self.attach(parent, property)
    }

    fn attach(&mut self, parent: PropertyId, property: Property) -> Result<PropertyId> {
        let slot = self.free.last().copied().unwrap_or(self.nodes.len());
        let id = PropertyId(slot);
        let key = property.name().clone();

        let parent_node = self.node_mut(parent).ok_or_else(|| {
            CfbError::NotFound(format!("Parent entry {:?} is not attached", parent))
        })?;
        if !parent_node.property.is_directory() {
            return Err(CfbError::InvalidArgument(format!(
                "'{}' is a stream and cannot hold children",
                parent_node.property.name()
            )));
        }
        if parent_node.children.contains_key(&key) {
            return Err(CfbError::NameCollision(key.to_string()));
        }
        parent_node.children.insert(key, id);

        let node = Some(Node {
            property,
            parent: Some(parent),
            children: BTreeMap::new(),
        });
        if slot == self.nodes.len() {
            self.nodes.push(node);
        } else {
            self.nodes[slot] = node;
            self.free.pop();
        }
        Ok(id)
    }

    /// Detach `child` (and everything below it) from `parent`.
    ///
    /// Returns false, changing nothing, when `child` is not a direct child of
    /// `parent`. The remaining siblings are relinked immediately so no link
    /// refers to the removed entry.
    pub fn delete_child(&mut self, parent: PropertyId, child: PropertyId) -> bool {
        let Some(key) = self
            .node(child)
            .filter(|n| n.parent == Some(parent))
            .map(|n| n.property.name().clone())
        else {
            return false;
        };

        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.remove(&key);
        }

        let mut doomed = vec![child];
        while let Some(id) = doomed.pop() {
            if let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) {
                doomed.extend(node.children.into_values());
                self.free.push(id.0);
            }
        }

        self.link_children(parent);
        true
    }

    /// Rename `id`.
    ///
    /// Returns `Ok(false)` without changing anything when a sibling already
    /// has `new_name`. The root cannot be renamed.
    pub fn change_name(&mut self, id: PropertyId, new_name: EntryName) -> Result<bool> {
        let parent = self
            .parent(id)
            .ok_or_else(|| CfbError::InvalidArgument("The root entry cannot be renamed".to_string()))?;
        let old_name = self
            .get(id)
            .map(|p| p.name().clone())
            .ok_or_else(|| CfbError::NotFound(format!("Entry {:?} is not attached", id)))?;

        let Some(parent_node) = self.node_mut(parent) else {
            return Err(CfbError::NotFound(format!("Parent entry {:?} is not attached", parent)));
        };
        if let Some(&existing) = parent_node.children.get(&new_name)
            && existing != id
        {
            return Ok(false);
        }

        parent_node.children.remove(&old_name);
        parent_node.children.insert(new_name.clone(), id);
        if let Some(property) = self.get_mut(id) {
            property.set_name(new_name);
        }
        self.link_children(parent);
        Ok(true)
    }

    /// Assign final directory indices and rebuild every sibling link.
    ///
    /// Indices follow a depth-first preorder walk from the root, children in
    /// sibling order, so repeated calls over the same tree give the same
    /// result.
    pub fn pre_write(&mut self) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.node(id) {
                // Reverse so the smallest name is visited first
                stack.extend(node.children.values().rev().copied());
            }
        }

        for (index, &id) in order.iter().enumerate() {
            if let Some(property) = self.get_mut(id) {
                property.set_index(Some(index as u32));
                property.set_node_color(NodeColor::Black);
            }
        }

        for &id in &order {
            self.link_children(id);
        }
        self.order = order;
    }

    fn index_of(&self, id: PropertyId) -> u32 {
        self.get(id).and_then(Property::index).unwrap_or(NOSTREAM)
    }

    /// Link a storage's children into a chain around the middle child:
    /// smaller names hang off the middle's left side, larger off its right.
    fn link_children(&mut self, parent: PropertyId) {
        let sorted: Vec<PropertyId> = self.children(parent).collect();
        let Some(parent_node) = self.node(parent) else {
            return;
        };
        if !parent_node.property.is_directory() {
            return;
        }

        let indices: Vec<u32> = sorted.iter().map(|&id| self.index_of(id)).collect();
        let midpoint = sorted.len() / 2;

        let child_root = indices.get(midpoint).copied().unwrap_or(NOSTREAM);
        if let Some(property) = self.get_mut(parent) {
            let (previous, next) = (property.previous(), property.next());
            property.set_links(previous, next, child_root);
        }

        for (j, &id) in sorted.iter().enumerate() {
            let (previous, next) = if j < midpoint {
                let previous = if j > 0 { indices[j - 1] } else { NOSTREAM };
                (previous, NOSTREAM)
            } else if j == midpoint {
                let previous = if j > 0 { indices[j - 1] } else { NOSTREAM };
                let next = indices.get(j + 1).copied().unwrap_or(NOSTREAM);
                (previous, next)
            } else {
                (NOSTREAM, indices.get(j + 1).copied().unwrap_or(NOSTREAM))
            };

            if let Some(property) = self.get_mut(id) {
                let child = property.child();
                property.set_links(previous, next, child);
            }
        }
    }

    /// Number of directory sectors needed for the current tree
    pub fn sector_count(&self) -> usize {
        self.len().div_ceil(self.block_size.properties_per_block())
    }

    /// Serialize the directory stream, padded to whole sectors with
    /// unallocated entries.
    pub fn to_bytes(&mut self) -> Vec<u8> {
        self.pre_write();

        let per_block = self.block_size.properties_per_block();
        let slots = self.order.len().div_ceil(per_block) * per_block;
        let mut data = Vec::with_capacity(slots * PROPERTY_SIZE);

        for &id in &self.order {
            if let Some(property) = self.get(id) {
                data.extend_from_slice(&property.to_bytes());
            }
        }
        for _ in self.order.len()..slots {
            data.extend_from_slice(&Property::empty_record());
        }
        data
    }

    /// Write the serialized directory stream to `out`
    pub fn write_data<W: Write>(&mut self, out: &mut W) -> Result<()> {
        out.write_all(&self.to_bytes())?;
        Ok(())
    }
}
