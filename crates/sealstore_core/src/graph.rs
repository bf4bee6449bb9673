//! Related-record traversal.
//!
//! Records declare outgoing references through [`Record::related`]. The
//! traversal walks them breadth-first from a root record and collects every
//! reachable record once into an arena-backed [`RecordGraph`]. Cycles are
//! harmless: a record already in the arena only gains an edge.

use crate::envelope::EnvelopeKey;
use crate::error::{CoreError, CoreResult};
use crate::manager::StorageManager;
use crate::record::{Record, RecordRef};
use crate::types::RecordId;
use sealstore_codec::{from_value, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// One record reached by a traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Type tag of the record.
    pub type_tag: String,
    /// Record identifier.
    pub id: RecordId,
    /// Distance from the root.
    pub depth: usize,
    /// The opened record as a dynamic value.
    pub fields: Value,
}

impl GraphNode {
    /// Decodes the node as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the node is not a `T`, and
    /// [`CoreError::Serialization`] if decoding fails.
    pub fn decode<T: Record>(&self) -> CoreResult<T> {
        if self.type_tag != T::TYPE_NAME {
            return Err(CoreError::invalid_operation(format!(
                "node {}/{} is not a {}",
                self.type_tag,
                self.id,
                T::TYPE_NAME
            )));
        }
        Ok(from_value(&self.fields)?)
    }
}

/// A reference between two nodes, as arena indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
    /// Index of the referring node.
    pub from: usize,
    /// Index of the referenced node.
    pub to: usize,
}

/// Records reachable from a root, in breadth-first order.
#[derive(Debug, Clone, Default)]
pub struct RecordGraph {
    /// Visited records. The root is at index 0.
    pub nodes: Vec<GraphNode>,
    /// References between visited records.
    pub edges: Vec<GraphEdge>,
    /// References to absent records or unregistered types.
    pub missing: Vec<RecordRef>,
}

impl RecordGraph {
    /// Returns the root node.
    #[must_use]
    pub fn root(&self) -> Option<&GraphNode> {
        self.nodes.first()
    }

    /// Finds a node by type tag and id.
    #[must_use]
    pub fn find(&self, type_tag: &str, id: &RecordId) -> Option<&GraphNode> {
        self.nodes
            .iter()
            .find(|node| node.type_tag == type_tag && node.id == *id)
    }

    /// Returns the nodes referenced by node `index`.
    pub fn neighbors(&self, index: usize) -> impl Iterator<Item = &GraphNode> {
        self.edges
            .iter()
            .filter(move |edge| edge.from == index)
            .filter_map(|edge| self.nodes.get(edge.to))
    }
}

impl StorageManager {
    /// Loads `T` with id `id` and every record reachable from it within
    /// `max_depth` references.
    ///
    /// The depth is capped by `Config::max_graph_depth`. Related types must
    /// have been registered (or used) on this manager to be decoded;
    /// otherwise their references are reported in
    /// [`RecordGraph::missing`]. Runs on the reader path.
    ///
    /// Returns `None` if the root record does not exist.
    ///
    /// # Errors
    ///
    /// Returns read errors for any visited record.
    pub fn fetch_related<T: Record>(
        &self,
        id: &RecordId,
        max_depth: usize,
    ) -> CoreResult<Option<RecordGraph>> {
        let depth_limit = max_depth.min(self.config().max_graph_depth);
        let ctx = self.reader_context();
        let registry = ctx.registry();
        let pipeline = ctx.pipeline();
        let descriptor = registry.register::<T>()?;

        let mut graph = RecordGraph::default();
        let mut index: HashMap<EnvelopeKey, usize> = HashMap::new();
        let mut reported: HashSet<RecordRef> = HashSet::new();
        let mut queue = VecDeque::new();

        let root = RecordRef::to::<T>(id.clone());
        let Some(envelope) = ctx.get(&root.type_tag, &root.id) else {
            return Ok(None);
        };
        graph.nodes.push(GraphNode {
            type_tag: root.type_tag.clone(),
            id: root.id.clone(),
            depth: 0,
            fields: pipeline.open_value(&descriptor, &envelope)?,
        });
        index.insert(EnvelopeKey::new(root.type_tag, root.id), 0);
        queue.push_back(0);

        while let Some(from) = queue.pop_front() {
            let node = &graph.nodes[from];
            if node.depth >= depth_limit {
                continue;
            }
            let depth = node.depth + 1;
            let Some(descriptor) = registry.get(&node.type_tag) else {
                continue;
            };

            for target in descriptor.related(&node.fields)? {
                let key = EnvelopeKey::new(target.type_tag.clone(), target.id.clone());
                if let Some(&to) = index.get(&key) {
                    graph.edges.push(GraphEdge { from, to });
                    continue;
                }

                let opened = match (registry.get(&target.type_tag), ctx.get(&target.type_tag, &target.id)) {
                    (Some(target_desc), Some(envelope)) => {
                        Some(pipeline.open_value(&target_desc, &envelope)?)
                    }
                    _ => None,
                };
                let Some(fields) = opened else {
                    if reported.insert(target.clone()) {
                        graph.missing.push(target);
                    }
                    continue;
                };

                let to = graph.nodes.len();
                graph.nodes.push(GraphNode {
                    type_tag: target.type_tag,
                    id: target.id,
                    depth,
                    fields,
                });
                index.insert(key, to);
                graph.edges.push(GraphEdge { from, to });
                queue.push_back(to);
            }
        }

        debug!(
            type_tag = T::TYPE_NAME,
            %id,
            nodes = graph.nodes.len(),
            missing = graph.missing.len(),
            "fetched related records"
        );
        Ok(Some(graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use crate::strategy::EncryptionStrategy;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Folder {
        id: String,
        children: Vec<String>,
        #[serde(default)]
        owner: Option<String>,
    }

    impl Record for Folder {
        const TYPE_NAME: &'static str = "Folder";

        fn record_id(&self) -> RecordId {
            RecordId::new(self.id.clone())
        }

        fn related(&self) -> Vec<RecordRef> {
            let mut refs: Vec<_> = self
                .children
                .iter()
                .map(|child| RecordRef::to::<Folder>(child.as_str()))
                .collect();
            if let Some(owner) = &self.owner {
                refs.push(RecordRef {
                    type_tag: "Owner".into(),
                    id: RecordId::from(owner.as_str()),
                });
            }
            refs
        }
    }

    fn folder(id: &str, children: &[&str]) -> Folder {
        Folder {
            id: id.into(),
            children: children.iter().map(|c| (*c).to_owned()).collect(),
            owner: None,
        }
    }

    fn manager() -> StorageManager {
        StorageManager::open_in_memory(EncryptionStrategy::Full(EncryptionKey::generate())).unwrap()
    }

    #[test]
    fn walks_breadth_first_and_visits_once() {
        let manager = manager();
        manager.save(&folder("root", &["a", "b"])).unwrap();
        manager.save(&folder("a", &["c", "root"])).unwrap();
        manager.save(&folder("b", &["c"])).unwrap();
        manager.save(&folder("c", &[])).unwrap();

        let graph = manager
            .fetch_related::<Folder>(&RecordId::from("root"), 5)
            .unwrap()
            .unwrap();

        let ids: Vec<_> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["root", "a", "b", "c"]);
        assert_eq!(graph.edges.len(), 5);
        assert_eq!(graph.find("Folder", &RecordId::from("c")).unwrap().depth, 2);
        assert_eq!(graph.neighbors(0).count(), 2);

        let root: Folder = graph.root().unwrap().decode().unwrap();
        assert_eq!(root, folder("root", &["a", "b"]));
    }

    #[test]
    fn depth_limit_stops_expansion() {
        let manager = manager();
        manager.save(&folder("1", &["2"])).unwrap();
        manager.save(&folder("2", &["3"])).unwrap();
        manager.save(&folder("3", &[])).unwrap();

        let graph = manager
            .fetch_related::<Folder>(&RecordId::from("1"), 1)
            .unwrap()
            .unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.missing.is_empty());
    }

    #[test]
    fn absent_and_unregistered_targets_are_missing() {
        let manager = manager();
        let mut root = folder("root", &["gone", "gone"]);
        root.owner = Some("alice".into());
        manager.save(&root).unwrap();

        let graph = manager
            .fetch_related::<Folder>(&RecordId::from("root"), 3)
            .unwrap()
            .unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.missing.len(), 2);
        assert_eq!(graph.missing[1].type_tag, "Owner");
    }

    #[test]
    fn absent_root_is_none() {
        let manager = manager();
        assert!(manager
            .fetch_related::<Folder>(&RecordId::from("nope"), 3)
            .unwrap()
            .is_none());
    }
}
