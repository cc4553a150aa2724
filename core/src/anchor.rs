//! View discovery
//!
//! Resolves the logical view a producer's host node belongs to. The walk
//! goes up through ancestors and crosses shadow-root boundaries to the
//! shadow host. Arbitration only ever sees the resulting [`ViewKey`] and
//! [`StackingKey`]; it never looks at the tree itself.
//!
//! Keys are stable: a container that carries its own id keeps it, others get
//! a key derived from their position (`view:0.3.1`), so resolving the same
//! node twice yields the same key.

use std::cmp::Ordering;

use crate::ports::{HostHandle, ViewKey};

/// Guards against malformed (cyclic) host trees.
const MAX_ANCESTOR_DEPTH: usize = 512;

/// What a node is, as far as view discovery cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRole {
    #[default]
    Element,
    /// Container that defines a logical view (a dashboard view/page)
    ViewContainer,
    /// Editing surface; producers below it are preview producers
    PreviewContainer,
    /// Encapsulation boundary; its host is reached via `shadow_host`
    ShadowRoot,
}

/// Node-level access to the host UI tree.
pub trait HostTree {
    /// Light-tree parent. `None` for roots and shadow roots.
    fn parent(&self, node: HostHandle) -> Option<HostHandle>;
    /// The element hosting `node` when `node` is a shadow root.
    fn shadow_host(&self, node: HostHandle) -> Option<HostHandle>;
    /// Position among the parent's children.
    fn child_index(&self, node: HostHandle) -> Option<u32>;
    fn role(&self, node: HostHandle) -> NodeRole;
    /// Identity already carried by the node, if any.
    fn view_id(&self, node: HostHandle) -> Option<String>;
    /// Whether the node is currently part of the live document.
    fn is_connected(&self, node: HostHandle) -> bool;
}

/// A view resolved from a host node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedView {
    pub key: ViewKey,
    /// The node defining the view; overlays are attached to it
    pub container: HostHandle,
}

/// Position of a node in visual order.
///
/// Two keys are only comparable when they share a root. Smaller paths come
/// first in document order and are treated as topmost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackingKey {
    root: HostHandle,
    path: Vec<u32>,
}

impl StackingKey {
    pub fn new(root: HostHandle, path: Vec<u32>) -> Self {
        Self { root, path }
    }

    /// `None` when the order between the two nodes cannot be determined.
    pub fn visual_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.root == other.root).then(|| self.path.cmp(&other.path))
    }

    pub fn shares_root(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

/// Resolves views and visual order for host nodes.
pub trait AnchorResolver {
    /// `None` means the producer is unresolvable right now (not attached yet,
    /// or outside any view) and is skipped for this pass.
    fn resolve_view(&self, host: HostHandle) -> Option<ResolvedView>;
    fn stacking_key(&self, host: HostHandle) -> Option<StackingKey>;
    /// Whether the node sits inside an editing/preview surface.
    fn is_preview_context(&self, host: HostHandle) -> bool;
    fn is_connected(&self, node: HostHandle) -> bool;
}

/// [`AnchorResolver`] over any [`HostTree`].
#[derive(Debug, Clone)]
pub struct TreeAnchorResolver<T> {
    tree: T,
}

impl<T: HostTree> TreeAnchorResolver<T> {
    pub fn new(tree: T) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    /// Next node up, crossing shadow boundaries.
    fn ascend(&self, node: HostHandle) -> Option<HostHandle> {
        self.tree
            .parent(node)
            .or_else(|| self.tree.shadow_host(node))
    }

    /// `node` followed by all of its ancestors.
    fn ancestors(&self, node: HostHandle) -> impl Iterator<Item = HostHandle> + '_ {
        std::iter::successors(Some(node), move |&n| self.ascend(n)).take(MAX_ANCESTOR_DEPTH)
    }

    /// Root and root-to-node path. A shadow root sorts before the host's
    /// light children (index 0), light children are shifted by one.
    fn position(&self, node: HostHandle) -> Option<(HostHandle, Vec<u32>)> {
        let mut path = Vec::new();
        let mut current = node;
        for _ in 0..MAX_ANCESTOR_DEPTH {
            if let Some(parent) = self.tree.parent(current) {
                path.push(self.tree.child_index(current)?.saturating_add(1));
                current = parent;
            } else if let Some(host) = self.tree.shadow_host(current) {
                path.push(0);
                current = host;
            } else {
                path.reverse();
                return Some((current, path));
            }
        }
        None
    }

    fn synthesize_key(&self, container: HostHandle) -> Option<ViewKey> {
        let (_, path) = self.position(container)?;
        let joined = path
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Some(ViewKey::new(format!("view:{joined}")))
    }
}

impl<T: HostTree> AnchorResolver for TreeAnchorResolver<T> {
    fn resolve_view(&self, host: HostHandle) -> Option<ResolvedView> {
        if !self.tree.is_connected(host) {
            return None;
        }
        let container = self
            .ancestors(host)
            .find(|&n| self.tree.role(n) == NodeRole::ViewContainer)?;
        let key = match self.tree.view_id(container) {
            Some(id) => ViewKey::new(id),
            None => self.synthesize_key(container)?,
        };
        Some(ResolvedView { key, container })
    }

    fn stacking_key(&self, host: HostHandle) -> Option<StackingKey> {
        if !self.tree.is_connected(host) {
            return None;
        }
        let (root, path) = self.position(host)?;
        Some(StackingKey::new(root, path))
    }

    fn is_preview_context(&self, host: HostHandle) -> bool {
        self.ancestors(host)
            .any(|n| self.tree.role(n) == NodeRole::PreviewContainer)
    }

    fn is_connected(&self, node: HostHandle) -> bool {
        self.tree.is_connected(node)
    }
}
