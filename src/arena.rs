//! Append-only storage for tree nodes.
//!
//! Nodes are handed out as `NodeId` indices and linked afterwards, which lets
//! the parser allocate a parent before its children exist and back-patch the
//! `left`/`right` slots once they do. Storage is a chain of fixed-capacity
//! blocks: a full block is never grown, a fresh one is appended instead, so
//! every id stays valid for the life of the arena.

use std::fmt;

use log::trace;

use crate::error::{CompileError, CompileResult};
use crate::tokenizer::Token;

/// Number of nodes held by one block.
pub const BLOCK_CAPACITY: usize = 100;

/// Stable handle to a node inside a `NodeArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
  pub fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Which child slot a link fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
  Left,
  Right,
}

/// One tree node. What `left` and `right` mean depends on the token; see the
/// parser for the layout of each construct.
#[derive(Debug, Clone)]
pub struct Node {
  pub token: Token,
  pub left: Option<NodeId>,
  pub right: Option<NodeId>,
  pub parent: Option<NodeId>,
}

impl Node {
  fn new(token: Token) -> Self {
    Self {
      token,
      left: None,
      right: None,
      parent: None,
    }
  }

  pub fn child(&self, side: Side) -> Option<NodeId> {
    match side {
      Side::Left => self.left,
      Side::Right => self.right,
    }
  }
}

#[derive(Debug, Default)]
pub struct NodeArena {
  blocks: Vec<Vec<Node>>,
  len: usize,
  // Union-find over node indices; each set's representative is the
  // parentless node at the top of that tree.
  roots: Vec<usize>,
}

impl NodeArena {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn block_count(&self) -> usize {
    self.blocks.len()
  }

  /// Store a new, unlinked node. Ids increase by one per call.
  pub fn alloc(&mut self, token: Token) -> NodeId {
    let id = NodeId(self.len);
    if id.0 % BLOCK_CAPACITY == 0 {
      self.blocks.push(Vec::with_capacity(BLOCK_CAPACITY));
    }
    self.blocks[id.0 / BLOCK_CAPACITY].push(Node::new(token));
    self.roots.push(id.0);
    self.len += 1;
    id
  }

  pub fn try_get(&self, id: NodeId) -> Option<&Node> {
    self
      .blocks
      .get(id.0 / BLOCK_CAPACITY)?
      .get(id.0 % BLOCK_CAPACITY)
  }

  /// Look up a node. Panics if `id` was not handed out by this arena.
  pub fn get(&self, id: NodeId) -> &Node {
    &self.blocks[id.0 / BLOCK_CAPACITY][id.0 % BLOCK_CAPACITY]
  }

  fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
    self
      .blocks
      .get_mut(id.0 / BLOCK_CAPACITY)?
      .get_mut(id.0 % BLOCK_CAPACITY)
  }

  pub fn link_left(&mut self, parent: NodeId, child: NodeId) -> CompileResult<()> {
    self.link(parent, Side::Left, child)
  }

  pub fn link_right(&mut self, parent: NodeId, child: NodeId) -> CompileResult<()> {
    self.link(parent, Side::Right, child)
  }

  /// Fill one child slot of `parent`. Slots are written once, a node gets at
  /// most one parent, and links that would close a cycle are refused, so the
  /// result is always a tree.
  pub fn link(&mut self, parent: NodeId, side: Side, child: NodeId) -> CompileResult<()> {
    if parent == child {
      return Err(CompileError::internal(format!(
        "cannot link node {parent} to itself"
      )));
    }
    if self.try_get(parent).is_none() {
      return Err(CompileError::internal(format!("unknown node {parent}")));
    }
    let Some(child_node) = self.try_get(child) else {
      return Err(CompileError::internal(format!("unknown node {child}")));
    };
    if let Some(existing) = child_node.parent {
      return Err(CompileError::internal(format!(
        "node {child} already belongs to {existing}"
      )));
    }
    // A parentless child tops its own tree, so the link closes a cycle
    // exactly when `parent` already hangs below it.
    let root = self.tree_root(parent);
    if root == child.0 {
      return Err(CompileError::internal(format!(
        "linking {child} under {parent} would create a cycle"
      )));
    }

    let Some(parent_node) = self.get_mut(parent) else {
      return Err(CompileError::internal(format!("unknown node {parent}")));
    };
    let slot = match side {
      Side::Left => &mut parent_node.left,
      Side::Right => &mut parent_node.right,
    };
    if let Some(existing) = slot {
      return Err(CompileError::internal(format!(
        "{side:?} slot of {parent} already holds {existing}"
      )));
    }
    *slot = Some(child);
    trace!("link {parent} -{side:?}-> {child}");

    if let Some(child_node) = self.get_mut(child) {
      child_node.parent = Some(parent);
    }
    self.roots[child.0] = root;
    Ok(())
  }

  /// Index of the topmost node above `id`, halving the path on the way.
  fn tree_root(&mut self, id: NodeId) -> usize {
    let mut current = id.0;
    while self.roots[current] != current {
      self.roots[current] = self.roots[self.roots[current]];
      current = self.roots[current];
    }
    current
  }

  /// Iterate a chain of nodes by following `right` links from `start`.
  pub fn chain(&self, start: NodeId) -> Chain<'_> {
    Chain {
      arena: self,
      current: Some(start),
    }
  }
}

pub struct Chain<'a> {
  arena: &'a NodeArena,
  current: Option<NodeId>,
}

impl Iterator for Chain<'_> {
  type Item = NodeId;

  fn next(&mut self) -> Option<Self::Item> {
    let id = self.current?;
    self.current = self.arena.try_get(id).and_then(|node| node.right);
    Some(id)
  }
}
