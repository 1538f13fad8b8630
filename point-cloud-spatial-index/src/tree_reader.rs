/// Reads a spatial index tree file back into an in-memory node list.
use crate::bounding_volume::{BoundingVolume, BoundingVolumeKind};
use crate::error::{BuildError, Result};
use crate::id_list::Side;
use constants::file_format::{
    FLOATS_PER_POINT, LEAF_SENTINEL_BITS, TREE_HEADER_WORDS, UNRESOLVED_WORD, WORD_BYTES,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    /// `u32::MAX` if the writer never finished.
    pub depth: u32,
    pub element_count: u32,
    pub kind: BoundingVolumeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Leaf {
        ids: Vec<u32>,
    },
    Internal {
        /// Absent for trees without descriptors.
        volume: Option<BoundingVolume>,
        median_id: u32,
        /// Index into [`TreeView::nodes`].
        left: Option<usize>,
        right: Option<usize>,
    },
}

/// A decoded node with its location in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub word_offset: u32,
    /// Edges from the root.
    pub depth: u32,
    pub node: TreeNode,
}

/// Every node of a tree in depth-first order, root first. Children always
/// come after their parent.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeView {
    pub header: TreeHeader,
    pub nodes: Vec<NodeView>,
}

impl TreeView {
    pub fn root(&self) -> Option<&NodeView> {
        self.nodes.first()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &NodeView> {
        self.nodes
            .iter()
            .filter(|view| matches!(view.node, TreeNode::Leaf { .. }))
    }

    /// Deepest leaf, in edges.
    pub fn max_leaf_depth(&self) -> u32 {
        self.leaves().map(|view| view.depth).max().unwrap_or(0)
    }
}

/// Reads and decodes the tree file at `path`.
pub fn read_tree_file(path: &Path) -> Result<TreeView> {
    let bytes = fs::read(path)?;
    TreeReader::new(&bytes, path)?.read()
}

/// Decoder over the raw bytes of one tree file.
pub struct TreeReader {
    words: Vec<u32>,
    path: PathBuf,
}

impl TreeReader {
    /// `path` only labels errors.
    pub fn new(bytes: &[u8], path: &Path) -> Result<Self> {
        if bytes.len() as u64 % WORD_BYTES != 0 {
            return Err(BuildError::malformed(
                path,
                format!("length {} is not a whole number of words", bytes.len()),
            ));
        }
        let words = bytes
            .chunks_exact(WORD_BYTES as usize)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        Ok(Self {
            words,
            path: path.to_path_buf(),
        })
    }

    fn word(&self, index: usize) -> Result<u32> {
        self.words.get(index).copied().ok_or_else(|| {
            BuildError::malformed(&self.path, format!("truncated at word {index}"))
        })
    }

    fn id_from_offset(&self, word: u32, at: usize) -> Result<u32> {
        if word % FLOATS_PER_POINT != 0 {
            return Err(BuildError::malformed(
                &self.path,
                format!("word {at} holds {word}, which is not a position offset"),
            ));
        }
        Ok(word / FLOATS_PER_POINT)
    }

    pub fn header(&self) -> Result<TreeHeader> {
        let code = self.word(2)?;
        let kind = BoundingVolumeKind::from_code(code).ok_or_else(|| {
            BuildError::malformed(&self.path, format!("unknown bounding volume kind {code}"))
        })?;
        Ok(TreeHeader {
            depth: self.word(0)?,
            element_count: self.word(1)?,
            kind,
        })
    }

    /// Follows every child offset from the root. Each node must be reached
    /// exactly once and the nodes must cover the file without gaps.
    pub fn read(&self) -> Result<TreeView> {
        let header = self.header()?;
        let descriptor_words = header.kind.word_count() as usize;

        let mut nodes: Vec<NodeView> = Vec::new();
        let mut visited = HashSet::new();
        let mut covered = TREE_HEADER_WORDS as usize;
        let mut stack: Vec<(u32, u32, Option<(usize, Side)>)> =
            vec![(TREE_HEADER_WORDS as u32, 0, None)];

        while let Some((offset, depth, parent)) = stack.pop() {
            if (offset as u64) < TREE_HEADER_WORDS || !visited.insert(offset) {
                return Err(BuildError::malformed(
                    &self.path,
                    format!("child offset {offset} does not start a distinct node"),
                ));
            }
            let at = offset as usize;

            let node = if self.word(at)? == LEAF_SENTINEL_BITS {
                let count = self.word(at + 1)? as usize;
                let ids = (0..count)
                    .map(|i| self.id_from_offset(self.word(at + 2 + i)?, at + 2 + i))
                    .collect::<Result<Vec<_>>>()?;
                covered += 2 + count;
                TreeNode::Leaf { ids }
            } else {
                let end = at + descriptor_words;
                let volume = match header.kind {
                    BoundingVolumeKind::None => None,
                    kind => {
                        let words = self.words.get(at..end).unwrap_or_default();
                        Some(BoundingVolume::from_words(kind, words).ok_or_else(|| {
                            BuildError::malformed(
                                &self.path,
                                format!("bad {kind} descriptor at word {at}"),
                            )
                        })?)
                    }
                };
                let median_id = self.id_from_offset(self.word(end)?, end)?;
                let index = nodes.len();
                for (side, slot) in [(Side::Right, end + 2), (Side::Left, end + 1)] {
                    let child = self.word(slot)?;
                    if child != UNRESOLVED_WORD {
                        stack.push((child, depth + 1, Some((index, side))));
                    }
                }
                covered += descriptor_words + 3;
                TreeNode::Internal {
                    volume,
                    median_id,
                    left: None,
                    right: None,
                }
            };

            let index = nodes.len();
            nodes.push(NodeView {
                word_offset: offset,
                depth,
                node,
            });
            if let Some((parent, side)) = parent {
                if let TreeNode::Internal { left, right, .. } = &mut nodes[parent].node {
                    match side {
                        Side::Left => *left = Some(index),
                        Side::Right => *right = Some(index),
                    }
                }
            }
        }

        if covered != self.words.len() {
            return Err(BuildError::malformed(
                &self.path,
                format!(
                    "nodes cover {covered} of {} words",
                    self.words.len()
                ),
            ));
        }

        Ok(TreeView { header, nodes })
    }
}
