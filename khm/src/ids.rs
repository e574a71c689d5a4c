//! Node ID policies shared by the decoder and the mesh builder.

/// Largest ID the game's loader addresses; skin bone slots are a single byte.
pub const MAX_NODE_ID: u32 = 255;

/// Legacy compatibility policy: IDs above [`MAX_NODE_ID`] are clamped, not rejected.
///
/// Older exporters occasionally wrote mesh IDs past 255 and the game tolerates them the
/// same way, so decoded files keep loading.
#[inline]
pub fn clamp_id(id: u32) -> u32 {
    id.min(MAX_NODE_ID)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    Bone,
    Helper,
}

/// One entry of an abstract node forest. `parent` indexes into the same slice.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ForestNode {
    pub kind: NodeKind,
    pub parent: Option<usize>,
}

/// Result of [`assign_ids`], indexed like the input forest.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IdAssignment {
    pub ids: Vec<u32>,
    pub parents: Vec<Option<u32>>,
    pub bone_count: usize,
    pub helper_count: usize,
}

impl IdAssignment {
    /// First ID after every bone and helper; the mesh takes this one.
    pub fn next_id(&self) -> u32 {
        (self.bone_count + self.helper_count) as u32
    }
}

/// Assigns dense, 0-based IDs: every bone first, then every helper, each group in input
/// order. Parents are resolved in a second pass, so a node may name a parent that comes
/// later in the input.
///
/// Parent links that point outside the forest, at the node itself, or into a cycle are
/// dropped (the node becomes a root) and logged.
pub fn assign_ids(forest: &[ForestNode]) -> IdAssignment {
    let mut ids = vec![0u32; forest.len()];
    let mut next = 0u32;
    let mut bone_count = 0usize;
    let mut helper_count = 0usize;

    for kind in [NodeKind::Bone, NodeKind::Helper] {
        for (index, node) in forest.iter().enumerate() {
            if node.kind != kind {
                continue;
            }
            ids[index] = next;
            next += 1;
            match kind {
                NodeKind::Bone => bone_count += 1,
                NodeKind::Helper => helper_count += 1,
            }
        }
    }

    let parents = forest
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let parent = node.parent?;
            if parent >= forest.len() || parent == index {
                tracing::warn!(node = index, parent, "unresolvable parent, treating node as root");
                return None;
            }
            if reaches_cycle(forest, index) {
                tracing::warn!(
                    node = index,
                    parent,
                    "parent chain is cyclic, treating node as root"
                );
                return None;
            }
            Some(ids[parent])
        })
        .collect();

    IdAssignment {
        ids,
        parents,
        bone_count,
        helper_count,
    }
}

fn reaches_cycle(forest: &[ForestNode], start: usize) -> bool {
    let mut current = start;
    for _ in 0..forest.len() {
        match forest[current].parent {
            Some(parent) if parent < forest.len() => {
                if parent == start {
                    return true;
                }
                current = parent;
            }
            _ => return false,
        }
    }
    true
}
