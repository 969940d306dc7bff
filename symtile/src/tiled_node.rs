// tiled_node.rs — Tiled graph nodes
//
// A `SymbolicTiledNode` pairs one instruction with one symbolic tile of its
// output. The same instruction may appear several times with different
// tiles (e.g. a parameter read both row-wise and fully). Nodes live in the
// analysis arena and refer to their operands by arena index.
//
// Preconditions: the tile was derived in the same `ExprContext` used to hash it.
// Postconditions: `structural_hash` depends only on the operation, the shape
//                 and the rendered tile, never on arena positions.
// Failure modes: none.
// Side effects: none.

use sha2::{Digest, Sha256};

use crate::expr::ExprContext;
use crate::graph::{Instruction, InstrId};
use crate::symbolic_tile::SymbolicTile;

#[derive(Debug, Clone)]
pub struct SymbolicTiledNode {
    pub instr: InstrId,
    pub tile: SymbolicTile,
    /// Arena indices of the operand nodes, in operand order.
    pub operands: Vec<usize>,
    pub hash: u64,
}

impl SymbolicTiledNode {
    pub fn new(cx: &ExprContext, instr: &Instruction, tile: SymbolicTile) -> Self {
        let hash = structural_hash(cx, instr, &tile);
        SymbolicTiledNode {
            instr: instr.id,
            tile,
            operands: Vec::new(),
            hash,
        }
    }

    /// Whether this node stands for `instr` read through `tile`.
    pub fn matches(&self, instr: InstrId, tile: &SymbolicTile) -> bool {
        self.instr == instr && self.tile.same_mapping(tile)
    }
}

/// SHA-256 over the operation, its attributes, the output shape and the
/// rendered offsets, sizes and strides; first 8 bytes as `u64`.
///
/// Two nodes of different instructions can share a hash; the analysis
/// confirms every hash hit with `matches`.
pub fn structural_hash(cx: &ExprContext, instr: &Instruction, tile: &SymbolicTile) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(instr.kind.name().as_bytes());
    hasher.update(b"\0");
    hasher.update(instr.kind.attrs_string().as_bytes());
    hasher.update(b"\0");
    for d in &instr.shape {
        hasher.update(d.to_le_bytes());
    }
    for dim in &tile.dims {
        for expr in [dim.offset, dim.size, dim.stride] {
            hasher.update(b"\0");
            hasher.update(cx.render(expr).as_bytes());
        }
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::computation_from_text;

    #[test]
    fn hash_ignores_instruction_identity() {
        let comp = computation_from_text(
            "fusion f {
                a = parameter : [8, 4]
                b = parameter : [8, 4]
                ROOT m = add(a, b) : [8, 4]
            }",
        )
        .computation
        .unwrap();
        let cx = ExprContext::new();
        let tile = SymbolicTile::root(&cx, 2);
        let na = SymbolicTiledNode::new(&cx, comp.find("a").unwrap(), tile.clone());
        let nb = SymbolicTiledNode::new(&cx, comp.find("b").unwrap(), tile.clone());
        assert_eq!(na.hash, nb.hash);
        assert!(!na.matches(nb.instr, &nb.tile));
        assert!(na.matches(na.instr, &tile));
    }

    #[test]
    fn hash_depends_on_tile_and_shape() {
        let comp = computation_from_text(
            "fusion f {
                a = parameter : [8, 4]
                ROOT e = exp(a) : [8, 4]
            }",
        )
        .computation
        .unwrap();
        let cx = ExprContext::new();
        let a = comp.find("a").unwrap();
        let e = comp.find("e").unwrap();
        let tile = SymbolicTile::root(&cx, 2);
        let mut other = tile.clone();
        other.dims[1].size = cx.constant(4);
        assert_ne!(structural_hash(&cx, a, &tile), structural_hash(&cx, a, &other));
        assert_ne!(structural_hash(&cx, a, &tile), structural_hash(&cx, e, &tile));
    }

    #[test]
    fn hash_is_stable_across_contexts() {
        let comp = computation_from_text("fusion f { ROOT a = parameter : [16] }")
            .computation
            .unwrap();
        let (c1, c2) = (ExprContext::new(), ExprContext::new());
        c2.constant(99);
        let h1 = structural_hash(&c1, comp.root(), &SymbolicTile::root(&c1, 1));
        let h2 = structural_hash(&c2, comp.root(), &SymbolicTile::root(&c2, 1));
        assert_eq!(h1, h2);
    }
}
