//! Control-flow structure index: predecessors, successors, reachability and
//! dominators.
//!
//! The index is rebuilt from scratch after structural mutation; passes
//! invalidate it rather than patching it incrementally.

use crate::error::{Error, Result};
use crate::opt::code::{BlockId, OirFunction};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::EntityRef;
use smallvec::SmallVec;

#[derive(Clone, Default)]
struct StructureNode {
    predecessors: SmallVec<[BlockId; 4]>,
    successors: SmallVec<[BlockId; 4]>,
    reachable: bool,
    idom: PackedOption<BlockId>,
}

/// The per-function structure index.
#[derive(Default)]
pub struct OirCodeStructure {
    nodes: Vec<StructureNode>,
    postorder: Vec<BlockId>,
    valid: bool,
}

impl OirCodeStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Drop all derived data; the next query requires `build`.
    pub fn invalidate(&mut self) {
        self.nodes.clear();
        self.postorder.clear();
        self.valid = false;
    }

    /// Recompute the whole index for `func`.
    pub fn build(&mut self, func: &OirFunction) -> Result<()> {
        self.invalidate();
        self.nodes = vec![StructureNode::default(); func.block_count()];

        for block in func.block_ids() {
            if let Some(terminator) = func.block_terminator(block) {
                for target in func.terminator_targets(terminator)? {
                    if !self.nodes[block.index()].successors.contains(&target) {
                        self.nodes[block.index()].successors.push(target);
                    }
                    if !self.nodes[target.index()].predecessors.contains(&block) {
                        self.nodes[target.index()].predecessors.push(block);
                    }
                }
            }
        }

        let entry = match func.entry_block.expand() {
            Some(entry) => entry,
            None => {
                self.valid = true;
                return Ok(());
            }
        };

        // Reachability plus postorder in one depth-first walk.
        let mut state = vec![0u8; self.nodes.len()];
        let mut stack = vec![entry];
        while let Some(&block) = stack.last() {
            match state[block.index()] {
                0 => {
                    state[block.index()] = 1;
                    self.nodes[block.index()].reachable = true;
                    let succs = self.nodes[block.index()].successors.clone();
                    for succ in succs {
                        if state[succ.index()] == 0 {
                            stack.push(succ);
                        }
                    }
                }
                1 => {
                    state[block.index()] = 2;
                    self.postorder.push(block);
                    stack.pop();
                }
                _ => {
                    stack.pop();
                }
            }
        }

        self.compute_dominators(entry);
        self.valid = true;
        Ok(())
    }

    /// Iterative dominator computation over reverse postorder.
    fn compute_dominators(&mut self, entry: BlockId) {
        let mut rpo_index = vec![usize::MAX; self.nodes.len()];
        for (i, block) in self.postorder.iter().rev().enumerate() {
            rpo_index[block.index()] = i;
        }
        self.nodes[entry.index()].idom = Some(entry).into();

        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.postorder.clone().iter().rev() {
                if block == entry {
                    continue;
                }
                let mut new_idom: Option<BlockId> = None;
                let preds = self.nodes[block.index()].predecessors.clone();
                for pred in preds {
                    if self.nodes[pred.index()].idom.is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(other) => self.intersect(pred, other, &rpo_index, entry),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if self.nodes[block.index()].idom.expand() != Some(new_idom) {
                        self.nodes[block.index()].idom = Some(new_idom).into();
                        changed = true;
                    }
                }
            }
        }
    }

    fn intersect(
        &self,
        mut a: BlockId,
        mut b: BlockId,
        rpo_index: &[usize],
        entry: BlockId,
    ) -> BlockId {
        while a != b {
            while rpo_index[a.index()] > rpo_index[b.index()] {
                if a == entry {
                    return entry;
                }
                a = self.nodes[a.index()].idom.expand().unwrap_or(entry);
            }
            while rpo_index[b.index()] > rpo_index[a.index()] {
                if b == entry {
                    return entry;
                }
                b = self.nodes[b.index()].idom.expand().unwrap_or(entry);
            }
        }
        a
    }

    fn node(&self, block: BlockId) -> Result<&StructureNode> {
        self.nodes
            .get(block.index())
            .ok_or(Error::OutOfBounds("block id past the structure index"))
    }

    pub fn predecessors(&self, block: BlockId) -> Result<&[BlockId]> {
        Ok(&self.node(block)?.predecessors)
    }

    pub fn successors(&self, block: BlockId) -> Result<&[BlockId]> {
        Ok(&self.node(block)?.successors)
    }

    pub fn is_reachable_from_entry(&self, block: BlockId) -> Result<bool> {
        Ok(self.node(block)?.reachable)
    }

    /// Immediate dominator; the entry block dominates itself.
    pub fn immediate_dominator(&self, block: BlockId) -> Result<Option<BlockId>> {
        Ok(self.node(block)?.idom.expand())
    }

    /// Whether `dominator` dominates `block`.
    pub fn dominates(&self, dominator: BlockId, block: BlockId) -> Result<bool> {
        let mut cursor = block;
        loop {
            if cursor == dominator {
                return Ok(true);
            }
            match self.node(cursor)?.idom.expand() {
                Some(idom) if idom != cursor => cursor = idom,
                _ => return Ok(false),
            }
        }
    }

    /// Blocks in postorder over the reachable subgraph.
    pub fn postorder(&self) -> &[BlockId] {
        &self.postorder
    }

    pub fn num_of_blocks(&self) -> usize {
        self.nodes.len()
    }

    /// Check that every φ-node's predecessor set matches the CFG: each
    /// linked block must be an actual predecessor that terminates with an
    /// edge into the φ's block.
    pub fn verify_phis(&self, func: &OirFunction) -> Result<()> {
        for block in func.block_ids() {
            let preds = self.predecessors(block)?;
            for phi in &func.block(block)?.phis {
                for (pred, _) in func.phi(*phi)?.links() {
                    if !preds.contains(pred) {
                        return Err(Error::InvalidState(
                            "phi link from a block that is not a predecessor",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FuncDeclId;
    use crate::opt::ops::{CondVariant, OpWidth};

    fn diamond() -> (OirFunction, [BlockId; 4]) {
        let mut func = OirFunction::new(FuncDeclId::new(0));
        let entry = func.new_block();
        let left = func.new_block();
        let right = func.new_block();
        let join = func.new_block();
        let cond = func.int_const(entry, 1).unwrap();
        func.finalize_branch(entry, CondVariant::W8, cond, left, right)
            .unwrap();
        func.finalize_jump(left, join).unwrap();
        func.finalize_jump(right, join).unwrap();
        let v = func.int_const(join, 0).unwrap();
        let _ = OpWidth::W64;
        func.finalize_return(join, Some(v)).unwrap();
        (func, [entry, left, right, join])
    }

    #[test]
    fn diamond_structure() {
        let (func, [entry, left, right, join]) = diamond();
        let mut structure = OirCodeStructure::new();
        structure.build(&func).unwrap();

        assert!(structure.is_reachable_from_entry(join).unwrap());
        assert_eq!(structure.successors(entry).unwrap(), &[left, right]);
        let mut preds: Vec<_> = structure.predecessors(join).unwrap().to_vec();
        preds.sort();
        assert_eq!(preds, vec![left, right]);
        assert_eq!(structure.immediate_dominator(join).unwrap(), Some(entry));
        assert!(structure.dominates(entry, join).unwrap());
        assert!(!structure.dominates(left, join).unwrap());
    }

    #[test]
    fn unreachable_blocks_are_flagged() {
        let (mut func, _) = diamond();
        let orphan = func.new_block();
        let v = func.int_const(orphan, 7).unwrap();
        func.finalize_return(orphan, Some(v)).unwrap();
        let mut structure = OirCodeStructure::new();
        structure.build(&func).unwrap();
        assert!(!structure.is_reachable_from_entry(orphan).unwrap());
    }
}
