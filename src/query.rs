//! The byte-level traversal and constraint interface consumed by join
//! engines.
//!
//! A query engine drives one [`ByteCursor`] per relation: at every depth
//! it intersects the candidate bytes proposed by all cursors touching
//! the current variable, pushes a byte from the intersection into each
//! of them, and backtracks by popping. [`VariableConstraint`] adds the
//! variable-level protocol on top, letting the engine pick a variable
//! order from per-variable selectivity estimates before descending into
//! its bytes. Proposal intersection, variable ordering and backtracking
//! themselves are the engine's job, not the constraint's.

use crate::bitset::ByteBitset;

/// Identifies a variable within a single query.
pub type VariableId = u8;

/// The set of variables a constraint touches.
pub type VariableSet = ByteBitset;

/// A stateful handle descending a key space one byte at a time.
pub trait ByteCursor {
    /// The byte fixed at the current depth, or `None` if the cursor
    /// branches here.
    fn peek(&self) -> Option<u8>;

    /// Overwrites `result_set` with the candidate bytes at the current
    /// depth.
    fn propose(&self, result_set: &mut ByteBitset);

    /// Descend through the child selected by `byte`. The byte must have
    /// been in the most recent proposal.
    fn push(&mut self, byte: u8);

    /// Retract the most recent push.
    fn pop(&mut self);

    /// A selectivity estimate: the number of distinct segment prefixes
    /// reachable at the current position.
    fn segment_count(&self) -> u32;
}

/// A relation exposed to the join engine: a set of variables plus a
/// byte cursor that is multiplexed between them as they are bound.
pub trait VariableConstraint: ByteCursor {
    /// Overwrites `result_set` with the variables this constraint
    /// touches.
    fn variables(&self, result_set: &mut VariableSet);

    /// The number of candidate assignments for the variable, were it
    /// explored next. Engines bind the variable with the smallest
    /// estimate first.
    fn estimate(&self, variable: VariableId) -> u32;

    /// A pseudorandom selectivity sample for the variable, were it
    /// explored next. Uniform over the candidate subtree, usable for
    /// cardinality sketches.
    fn sample(&self, variable: VariableId) -> u32;

    /// Begin binding the given variable; subsequent byte operations
    /// address its segment.
    fn explore(&mut self, variable: VariableId);

    /// Finish or abandon the most recently explored variable. All of
    /// its bytes must have been popped before.
    fn retreat(&mut self);
}
