use crate::model::FunctionId;

/// A matched prologue waiting for its epilogue.
///
/// Owned by a single partition scan. Nothing is written for a prologue until an
/// epilogue of the same function definition commits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrologueRewrite {
    pub owner: FunctionId,
    pub nop_line: usize,
    pub stp_line: usize,
    /// `eor xM, x30, xK`, replacing the no-op.
    pub mask_word: u32,
    /// `stp x29, xM, [...]`, replacing the original store.
    pub store_word: u32,
}

impl PendingPrologueRewrite {
    pub fn belongs_to(&self, function: &FunctionId) -> bool {
        &self.owner == function
    }
}
