//! Position index: the (row, col) of every stored cell of a compressed grid.

use std::ops::Deref;
use std::sync::Arc;

/// Row and column of a cell, row 0 at the top.
pub type CellPos = (usize, usize);

/// Maps each storage slot of a compressed grid to its cell.
///
/// Entries are unique and sorted in row-major order, so lookups by cell use
/// binary search. A grid either owns its index or borrows the index of the
/// mask it was reconciled against; dropping a borrowed index never frees the
/// mask's copy.
#[derive(Debug, Clone)]
pub enum PositionIndex {
    /// Computed by and for this grid.
    Owned(Arc<[CellPos]>),
    /// Shared with the mask this grid was reconciled against.
    Borrowed(Arc<[CellPos]>),
}

impl PositionIndex {
    /// Take ownership of freshly computed positions.
    pub fn owned(positions: Vec<CellPos>) -> Self {
        debug_assert!(
            positions.windows(2).all(|w| w[0] < w[1]),
            "positions must be unique and row-major ordered"
        );
        Self::Owned(positions.into())
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    pub fn as_slice(&self) -> &[CellPos] {
        self.shared()
    }

    fn shared(&self) -> &Arc<[CellPos]> {
        match self {
            Self::Owned(p) | Self::Borrowed(p) => p,
        }
    }

    /// A borrowed view over the same positions.
    pub fn borrow_shared(&self) -> Self {
        Self::Borrowed(Arc::clone(self.shared()))
    }

    /// An owned copy that shares nothing with `self`.
    pub fn to_owned_copy(&self) -> Self {
        Self::Owned(self.as_slice().to_vec().into())
    }

    /// Whether both indexes point at the same allocation.
    pub fn shares_storage_with(&self, other: &PositionIndex) -> bool {
        Arc::ptr_eq(self.shared(), other.shared())
    }

    /// Storage slot of `(row, col)`, if stored.
    pub fn lookup(&self, row: usize, col: usize) -> Option<usize> {
        self.as_slice().binary_search(&(row, col)).ok()
    }
}

impl Deref for PositionIndex {
    type Target = [CellPos];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl From<Arc<[CellPos]>> for PositionIndex {
    fn from(positions: Arc<[CellPos]>) -> Self {
        Self::Borrowed(positions)
    }
}
