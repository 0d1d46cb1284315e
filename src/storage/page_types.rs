//! Page kind definitions.
//!
//! The first byte of every page (other than the super-page) identifies its
//! kind. Unknown kinds are preserved as [`PageKind::Unknown`] so inspection
//! code can report them instead of failing.

use serde::Serialize;
use std::fmt;

/// All page kinds in a gdbx file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PageKind {
    /// Free-page allocation bitmap page (kind 1).
    Bitmap,
    /// Document heap page with a slot directory (kind 2).
    Heap,
    /// B+tree internal node (kind 3).
    TreeInternal,
    /// B+tree leaf node (kind 4).
    TreeLeaf,
    /// Catalog heap page holding collection entries (kind 5).
    Catalog,
    /// Overflow page for payloads larger than one heap page (kind 6).
    Overflow,
    /// Unrecognized kind byte (carried through for diagnostics).
    Unknown,
}

impl PageKind {
    /// Parse a kind from the first byte of a page.
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => PageKind::Bitmap,
            2 => PageKind::Heap,
            3 => PageKind::TreeInternal,
            4 => PageKind::TreeLeaf,
            5 => PageKind::Catalog,
            6 => PageKind::Overflow,
            _ => PageKind::Unknown,
        }
    }

    /// The on-disk kind byte.
    pub fn as_u8(self) -> u8 {
        match self {
            PageKind::Bitmap => 1,
            PageKind::Heap => 2,
            PageKind::TreeInternal => 3,
            PageKind::TreeLeaf => 4,
            PageKind::Catalog => 5,
            PageKind::Overflow => 6,
            PageKind::Unknown => 0,
        }
    }

    /// A short stable name, used in diagnostics and corruption messages.
    pub fn name(self) -> &'static str {
        match self {
            PageKind::Bitmap => "BITMAP",
            PageKind::Heap => "HEAP",
            PageKind::TreeInternal => "TREE_INTERNAL",
            PageKind::TreeLeaf => "TREE_LEAF",
            PageKind::Catalog => "CATALOG",
            PageKind::Overflow => "OVERFLOW",
            PageKind::Unknown => "UNKNOWN",
        }
    }

    /// True for the two kinds laid out as slotted record pages.
    pub fn is_slotted(self) -> bool {
        matches!(self, PageKind::Heap | PageKind::Catalog)
    }

    /// True for B+tree node pages.
    pub fn is_tree(self) -> bool {
        matches!(self, PageKind::TreeInternal | PageKind::TreeLeaf)
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
