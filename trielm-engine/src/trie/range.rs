/// Window of record indices within one order's array that is still
/// consistent with the context matched so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieRange {
    pub begin: u32,
    pub end: u32,
    /// Whether the last lookup through this range hit a record
    pub found: bool,
}

impl TrieRange {
    pub fn new(begin: u32, end: u32) -> Self {
        Self {
            begin,
            end,
            found: true,
        }
    }

    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.begin)
    }

    /// A range with no records cannot be descended into.
    pub fn is_searchable(&self) -> bool {
        self.width() > 0
    }

    pub(crate) fn miss(&mut self) {
        self.found = false;
    }
}
