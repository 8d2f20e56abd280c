use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// How urgently a page's content is wanted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageContentState {
    #[default]
    None = 0,
    /// Prefetched around the current view
    Ahead = 1,
    View = 2,
}

impl PageContentState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => PageContentState::View,
            1 => PageContentState::Ahead,
            _ => PageContentState::None,
        }
    }

    /// Locked content is never evicted by the pools
    pub fn is_locked(self) -> bool {
        self != PageContentState::None
    }
}

impl fmt::Display for PageContentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageContentState::None => "none",
            PageContentState::Ahead => "ahead",
            PageContentState::View => "view",
        };
        f.write_str(name)
    }
}

/// Shared atomic holder for a [`PageContentState`]
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn get(&self) -> PageContentState {
        PageContentState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Merge with max; returns the resulting state
    pub fn raise(&self, state: PageContentState) -> PageContentState {
        let previous = self.0.fetch_max(state as u8, Ordering::AcqRel);
        PageContentState::from_u8(previous.max(state as u8))
    }

    /// Overwrite, including lowering
    pub fn set(&self, state: PageContentState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
