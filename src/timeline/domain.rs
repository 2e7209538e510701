// Feed domain types - pure, no I/O
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const POSTS_PER_PAGE: u64 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Latest,
    Popular,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Popular => "popular",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "popular" => Ok(Self::Popular),
            other => Err(format!("Unknown sort order: {}", other)),
        }
    }
}

/// Inclusive row offsets of a 1-based page.
pub fn page_range(page: u32) -> (u64, u64) {
    let page = u64::from(page.max(1));
    ((page - 1) * POSTS_PER_PAGE, page * POSTS_PER_PAGE - 1)
}

/// Inclusive row offsets of pages `1..=page`.
pub fn window_range(page: u32) -> (u64, u64) {
    (0, u64::from(page.max(1)) * POSTS_PER_PAGE - 1)
}

/// Per-post like synchronisation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LikeState {
    #[default]
    Synced,
    /// Shown as liked, insert in flight.
    PendingLike,
    /// Shown as not liked, delete in flight.
    PendingUnlike,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeError {
    InvalidTransition(String),
}

impl fmt::Display for LikeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for LikeError {}

impl LikeState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Synced => "Synced",
            Self::PendingLike => "PendingLike",
            Self::PendingUnlike => "PendingUnlike",
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Synced)
    }

    /// Transition: Synced → Pending*, given whether the post is currently liked.
    pub fn begin(self, currently_liked: bool) -> Result<Self, LikeError> {
        match self {
            Self::Synced if currently_liked => Ok(Self::PendingUnlike),
            Self::Synced => Ok(Self::PendingLike),
            other => Err(LikeError::InvalidTransition(format!(
                "Cannot toggle like from {} state",
                other.state_name()
            ))),
        }
    }

    /// Transition: Pending* → Synced once the remote write settles either way.
    pub fn settle(self) -> Result<Self, LikeError> {
        match self {
            Self::PendingLike | Self::PendingUnlike => Ok(Self::Synced),
            Self::Synced => Err(LikeError::InvalidTransition(
                "Cannot settle a like that is not pending".to_string(),
            )),
        }
    }
}

/// Why a feed request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Next page to append.
    Page(u32),
    /// Whole loaded window, replacing local state with backend truth.
    Resync,
}

/// A feed read, tagged with the configuration generation it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub generation: u64,
    pub kind: RequestKind,
    pub sort_by: SortBy,
    pub filter_tag: Option<String>,
    pub viewer: Option<String>,
    pub from: u64,
    pub to: u64,
}

/// An optimistic like toggle awaiting its remote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeToggle {
    pub generation: u64,
    pub post_id: String,
    pub viewer: String,
    /// `true` inserts a like, `false` removes it.
    pub like: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_twenty_rows() {
        assert_eq!(page_range(1), (0, 19));
        assert_eq!(page_range(3), (40, 59));
        assert_eq!(window_range(3), (0, 59));
        assert_eq!(page_range(0), (0, 19));
    }

    #[test]
    fn sort_parses_case_insensitively() {
        assert_eq!("Popular".parse::<SortBy>().unwrap(), SortBy::Popular);
        assert_eq!("latest".parse::<SortBy>().unwrap(), SortBy::Latest);
        assert!("oldest".parse::<SortBy>().is_err());
    }

    #[test]
    fn like_state_transitions() {
        assert_eq!(LikeState::Synced.begin(false).unwrap(), LikeState::PendingLike);
        assert_eq!(LikeState::Synced.begin(true).unwrap(), LikeState::PendingUnlike);
        assert!(LikeState::PendingLike.begin(true).is_err());
        assert_eq!(LikeState::PendingUnlike.settle().unwrap(), LikeState::Synced);
        assert!(LikeState::Synced.settle().is_err());
    }
}
