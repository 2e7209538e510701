//! Infinite-scroll post feed.
//!
//! [`Timeline`] owns the accumulated posts for one (sort, tag, viewer)
//! configuration. State changes are synchronous; reads and writes are
//! described as [`PageRequest`]s and [`LikeToggle`]s that the caller runs
//! against the backend and feeds back in. Every configuration change bumps
//! a generation counter so responses issued for an older configuration are
//! dropped on arrival.

pub mod domain;

use std::collections::{HashMap, HashSet};

pub use domain::{
    page_range, window_range, LikeState, LikeToggle, PageRequest, RequestKind, SortBy,
    POSTS_PER_PAGE,
};

use crate::backend::DataStore;
use crate::data::{likes, posts};
use crate::error::AppResult;
use crate::models::Post;

#[derive(Debug)]
pub struct Timeline {
    sort_by: SortBy,
    filter_tag: Option<String>,
    viewer: Option<String>,
    generation: u64,
    /// 1-based page the feed wants loaded.
    page: u32,
    /// Highest page appended so far.
    loaded_page: u32,
    posts: Vec<Post>,
    has_more: bool,
    loading: bool,
    is_error: bool,
    likes: HashMap<String, LikeState>,
}

impl Timeline {
    pub fn new(viewer: Option<String>) -> Self {
        Self {
            sort_by: SortBy::default(),
            filter_tag: None,
            viewer,
            generation: 0,
            page: 1,
            loaded_page: 0,
            posts: Vec::new(),
            has_more: false,
            loading: false,
            is_error: false,
            likes: HashMap::new(),
        }
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn sort_by(&self) -> SortBy {
        self.sort_by
    }

    pub fn filter_tag(&self) -> Option<&str> {
        self.filter_tag.as_deref()
    }

    pub fn viewer(&self) -> Option<&str> {
        self.viewer.as_deref()
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn like_state(&self, post_id: &str) -> LikeState {
        self.likes.get(post_id).copied().unwrap_or_default()
    }

    pub fn set_sort_by(&mut self, sort_by: SortBy) {
        if self.sort_by != sort_by {
            self.sort_by = sort_by;
            self.reset();
        }
    }

    /// An empty tag clears the filter.
    pub fn set_filter_tag(&mut self, tag: Option<String>) {
        let tag = tag.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if self.filter_tag != tag {
            self.filter_tag = tag;
            self.reset();
        }
    }

    /// Liked flags belong to the viewer, so a new viewer starts over.
    pub fn set_viewer(&mut self, viewer: Option<String>) {
        if self.viewer != viewer {
            self.viewer = viewer;
            self.reset();
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.page = 1;
        self.loaded_page = 0;
        self.posts.clear();
        self.has_more = false;
        self.loading = false;
        self.is_error = false;
        self.likes.clear();
        tracing::debug!(
            "Timeline reset: sort={} tag={:?} generation={}",
            self.sort_by,
            self.filter_tag,
            self.generation
        );
    }

    fn request(&self, kind: RequestKind, (from, to): (u64, u64)) -> PageRequest {
        PageRequest {
            generation: self.generation,
            kind,
            sort_by: self.sort_by,
            filter_tag: self.filter_tag.clone(),
            viewer: self.viewer.clone(),
            from,
            to,
        }
    }

    /// The page still to be loaded, if any. Marks the feed as loading.
    pub fn page_request(&mut self) -> Option<PageRequest> {
        if self.loading || self.page <= self.loaded_page {
            return None;
        }
        self.loading = true;
        Some(self.request(RequestKind::Page(self.page), page_range(self.page)))
    }

    /// Append a fetched page. Returns `false` when the response was stale.
    pub fn apply_page(&mut self, request: &PageRequest, result: AppResult<Vec<Post>>) -> bool {
        if request.generation != self.generation {
            tracing::warn!(
                "Discarding stale page (generation {} != {})",
                request.generation,
                self.generation
            );
            return false;
        }
        let RequestKind::Page(page) = request.kind else {
            return self.apply_resync(request, result);
        };
        self.loading = false;

        match result {
            Ok(fetched) => {
                self.has_more = fetched.len() as u64 == POSTS_PER_PAGE;
                self.loaded_page = page;
                self.is_error = false;

                let mut seen: HashSet<String> = self.posts.iter().map(|p| p.id.clone()).collect();
                for post in fetched {
                    if seen.insert(post.id.clone()) {
                        self.posts.push(post);
                    }
                }
            }
            Err(e) => {
                tracing::error!("Failed to load page {}: {}", page, e);
                self.is_error = true;
            }
        }
        true
    }

    /// Sentinel scrolled into view: ask for one more page. Returns whether the page advanced.
    pub fn on_sentinel_visible(&mut self) -> bool {
        if self.loading || !self.has_more || self.page > self.loaded_page {
            return false;
        }
        self.page += 1;
        true
    }

    /// Flip the post's liked flag and count before the remote write.
    ///
    /// Returns `None` (and changes nothing) without a viewer, for unknown
    /// posts, and while a previous toggle of the same post is in flight.
    pub fn begin_like_toggle(&mut self, post_id: &str) -> Option<LikeToggle> {
        let Some(viewer) = self.viewer.clone() else {
            tracing::warn!("Ignoring like toggle without a signed-in viewer");
            return None;
        };
        let post = self.posts.iter_mut().find(|p| p.id == post_id)?;
        let state = self.likes.get(post_id).copied().unwrap_or_default();
        let next = match state.begin(post.is_liked) {
            Ok(next) => next,
            Err(e) => {
                tracing::debug!("Like toggle for {} ignored: {}", post_id, e);
                return None;
            }
        };

        let like = !post.is_liked;
        post.is_liked = like;
        post.likes_count += if like { 1 } else { -1 };
        self.likes.insert(post_id.to_string(), next);

        Some(LikeToggle {
            generation: self.generation,
            post_id: post_id.to_string(),
            viewer,
            like,
        })
    }

    /// Settle a toggle. A failed write asks for a resync of the loaded window.
    pub fn finish_like_toggle(
        &mut self,
        toggle: &LikeToggle,
        result: &AppResult<()>,
    ) -> Option<PageRequest> {
        if toggle.generation != self.generation {
            return None;
        }
        if let Some(state) = self.likes.remove(&toggle.post_id) {
            if let Err(e) = state.settle() {
                tracing::warn!("Like for {}: {}", toggle.post_id, e);
            }
        }

        match result {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("Failed to update like on {}: {}", toggle.post_id, e);
                Some(self.resync_request())
            }
        }
    }

    /// Request for everything loaded so far, e.g. after a new post was published.
    pub fn resync_request(&self) -> PageRequest {
        let pages = self.loaded_page.max(self.page).max(1);
        self.request(RequestKind::Resync, window_range(pages))
    }

    pub fn on_post_created(&mut self) -> PageRequest {
        self.resync_request()
    }

    /// Replace local state with the backend's view of the loaded window.
    /// Posts with a toggle in flight keep their optimistic state.
    pub fn apply_resync(&mut self, request: &PageRequest, result: AppResult<Vec<Post>>) -> bool {
        if request.generation != self.generation {
            tracing::warn!("Discarding stale resync (generation {})", request.generation);
            return false;
        }

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!("Failed to resync timeline: {}", e);
                self.is_error = true;
                return true;
            }
        };

        let window = request.to - request.from + 1;
        let mut previous: HashMap<String, Post> =
            self.posts.drain(..).map(|p| (p.id.clone(), p)).collect();
        let mut order: Vec<String> = Vec::new();
        let mut rebuilt = Vec::with_capacity(fetched.len());
        let fetched_len = fetched.len() as u64;

        for post in fetched {
            if order.contains(&post.id) {
                continue;
            }
            order.push(post.id.clone());
            let local = previous.remove(&post.id);
            match local {
                Some(local) if self.like_state(&post.id).is_pending() => rebuilt.push(local),
                _ => rebuilt.push(post),
            }
        }
        // Loaded posts that shifted out of the window stay at the end
        let mut rest: Vec<Post> = previous.into_values().collect();
        rest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rebuilt.extend(rest);

        self.posts = rebuilt;
        self.has_more = fetched_len == window;
        self.loaded_page = (window / POSTS_PER_PAGE) as u32;
        self.page = self.page.max(self.loaded_page);
        self.is_error = false;
        true
    }

    /// Fetch and apply the next page, if one is due. Returns whether anything was applied.
    pub async fn load_next(&mut self, db: &dyn DataStore) -> bool {
        let Some(request) = self.page_request() else {
            return false;
        };
        let result = fetch(db, &request).await;
        self.apply_page(&request, result)
    }

    /// Optimistically toggle a like, write it, and resync on failure.
    pub async fn toggle_like(&mut self, db: &dyn DataStore, post_id: &str) -> AppResult<()> {
        let Some(toggle) = self.begin_like_toggle(post_id) else {
            return Ok(());
        };
        let result = if toggle.like {
            likes::like_post(db, &toggle.viewer, &toggle.post_id).await
        } else {
            likes::unlike_post(db, &toggle.viewer, &toggle.post_id).await
        };

        if let Some(resync) = self.finish_like_toggle(&toggle, &result) {
            let fetched = fetch(db, &resync).await;
            self.apply_resync(&resync, fetched);
        }
        result
    }

    /// Resync after a post was published so it shows up.
    pub async fn refresh(&mut self, db: &dyn DataStore) -> bool {
        let request = self.on_post_created();
        let fetched = fetch(db, &request).await;
        self.apply_resync(&request, fetched)
    }
}

/// Run a feed request against the data store.
pub async fn fetch(db: &dyn DataStore, request: &PageRequest) -> AppResult<Vec<Post>> {
    posts::fetch_posts(
        db,
        request.sort_by,
        request.filter_tag.as_deref(),
        request.from,
        request.to,
        request.viewer.as_deref(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::PostAuthor;
    use chrono::{Duration, TimeZone, Utc};

    fn post(n: u32) -> Post {
        Post {
            id: format!("p{}", n),
            content: format!("post {}", n),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() - Duration::minutes(n.into()),
            metaverse_tags: vec![],
            image_url: None,
            author: PostAuthor {
                id: "u1".into(),
                username: "alice".into(),
                avatar_url: None,
            },
            likes_count: 0,
            is_liked: false,
        }
    }

    fn posts(range: std::ops::Range<u32>) -> Vec<Post> {
        range.map(post).collect()
    }

    fn loaded(viewer: Option<&str>, batch: Vec<Post>) -> Timeline {
        let mut timeline = Timeline::new(viewer.map(String::from));
        let request = timeline.page_request().unwrap();
        assert!(timeline.apply_page(&request, Ok(batch)));
        timeline
    }

    #[test]
    fn first_request_is_page_one() {
        let mut timeline = Timeline::new(None);
        let request = timeline.page_request().unwrap();
        assert_eq!(request.kind, RequestKind::Page(1));
        assert_eq!((request.from, request.to), (0, 19));
        assert!(timeline.is_loading());
        // Only one request in flight
        assert!(timeline.page_request().is_none());
    }

    #[test]
    fn full_page_then_empty_page() {
        let mut timeline = loaded(None, posts(0..20));
        assert!(timeline.has_more());

        assert!(timeline.on_sentinel_visible());
        let request = timeline.page_request().unwrap();
        assert_eq!((request.from, request.to), (20, 39));
        timeline.apply_page(&request, Ok(vec![]));
        assert!(!timeline.has_more());
        assert_eq!(timeline.posts().len(), 20);
        assert!(!timeline.on_sentinel_visible());
    }

    #[test]
    fn sentinel_is_gated_on_loading_and_has_more() {
        let mut timeline = loaded(None, posts(0..5));
        assert!(!timeline.has_more());
        assert!(!timeline.on_sentinel_visible());

        let mut timeline = loaded(None, posts(0..20));
        assert!(timeline.on_sentinel_visible());
        // Page 2 not loaded yet, so another signal is ignored
        assert!(!timeline.on_sentinel_visible());
        assert_eq!(timeline.page(), 2);
    }

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let mut timeline = loaded(None, posts(0..20));
        timeline.on_sentinel_visible();
        let request = timeline.page_request().unwrap();
        let mut next = posts(19..25);
        next[0].content = "changed".into();
        timeline.apply_page(&request, Ok(next));

        let ids: Vec<&str> = timeline.posts().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), 25);
        assert_eq!(timeline.posts()[19].content, "post 19");
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn changing_sort_or_tag_resets_before_fetching() {
        let mut timeline = loaded(None, posts(0..20));
        timeline.on_sentinel_visible();

        timeline.set_sort_by(SortBy::Popular);
        assert!(timeline.posts().is_empty());
        assert_eq!(timeline.page(), 1);
        let request = timeline.page_request().unwrap();
        assert_eq!(request.kind, RequestKind::Page(1));
        assert_eq!(request.sort_by, SortBy::Popular);

        let generation = timeline.generation();
        timeline.set_filter_tag(Some("Roblox".into()));
        assert!(timeline.generation() > generation);
        assert_eq!(timeline.page_request().unwrap().filter_tag.as_deref(), Some("Roblox"));
    }

    #[test]
    fn same_configuration_is_not_a_reset() {
        let mut timeline = loaded(None, posts(0..20));
        let generation = timeline.generation();
        timeline.set_sort_by(SortBy::Latest);
        timeline.set_filter_tag(Some("  ".into()));
        assert_eq!(timeline.generation(), generation);
        assert_eq!(timeline.posts().len(), 20);
    }

    #[test]
    fn stale_pages_are_discarded() {
        let mut timeline = Timeline::new(None);
        let old = timeline.page_request().unwrap();
        timeline.set_filter_tag(Some("VRChat".into()));
        let current = timeline.page_request().unwrap();

        assert!(!timeline.apply_page(&old, Ok(posts(0..20))));
        assert!(timeline.posts().is_empty());
        assert!(timeline.is_loading());
        assert!(timeline.apply_page(&current, Ok(posts(100..103))));
        assert_eq!(timeline.posts().len(), 3);
    }

    #[test]
    fn failed_page_sets_error_flag() {
        let mut timeline = Timeline::new(None);
        let request = timeline.page_request().unwrap();
        timeline.apply_page(&request, Err(AppError::NotFound));
        assert!(timeline.is_error());
        assert!(!timeline.is_loading());

        let request = timeline.page_request().unwrap();
        timeline.apply_page(&request, Ok(posts(0..2)));
        assert!(!timeline.is_error());
    }

    #[test]
    fn like_toggle_is_optimistic_and_guarded() {
        let mut batch = posts(0..3);
        batch[1].likes_count = 5;
        let mut timeline = loaded(Some("viewer"), batch);

        let toggle = timeline.begin_like_toggle("p1").unwrap();
        assert!(toggle.like);
        assert_eq!(timeline.posts()[1].likes_count, 6);
        assert!(timeline.posts()[1].is_liked);
        assert_eq!(timeline.like_state("p1"), LikeState::PendingLike);
        assert!(timeline.begin_like_toggle("p1").is_none());

        assert!(timeline.finish_like_toggle(&toggle, &Ok(())).is_none());
        assert_eq!(timeline.like_state("p1"), LikeState::Synced);

        let toggle = timeline.begin_like_toggle("p1").unwrap();
        assert!(!toggle.like);
        assert_eq!(timeline.posts()[1].likes_count, 5);
        assert!(!timeline.posts()[1].is_liked);
    }

    #[test]
    fn anonymous_toggle_changes_nothing() {
        let mut timeline = loaded(None, posts(0..3));
        let before = timeline.posts().to_vec();
        assert!(timeline.begin_like_toggle("p0").is_none());
        assert_eq!(timeline.posts(), &before[..]);
    }

    #[test]
    fn failed_toggle_resyncs_window() {
        let mut timeline = loaded(Some("viewer"), posts(0..20));
        timeline.on_sentinel_visible();
        let request = timeline.page_request().unwrap();
        timeline.apply_page(&request, Ok(posts(20..25)));

        let toggle = timeline.begin_like_toggle("p3").unwrap();
        let resync = timeline
            .finish_like_toggle(&toggle, &Err(AppError::NotFound))
            .unwrap();
        assert_eq!(resync.kind, RequestKind::Resync);
        assert_eq!((resync.from, resync.to), (0, 39));

        timeline.apply_resync(&resync, Ok(posts(0..25)));
        assert_eq!(timeline.posts()[3].likes_count, 0);
        assert!(!timeline.posts()[3].is_liked);
        assert_eq!(timeline.posts().len(), 25);
    }

    #[test]
    fn resync_keeps_pending_posts_and_adds_new_ones() {
        let mut timeline = loaded(Some("viewer"), posts(1..4));
        timeline.begin_like_toggle("p2").unwrap();

        let mut fresh = vec![post(0)];
        fresh.extend(posts(1..4));
        let request = timeline.on_post_created();
        timeline.apply_resync(&request, Ok(fresh));

        let ids: Vec<&str> = timeline.posts().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p0", "p1", "p2", "p3"]);
        assert!(timeline.posts()[2].is_liked);
        assert_eq!(timeline.posts()[2].likes_count, 1);
    }

    #[test]
    fn viewer_change_resets_and_drops_pending_toggles() {
        let mut timeline = loaded(Some("a"), posts(0..3));
        let toggle = timeline.begin_like_toggle("p0").unwrap();
        timeline.set_viewer(Some("b".into()));
        assert!(timeline.posts().is_empty());
        assert!(timeline.finish_like_toggle(&toggle, &Err(AppError::NotFound)).is_none());
        assert_eq!(timeline.page_request().unwrap().viewer.as_deref(), Some("b"));
    }
}
