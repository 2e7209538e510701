//! Timeline controller against a scripted data store.
//!
//! The store records every request so the tests can assert on the exact
//! number and shape of backend calls.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use metasocial::backend::{BackendError, BackendResult, DataStore, Filter, Query};
use metasocial::timeline::{LikeState, SortBy, Timeline};

struct ScriptedStore {
    total_posts: u64,
    likes_count: i64,
    liked: Vec<String>,
    fail_writes: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedStore {
    fn new(total_posts: u64) -> Self {
        Self {
            total_posts,
            likes_count: 0,
            liked: Vec::new(),
            fail_writes: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn post_row(&self, i: u64) -> Value {
        json!({
            "id": format!("p{}", i),
            "content": format!("post {}", i),
            "created_at": "2024-05-01T10:00:00Z",
            "metaverse_tags": ["VRChat"],
            "image_url": null,
            "author": { "id": "author", "username": "alice", "avatar_url": null },
            "likes": [{ "count": self.likes_count }]
        })
    }
}

#[async_trait]
impl DataStore for ScriptedStore {
    async fn select(&self, query: &Query) -> BackendResult<Vec<Value>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("select {} {:?}", query.table, query.range));
        match query.table.as_str() {
            "posts" => {
                let (from, to) = query.range.unwrap_or((0, self.total_posts));
                Ok((from..=to)
                    .take_while(|i| *i < self.total_posts)
                    .map(|i| self.post_row(i))
                    .collect())
            }
            "likes" => Ok(self
                .liked
                .iter()
                .map(|id| json!({ "post_id": id }))
                .collect()),
            other => Err(BackendError::InvalidQuery(other.to_string())),
        }
    }

    async fn insert(&self, table: &str, row: Value) -> BackendResult<Vec<Value>> {
        self.calls.lock().unwrap().push(format!("insert {}", table));
        if self.fail_writes {
            return Err(BackendError::Api {
                status: 500,
                message: "boom".into(),
            });
        }
        Ok(vec![row])
    }

    async fn update(&self, table: &str, _: &[Filter], _: Value) -> BackendResult<Vec<Value>> {
        Err(BackendError::InvalidQuery(table.to_string()))
    }

    async fn delete(&self, table: &str, _: &[Filter]) -> BackendResult<Vec<Value>> {
        self.calls.lock().unwrap().push(format!("delete {}", table));
        if self.fail_writes {
            return Err(BackendError::Api {
                status: 500,
                message: "boom".into(),
            });
        }
        Ok(vec![json!({})])
    }
}

#[tokio::test]
async fn exactly_twenty_then_zero_takes_two_fetches() {
    let store = ScriptedStore::new(20);
    let mut feed = Timeline::new(None);

    assert!(feed.load_next(&store).await);
    assert!(feed.has_more());
    assert!(feed.on_sentinel_visible());
    assert!(feed.load_next(&store).await);
    assert!(!feed.has_more());
    assert!(!feed.on_sentinel_visible());
    assert!(!feed.load_next(&store).await);

    assert_eq!(
        store.calls(),
        vec![
            "select posts Some((0, 19))".to_string(),
            "select posts Some((20, 39))".to_string()
        ]
    );
    assert_eq!(feed.posts().len(), 20);
}

#[tokio::test]
async fn anonymous_viewer_skips_like_lookup_and_toggle() {
    let store = ScriptedStore::new(3);
    let mut feed = Timeline::new(None);
    feed.load_next(&store).await;
    let before = feed.posts().to_vec();

    feed.toggle_like(&store, "p0").await.unwrap();
    assert_eq!(feed.posts(), &before[..]);
    assert_eq!(store.calls(), vec!["select posts Some((0, 19))".to_string()]);
}

#[tokio::test]
async fn viewer_like_set_marks_posts() {
    let mut store = ScriptedStore::new(3);
    store.liked = vec!["p1".into(), "unrelated".into()];
    let mut feed = Timeline::new(Some("viewer".into()));
    feed.load_next(&store).await;

    let liked: Vec<bool> = feed.posts().iter().map(|p| p.is_liked).collect();
    assert_eq!(liked, [false, true, false]);
    assert_eq!(store.calls().len(), 2);
}

#[tokio::test]
async fn like_then_unlike_round_trips_counts() {
    let mut store = ScriptedStore::new(2);
    store.likes_count = 5;
    let mut feed = Timeline::new(Some("viewer".into()));
    feed.load_next(&store).await;

    feed.toggle_like(&store, "p0").await.unwrap();
    assert_eq!((feed.posts()[0].likes_count, feed.posts()[0].is_liked), (6, true));
    assert_eq!(feed.like_state("p0"), LikeState::Synced);

    feed.toggle_like(&store, "p0").await.unwrap();
    assert_eq!((feed.posts()[0].likes_count, feed.posts()[0].is_liked), (5, false));
    assert!(store.calls().contains(&"insert likes".to_string()));
    assert!(store.calls().contains(&"delete likes".to_string()));
}

#[tokio::test]
async fn failed_like_restores_backend_truth() {
    let mut store = ScriptedStore::new(25);
    store.likes_count = 5;
    store.fail_writes = true;
    let mut feed = Timeline::new(Some("viewer".into()));
    feed.load_next(&store).await;
    feed.on_sentinel_visible();
    feed.load_next(&store).await;

    // Optimistic step is visible before the write settles
    let toggle = feed.begin_like_toggle("p21").unwrap();
    let post = feed.posts().iter().find(|p| p.id == "p21").unwrap();
    assert_eq!((post.likes_count, post.is_liked), (6, true));
    let result = Err(metasocial::error::AppError::Backend(BackendError::Api {
        status: 500,
        message: "boom".into(),
    }));
    let resync = feed.finish_like_toggle(&toggle, &result).unwrap();
    assert_eq!((resync.from, resync.to), (0, 39));
    let fetched = metasocial::timeline::fetch(&store, &resync).await;
    assert!(feed.apply_resync(&resync, fetched));
    let post = feed.posts().iter().find(|p| p.id == "p21").unwrap();
    assert_eq!((post.likes_count, post.is_liked), (5, false));

    // Async path: write fails, window is refetched
    assert!(feed.toggle_like(&store, "p21").await.is_err());
    let post = feed.posts().iter().find(|p| p.id == "p21").unwrap();
    assert_eq!((post.likes_count, post.is_liked), (5, false));
    assert_eq!(feed.posts().len(), 25);
    assert!(store.calls().contains(&"select posts Some((0, 39))".to_string()));
}

#[tokio::test]
async fn configuration_change_refetches_from_first_page() {
    let store = ScriptedStore::new(45);
    let mut feed = Timeline::new(None);
    feed.load_next(&store).await;
    feed.on_sentinel_visible();
    feed.load_next(&store).await;
    assert_eq!(feed.posts().len(), 40);

    feed.set_sort_by(SortBy::Popular);
    assert!(feed.posts().is_empty());
    feed.load_next(&store).await;
    assert_eq!(feed.posts().len(), 20);
    assert_eq!(
        store.calls().last().map(String::as_str),
        Some("select posts Some((0, 19))")
    );
}
