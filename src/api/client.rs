//! Cache-fronted Spotify client
//!
//! Every listing is looked up in the [`CacheStore`] first. On a miss the pages are
//! fetched with the current access token, stored with the configured TTL and
//! returned. A rejected token is refreshed once and the request retried once.

use std::collections::HashSet;
use std::future::Future;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ApiError, Playlist, PlaylistItem, Track, WebApi};
use crate::auth::{AuthError, TokenEndpoint, TokenManager};
use crate::cache::CacheStore;

/// Cache key of the current user's id
const CURRENT_USER_CACHE_KEY: &str = "me:v1";

/// Most tracks a single add or remove request may carry
const MAX_TRACKS_PER_WRITE: usize = 100;

/// Errors surfaced by [`SpotifyClient`]
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Which of the user's playlists to list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistQuery {
    /// List every playlist in the library, not only the ones the user owns
    pub include_followed: bool,
    /// Playlist ids left out of the result
    pub ignore: Vec<String>,
}

impl PlaylistQuery {
    /// Cache key for this query made by `user_id`
    fn cache_key(&self, user_id: &str) -> String {
        let mut ignore = self.ignore.clone();
        ignore.sort();
        ignore.dedup();
        format!(
            "playlists:{}:owned={}:v1:ignore={}",
            user_id,
            !self.include_followed,
            ignore.join(",")
        )
    }
}

fn tracks_cache_key(playlist_id: &str, include_local: bool) -> String {
    format!("tracks:{}:local={}:v1", playlist_id, include_local)
}

/// Spotify client with response caching and transparent token refresh
pub struct SpotifyClient<A, E> {
    api: A,
    tokens: TokenManager<E>,
    cache: Option<CacheStore>,
    ttl_seconds: u64,
    force_refresh: bool,
    /// Memoized id of the current user
    user_id: Option<String>,
}

impl<A: WebApi, E: TokenEndpoint> SpotifyClient<A, E> {
    pub fn new(api: A, tokens: TokenManager<E>, cache: Option<CacheStore>, ttl_seconds: u64) -> Self {
        Self {
            api,
            tokens,
            cache,
            ttl_seconds,
            force_refresh: false,
            user_id: None,
        }
    }

    /// Skip cache reads; fresh results are still written back
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Ids of the user's playlists (owned playlists only)
    pub async fn fetch_user_playlists(&mut self) -> Result<Vec<String>, ClientError> {
        let playlists = self.user_playlists(&PlaylistQuery::default()).await?;
        Ok(playlists.into_iter().map(|p| p.id).collect())
    }

    /// Ids of the tracks in a playlist, skipping local files
    pub async fn fetch_playlist_tracks(&mut self, playlist_id: &str) -> Result<Vec<String>, ClientError> {
        let tracks = self.playlist_tracks(playlist_id, false).await?;
        Ok(tracks.into_iter().filter_map(|t| t.id).collect())
    }

    /// Id of the current user
    ///
    /// Looked up once per client and cached like any other response.
    pub async fn current_user_id(&mut self) -> Result<String, ClientError> {
        if let Some(id) = &self.user_id {
            return Ok(id.clone());
        }
        if let Some(id) = self.cached::<String>(CURRENT_USER_CACHE_KEY) {
            self.user_id = Some(id.clone());
            return Ok(id);
        }

        let api = &self.api;
        let profile = authorized(&mut self.tokens, |token| async move {
            api.current_user(&token).await
        })
        .await?;

        debug!(user_id = %profile.id, "resolved current user");
        self.store(CURRENT_USER_CACHE_KEY, &profile.id);
        self.user_id = Some(profile.id.clone());
        Ok(profile.id)
    }

    /// Drops the remembered user id, e.g. after authorizing another account
    pub fn forget_current_user(&mut self) {
        self.user_id = None;
        self.forget(CURRENT_USER_CACHE_KEY);
    }

    /// The user's playlists selected by `query`
    pub async fn user_playlists(&mut self, query: &PlaylistQuery) -> Result<Vec<Playlist>, ClientError> {
        let user_id = self.current_user_id().await?;
        let key = query.cache_key(&user_id);

        if let Some(cached) = self.cached::<Vec<Playlist>>(&key) {
            return Ok(cached);
        }

        let mut playlists = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let api = &self.api;
            let cursor = next.as_deref();
            let page = authorized(&mut self.tokens, |token| async move {
                api.playlists_page(&token, cursor).await
            })
            .await?;

            playlists.extend(page.items.into_iter().filter_map(|p| {
                Some(Playlist {
                    id: p.id?,
                    name: p.name,
                    owner_id: p.owner.map(|o| o.id),
                    track_total: p.tracks.map(|t| t.total).unwrap_or(0),
                })
            }));

            match page.next {
                Some(url) => next = Some(url),
                None => break,
            }
        }

        if !query.include_followed {
            playlists.retain(|p| p.owner_id.as_deref() == Some(user_id.as_str()));
        }
        playlists.retain(|p| !query.ignore.contains(&p.id));

        info!(count = playlists.len(), "fetched playlists");
        self.store(&key, &playlists);
        Ok(playlists)
    }

    /// Tracks of `playlist_id` with the date each was added
    ///
    /// Items without a track id are dropped unless `include_local` is set and the
    /// item is a local file.
    pub async fn playlist_tracks(
        &mut self,
        playlist_id: &str,
        include_local: bool,
    ) -> Result<Vec<Track>, ClientError> {
        let key = tracks_cache_key(playlist_id, include_local);

        if let Some(cached) = self.cached::<Vec<Track>>(&key) {
            return Ok(cached);
        }

        let mut tracks = Vec::new();
        for item in self.playlist_items(playlist_id).await? {
            let Some(track) = item.track else { continue };
            if track.id.is_none() && !(include_local && track.is_local) {
                continue;
            }
            tracks.push(Track {
                id: track.id,
                name: track.name,
                added_at: item.added_at,
                is_local: track.is_local,
            });
        }

        info!(playlist_id, count = tracks.len(), "fetched playlist tracks");
        self.store(&key, &tracks);
        Ok(tracks)
    }

    /// Replaces the contents of `playlist_id` with `track_ids`
    ///
    /// The playlist must exist. Its current tracks are read from the Web API,
    /// never from the cache, and removed; then `track_ids` are added in order.
    /// Both steps go out in batches of 100. An empty `track_ids` leaves the
    /// playlist untouched. Returns how many distinct tracks were removed.
    pub async fn replace_playlist_tracks(
        &mut self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<usize, ClientError> {
        if track_ids.is_empty() {
            warn!(playlist_id, "no tracks to write, leaving playlist unchanged");
            return Ok(0);
        }

        let api = &self.api;
        let target = authorized(&mut self.tokens, |token| async move {
            api.playlist(&token, playlist_id).await
        })
        .await?;
        info!(playlist_id, name = %target.name, "writing tracks to playlist");

        let mut seen = HashSet::new();
        let existing: Vec<String> = self
            .playlist_items(playlist_id)
            .await?
            .into_iter()
            .filter_map(|item| item.track.and_then(|t| t.id))
            .filter(|id| seen.insert(id.clone()))
            .collect();

        for chunk in existing.chunks(MAX_TRACKS_PER_WRITE) {
            let api = &self.api;
            authorized(&mut self.tokens, |token| async move {
                api.remove_playlist_items(&token, playlist_id, chunk).await
            })
            .await?;
        }
        for chunk in track_ids.chunks(MAX_TRACKS_PER_WRITE) {
            let api = &self.api;
            authorized(&mut self.tokens, |token| async move {
                api.add_playlist_items(&token, playlist_id, chunk).await
            })
            .await?;
        }

        self.forget(&tracks_cache_key(playlist_id, false));
        self.forget(&tracks_cache_key(playlist_id, true));
        info!(
            playlist_id,
            removed = existing.len(),
            added = track_ids.len(),
            "playlist rewritten"
        );
        Ok(existing.len())
    }

    /// Every item of `playlist_id`, following pagination
    async fn playlist_items(&mut self, playlist_id: &str) -> Result<Vec<PlaylistItem>, ClientError> {
        let mut items = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let api = &self.api;
            let cursor = next.as_deref();
            let page = authorized(&mut self.tokens, |token| async move {
                api.playlist_items_page(&token, playlist_id, cursor).await
            })
            .await?;

            items.extend(page.items);

            match page.next {
                Some(url) => next = Some(url),
                None => break,
            }
        }
        Ok(items)
    }

    /// Fresh cached value for `key`; storage errors degrade to a miss
    fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if self.force_refresh {
            return None;
        }
        let cache = self.cache.as_ref()?;
        match cache.get(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, fetching from network");
                None
            }
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: &T) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(key, value, self.ttl_seconds) {
                warn!(key, error = %e, "cache write failed");
            }
        }
    }

    fn forget(&self, key: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(key) {
                warn!(key, error = %e, "cache invalidation failed");
            }
        }
    }
}

/// Runs `call` with an access token, refreshing and retrying once on a 401
async fn authorized<E, R, F, Fut>(tokens: &mut TokenManager<E>, call: F) -> Result<R, ClientError>
where
    E: TokenEndpoint,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<R, ApiError>>,
{
    let token = tokens.access_token().await?;
    match call(token).await {
        Err(ApiError::Unauthorized) => {
            debug!("access token rejected, refreshing once");
            let token = tokens.refresh().await?;
            Ok(call(token).await?)
        }
        result => Ok(result?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{OwnerObject, Page, PlaylistItem, PlaylistObject, TrackObject, TracksRef, UserProfile};
    use crate::auth::testing::{credentials, expired_token, valid_token, FakeEndpoint};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// In-memory Web API that counts requests and can reject the first N tokens
    #[derive(Clone, Default)]
    struct FakeApi {
        requests: Arc<AtomicUsize>,
        unauthorized_remaining: Arc<AtomicUsize>,
        tokens_seen: Arc<Mutex<Vec<String>>>,
        /// ("remove" | "add", track ids) per write request, in order
        writes: Arc<Mutex<Vec<(&'static str, Vec<String>)>>>,
        playlist_pages: Vec<Page<PlaylistObject>>,
        item_pages: HashMap<String, Vec<Page<PlaylistItem>>>,
    }

    impl FakeApi {
        fn hit(&self, token: &str) -> Result<(), ApiError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.tokens_seen.lock().unwrap().push(token.to_string());
            let remaining = self.unauthorized_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.unauthorized_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(ApiError::Unauthorized);
            }
            Ok(())
        }

        fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        fn tokens_seen(&self) -> Vec<String> {
            self.tokens_seen.lock().unwrap().clone()
        }

        fn writes(&self) -> Vec<(&'static str, Vec<String>)> {
            self.writes.lock().unwrap().clone()
        }

        fn reject_next(&self, n: usize) {
            self.unauthorized_remaining.store(n, Ordering::SeqCst);
        }
    }

    /// Pages are addressed as "page:<index>" through `next`
    fn page_index(next: Option<&str>) -> usize {
        next.and_then(|n| n.strip_prefix("page:"))
            .and_then(|i| i.parse().ok())
            .unwrap_or(0)
    }

    #[async_trait]
    impl WebApi for FakeApi {
        async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError> {
            self.hit(token)?;
            Ok(UserProfile {
                id: "u1".to_string(),
                display_name: None,
            })
        }

        async fn playlists_page(
            &self,
            token: &str,
            next: Option<&str>,
        ) -> Result<Page<PlaylistObject>, ApiError> {
            self.hit(token)?;
            Ok(self.playlist_pages[page_index(next)].clone())
        }

        async fn playlist_items_page(
            &self,
            token: &str,
            playlist_id: &str,
            next: Option<&str>,
        ) -> Result<Page<PlaylistItem>, ApiError> {
            self.hit(token)?;
            let pages = self.item_pages.get(playlist_id).ok_or(ApiError::Status {
                status: 404,
                body: "not found".to_string(),
            })?;
            Ok(pages[page_index(next)].clone())
        }

        async fn playlist(&self, token: &str, playlist_id: &str) -> Result<PlaylistObject, ApiError> {
            self.hit(token)?;
            if !self.item_pages.contains_key(playlist_id) {
                return Err(ApiError::Status {
                    status: 404,
                    body: "not found".to_string(),
                });
            }
            Ok(playlist(playlist_id, "u1"))
        }

        async fn remove_playlist_items(
            &self,
            token: &str,
            _playlist_id: &str,
            track_ids: &[String],
        ) -> Result<(), ApiError> {
            self.hit(token)?;
            self.writes.lock().unwrap().push(("remove", track_ids.to_vec()));
            Ok(())
        }

        async fn add_playlist_items(
            &self,
            token: &str,
            _playlist_id: &str,
            track_ids: &[String],
        ) -> Result<(), ApiError> {
            self.hit(token)?;
            self.writes.lock().unwrap().push(("add", track_ids.to_vec()));
            Ok(())
        }
    }

    fn playlist(id: &str, owner: &str) -> PlaylistObject {
        PlaylistObject {
            id: Some(id.to_string()),
            name: format!("Playlist {id}"),
            owner: Some(OwnerObject {
                id: owner.to_string(),
            }),
            tracks: Some(TracksRef { total: 1 }),
        }
    }

    fn item(id: Option<&str>, is_local: bool) -> PlaylistItem {
        PlaylistItem {
            added_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            track: Some(TrackObject {
                id: id.map(str::to_string),
                name: "Song".to_string(),
                is_local,
            }),
        }
    }

    fn page<T>(items: Vec<T>, next: Option<&str>) -> Page<T> {
        Page {
            items,
            next: next.map(str::to_string),
        }
    }

    fn fake_api() -> FakeApi {
        let mut api = FakeApi {
            playlist_pages: vec![
                page(vec![playlist("p1", "u1"), playlist("f1", "someone")], Some("page:1")),
                page(vec![playlist("p2", "u1")], None),
            ],
            ..Default::default()
        };
        api.item_pages.insert(
            "p1".to_string(),
            vec![page(
                vec![item(Some("t1"), false), item(None, true), item(Some("t2"), false)],
                None,
            )],
        );
        api.item_pages.insert(
            "p2".to_string(),
            vec![
                page(vec![item(Some("t3"), false)], Some("page:1")),
                page(vec![item(Some("t4"), false)], None),
            ],
        );
        api
    }

    fn client_with(
        api: FakeApi,
        endpoint: FakeEndpoint,
        token: crate::auth::Token,
        cache: Option<CacheStore>,
    ) -> SpotifyClient<FakeApi, FakeEndpoint> {
        let tokens = TokenManager::new(endpoint, credentials()).with_token(token);
        SpotifyClient::new(api, tokens, cache, 3600)
    }

    fn temp_cache() -> (CacheStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (CacheStore::with_dir(dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn test_tracks_miss_then_hit() {
        let (cache, _dir) = temp_cache();
        let api = fake_api();
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache.clone()));

        let first = client.fetch_playlist_tracks("p1").await.unwrap();
        assert_eq!(first, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(api.requests(), 1, "cache miss performs exactly one request");

        let stored: Option<Vec<Track>> = cache.get(&tracks_cache_key("p1", false)).unwrap();
        assert_eq!(stored.map(|t| t.len()), Some(2), "result was put into the cache");

        let second = client.fetch_playlist_tracks("p1").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(api.requests(), 1, "second call within TTL uses the cache");
    }

    #[tokio::test]
    async fn test_cache_survives_a_new_client() {
        let (cache, _dir) = temp_cache();
        let api = fake_api();
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache.clone()));
        client.fetch_playlist_tracks("p2").await.unwrap();
        assert_eq!(api.requests(), 2);

        let other_api = fake_api();
        let mut other = client_with(other_api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache));
        let tracks = other.fetch_playlist_tracks("p2").await.unwrap();

        assert_eq!(tracks, vec!["t3".to_string(), "t4".to_string()]);
        assert_eq!(other_api.requests(), 0);
    }

    #[tokio::test]
    async fn test_pagination_follows_next() {
        let api = fake_api();
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), None);

        let tracks = client.fetch_playlist_tracks("p2").await.unwrap();

        assert_eq!(tracks, vec!["t3".to_string(), "t4".to_string()]);
        assert_eq!(api.requests(), 2);
    }

    #[tokio::test]
    async fn test_without_cache_every_call_hits_network() {
        let api = fake_api();
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), None);

        client.fetch_playlist_tracks("p1").await.unwrap();
        client.fetch_playlist_tracks("p1").await.unwrap();

        assert_eq!(api.requests(), 2);
    }

    #[tokio::test]
    async fn test_include_local_keeps_local_files() {
        let api = fake_api();
        let mut client = client_with(api, FakeEndpoint::new(true), valid_token(), None);

        let tracks = client.playlist_tracks("p1", true).await.unwrap();

        assert_eq!(tracks.len(), 3);
        assert!(tracks[1].is_local);
        assert!(tracks[1].id.is_none());
    }

    #[tokio::test]
    async fn test_user_playlists_owned_only_and_cached() {
        let (cache, _dir) = temp_cache();
        let api = fake_api();
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache));

        let ids = client.fetch_user_playlists().await.unwrap();
        assert_eq!(ids, vec!["p1".to_string(), "p2".to_string()]);
        // profile + two playlist pages
        assert_eq!(api.requests(), 3);

        let again = client.fetch_user_playlists().await.unwrap();
        assert_eq!(again, ids);
        assert_eq!(api.requests(), 3);
    }

    #[tokio::test]
    async fn test_user_playlists_with_followed_and_ignore() {
        let api = fake_api();
        let mut client = client_with(api, FakeEndpoint::new(true), valid_token(), None);
        let query = PlaylistQuery {
            include_followed: true,
            ignore: vec!["p2".to_string()],
        };

        let playlists = client.user_playlists(&query).await.unwrap();
        let ids: Vec<&str> = playlists.iter().map(|p| p.id.as_str()).collect();

        assert_eq!(ids, vec!["p1", "f1"]);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_reads() {
        let (cache, _dir) = temp_cache();
        let api = fake_api();
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache.clone()));
        client.fetch_playlist_tracks("p1").await.unwrap();

        let mut forced = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache))
            .with_force_refresh(true);
        forced.fetch_playlist_tracks("p1").await.unwrap();

        assert_eq!(api.requests(), 2);
    }

    #[tokio::test]
    async fn test_expired_token_with_failing_refresh_makes_no_api_request() {
        let api = fake_api();
        let endpoint = FakeEndpoint::new(false);
        let refreshes = endpoint.refresh_calls.clone();
        let mut client = client_with(api.clone(), endpoint, expired_token(), None);

        let err = client.fetch_playlist_tracks("p1").await.unwrap_err();

        assert!(matches!(err, ClientError::Auth(_)));
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(api.requests(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_before_request() {
        let api = fake_api();
        let endpoint = FakeEndpoint::new(true);
        let refreshes = endpoint.refresh_calls.clone();
        let mut client = client_with(api.clone(), endpoint, expired_token(), None);

        client.fetch_playlist_tracks("p1").await.unwrap();

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(api.tokens_seen(), vec!["refreshed-1".to_string()]);
    }

    #[tokio::test]
    async fn test_unauthorized_triggers_one_refresh_and_retry() {
        let api = fake_api();
        api.reject_next(1);
        let endpoint = FakeEndpoint::new(true);
        let refreshes = endpoint.refresh_calls.clone();
        let mut client = client_with(api.clone(), endpoint, valid_token(), None);

        let tracks = client.fetch_playlist_tracks("p1").await.unwrap();

        assert_eq!(tracks.len(), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(api.requests(), 2);
        assert_eq!(
            api.tokens_seen(),
            vec!["valid".to_string(), "refreshed-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_surfaced() {
        let api = fake_api();
        api.reject_next(2);
        let endpoint = FakeEndpoint::new(true);
        let refreshes = endpoint.refresh_calls.clone();
        let mut client = client_with(api.clone(), endpoint, valid_token(), None);

        let err = client.fetch_playlist_tracks("p1").await.unwrap_err();

        assert!(matches!(err, ClientError::Api(ApiError::Unauthorized)));
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(api.requests(), 2);
    }

    #[tokio::test]
    async fn test_api_error_is_not_cached() {
        let (cache, _dir) = temp_cache();
        let api = fake_api();
        let mut client = client_with(api, FakeEndpoint::new(true), valid_token(), Some(cache.clone()));

        let err = client.fetch_playlist_tracks("missing").await.unwrap_err();

        assert!(matches!(err, ClientError::Api(ApiError::Status { status: 404, .. })));
        let stored: Option<Vec<Track>> = cache.get(&tracks_cache_key("missing", false)).unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_broken_cache_falls_back_to_network() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let api = fake_api();
        let mut client = client_with(
            api.clone(),
            FakeEndpoint::new(true),
            valid_token(),
            Some(CacheStore::with_dir(blocker)),
        );

        let tracks = client.fetch_playlist_tracks("p1").await.unwrap();

        assert_eq!(tracks.len(), 2);
        assert_eq!(api.requests(), 1);
    }

    #[tokio::test]
    async fn test_warm_run_makes_no_requests() {
        let (cache, _dir) = temp_cache();
        let api = fake_api();
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache.clone()));
        client.fetch_user_playlists().await.unwrap();

        let next_api = fake_api();
        let mut next_run = client_with(next_api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache));
        let ids = next_run.fetch_user_playlists().await.unwrap();

        assert_eq!(ids, vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(next_api.requests(), 0, "profile and playlists both come from the cache");
    }

    #[tokio::test]
    async fn test_forget_current_user_fetches_profile_again() {
        let (cache, _dir) = temp_cache();
        let api = fake_api();
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache));
        client.current_user_id().await.unwrap();
        assert_eq!(api.requests(), 1);

        client.forget_current_user();
        let id = client.current_user_id().await.unwrap();

        assert_eq!(id, "u1");
        assert_eq!(api.requests(), 2);
    }

    fn ids(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{prefix}{i}")).collect()
    }

    /// A target playlist holding `count` tracks spread over pages of 100
    fn api_with_target(count: usize) -> FakeApi {
        let mut api = fake_api();
        let existing = ids("old", count);
        let chunks: Vec<&[String]> = existing.chunks(100).collect();
        let pages = if chunks.is_empty() {
            vec![page(Vec::new(), None)]
        } else {
            chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| {
                    let next = (i + 1 < chunks.len()).then(|| format!("page:{}", i + 1));
                    page(
                        chunk.iter().map(|id| item(Some(id.as_str()), false)).collect(),
                        next.as_deref(),
                    )
                })
                .collect()
        };
        api.item_pages.insert("target".to_string(), pages);
        api
    }

    #[tokio::test]
    async fn test_replace_removes_then_adds_in_batches_of_100() {
        let api = api_with_target(250);
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), None);
        let sample = ids("new", 150);

        let removed = client.replace_playlist_tracks("target", &sample).await.unwrap();

        assert_eq!(removed, 250);
        let writes = api.writes();
        let shape: Vec<(&str, usize)> = writes.iter().map(|(op, ids)| (*op, ids.len())).collect();
        assert_eq!(
            shape,
            vec![("remove", 100), ("remove", 100), ("remove", 50), ("add", 100), ("add", 50)]
        );
        let added: Vec<String> = writes
            .iter()
            .filter(|(op, _)| *op == "add")
            .flat_map(|(_, ids)| ids.clone())
            .collect();
        assert_eq!(added, sample, "tracks are added in sample order");
        // lookup + three item pages + five writes
        assert_eq!(api.requests(), 9);
    }

    #[tokio::test]
    async fn test_replace_on_empty_playlist_only_adds() {
        let api = api_with_target(0);
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), None);

        let removed = client.replace_playlist_tracks("target", &ids("new", 3)).await.unwrap();

        assert_eq!(removed, 0);
        assert_eq!(api.writes(), vec![("add", ids("new", 3))]);
    }

    #[tokio::test]
    async fn test_replace_removes_duplicates_once() {
        let mut api = fake_api();
        api.item_pages.insert(
            "target".to_string(),
            vec![page(
                vec![item(Some("x"), false), item(None, true), item(Some("x"), false), item(Some("y"), false)],
                None,
            )],
        );
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), None);

        client.replace_playlist_tracks("target", &ids("new", 1)).await.unwrap();

        assert_eq!(api.writes()[0], ("remove", vec!["x".to_string(), "y".to_string()]));
    }

    #[tokio::test]
    async fn test_replace_with_no_tracks_does_nothing() {
        let api = api_with_target(5);
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), None);

        let removed = client.replace_playlist_tracks("target", &[]).await.unwrap();

        assert_eq!(removed, 0);
        assert_eq!(api.requests(), 0);
    }

    #[tokio::test]
    async fn test_replace_missing_playlist_writes_nothing() {
        let api = fake_api();
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), None);

        let err = client
            .replace_playlist_tracks("nowhere", &ids("new", 2))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Api(ApiError::Status { status: 404, .. })));
        assert!(api.writes().is_empty());
    }

    #[tokio::test]
    async fn test_replace_invalidates_cached_tracks() {
        let (cache, _dir) = temp_cache();
        let api = api_with_target(2);
        let mut client = client_with(api.clone(), FakeEndpoint::new(true), valid_token(), Some(cache.clone()));
        client.playlist_tracks("target", false).await.unwrap();
        client.playlist_tracks("target", true).await.unwrap();

        client.replace_playlist_tracks("target", &ids("new", 1)).await.unwrap();

        let plain: Option<Vec<Track>> = cache.get(&tracks_cache_key("target", false)).unwrap();
        let with_local: Option<Vec<Track>> = cache.get(&tracks_cache_key("target", true)).unwrap();
        assert!(plain.is_none());
        assert!(with_local.is_none());
    }

    #[tokio::test]
    async fn test_replace_retries_rejected_token_once() {
        let api = api_with_target(1);
        api.reject_next(1);
        let endpoint = FakeEndpoint::new(true);
        let refreshes = endpoint.refresh_calls.clone();
        let mut client = client_with(api.clone(), endpoint, valid_token(), None);

        client.replace_playlist_tracks("target", &ids("new", 1)).await.unwrap();

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(api.writes().len(), 2);
    }

    #[test]
    fn test_playlist_cache_key_sorts_ignore_list() {
        let a = PlaylistQuery {
            include_followed: false,
            ignore: vec!["b".to_string(), "a".to_string()],
        };
        let b = PlaylistQuery {
            include_followed: false,
            ignore: vec!["a".to_string(), "b".to_string()],
        };

        assert_eq!(a.cache_key("u1"), b.cache_key("u1"));
        assert_eq!(a.cache_key("u1"), "playlists:u1:owned=true:v1:ignore=a,b");
    }
}
