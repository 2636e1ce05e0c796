//! Single-slot session cache with de-duplicated refresh.
//!
//! At most one refresh is in flight at a time. It runs on its own task, so it
//! completes and updates the slot even if every caller stops waiting.
//! `store` and `clear` bump a generation counter; a refresh that finishes
//! after either of them is discarded and its waiters get no session.

use crate::{AuthError, AuthResult, Session};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type SharedRefresh = Shared<BoxFuture<'static, AuthResult<Option<Session>>>>;

enum Slot {
    Empty,
    Ready(Session),
    Refreshing {
        previous: Session,
        refresh: SharedRefresh,
    },
}

struct SlotState {
    slot: Slot,
    generation: u64,
}

/// Holds the one live session of a controller.
#[derive(Clone)]
pub struct SessionCache {
    state: Arc<Mutex<SlotState>>,
    margin: Duration,
}

impl SessionCache {
    /// Sessions within `margin` of expiry are refreshed before being served.
    pub fn new(margin: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState {
                slot: Slot::Empty,
                generation: 0,
            })),
            margin,
        }
    }

    pub fn store(&self, session: Session) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.slot = Slot::Ready(session);
    }

    /// Empty the slot, returning whatever session it held.
    pub fn clear(&self) -> Option<Session> {
        let mut state = self.state.lock();
        state.generation += 1;
        match std::mem::replace(&mut state.slot, Slot::Empty) {
            Slot::Empty => None,
            Slot::Ready(session) | Slot::Refreshing { previous: session, .. } => Some(session),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Empty)
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Refreshing { .. })
    }

    /// The held session if it has not expired. Never triggers a refresh.
    pub fn peek(&self) -> Option<Session> {
        self.peek_any().filter(|session| !session.is_expired())
    }

    /// The held session regardless of expiry.
    pub fn peek_any(&self) -> Option<Session> {
        match &self.state.lock().slot {
            Slot::Empty => None,
            Slot::Ready(session) | Slot::Refreshing { previous: session, .. } => {
                Some(session.clone())
            }
        }
    }

    /// Whether the held session (fresh or being refreshed) carries `token`.
    pub fn holds_token(&self, token: &str) -> bool {
        match &self.state.lock().slot {
            Slot::Empty => false,
            Slot::Ready(session) | Slot::Refreshing { previous: session, .. } => {
                session.token == token
            }
        }
    }

    /// Return a session that is not within the refresh margin.
    ///
    /// If the held session is close to expiry, `refresh` is started once and
    /// every concurrent caller awaits the same result. `on_refreshed` runs
    /// only when the refreshed session was actually installed, while the slot
    /// is still locked; it must not touch the cache. A failed refresh empties
    /// the slot and every waiter gets the error. A refresh overtaken by
    /// `store` or `clear` yields `Ok(None)`.
    pub async fn get<F, Fut, H>(&self, refresh: F, on_refreshed: H) -> AuthResult<Option<Session>>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = AuthResult<Session>> + Send + 'static,
        H: FnOnce(&Session) + Send + 'static,
    {
        let pending = {
            let mut state = self.state.lock();
            match &state.slot {
                Slot::Empty => return Ok(None),
                Slot::Ready(session) if !session.needs_refresh(self.margin) => {
                    return Ok(Some(session.clone()));
                }
                Slot::Refreshing { refresh: inflight, .. } => inflight.clone(),
                Slot::Ready(session) => {
                    let stale = session.clone();
                    let shared =
                        self.spawn_refresh(state.generation, refresh(stale.clone()), on_refreshed);
                    state.slot = Slot::Refreshing {
                        previous: stale,
                        refresh: shared.clone(),
                    };
                    shared
                }
            }
        };

        pending.await
    }

    fn spawn_refresh<Fut, H>(&self, generation: u64, refresh: Fut, on_refreshed: H) -> SharedRefresh
    where
        Fut: Future<Output = AuthResult<Session>> + Send + 'static,
        H: FnOnce(&Session) + Send + 'static,
    {
        debug!(generation, "Starting session refresh");
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            let result = refresh.await;

            let mut state = state.lock();
            if state.generation != generation {
                debug!(generation, "Discarding refresh result for replaced session");
                return Ok(None);
            }

            match result {
                Ok(session) => {
                    state.slot = Slot::Ready(session.clone());
                    on_refreshed(&session);
                    Ok(Some(session))
                }
                Err(err) => {
                    state.slot = Slot::Empty;
                    Err(err)
                }
            }
        });

        async move {
            task.await
                .unwrap_or_else(|err| Err(AuthError::Internal(format!("Refresh task failed: {}", err))))
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::session_for;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MARGIN: Duration = Duration::from_secs(300);

    fn no_refresh(_: Session) -> std::future::Ready<AuthResult<Session>> {
        panic!("refresh must not be started")
    }

    fn fresh(login: &str) -> Session {
        session_for(login, &[], chrono::Duration::hours(1))
    }

    fn stale(login: &str) -> Session {
        session_for(login, &[], chrono::Duration::seconds(60))
    }

    #[tokio::test]
    async fn test_empty_cache_returns_none() {
        let cache = SessionCache::new(MARGIN);
        let result = cache
            .get(no_refresh, |_| {})
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_fresh_session_served_without_refresh() {
        let cache = SessionCache::new(MARGIN);
        cache.store(fresh("a@x.com"));

        let session = cache
            .get(no_refresh, |_| {})
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.identity.login_id, "a@x.com");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let cache = SessionCache::new(MARGIN);
        cache.store(stale("a@x.com"));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get(
                        move |_| async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, AuthError>(fresh("a@x.com"))
                        },
                        |_| {},
                    )
                    .await
            }));
        }

        for handle in handles {
            let session = handle.await.unwrap().unwrap().unwrap();
            assert!(!session.needs_refresh(MARGIN));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_failure_empties_slot_for_all_waiters() {
        let cache = SessionCache::new(MARGIN);
        cache.store(stale("a@x.com"));

        let first = cache.get(
            |_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<Session, _>(AuthError::SessionExpired)
            },
            |_| {},
        );
        let second = cache.get(no_refresh, |_| {});

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap_err(), AuthError::SessionExpired);
        assert_eq!(second.unwrap_err(), AuthError::SessionExpired);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_wins_over_inflight_refresh() {
        let cache = SessionCache::new(MARGIN);
        cache.store(stale("a@x.com"));
        let installed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&installed);

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get(
                        |_| async {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, AuthError>(fresh("a@x.com"))
                        },
                        move |_| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        },
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.clear().is_some());

        // A cleared slot never hands out the late session.
        assert!(waiter.await.unwrap().unwrap().is_none());
        assert!(cache.is_empty());
        assert_eq!(installed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_during_refresh_keeps_new_session() {
        let cache = SessionCache::new(MARGIN);
        cache.store(stale("a@x.com"));

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get(
                        |_| async {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, AuthError>(fresh("a@x.com"))
                        },
                        |_| panic!("superseded refresh must not be persisted"),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let replacement = fresh("b@x.com");
        cache.store(replacement.clone());

        assert!(waiter.await.unwrap().unwrap().is_none());
        assert!(cache.holds_token(&replacement.token));
        assert_eq!(cache.peek().unwrap().identity.login_id, "b@x.com");
    }

    #[test]
    fn test_holds_token_matches_only_current_session() {
        let cache = SessionCache::new(MARGIN);
        let first = fresh("a@x.com");
        assert!(!cache.holds_token(&first.token));

        cache.store(first.clone());
        assert!(cache.holds_token(&first.token));

        cache.store(fresh("b@x.com"));
        assert!(!cache.holds_token(&first.token));
    }

    #[tokio::test]
    async fn test_refresh_completes_when_caller_gives_up() {
        let cache = SessionCache::new(MARGIN);
        cache.store(stale("a@x.com"));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            cache.get(
                |_| async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok::<_, AuthError>(fresh("a@x.com"))
                },
                |_| {},
            ),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let held = cache.peek().unwrap();
        assert!(!held.needs_refresh(MARGIN));
    }

    #[test]
    fn test_peek_ignores_expired_session() {
        let cache = SessionCache::new(MARGIN);
        cache.store(session_for("a@x.com", &[], chrono::Duration::seconds(-5)));

        assert!(cache.peek().is_none());
        assert!(cache.peek_any().is_some());
    }
}
