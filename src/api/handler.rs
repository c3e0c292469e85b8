use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use http::header::AUTHORIZATION;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::achievements::{BadgeNotification, UserSnapshot, VoteContext};
use crate::api::server::{AppState, JsonResult, RouteError};
use crate::backend::models::{Choice, NewVote};
use crate::energy::EnergyReading;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub dilemma_id: String,
    pub choice: Choice,
    /// Share of voters who agreed with this user, when results are already known
    #[serde(default)]
    pub user_pct: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    /// Absent for guest votes, which cost nothing
    pub energy: Option<EnergyReading>,
    pub new_badges: Vec<BadgeNotification>,
}

/// Access token from `Authorization: Bearer <token>`; `None` when the header is absent
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, RouteError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Some)
        .ok_or(RouteError::MalformedAuthorization)
}

#[instrument(skip(state, headers))]
pub async fn energy_by_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> JsonResult<EnergyReading> {
    let profile = match bearer_token(&headers)? {
        Some(token) => state.store.clone().scoped(token)?.get_profile(&user_id).await?,
        None => state.store.get_profile(&user_id).await?,
    };

    Ok(Json(state.energy.read_now(&profile.energy_state())))
}

#[instrument(skip(state))]
pub async fn create_session(State(state): State<Arc<AppState>>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.create().await;
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

#[instrument(skip(state))]
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, RouteError> {
    match state.sessions.reset(&session_id).await {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(RouteError::SessionNotFound(session_id)),
    }
}

#[instrument(skip(state))]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, RouteError> {
    match state.sessions.remove(&session_id).await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(RouteError::SessionNotFound(session_id)),
    }
}

/// Records a vote for the caller identified by the bearer token.
///
/// An authenticated vote costs a point of energy and runs the achievement pass once the vote row
/// exists; nothing is written when the insert fails. Guests (no `Authorization` header) have
/// their vote stored without a user and earn nothing. The session lock is held for the whole
/// call, so votes within one session are evaluated one at a time. Badge evaluation cannot fail
/// the request.
#[instrument(skip(state, headers, vote), fields(dilemma_id = %vote.dilemma_id))]
pub async fn submit_vote(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(vote): Json<VoteRequest>,
) -> JsonResult<VoteResponse> {
    let session = state
        .sessions
        .get(&session_id)
        .await
        .ok_or(RouteError::SessionNotFound(session_id))?;
    let mut session = session.lock().await;

    let Some(token) = bearer_token(&headers)? else {
        state
            .store
            .insert(&NewVote {
                user_id: None,
                dilemma_id: vote.dilemma_id,
                choice: vote.choice,
            })
            .await?;

        let ctx = VoteContext {
            user_pct: vote.user_pct,
            vote_id: None,
        };
        let earned = state
            .evaluator
            .check(state.store.as_ref(), &mut session, None, &ctx)
            .await;
        debug_assert!(earned.is_empty());

        return Ok(Json(VoteResponse {
            energy: None,
            new_badges: Vec::new(),
        }));
    };

    let caller = state.store.authenticate(token).await?;
    let store = state.store.clone().scoped(token)?;
    tracing::debug!(user_id = %caller.id, "vote from authenticated user");

    let profile = store.get_profile(&caller.id).await?;
    let now = Utc::now();
    let spent = state.energy.spend(&profile.energy_state(), now)?;

    let record = store
        .insert(&NewVote {
            user_id: Some(caller.id.clone()),
            dilemma_id: vote.dilemma_id,
            choice: vote.choice,
        })
        .await?;
    store.update_energy(&caller.id, spent).await?;

    let user = UserSnapshot {
        id: caller.id,
        streak: profile.current_streak.clamp(0, i64::from(u32::MAX)) as u32,
    };
    let ctx = VoteContext {
        user_pct: vote.user_pct,
        vote_id: Some(record.id),
    };

    let earned = state
        .evaluator
        .check(store.as_ref(), &mut session, Some(&user), &ctx)
        .await;
    let new_badges = earned
        .iter()
        .filter_map(|id| state.evaluator.catalog().get(id))
        .map(|badge| BadgeNotification::new(&user.id, badge))
        .collect();

    Ok(Json(VoteResponse {
        energy: Some(state.energy.read(&spent, now)),
        new_badges,
    }))
}

#[instrument(skip(state, req))]
pub async fn proxy_backend(State(state): State<Arc<AppState>>, req: Request) -> Response {
    match state.proxy.forward(req).await {
        Ok(res) => res,
        Err(e) => RouteError::from(e).into_response(),
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use axum::body::Body;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::achievements::evaluator::test::{FakeStore, FixedClock, RecordingNotifier};
    use crate::achievements::{AchievementEvaluator, BadgeCatalog, SessionRegistry};
    use crate::api::server::router;
    use crate::backend::models::Profile;
    use crate::energy::EnergyModel;
    use crate::proxy::BackendProxy;
    use crate::proxy::cookie::CookieMode;

    fn profile(energy: Option<i64>, minutes_ago: i64) -> Profile {
        Profile {
            id: String::from("u1"),
            energy,
            energy_updated_at: Some(Utc::now() - chrono::Duration::minutes(minutes_ago)),
            current_streak: 3,
        }
    }

    fn app(store: Arc<FakeStore>) -> (axum::Router, Arc<AppState>) {
        let evaluator = AchievementEvaluator::new(
            Arc::new(BadgeCatalog::standard()),
            Arc::new(RecordingNotifier::default()),
        )
        .with_clock(Arc::new(FixedClock(12)));
        let proxy = BackendProxy::new("http://127.0.0.1:9", CookieMode::Local).unwrap();

        let state = Arc::new(AppState::new(
            store,
            evaluator,
            EnergyModel::new(10, 10),
            SessionRegistry::default(),
            proxy,
        ));

        (router(state.clone(), "*"), state)
    }

    /// Store where `t1` is u1's access token
    fn store_with_profile(profile: Profile) -> FakeStore {
        FakeStore {
            tokens: HashMap::from([(String::from("t1"), String::from("u1"))]),
            profile: Some(profile),
            ..Default::default()
        }
    }

    async fn json_body(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn vote_request(session_id: Uuid, token: Option<&str>, body: Value) -> Request {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/sessions/{session_id}/votes"))
            .header("content-type", "application/json");

        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }

        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn majority_vote() -> Value {
        json!({
            "dilemma_id": "d1",
            "choice": "a",
            "user_pct": 72.5
        })
    }

    fn badge_ids(body: &Value) -> Vec<String> {
        body["new_badges"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["badge_id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_energy_route() {
        let store = Arc::new(FakeStore {
            profile: Some(profile(Some(5), 18)),
            ..Default::default()
        });
        let (app, _) = app(store);

        let res = app
            .oneshot(Request::builder().uri("/energy/u1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = json_body(res).await;
        assert_eq!(body["current"], 8);
        assert_eq!(body["max"], 10);
    }

    #[tokio::test]
    async fn test_energy_unknown_user() {
        let (app, _) = app(Arc::new(FakeStore::default()));

        let res = app
            .oneshot(Request::builder().uri("/energy/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_energy_route_uses_caller_token() {
        let store = Arc::new(store_with_profile(profile(Some(5), 18)));
        let (app, _) = app(store.clone());

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/energy/u1")
                    .header("authorization", "Bearer t1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(*store.scoped_tokens.lock().unwrap(), vec![String::from("t1")]);
    }

    #[tokio::test]
    async fn test_vote_spends_energy_and_awards() {
        let store = Arc::new(store_with_profile(profile(None, 0)));
        let (app, state) = app(store.clone());
        let session_id = state.sessions.create().await;

        let res = app
            .oneshot(vote_request(session_id, Some("t1"), majority_vote()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = json_body(res).await;
        assert_eq!(body["energy"]["current"], 9);
        assert_eq!(badge_ids(&body), vec!["first_vote", "on_fire"]);

        let votes = store.inserted_votes.lock().unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].user_id.as_deref(), Some("u1"));

        let energy = store.energy_updates.lock().unwrap();
        assert_eq!(energy[0].0, "u1");
        assert_eq!(energy[0].1.current, Some(9));
        assert_eq!(*store.scoped_tokens.lock().unwrap(), vec![String::from("t1")]);

        let session = state.sessions.get(&session_id).await.unwrap();
        assert_eq!(session.lock().await.majority_count, 1);
    }

    #[tokio::test]
    async fn test_vote_ignores_user_id_in_body() {
        let store = Arc::new(store_with_profile(profile(None, 0)));
        let (app, state) = app(store.clone());
        let session_id = state.sessions.create().await;

        let body = json!({
            "user_id": "victim",
            "dilemma_id": "d1",
            "choice": "b"
        });
        let res = app
            .oneshot(vote_request(session_id, Some("t1"), body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        assert_eq!(*store.profile_reads.lock().unwrap(), vec![String::from("u1")]);
        assert_eq!(store.energy_updates.lock().unwrap()[0].0, "u1");
        assert_eq!(
            store.inserted_votes.lock().unwrap()[0].user_id.as_deref(),
            Some("u1")
        );
        assert!(store.awarded.lock().unwrap().iter().all(|a| a.user_id == "u1"));
    }

    #[tokio::test]
    async fn test_guest_vote_recorded_without_badges() {
        let store = Arc::new(store_with_profile(profile(None, 0)));
        let (app, state) = app(store.clone());
        let session_id = state.sessions.create().await;

        let res = app
            .oneshot(vote_request(session_id, None, majority_vote()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = json_body(res).await;
        assert!(body["energy"].is_null());
        assert!(badge_ids(&body).is_empty());

        assert_eq!(store.inserted_votes.lock().unwrap()[0].user_id, None);
        assert!(store.energy_updates.lock().unwrap().is_empty());
        assert!(store.profile_reads.lock().unwrap().is_empty());
        assert!(store.awarded.lock().unwrap().is_empty());

        let session = state.sessions.get(&session_id).await.unwrap();
        assert_eq!(session.lock().await.session_votes, 0);
    }

    #[tokio::test]
    async fn test_vote_rejected_token() {
        let store = Arc::new(store_with_profile(profile(None, 0)));
        let (app, state) = app(store.clone());
        let session_id = state.sessions.create().await;

        let res = app
            .clone()
            .oneshot(vote_request(session_id, Some("forged"), majority_vote()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let malformed = Request::builder()
            .method("POST")
            .uri(format!("/sessions/{session_id}/votes"))
            .header("content-type", "application/json")
            .header("authorization", "Basic dTE6cHc=")
            .body(Body::from(majority_vote().to_string()))
            .unwrap();
        let res = app.oneshot(malformed).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        assert!(store.inserted_votes.lock().unwrap().is_empty());
        assert!(store.energy_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_trace() {
        let store = Arc::new(FakeStore {
            fail_vote_insert: true,
            ..store_with_profile(profile(None, 0))
        });
        let (app, state) = app(store.clone());
        let session_id = state.sessions.create().await;

        let res = app
            .oneshot(vote_request(session_id, Some("t1"), majority_vote()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

        assert!(store.energy_updates.lock().unwrap().is_empty());
        assert!(store.awarded.lock().unwrap().is_empty());
        assert!(store.badges.lock().unwrap().is_empty());

        let session = state.sessions.get(&session_id).await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.session_votes, 0);
        assert!(session.awarded.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_votes_award_once() {
        let store = Arc::new(store_with_profile(profile(None, 0)));
        let (app, state) = app(store.clone());
        let session_id = state.sessions.create().await;

        let (first, second) = tokio::join!(
            app.clone()
                .oneshot(vote_request(session_id, Some("t1"), majority_vote())),
            app.clone()
                .oneshot(vote_request(session_id, Some("t1"), majority_vote())),
        );

        let first = json_body(first.unwrap()).await;
        let second = json_body(second.unwrap()).await;

        let mut all = badge_ids(&first);
        all.extend(badge_ids(&second));
        assert_eq!(all.iter().filter(|id| *id == "first_vote").count(), 1);
        assert_eq!(all.iter().filter(|id| *id == "on_fire").count(), 1);

        let awarded = store.awarded.lock().unwrap();
        assert_eq!(awarded.iter().filter(|a| a.badge_id == "first_vote").count(), 1);
        assert_eq!(store.inserted_votes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_vote_out_of_energy() {
        let store = Arc::new(store_with_profile(profile(Some(0), 1)));
        let (app, state) = app(store.clone());
        let session_id = state.sessions.create().await;

        let res = app
            .oneshot(vote_request(session_id, Some("t1"), majority_vote()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(json_body(res).await["retry_in_ms"].as_u64().unwrap() > 0);
        assert!(store.inserted_votes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vote_unknown_session() {
        let (app, _) = app(Arc::new(FakeStore::default()));

        let res = app
            .oneshot(vote_request(Uuid::new_v4(), Some("t1"), majority_vote()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_create_and_reset() {
        let (app, state) = app(Arc::new(FakeStore::default()));

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let created: SessionCreated = serde_json::from_value(json_body(res).await).unwrap();
        {
            let session = state.sessions.get(&created.session_id).await.unwrap();
            session.lock().await.session_votes = 4;
        }

        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/sessions/{}/reset", created.session_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let session = state.sessions.get(&created.session_id).await.unwrap();
        assert_eq!(session.lock().await.session_votes, 0);
    }

    #[tokio::test]
    async fn test_end_session() {
        let (app, state) = app(Arc::new(FakeStore::default()));
        let session_id = state.sessions.create().await;

        let end = || {
            Request::builder()
                .method("DELETE")
                .uri(format!("/sessions/{session_id}"))
                .body(Body::empty())
                .unwrap()
        };

        let res = app.clone().oneshot(end()).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(state.sessions.get(&session_id).await.is_none());

        let res = app.oneshot(end()).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_proxy_unreachable_is_bad_gateway() {
        let (app, _) = app(Arc::new(FakeStore::default()));

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/backend/rest/v1/dilemmas")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }
}
