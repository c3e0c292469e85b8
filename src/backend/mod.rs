//! Client for the hosted backend's generated REST endpoints.
//!
//! Every table is exposed at `{base}/rest/v1/{table}` and filtered with query operators such as
//! `user_id=eq.{id}`. Requests always carry the project's anon key as `apikey`. The bearer token
//! is the anon key too, unless the backend was [scoped](stores::AuthStore::scoped) to a caller's
//! access token; row-level security on the backend decides what that token may read or write.

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::{AUTHORIZATION, InvalidHeaderValue};
use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::RequestBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::constants::{
    API_KEY_HEADER, AUTH_USER_PATH, FRIENDSHIP_ACCEPTED, PREFER_HEADER, PREFER_REPRESENTATION, REST_PREFIX,
    TABLE_ACHIEVEMENTS, TABLE_BADGES, TABLE_FRIENDSHIPS, TABLE_PROFILES, TABLE_VOTES,
};
use crate::energy::EnergyState;

pub mod models;
pub mod stores;

use models::*;
use stores::*;

#[derive(Debug, Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str) -> BackendResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(anon_key)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {anon_key}"))?,
        );

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    /// Copy of this client that authenticates as the holder of `token`
    pub fn with_bearer(&self, token: &str) -> BackendResult<Self> {
        let mut scoped = self.clone();
        scoped.headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );

        Ok(scoped)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}{REST_PREFIX}/{table}", self.base_url)
    }

    fn get(&self, table: &str, query: &[(&str, String)]) -> RequestBuilder {
        self.client
            .get(self.table_url(table))
            .headers(self.headers.clone())
            .query(query)
    }

    fn post<B: Serialize + ?Sized>(&self, table: &str, body: &B) -> RequestBuilder {
        self.client
            .post(self.table_url(table))
            .headers(self.headers.clone())
            .header(PREFER_HEADER, PREFER_REPRESENTATION)
            .json(body)
    }

    fn patch<B: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> RequestBuilder {
        self.client
            .patch(self.table_url(table))
            .headers(self.headers.clone())
            .header(PREFER_HEADER, PREFER_REPRESENTATION)
            .query(query)
            .json(body)
    }

    /// Sends a request and parses the response body as `T`.
    ///
    /// Non-2xx responses are turned into [`BackendErr::Rejected`], carrying the body's `message`
    /// field when the backend provided one.
    #[instrument(skip(request))]
    async fn send<T>(request: RequestBuilder) -> BackendResult<T>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        let res = request.send().await?;
        let status = res.status();

        if !status.is_success() {
            tracing::error!(code = %status, "non-2xx response from backend");
            let message = match res.json::<Value>().await {
                Ok(body) => {
                    tracing::debug!(?body, "error body");
                    body["message"]
                        .as_str()
                        .map(str::to_owned)
                        .unwrap_or_else(|| body.to_string())
                }
                Err(_) => status.to_string(),
            };

            return Err(BackendErr::Rejected { status, message });
        }

        Ok(res.json::<T>().await?)
    }

    /// Inserts or patches with `return=representation` answer with an array; we only ever
    /// write one row at a time
    async fn send_single<T>(request: RequestBuilder) -> BackendResult<T>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        Self::send::<Vec<T>>(request)
            .await?
            .into_iter()
            .next()
            .ok_or(BackendErr::EmptyResponse)
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl AchievementStore for RestBackend {
    #[instrument(skip(self))]
    async fn get_by_user(&self, user_id: &str) -> BackendResult<Vec<AchievementRecord>> {
        Self::send(self.get(TABLE_ACHIEVEMENTS, &[("user_id", eq(user_id))])).await
    }

    #[instrument(skip(self, record), fields(badge_id = %record.badge_id))]
    async fn award(&self, record: &NewAchievement) -> BackendResult<AchievementRecord> {
        Self::send_single(self.post(TABLE_ACHIEVEMENTS, record)).await
    }

    #[instrument(skip(self))]
    async fn update_progress(&self, id: &str, progress: i64) -> BackendResult<AchievementRecord> {
        Self::send_single(self.patch(
            TABLE_ACHIEVEMENTS,
            &[("id", eq(id))],
            &ProgressPatch { progress },
        ))
        .await
    }
}

#[async_trait]
impl VoteStore for RestBackend {
    #[instrument(skip(self))]
    async fn get_by_user(&self, user_id: &str) -> BackendResult<Vec<VoteRecord>> {
        Self::send(self.get(TABLE_VOTES, &[("user_id", eq(user_id))])).await
    }

    #[instrument(skip(self, vote), fields(dilemma_id = %vote.dilemma_id))]
    async fn insert(&self, vote: &NewVote) -> BackendResult<VoteRecord> {
        Self::send_single(self.post(TABLE_VOTES, vote)).await
    }
}

#[async_trait]
impl FriendshipStore for RestBackend {
    #[instrument(skip(self))]
    async fn get_friends(&self, user_id: &str) -> BackendResult<Vec<FriendshipRecord>> {
        let query = [
            ("status", eq(FRIENDSHIP_ACCEPTED)),
            ("or", format!("(user_id.eq.{user_id},friend_id.eq.{user_id})")),
        ];

        Self::send(self.get(TABLE_FRIENDSHIPS, &query)).await
    }
}

#[async_trait]
impl BadgeStore for RestBackend {
    #[instrument(skip(self, badge), fields(badge_name = %badge.badge_name))]
    async fn award(&self, badge: &NewBadge) -> BackendResult<BadgeRecord> {
        Self::send_single(self.post(TABLE_BADGES, badge)).await
    }
}

#[async_trait]
impl ProfileStore for RestBackend {
    #[instrument(skip(self))]
    async fn get_profile(&self, user_id: &str) -> BackendResult<Profile> {
        Self::send::<Vec<Profile>>(self.get(TABLE_PROFILES, &[("id", eq(user_id))]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendErr::NotFound(user_id.to_string()))
    }

    #[instrument(skip(self))]
    async fn update_energy(&self, user_id: &str, state: EnergyState) -> BackendResult<Profile> {
        Self::send_single(self.patch(
            TABLE_PROFILES,
            &[("id", eq(user_id))],
            &EnergyPatch::from(state),
        ))
        .await
    }
}

#[async_trait]
impl AuthStore for RestBackend {
    #[instrument(skip_all)]
    async fn authenticate(&self, token: &str) -> BackendResult<AuthUser> {
        let request = self
            .client
            .get(format!("{}{AUTH_USER_PATH}", self.base_url))
            .headers(self.with_bearer(token)?.headers);

        Self::send(request).await
    }

    fn scoped(self: Arc<Self>, token: &str) -> BackendResult<Arc<dyn AppStore>> {
        Ok(Arc::new(self.with_bearer(token)?))
    }
}

pub type BackendResult<T> = core::result::Result<T, BackendErr>;

#[derive(Debug, Error)]
pub enum BackendErr {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Header(#[from] InvalidHeaderValue),

    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("backend returned no rows")]
    EmptyResponse,

    #[error("no record found for '{0}'")]
    NotFound(String),
}
