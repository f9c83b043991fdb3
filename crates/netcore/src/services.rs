//! Typed facade: one method per catalogued operation.
//!
//! Read-only operations go through the query cache under hierarchical keys
//! (`["auth", op]` for operations callable without a session, `["app", op]`
//! for the rest). Everything else runs as a mutation.

use common::NetworkResponse;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::endpoints::NON_AUTHENTICATED;
use crate::manager::{ApiRequest, NetworkManager};
use crate::query::{MutationOptions, NetworkMode, QueryClient, QueryKey};
use crate::request::Attachment;
use crate::transport::{HttpTransport, Transport};

pub const PRIVACY_POLICY: &str = "PRIVACY_POLICY";
pub const TERMS_CONDITION: &str = "TERMS_CONDITION";
pub const LOGIN: &str = "LOGIN";
pub const SIGNUP: &str = "SIGNUP";
pub const FORGET_PASSWORD: &str = "FORGET_PASSWORD";
pub const SENDOTP: &str = "SENDOTP";
pub const LOGOUT: &str = "LOGOUT";
pub const REFRESH_TOKEN: &str = "REFRESH_TOKEN";
pub const FETCH_PROFILE: &str = "FETCH_PROFILE";
pub const UPDATE_PROFILE: &str = "UPDATE_PROFILE";

const AUTH_SCOPE: &str = "auth";
const APP_SCOPE: &str = "app";

/// Cache key for `operation`.
pub fn query_key(operation: &str) -> QueryKey {
    let scope = if NON_AUTHENTICATED.iter().any(|d| d.name == operation) {
        AUTH_SCOPE
    } else {
        APP_SCOPE
    };
    QueryKey::new([scope, operation])
}

/// Token pair returned by a session refresh.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedTokens {
    access_token: String,
    refresh_token: Option<String>,
}

pub struct Services<T = HttpTransport> {
    queries: QueryClient<NetworkManager<T>>,
}

impl<T> Clone for Services<T> {
    fn clone(&self) -> Self {
        Self {
            queries: self.queries.clone(),
        }
    }
}

impl<T: Transport> Services<T> {
    pub fn new(queries: QueryClient<NetworkManager<T>>) -> Self {
        Self { queries }
    }

    pub fn manager(&self) -> &NetworkManager<T> {
        self.queries.fetcher()
    }

    pub fn queries(&self) -> &QueryClient<NetworkManager<T>> {
        &self.queries
    }

    pub async fn privacy_policy(&self) -> NetworkResponse<Value> {
        self.query(PRIVACY_POLICY).await
    }

    pub async fn terms_condition(&self) -> NetworkResponse<Value> {
        self.query(TERMS_CONDITION).await
    }

    pub async fn login(&self, payload: Value) -> NetworkResponse<Value> {
        let opts = self.mutation().invalidating(QueryKey::new([APP_SCOPE]));
        self.queries.mutate(ApiRequest::new(LOGIN).body(payload), &opts).await
    }

    /// Register an account. `attachments` travel as multipart file parts.
    pub async fn signup(&self, payload: Value, attachments: Vec<Attachment>) -> NetworkResponse<Value> {
        let mut request = ApiRequest::new(SIGNUP).body(payload);
        request.attachments = attachments;
        self.queries.mutate(request, &self.mutation()).await
    }

    pub async fn send_otp(&self, payload: Value) -> NetworkResponse<Value> {
        self.queries
            .mutate(ApiRequest::new(SENDOTP).body(payload), &self.mutation())
            .await
    }

    pub async fn forgot_password(&self, payload: Value) -> NetworkResponse<Value> {
        self.queries
            .mutate(ApiRequest::new(FORGET_PASSWORD).body(payload), &self.mutation())
            .await
    }

    pub async fn logout(&self) -> NetworkResponse<Value> {
        let opts = self.mutation().invalidating(QueryKey::new([APP_SCOPE]));
        self.queries.mutate(ApiRequest::new(LOGOUT), &opts).await
    }

    pub async fn fetch_profile(&self) -> NetworkResponse<Value> {
        self.query(FETCH_PROFILE).await
    }

    /// Call the refresh endpoint with `params` as the encrypted query blob.
    pub async fn update_token(&self, params: Value) -> NetworkResponse<Value> {
        self.queries
            .mutate(ApiRequest::new(REFRESH_TOKEN).params(params), &self.mutation())
            .await
    }

    pub async fn update_profile(&self, payload: Value, attachments: Vec<Attachment>) -> NetworkResponse<Value> {
        let mut request = ApiRequest::new(UPDATE_PROFILE).body(payload);
        request.attachments = attachments;
        let opts = self.mutation().invalidating(query_key(FETCH_PROFILE));
        self.queries.mutate(request, &opts).await
    }

    /// Exchange `refresh_token` for a new token pair and store it.
    ///
    /// The store is only written when the call succeeds and its data carries
    /// an `accessToken`.
    pub async fn refresh_session(&self, refresh_token: &str) -> NetworkResponse<Value> {
        let response = self.update_token(json!({ "refreshToken": refresh_token })).await;
        if !response.success {
            return response;
        }
        match response.clone().decode_data::<RefreshedTokens>() {
            Ok(NetworkResponse {
                data: Some(tokens), ..
            }) => {
                self.manager()
                    .auth()
                    .update_tokens(tokens.access_token, tokens.refresh_token);
                info!("session refreshed");
            }
            Ok(_) => warn!("refresh succeeded without token data"),
            Err(e) => warn!(error = %e, "refresh response has unexpected shape"),
        }
        response
    }

    async fn query(&self, operation: &str) -> NetworkResponse<Value> {
        let opts = self.queries.query_options();
        self.queries
            .query(query_key(operation), ApiRequest::new(operation), &opts)
            .await
    }

    /// Mutations bypass the cache's offline gate so the manager can raise the
    /// offline prompt and keep the envelope for a retry.
    fn mutation(&self) -> MutationOptions {
        MutationOptions {
            network_mode: NetworkMode::Always,
            ..self.queries.mutation_options()
        }
    }
}
