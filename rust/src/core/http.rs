// reqwest implementation of the backend boundary.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use super::backend::Backend;
use crate::error::{BackendError, BackendResult};
use crate::state::{
    Exit, ExitUserQuery, GroupMessage, GroupMessageSummary, Invitation, Message, MessageSummary,
    Notification, Offer, PictureRef, Profile,
};
use crate::TokenStore;

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(serde::Deserialize)]
struct PictureBody {
    url: String,
}

/// Map a non-success response to the error taxonomy. 401 is always distinct so callers can
/// drive logout; a structured `{"error": code}` body wins over the bare status otherwise.
pub(crate) fn classify_status(status: u16, body: &str) -> BackendError {
    if status == 401 {
        return BackendError::Unauthorized;
    }
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if !parsed.error.trim().is_empty() {
            return BackendError::Api {
                status,
                code: parsed.error,
            };
        }
    }
    match status {
        404 => BackendError::NotFound,
        s => BackendError::Status(s),
    }
}

pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    tokens: Arc<dyn TokenStore>,
}

impl HttpBackend {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenStore>) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            anyhow::bail!("api url cannot be a base: {base_url}");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            tokens,
        })
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Network("invalid base url".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.client.request(method, url);
        // No token means the request goes out unauthenticated; the server enforces 401.
        match self.tokens.get_token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check(resp: Response) -> BackendResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        before_id: Option<i64>,
    ) -> BackendResult<T> {
        let mut url = self.endpoint(segments)?;
        if let Some(before) = before_id {
            url.query_pairs_mut()
                .append_pair("before", &before.to_string());
        }
        let resp = self.request(Method::GET, url).send().await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn call(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<serde_json::Value>,
    ) -> BackendResult<()> {
        let url = self.endpoint(segments)?;
        let mut req = self.request(method, url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        Self::check(resp).await.map(|_| ())
    }

    async fn toggle(&self, on: bool, segments: &[&str]) -> BackendResult<()> {
        let method = if on { Method::PUT } else { Method::DELETE };
        self.call(method, segments, None).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_self(&self) -> BackendResult<Profile> {
        self.get(&["me"], None).await
    }

    async fn delete_account(&self) -> BackendResult<()> {
        self.call(Method::DELETE, &["me"], None).await
    }

    async fn fetch_user(&self, username: &str) -> BackendResult<Profile> {
        self.get(&["users", username], None).await
    }

    async fn fetch_attendees(&self, exit_id: &str) -> BackendResult<Vec<ExitUserQuery>> {
        self.get(&["exits", exit_id, "attendees"], None).await
    }

    async fn fetch_picture(&self, username: &str) -> BackendResult<PictureRef> {
        let body: PictureBody = self.get(&["users", username, "picture"], None).await?;
        Ok(PictureRef {
            username: username.to_string(),
            url: body.url,
        })
    }

    async fn fetch_own_picture(&self) -> BackendResult<String> {
        let body: PictureBody = self.get(&["me", "picture"], None).await?;
        Ok(body.url)
    }

    async fn upload_picture(&self, bytes: Vec<u8>) -> BackendResult<()> {
        let url = self.endpoint(&["me", "picture"])?;
        let resp = self
            .request(Method::PUT, url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        Self::check(resp).await.map(|_| ())
    }

    async fn fetch_user_messages(
        &self,
        peer: &str,
        before_id: Option<i64>,
    ) -> BackendResult<Vec<Message>> {
        self.get(&["messages", peer], before_id).await
    }

    async fn fetch_group_messages(
        &self,
        group_id: &str,
        before_id: Option<i64>,
    ) -> BackendResult<Vec<GroupMessage>> {
        self.get(&["groups", group_id, "messages"], before_id).await
    }

    async fn send_message(&self, peer: &str, content: &str) -> BackendResult<()> {
        let body = serde_json::json!({ "content": content });
        self.call(Method::POST, &["messages", peer], Some(body)).await
    }

    async fn send_group_message(&self, group_id: &str, content: &str) -> BackendResult<()> {
        let body = serde_json::json!({ "content": content });
        self.call(Method::POST, &["groups", group_id, "messages"], Some(body))
            .await
    }

    async fn mark_read(&self, peer: &str) -> BackendResult<()> {
        self.call(Method::POST, &["messages", peer, "read"], None)
            .await
    }

    async fn mark_group_read(&self, group_id: &str) -> BackendResult<()> {
        self.call(Method::POST, &["groups", group_id, "read"], None)
            .await
    }

    async fn fetch_message_summaries(&self) -> BackendResult<Vec<MessageSummary>> {
        self.get(&["messages"], None).await
    }

    async fn fetch_group_summaries(&self) -> BackendResult<Vec<GroupMessageSummary>> {
        self.get(&["groups"], None).await
    }

    async fn fetch_friends(&self) -> BackendResult<Vec<String>> {
        self.get(&["friends"], None).await
    }

    async fn fetch_incoming_solicitations(&self) -> BackendResult<Vec<String>> {
        self.get(&["solicitations", "incoming"], None).await
    }

    async fn fetch_outgoing_solicitations(&self) -> BackendResult<Vec<String>> {
        self.get(&["solicitations", "outgoing"], None).await
    }

    async fn follow(&self, username: &str) -> BackendResult<()> {
        self.toggle(true, &["follow", username]).await
    }

    async fn unfollow(&self, username: &str) -> BackendResult<()> {
        self.toggle(false, &["follow", username]).await
    }

    async fn accept_solicitation(&self, username: &str) -> BackendResult<()> {
        self.call(Method::POST, &["solicitations", username, "accept"], None)
            .await
    }

    async fn reject_solicitation(&self, username: &str) -> BackendResult<()> {
        self.call(Method::POST, &["solicitations", username, "reject"], None)
            .await
    }

    async fn search_users(&self, query: &str) -> BackendResult<Vec<ExitUserQuery>> {
        let mut url = self.endpoint(&["users"])?;
        url.query_pairs_mut().append_pair("search", query);
        let resp = self.request(Method::GET, url).send().await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn fetch_feed(&self) -> BackendResult<Vec<Exit>> {
        self.get(&["exits"], None).await
    }

    async fn fetch_owned_exits(&self) -> BackendResult<Vec<Exit>> {
        self.get(&["me", "exits"], None).await
    }

    async fn fetch_invitations(&self) -> BackendResult<Vec<Invitation>> {
        self.get(&["invitations"], None).await
    }

    async fn fetch_offers(&self) -> BackendResult<Vec<Offer>> {
        self.get(&["offers"], None).await
    }

    async fn fetch_notifications(&self) -> BackendResult<Vec<Notification>> {
        self.get(&["notifications"], None).await
    }

    async fn set_attendance(&self, exit_id: &str, attending: bool) -> BackendResult<()> {
        self.toggle(attending, &["exits", exit_id, "attendance"])
            .await
    }

    async fn set_like(&self, exit_id: &str, liked: bool) -> BackendResult<()> {
        self.toggle(liked, &["exits", exit_id, "like"]).await
    }

    async fn accept_invitation(&self, exit_id: &str) -> BackendResult<()> {
        self.call(Method::POST, &["invitations", exit_id, "accept"], None)
            .await
    }

    async fn redeem_offer(&self, token: &str) -> BackendResult<()> {
        let body = serde_json::json!({ "token": token });
        self.call(Method::POST, &["offers", "redeem"], Some(body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryTokenStore;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(base, Arc::new(MemoryTokenStore::default())).unwrap()
    }

    #[test]
    fn unauthorized_is_distinct_even_with_code() {
        let err = classify_status(401, r#"{"error":"token_expired"}"#);
        assert!(err.is_unauthorized());
    }

    #[test]
    fn structured_error_code_is_kept() {
        match classify_status(409, r#"{"error":"date_overlap"}"#) {
            BackendError::Api { status, code } => {
                assert_eq!(status, 409);
                assert_eq!(code, "date_overlap");
            }
            other => panic!("unexpected {other:?}"),
        }
        // A coded 404 still surfaces its code.
        assert_eq!(
            classify_status(404, r#"{"error":"user_not_found"}"#).code(),
            Some("user_not_found")
        );
    }

    #[test]
    fn bare_statuses_map_to_generic_variants() {
        assert!(matches!(classify_status(404, ""), BackendError::NotFound));
        assert!(matches!(
            classify_status(502, "<html>bad gateway</html>"),
            BackendError::Status(502)
        ));
    }

    #[test]
    fn endpoint_percent_encodes_identity_segments() {
        let b = backend("https://api.example.com/v1/");
        let url = b.endpoint(&["users", "ana maria", "picture"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/users/ana%20maria/picture"
        );

        let b = backend("https://api.example.com");
        let url = b.endpoint(&["messages", "bob"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/messages/bob");
    }
}
