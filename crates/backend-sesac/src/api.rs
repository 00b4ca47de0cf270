//! REST transport: one method per server endpoint, credential passed per call.

use async_trait::async_trait;
use backend_core::{
    ChatListPayload, ChatPayload, ChatQuery, Coordinate, ErrorKind, MyQueueState, Onqueue,
    ReportQuery, ReviewQuery, SearchSesacQuery, SesacFriendQuery, UserInfo, UserRegisterQuery,
    UserUpdateQuery, classify_http_status, format_watermark,
};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::SesacConfig;

const ID_TOKEN_HEADER: &str = "idtoken";

/// Remote endpoints of the matching service.
///
/// Implementations never retry; every non-200 outcome is reported through
/// the closed [`ErrorKind`] taxonomy.
#[async_trait]
pub trait SesacRemote: Send + Sync {
    async fn user_info(&self, token: &str) -> Result<UserInfo, ErrorKind>;

    async fn register(&self, token: &str, query: &UserRegisterQuery) -> Result<(), ErrorKind>;

    async fn withdraw(&self, token: &str) -> Result<(), ErrorKind>;

    async fn update_user_info(&self, token: &str, query: &UserUpdateQuery)
    -> Result<(), ErrorKind>;

    async fn onqueue(&self, token: &str, coordinate: &Coordinate) -> Result<Onqueue, ErrorKind>;

    async fn search_sesac(&self, token: &str, query: &SearchSesacQuery) -> Result<(), ErrorKind>;

    async fn pause_search_sesac(&self, token: &str) -> Result<(), ErrorKind>;

    async fn my_queue_state(&self, token: &str) -> Result<MyQueueState, ErrorKind>;

    async fn sesac_friend(&self, token: &str, query: &SesacFriendQuery) -> Result<(), ErrorKind>;

    async fn accept_sesac_friend(
        &self,
        token: &str,
        query: &SesacFriendQuery,
    ) -> Result<(), ErrorKind>;

    /// Messages exchanged with `other_uid` created after `after`, ascending.
    async fn chat_since(
        &self,
        token: &str,
        other_uid: &str,
        after: &DateTime<Utc>,
    ) -> Result<Vec<ChatPayload>, ErrorKind>;

    /// Send a message; the server echoes the stored copy.
    async fn send_chat(
        &self,
        token: &str,
        other_uid: &str,
        query: &ChatQuery,
    ) -> Result<ChatPayload, ErrorKind>;

    async fn dodge(&self, token: &str, query: &SesacFriendQuery) -> Result<(), ErrorKind>;

    async fn write_review(&self, token: &str, query: &ReviewQuery) -> Result<(), ErrorKind>;

    async fn report(&self, token: &str, query: &ReportQuery) -> Result<(), ErrorKind>;
}

/// `reqwest` implementation of [`SesacRemote`].
#[derive(Debug, Clone)]
pub struct SesacApi {
    http: Client,
    base_url: Url,
}

impl SesacApi {
    pub fn new(config: &SesacConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self::with_client(http, config.base_url.clone()))
    }

    pub fn with_client(http: Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Shared HTTP client, reused by the identity provider.
    pub fn http(&self) -> &Client {
        &self.http
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ErrorKind> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                warn!(base_url = %self.base_url, "base URL cannot carry a path");
                ErrorKind::Unknown
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        token: &str,
    ) -> Result<RequestBuilder, ErrorKind> {
        let url = self.endpoint(segments)?;
        Ok(self
            .http
            .request(method, url)
            .header(ID_TOKEN_HEADER, token))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ErrorKind> {
        let response = request.send().await.map_err(|err| {
            warn!(error = %err, "request failed without a response");
            classify_http_status(err.status().map(|status| status.as_u16()))
        })?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }

        let error = classify_http_status(Some(status.as_u16()));
        debug!(
            url = %response.url(),
            status = status.as_u16(),
            error = error.code(),
            "request rejected"
        );
        Err(error)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ErrorKind> {
        let response = self.execute(request).await?;
        response.json::<T>().await.map_err(|err| {
            warn!(error = %err, "response body could not be decoded");
            ErrorKind::Unknown
        })
    }

    async fn call(&self, request: RequestBuilder) -> Result<(), ErrorKind> {
        self.execute(request).await.map(|_| ())
    }
}

#[async_trait]
impl SesacRemote for SesacApi {
    async fn user_info(&self, token: &str) -> Result<UserInfo, ErrorKind> {
        self.fetch(self.request(Method::GET, &["user"], token)?)
            .await
    }

    async fn register(&self, token: &str, query: &UserRegisterQuery) -> Result<(), ErrorKind> {
        query.validate()?;
        self.call(self.request(Method::POST, &["user"], token)?.json(query))
            .await
    }

    async fn withdraw(&self, token: &str) -> Result<(), ErrorKind> {
        self.call(self.request(Method::POST, &["user", "withdraw"], token)?)
            .await
    }

    async fn update_user_info(
        &self,
        token: &str,
        query: &UserUpdateQuery,
    ) -> Result<(), ErrorKind> {
        self.call(
            self.request(Method::POST, &["user", "update", "mypage"], token)?
                .json(query),
        )
        .await
    }

    async fn onqueue(&self, token: &str, coordinate: &Coordinate) -> Result<Onqueue, ErrorKind> {
        self.fetch(
            self.request(Method::POST, &["queue", "onqueue"], token)?
                .json(coordinate),
        )
        .await
    }

    async fn search_sesac(&self, token: &str, query: &SearchSesacQuery) -> Result<(), ErrorKind> {
        self.call(self.request(Method::POST, &["queue"], token)?.json(query))
            .await
    }

    async fn pause_search_sesac(&self, token: &str) -> Result<(), ErrorKind> {
        self.call(self.request(Method::DELETE, &["queue"], token)?)
            .await
    }

    async fn my_queue_state(&self, token: &str) -> Result<MyQueueState, ErrorKind> {
        self.fetch(self.request(Method::GET, &["queue", "myQueueState"], token)?)
            .await
    }

    async fn sesac_friend(&self, token: &str, query: &SesacFriendQuery) -> Result<(), ErrorKind> {
        self.call(
            self.request(Method::POST, &["queue", "hobbyrequest"], token)?
                .json(query),
        )
        .await
    }

    async fn accept_sesac_friend(
        &self,
        token: &str,
        query: &SesacFriendQuery,
    ) -> Result<(), ErrorKind> {
        self.call(
            self.request(Method::POST, &["queue", "hobbyaccept"], token)?
                .json(query),
        )
        .await
    }

    async fn chat_since(
        &self,
        token: &str,
        other_uid: &str,
        after: &DateTime<Utc>,
    ) -> Result<Vec<ChatPayload>, ErrorKind> {
        let request = self
            .request(Method::GET, &["chat", other_uid], token)?
            .query(&[("lastchatDate", format_watermark(after))]);
        let list: ChatListPayload = self.fetch(request).await?;
        Ok(list.payload)
    }

    async fn send_chat(
        &self,
        token: &str,
        other_uid: &str,
        query: &ChatQuery,
    ) -> Result<ChatPayload, ErrorKind> {
        self.fetch(
            self.request(Method::POST, &["chat", other_uid], token)?
                .json(query),
        )
        .await
    }

    async fn dodge(&self, token: &str, query: &SesacFriendQuery) -> Result<(), ErrorKind> {
        self.call(
            self.request(Method::POST, &["queue", "dodge"], token)?
                .json(query),
        )
        .await
    }

    async fn write_review(&self, token: &str, query: &ReviewQuery) -> Result<(), ErrorKind> {
        self.call(
            self.request(Method::POST, &["queue", "rate", query.other_uid.as_str()], token)?
                .json(query),
        )
        .await
    }

    async fn report(&self, token: &str, query: &ReportQuery) -> Result<(), ErrorKind> {
        self.call(
            self.request(Method::POST, &["user", "report"], token)?
                .json(query),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use backend_core::{ChatDirection, default_watermark};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path, query_param},
    };

    use super::*;

    async fn api_for(server: &MockServer) -> SesacApi {
        let base_url = Url::parse(&server.uri()).expect("mock server uri");
        SesacApi::with_client(Client::new(), base_url)
    }

    #[tokio::test]
    async fn maps_status_table_to_error_kinds() {
        let server = MockServer::start().await;
        let api = api_for(&server).await;

        for (status, expected) in [
            (201, ErrorKind::Duplicated),
            (202, ErrorKind::InvalidInputBody),
            (401, ErrorKind::InvalidToken),
            (406, ErrorKind::AlreadyWithdrawn),
            (500, ErrorKind::InternalServer),
            (501, ErrorKind::InternalClient),
            (404, ErrorKind::Unknown),
        ] {
            server.reset().await;
            Mock::given(method("DELETE"))
                .and(path("/queue"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = api
                .pause_search_sesac("tok")
                .await
                .expect_err("non-200 must fail");
            assert_eq!(err, expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn sends_id_token_header_and_decodes_queue_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue/myQueueState"))
            .and(header("idtoken", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "dodged": 0,
                "matched": 1,
                "reviewed": 0,
                "matchedNick": "alice",
                "matchedUid": "u-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let state = api_for(&server)
            .await
            .my_queue_state("tok-1")
            .await
            .expect("queue state");
        assert!(state.matched);
        assert_eq!(state.matched_uid.as_deref(), Some("u-2"));
    }

    #[tokio::test]
    async fn undecodable_success_body_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = api_for(&server)
            .await
            .user_info("tok")
            .await
            .expect_err("garbage must fail");
        assert_eq!(err, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn unreachable_server_is_unknown() {
        let api = SesacApi::with_client(
            Client::new(),
            Url::parse("http://127.0.0.1:9").expect("url"),
        );
        let err = api
            .pause_search_sesac("tok")
            .await
            .expect_err("nothing listens on port 9");
        assert_eq!(err, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn catch_up_sends_watermark_and_unwraps_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chat/u-2"))
            .and(query_param("lastchatDate", "2000-01-01T00:00:00.000Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payload": [{
                    "_id": "c1",
                    "to": "u-1",
                    "from": "u-2",
                    "chat": "hello",
                    "createdAt": "2022-02-15T10:00:00.000Z"
                }]
            })))
            .mount(&server)
            .await;

        let page = api_for(&server)
            .await
            .chat_since("tok", "u-2", &default_watermark())
            .await
            .expect("catch-up page");
        assert_eq!(page.len(), 1);
        let chat = page[0].clone().into_chat("u-1");
        assert_eq!(chat.direction, ChatDirection::Inbound);
        assert_eq!(chat.text, "hello");
    }

    #[tokio::test]
    async fn posts_review_to_partner_path_with_wire_names() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue/rate/u-2"))
            .and(body_json(json!({
                "otheruid": "u-2",
                "reputation": [1, 0, 1],
                "comment": "thanks"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        api_for(&server)
            .await
            .write_review(
                "tok",
                &ReviewQuery {
                    other_uid: "u-2".into(),
                    reputation: vec![1, 0, 1],
                    comment: "thanks".into(),
                },
            )
            .await
            .expect("review accepted");
    }

    #[tokio::test]
    async fn register_rejects_long_nickname_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let query = UserRegisterQuery {
            phone_number: "+821012345678".into(),
            fcm_token: "fcm".into(),
            nick: "far-too-long-nick".into(),
            birth: default_watermark(),
            email: "a@b.c".into(),
            gender: 0,
        };
        let err = api_for(&server)
            .await
            .register("tok", &query)
            .await
            .expect_err("nickname must be rejected");
        assert_eq!(err, ErrorKind::InvalidInputBody);
    }

    async fn mount_post(server: &MockServer, route: &str, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path(route))
            .and(header("idtoken", "tok"))
            .and(body_json(body))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn queue_payloads_use_wire_names() {
        let server = MockServer::start().await;
        mount_post(
            &server,
            "/queue/onqueue",
            json!({ "region": 1_275_030_675_i64, "lat": 37.5, "long": 126.75 }),
        )
        .await;
        mount_post(
            &server,
            "/queue",
            json!({
                "type": 2,
                "region": 1_275_030_675_i64,
                "long": 126.75,
                "lat": 37.5,
                "hf": ["coding", "hiking"]
            }),
        )
        .await;
        let api = api_for(&server).await;
        let coordinate = Coordinate::new(37.5, 126.75);

        let onqueue = api.onqueue("tok", &coordinate).await.expect("onqueue");
        assert!(onqueue.from_queue_db.is_empty());
        api.search_sesac(
            "tok",
            &SearchSesacQuery::new(coordinate, vec!["coding".into(), "hiking".into()]),
        )
        .await
        .expect("queue entered");
    }

    #[tokio::test]
    async fn partner_payloads_name_the_other_user() {
        let server = MockServer::start().await;
        let partner = json!({ "otheruid": "u-2" });
        for route in ["/queue/hobbyrequest", "/queue/hobbyaccept", "/queue/dodge"] {
            mount_post(&server, route, partner.clone()).await;
        }
        mount_post(
            &server,
            "/user/report",
            json!({
                "otheruid": "u-2",
                "reportedReputation": [1, 0, 0, 0, 0, 1],
                "comment": "spam"
            }),
        )
        .await;
        let api = api_for(&server).await;
        let query = SesacFriendQuery::new("u-2");

        api.sesac_friend("tok", &query).await.expect("requested");
        api.accept_sesac_friend("tok", &query).await.expect("accepted");
        api.dodge("tok", &query).await.expect("dodged");
        api.report(
            "tok",
            &ReportQuery {
                other_uid: "u-2".into(),
                reported_reputation: vec![1, 0, 0, 0, 0, 1],
                comment: "spam".into(),
            },
        )
        .await
        .expect("reported");
    }

    #[tokio::test]
    async fn account_payloads_use_wire_names() {
        let server = MockServer::start().await;
        mount_post(
            &server,
            "/user",
            json!({
                "phoneNumber": "+821012345678",
                "FCMtoken": "fcm",
                "nick": "sesac",
                "birth": "2000-01-01T00:00:00Z",
                "email": "me@example.com",
                "gender": 1
            }),
        )
        .await;
        mount_post(
            &server,
            "/user/update/mypage",
            json!({
                "searchable": 1,
                "ageMin": 20,
                "ageMax": 35,
                "gender": 0,
                "hobby": "coding"
            }),
        )
        .await;
        let api = api_for(&server).await;

        api.register(
            "tok",
            &UserRegisterQuery {
                phone_number: "+821012345678".into(),
                fcm_token: "fcm".into(),
                nick: "sesac".into(),
                birth: default_watermark(),
                email: "me@example.com".into(),
                gender: 1,
            },
        )
        .await
        .expect("registered");
        api.update_user_info(
            "tok",
            &UserUpdateQuery {
                searchable: true,
                age_min: 20,
                age_max: 35,
                gender: 0,
                hobby: "coding".into(),
            },
        )
        .await
        .expect("updated");
    }

    #[tokio::test]
    async fn send_chat_posts_text_and_decodes_the_stored_copy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/u-2"))
            .and(body_json(json!({ "chat": "hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_id": "c9",
                "to": "u-2",
                "from": "u-1",
                "chat": "hello",
                "createdAt": "2022-02-15T10:00:00.000Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let payload = api_for(&server)
            .await
            .send_chat(
                "tok",
                "u-2",
                &ChatQuery {
                    chat: "hello".into(),
                },
            )
            .await
            .expect("chat sent");
        let chat = payload.into_chat("u-1");
        assert_eq!(chat.direction, ChatDirection::Outbound);
        assert_eq!(chat.text, "hello");
    }
}
