//! Slack adapter.
//!
//! Receives events over the RTM websocket (`rtm.connect`) and sends replies
//! through the Web API (`chat.postMessage`).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use super::{EventStream, InboundEvent, Platform};
use crate::config::SlackConfig;
use crate::error::SendError;
use crate::reply::ReplyBody;

/// `rtm.connect` error codes that mean the token will never work
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
];

/// Result of a successful `rtm.connect`
struct RtmSession {
    url: String,
    bot_id: String,
}

enum ConnectFailure {
    InvalidAuth(String),
    Other(anyhow::Error),
}

#[derive(Clone)]
pub struct SlackClient {
    client: Client,
    token: String,
    api_base: String,
    reconnect_delay: Duration,
}

impl SlackClient {
    pub fn new(token: String, config: &SlackConfig) -> Self {
        Self {
            client: Client::new(),
            token,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// Start the managed RTM connection and return its event stream.
    ///
    /// The connection is re-established after `reconnect_delay` whenever the
    /// socket ends. The stream ends after an `InvalidAuth` event or once the
    /// receiver is dropped.
    pub fn connect(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel::<InboundEvent>();
        let slack = self.clone();

        tokio::spawn(async move {
            loop {
                match slack.open_session().await {
                    Ok(session) => {
                        info!("Connecting to Slack RTM as {}", session.bot_id);
                        if let Err(e) = slack.read_socket(&session, &tx).await {
                            warn!("Slack RTM socket error: {:#}", e);
                        }
                        if tx
                            .send(InboundEvent::Error {
                                message: "RTM connection closed".to_string(),
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(ConnectFailure::InvalidAuth(code)) => {
                        error!("Slack rejected the API token: {}", code);
                        let _ = tx.send(InboundEvent::InvalidAuth);
                        break;
                    }
                    Err(ConnectFailure::Other(e)) => {
                        warn!("Failed to open Slack RTM session: {:#}", e);
                        if tx
                            .send(InboundEvent::Error {
                                message: e.to_string(),
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                }

                if tx.is_closed() {
                    break;
                }
                tokio::time::sleep(slack.reconnect_delay).await;
            }
            debug!("Slack RTM task finished");
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    async fn open_session(&self) -> std::result::Result<RtmSession, ConnectFailure> {
        let resp = self
            .client
            .post(self.url("rtm.connect"))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Failed to call rtm.connect")
            .map_err(ConnectFailure::Other)?;

        let body: Value = resp
            .json()
            .await
            .context("Failed to parse rtm.connect response")
            .map_err(ConnectFailure::Other)?;

        if body["ok"].as_bool() != Some(true) {
            let code = body["error"].as_str().unwrap_or("unknown").to_string();
            if AUTH_ERRORS.contains(&code.as_str()) {
                return Err(ConnectFailure::InvalidAuth(code));
            }
            return Err(ConnectFailure::Other(anyhow::anyhow!(
                "rtm.connect failed: {}",
                code
            )));
        }

        let url = body["url"]
            .as_str()
            .context("Missing 'url' in rtm.connect response")
            .map_err(ConnectFailure::Other)?;
        let bot_id = body["self"]["id"]
            .as_str()
            .context("Missing 'self.id' in rtm.connect response")
            .map_err(ConnectFailure::Other)?;

        Ok(RtmSession {
            url: url.to_string(),
            bot_id: bot_id.to_string(),
        })
    }

    /// Forward socket frames as events until the socket ends.
    async fn read_socket(
        &self,
        session: &RtmSession,
        tx: &mpsc::UnboundedSender<InboundEvent>,
    ) -> Result<()> {
        let (mut ws, _) = tokio_tungstenite::connect_async(session.url.as_str())
            .await
            .context("Failed to connect to Slack RTM websocket")?;

        while let Some(frame) = ws.next().await {
            let frame = frame.context("Failed to read RTM frame")?;
            if frame.is_close() {
                break;
            }
            let text = match frame.to_text() {
                Ok(t) if !t.is_empty() => t,
                _ => continue,
            };
            let payload: Value = match serde_json::from_str(text) {
                Ok(v) => v,
                Err(e) => {
                    debug!("Skipping unparseable RTM frame: {}", e);
                    continue;
                }
            };

            if payload["type"].as_str() == Some("goodbye") {
                info!("Slack asked the RTM client to reconnect");
                break;
            }

            if let Some(event) = parse_rtm_event(&payload, &session.bot_id) {
                if tx.send(event).is_err() {
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Map one RTM frame to an event. Acknowledgements of our own sends and
/// frames without a type produce `None`.
pub fn parse_rtm_event(payload: &Value, bot_id: &str) -> Option<InboundEvent> {
    if payload.get("reply_to").is_some() {
        return None;
    }
    let kind = payload["type"].as_str()?;
    let text_of = |v: &Value| v.as_str().unwrap_or_default().to_string();

    let event = match kind {
        "hello" => InboundEvent::Connected {
            bot_id: bot_id.to_string(),
        },
        "message" => {
            if let Some(subtype) = payload["subtype"].as_str() {
                InboundEvent::Other {
                    kind: format!("message.{}", subtype),
                }
            } else if payload.get("bot_id").is_some() {
                InboundEvent::Other {
                    kind: "message.bot_message".to_string(),
                }
            } else {
                InboundEvent::Message {
                    channel: text_of(&payload["channel"]),
                    user: text_of(&payload["user"]),
                    text: text_of(&payload["text"]),
                }
            }
        }
        "team_join" => InboundEvent::TeamJoined {
            user_id: text_of(&payload["user"]["id"]),
        },
        "reaction_removed" => InboundEvent::ReactionRemoved {
            user_id: text_of(&payload["user"]),
            reaction: text_of(&payload["reaction"]),
        },
        "error" => InboundEvent::Error {
            message: text_of(&payload["error"]["msg"]),
        },
        other => InboundEvent::Other {
            kind: other.to_string(),
        },
    };
    Some(event)
}

/// Build the `chat.postMessage` payload for a reply.
pub fn message_payload(channel: &str, title: &str, body: &ReplyBody, as_bot: bool) -> Value {
    let fields: Vec<Value> = body
        .fields
        .iter()
        .map(|f| json!({ "title": f.title, "value": f.value, "short": false }))
        .collect();

    let mut attachment = json!({ "fields": fields });
    if let Some(pretext) = &body.pretext {
        attachment["pretext"] = json!(pretext);
    }
    if let Some(color) = &body.color {
        attachment["color"] = json!(color);
    }

    json!({
        "channel": channel,
        "text": title,
        "as_user": as_bot,
        "attachments": [attachment],
    })
}

#[async_trait]
impl Platform for SlackClient {
    async fn channel_name(&self, channel_id: &str) -> Result<String> {
        let resp = self
            .client
            .get(self.url("conversations.info"))
            .bearer_auth(&self.token)
            .query(&[("channel", channel_id)])
            .send()
            .await
            .context("Failed to call conversations.info")?;

        let body: Value = resp
            .json()
            .await
            .context("Failed to parse conversations.info response")?;
        if body["ok"].as_bool() != Some(true) {
            let code = body["error"].as_str().unwrap_or("unknown");
            anyhow::bail!("conversations.info failed: {}", code);
        }

        body["channel"]["name"]
            .as_str()
            .map(|s| s.to_string())
            .context("Missing 'channel.name' in conversations.info response")
    }

    async fn post_message(
        &self,
        channel: &str,
        title: &str,
        body: &ReplyBody,
        as_bot: bool,
    ) -> std::result::Result<(), SendError> {
        let payload = message_payload(channel, title, body, as_bot);

        let resp = self
            .client
            .post(self.url("chat.postMessage"))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        let result: Value = resp.json().await?;
        if result["ok"].as_bool() != Some(true) {
            let code = result["error"].as_str().unwrap_or("unknown");
            return Err(SendError::Rejected(code.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::Field;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SlackClient {
        let config = SlackConfig {
            api_base: server.uri(),
            reconnect_delay_ms: 10,
        };
        SlackClient::new("xoxb-test".to_string(), &config)
    }

    #[tokio::test]
    async fn test_post_message_sends_as_bot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header("Authorization", "Bearer xoxb-test"))
            .and(body_partial_json(json!({
                "channel": "general",
                "text": "Shopping list",
                "as_user": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .post_message("general", "Shopping list", &ReplyBody::default(), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_message_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "channel_not_found"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .post_message("nowhere", "Shopping list", &ReplyBody::default(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Rejected(ref code) if code == "channel_not_found"));
    }

    #[tokio::test]
    async fn test_post_message_garbage_response_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .post_message("general", "t", &ReplyBody::default(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
    }

    #[tokio::test]
    async fn test_channel_name_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.info"))
            .and(query_param("channel", "C1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "channel": {"id": "C1", "name": "general"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let name = client_for(&server).channel_name("C1").await.unwrap();
        assert_eq!(name, "general");
    }

    #[tokio::test]
    async fn test_channel_name_lookup_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.info"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "channel_not_found"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).channel_name("C404").await.unwrap_err();
        assert!(err.to_string().contains("channel_not_found"), "{}", err);
    }

    #[tokio::test]
    async fn test_rtm_connect_reads_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rtm.connect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "url": "wss://example.invalid/websocket",
                "self": {"id": "U123", "name": "shopbot"}
            })))
            .mount(&server)
            .await;

        match client_for(&server).open_session().await {
            Ok(session) => {
                assert_eq!(session.bot_id, "U123");
                assert_eq!(session.url, "wss://example.invalid/websocket");
            }
            Err(_) => panic!("expected an RTM session"),
        }
    }

    #[tokio::test]
    async fn test_rtm_connect_invalid_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rtm.connect"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "invalid_auth"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.open_session().await,
            Err(ConnectFailure::InvalidAuth(ref code)) if code == "invalid_auth"
        ));

        // The managed stream reports it once and then ends
        let mut events = client.connect();
        assert_eq!(events.next().await, Some(InboundEvent::InvalidAuth));
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn test_rtm_connect_other_failure_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rtm.connect"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "ratelimited"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.open_session().await,
            Err(ConnectFailure::Other(_))
        ));

        let mut events = client.connect();
        match events.next().await {
            Some(InboundEvent::Error { message }) => assert!(message.contains("ratelimited")),
            other => panic!("expected an error event, got {:?}", other),
        }
    }

    #[test]
    fn test_hello_carries_bot_identity() {
        let event = parse_rtm_event(&json!({"type": "hello"}), "U123");
        assert_eq!(
            event,
            Some(InboundEvent::Connected {
                bot_id: "U123".to_string()
            })
        );
    }

    #[test]
    fn test_plain_message() {
        let payload = json!({
            "type": "message",
            "channel": "C1",
            "user": "U9",
            "text": "<@U123> list",
            "ts": "1355517523.000005"
        });
        assert_eq!(
            parse_rtm_event(&payload, "U123"),
            Some(InboundEvent::Message {
                channel: "C1".to_string(),
                user: "U9".to_string(),
                text: "<@U123> list".to_string(),
            })
        );
    }

    #[test]
    fn test_message_subtypes_are_not_messages() {
        let edited = json!({"type": "message", "subtype": "message_changed", "channel": "C1"});
        assert_eq!(
            parse_rtm_event(&edited, "U1"),
            Some(InboundEvent::Other {
                kind: "message.message_changed".to_string()
            })
        );

        let from_bot = json!({"type": "message", "bot_id": "B1", "channel": "C1", "text": "hi"});
        assert_eq!(
            parse_rtm_event(&from_bot, "U1").map(|e| e.kind().to_string()),
            Some("message.bot_message".to_string())
        );
    }

    #[test]
    fn test_other_event_kinds() {
        assert_eq!(
            parse_rtm_event(&json!({"type": "team_join", "user": {"id": "U7"}}), "U1"),
            Some(InboundEvent::TeamJoined {
                user_id: "U7".to_string()
            })
        );
        assert_eq!(
            parse_rtm_event(
                &json!({"type": "reaction_removed", "user": "U7", "reaction": "thumbsup"}),
                "U1"
            ),
            Some(InboundEvent::ReactionRemoved {
                user_id: "U7".to_string(),
                reaction: "thumbsup".to_string(),
            })
        );
        assert_eq!(
            parse_rtm_event(
                &json!({"type": "error", "error": {"code": 1, "msg": "Socket URL has expired"}}),
                "U1"
            ),
            Some(InboundEvent::Error {
                message: "Socket URL has expired".to_string()
            })
        );
        assert_eq!(
            parse_rtm_event(&json!({"type": "presence_change"}), "U1"),
            Some(InboundEvent::Other {
                kind: "presence_change".to_string()
            })
        );
    }

    #[test]
    fn test_acks_and_untyped_frames_are_ignored() {
        assert_eq!(
            parse_rtm_event(&json!({"ok": true, "reply_to": 1, "ts": "1"}), "U1"),
            None
        );
        assert_eq!(parse_rtm_event(&json!({"foo": "bar"}), "U1"), None);
    }

    #[test]
    fn test_message_payload_shape() {
        let body = ReplyBody {
            pretext: Some("Bot Command List".to_string()),
            color: Some("#B733FF".to_string()),
            fields: vec![Field::new("<bot> help", "See the available bot commands.")],
        };
        let payload = message_payload("general", "Fortune & Karam with Luck", &body, true);

        assert_eq!(payload["channel"], "general");
        assert_eq!(payload["text"], "Fortune & Karam with Luck");
        assert_eq!(payload["as_user"], true);
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["pretext"], "Bot Command List");
        assert_eq!(attachment["color"], "#B733FF");
        assert_eq!(attachment["fields"][0]["title"], "<bot> help");
        assert_eq!(attachment["fields"][0]["short"], false);
    }

    #[test]
    fn test_message_payload_omits_missing_parts() {
        let payload =
            message_payload("general", "Invalid command", &ReplyBody::default(), true);
        let attachment = &payload["attachments"][0];
        assert!(attachment.get("pretext").is_none());
        assert!(attachment.get("color").is_none());
        assert_eq!(attachment["fields"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_api_base_trailing_slash() {
        let config = SlackConfig {
            api_base: "http://localhost:9999/api/".to_string(),
            reconnect_delay_ms: 10,
        };
        let client = SlackClient::new("xoxb-test".to_string(), &config);
        assert_eq!(
            client.url("chat.postMessage"),
            "http://localhost:9999/api/chat.postMessage"
        );
    }
}
