//! The dispatch pipeline: ingest loop, router worker and publisher worker,
//! joined by two unbounded single-producer single-consumer queues.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::command::{classify, BotIdentity, Command};
use crate::config::PublisherConfig;
use crate::error::PublishError;
use crate::platform::{EventStream, InboundEvent, Platform};
use crate::reply::Reply;
use crate::router::Router;

/// Why the ingest loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestExit {
    InvalidAuth,
    StreamEnded,
    RouterStopped,
}

/// State carried across iterations of the ingest loop
#[derive(Debug, Default)]
struct IngestState {
    identity: BotIdentity,
}

/// Read platform events and forward bot-addressed commands to the router.
pub async fn run_ingest(
    mut events: EventStream,
    commands: mpsc::UnboundedSender<Command>,
) -> IngestExit {
    let mut state = IngestState::default();

    while let Some(event) = events.next().await {
        match &event {
            InboundEvent::Connected { bot_id } => {
                info!("Connected as {}", bot_id);
                state.identity = BotIdentity::Known(bot_id.clone());
            }
            InboundEvent::TeamJoined { user_id } => info!("Team join event: {}", user_id),
            InboundEvent::ReactionRemoved { user_id, reaction } => {
                debug!("Reaction {} removed by {}", reaction, user_id)
            }
            InboundEvent::Error { message } => warn!("Platform error: {}", message),
            InboundEvent::InvalidAuth => {
                error!("Invalid credentials, stopping event loop");
                return IngestExit::InvalidAuth;
            }
            InboundEvent::Message { .. } | InboundEvent::Other { .. } => {}
        }

        if let Some(cmd) = classify(&event, &state.identity) {
            if commands.send(cmd).is_err() {
                warn!("Router queue closed, stopping event loop");
                return IngestExit::RouterStopped;
            }
        }
    }

    info!("Platform event stream ended");
    IngestExit::StreamEnded
}

/// Route queued commands in arrival order, forwarding any replies.
pub async fn run_router(
    router: Router,
    mut commands: mpsc::UnboundedReceiver<Command>,
    replies: mpsc::UnboundedSender<Reply>,
) {
    while let Some(cmd) = commands.recv().await {
        if let Some(reply) = router.route(cmd).await {
            if replies.send(reply).is_err() {
                warn!("Publisher queue closed, stopping router");
                break;
            }
        }
    }
    debug!("Router finished");
}

/// Posts replies to the platform as the bot user.
pub struct Publisher {
    platform: Arc<dyn Platform>,
    max_attempts: u32,
    backoff: Duration,
}

impl Publisher {
    pub fn new(platform: Arc<dyn Platform>, config: &PublisherConfig) -> Self {
        Self {
            platform,
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }

    /// Resolve the target channel and post the reply once.
    pub async fn publish(&self, reply: &Reply) -> std::result::Result<(), PublishError> {
        let channel_name = self
            .platform
            .channel_name(&reply.channel)
            .await
            .map_err(|e| PublishError::Lookup {
                channel: reply.channel.clone(),
                reason: format!("{:#}", e),
            })?;

        self.platform
            .post_message(&channel_name, &reply.title, &reply.body, true)
            .await
            .map_err(|source| PublishError::Send {
                channel: channel_name,
                attempts: 1,
                source,
            })
    }

    /// Publish with doubling backoff between attempts.
    pub async fn publish_with_retry(
        &self,
        reply: &Reply,
    ) -> std::result::Result<(), PublishError> {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match self.publish(reply).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(match e {
                        PublishError::Send {
                            channel, source, ..
                        } => PublishError::Send {
                            channel,
                            attempts: attempt,
                            source,
                        },
                        other => other,
                    });
                }
                Err(e) => {
                    warn!(
                        "Publish attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_backoff(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Double a retry delay, saturating instead of overflowing.
fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}

/// Post queued replies in arrival order. Returns the first unrecoverable error.
pub async fn run_publisher(
    publisher: Publisher,
    mut replies: mpsc::UnboundedReceiver<Reply>,
) -> std::result::Result<(), PublishError> {
    while let Some(reply) = replies.recv().await {
        if reply.skip {
            debug!("Skipping informational reply for {}", reply.channel);
            continue;
        }
        publisher.publish_with_retry(&reply).await?;
    }
    debug!("Publisher finished");
    Ok(())
}

/// Run the three workers until the event stream stops and all queued replies
/// are posted, or until publishing fails.
pub async fn run(events: EventStream, router: Router, publisher: Publisher) -> Result<IngestExit> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();

    let ingest = tokio::spawn(run_ingest(events, command_tx));
    let routing = tokio::spawn(run_router(router, command_rx, reply_tx));
    let publishing = tokio::spawn(run_publisher(publisher, reply_rx));

    // The publisher ends last unless it fails.
    let published = publishing.await.context("Publisher task panicked")?;
    if let Err(e) = published {
        ingest.abort();
        routing.abort();
        return Err(e).context("Reply publisher failed");
    }

    let exit = ingest.await.context("Ingest task panicked")?;
    routing.await.context("Router task panicked")?;
    Ok(exit)
}
