//! Realtime channel to the game server.
//!
//! One [`Connection`] is one session: connect, bootstrap our remembered votes,
//! then forward every pushed snapshot until something goes wrong. The first
//! failure of any kind ends the session and is handed to the
//! [`FatalTransportHandler`]. There is no reconnect.

use crate::game::{
    CardIndex,
    Game,
    OpenedResponse,
    RoundId,
};
use futures::{
    Stream,
    StreamExt,
};
use reqwest::{
    Response,
    header::ACCEPT,
};
use std::{
    collections::BTreeMap,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        Message,
    },
};
use tracing::{
    debug,
    info,
    warn,
};
use url::Url;

const LOG_TARGET: &str = "planning_poker::channel";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("could not open channel to {url}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("channel handshake with {url} timed out")]
    HandshakeTimeout { url: String },
    #[error("channel transport failed")]
    Transport(#[source] tungstenite::Error),
    #[error("channel closed by server")]
    Closed,
    #[error("estimate bootstrap request failed")]
    Bootstrap(#[source] reqwest::Error),
    #[error("game fetch failed")]
    Fetch(#[source] reqwest::Error),
    #[error("snapshot is not a game")]
    MalformedSnapshot(#[source] serde_json::Error),
}

#[derive(Debug)]
pub enum ChannelEvent {
    /// Votes the server remembers for us, keyed by round.
    Opened(BTreeMap<RoundId, CardIndex>),
    Snapshot(Game),
    /// The session is over; `fallback_url` is where a full reload reads from.
    Fatal {
        error: ChannelError,
        fallback_url: Url,
    },
}

/// Called once per session, with the error that ended it.
pub trait FatalTransportHandler: Send + 'static {
    fn on_fatal_transport_error(self: Box<Self>, error: ChannelError);
}

/// Hands the failure to the session loop, which reloads the game in full.
pub struct Resynchronize {
    events: mpsc::UnboundedSender<ChannelEvent>,
    fallback_url: Url,
}

impl Resynchronize {
    pub fn new(events: mpsc::UnboundedSender<ChannelEvent>, fallback_url: Url) -> Self {
        Self {
            events,
            fallback_url,
        }
    }
}

impl FatalTransportHandler for Resynchronize {
    fn on_fatal_transport_error(self: Box<Self>, error: ChannelError) {
        let _ = self.events.send(ChannelEvent::Fatal {
            error,
            fallback_url: self.fallback_url,
        });
    }
}

#[derive(Clone, Debug)]
pub struct ChannelClient {
    channel_url: Url,
    game_url: Url,
    game_path: String,
    http: reqwest::Client,
    handshake_timeout: Duration,
}

/// A running session. Dropping it stops the session without calling the
/// fatal handler.
#[derive(Debug)]
pub struct Connection {
    task: JoinHandle<()>,
}

impl Connection {
    pub fn close(self) {
        self.task.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ChannelClient {
    /// `http` carries its own request timeout; `handshake_timeout` bounds the
    /// WebSocket upgrade.
    pub fn new(
        channel_url: Url,
        game_url: Url,
        http: reqwest::Client,
        handshake_timeout: Duration,
    ) -> Self {
        let game_path = game_url.path().trim_end_matches('/').to_string();
        Self {
            channel_url,
            game_url,
            game_path,
            http,
            handshake_timeout,
        }
    }

    /// Open a session whose failure triggers a full reload through `events`.
    pub fn connect(
        &self,
        token: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Connection {
        let handler = Resynchronize::new(events.clone(), self.game_url.clone());
        self.connect_with(token, events, Box::new(handler))
    }

    pub fn connect_with(
        &self,
        token: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
        handler: Box<dyn FatalTransportHandler>,
    ) -> Connection {
        let mut url = self.channel_url.clone();
        url.query_pairs_mut().append_pair("token", token);
        let client = self.clone();
        let task = tokio::spawn(async move {
            let outcome = client.run(url, &events).await;
            finish(outcome, handler);
        });
        Connection { task }
    }

    async fn run(
        &self,
        url: Url,
        events: &mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<(), ChannelError> {
        let handshake = tokio::time::timeout(self.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ChannelError::HandshakeTimeout {
                url: self.channel_url.to_string(),
            })?;
        let (stream, _) = handshake.map_err(|source| ChannelError::Connect {
            url: self.channel_url.to_string(),
            source,
        })?;
        info!(target: LOG_TARGET, url = %self.channel_url, "channel open");

        let seed = self.bootstrap().await?;
        debug!(target: LOG_TARGET, rounds = seed.len(), "estimates bootstrapped");
        if events.send(ChannelEvent::Opened(seed)).is_err() {
            return Ok(());
        }
        pump(stream, events, &self.game_path).await
    }

    async fn bootstrap(&self) -> Result<BTreeMap<RoundId, CardIndex>, ChannelError> {
        let url = format!("{}/opened", self.game_url.as_str().trim_end_matches('/'));
        let opened: OpenedResponse = self
            .http
            .post(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(ChannelError::Bootstrap)?
            .json()
            .await
            .map_err(ChannelError::Bootstrap)?;
        Ok(opened.estimates)
    }

    /// Plain full load of the game, used once the channel is gone.
    pub async fn fetch_game(&self, url: &Url) -> Result<Game, ChannelError> {
        let body = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(ChannelError::Fetch)?
            .text()
            .await
            .map_err(ChannelError::Fetch)?;
        decode(&body, &self.game_path)
    }
}

fn decode(payload: &str, game_path: &str) -> Result<Game, ChannelError> {
    let mut game = Game::from_json(payload).map_err(ChannelError::MalformedSnapshot)?;
    if game.url.is_none() {
        game.url = Some(game_path.to_string());
    }
    Ok(game)
}

fn finish(outcome: Result<(), ChannelError>, handler: Box<dyn FatalTransportHandler>) {
    match outcome {
        Ok(()) => debug!(target: LOG_TARGET, "session dropped by receiver"),
        Err(error) => {
            warn!(target: LOG_TARGET, error = %error, "channel session ended");
            handler.on_fatal_transport_error(error);
        }
    }
}

/// Forward snapshots until the stream fails. Returns `Ok` only when nobody
/// listens anymore; frames after a failure are never read.
async fn pump<S>(
    mut source: S,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    game_path: &str,
) -> Result<(), ChannelError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                let game = decode(&text, game_path)?;
                debug!(
                    target: LOG_TARGET,
                    stories = game.stories.len(),
                    participants = game.participants.len(),
                    "snapshot received"
                );
                if events.send(ChannelEvent::Snapshot(game)).is_err() {
                    return Ok(());
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(target: LOG_TARGET, ?frame, "socket closed by server");
                return Err(ChannelError::Closed);
            }
            // pings are answered by the transport itself
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(ChannelError::Transport(err)),
            None => return Err(ChannelError::Closed),
        }
    }
}
