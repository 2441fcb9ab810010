//! Server network layer handling WebSocket sessions and the background loops

use crate::auth::TokenAuthority;
use crate::client_manager::Client;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::state::AppState;
use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};
use shared::{decode_vote, PackedWord, ServerMessage, UserId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

/// Path clients connect to.
pub const WS_PATH: &str = "/ws";
/// Response header carrying a freshly issued identity token.
pub const IDENTITY_HEADER: &str = "x-identity-token";

fn error_response(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

fn token_from_query(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|token| !token.is_empty())
}

/// Decides who a handshake request belongs to
///
/// A valid `token` query parameter is admitted as its user, an invalid one
/// is refused with 401, and a request without one gets a new identity whose
/// token is returned in the [`IDENTITY_HEADER`] response header.
fn admit(
    auth: &TokenAuthority,
    request: &Request,
    mut response: Response,
) -> std::result::Result<(Response, UserId), ErrorResponse> {
    if request.uri().path() != WS_PATH {
        return Err(error_response(StatusCode::NOT_FOUND, "not found"));
    }

    match token_from_query(request.uri().query()) {
        Some(token) => match auth.validate(token) {
            Some(user) => Ok((response, user)),
            None => Err(error_response(
                StatusCode::UNAUTHORIZED,
                "invalid identity token",
            )),
        },
        None => {
            let (token, user) = auth.issue();
            let value = HeaderValue::from_str(&token).map_err(|_| {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "identity unavailable")
            })?;
            response.headers_mut().insert(IDENTITY_HEADER, value);
            Ok((response, user))
        }
    }
}

/// Main server accepting connections and driving the game
pub struct Server {
    listener: TcpListener,
    app: Arc<AppState>,
}

impl Server {
    /// Loads everything the configuration names and binds the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let app = Arc::new(AppState::from_config(config)?);
        Self::with_state(app).await
    }

    pub async fn with_state(app: Arc<AppState>) -> Result<Self> {
        let listener = TcpListener::bind(app.config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Self { listener, app })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.app)
    }

    /// Spawns task that periodically removes dead connections
    fn spawn_cleanup_sweep(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let app = Arc::clone(&self.app);

        tokio::spawn(async move {
            let mut ticker = interval(app.config.cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = app.clients.sweep().await;
                        if !removed.is_empty() {
                            debug!("Cleanup removed users {:?}", removed);
                        }
                    }
                }
            }
        })
    }

    /// Main server loop: accepts connections until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let scheduler = tokio::spawn(Scheduler::new(Arc::clone(&self.app)).run(shutdown.clone()));
        let sweeper = self.spawn_cleanup_sweep(shutdown.clone());

        info!("Server started successfully");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let app = Arc::clone(&self.app);
                        tokio::spawn(handle_connection(app, stream, addr));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        for task in [scheduler, sweeper] {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }
        Ok(())
    }
}

/// Runs one client session from handshake to teardown
async fn handle_connection(app: Arc<AppState>, stream: TcpStream, addr: SocketAddr) {
    let mut admitted = None;
    let handshake = accept_hdr_async(stream, |request: &Request, response: Response| {
        let (response, user) = admit(&app.auth, request, response)?;
        admitted = Some(user);
        Ok(response)
    })
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Rejected connection from {}: {}", addr, e);
            return;
        }
    };
    let Some(user) = admitted else {
        return;
    };

    let (sink, incoming) = ws.split();
    let snapshot_app = Arc::clone(&app);
    let (client, greeted) = app
        .clients
        .join(user, Box::pin(sink), move || async move {
            snapshot_app.initial_state_for(user).await.encode()
        })
        .await;
    debug!(
        "User {} joined from {} as connection {}",
        user, addr, client.connection_id
    );

    if greeted {
        pump_messages(&app, &client, incoming).await;
    }

    app.clients.disconnect(&client);
    client.close().await;
}

/// Reads vote frames from one client until it leaves or misbehaves
///
/// Each 4-byte binary frame is a vote whose result goes back to the sender
/// only. Any other frame ends the session.
pub async fn pump_messages<S>(app: &Arc<AppState>, client: &Client, mut incoming: S)
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = incoming.next().await {
        if !client.is_open() {
            break;
        }

        let frame = match message {
            Ok(Message::Binary(frame)) => frame,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!("User {} closed the connection", client.user_id);
                break;
            }
            Ok(other) => {
                debug!(
                    "Dropping user {} after unexpected {} byte frame",
                    client.user_id,
                    other.len()
                );
                break;
            }
            Err(e) => {
                debug!("Read from user {} failed: {}", client.user_id, e);
                break;
            }
        };

        let word = match decode_vote(&frame) {
            Ok(raw) => PackedWord::from_raw(raw),
            Err(e) => {
                debug!("Dropping user {}: {}", client.user_id, e);
                break;
            }
        };

        let outcome = app.votes.vote(&app.engine, client.user_id, word).await;
        if outcome.first_vote_of_round {
            let app = Arc::clone(app);
            tokio::spawn(async move {
                let frame = app.voting_started_at(Instant::now()).await.encode();
                app.clients.broadcast(&frame).await;
            });
        }

        if !client
            .send(ServerMessage::Response(outcome.result).encode())
            .await
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::DiscardRecords;
    use crate::testing::{channel_sink, drain_messages, FixedWords};
    use futures_util::stream;
    use shared::{encode_vote, GameState, VoteResult};

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).unwrap()
    }

    fn app() -> Arc<AppState> {
        Arc::new(AppState::new(
            ServerConfig::default(),
            Arc::new(FixedWords::new("apple", &["apply", "crane"])),
            Arc::new(DiscardRecords),
        ))
    }

    fn vote_frame(word: &str) -> std::result::Result<Message, tungstenite::Error> {
        Ok(Message::Binary(encode_vote(PackedWord::pack(word)).to_vec()))
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(token_from_query(Some("token=1.ab")), Some("1.ab"));
        assert_eq!(token_from_query(Some("x=1&token=2.cd")), Some("2.cd"));
        assert_eq!(token_from_query(Some("token=")), None);
        assert_eq!(token_from_query(Some("other=1")), None);
        assert_eq!(token_from_query(None), None);
    }

    #[test]
    fn test_admit_without_token_issues_identity() {
        let auth = TokenAuthority::new(None);
        let (response, user) = admit(&auth, &request("/ws"), Response::new(())).unwrap();

        let token = response.headers()[IDENTITY_HEADER].to_str().unwrap();
        assert_eq!(auth.validate(token), Some(user));
    }

    #[test]
    fn test_admit_with_valid_token() {
        let auth = TokenAuthority::new(None);
        let (token, user) = auth.issue();

        let uri = format!("/ws?token={}", token);
        let (response, admitted) = admit(&auth, &request(&uri), Response::new(())).unwrap();
        assert_eq!(admitted, user);
        assert!(response.headers().get(IDENTITY_HEADER).is_none());
    }

    #[test]
    fn test_admit_rejects_bad_token_and_path() {
        let auth = TokenAuthority::new(None);

        let rejected = admit(&auth, &request("/ws?token=1.00"), Response::new(())).unwrap_err();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let rejected = admit(&auth, &request("/other"), Response::new(())).unwrap_err();
        assert_eq!(rejected.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pump_acknowledges_votes() {
        let app = app();
        let (sink, mut rx) = channel_sink();
        let client = app.clients.connect(1, sink);

        let incoming = stream::iter(vec![
            vote_frame("zzzzz"),
            Ok(Message::Ping(vec![1])),
            vote_frame("crane"),
            vote_frame("apply"),
        ]);
        pump_messages(&app, &client, incoming).await;

        // let the spawned VotingStarted broadcast run
        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages = drain_messages(&mut rx);
        let responses: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Response(result) => Some(*result),
                _ => None,
            })
            .collect();
        assert_eq!(
            responses,
            vec![
                VoteResult::InvalidVote,
                VoteResult::Success,
                VoteResult::AlreadyVoted
            ]
        );
        assert!(messages.contains(&ServerMessage::VotingStarted {
            round: 0,
            time_remaining: 9,
        }) || messages.contains(&ServerMessage::VotingStarted {
            round: 0,
            time_remaining: 10,
        }));
        assert_eq!(app.engine.game_state().await, GameState::VotingInProgress);
    }

    #[tokio::test]
    async fn test_pump_stops_on_malformed_frames() {
        for bad in [
            Ok(Message::Text("crane".into())),
            Ok(Message::Binary(vec![0, 1, 2])),
            Ok(Message::Binary(vec![0; 5])),
            Ok(Message::Close(None)),
            Err(tungstenite::Error::ConnectionClosed),
        ] {
            let app = app();
            let (sink, mut rx) = channel_sink();
            let client = app.clients.connect(1, sink);

            let incoming = stream::iter(vec![bad, vote_frame("crane")]);
            pump_messages(&app, &client, incoming).await;

            // the vote after the bad frame is never read
            assert!(drain_messages(&mut rx).is_empty());
            assert_eq!(app.votes.total_votes(), 0);
        }
    }

    #[tokio::test]
    async fn test_superseded_connection_stops_pumping() {
        let app = app();
        let (old_sink, _old_rx) = channel_sink();
        let (new_sink, _new_rx) = channel_sink();
        let old = app.clients.connect(1, old_sink);
        app.clients.connect(1, new_sink);

        pump_messages(&app, &old, stream::iter(vec![vote_frame("crane")])).await;
        assert_eq!(app.votes.total_votes(), 0);
    }
}
