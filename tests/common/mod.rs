//! Shared fixtures for the integration tests: a hub on the in-process
//! transport, identified clients, and a tiny rule set whose moves say
//! what should happen to them.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use matchroom::engine::{GoFishRules, Verdict};
use matchroom::identity::StaticDirectory;
use matchroom::transport::LocalClient;
use matchroom::{
    ActionPayload, ClientMessage, Config, EngineRegistry, GameHub, GameKind, GameResult, LocalChannel, Role,
    RoomId, Rules, ServerMessage, UserId,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Rule set for driving sessions: every move is legal unless it says
/// otherwise, and a `finish` move wins for whoever plays it.
#[derive(Debug, Default)]
pub struct Tally;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TallyState {
    pub moves: Vec<Role>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TallyMove {
    #[serde(default)]
    pub illegal: bool,
    #[serde(default)]
    pub extra: bool,
    #[serde(default)]
    pub finish: bool,
}

impl Rules for Tally {
    type State = TallyState;
    type Action = TallyMove;

    const KIND: GameKind = GameKind::Board;

    fn initial_state(&self) -> TallyState {
        TallyState::default()
    }

    fn apply(&self, state: &TallyState, actor: Role, action: TallyMove) -> Verdict<TallyState> {
        if action.illegal {
            return Verdict::illegal("move marked illegal");
        }
        let mut next = state.clone();
        next.moves.push(actor);
        Verdict::Legal {
            state: next,
            extra_turn: action.extra,
            terminal: action.finish.then(|| GameResult::win(actor, "finishing move")),
        }
    }
}

pub fn tally(illegal: bool, extra: bool, finish: bool) -> ActionPayload {
    ActionPayload::from_typed(&TallyMove { illegal, extra, finish }).expect("tally move serializes")
}

pub fn plain_move() -> ActionPayload {
    tally(false, false, false)
}

/// Hub plus its background tasks; aborted on drop
pub struct TestServer {
    pub hub: Arc<GameHub>,
    pub channel: Arc<LocalChannel>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestServer {
    pub fn start() -> Self {
        Self::start_with(Config::testing_defaults())
    }

    pub fn start_with(config: Config) -> Self {
        let mut engines = EngineRegistry::new();
        engines.register(Arc::new(Tally));
        engines.register(Arc::new(GoFishRules::with_seed(42)));
        Self::start_with_engines(config, engines)
    }

    pub fn start_with_engines(config: Config, engines: EngineRegistry) -> Self {
        let (channel, inbound) = LocalChannel::new(1024);
        let directory = StaticDirectory::new();
        for user in ["alice", "bob", "carol", "dave"] {
            directory.insert_plain(&UserId::from(user));
        }

        let hub = Arc::new(GameHub::new(&config, engines, channel.clone(), Arc::new(directory)));
        let mut tasks = hub.start();
        tasks.push(tokio::spawn(hub.clone().run(inbound)));

        Self { hub, channel, tasks }
    }

    /// Connect and say hello as `user`
    pub async fn client(&self, user: &str) -> TestClient {
        let mut client = TestClient {
            user: UserId::from(user),
            conn: self.channel.connect(),
        };
        client
            .send(ClientMessage::Hello {
                user_id: client.user.clone(),
            })
            .await;
        client
            .expect(|m| matches!(m, ServerMessage::Welcome { .. }).then_some(()))
            .await;
        client
    }

    /// `a` challenges `b`, `b` accepts; returns the new room
    pub async fn start_match(&self, a: &mut TestClient, b: &mut TestClient, kind: GameKind) -> RoomId {
        a.send(ClientMessage::Challenge {
            to: b.user.clone(),
            kind,
        })
        .await;
        let challenge_id = b
            .expect(|m| match m {
                ServerMessage::ChallengeReceived { challenge_id, .. } => Some(*challenge_id),
                _ => None,
            })
            .await;
        b.send(ClientMessage::AcceptChallenge { challenge_id }).await;

        let room_id = a.accepted().await;
        assert_eq!(b.accepted().await, room_id);
        room_id
    }

    /// Start a match and join both players; catch-ups are consumed
    pub async fn seated_match(&self, a: &mut TestClient, b: &mut TestClient) -> RoomId {
        let room_id = self.start_match(a, b, GameKind::Board).await;
        a.join(room_id).await;
        b.join(room_id).await;
        room_id
    }

    pub async fn disconnect(&self, client: &TestClient) {
        self.channel
            .disconnect(client.id())
            .await
            .expect("disconnect reaches the hub");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct TestClient {
    pub user: UserId,
    pub conn: LocalClient,
}

impl TestClient {
    pub fn id(&self) -> matchroom::ConnectionId {
        self.conn.id()
    }

    pub async fn send(&self, message: ClientMessage) {
        self.conn.send(message).await.expect("hub is running");
    }

    pub async fn recv(&mut self) -> ServerMessage {
        timeout(RECV_TIMEOUT, self.conn.recv())
            .await
            .unwrap_or_else(|_| panic!("{} heard nothing", self.user))
            .expect("connection open")
    }

    /// Skip messages until `pick` accepts one
    pub async fn expect<T>(&mut self, mut pick: impl FnMut(&ServerMessage) -> Option<T>) -> T {
        loop {
            let message = self.recv().await;
            if let Some(found) = pick(&message) {
                return found;
            }
        }
    }

    pub async fn accepted(&mut self) -> RoomId {
        self.expect(|m| match m {
            ServerMessage::ChallengeAccepted { room_id, .. } => Some(*room_id),
            _ => None,
        })
        .await
    }

    /// Join and return the catch-up payload
    pub async fn join(&mut self, room_id: RoomId) -> (matchroom::SessionSnapshot, Option<Role>) {
        self.send(ClientMessage::Join { room_id }).await;
        self.catch_up().await
    }

    pub async fn catch_up(&mut self) -> (matchroom::SessionSnapshot, Option<Role>) {
        self.expect(|m| match m {
            ServerMessage::CatchUp { snapshot, your_role } => Some((snapshot.clone(), *your_role)),
            _ => None,
        })
        .await
    }

    pub async fn submit(&self, room_id: RoomId, action: ActionPayload) {
        self.send(ClientMessage::Submit { room_id, action }).await;
    }

    /// Next `ActionApplied` as (turn owner, version)
    pub async fn applied(&mut self) -> (Option<Role>, u64) {
        self.expect(|m| match m {
            ServerMessage::ActionApplied {
                turn_owner, version, ..
            } => Some((*turn_owner, *version)),
            _ => None,
        })
        .await
    }

    pub async fn rejected(&mut self) -> (matchroom::ErrorKind, Option<u64>) {
        self.expect(|m| match m {
            ServerMessage::Rejected { kind, version, .. } => Some((*kind, *version)),
            _ => None,
        })
        .await
    }

    pub async fn ended(&mut self) -> (matchroom::TerminationReason, Option<GameResult>) {
        self.expect(|m| match m {
            ServerMessage::SessionEnded { reason, result, .. } => Some((*reason, result.clone())),
            _ => None,
        })
        .await
    }

    /// Everything already delivered
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        self.conn.drain()
    }
}
