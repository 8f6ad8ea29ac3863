//! Command implementations for the matchroom CLI

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use matchroom::engine::board::{BoardMove, Square};
use matchroom::engine::go_fish::{GoFishAction, GoFishState};
use matchroom::engine::{BoardRules, GoFishRules};
use matchroom::identity::StaticDirectory;
use matchroom::transport::LocalClient;
use matchroom::{
    ActionPayload, ClientMessage, Config, EngineRegistry, Error, GameHub, GameKind, LocalChannel, Result, RoomId,
    RoomView, ServerMessage, SessionStatus, UserId,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// King's pawn opening into a queen raid on e8
const BOARD_SCRIPT: &[(&str, &str)] = &[
    ("e2", "e4"),
    ("e7", "e5"),
    ("d1", "h5"),
    ("b8", "c6"),
    ("f1", "c4"),
    ("g8", "f6"),
    ("h5", "f7"),
    ("a7", "a6"),
    ("f7", "e8"),
];

/// One local client and its view of the room
struct Player {
    user: UserId,
    client: LocalClient,
    view: Option<RoomView>,
}

impl Player {
    async fn next(&mut self) -> Result<ServerMessage> {
        let message = timeout(RECV_TIMEOUT, self.client.recv())
            .await
            .map_err(|_| Error::Transport(format!("{} heard nothing for {:?}", self.user, RECV_TIMEOUT)))??;
        info!(user = %self.user, message = ?message, "<-");
        if let Some(view) = self.view.as_mut() {
            if let Err(e) = view.observe(&message) {
                warn!(user = %self.user, error = %e, "View rejected message");
            }
        }
        Ok(message)
    }

    /// Read until `pick` accepts a message
    async fn until<T>(&mut self, mut pick: impl FnMut(&ServerMessage) -> Option<T>) -> Result<T> {
        loop {
            let message = self.next().await?;
            if let Some(found) = pick(&message) {
                return Ok(found);
            }
        }
    }

    fn view(&self) -> Result<&RoomView> {
        self.view
            .as_ref()
            .ok_or_else(|| Error::ProtocolViolation(format!("{} has not joined a room", self.user)))
    }
}

/// Run a full match between `alice` and `bob` over the in-process transport
pub async fn demo_command(config: Config, kind: GameKind, seed: u64, max_actions: usize) -> Result<()> {
    let mut engines = EngineRegistry::new();
    engines.register(Arc::new(BoardRules::new()));
    engines.register(Arc::new(GoFishRules::with_seed(seed)));

    let directory = StaticDirectory::new();
    let (channel, inbound) = LocalChannel::new(256);
    let mut players = Vec::with_capacity(2);
    for name in ["alice", "bob"] {
        let user = UserId::from(name);
        directory.insert_plain(&user);
        players.push(Player {
            user,
            client: channel.connect(),
            view: None,
        });
    }

    let hub = Arc::new(GameHub::new(&config, engines, channel, Arc::new(directory)));
    let background = hub.start();
    let runner = tokio::spawn(hub.clone().run(inbound));

    for player in players.iter_mut() {
        player
            .client
            .send(ClientMessage::Hello {
                user_id: player.user.clone(),
            })
            .await?;
        player
            .until(|m| matches!(m, ServerMessage::Welcome { .. }).then_some(()))
            .await?;
    }

    let room_id = start_match(&mut players, kind).await?;

    let mut script = BOARD_SCRIPT.iter();
    let mut submitted = 0;
    while submitted < max_actions {
        let Some(mover) = players
            .iter()
            .position(|p| p.view.as_ref().map_or(false, RoomView::can_act))
        else {
            break;
        };

        let action = match kind {
            GameKind::Board => match script.next() {
                Some(&(from, to)) => ActionPayload::from_typed(&BoardMove {
                    from: square(from)?,
                    to: square(to)?,
                })?,
                None => {
                    info!("Script exhausted");
                    break;
                }
            },
            GameKind::GoFish => go_fish_action(players[mover].view()?)?,
        };

        players[mover]
            .client
            .send(ClientMessage::Submit { room_id, action })
            .await?;
        submitted += 1;

        let answer = players[mover]
            .until(|m| match m {
                ServerMessage::ActionApplied { version, .. } => Some(Some(*version)),
                ServerMessage::Rejected { .. } => Some(None),
                _ => None,
            })
            .await?;

        match answer {
            Some(version) => {
                let watcher = &mut players[1 - mover];
                watcher
                    .until(|m| match m {
                        ServerMessage::ActionApplied { version: v, .. } if *v == version => Some(()),
                        _ => None,
                    })
                    .await?;
            }
            None if players[mover].view()?.needs_resync() => {
                warn!(user_id = %players[mover].user, "Stale view, rejoining");
                players[mover].client.send(ClientMessage::Join { room_id }).await?;
                players[mover]
                    .until(|m| matches!(m, ServerMessage::CatchUp { .. }).then_some(()))
                    .await?;
            }
            None => {}
        }

        if players[mover].view()?.status() == SessionStatus::Over {
            for player in players.iter_mut() {
                player
                    .until(|m| matches!(m, ServerMessage::SessionEnded { .. }).then_some(()))
                    .await?;
            }
        }
    }

    let view = players[0].view()?;
    match (view.status(), view.result()) {
        (SessionStatus::Over, Some(result)) => info!(room_id = %room_id, result = ?result, "Match finished"),
        _ => info!(room_id = %room_id, actions = submitted, "Match stopped before the end"),
    }

    let stats = hub.registry().stats();
    info!(
        created = stats.sessions_created,
        finished = stats.sessions_finished,
        applied = stats.actions_applied,
        rejected = stats.actions_rejected,
        "Registry statistics"
    );

    runner.abort();
    for task in background {
        task.abort();
    }
    Ok(())
}

/// Challenge, accept and join; returns the room both players sit in
async fn start_match(players: &mut [Player], kind: GameKind) -> Result<RoomId> {
    let to = players[1].user.clone();
    players[0]
        .client
        .send(ClientMessage::Challenge { to, kind })
        .await?;

    let challenge_id = players[1]
        .until(|m| match m {
            ServerMessage::ChallengeReceived { challenge_id, .. } => Some(*challenge_id),
            _ => None,
        })
        .await?;
    players[1]
        .client
        .send(ClientMessage::AcceptChallenge { challenge_id })
        .await?;

    let mut room = None;
    for player in players.iter_mut() {
        let room_id = player
            .until(|m| match m {
                ServerMessage::ChallengeAccepted { room_id, .. } => Some(*room_id),
                _ => None,
            })
            .await?;
        player.view = Some(RoomView::new(room_id, player.user.clone()));
        player.client.send(ClientMessage::Join { room_id }).await?;
        player
            .until(|m| matches!(m, ServerMessage::CatchUp { .. }).then_some(()))
            .await?;
        room = Some(room_id);
    }

    room.ok_or_else(|| Error::ProtocolViolation("no room was created".to_string()))
}

fn square(name: &str) -> Result<Square> {
    Square::parse(name).ok_or_else(|| Error::Config(format!("bad square in script: {}", name)))
}

/// Ask for the first rank in hand, or draw with an empty hand
fn go_fish_action(view: &RoomView) -> Result<ActionPayload> {
    let role = view
        .my_role()
        .ok_or_else(|| Error::ProtocolViolation("no seat".to_string()))?;
    let state: GoFishState = view
        .confirmed_state()
        .ok_or_else(|| Error::ProtocolViolation("no state yet".to_string()))?
        .to_typed()?;

    let action = match state.hands[role.index()].first() {
        Some(card) => GoFishAction::Ask { rank: card.rank },
        None => GoFishAction::Draw,
    };
    ActionPayload::from_typed(&action)
}

/// Load, validate and echo a config file
pub fn check_config_command(path: &std::path::Path) -> Result<()> {
    let config = Config::load(path)?;
    let rendered = toml::to_string_pretty(&config).map_err(|e| Error::Config(e.to_string()))?;
    println!("{} is valid\n\n{}", path.display(), rendered);
    Ok(())
}
