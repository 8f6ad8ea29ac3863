//! Matchroom - two-player, turn-based game sessions
//!
//! The crate hosts head-to-head game rooms on a shared server. Each module
//! covers one concern:
//! - protocol: ids, roles and the wire messages
//! - engine: pluggable rule engines (board game, Go Fish)
//! - session: the per-room state machine and the registry of rooms
//! - presence: who is currently busy in a game
//! - challenge: issue/accept/decline flow that creates rooms
//! - reconnect: replaying joins and catching clients up
//! - transport: the pub/sub channel abstraction and an in-memory implementation
//! - hub: wires inbound messages to all of the above
//! - client: the client-side view of a room
//!
//! Every room runs as its own task, so moves within one room are strictly
//! ordered while different rooms proceed in parallel.

pub mod error;
pub mod protocol;     // Ids, roles and wire messages
pub mod engine;       // Rule engine trait and built-in games
pub mod session;      // Room state machine, room actor and registry
pub mod presence;     // Busy/available tracking
pub mod events;       // Lifecycle event bus
pub mod challenge;    // Challenge flow
pub mod identity;     // Profile lookup
pub mod reconnect;    // Join replay and catch-up
pub mod transport;    // Sync channel abstraction
pub mod hub;          // Inbound message dispatch
pub mod client;       // Client-side room view
pub mod config;
pub mod logging;

// Re-export commonly used types for easy access
pub use error::{Error, ErrorKind, Result};
pub use protocol::{
    ClientMessage, ConnectionId, GameKind, GameResult, Role, RoleAssignment, RoomId,
    ServerMessage, SessionSnapshot, SessionStatus, TerminationReason, UserId,
};
pub use engine::{ActionPayload, EngineRegistry, GameState, Outcome, RuleEngine, Rules};
pub use session::{GameSession, RoomHandle, SessionRegistry};
pub use presence::PresenceTracker;
pub use events::{EventBus, SessionEvent};
pub use challenge::ChallengeBook;
pub use reconnect::{JoinOutcome, ReconnectionCoordinator};
pub use transport::{InboundEvent, LocalChannel, SyncChannel};
pub use hub::GameHub;
pub use client::RoomView;
pub use config::Config;
