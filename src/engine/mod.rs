//! Pluggable rule engines
//!
//! The session core never looks inside a game's state. It hands the opaque
//! [`GameState`] and the submitted [`ActionPayload`] to a [`RuleEngine`] and
//! gets back an [`Outcome`]. Two engines ship with the crate:
//! - [`board::BoardRules`]: alternating single moves on an 8x8 board
//! - [`go_fish::GoFishRules`]: ask/answer card game where a hit grants another turn
//!
//! Game authors normally implement the typed [`Rules`] trait; a blanket impl
//! erases it into a [`RuleEngine`] trait object.

pub mod board;
pub mod go_fish;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{Error, Result};
use crate::protocol::{GameKind, GameResult, Role};

pub use board::BoardRules;
pub use go_fish::GoFishRules;

/// Opaque, serializable game state owned by a rule engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameState(serde_json::Value);

impl GameState {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn from_typed<T: Serialize>(state: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(state)?))
    }

    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Opaque action submitted by a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionPayload(serde_json::Value);

impl ActionPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn from_typed<T: Serialize>(action: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(action)?))
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// What a rule engine says about a proposed action
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `legal = false`; the session must not change
    Rejected { reason: String },
    Accepted {
        new_state: GameState,
        /// Keep the turn with the actor instead of flipping it
        extra_turn_granted: bool,
        /// `Some` when the game reached a terminal position
        terminal: Option<GameResult>,
    },
}

/// Type-erased rule engine the session layer is written against
pub trait RuleEngine: Send + Sync {
    fn kind(&self) -> GameKind;

    fn initial_state(&self) -> Result<GameState>;

    /// Pure transition. Must not perform I/O.
    fn apply(&self, state: &GameState, actor: Role, action: &ActionPayload) -> Result<Outcome>;
}

/// Verdict of a typed rule set
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<S> {
    Illegal(String),
    Legal {
        state: S,
        extra_turn: bool,
        terminal: Option<GameResult>,
    },
}

impl<S> Verdict<S> {
    pub fn next(state: S) -> Self {
        Verdict::Legal {
            state,
            extra_turn: false,
            terminal: None,
        }
    }

    pub fn illegal(reason: impl Into<String>) -> Self {
        Verdict::Illegal(reason.into())
    }
}

/// Typed rule set; implement this and get [`RuleEngine`] for free
pub trait Rules: Send + Sync + 'static {
    type State: Serialize + DeserializeOwned;
    type Action: DeserializeOwned;

    const KIND: GameKind;

    fn initial_state(&self) -> Self::State;

    fn apply(&self, state: &Self::State, actor: Role, action: Self::Action) -> Verdict<Self::State>;
}

impl<R: Rules> RuleEngine for R {
    fn kind(&self) -> GameKind {
        R::KIND
    }

    fn initial_state(&self) -> Result<GameState> {
        GameState::from_typed(&Rules::initial_state(self))
    }

    fn apply(&self, state: &GameState, actor: Role, action: &ActionPayload) -> Result<Outcome> {
        // A corrupt state is our bug; a malformed action is the client's.
        let typed_state: R::State = state.to_typed()?;
        let typed_action: R::Action = match serde_json::from_value(action.as_value().clone()) {
            Ok(action) => action,
            Err(e) => {
                return Ok(Outcome::Rejected {
                    reason: format!("malformed action: {}", e),
                })
            }
        };

        match Rules::apply(self, &typed_state, actor, typed_action) {
            Verdict::Illegal(reason) => Ok(Outcome::Rejected { reason }),
            Verdict::Legal {
                state,
                extra_turn,
                terminal,
            } => Ok(Outcome::Accepted {
                new_state: GameState::from_typed(&state)?,
                extra_turn_granted: extra_turn,
                terminal,
            }),
        }
    }
}

/// Registered rule engines keyed by game kind
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<GameKind, Arc<dyn RuleEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Board and Go Fish, the latter shuffled from OS entropy
    pub fn with_builtin_games() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BoardRules::new()));
        registry.register(Arc::new(GoFishRules::from_entropy()));
        registry
    }

    pub fn register(&mut self, engine: Arc<dyn RuleEngine>) {
        let kind = engine.kind();
        info!(game = %kind, "Registered rule engine");
        self.engines.insert(kind, engine);
    }

    pub fn get(&self, kind: GameKind) -> Result<Arc<dyn RuleEngine>> {
        self.engines
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no rule engine registered for {}", kind)))
    }

    pub fn kinds(&self) -> Vec<GameKind> {
        self.engines.keys().copied().collect()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
