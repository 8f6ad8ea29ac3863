//! Go Fish for two players
//!
//! On your turn you ask the opponent for a rank you already hold. If they
//! have any, they hand all of them over and you go again. Otherwise you draw
//! from the pile ("go fish"); drawing the rank you asked for also keeps the
//! turn. Four of a kind is laid down as a book. The game ends when all
//! thirteen books are down and the player with more books wins.
//!
//! A player whose hand is empty draws instead of asking.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use super::{Rules, Verdict};
use crate::protocol::{GameKind, GameResult, Role, Scores};

pub const HAND_SIZE: usize = 7;
pub const BOOK_SIZE: usize = 4;
pub const RANK_COUNT: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suit {
    Clubs,
    Diamonds,
    Hearts,
    Spades,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades];
}

/// Ranks run 1 (ace) to 13 (king)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub rank: u8,
    pub suit: Suit,
}

/// What happened on the most recent turn, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLog {
    pub actor: Role,
    pub asked: Option<u8>,
    pub received: usize,
    pub drew: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoFishState {
    /// Indexed by `Role::index`
    pub hands: [Vec<Card>; 2],
    /// Top of the pile is the last element
    pub pile: Vec<Card>,
    pub books: [Vec<u8>; 2],
    pub last_turn: Option<TurnLog>,
}

impl GoFishState {
    /// Deal from an already shuffled deck
    pub fn deal(mut deck: Vec<Card>) -> Self {
        let mut hands = [Vec::with_capacity(HAND_SIZE), Vec::with_capacity(HAND_SIZE)];
        for _ in 0..HAND_SIZE {
            for hand in hands.iter_mut() {
                if let Some(card) = deck.pop() {
                    hand.push(card);
                }
            }
        }
        let mut state = Self {
            hands,
            pile: deck,
            books: [Vec::new(), Vec::new()],
            last_turn: None,
        };
        for role in Role::BOTH {
            state.lay_books(role);
        }
        state
    }

    pub fn full_deck() -> Vec<Card> {
        Suit::ALL
            .iter()
            .flat_map(|&suit| (1..=RANK_COUNT).map(move |rank| Card { rank, suit }))
            .collect()
    }

    pub fn scores(&self) -> Scores {
        Scores {
            first: self.books[0].len() as u32,
            second: self.books[1].len() as u32,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.books[0].len() + self.books[1].len() == RANK_COUNT as usize
    }

    fn holds(&self, role: Role, rank: u8) -> bool {
        self.hands[role.index()].iter().any(|c| c.rank == rank)
    }

    /// Move any complete set out of `role`'s hand into their books
    fn lay_books(&mut self, role: Role) {
        let hand = &mut self.hands[role.index()];
        for rank in 1..=RANK_COUNT {
            if hand.iter().filter(|c| c.rank == rank).count() == BOOK_SIZE {
                hand.retain(|c| c.rank != rank);
                self.books[role.index()].push(rank);
            }
        }
        self.books[role.index()].sort_unstable();
    }

    fn result(&self) -> GameResult {
        let scores = self.scores();
        let result = match scores.first.cmp(&scores.second) {
            std::cmp::Ordering::Greater => GameResult::win(Role::First, "more books"),
            std::cmp::Ordering::Less => GameResult::win(Role::Second, "more books"),
            std::cmp::Ordering::Equal => GameResult::draw("books tied"),
        };
        result.with_scores(scores)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoFishAction {
    /// Ask the opponent for every card of `rank`
    Ask { rank: u8 },
    /// Only allowed with an empty hand
    Draw,
}

/// Rules for Go Fish; owns the shuffler
pub struct GoFishRules {
    rng: Mutex<ChaCha20Rng>,
}

impl GoFishRules {
    /// Deterministic shuffles, for tests and replays
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::from_entropy()),
        }
    }
}

impl std::fmt::Debug for GoFishRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoFishRules").finish_non_exhaustive()
    }
}

impl Rules for GoFishRules {
    type State = GoFishState;
    type Action = GoFishAction;

    const KIND: GameKind = GameKind::GoFish;

    fn initial_state(&self) -> GoFishState {
        let mut deck = GoFishState::full_deck();
        deck.shuffle(&mut *self.rng.lock());
        GoFishState::deal(deck)
    }

    fn apply(&self, state: &GoFishState, actor: Role, action: GoFishAction) -> Verdict<GoFishState> {
        let me = actor.index();
        let them = actor.other().index();
        let mut next = state.clone();

        let extra_turn = match action {
            GoFishAction::Draw => {
                if !state.hands[me].is_empty() {
                    return Verdict::illegal("you can only draw when your hand is empty");
                }
                let Some(card) = next.pile.pop() else {
                    return Verdict::illegal("the pile is empty");
                };
                next.hands[me].push(card);
                next.last_turn = Some(TurnLog {
                    actor,
                    asked: None,
                    received: 0,
                    drew: true,
                });
                // Drawing replaces the ask, it does not end the turn
                true
            }
            GoFishAction::Ask { rank } => {
                if !(1..=RANK_COUNT).contains(&rank) {
                    return Verdict::illegal(format!("{} is not a rank", rank));
                }
                if !state.holds(actor, rank) {
                    return Verdict::illegal(format!("you must hold a {} to ask for it", rank));
                }

                let (given, kept): (Vec<Card>, Vec<Card>) =
                    next.hands[them].iter().partition(|c| c.rank == rank);
                let received = given.len();

                let (extra, drew) = if received > 0 {
                    next.hands[them] = kept;
                    next.hands[me].extend(given);
                    (true, false)
                } else if let Some(card) = next.pile.pop() {
                    next.hands[me].push(card);
                    (card.rank == rank, true)
                } else {
                    (false, false)
                };

                next.last_turn = Some(TurnLog {
                    actor,
                    asked: Some(rank),
                    received,
                    drew,
                });
                extra
            }
        };

        next.lay_books(actor);
        let terminal = next.is_finished().then(|| next.result());

        Verdict::Legal {
            state: next,
            extra_turn,
            terminal,
        }
    }
}
