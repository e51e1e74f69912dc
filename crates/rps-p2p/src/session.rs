//! session - one match against one opponent
//!
//! ```text
//! AwaitingOpponent ──discovered──► Playing ──max_rounds decisive──► Finished
//!        │                            │
//!        └── discovery timeout        └── send/receive failure
//! ```
//!
//! the session owns the score and the consumer side of the pending move
//! buffer; nothing else touches either.

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::channel::{send_move, ChannelError, MoveInbox};
use crate::config::Timing;
use crate::game::{Move, RoundOutcome, Tally, Verdict};
use crate::overlay::{Overlay, PeerId, Topic};
use crate::protocol::RENDEZVOUS_TOPIC;
use crate::rendezvous::{Discoverer, RendezvousError};

/// session lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    AwaitingOpponent,
    Playing,
    Finished,
}

/// one played round, draws included
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundRecord {
    /// 1-based attempt number
    pub number: u32,
    pub local: Move,
    pub opponent: Move,
    pub outcome: RoundOutcome,
}

/// result of a finished match, kept in memory only
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchReport {
    pub opponent: PeerId,
    pub rounds: Vec<RoundRecord>,
    pub tally: Tally,
    pub verdict: Verdict,
}

/// a single match driven over an [`Overlay`]
pub struct Session<'a, O, R> {
    overlay: &'a O,
    inbox: MoveInbox,
    bootstrap: PeerId,
    topic: Topic,
    timing: Timing,
    rng: R,
    phase: Phase,
}

impl<'a, O: Overlay, R: Rng> Session<'a, O, R> {
    /// `inbox` must be the buffer the inbound move handler delivers to
    pub fn new(overlay: &'a O, inbox: MoveInbox, bootstrap: PeerId, timing: Timing, rng: R) -> Self {
        Self {
            overlay,
            inbox,
            bootstrap,
            topic: Topic::new(RENDEZVOUS_TOPIC),
            timing,
            rng,
            phase: Phase::AwaitingOpponent,
        }
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic = topic;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// find an opponent, then play the match to the end
    pub async fn run(mut self) -> Result<MatchReport, SessionError> {
        let opponent = Discoverer::new(self.overlay, self.bootstrap, self.topic, &self.timing)
            .resolve_opponent()
            .await?;
        self.play(opponent).await
    }

    /// play against an already known opponent
    pub async fn play(&mut self, opponent: PeerId) -> Result<MatchReport, SessionError> {
        self.enter(Phase::Playing);
        let mut tally = Tally::new(self.timing.max_rounds);
        let mut rounds = Vec::new();

        let verdict = loop {
            let number = rounds.len() as u32 + 1;
            let local = Move::random(&mut self.rng);
            info!("my choice [{}]", local);

            send_move(self.overlay, opponent, local, &self.timing).await?;

            let theirs = match self.inbox.next_within(self.timing.move_timeout).await {
                Ok(Some(mv)) => mv,
                Ok(None) => return Err(SessionError::InboxClosed),
                Err(waited) => return Err(SessionError::MoveTimeout(waited)),
            };

            let outcome = RoundOutcome::decide(local, theirs);
            tally.record(outcome);
            info!("[{}] - [{}]", local, theirs);
            info!(
                "round {} -> you {} ({}/{} decisive)",
                number,
                outcome,
                tally.rounds_played(),
                tally.max_rounds()
            );
            rounds.push(RoundRecord {
                number,
                local,
                opponent: theirs,
                outcome,
            });

            if let Some(verdict) = tally.verdict() {
                break verdict;
            }
            if !self.timing.pacing.is_zero() {
                sleep(self.timing.pacing).await;
            }
        };

        self.enter(Phase::Finished);
        info!("finished game! you {} {}/{}", verdict, tally.wins(), tally.max_rounds());

        Ok(MatchReport {
            opponent,
            rounds,
            tally,
            verdict,
        })
    }

    fn enter(&mut self, phase: Phase) {
        debug!("session {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

/// session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] RendezvousError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("opponent sent no move within {0:?}")]
    MoveTimeout(std::time::Duration),
    #[error("move inbox closed")]
    InboxClosed,
}
