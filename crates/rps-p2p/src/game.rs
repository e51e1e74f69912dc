//! game - rock-paper-scissors rules and match accounting
//!
//! moves beat each other cyclically, so a round outcome is the difference of
//! the two move codes modulo 3. only decisive rounds (win or lose) count
//! toward the match length.

use rand::Rng;
use std::fmt;

/// rounds a match needs before a verdict
pub const MAX_ROUNDS: u32 = 5;

/// a single hand played in one round
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Move {
    Rock,
    Paper,
    Scissors,
}

impl Move {
    pub const ALL: [Move; 3] = [Move::Rock, Move::Paper, Move::Scissors];

    /// wire code (0, 1 or 2)
    pub fn code(self) -> u8 {
        match self {
            Move::Rock => 0,
            Move::Paper => 1,
            Move::Scissors => 2,
        }
    }

    /// inverse of [`Move::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Move::Rock),
            1 => Some(Move::Paper),
            2 => Some(Move::Scissors),
            _ => None,
        }
    }

    /// uniformly random move, independent of anything played before
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Move::Rock => "Rock",
            Move::Paper => "Paper",
            Move::Scissors => "Scissors",
        };
        f.write_str(name)
    }
}

/// outcome of one round from the local player's point of view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    Draw,
    Win,
    Lose,
}

impl RoundOutcome {
    /// decide a round: `((local - opponent) mod 3 + 3) mod 3`
    /// mapped to draw = 0, win = 1, lose = 2
    pub fn decide(local: Move, opponent: Move) -> Self {
        let diff = i16::from(local.code()) - i16::from(opponent.code());
        match ((diff % 3) + 3) % 3 {
            0 => RoundOutcome::Draw,
            1 => RoundOutcome::Win,
            _ => RoundOutcome::Lose,
        }
    }

    /// the same round seen from the other side
    pub fn inverse(self) -> Self {
        match self {
            RoundOutcome::Draw => RoundOutcome::Draw,
            RoundOutcome::Win => RoundOutcome::Lose,
            RoundOutcome::Lose => RoundOutcome::Win,
        }
    }

    pub fn is_decisive(self) -> bool {
        !matches!(self, RoundOutcome::Draw)
    }
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundOutcome::Draw => "Draw",
            RoundOutcome::Win => "Win",
            RoundOutcome::Lose => "Lose",
        };
        f.write_str(name)
    }
}

/// match result; there is no drawn match
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Win,
    Lose,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Win => f.write_str("WIN"),
            Verdict::Lose => f.write_str("LOSE"),
        }
    }
}

/// running score of a match, owned by the session loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tally {
    rounds_played: u32,
    wins: u32,
    max_rounds: u32,
}

impl Default for Tally {
    fn default() -> Self {
        Self::new(MAX_ROUNDS)
    }
}

impl Tally {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            rounds_played: 0,
            wins: 0,
            max_rounds,
        }
    }

    /// decisive rounds so far (draws excluded)
    pub fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    pub fn wins(&self) -> u32 {
        self.wins
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// fold one round into the score. no-op once the match is over.
    pub fn record(&mut self, outcome: RoundOutcome) {
        if self.is_finished() {
            return;
        }
        if outcome == RoundOutcome::Win {
            self.wins += 1;
        }
        if outcome.is_decisive() {
            self.rounds_played += 1;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.rounds_played >= self.max_rounds
    }

    /// match verdict, available once every decisive round is played
    pub fn verdict(&self) -> Option<Verdict> {
        if !self.is_finished() {
            return None;
        }
        // integer division: with 5 rounds a win needs 3 or more
        if self.wins > self.max_rounds / 2 {
            Some(Verdict::Win)
        } else {
            Some(Verdict::Lose)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_outcome_examples() {
        assert_eq!(RoundOutcome::decide(Move::Rock, Move::Scissors), RoundOutcome::Win);
        assert_eq!(RoundOutcome::decide(Move::Scissors, Move::Rock), RoundOutcome::Lose);
        assert_eq!(RoundOutcome::decide(Move::Paper, Move::Paper), RoundOutcome::Draw);
        assert_eq!(RoundOutcome::decide(Move::Paper, Move::Rock), RoundOutcome::Win);
        assert_eq!(RoundOutcome::decide(Move::Scissors, Move::Paper), RoundOutcome::Win);
    }

    #[test]
    fn test_outcome_is_antisymmetric() {
        for a in Move::ALL {
            for b in Move::ALL {
                let ab = RoundOutcome::decide(a, b);
                let ba = RoundOutcome::decide(b, a);
                assert_eq!(ab, ba.inverse(), "{} vs {}", a, b);
                assert_eq!(ab == RoundOutcome::Draw, a == b);
            }
        }
    }

    #[test]
    fn test_each_move_beats_exactly_one() {
        for a in Move::ALL {
            let wins = Move::ALL
                .iter()
                .filter(|&&b| RoundOutcome::decide(a, b) == RoundOutcome::Win)
                .count();
            assert_eq!(wins, 1);
        }
    }

    #[test]
    fn test_codes() {
        for m in Move::ALL {
            assert_eq!(Move::from_code(m.code()), Some(m));
        }
        assert_eq!(Move::from_code(3), None);
    }

    #[test]
    fn test_draws_do_not_consume_rounds() {
        use RoundOutcome::*;
        let mut tally = Tally::default();
        let seq = [Draw, Win, Draw, Lose, Win, Lose, Win];
        for (i, outcome) in seq.iter().enumerate() {
            assert!(!tally.is_finished(), "finished early at {}", i);
            tally.record(*outcome);
        }
        assert_eq!(tally.rounds_played(), 5);
        assert_eq!(tally.wins(), 3);
        assert!(tally.is_finished());
        assert_eq!(tally.verdict(), Some(Verdict::Win));
    }

    #[test]
    fn test_verdict_threshold() {
        for wins in 0..=MAX_ROUNDS {
            let mut tally = Tally::default();
            for i in 0..MAX_ROUNDS {
                tally.record(if i < wins { RoundOutcome::Win } else { RoundOutcome::Lose });
            }
            let expected = if wins >= 3 { Verdict::Win } else { Verdict::Lose };
            assert_eq!(tally.verdict(), Some(expected), "wins = {}", wins);
        }
    }

    #[test]
    fn test_no_verdict_before_finish() {
        let mut tally = Tally::default();
        tally.record(RoundOutcome::Win);
        tally.record(RoundOutcome::Draw);
        assert_eq!(tally.verdict(), None);
    }

    #[test]
    fn test_random_moves_cover_all() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = [false; 3];
        for _ in 0..100 {
            seen[Move::random(&mut rng).code() as usize] = true;
        }
        assert_eq!(seen, [true; 3]);
    }

    fn outcome_strategy() -> impl Strategy<Value = RoundOutcome> {
        prop_oneof![
            Just(RoundOutcome::Draw),
            Just(RoundOutcome::Win),
            Just(RoundOutcome::Lose),
        ]
    }

    proptest! {
        #[test]
        fn prop_rounds_count_decisive_only(outcomes in proptest::collection::vec(outcome_strategy(), 0..40)) {
            let mut tally = Tally::default();
            let mut decisive = 0u32;
            let mut wins = 0u32;
            for outcome in outcomes {
                if decisive < MAX_ROUNDS {
                    if outcome.is_decisive() {
                        decisive += 1;
                    }
                    if outcome == RoundOutcome::Win {
                        wins += 1;
                    }
                }
                tally.record(outcome);
            }
            prop_assert_eq!(tally.rounds_played(), decisive);
            prop_assert_eq!(tally.wins(), wins);
            prop_assert!(tally.rounds_played() <= MAX_ROUNDS);
            prop_assert_eq!(tally.verdict().is_some(), decisive == MAX_ROUNDS);
        }
    }
}
