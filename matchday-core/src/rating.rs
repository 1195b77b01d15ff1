use chrono::{DateTime, Utc};

use crate::SportId;

pub const DEFAULT_ELO: i32 = 1200;
pub const PROVISIONAL_GAMES: u32 = 10;
pub const PROVISIONAL_K: f64 = 80.0;
pub const ESTABLISHED_K: f64 = 32.0;

#[derive(Clone, Debug, PartialEq)]
pub struct RatingEvent {
    pub elo: i32,
    pub change: i32,
    pub at: DateTime<Utc>,
}

/// One user's rating for one sport. `elo` always equals the `elo` of the
/// latest event, or `DEFAULT_ELO` while the history is empty.
#[derive(Clone, Debug, PartialEq)]
pub struct SportRating {
    pub sport: SportId,
    pub elo: i32,
    pub history: Vec<RatingEvent>,
}

impl SportRating {
    pub fn new(sport: SportId) -> Self {
        Self {
            sport,
            elo: DEFAULT_ELO,
            history: Vec::new(),
        }
    }

    pub fn games_played(&self) -> u32 {
        self.history.len() as u32
    }

    pub fn record(&mut self, elo: i32, at: DateTime<Utc>) {
        let change = elo - self.elo;
        self.elo = elo;
        self.history.push(RatingEvent { elo, change, at });
    }
}

/// Engine input: a player's current rating and how many rating events they
/// already have. The count picks the K-factor.
#[derive(Clone, Copy, Debug)]
pub struct PlayerStanding {
    pub elo: i32,
    pub games_played: u32,
}

impl Default for PlayerStanding {
    fn default() -> Self {
        Self {
            elo: DEFAULT_ELO,
            games_played: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatingChange {
    pub elo: i32,
    pub change: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RatingError {
    InvalidGroups,
}

impl std::fmt::Display for RatingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RatingError::InvalidGroups => {
                write!(f, "Rating requires a non-empty winner and loser group")
            }
        }
    }
}

/// Logistic expected score of a player (or group average) against an
/// opponent average.
pub fn expected_score(own_avg: f64, opponent_avg: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_avg - own_avg) / 400.0))
}

pub fn k_factor(games_played: u32) -> f64 {
    if games_played < PROVISIONAL_GAMES {
        PROVISIONAL_K
    } else {
        ESTABLISHED_K
    }
}

/// Rates a decisive game between two groups. Expected scores come from the
/// group averages, K from each player's own event count, and the new rating
/// is rounded to the nearest integer (ties away from zero). Returned vectors
/// are index-aligned with the inputs.
pub fn rate_groups(
    winners: &[PlayerStanding],
    losers: &[PlayerStanding],
) -> Result<(Vec<RatingChange>, Vec<RatingChange>), RatingError> {
    if winners.is_empty() || losers.is_empty() {
        return Err(RatingError::InvalidGroups);
    }

    let average = |group: &[PlayerStanding]| {
        group.iter().map(|p| p.elo as f64).sum::<f64>() / group.len() as f64
    };
    let expected_win = expected_score(average(winners), average(losers));
    let expected_loss = 1.0 - expected_win;

    let rate = |p: &PlayerStanding, actual: f64, expected: f64| {
        let new = (p.elo as f64 + k_factor(p.games_played) * (actual - expected)).round() as i32;
        RatingChange {
            elo: new,
            change: new - p.elo,
        }
    };

    Ok((
        winners
            .iter()
            .map(|p| rate(p, 1.0, expected_win))
            .collect(),
        losers.iter().map(|p| rate(p, 0.0, expected_loss)).collect(),
    ))
}
