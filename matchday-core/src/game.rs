use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::{GameId, PlaceId, SportId, UserId};

pub const MIN_PARTICIPANTS: u32 = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct Participation {
    pub user: UserId,
    pub winner: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GamePhase {
    Open,
    Full,
    Finished,
}

#[derive(Clone, Debug)]
pub struct NewGame {
    pub sport: SportId,
    pub place: PlaceId,
    pub creator: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub note: String,
    pub max_participants: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Game {
    pub id: GameId,
    pub sport: SportId,
    pub place: PlaceId,
    pub creator: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub note: String,
    pub max_participants: u32,
    pub is_finished: bool,
    pub participants: Vec<Participation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateGameError {
    CapacityTooSmall,
}

impl std::fmt::Display for CreateGameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateGameError::CapacityTooSmall => {
                write!(f, "A game needs room for at least {} players", MIN_PARTICIPANTS)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinError {
    AlreadyFinished,
    AlreadyJoined,
    GameFull,
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinError::AlreadyFinished => write!(f, "Cannot join a finished game"),
            JoinError::AlreadyJoined => write!(f, "User already joined this game"),
            JoinError::GameFull => write!(f, "Game is full"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishError {
    NotCreator,
    AlreadyFinished,
    TooEarly,
    UnknownWinner(UserId),
}

impl std::fmt::Display for FinishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishError::NotCreator => write!(f, "Only the creator can finish this game"),
            FinishError::AlreadyFinished => write!(f, "Game is already finished"),
            FinishError::TooEarly => {
                write!(f, "Cannot finish a game before it has started")
            }
            FinishError::UnknownWinner(user) => {
                write!(f, "Winner {} is not a participant of this game", user)
            }
        }
    }
}

/// Outcome of a successful finish. `Decisive` keeps both partitions in
/// roster order; `NoContest` means no rating update takes place.
#[derive(Clone, Debug, PartialEq)]
pub enum FinishOutcome {
    NoContest,
    Decisive {
        winners: Vec<UserId>,
        losers: Vec<UserId>,
    },
}

impl Game {
    /// Validates the settings and opens the game with the creator as the
    /// first participant.
    pub fn create(id: GameId, new_game: NewGame) -> Result<Game, CreateGameError> {
        if new_game.max_participants < MIN_PARTICIPANTS {
            return Err(CreateGameError::CapacityTooSmall);
        }
        Ok(Game {
            id,
            sport: new_game.sport,
            place: new_game.place,
            creator: new_game.creator,
            scheduled_at: new_game.scheduled_at,
            note: new_game.note,
            max_participants: new_game.max_participants,
            is_finished: false,
            participants: vec![Participation {
                user: new_game.creator,
                winner: false,
            }],
        })
    }

    pub fn phase(&self) -> GamePhase {
        if self.is_finished {
            GamePhase::Finished
        } else if self.participants.len() as u32 >= self.max_participants {
            GamePhase::Full
        } else {
            GamePhase::Open
        }
    }

    pub fn is_creator(&self, user: &UserId) -> bool {
        &self.creator == user
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user == user)
    }

    pub fn join(&mut self, user: UserId) -> Result<(), JoinError> {
        if self.is_finished {
            return Err(JoinError::AlreadyFinished);
        }
        if self.has_participant(&user) {
            return Err(JoinError::AlreadyJoined);
        }
        if self.participants.len() as u32 >= self.max_participants {
            return Err(JoinError::GameFull);
        }
        self.participants.push(Participation {
            user,
            winner: false,
        });
        Ok(())
    }

    /// Guard order: creator, already finished, scheduled time, winner ids.
    /// A winner set that selects everyone or no one finishes as a no-contest
    /// with every winner flag left false.
    pub fn finish(
        &mut self,
        initiator: &UserId,
        winner_ids: &HashSet<UserId>,
        now: DateTime<Utc>,
    ) -> Result<FinishOutcome, FinishError> {
        if !self.is_creator(initiator) {
            return Err(FinishError::NotCreator);
        }
        if self.is_finished {
            return Err(FinishError::AlreadyFinished);
        }
        if now < self.scheduled_at {
            return Err(FinishError::TooEarly);
        }
        for id in winner_ids {
            if !self.has_participant(id) {
                return Err(FinishError::UnknownWinner(*id));
            }
        }

        let decisive = !winner_ids.is_empty() && winner_ids.len() < self.participants.len();
        if decisive {
            for p in self.participants.iter_mut() {
                p.winner = winner_ids.contains(&p.user);
            }
        }
        self.is_finished = true;

        if decisive {
            let winners = self
                .participants
                .iter()
                .filter(|p| p.winner)
                .map(|p| p.user)
                .collect();
            let losers = self
                .participants
                .iter()
                .filter(|p| !p.winner)
                .map(|p| p.user)
                .collect();
            Ok(FinishOutcome::Decisive { winners, losers })
        } else {
            Ok(FinishOutcome::NoContest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn uid(n: u128) -> UserId {
        UserId(uuid::Uuid::from_u128(n))
    }

    fn past() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap()
    }

    fn later() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 20, 0, 0).unwrap()
    }

    fn new_game(creator: UserId, capacity: u32) -> Game {
        Game::create(
            GameId::new(),
            NewGame {
                sport: SportId::new(),
                place: PlaceId::new(),
                creator,
                scheduled_at: past(),
                note: String::new(),
                max_participants: capacity,
            },
        )
        .expect("Failed to create game")
    }

    #[test]
    fn test_create_rejects_small_capacity() {
        let result = Game::create(
            GameId::new(),
            NewGame {
                sport: SportId::new(),
                place: PlaceId::new(),
                creator: uid(1),
                scheduled_at: past(),
                note: String::new(),
                max_participants: 1,
            },
        );
        assert_eq!(result.unwrap_err(), CreateGameError::CapacityTooSmall);
    }

    #[test]
    fn test_create_auto_joins_creator() {
        let game = new_game(uid(1), 4);
        assert_eq!(game.participants.len(), 1);
        assert_eq!(game.participants[0].user, uid(1));
        assert!(!game.participants[0].winner);
        assert_eq!(game.phase(), GamePhase::Open);
    }

    #[test]
    fn test_join_keeps_roster_order() {
        let mut game = new_game(uid(1), 4);
        game.join(uid(2)).unwrap();
        game.join(uid(3)).unwrap();
        let roster: Vec<UserId> = game.participants.iter().map(|p| p.user).collect();
        assert_eq!(roster, vec![uid(1), uid(2), uid(3)]);
    }

    #[test]
    fn test_join_duplicate_fails() {
        let mut game = new_game(uid(1), 4);
        game.join(uid(2)).unwrap();
        assert_eq!(game.join(uid(2)), Err(JoinError::AlreadyJoined));
        assert_eq!(game.join(uid(1)), Err(JoinError::AlreadyJoined));
        assert_eq!(game.participants.len(), 2);
    }

    #[test]
    fn test_join_beyond_capacity_fails() {
        let mut game = new_game(uid(1), 2);
        game.join(uid(2)).unwrap();
        assert_eq!(game.phase(), GamePhase::Full);
        assert_eq!(game.join(uid(3)), Err(JoinError::GameFull));
        assert_eq!(game.participants.len(), 2);
    }

    #[test]
    fn test_finish_requires_creator() {
        let mut game = new_game(uid(1), 2);
        game.join(uid(2)).unwrap();
        let result = game.finish(&uid(2), &HashSet::new(), later());
        assert_eq!(result, Err(FinishError::NotCreator));
        assert!(!game.is_finished);
    }

    #[test]
    fn test_finish_before_scheduled_time_fails() {
        let mut game = new_game(uid(1), 2);
        let too_early = Utc.with_ymd_and_hms(2026, 3, 14, 17, 59, 59).unwrap();
        let result = game.finish(&uid(1), &HashSet::new(), too_early);
        assert_eq!(result, Err(FinishError::TooEarly));
    }

    #[test]
    fn test_finish_at_scheduled_time_is_allowed() {
        let mut game = new_game(uid(1), 2);
        let result = game.finish(&uid(1), &HashSet::new(), past());
        assert_eq!(result, Ok(FinishOutcome::NoContest));
    }

    #[test]
    fn test_finish_rejects_unknown_winner() {
        let mut game = new_game(uid(1), 3);
        game.join(uid(2)).unwrap();
        let winners = HashSet::from([uid(9)]);
        let result = game.finish(&uid(1), &winners, later());
        assert_eq!(result, Err(FinishError::UnknownWinner(uid(9))));
        assert!(!game.is_finished);
        assert!(game.participants.iter().all(|p| !p.winner));
    }

    #[test]
    fn test_finish_partitions_roster() {
        let mut game = new_game(uid(1), 4);
        game.join(uid(2)).unwrap();
        game.join(uid(3)).unwrap();
        game.join(uid(4)).unwrap();
        let winners = HashSet::from([uid(2), uid(4)]);
        let outcome = game.finish(&uid(1), &winners, later()).unwrap();
        assert_eq!(
            outcome,
            FinishOutcome::Decisive {
                winners: vec![uid(2), uid(4)],
                losers: vec![uid(1), uid(3)],
            }
        );
        assert_eq!(game.phase(), GamePhase::Finished);
        let flags: Vec<bool> = game.participants.iter().map(|p| p.winner).collect();
        assert_eq!(flags, vec![false, true, false, true]);
    }

    #[test]
    fn test_finish_with_all_winners_is_no_contest() {
        let mut game = new_game(uid(1), 2);
        game.join(uid(2)).unwrap();
        let winners = HashSet::from([uid(1), uid(2)]);
        let outcome = game.finish(&uid(1), &winners, later()).unwrap();
        assert_eq!(outcome, FinishOutcome::NoContest);
        assert!(game.is_finished);
        assert!(game.participants.iter().all(|p| !p.winner));
    }

    #[test]
    fn test_finish_with_no_winners_is_no_contest() {
        let mut game = new_game(uid(1), 2);
        game.join(uid(2)).unwrap();
        let outcome = game.finish(&uid(1), &HashSet::new(), later()).unwrap();
        assert_eq!(outcome, FinishOutcome::NoContest);
        assert!(game.is_finished);
    }

    #[test]
    fn test_finished_game_is_terminal() {
        let mut game = new_game(uid(1), 3);
        game.join(uid(2)).unwrap();
        game.finish(&uid(1), &HashSet::from([uid(2)]), later())
            .unwrap();

        assert_eq!(game.join(uid(3)), Err(JoinError::AlreadyFinished));
        let again = game.finish(&uid(1), &HashSet::new(), later());
        assert_eq!(again, Err(FinishError::AlreadyFinished));
        // the first outcome survives untouched
        let flags: Vec<bool> = game.participants.iter().map(|p| p.winner).collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn test_creator_check_wins_over_state() {
        let mut game = new_game(uid(1), 2);
        game.join(uid(2)).unwrap();
        game.finish(&uid(1), &HashSet::new(), later()).unwrap();
        let result = game.finish(&uid(2), &HashSet::new(), later());
        assert_eq!(result, Err(FinishError::NotCreator));
    }
}
