//! Event catalogue, typed payload views and connection state.
//!
//! The store itself is untyped; the names and structs here describe what the
//! game plugin is known to send so consumers can opt into typed access.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::EventStore;

/// Events emitted by the game plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameEvent {
    /// Plugin version announcement (`sos:version`).
    Version,
    /// A match was created (`game:match_created`).
    MatchCreated,
    /// The match finished loading (`game:initialized`).
    Initialized,
    /// Kickoff countdown is about to begin (`game:pre_countdown_begin`).
    PreCountdownBegin,
    /// Kickoff countdown began (`game:post_countdown_begin`).
    PostCountdownBegin,
    /// Periodic full game state (`game:update_state`).
    UpdateState,
    /// A player touched the ball (`game:ball_hit`).
    BallHit,
    /// Stat feed entry such as a save or demolition (`game:statfeed_event`).
    StatfeedEvent,
    /// A goal was scored (`game:goal_scored`).
    GoalScored,
    /// Goal replay started (`game:replay_start`).
    ReplayStart,
    /// Goal replay is about to end (`game:replay_will_end`).
    ReplayWillEnd,
    /// Goal replay ended (`game:replay_end`).
    ReplayEnd,
    /// The match ended (`game:match_ended`).
    MatchEnded,
    /// Podium sequence started (`game:podium_start`).
    PodiumStart,
    /// The match was torn down (`game:match_destroyed`).
    MatchDestroyed,
    /// Any other event name.
    Unknown(String),
}

impl GameEvent {
    /// Parse a wire event name.
    pub fn from_name(s: &str) -> Self {
        match s {
            "sos:version" => Self::Version,
            "game:match_created" => Self::MatchCreated,
            "game:initialized" => Self::Initialized,
            "game:pre_countdown_begin" => Self::PreCountdownBegin,
            "game:post_countdown_begin" => Self::PostCountdownBegin,
            "game:update_state" => Self::UpdateState,
            "game:ball_hit" => Self::BallHit,
            "game:statfeed_event" => Self::StatfeedEvent,
            "game:goal_scored" => Self::GoalScored,
            "game:replay_start" => Self::ReplayStart,
            "game:replay_will_end" => Self::ReplayWillEnd,
            "game:replay_end" => Self::ReplayEnd,
            "game:match_ended" => Self::MatchEnded,
            "game:podium_start" => Self::PodiumStart,
            "game:match_destroyed" => Self::MatchDestroyed,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire event name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Version => "sos:version",
            Self::MatchCreated => "game:match_created",
            Self::Initialized => "game:initialized",
            Self::PreCountdownBegin => "game:pre_countdown_begin",
            Self::PostCountdownBegin => "game:post_countdown_begin",
            Self::UpdateState => "game:update_state",
            Self::BallHit => "game:ball_hit",
            Self::StatfeedEvent => "game:statfeed_event",
            Self::GoalScored => "game:goal_scored",
            Self::ReplayStart => "game:replay_start",
            Self::ReplayWillEnd => "game:replay_will_end",
            Self::ReplayEnd => "game:replay_end",
            Self::MatchEnded => "game:match_ended",
            Self::PodiumStart => "game:podium_start",
            Self::MatchDestroyed => "game:match_destroyed",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Whether the payload of this event is a bare string.
    pub fn has_text_payload(&self) -> bool {
        matches!(
            self,
            Self::Version
                | Self::MatchCreated
                | Self::Initialized
                | Self::PreCountdownBegin
                | Self::PostCountdownBegin
                | Self::ReplayStart
                | Self::ReplayWillEnd
                | Self::ReplayEnd
                | Self::PodiumStart
                | Self::MatchDestroyed
        )
    }

    /// Every known wire event name.
    pub fn all_event_names() -> &'static [&'static str] {
        &[
            "sos:version",
            "game:match_created",
            "game:initialized",
            "game:pre_countdown_begin",
            "game:post_countdown_begin",
            "game:update_state",
            "game:ball_hit",
            "game:statfeed_event",
            "game:goal_scored",
            "game:replay_start",
            "game:replay_will_end",
            "game:replay_end",
            "game:match_ended",
            "game:podium_start",
            "game:match_destroyed",
        ]
    }
}

impl std::fmt::Display for GameEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload type bound to the event that carries it.
pub trait EventPayload: DeserializeOwned {
    /// The event this payload arrives on.
    const EVENT: GameEvent;
}

impl EventStore {
    /// Latest payload of `P::EVENT`, deserialized.
    pub fn read_payload<P: EventPayload>(&self) -> Option<P> {
        self.read_as(P::EVENT.as_str())
    }
}

/// x/y/z position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Z", default)]
    pub z: f64,
}

/// Ball section of `game:update_state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BallInfo {
    pub location: Vector3,
    pub speed: f64,
    pub team: i32,
}

/// One team in `game:update_state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamInfo {
    pub name: String,
    pub score: u32,
    pub color_primary: String,
    pub color_secondary: String,
}

/// Game section of `game:update_state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameInfo {
    pub arena: String,
    pub ball: BallInfo,
    #[serde(rename = "hasTarget")]
    pub has_target: bool,
    #[serde(rename = "hasWinner")]
    pub has_winner: bool,
    #[serde(rename = "isOT")]
    pub is_overtime: bool,
    #[serde(rename = "isReplay")]
    pub is_replay: bool,
    pub target: String,
    /// Keyed by team number as a string ("0", "1").
    pub teams: HashMap<String, TeamInfo>,
    /// Seconds left on the clock.
    pub time: f64,
    pub winner: String,
}

/// One player in `game:update_state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerState {
    pub id: String,
    pub name: String,
    #[serde(rename = "primaryID")]
    pub primary_id: String,
    pub team: i32,
    pub score: u32,
    pub goals: u32,
    pub assists: u32,
    pub saves: u32,
    pub shots: u32,
    pub demos: u32,
    pub touches: u32,
    pub boost: u32,
    pub speed: f64,
    #[serde(rename = "isDead")]
    pub is_dead: bool,
    #[serde(rename = "isSonic")]
    pub is_sonic: bool,
    #[serde(rename = "onGround")]
    pub on_ground: bool,
    #[serde(rename = "onWall")]
    pub on_wall: bool,
}

/// Payload of `game:update_state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameUpdateState {
    pub event: String,
    pub game: GameInfo,
    #[serde(rename = "hasGame")]
    pub has_game: bool,
    /// Keyed by player id.
    pub players: HashMap<String, PlayerState>,
}

impl EventPayload for GameUpdateState {
    const EVENT: GameEvent = GameEvent::UpdateState;
}

/// Player reference used by several payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerRef {
    pub id: String,
    pub name: String,
}

/// Ball section of `game:ball_hit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BallHitBall {
    pub location: Vector3,
    pub pre_hit_speed: f64,
    pub post_hit_speed: f64,
}

/// Payload of `game:ball_hit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BallHitEvent {
    pub ball: BallHitBall,
    pub player: PlayerRef,
}

impl EventPayload for BallHitEvent {
    const EVENT: GameEvent = GameEvent::BallHit;
}

/// Target of a stat feed entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatfeedTarget {
    pub id: String,
    pub name: String,
    pub team_num: i32,
}

/// Payload of `game:statfeed_event`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatfeedEvent {
    pub event_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub main_target: StatfeedTarget,
    pub secondary_target: StatfeedTarget,
}

impl EventPayload for StatfeedEvent {
    const EVENT: GameEvent = GameEvent::StatfeedEvent;
}

/// Last touch before a goal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BallLastTouch {
    pub player: String,
    pub speed: f64,
}

/// Scorer of a goal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scorer {
    pub id: String,
    pub name: String,
    pub teamnum: i32,
}

/// Payload of `game:goal_scored`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalScoredEvent {
    pub ball_last_touch: BallLastTouch,
    pub goalspeed: f64,
    pub impact_location: Vector3,
    pub scorer: Scorer,
}

impl EventPayload for GoalScoredEvent {
    const EVENT: GameEvent = GameEvent::GoalScored;
}

/// Payload of `game:match_ended`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchEndedEvent {
    pub winner_team_num: i32,
}

impl EventPayload for MatchEndedEvent {
    const EVENT: GameEvent = GameEvent::MatchEnded;
}

/// Connection state of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Connected and receiving events.
    Open,
    /// Teardown in progress.
    Closing,
    /// Not connected. Either waiting to reconnect or stopped for good;
    /// see `ConnectionManager::is_exhausted`.
    Closed,
}

impl ConnectionState {
    /// Whether frames can be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_name_roundtrip() {
        for name in GameEvent::all_event_names() {
            let event = GameEvent::from_name(name);
            assert!(!matches!(event, GameEvent::Unknown(_)), "{name}");
            assert_eq!(event.as_str(), *name);
        }
    }

    #[test]
    fn test_unknown_event_name() {
        let event = GameEvent::from_name("game:custom");
        assert_eq!(event, GameEvent::Unknown("game:custom".into()));
        assert_eq!(event.to_string(), "game:custom");
    }

    #[test]
    fn test_text_payload_events() {
        assert!(GameEvent::Version.has_text_payload());
        assert!(!GameEvent::UpdateState.has_text_payload());
        assert!(!GameEvent::GoalScored.has_text_payload());
    }

    #[test]
    fn test_goal_scored_payload() {
        let store = EventStore::new();
        store.write(
            "game:goal_scored",
            json!({
                "ball_last_touch": {"player": "Player_7", "speed": 87.5},
                "goalspeed": 101.2,
                "impact_location": {"X": 0.4, "Y": 0.9},
                "scorer": {"id": "7", "name": "Player_7", "teamnum": 1}
            }),
        );

        let goal = store.read_payload::<GoalScoredEvent>().unwrap();
        assert_eq!(goal.scorer.id, "7");
        assert_eq!(goal.scorer.teamnum, 1);
        assert_eq!(goal.impact_location.z, 0.0);
    }

    #[test]
    fn test_update_state_is_lenient() {
        let store = EventStore::new();
        store.write(
            "game:update_state",
            json!({
                "hasGame": true,
                "game": {
                    "time": 241.0,
                    "isOT": false,
                    "teams": {"0": {"name": "Blue", "score": 2}, "1": {"name": "Orange", "score": 1}},
                    "somethingNew": 1
                },
                "players": {"p1": {"name": "One", "boost": 33, "team": 0}}
            }),
        );

        let state = store.read_payload::<GameUpdateState>().unwrap();
        assert!(state.has_game);
        assert_eq!(state.game.teams["0"].score, 2);
        assert_eq!(state.players["p1"].boost, 33);
        assert_eq!(state.game.arena, "");
    }

    #[test]
    fn test_text_payload_does_not_fit_struct() {
        let store = EventStore::new();
        store.write("game:match_ended", json!("done"));
        assert!(store.read_payload::<MatchEndedEvent>().is_none());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "OPEN");
        assert_eq!(ConnectionState::Closed.to_string(), "CLOSED");
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Closing.is_open());
    }
}
