//! Song selection screens
//!
//! Reads the per-difficulty clear status on the multiplayer lobby and the
//! chosen difficulty on the solo start screen, and taps through both when
//! automatic selection is enabled.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::Result;
use crate::capture::Frame;
use crate::touch::{TouchController, TouchSink};
use crate::vision::{Color, StateTemplate, VisionError};

/// Lobby screen listing the clear status of every difficulty
pub const MULTI_PLAY_START: &str = "multi_play_start";
/// Solo start screen showing the selected difficulty
pub const SOLO_PLAY_START: &str = "solo_play_start";
/// Result screen after a song
pub const SONG_RESULT: &str = "song_result";

/// Button that starts the song on either start screen
const START_BUTTON: &str = "start";
/// Button that leaves the result screen
const NEXT_BUTTON: &str = "next";
/// Point sampled for the solo difficulty
const DIFFICULTY_POINT: &str = "difficulty";
/// Per-channel tolerance for difficulty and status colors
const MENU_COLOR_DELTA: u8 = 20;

/// Song difficulty, easiest first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SongDifficulty {
    /// Easy
    Easy,
    /// Normal
    Normal,
    /// Hard
    #[default]
    Hard,
    /// Expert
    Expert,
    /// Master
    Master,
    /// Append
    Append,
}

impl SongDifficulty {
    /// All difficulties, easiest first
    pub const ALL: [SongDifficulty; 6] = [
        Self::Easy,
        Self::Normal,
        Self::Hard,
        Self::Expert,
        Self::Master,
        Self::Append,
    ];

    /// Lowercase name, also the button and point prefix in state metadata
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Normal => "normal",
            Self::Hard => "hard",
            Self::Expert => "expert",
            Self::Master => "master",
            Self::Append => "append",
        }
    }

    /// Label color on the solo start screen (RGB)
    pub fn color(self) -> Color {
        match self {
            Self::Easy => Color::new(17, 221, 119),
            Self::Normal => Color::new(51, 204, 255),
            Self::Hard => Color::new(255, 204, 0),
            Self::Expert => Color::new(255, 68, 119),
            Self::Master => Color::new(204, 51, 255),
            Self::Append => Color::new(235, 103, 247),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SongDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SongDifficulty {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == lower)
            .ok_or_else(|| format!("unknown difficulty '{}'", s))
    }
}

/// Clear status of one difficulty, worst first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SongStatus {
    /// Never played
    Unplayed,
    /// Cleared
    Clear,
    /// Full combo
    FullCombo,
    /// All perfect
    AllPerfect,
}

impl SongStatus {
    /// All statuses, worst first
    pub const ALL: [SongStatus; 4] = [Self::Unplayed, Self::Clear, Self::FullCombo, Self::AllPerfect];

    /// Badge color on the lobby screen (RGB)
    pub fn color(self) -> Color {
        match self {
            Self::Unplayed => Color::new(68, 68, 102),
            Self::Clear => Color::new(254, 226, 113),
            Self::FullCombo => Color::new(255, 170, 251),
            Self::AllPerfect => Color::new(19, 204, 206),
        }
    }

    /// Status whose badge color is closest to `color`
    pub fn from_color(color: Color) -> Option<Self> {
        let palette = Self::ALL.map(Self::color);
        color.nearest(&palette).map(|i| Self::ALL[i])
    }
}

/// Status badge of every difficulty on a lobby frame, easiest first
pub fn find_multi_song_status(frame: &Frame, state: &StateTemplate) -> Result<Vec<SongStatus>> {
    SongDifficulty::ALL
        .iter()
        .map(|difficulty| -> Result<SongStatus> {
            let name = format!("{}_status", difficulty);
            let point = state.point(&name).ok_or_else(|| VisionError::MissingLocation {
                state: state.name().to_string(),
                kind: "point",
                name: name.clone(),
            })?;
            let status = frame
                .pixel(point)
                .map(Color::from)
                .and_then(SongStatus::from_color)
                .unwrap_or(SongStatus::Unplayed);
            Ok(status)
        })
        .collect()
}

/// Pick the difficulty to play in the lobby
///
/// Starts at `max` and moves down to any easier difficulty whose status is
/// strictly worse than the current pick, so unfinished work on easier
/// songs comes first.
pub fn select_multi_difficulty(statuses: &[SongStatus], max: SongDifficulty) -> SongDifficulty {
    let max_index = max.index().min(statuses.len().saturating_sub(1));
    let mut target = max_index;
    for i in (0..max_index).rev() {
        if statuses[i] < statuses[target] {
            target = i;
        }
    }
    SongDifficulty::ALL[target]
}

/// Difficulty currently selected on a solo start frame
pub fn find_solo_difficulty(frame: &Frame, state: &StateTemplate) -> Result<Option<SongDifficulty>> {
    let point = state.point(DIFFICULTY_POINT).ok_or_else(|| VisionError::MissingLocation {
        state: state.name().to_string(),
        kind: "point",
        name: DIFFICULTY_POINT.to_string(),
    })?;
    let Some(color) = frame.pixel(point).map(Color::from) else {
        return Ok(None);
    };
    Ok(SongDifficulty::ALL
        .into_iter()
        .find(|d| d.color().matches(color, MENU_COLOR_DELTA)))
}

/// What the navigator did on a menu frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    /// Picked a difficulty and pressed start
    Started(SongDifficulty),
    /// Left the result screen
    Dismissed,
    /// Nothing to do on this screen
    None,
}

/// Taps through song selection screens
pub struct MenuNavigator<S: TouchSink> {
    controller: TouchController<S>,
    max_difficulty: SongDifficulty,
    tap_duration: Duration,
}

impl<S: TouchSink> MenuNavigator<S> {
    /// Create a navigator tapping through `controller`
    pub fn new(controller: TouchController<S>, max_difficulty: SongDifficulty, tap_duration: Duration) -> Self {
        Self {
            controller,
            max_difficulty,
            tap_duration,
        }
    }

    /// Act on a recognized menu screen
    pub fn act(&self, frame: &Frame, state: &StateTemplate) -> Result<MenuAction> {
        match state.name() {
            MULTI_PLAY_START => {
                let statuses = find_multi_song_status(frame, state)?;
                let difficulty = select_multi_difficulty(&statuses, self.max_difficulty);
                debug!("Lobby statuses {:?}, choosing {}", statuses, difficulty);
                self.press(state, difficulty.as_str())?;
                self.press(state, START_BUTTON)?;
                info!("Started multiplayer song on {}", difficulty);
                Ok(MenuAction::Started(difficulty))
            }
            SOLO_PLAY_START => {
                let current = find_solo_difficulty(frame, state)?;
                let difficulty = match current {
                    Some(d) if d <= self.max_difficulty => d,
                    _ => {
                        self.press(state, self.max_difficulty.as_str())?;
                        self.max_difficulty
                    }
                };
                self.press(state, START_BUTTON)?;
                info!("Started solo song on {}", difficulty);
                Ok(MenuAction::Started(difficulty))
            }
            SONG_RESULT => {
                self.press(state, NEXT_BUTTON)?;
                Ok(MenuAction::Dismissed)
            }
            _ => Ok(MenuAction::None),
        }
    }

    fn press(&self, state: &StateTemplate, button: &str) -> Result<()> {
        let pos = state.button(button).ok_or_else(|| VisionError::MissingLocation {
            state: state.name().to_string(),
            kind: "button",
            name: button.to_string(),
        })?;
        self.controller.tap(pos, self.tap_duration)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::touch::{LoggingTouchSink, TouchAction};
    use image::{Rgb, RgbImage};
    use std::time::Instant;

    fn lobby_frame(statuses: &[SongStatus]) -> (Frame, StateTemplate) {
        let mut image = RgbImage::from_pixel(200, 100, Rgb([0, 0, 0]));
        let mut state = StateTemplate::new(MULTI_PLAY_START, RgbImage::new(1, 1), Point::new(0, 0));
        for (i, (difficulty, status)) in SongDifficulty::ALL.iter().zip(statuses).enumerate() {
            let p = Point::new(10 + 20 * i as i32, 50);
            image.put_pixel(p.x as u32, p.y as u32, status.color().into());
            state = state
                .with_point(format!("{}_status", difficulty), p)
                .with_button(difficulty.as_str(), p.offset(0, 20));
        }
        state = state.with_button(START_BUTTON, Point::new(190, 90));
        (Frame::new(image, Instant::now()), state)
    }

    #[test]
    fn test_difficulty_names() {
        assert_eq!("Master".parse::<SongDifficulty>().unwrap(), SongDifficulty::Master);
        assert!("extreme".parse::<SongDifficulty>().is_err());
        assert_eq!(SongDifficulty::Append.to_string(), "append");
        assert!(SongDifficulty::Easy < SongDifficulty::Append);
    }

    #[test]
    fn test_select_prefers_worse_status_below_max() {
        use SongStatus::*;
        let statuses = [AllPerfect, FullCombo, Clear, Unplayed, Unplayed, Unplayed];
        assert_eq!(select_multi_difficulty(&statuses, SongDifficulty::Hard), SongDifficulty::Hard);

        let statuses = [Clear, Unplayed, FullCombo, Unplayed, Unplayed, Unplayed];
        assert_eq!(select_multi_difficulty(&statuses, SongDifficulty::Hard), SongDifficulty::Normal);

        let statuses = [AllPerfect; 6];
        assert_eq!(select_multi_difficulty(&statuses, SongDifficulty::Expert), SongDifficulty::Expert);
    }

    #[test]
    fn test_status_from_frame() {
        use SongStatus::*;
        let expected = vec![AllPerfect, FullCombo, Clear, Unplayed, Clear, Unplayed];
        let (frame, state) = lobby_frame(&expected);
        assert_eq!(find_multi_song_status(&frame, &state).unwrap(), expected);
    }

    #[test]
    fn test_missing_status_point() {
        let state = StateTemplate::new(MULTI_PLAY_START, RgbImage::new(1, 1), Point::new(0, 0));
        let frame = Frame::new(RgbImage::new(10, 10), Instant::now());
        assert!(find_multi_song_status(&frame, &state).is_err());
    }

    #[test]
    fn test_solo_difficulty() {
        let mut image = RgbImage::new(20, 20);
        image.put_pixel(5, 5, SongDifficulty::Expert.color().into());
        let state = StateTemplate::new(SOLO_PLAY_START, RgbImage::new(1, 1), Point::new(0, 0))
            .with_point(DIFFICULTY_POINT, Point::new(5, 5));
        let frame = Frame::new(image, Instant::now());
        assert_eq!(find_solo_difficulty(&frame, &state).unwrap(), Some(SongDifficulty::Expert));
    }

    #[test]
    fn test_navigator_taps_difficulty_then_start() {
        use SongStatus::*;
        let (frame, state) = lobby_frame(&[Clear, Unplayed, Clear, Unplayed, Unplayed, Unplayed]);
        let controller = TouchController::new(LoggingTouchSink::new(2));
        let navigator = MenuNavigator::new(controller.clone(), SongDifficulty::Hard, Duration::ZERO);

        let action = navigator.act(&frame, &state).unwrap();
        assert_eq!(action, MenuAction::Started(SongDifficulty::Normal));

        let downs: Vec<_> = controller.with_sink(|sink| {
            sink.events()
                .iter()
                .filter(|e| e.action == TouchAction::Down)
                .filter_map(|e| e.pos)
                .collect()
        });
        assert_eq!(downs, vec![Point::new(30, 70), Point::new(190, 90)]);
        assert_eq!(controller.free_slots(), 2);
    }
}
