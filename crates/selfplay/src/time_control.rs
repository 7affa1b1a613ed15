//! Time controls and per-side clocks.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shakmaty::Color;
use thiserror::Error;
use uci::GoOptions;

/// Wait ceiling for searches bounded by depth or nodes rather than time.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' (expected 'movetime <ms>', 'depth <n>', 'nodes <n>' or '<base>+<inc>' in seconds)")]
pub struct ParseTimeControlError(String);

/// How long an engine may think.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeControl {
    /// Fixed time per move, in milliseconds.
    MoveTime(u64),
    /// Fixed search depth.
    Depth(u32),
    /// Fixed node budget.
    Nodes(u64),
    /// Game clock with increment, both in milliseconds.
    Clock { base_ms: u64, increment_ms: u64 },
}

impl Default for TimeControl {
    fn default() -> Self {
        TimeControl::MoveTime(100)
    }
}

impl TimeControl {
    /// Value of the PGN `TimeControl` tag.
    pub fn pgn_tag(&self) -> String {
        match self {
            TimeControl::Clock {
                base_ms,
                increment_ms,
            } => format!("{}+{}", seconds(*base_ms), seconds(*increment_ms)),
            // Unknown/other time control per the PGN standard
            _ => "-".to_string(),
        }
    }
}

fn seconds(ms: u64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        format!("{}", ms as f64 / 1000.0)
    }
}

fn parse_seconds(s: &str) -> Option<u64> {
    let secs: f64 = s.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0).round() as u64)
}

impl FromStr for TimeControl {
    type Err = ParseTimeControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeControlError(s.to_string());
        let parts: Vec<&str> = s.split_whitespace().collect();

        let tc = match parts.as_slice() {
            ["movetime", ms] => TimeControl::MoveTime(ms.parse().map_err(|_| err())?),
            ["depth", d] => TimeControl::Depth(d.parse().map_err(|_| err())?),
            ["nodes", n] => TimeControl::Nodes(n.parse().map_err(|_| err())?),
            ["tc", clock] | [clock] => {
                let (base, inc) = clock.split_once('+').ok_or_else(err)?;
                TimeControl::Clock {
                    base_ms: parse_seconds(base).ok_or_else(err)?,
                    increment_ms: parse_seconds(inc).ok_or_else(err)?,
                }
            }
            _ => return Err(err()),
        };

        let empty = match tc {
            TimeControl::MoveTime(ms) => ms == 0,
            TimeControl::Depth(d) => d == 0,
            TimeControl::Nodes(n) => n == 0,
            TimeControl::Clock { base_ms, .. } => base_ms == 0,
        };
        if empty {
            return Err(err());
        }
        Ok(tc)
    }
}

impl TryFrom<String> for TimeControl {
    type Error = ParseTimeControlError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeControl> for String {
    fn from(tc: TimeControl) -> Self {
        tc.to_string()
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeControl::MoveTime(ms) => write!(f, "movetime {}", ms),
            TimeControl::Depth(d) => write!(f, "depth {}", d),
            TimeControl::Nodes(n) => write!(f, "nodes {}", n),
            TimeControl::Clock { .. } => f.write_str(&self.pgn_tag()),
        }
    }
}

#[derive(Debug, Clone)]
struct SideClock {
    control: TimeControl,
    /// Only clock controls keep a remaining balance.
    remaining_ms: Option<u64>,
}

impl SideClock {
    fn new(control: TimeControl) -> Self {
        let remaining_ms = match control {
            TimeControl::Clock { base_ms, .. } => Some(base_ms),
            _ => None,
        };
        Self {
            control,
            remaining_ms,
        }
    }

    fn increment_ms(&self) -> Option<u64> {
        match self.control {
            TimeControl::Clock { increment_ms, .. } => Some(increment_ms),
            _ => None,
        }
    }
}

/// Clocks for both sides of one game.
///
/// Each side may run under its own time control.
#[derive(Debug, Clone)]
pub struct Clocks {
    white: SideClock,
    black: SideClock,
}

impl Clocks {
    pub fn new(white: TimeControl, black: TimeControl) -> Self {
        Self {
            white: SideClock::new(white),
            black: SideClock::new(black),
        }
    }

    fn side(&self, color: Color) -> &SideClock {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    fn side_mut(&mut self, color: Color) -> &mut SideClock {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    /// Time left on a side's clock; `None` when it does not play on a clock.
    pub fn remaining(&self, color: Color) -> Option<Duration> {
        self.side(color).remaining_ms.map(Duration::from_millis)
    }

    /// Search limits for the side to move.
    ///
    /// When the opponent plays without a clock, the mover's own figures are
    /// reported for both sides.
    pub fn go_options(&self, mover: Color) -> GoOptions {
        let own = self.side(mover);
        match own.control {
            TimeControl::MoveTime(ms) => GoOptions {
                movetime: Some(ms),
                ..Default::default()
            },
            TimeControl::Depth(d) => GoOptions {
                depth: Some(d),
                ..Default::default()
            },
            TimeControl::Nodes(n) => GoOptions {
                nodes: Some(n),
                ..Default::default()
            },
            TimeControl::Clock { .. } => {
                let time = |c: Color| self.side(c).remaining_ms.or(own.remaining_ms);
                let inc = |c: Color| self.side(c).increment_ms().or(own.increment_ms());
                GoOptions {
                    wtime: time(Color::White),
                    btime: time(Color::Black),
                    winc: inc(Color::White),
                    binc: inc(Color::Black),
                    ..Default::default()
                }
            }
        }
    }

    /// How long to wait for the side to move before declaring it unresponsive.
    pub fn move_timeout(&self, mover: Color, margin: Duration) -> Duration {
        let side = self.side(mover);
        let budget = match side.control {
            TimeControl::MoveTime(ms) => Duration::from_millis(ms),
            TimeControl::Clock { .. } => Duration::from_millis(side.remaining_ms.unwrap_or(0)),
            TimeControl::Depth(_) | TimeControl::Nodes(_) => DEFAULT_SEARCH_TIMEOUT,
        };
        budget + margin
    }

    /// Charge a move's think time to the mover.
    ///
    /// Returns `false` when the mover's flag fell. The increment is only
    /// credited for moves made in time.
    pub fn charge(&mut self, mover: Color, think: Duration) -> bool {
        let side = self.side_mut(mover);
        let increment = side.increment_ms().unwrap_or(0);
        match side.remaining_ms.as_mut() {
            Some(remaining) => {
                let spent = think.as_millis() as u64;
                if spent > *remaining {
                    *remaining = 0;
                    false
                } else {
                    *remaining = *remaining - spent + increment;
                    true
                }
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            "movetime 500".parse::<TimeControl>().unwrap(),
            TimeControl::MoveTime(500)
        );
        assert_eq!(
            "depth 8".parse::<TimeControl>().unwrap(),
            TimeControl::Depth(8)
        );
        assert_eq!(
            "nodes 20000".parse::<TimeControl>().unwrap(),
            TimeControl::Nodes(20000)
        );
        let clock = TimeControl::Clock {
            base_ms: 40_000,
            increment_ms: 400,
        };
        assert_eq!("40+0.4".parse::<TimeControl>().unwrap(), clock);
        assert_eq!("tc 40+0.4".parse::<TimeControl>().unwrap(), clock);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "movetime", "movetime fast", "depth 0", "40", "0+1", "-5+1", "40+x"] {
            assert!(bad.parse::<TimeControl>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_display_parses_back() {
        for tc in [
            TimeControl::MoveTime(250),
            TimeControl::Depth(12),
            TimeControl::Nodes(5000),
            TimeControl::Clock {
                base_ms: 2_500,
                increment_ms: 50,
            },
        ] {
            assert_eq!(tc.to_string().parse::<TimeControl>().unwrap(), tc);
        }
    }

    #[test]
    fn test_pgn_tag() {
        let clock = TimeControl::Clock {
            base_ms: 60_000,
            increment_ms: 0,
        };
        assert_eq!(clock.pgn_tag(), "60+0");
        assert_eq!(TimeControl::Depth(3).pgn_tag(), "-");
    }

    #[test]
    fn test_deserialize_from_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            tc: TimeControl,
        }
        let w: Wrapper = toml::from_str("tc = \"movetime 300\"").unwrap();
        assert_eq!(w.tc, TimeControl::MoveTime(300));
        assert!(toml::from_str::<Wrapper>("tc = \"slow\"").is_err());
    }

    #[test]
    fn test_clock_go_options_and_charge() {
        let tc = TimeControl::Clock {
            base_ms: 1_000,
            increment_ms: 100,
        };
        let mut clocks = Clocks::new(tc, tc);

        assert!(clocks.charge(Color::White, Duration::from_millis(300)));
        let go = clocks.go_options(Color::Black);
        assert_eq!(go.wtime, Some(800));
        assert_eq!(go.btime, Some(1_000));
        assert_eq!(go.winc, Some(100));

        assert!(!clocks.charge(Color::Black, Duration::from_millis(1_001)));
        assert_eq!(clocks.remaining(Color::Black), Some(Duration::ZERO));
    }

    #[test]
    fn test_mixed_controls() {
        let clock = TimeControl::Clock {
            base_ms: 5_000,
            increment_ms: 0,
        };
        let clocks = Clocks::new(clock, TimeControl::Depth(4));

        let go = clocks.go_options(Color::White);
        assert_eq!(go.wtime, Some(5_000));
        assert_eq!(go.btime, Some(5_000));
        assert_eq!(clocks.go_options(Color::Black).depth, Some(4));
        assert_eq!(clocks.remaining(Color::Black), None);
    }

    #[test]
    fn test_move_timeout() {
        let margin = Duration::from_millis(500);
        let clocks = Clocks::new(TimeControl::MoveTime(200), TimeControl::Nodes(100));
        assert_eq!(
            clocks.move_timeout(Color::White, margin),
            Duration::from_millis(700)
        );
        assert_eq!(
            clocks.move_timeout(Color::Black, margin),
            DEFAULT_SEARCH_TIMEOUT + margin
        );
    }
}
