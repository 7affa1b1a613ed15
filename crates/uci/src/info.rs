//! `info` lines: search progress an engine reports while thinking.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};
use std::str::FromStr;

/// Evaluation from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Score {
    /// Centipawns.
    Cp(i32),
    /// Mate in N moves; negative when the engine is getting mated.
    Mate(i32),
}

impl Score {
    fn to_uci(self) -> String {
        match self {
            Score::Cp(cp) => format!("cp {}", cp),
            Score::Mate(m) => format!("mate {}", m),
        }
    }
}

impl fmt::Display for Score {
    /// Pawn units, e.g. `+0.35` or `-M3`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Cp(cp) => write!(f, "{:+.2}", *cp as f64 / 100.0),
            Score::Mate(m) if *m < 0 => write!(f, "-M{}", m.unsigned_abs()),
            Score::Mate(m) => write!(f, "+M{}", m),
        }
    }
}

/// A score that is only a bound, from a fail-high or fail-low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    Lower,
    Upper,
}

impl Bound {
    fn as_str(self) -> &'static str {
        match self {
            Bound::Lower => "lowerbound",
            Bound::Upper => "upperbound",
        }
    }
}

/// One `info` line. Fields the engine did not send are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,
    /// Line number when the engine searches several lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipv: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<Bound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nps: Option<u64>,
    /// Milliseconds searched so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    /// Hash usage in permille.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashfull: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currmove: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pv: Vec<String>,
    /// Free text; always the last field on the line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
}

const KEYWORDS: &[&str] = &[
    "depth",
    "seldepth",
    "multipv",
    "score",
    "nodes",
    "nps",
    "time",
    "hashfull",
    "currmove",
    "currmovenumber",
    "tbhits",
    "cpuload",
    "pv",
    "refutation",
    "currline",
    "string",
];

fn number<'a, T, I>(tokens: &mut I) -> Option<T>
where
    T: FromStr,
    I: Iterator<Item = &'a str>,
{
    tokens.next().and_then(|t| t.parse().ok())
}

impl EngineInfo {
    /// Whether the line carries an evaluation at a known depth.
    pub fn has_score(&self) -> bool {
        self.depth.is_some() && self.score.is_some()
    }

    /// Parse an `info ...` line. Unknown fields are skipped; a field with
    /// an unparseable value is left unset.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().peekable();
        if tokens.next() != Some("info") {
            return None;
        }

        let mut info = EngineInfo::default();
        while let Some(key) = tokens.next() {
            match key {
                "depth" => info.depth = number(&mut tokens),
                "seldepth" => info.seldepth = number(&mut tokens),
                "multipv" => info.multipv = number(&mut tokens),
                "nodes" => info.nodes = number(&mut tokens),
                "nps" => info.nps = number(&mut tokens),
                "time" => info.time = number(&mut tokens),
                "hashfull" => info.hashfull = number(&mut tokens),
                "currmove" => info.currmove = tokens.next().map(str::to_string),
                "score" => {
                    info.score = match (tokens.next(), number(&mut tokens)) {
                        (Some("cp"), Some(v)) => Some(Score::Cp(v)),
                        (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                        _ => None,
                    };
                    info.bound = match tokens.peek() {
                        Some(&"lowerbound") => Some(Bound::Lower),
                        Some(&"upperbound") => Some(Bound::Upper),
                        _ => None,
                    };
                    if info.bound.is_some() {
                        tokens.next();
                    }
                }
                "pv" => {
                    info.pv.clear();
                    while let Some(mv) = tokens.next_if(|t| !KEYWORDS.contains(t)) {
                        info.pv.push(mv.to_string());
                    }
                }
                "string" => {
                    info.string = Some(tokens.by_ref().collect::<Vec<_>>().join(" "));
                }
                _ => {}
            }
        }
        Some(info)
    }

    /// Render as an `info` line.
    pub fn to_uci(&self) -> String {
        let mut out = String::from("info");
        // Writing to a String cannot fail
        let leading = [
            ("depth", self.depth),
            ("seldepth", self.seldepth),
            ("multipv", self.multipv),
        ];
        for (key, value) in leading {
            if let Some(v) = value {
                let _ = write!(out, " {} {}", key, v);
            }
        }
        if let Some(score) = self.score {
            let _ = write!(out, " score {}", score.to_uci());
            if let Some(bound) = self.bound {
                let _ = write!(out, " {}", bound.as_str());
            }
        }
        let counters = [
            ("nodes", self.nodes),
            ("nps", self.nps),
            ("time", self.time),
            ("hashfull", self.hashfull.map(u64::from)),
        ];
        for (key, value) in counters {
            if let Some(v) = value {
                let _ = write!(out, " {} {}", key, v);
            }
        }
        if let Some(mv) = &self.currmove {
            let _ = write!(out, " currmove {}", mv);
        }
        if !self.pv.is_empty() {
            let _ = write!(out, " pv {}", self.pv.join(" "));
        }
        if let Some(text) = &self.string {
            let _ = write!(out, " string {}", text);
        }
        out
    }
}

/// Fluent construction of an [`EngineInfo`], for engines reporting progress.
#[derive(Default)]
pub struct InfoBuilder {
    info: EngineInfo,
}

impl InfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.info.depth = Some(depth);
        self
    }

    pub fn multipv(mut self, line: u32) -> Self {
        self.info.multipv = Some(line);
        self
    }

    pub fn score_cp(mut self, cp: i32) -> Self {
        self.info.score = Some(Score::Cp(cp));
        self
    }

    pub fn score_mate(mut self, moves: i32) -> Self {
        self.info.score = Some(Score::Mate(moves));
        self
    }

    pub fn nodes(mut self, nodes: u64) -> Self {
        self.info.nodes = Some(nodes);
        self
    }

    pub fn time(mut self, ms: u64) -> Self {
        self.info.time = Some(ms);
        self
    }

    pub fn pv(mut self, moves: Vec<String>) -> Self {
        self.info.pv = moves;
        self
    }

    pub fn build(self) -> EngineInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_display() {
        assert_eq!(Score::Cp(35).to_string(), "+0.35");
        assert_eq!(Score::Cp(-120).to_string(), "-1.20");
        assert_eq!(Score::Mate(3).to_string(), "+M3");
        assert_eq!(Score::Mate(-2).to_string(), "-M2");
        assert_eq!(Score::Mate(i32::MIN).to_string(), "-M2147483648");
    }

    #[test]
    fn parse_typical_search_line() {
        let info = EngineInfo::parse(
            "info depth 12 seldepth 17 multipv 1 score cp 30 nodes 125000 nps 500000 time 250 pv e2e4 e7e5 g1f3",
        )
        .unwrap();

        assert_eq!(info.depth, Some(12));
        assert_eq!(info.seldepth, Some(17));
        assert_eq!(info.multipv, Some(1));
        assert_eq!(info.score, Some(Score::Cp(30)));
        assert_eq!(info.bound, None);
        assert_eq!(info.nodes, Some(125000));
        assert_eq!(info.nps, Some(500000));
        assert_eq!(info.time, Some(250));
        assert_eq!(info.pv, vec!["e2e4", "e7e5", "g1f3"]);
        assert!(info.has_score());
    }

    #[test]
    fn parse_bound_and_mate() {
        let info = EngineInfo::parse("info depth 20 score mate -3 upperbound pv e2e4").unwrap();
        assert_eq!(info.score, Some(Score::Mate(-3)));
        assert_eq!(info.bound, Some(Bound::Upper));
        assert_eq!(info.pv, vec!["e2e4"]);

        let info = EngineInfo::parse("info score cp 15 lowerbound depth 4").unwrap();
        assert_eq!(info.bound, Some(Bound::Lower));
        assert_eq!(info.depth, Some(4));
    }

    #[test]
    fn pv_stops_at_next_keyword() {
        let info = EngineInfo::parse("info pv d2d4 d7d5 tbhits 0 hashfull 12").unwrap();
        assert_eq!(info.pv, vec!["d2d4", "d7d5"]);
        assert_eq!(info.hashfull, Some(12));
    }

    #[test]
    fn parse_string_consumes_rest_of_line() {
        let info = EngineInfo::parse("info depth 3 string book move played").unwrap();
        assert_eq!(info.depth, Some(3));
        assert_eq!(info.string.as_deref(), Some("book move played"));
        assert!(!info.has_score());
    }

    #[test]
    fn parse_skips_bad_values_and_unknown_fields() {
        let info = EngineInfo::parse("info depth x cpuload 400 wdl 300 400 300 nodes 9").unwrap();
        assert_eq!(info.depth, None);
        assert_eq!(info.nodes, Some(9));
    }

    #[test]
    fn parse_rejects_other_lines() {
        assert!(EngineInfo::parse("bestmove e2e4").is_none());
        assert!(EngineInfo::parse("information depth 3").is_none());
    }

    #[test]
    fn builder_renders_and_reparses() {
        let info = InfoBuilder::new()
            .depth(10)
            .score_mate(2)
            .nodes(50000)
            .pv(vec!["e2e4".to_string(), "e7e5".to_string()])
            .build();

        let line = info.to_uci();
        assert_eq!(line, "info depth 10 score mate 2 nodes 50000 pv e2e4 e7e5");
        assert_eq!(EngineInfo::parse(&line), Some(info));
    }

    #[test]
    fn serializes_only_present_fields() {
        let info = InfoBuilder::new().depth(9).score_cp(20).build();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json, serde_json::json!({ "depth": 9, "score": { "cp": 20 } }));
    }
}
