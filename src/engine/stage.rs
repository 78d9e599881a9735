use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline position. A scan's marker names the last stage whose work has
/// been persisted; `Init` means nothing has run yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Recon,
    Email,
    Discovery,
    Analysis,
    Infrastructure,
    Scoring,
    Done,
}

impl Stage {
    pub const ORDER: [Stage; 8] = [
        Stage::Init,
        Stage::Recon,
        Stage::Email,
        Stage::Discovery,
        Stage::Analysis,
        Stage::Infrastructure,
        Stage::Scoring,
        Stage::Done,
    ];

    /// The stage after `self`, or `None` once done.
    pub fn next(self) -> Option<Stage> {
        let i = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(i + 1).copied()
    }

    /// Progress reported once this stage's work is persisted.
    pub fn progress(self) -> u8 {
        match self {
            Stage::Init => 0,
            Stage::Recon => 15,
            Stage::Email => 25,
            Stage::Discovery => 45,
            Stage::Analysis => 65,
            Stage::Infrastructure => 85,
            Stage::Scoring | Stage::Done => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Recon => "recon",
            Stage::Email => "email",
            Stage::Discovery => "discovery",
            Stage::Analysis => "analysis",
            Stage::Infrastructure => "infrastructure",
            Stage::Scoring => "scoring",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ORDER
            .iter()
            .find(|st| st.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown stage '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_follow_the_fixed_order() {
        let mut visited = vec![Stage::Init];
        let mut current = Stage::Init;
        while let Some(next) = current.next() {
            visited.push(next);
            current = next;
        }
        assert_eq!(visited, Stage::ORDER.to_vec());
        assert_eq!(Stage::Done.next(), None);
    }

    #[test]
    fn progress_is_monotonic() {
        let progress: Vec<u8> = Stage::ORDER.iter().map(|s| s.progress()).collect();
        assert_eq!(progress, vec![0, 15, 25, 45, 65, 85, 100, 100]);
    }

    #[test]
    fn parses_its_own_names() {
        for stage in Stage::ORDER {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("teardown".parse::<Stage>().is_err());
    }
}
