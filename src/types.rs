// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// How many generations below a requested image a cascade build descends.
///
/// In config files and on the CLI a negative number (usually `-1`) means
/// "no limit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum CascadeDepth {
    #[default]
    Unlimited,
    Limited(u32),
}

impl CascadeDepth {
    /// Whether at least one more generation may be visited.
    pub fn allows_descent(self) -> bool {
        !matches!(self, CascadeDepth::Limited(0))
    }

    /// Budget left for the next generation down.
    pub fn decrement(self) -> Self {
        match self {
            CascadeDepth::Unlimited => CascadeDepth::Unlimited,
            CascadeDepth::Limited(n) => CascadeDepth::Limited(n.saturating_sub(1)),
        }
    }

    /// `Unlimited` ranks above every limited budget.
    pub fn exceeds(self, other: CascadeDepth) -> bool {
        match (self, other) {
            (CascadeDepth::Unlimited, CascadeDepth::Unlimited) => false,
            (CascadeDepth::Unlimited, CascadeDepth::Limited(_)) => true,
            (CascadeDepth::Limited(_), CascadeDepth::Unlimited) => false,
            (CascadeDepth::Limited(a), CascadeDepth::Limited(b)) => a > b,
        }
    }
}

impl From<i64> for CascadeDepth {
    fn from(n: i64) -> Self {
        if n < 0 {
            CascadeDepth::Unlimited
        } else {
            CascadeDepth::Limited(u32::try_from(n).unwrap_or(u32::MAX))
        }
    }
}

impl FromStr for CascadeDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(CascadeDepth::Unlimited);
        }
        s.parse::<i64>()
            .map(CascadeDepth::from)
            .map_err(|_| format!("invalid cascade depth: {s} (expected an integer or \"unlimited\")"))
    }
}

impl fmt::Display for CascadeDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeDepth::Unlimited => f.write_str("unlimited"),
            CascadeDepth::Limited(n) => write!(f, "{n}"),
        }
    }
}

/// Stage of a step's life at which a build error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Waiting for parent steps.
    Wait,
    /// Handing the job to the dispatcher.
    Dispatch,
    /// Running the build driver.
    Execute,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Wait => f.write_str("wait"),
            BuildStage::Dispatch => f.write_str("dispatch"),
            BuildStage::Execute => f.write_str("execute"),
        }
    }
}

/// Which planner turns a build request into steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanKind {
    /// Only the requested versions; descendants are left alone.
    #[default]
    Single,
    /// Requested versions plus descendants down to the given depth.
    Cascade(CascadeDepth),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_depth_is_unlimited() {
        assert_eq!(CascadeDepth::from(-1), CascadeDepth::Unlimited);
        assert_eq!("-5".parse::<CascadeDepth>().unwrap(), CascadeDepth::Unlimited);
        assert_eq!("unlimited".parse::<CascadeDepth>().unwrap(), CascadeDepth::Unlimited);
        assert_eq!("2".parse::<CascadeDepth>().unwrap(), CascadeDepth::Limited(2));
        assert!("two".parse::<CascadeDepth>().is_err());
    }

    #[test]
    fn depth_budget_runs_out() {
        let d = CascadeDepth::Limited(1);
        assert!(d.allows_descent());
        assert!(!d.decrement().allows_descent());
        assert_eq!(d.decrement().decrement(), CascadeDepth::Limited(0));
        assert!(CascadeDepth::Unlimited.decrement().allows_descent());
    }

    #[test]
    fn unlimited_outranks_limited() {
        assert!(CascadeDepth::Unlimited.exceeds(CascadeDepth::Limited(100)));
        assert!(!CascadeDepth::Limited(100).exceeds(CascadeDepth::Unlimited));
        assert!(CascadeDepth::Limited(3).exceeds(CascadeDepth::Limited(2)));
        assert!(!CascadeDepth::Unlimited.exceeds(CascadeDepth::Unlimited));
    }
}
