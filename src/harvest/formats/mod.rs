//! Harvest kind implementations.
//!
//! Each submodule implements [`HarvestFormat`] for one analytics endpoint:
//! - `agent_status` - per-agent status changes for one day
//! - `user_status` - per-user status metrics in 30 minute intervals
//! - `call_details` - one row per call session

mod agent_status;
mod call_details;
mod user_status;

pub use agent_status::AgentStatus;
pub use call_details::CallDetails;
pub use user_status::UserStatus;

use crate::harvest::traits::HarvestFormat;

/// The harvest kinds known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarvestKind {
    AgentStatus,
    UserStatus,
    CallDetails,
}

impl HarvestKind {
    pub fn all() -> [HarvestKind; 3] {
        [
            HarvestKind::AgentStatus,
            HarvestKind::UserStatus,
            HarvestKind::CallDetails,
        ]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(&self) -> &'static str {
        self.format().name()
    }

    pub fn format(&self) -> &'static dyn HarvestFormat {
        match self {
            HarvestKind::AgentStatus => &AgentStatus,
            HarvestKind::UserStatus => &UserStatus,
            HarvestKind::CallDetails => &CallDetails,
        }
    }
}

impl std::fmt::Display for HarvestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for HarvestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            let known: Vec<_> = Self::all().iter().map(|k| k.name()).collect();
            format!("unknown harvest kind '{}' (known: {})", s, known.join(", "))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in HarvestKind::all() {
            assert_eq!(kind.name().parse::<HarvestKind>(), Ok(kind));
        }
        assert!("warehouse".parse::<HarvestKind>().is_err());
    }
}
