use super::{Mutator, Mutators};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upgrade => write!(f, "upgrade"),
            Direction::Downgrade => write!(f, "downgrade"),
        }
    }
}

/// How to bring a database from one effective version to another.
#[derive(Debug, Clone)]
pub enum MigrationPlan {
    /// Already at the requested version.
    Noop,
    /// Run the steps in order, each in its own version-change transaction.
    Steps {
        direction: Direction,
        steps: Vec<Mutator>,
    },
    /// No contiguous chain exists: drop everything and run the initializer
    /// of the requested version.
    Reinitialize,
}

impl MigrationPlan {
    pub fn step_versions(&self) -> Vec<u64> {
        match self {
            MigrationPlan::Steps { steps, .. } => steps.iter().map(|m| m.version).collect(),
            _ => Vec::new(),
        }
    }
}

/// Computes migration plans from registered mutators.
pub struct MigrationPlanner;

impl MigrationPlanner {
    /// Plans the move from effective version `old` to `new`.
    ///
    /// An upgrade needs the upgraders of `old, old + 1, .., new - 1`; a
    /// downgrade needs the downgraders of `old, old - 1, .., new + 1`. A
    /// missing entry anywhere in that range makes the chain unusable and
    /// the plan falls back to reinitialization.
    pub fn plan(mutators: &Mutators, old: u64, new: u64) -> MigrationPlan {
        if old == new {
            return MigrationPlan::Noop;
        }

        let direction = if new > old {
            Direction::Upgrade
        } else {
            Direction::Downgrade
        };
        let list = match direction {
            Direction::Upgrade => &mutators.upgraders,
            Direction::Downgrade => &mutators.downgraders,
        };
        let entries = list.entries();
        let last_needed = match direction {
            Direction::Upgrade => new - 1,
            Direction::Downgrade => new + 1,
        };

        let mut index = match list.position(old) {
            Ok(index) => index,
            Err(_) => {
                log::debug!("No {}r registered for version {}", direction, old);
                return MigrationPlan::Reinitialize;
            }
        };

        let mut steps = Vec::new();
        let mut expected = old;
        loop {
            let entry = &entries[index];
            if entry.version != expected {
                log::debug!(
                    "Gap in {} chain: expected version {}, found {}",
                    direction,
                    expected,
                    entry.version
                );
                return MigrationPlan::Reinitialize;
            }
            steps.push(entry.clone());
            if entry.version == last_needed {
                return MigrationPlan::Steps { direction, steps };
            }

            match direction {
                Direction::Upgrade => {
                    index += 1;
                    expected += 1;
                    if index >= entries.len() {
                        return MigrationPlan::Reinitialize;
                    }
                }
                Direction::Downgrade => {
                    if index == 0 {
                        return MigrationPlan::Reinitialize;
                    }
                    index -= 1;
                    expected -= 1;
                }
            }
        }
    }
}
