use std::collections::BTreeSet;

use shared::domain::MissionId;
use thiserror::Error;

/// Limit applied when a mission entry does not name one.
pub const DEFAULT_TIME_LIMIT_SECONDS: u64 = 10;

/// Longest accepted time limit: one week.
pub const MAX_TIME_LIMIT_SECONDS: u64 = 7 * 24 * 60 * 60;

const DEFAULT_LIMITS: [(u32, u64); 7] = [
    (1, 8),
    (2, 300),
    (3, 300),
    (4, 300),
    (5, 300),
    (6, 30),
    (7, 5),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionSpec {
    pub id: MissionId,
    pub label: String,
    pub time_limit_seconds: u64,
}

impl MissionSpec {
    pub fn new(id: MissionId, time_limit_seconds: u64) -> Self {
        Self {
            id,
            label: default_label(id),
            time_limit_seconds,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

pub fn default_label(id: MissionId) -> String {
    format!("Mission {id}")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("mission registry must contain at least one mission")]
    Empty,
    #[error("mission id 0 is reserved")]
    ZeroId,
    #[error("mission {0} is registered more than once")]
    DuplicateId(MissionId),
    #[error("mission {0} must have a time limit greater than zero")]
    ZeroTimeLimit(MissionId),
    #[error("mission {0} time limit exceeds {MAX_TIME_LIMIT_SECONDS} seconds")]
    TimeLimitTooLarge(MissionId),
}

/// The fixed set of missions for one session, ordered by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionRegistry {
    missions: Vec<MissionSpec>,
}

impl MissionRegistry {
    pub fn new(missions: Vec<MissionSpec>) -> Result<Self, RegistryError> {
        if missions.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = BTreeSet::new();
        for spec in &missions {
            if spec.id.0 == 0 {
                return Err(RegistryError::ZeroId);
            }
            if !seen.insert(spec.id) {
                return Err(RegistryError::DuplicateId(spec.id));
            }
            if spec.time_limit_seconds == 0 {
                return Err(RegistryError::ZeroTimeLimit(spec.id));
            }
            if spec.time_limit_seconds > MAX_TIME_LIMIT_SECONDS {
                return Err(RegistryError::TimeLimitTooLarge(spec.id));
            }
        }
        let mut missions = missions;
        missions.sort_by_key(|spec| spec.id);
        Ok(Self { missions })
    }

    pub fn missions(&self) -> &[MissionSpec] {
        &self.missions
    }

    pub fn get(&self, id: MissionId) -> Option<&MissionSpec> {
        self.missions.iter().find(|spec| spec.id == id)
    }

    pub fn len(&self) -> usize {
        self.missions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }
}

impl Default for MissionRegistry {
    fn default() -> Self {
        Self {
            missions: DEFAULT_LIMITS
                .iter()
                .map(|&(id, limit)| MissionSpec::new(MissionId(id), limit))
                .collect(),
        }
    }
}
