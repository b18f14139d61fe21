use serde::{Deserialize, Serialize};

use crate::Placement;

/// Admission policy for one axis of a placement (world or interior).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneFilter {
    /// Every value is admitted.
    #[default]
    Any,
    /// Only the entity's own current value is admitted.
    Same,
    /// Only the listed values are admitted.
    Only(Vec<i32>),
    /// Every value except the listed ones is admitted.
    AllExcept(Vec<i32>),
}

impl ZoneFilter {
    /// Does this filter, attached to an entity whose value is `own`, admit `observer`?
    pub fn admits(&self, own: i32, observer: i32) -> bool {
        match self {
            Self::Any => true,
            Self::Same => own == observer,
            Self::Only(list) => list.contains(&observer),
            Self::AllExcept(list) => !list.contains(&observer),
        }
    }
}

/// World and interior policy deciding who may perceive an entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VisibilityRules {
    pub worlds: ZoneFilter,
    pub interiors: ZoneFilter,
}

impl VisibilityRules {
    /// Visible from any world and interior.
    pub fn everywhere() -> Self {
        Self::default()
    }

    /// Vehicles: same world, any interior.
    pub fn vehicle() -> Self {
        Self {
            worlds: ZoneFilter::Same,
            interiors: ZoneFilter::Any,
        }
    }

    /// Map objects: same world and same interior.
    pub fn object() -> Self {
        Self {
            worlds: ZoneFilter::Same,
            interiors: ZoneFilter::Same,
        }
    }

    pub fn admits(&self, own: &Placement, observer: &Placement) -> bool {
        self.worlds.admits(own.world, observer.world)
            && self.interiors.admits(own.interior, observer.interior)
    }
}
