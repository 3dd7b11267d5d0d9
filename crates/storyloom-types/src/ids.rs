//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every entity touched by the scheduler has a strongly-typed ID to prevent
//! accidental mixing of identifiers at compile time. All IDs use UUID v7
//! (time-ordered) so the owning store can index them efficiently.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a character in the story world.
    CharacterId
}

define_id! {
    /// Unique identifier for an adventure (one playthrough of a story).
    AdventureId
}

define_id! {
    /// Unique identifier for a generated scene.
    SceneId
}

define_id! {
    /// Unique identifier for one generation cycle (one planning pass).
    ///
    /// The simulation plan cache is keyed by this ID so that re-entering a
    /// cycle never recomputes the plan.
    CycleId
}

define_id! {
    /// Unique identifier for a pending cross-character event.
    CharacterEventId
}
