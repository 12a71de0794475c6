/*!
Collision root module.

This module groups the geometric core of the character controllers. Parry
(through rapier3d) answers the narrow-phase queries; everything else is
controller logic. The code is split for clarity:

- types:        math aliases, extended-precision bounds and vector helpers
- settings:     controller defaults and tolerance constants
- swept_volume: capsule and box controller volumes, temporal boxes
- broad:        bounded-volume index and complete box pruning
- distance:     segment and box distance queries, box-box MTD
- touched:      touched-geometry collection and caching
- narrow_phase: sweeps of a volume against touched geometry, penetration recovery
- sweep_test:   the up, side and down passes of a move
*/

pub mod broad;
pub mod distance;
pub mod narrow_phase;
pub mod settings;
pub mod swept_volume;
pub mod touched;
pub mod types;

// Re-export commonly used types and functions.
pub use sweep_test::{
    CctParams, ClimbingMode, CollisionFlag, CollisionFlags, NonWalkableMode, SweepStats,
    SweepTest, SweepTestFlag, SweepTestFlags, TouchedObstacle, TouchedShape,
};
pub use swept_volume::{SweptVolume, VolumeShape};
pub use touched::{UserBox, UserCapsule, UserObject, UserObstacles};
pub use types::{ExtBounds, ExtVec3, Iso, Point3, Quat, Vec3};
