/*!
Character controller settings and tolerances.

These constants centralize the defaults used by the sweep test, the
touched-geometry cache and the manager's interaction pass. Descriptors and
the manager configuration start from these values; override them per
controller where needed.

Notes
- Distances are in world units, time in seconds.
- Favor practical world-space tolerances over machine epsilon for robust behavior.
*/

/// Maximum number of iterations of one sweep pass (up, side or down).
pub const MAX_ITER: u32 = 10;

/// Default collision skin kept between the controller and its surroundings.
/// Too large creates visible gaps; too small risks jitter on contact.
pub const DEFAULT_CONTACT_OFFSET: f32 = 0.1;

/// Default auto-step height.
pub const DEFAULT_STEP_OFFSET: f32 = 0.5;

/// Default slope limit in radians (45 degrees). Zero disables slope handling.
pub const DEFAULT_SLOPE_LIMIT: f32 = std::f32::consts::FRAC_PI_4;

/// Growth factor applied to the temporal box when caching touched geometry.
/// Values below 1.0 are clamped to 1.0.
pub const DEFAULT_VOLUME_GROWTH: f32 = 1.5;

/// Default density of the kinematic proxy actor.
pub const DEFAULT_PROXY_DENSITY: f32 = 10.0;

/// Default scale coefficient applied to the proxy geometry.
pub const DEFAULT_SCALE_COEFF: f32 = 0.8;

/// Maximum overlap-recovery speed between two controllers (units per second).
/// Limits how fast overlapping controllers are pushed apart to avoid visible popping.
pub const MAX_OVERLAP_RECOVER: f32 = 4.0;

/// Default maximum triangle edge length when tessellation is enabled.
pub const DEFAULT_MAX_EDGE_LENGTH: f32 = 1.0;

/// Maximum recursion depth of triangle tessellation.
pub const MAX_TESSELLATION_DEPTH: u32 = 8;

/// Squared length under which a vector is considered zero for arbitrary up directions.
pub const ALMOST_ZERO_SQ: f32 = 1.0e-7;

/// Extra push applied when resolving an initial overlap with the MTD.
pub const MTD_EPSILON: f32 = 1.0e-3;

/// Length of the downward ray used to detect an obstacle added or moved under a controller,
/// as a multiple of the center-to-foot distance (half height plus contact offset).
pub const OBSTACLE_RAY_SCALE: f32 = 1.1;

/// Number of radial subdivisions used when tessellating cylinders and cones.
pub const ROUND_SHAPE_SUBDIVISIONS: u32 = 16;
