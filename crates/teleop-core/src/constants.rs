use std::time::Duration;

pub const PHYSICS_HZ: u32 = 60;
pub const STATE_HZ: u32 = 30;
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

pub const CTRL_HOLD: Duration = Duration::from_millis(200);
pub const CTRL_DAMP: Duration = Duration::from_secs(1);

pub const MAX_SPEED: f64 = 20.0;
pub const MAX_ACCEL: f64 = 9.0;
pub const BRAKE_DECEL: f64 = 14.0;
pub const COAST_DECEL: f64 = 2.0;
pub const IDLE_DECEL: f64 = 1.5;

pub const YAW_RATE_MAX: f64 = 2.5;
pub const YAW_SLEW: f64 = 6.0;
pub const ANGULAR_DAMP: f64 = 4.0;

/// Snap-to-zero threshold for velocity/yaw-rate integration.
pub const EPSILON: f64 = 1e-3;

pub const HEARTBEAT_LOST_AGE: Duration = Duration::from_millis(3000);
pub const CTRL_STALE_WARN_AGE: Duration = Duration::from_millis(400);

pub fn ctrl_timeout() -> Duration {
    CTRL_HOLD + CTRL_DAMP
}
