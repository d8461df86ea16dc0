//! Planar vehicle dynamics, integrated at a fixed tick.
//!
//! The step is split into small, independently testable free functions
//! (`effective_command`, `integrate_longitudinal`, `integrate_rotational`,
//! `integrate_pose`) composed by [`VehicleIntegrator::step`].

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::constants::{
    ANGULAR_DAMP, BRAKE_DECEL, COAST_DECEL, CTRL_DAMP, CTRL_HOLD, EPSILON, IDLE_DECEL, MAX_ACCEL,
    MAX_SPEED, PHYSICS_HZ, YAW_RATE_MAX, YAW_SLEW,
};
use crate::model::{ControlSnapshot, Pose, VehicleSnapshot, VehicleState, Velocity};

struct IntegratorInner {
    state: VehicleState,
    estop_active: bool,
    last_dt: f64,
}

/// Owns [`VehicleState`] exclusively; every mutation happens inside one
/// critical section per tick.
pub struct VehicleIntegrator {
    inner: Mutex<IntegratorInner>,
    latest_cmd: Arc<Mutex<Option<ControlSnapshot>>>,
    last_tick: Mutex<Option<Instant>>,
}

impl VehicleIntegrator {
    pub fn new(latest_cmd: Arc<Mutex<Option<ControlSnapshot>>>) -> Self {
        Self {
            inner: Mutex::new(IntegratorInner {
                state: VehicleState::default(),
                estop_active: false,
                last_dt: 1.0 / PHYSICS_HZ as f64,
            }),
            latest_cmd,
            last_tick: Mutex::new(None),
        }
    }

    pub fn trigger_estop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.estop_active = true;
        inner.state.velocity = Velocity::default();
    }

    pub fn clear_estop(&self) {
        self.inner.lock().unwrap().estop_active = false;
    }

    pub fn estop_active(&self) -> bool {
        self.inner.lock().unwrap().estop_active
    }

    /// Read-only copy of the current kinematics, without advancing time.
    pub fn snapshot(&self) -> VehicleSnapshot {
        let inner = self.inner.lock().unwrap();
        let ctrl_age = self
            .latest_cmd
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| Instant::now().saturating_duration_since(c.received_at).as_secs_f64());
        VehicleSnapshot {
            pose: inner.state.pose,
            velocity: inner.state.velocity,
            last_dt: inner.last_dt,
            ctrl_age,
            estop_active: inner.estop_active,
        }
    }

    /// Advance the simulation by one tick. `now` is the current monotonic
    /// time; `dt` is derived from the gap since the previous call.
    pub fn step(&self, now: Instant) -> VehicleSnapshot {
        let dt = {
            let mut last_tick = self.last_tick.lock().unwrap();
            let dt = match *last_tick {
                Some(prev) => {
                    let measured = now.saturating_duration_since(prev).as_secs_f64();
                    if measured > 0.0 {
                        measured
                    } else {
                        1.0 / PHYSICS_HZ as f64
                    }
                }
                None => 1.0 / PHYSICS_HZ as f64,
            };
            *last_tick = Some(now);
            dt
        };

        let cmd = self.latest_cmd.lock().unwrap().clone();
        let ctrl_age = cmd.as_ref().map(|c| now.saturating_duration_since(c.received_at).as_secs_f64());

        let mut inner = self.inner.lock().unwrap();
        let estop_active = inner.estop_active;
        let effective = effective_command(cmd.as_ref(), now, estop_active);

        let vx = integrate_longitudinal(inner.state.velocity.vx, effective.as_ref(), dt);
        let wz = integrate_rotational(inner.state.velocity.wz, effective.as_ref(), dt);
        let pose = integrate_pose(inner.state.pose, vx, wz, dt);

        inner.state.velocity = Velocity { vx, wz };
        inner.state.pose = pose;
        inner.last_dt = dt;

        VehicleSnapshot {
            pose,
            velocity: Velocity { vx, wz },
            last_dt: dt,
            ctrl_age,
            estop_active,
        }
    }
}

/// A command's throttle/steer/brake after staleness damping. `None` means the command (if
/// any) is old enough to be treated as absent.
#[derive(Debug, Clone, Copy, PartialEq)]
struct EffectiveCommand {
    throttle: f64,
    steer: f64,
    brake: f64,
}

fn effective_command(
    cmd: Option<&ControlSnapshot>,
    now: Instant,
    estop_active: bool,
) -> Option<EffectiveCommand> {
    if estop_active {
        // Steer is zeroed here because the estop invariant requires wz == 0
        // on every tick while active, and rotational dynamics target
        // steer * YAW_RATE_MAX.
        return Some(EffectiveCommand { throttle: 0.0, steer: 0.0, brake: 1.0 });
    }

    let cmd = cmd?;
    let age = now.saturating_duration_since(cmd.received_at).as_secs_f64();
    let hold = CTRL_HOLD.as_secs_f64();
    let damp = CTRL_DAMP.as_secs_f64();

    if age <= hold {
        Some(EffectiveCommand { throttle: cmd.throttle, steer: cmd.steer, brake: cmd.brake })
    } else if age <= hold + damp {
        let decay = ((age - hold) / damp).clamp(0.0, 1.0);
        Some(EffectiveCommand {
            throttle: cmd.throttle * (1.0 - decay),
            steer: cmd.steer * (1.0 - decay),
            brake: cmd.brake.max(decay),
        })
    } else {
        None
    }
}

fn integrate_longitudinal(vx: f64, effective: Option<&EffectiveCommand>, dt: f64) -> f64 {
    let mut vx = vx;
    let accel = match effective {
        Some(cmd) => {
            let mut accel = cmd.throttle * MAX_ACCEL;
            if cmd.throttle.abs() < EPSILON {
                accel = if vx.abs() > EPSILON { -COAST_DECEL * vx.signum() } else { 0.0 };
            }
            if cmd.brake > 0.0 && vx.abs() > EPSILON {
                accel -= BRAKE_DECEL * cmd.brake * vx.signum();
            }
            accel
        }
        None => {
            if vx.abs() > EPSILON {
                -IDLE_DECEL * vx.signum()
            } else {
                vx = 0.0;
                0.0
            }
        }
    };

    vx += accel * dt;
    if vx.abs() < EPSILON {
        vx = 0.0;
    }
    vx.clamp(-MAX_SPEED, MAX_SPEED)
}

fn integrate_rotational(wz: f64, effective: Option<&EffectiveCommand>, dt: f64) -> f64 {
    let mut wz = match effective {
        Some(cmd) => {
            let target_wz = cmd.steer * YAW_RATE_MAX;
            let max_delta = YAW_SLEW * dt;
            wz + (target_wz - wz).clamp(-max_delta, max_delta)
        }
        None => wz * (1.0 - (ANGULAR_DAMP * dt).clamp(0.0, 1.0)),
    };

    if wz.abs() < EPSILON {
        wz = 0.0;
    }
    wz.clamp(-YAW_RATE_MAX, YAW_RATE_MAX)
}

fn integrate_pose(pose: Pose, vx: f64, wz: f64, dt: f64) -> Pose {
    let yaw = wrap_yaw(pose.yaw + wz * dt);
    let heading_x = yaw.sin();
    let heading_z = yaw.cos();
    Pose { x: pose.x + vx * heading_x * dt, y: pose.y, z: pose.z + vx * heading_z * dt, yaw }
}

/// Normalize an angle into `(-pi, pi]`.
fn wrap_yaw(angle: f64) -> f64 {
    use std::f64::consts::PI;
    let two_pi = 2.0 * PI;
    let mut wrapped = (angle + PI).rem_euclid(two_pi) - PI;
    if wrapped <= -PI {
        wrapped += two_pi;
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ctrl_timeout;
    use std::time::Duration;

    fn snapshot_with_cmd(throttle: f64, steer: f64, brake: f64, mode: &str) -> Arc<Mutex<Option<ControlSnapshot>>> {
        Arc::new(Mutex::new(Some(ControlSnapshot {
            seq: 1,
            throttle,
            steer,
            brake,
            mode: mode.to_string(),
            received_at: Instant::now(),
            client_timestamp_ms: None,
        })))
    }

    #[test]
    fn no_command_ever_keeps_vehicle_at_rest() {
        let cmd_slot = Arc::new(Mutex::new(None));
        let integrator = VehicleIntegrator::new(cmd_slot);
        let mut now = Instant::now();
        for _ in 0..200 {
            now += Duration::from_millis(16);
            let snap = integrator.step(now);
            assert_eq!(snap.velocity.vx, 0.0);
            assert_eq!(snap.velocity.wz, 0.0);
            assert!(snap.ctrl_age.is_none());
        }
    }

    #[test]
    fn steady_cruise_increases_speed_and_advances_along_z() {
        let cmd_slot = snapshot_with_cmd(0.5, 0.0, 0.0, "arcade");
        let integrator = VehicleIntegrator::new(cmd_slot);
        let mut now = Instant::now();
        let mut last_vx = 0.0;
        for _ in 0..(2 * PHYSICS_HZ) {
            now += Duration::from_millis(1000 / PHYSICS_HZ as u64);
            let snap = integrator.step(now);
            assert!(snap.velocity.vx + 1e-9 >= last_vx, "vx should be non-decreasing while accelerating");
            last_vx = snap.velocity.vx;
        }
        assert!(last_vx > 0.0);
        assert!(last_vx <= MAX_SPEED);
        let snap = integrator.snapshot();
        assert!(snap.pose.x.abs() < 1e-6, "yaw 0 => no lateral motion");
        assert!(snap.pose.z > 0.0, "forward motion advances along +z");
    }

    #[test]
    fn throttle_outside_range_is_clamped_before_use() {
        let cmd_slot = snapshot_with_cmd(5.0, 0.0, 0.0, "arcade");
        // CommandIntake clamps before the integrator ever sees it, but the
        // integrator must not explode even if handed an out-of-range value.
        let integrator = VehicleIntegrator::new(cmd_slot);
        let now = Instant::now() + Duration::from_millis(16);
        let snap = integrator.step(now);
        assert!(snap.velocity.vx <= MAX_SPEED);
    }

    #[test]
    fn command_timeout_decays_then_fully_expires() {
        let cmd_slot = snapshot_with_cmd(0.8, 0.0, 0.0, "arcade");
        let integrator = VehicleIntegrator::new(cmd_slot.clone());
        let t0 = Instant::now();

        // t=0.2s: effective command unchanged (still within CTRL_HOLD).
        let snap = integrator.step(t0 + Duration::from_millis(200));
        assert!(snap.velocity.vx > 0.0);

        // t=0.7s: throttle halved, brake >= 0.5 (inside damping window).
        let cmd = cmd_slot.lock().unwrap().clone().unwrap();
        let age = Duration::from_millis(700).as_secs_f64();
        let decay = ((age - ctrl_timeout().as_secs_f64() + CTRL_DAMP.as_secs_f64()) / CTRL_DAMP.as_secs_f64())
            .clamp(0.0, 1.0);
        let expected_throttle = cmd.throttle * (1.0 - decay);
        assert!(decay >= 0.5 - 1e-9);
        assert!(expected_throttle <= cmd.throttle * 0.5 + 1e-9);

        // t=1.3s: command fully absent; idle decel active eventually brings vx to 0.
        let mut now = t0 + Duration::from_millis(1300);
        let mut last = integrator.step(now);
        for _ in 0..600 {
            now += Duration::from_millis(16);
            last = integrator.step(now);
        }
        assert_eq!(last.velocity.vx, 0.0);
        assert!(last.ctrl_age.unwrap() > ctrl_timeout().as_secs_f64());
    }

    #[test]
    fn replaying_same_seq_does_not_change_integration_beyond_normal_tick() {
        // Applying the same command snapshot twice (same seq) is exactly
        // what happens across two physics ticks when no new ctrl frame
        // arrives in between -- integration proceeds normally, not twice.
        let cmd_slot = snapshot_with_cmd(0.3, 0.0, 0.0, "arcade");
        let integrator = VehicleIntegrator::new(cmd_slot);
        let now = Instant::now() + Duration::from_millis(16);
        let first = integrator.step(now);
        let now2 = now + Duration::from_millis(16);
        let second = integrator.step(now2);
        assert!(second.velocity.vx > first.velocity.vx);
    }

    #[test]
    fn estop_zeroes_velocity_immediately_and_holds_it() {
        let cmd_slot = snapshot_with_cmd(1.0, 1.0, 0.0, "arcade");
        let integrator = VehicleIntegrator::new(cmd_slot.clone());
        let mut now = Instant::now();
        for _ in 0..60 {
            now += Duration::from_millis(16);
            integrator.step(now);
        }
        assert!(integrator.snapshot().velocity.vx > 0.0);

        integrator.trigger_estop();
        let snap = integrator.snapshot();
        assert_eq!(snap.velocity.vx, 0.0);
        assert_eq!(snap.velocity.wz, 0.0);

        // Throttle commands after estop do not move the vehicle.
        *cmd_slot.lock().unwrap() = Some(ControlSnapshot {
            seq: 99,
            throttle: 1.0,
            steer: 1.0,
            brake: 0.0,
            mode: "arcade".to_string(),
            received_at: now,
            client_timestamp_ms: None,
        });
        for _ in 0..120 {
            now += Duration::from_millis(16);
            let snap = integrator.step(now);
            assert_eq!(snap.velocity.vx, 0.0);
            assert_eq!(snap.velocity.wz, 0.0);
            assert!(snap.estop_active);
        }
    }

    #[test]
    fn triggering_estop_twice_is_indistinguishable_from_once() {
        let cmd_slot = snapshot_with_cmd(0.5, 0.0, 0.0, "arcade");
        let integrator = VehicleIntegrator::new(cmd_slot);
        integrator.trigger_estop();
        let after_first = integrator.snapshot();
        integrator.trigger_estop();
        let after_second = integrator.snapshot();
        assert_eq!(after_first.velocity, after_second.velocity);
        assert_eq!(after_first.estop_active, after_second.estop_active);
    }

    #[test]
    fn clear_estop_allows_motion_again() {
        let cmd_slot = snapshot_with_cmd(0.5, 0.0, 0.0, "arcade");
        let integrator = VehicleIntegrator::new(cmd_slot);
        integrator.trigger_estop();
        integrator.clear_estop();
        assert!(!integrator.estop_active());
        let now = Instant::now() + Duration::from_millis(16);
        let snap = integrator.step(now);
        assert!(snap.velocity.vx > 0.0);
    }

    #[test]
    fn yaw_stays_normalized_to_half_open_interval() {
        let cmd_slot = snapshot_with_cmd(0.0, 1.0, 0.0, "arcade");
        let integrator = VehicleIntegrator::new(cmd_slot);
        let mut now = Instant::now();
        for _ in 0..(20 * PHYSICS_HZ) {
            now += Duration::from_millis(1000 / PHYSICS_HZ as u64);
            let snap = integrator.step(now);
            assert!(snap.pose.yaw > -std::f64::consts::PI);
            assert!(snap.pose.yaw <= std::f64::consts::PI);
            assert!(snap.velocity.wz.abs() <= YAW_RATE_MAX + 1e-9);
        }
    }

    #[test]
    fn wrap_yaw_normalizes_boundaries() {
        use std::f64::consts::PI;
        assert!((wrap_yaw(PI) - PI).abs() < 1e-9);
        assert!((wrap_yaw(-PI) - PI).abs() < 1e-9);
        assert!((wrap_yaw(3.0 * PI) - PI).abs() < 1e-9);
        assert!((wrap_yaw(0.0)).abs() < 1e-9);
    }
}
