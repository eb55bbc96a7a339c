//! Ramp partition and jerk-limited length/velocity kinematics.
//!
//! Given a block's entry/cruise/exit velocities, partition its length
//! into head (acceleration), body (cruise), and tail (deceleration)
//! sections. The math is the constant-jerk S-curve formulation: the
//! distance to move between two velocities at jerk J is
//!
//! ```text
//!   L(v0, v1) = (v0 + v1) · √(|v1 − v0| / J)
//! ```
//!
//! and the two inverse problems (`target_velocity`, `meet_velocity`) are
//! solved by bounded Newton–Raphson iterations on the rearranged jerk
//! form `J = (v1 − v0)(v1 + v0)² / L²`, which resolves quickly where the
//! length form graphs near-vertical.

use crate::buffer::MoveBuffer;
use crate::{
    fp_not_zero, fp_zero, EPSILON, MIN_SEGMENT_TIME_PLUS_MARGIN, NOM_SEGMENT_TIME,
};

/// Cached jerk-derived terms for one block.
#[derive(Debug, Clone, Copy)]
pub struct JerkTerms {
    pub jerk: f64,
    pub recip_jerk: f64,
    pub cbrt_jerk: f64,
}

impl JerkTerms {
    pub fn new(jerk: f64) -> Self {
        Self {
            jerk,
            recip_jerk: 1.0 / jerk,
            cbrt_jerk: jerk.cbrt(),
        }
    }
}

impl MoveBuffer {
    /// Jerk terms cached in the buffer at admission.
    pub fn jerk_terms(&self) -> JerkTerms {
        JerkTerms {
            jerk: self.jerk,
            recip_jerk: self.recip_jerk,
            cbrt_jerk: self.cbrt_jerk,
        }
    }
}

/// Distance required to move between `v0` and `v1` at the block's jerk.
pub fn target_length(v0: f64, v1: f64, jt: &JerkTerms) -> f64 {
    (v0 + v1) * ((v1 - v0).abs() * jt.recip_jerk).sqrt()
}

/// Velocity achievable accelerating from `v0` over `length`.
///
/// Newton–Raphson on `Z(v) = (v − v0)(v + v0)² / L² − J`, which resolves
/// in two iterations from the estimate below (the L-based form graphs
/// near-vertical and converges poorly).
pub fn target_velocity(v0: f64, length: f64, jt: &JerkTerms) -> f64 {
    if length <= 0.0 {
        return v0;
    }
    // 0 iterations: a reasonable estimate, exact when v0 is zero.
    let mut estimate = length.powf(2.0 / 3.0) * jt.cbrt_jerk + v0;

    let l_squared = length * length;
    let v0_squared = v0 * v0;
    for _ in 0..2 {
        let j_z = ((estimate - v0) * (v0 + estimate) * (v0 + estimate)) / l_squared - jt.jerk;
        let j_d = (2.0 * v0 * estimate - v0_squared + 3.0 * (estimate * estimate)) / l_squared;
        estimate -= j_z / j_d;
    }
    estimate
}

/// Convergence window for the meet-velocity iteration, in velocity units.
const MEET_VELOCITY_TOLERANCE: f64 = 2.0;
/// Early escape when the length residual is already negligible, in mm.
const MEET_LENGTH_TOLERANCE: f64 = 1e-4;

/// Peak velocity for a head-tail move of `length` entering at `v0` and
/// exiting at `v2`, i.e. the `v1` satisfying
/// `target_length(v0, v1) + target_length(v2, v1) = length`.
///
/// Newton–Raphson, seeded from the velocity obtainable over half the
/// length from the faster end; bounded to 10 iterations with an absolute
/// convergence window.
pub fn meet_velocity(v0: f64, v2: f64, length: f64, jt: &JerkTerms) -> f64 {
    let floor = v0.max(v2);
    let mut v1 = target_velocity(floor, length / 2.0, jt);

    for _ in 0..10 {
        let l_c = target_length(v0, v1, jt) + target_length(v2, v1, jt) - length;
        if l_c.abs() < MEET_LENGTH_TOLERANCE {
            break;
        }
        // Derivative of the summed lengths with respect to v1:
        // d/dv1 [(v0+v1)√((v1−v0)/J)] = (3v1 − v0) / (2√(J(v1−v0))).
        let dv0 = (v1 - v0).max(f64::EPSILON);
        let dv2 = (v1 - v2).max(f64::EPSILON);
        let l_d = (3.0 * v1 - v0) / (2.0 * (jt.jerk * dv0).sqrt())
            + (3.0 * v1 - v2) / (2.0 * (jt.jerk * dv2).sqrt());
        if l_d < f64::EPSILON {
            break;
        }
        let next = (v1 - l_c / l_d).max(floor);
        let step = (next - v1).abs();
        v1 = next;
        if step < MEET_VELOCITY_TOLERANCE {
            break;
        }
    }
    v1
}

fn velocity_match_tolerance(reference: f64) -> f64 {
    (reference / 100.0).max(2.0)
}

/// Partition the block's length into head/body/tail and derive the
/// section times.
///
/// Inputs: `length` (never modified here), `entry_velocity` (never
/// modified), `cruise_velocity` (often lowered), `exit_velocity` (may be
/// changed for degenerate cases), `cruise_vmax` and `delta_vmax` for
/// clamping pathologically short blocks.
///
/// Entry conditions: `length` non-zero, and
/// `entry_velocity <= cruise_velocity >= exit_velocity`.
///
/// The cases run shortest first — that simplifies the tests and spends
/// the least time exactly when a stream of pathologically short blocks
/// needs it most.
pub(crate) fn calculate_trapezoid(bf: &mut MoveBuffer) {
    // RULE #1: don't change bf.length.
    bf.head_length = 0.0;
    bf.tail_length = 0.0;

    // We can't exit faster than we cruise.
    if bf.exit_velocity > bf.cruise_velocity {
        bf.exit_velocity = bf.cruise_velocity;
    }

    let jt = bf.jerk_terms();

    // Naive time is T/2 from the quadrilateral area formula
    // T = 2L/(v0+v1); working with the reduced form saves a multiply in
    // the comparisons below.
    let naive_move_time = bf.length / (bf.entry_velocity + bf.cruise_velocity.max(bf.exit_velocity));

    // Block too short for even one minimum segment: run it as a single
    // body segment with a degraded velocity. Jerk is violated, position
    // is preserved.
    if naive_move_time < MIN_SEGMENT_TIME_PLUS_MARGIN / 2.0 {
        bf.cruise_velocity = (bf.length / MIN_SEGMENT_TIME_PLUS_MARGIN)
            .min(bf.cruise_vmax)
            .min(bf.entry_velocity + bf.delta_vmax);
        bf.exit_velocity = bf.cruise_velocity;
        bf.body_length = bf.length;
        set_section_times(bf);
        return;
    }

    // Short block: fits a nominal segment body.
    if naive_move_time <= NOM_SEGMENT_TIME / 2.0 {
        bf.cruise_velocity = (bf.length / NOM_SEGMENT_TIME)
            .min(bf.cruise_vmax)
            .min(bf.entry_velocity + bf.delta_vmax);
        bf.exit_velocity = bf.cruise_velocity;
        bf.body_length = bf.length;
        set_section_times(bf);
        return;
    }

    bf.body_length = 0.0;

    // B case: all velocities close enough. Frequent in gcode files full
    // of short lines; also shortcuts the remaining tests.
    let tolerance = velocity_match_tolerance(bf.entry_velocity);
    if (bf.cruise_velocity - bf.entry_velocity) < tolerance
        && (bf.cruise_velocity - bf.exit_velocity) < tolerance
    {
        bf.body_length = bf.length;
        set_section_times(bf);
        return;
    }

    // Set head and tail lengths for the fit tests, computing the larger
    // candidate first: if it is already too short so is the other.
    let min_head = MIN_SEGMENT_TIME_PLUS_MARGIN * (bf.cruise_velocity + bf.entry_velocity);
    let min_tail = MIN_SEGMENT_TIME_PLUS_MARGIN * (bf.cruise_velocity + bf.exit_velocity);
    if (bf.cruise_velocity - bf.entry_velocity) > (bf.cruise_velocity - bf.exit_velocity) {
        bf.head_length = target_length(bf.entry_velocity, bf.cruise_velocity, &jt);
        if bf.head_length < min_head {
            bf.head_length = 0.0;
        } else {
            bf.tail_length = target_length(bf.exit_velocity, bf.cruise_velocity, &jt);
            if bf.tail_length < min_tail {
                bf.tail_length = 0.0;
            }
        }
    } else {
        bf.tail_length = target_length(bf.exit_velocity, bf.cruise_velocity, &jt);
        if bf.tail_length < min_tail {
            bf.tail_length = 0.0;
        } else {
            bf.head_length = target_length(bf.entry_velocity, bf.cruise_velocity, &jt);
            if bf.head_length < min_head {
                bf.head_length = 0.0;
            }
        }
    }

    // Rate-limited cases: the requested cruise cannot be reached.
    if bf.length < bf.head_length + bf.tail_length {
        if (bf.entry_velocity - bf.exit_velocity).abs() < velocity_match_tolerance(bf.entry_velocity)
        {
            // Symmetric case: split the length and compute the peak.
            // The iteration can land a convergence-window above the cap;
            // clamping keeps the envelope honest and the ramps feasible.
            bf.head_length = bf.length / 2.0;
            bf.tail_length = bf.head_length;
            bf.cruise_velocity =
                target_velocity(bf.entry_velocity, bf.head_length, &jt).min(bf.cruise_vmax);

            let min_head = MIN_SEGMENT_TIME_PLUS_MARGIN * (bf.cruise_velocity + bf.entry_velocity);
            if bf.head_length < min_head {
                // Degrade to a body-only move at the averaged velocity.
                bf.body_length = bf.length;
                bf.head_length = 0.0;
                bf.tail_length = 0.0;
                bf.cruise_velocity = (bf.entry_velocity + bf.cruise_velocity) / 2.0;
                bf.exit_velocity = bf.cruise_velocity;
            }
            set_section_times(bf);
            return;
        }

        // Asymmetric case: find the meet point by iteration. Relatively
        // expensive, but rare.
        bf.cruise_velocity = meet_velocity(bf.entry_velocity, bf.exit_velocity, bf.length, &jt)
            .min(bf.cruise_vmax);
        bf.head_length = target_length(bf.entry_velocity, bf.cruise_velocity, &jt);
        bf.tail_length = bf.length - bf.head_length;
        if bf.head_length < min_head {
            bf.tail_length = bf.length; // all tail...
            bf.head_length = 0.0;
        } else if bf.tail_length < min_tail {
            bf.head_length = bf.length; // ...or all head
            bf.tail_length = 0.0;
        }
        set_section_times(bf);
        return;
    }

    // Requested-fit cases: HBT, HB, BT, H, T, B.
    bf.body_length = bf.length - (bf.head_length + bf.tail_length);

    let min_body = MIN_SEGMENT_TIME_PLUS_MARGIN * bf.cruise_velocity;
    if bf.body_length < min_body && fp_not_zero(bf.body_length) {
        // A too-short body is distributed into the head and/or tail.
        // This generates small velocity errors at runtime but preserves
        // distance, which matters more.
        if fp_not_zero(bf.head_length) {
            if fp_not_zero(bf.tail_length) {
                bf.head_length += bf.body_length / 2.0;
                bf.tail_length += bf.body_length / 2.0;
            } else {
                bf.head_length += bf.body_length;
            }
        } else {
            bf.tail_length += bf.body_length;
        }
        bf.body_length = 0.0;
    } else if fp_zero(bf.head_length) && fp_zero(bf.tail_length) {
        // Standalone body: match the cruise to the entry cap, trading
        // top speed for removing a velocity discontinuity.
        bf.cruise_velocity = bf.entry_vmax.min(bf.cruise_vmax);
    }
    set_section_times(bf);
}

/// Derive the section times from the trapezoid area formula
/// `T = 2L/(v0+v1)` and record the real block time.
fn set_section_times(bf: &mut MoveBuffer) {
    bf.head_time = if bf.head_length > EPSILON {
        2.0 * bf.head_length / (bf.entry_velocity + bf.cruise_velocity)
    } else {
        0.0
    };
    bf.body_time = if bf.body_length > EPSILON {
        bf.body_length / bf.cruise_velocity
    } else {
        0.0
    };
    bf.tail_time = if bf.tail_length > EPSILON {
        2.0 * bf.tail_length / (bf.exit_velocity + bf.cruise_velocity)
    } else {
        0.0
    };
    bf.move_time = bf.head_time + bf.body_time + bf.tail_time;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jt(jerk_millions: f64) -> JerkTerms {
        JerkTerms::new(jerk_millions * 1e6)
    }

    fn block(entry: f64, cruise: f64, exit: f64, length: f64, jerk_millions: f64) -> MoveBuffer {
        let terms = jt(jerk_millions);
        let mut bf = MoveBuffer {
            length,
            entry_velocity: entry,
            cruise_velocity: cruise,
            exit_velocity: exit,
            cruise_vmax: cruise,
            entry_vmax: entry,
            exit_vmax: exit,
            jerk: terms.jerk,
            recip_jerk: terms.recip_jerk,
            cbrt_jerk: terms.cbrt_jerk,
            ..MoveBuffer::default()
        };
        bf.delta_vmax = target_velocity(0.0, length, &terms);
        bf
    }

    #[test]
    fn target_length_velocity_are_inverses() {
        let terms = jt(1000.0);
        for &(v0, v1) in &[(0.0, 1000.0), (200.0, 800.0), (0.0, 50.0)] {
            let length = target_length(v0, v1, &terms);
            let recovered = target_velocity(v0, length, &terms);
            assert!(
                (recovered - v1).abs() < 0.01 * v1,
                "v0={v0} v1={v1} recovered={recovered}"
            );
        }
    }

    #[test]
    fn meet_velocity_balances_head_and_tail() {
        let terms = jt(1000.0);
        let (v0, v2, length) = (200.0, 500.0, 4.0);
        let v1 = meet_velocity(v0, v2, length, &terms);
        assert!(v1 > v2, "peak must clear both endpoints");
        let total = target_length(v0, v1, &terms) + target_length(v2, v1, &terms);
        assert!(
            (total - length).abs() < 0.01,
            "lengths must meet: total={total} length={length}"
        );
    }

    #[test]
    fn full_trapezoid_conserves_length() {
        let mut bf = block(200.0, 1000.0, 300.0, 30.0, 1000.0);
        calculate_trapezoid(&mut bf);
        let total = bf.head_length + bf.body_length + bf.tail_length;
        assert!((total - bf.length).abs() < 1e-9);
        assert!(bf.body_length > 0.0, "30mm at these speeds has a body");
        // Head and tail must be jerk-feasible.
        let terms = bf.jerk_terms();
        assert!(
            (target_length(bf.entry_velocity, bf.cruise_velocity, &terms) - bf.head_length).abs()
                < 0.01
        );
        assert!(
            (target_length(bf.exit_velocity, bf.cruise_velocity, &terms) - bf.tail_length).abs()
                < 0.01
        );
    }

    #[test]
    fn symmetric_rate_limited_splits_in_half() {
        // 10 mm from rest to rest with a soft jerk: cannot reach the
        // requested cruise, so head = tail = L/2.
        let mut bf = block(0.0, 1000.0, 0.0, 10.0, 20.0);
        calculate_trapezoid(&mut bf);
        assert!((bf.head_length - 5.0).abs() < 1e-9);
        assert!((bf.tail_length - 5.0).abs() < 1e-9);
        assert!(fp_zero(bf.body_length));
        let expected = target_velocity(0.0, 5.0, &bf.jerk_terms());
        assert!((bf.cruise_velocity - expected).abs() < 1e-9);
        assert!(bf.cruise_velocity < 1000.0);
    }

    #[test]
    fn asymmetric_rate_limited_meets_in_the_middle() {
        let mut bf = block(100.0, 2000.0, 600.0, 6.0, 50.0);
        calculate_trapezoid(&mut bf);
        assert!(fp_zero(bf.body_length));
        assert!((bf.head_length + bf.tail_length - bf.length).abs() < 1e-9);
        assert!(bf.cruise_velocity < 2000.0);
        assert!(bf.cruise_velocity >= 600.0);
        // Exit must remain as requested in the asymmetric case.
        assert!((bf.exit_velocity - 600.0).abs() < 1e-9);
    }

    #[test]
    fn too_short_block_degrades_to_single_segment_body() {
        // 0.01 mm entering at 800 mm/min: naive time is far below one
        // minimum segment.
        let mut bf = block(800.0, 1000.0, 800.0, 0.01, 1000.0);
        calculate_trapezoid(&mut bf);
        assert!((bf.body_length - bf.length).abs() < 1e-12);
        assert!(fp_zero(bf.head_length));
        assert!(fp_zero(bf.tail_length));
        assert_eq!(bf.exit_velocity, bf.cruise_velocity);
        assert!(bf.cruise_velocity > 0.0);
    }

    #[test]
    fn matched_velocities_make_a_pure_body() {
        let mut bf = block(1000.0, 1000.0, 1000.0, 25.0, 1000.0);
        calculate_trapezoid(&mut bf);
        assert!((bf.body_length - 25.0).abs() < 1e-9);
        assert!((bf.move_time - 25.0 / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn exit_velocity_is_clamped_to_cruise() {
        let mut bf = block(100.0, 500.0, 900.0, 20.0, 1000.0);
        calculate_trapezoid(&mut bf);
        assert!(bf.exit_velocity <= bf.cruise_velocity + 1e-9);
    }

    #[test]
    fn section_times_follow_area_formula() {
        let mut bf = block(0.0, 1000.0, 0.0, 30.0, 1000.0);
        calculate_trapezoid(&mut bf);
        let expected_head = 2.0 * bf.head_length / (bf.entry_velocity + bf.cruise_velocity);
        assert!((bf.head_time - expected_head).abs() < 1e-12);
        assert!(
            (bf.move_time - (bf.head_time + bf.body_time + bf.tail_time)).abs() < 1e-12
        );
    }
}
