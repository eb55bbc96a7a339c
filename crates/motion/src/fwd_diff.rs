//! Quintic-Bézier forward differencing for section velocities.
//!
//! The velocity curve within a head or tail section is a fifth-order
//! Bézier V(t) = Σ Pᵢ·Bᵢ(t), t ∈ [0, 1], with control points derived
//! from the endpoint velocity/acceleration/jerk and the section time T:
//!
//! ```text
//!   P0 = v0                                      P5 = v1
//!   P1 = v0 + (T/5)·a0                           P4 = v1 − (T/5)·a1
//!   P2 = v0 + (2T/5)·a0 + (T²/20)·j0             P3 = v1 − (2T/5)·a1 − (T²/20)·j1
//! ```
//!
//! Collecting the Bernstein basis into the power form
//! V(t) = A·t⁵ + B·t⁴ + C·t³ + D·t² + E·t + F gives
//!
//! ```text
//!   A =  5(P1 − P4 + 2(P3 − P2)) + P5 − P0
//!   B =  5(P0 + P4 − 4(P3 + P1) + 6·P2)
//!   C = 10(P3 − P0 + 3(P1 − P2))
//!   D = 10(P0 + P2 − 2·P1)
//!   E =  5(P1 − P0)
//!   F =  P0
//! ```
//!
//! With a parametric step h = 1/segments, five forward differences make
//! each successive velocity cost five additions. The initial values are
//! taken at t = h/2 rather than t = 0 so each emitted velocity is the
//! midpoint sample of its segment:
//!
//! ```text
//!   F5 = (121/16)Ah⁵ + 5Bh⁴ + (13/4)Ch³ + 2Dh² + Eh
//!   F4 = (165/2)Ah⁵ + 29Bh⁴ + 9Ch³ + 2Dh²
//!   F3 = 255Ah⁵ + 48Bh⁴ + 6Ch³
//!   F2 = 300Ah⁵ + 24Bh⁴
//!   F1 = 120Ah⁵
//! ```
//!
//! The coefficients are derived symbolically once; nothing is re-derived
//! at runtime.

/// The five forward-difference accumulators for one section.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardDiffs {
    pub f1: f64,
    pub f2: f64,
    pub f3: f64,
    pub f4: f64,
    pub f5: f64,
}

impl ForwardDiffs {
    /// Initialize for a section running from `v0` to `v1` over `t`
    /// (minutes) in `segments` slices, with the given endpoint
    /// accelerations and jerks. Returns the initial segment velocity —
    /// the curve sampled at t = h/2.
    ///
    /// The classic zero-acceleration-at-endpoints S-curve is
    /// `a0 = a1 = j0 = j1 = 0`.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        v_0: f64,
        v_1: f64,
        a_0: f64,
        a_1: f64,
        j_0: f64,
        j_1: f64,
        t: f64,
        segments: f64,
    ) -> f64 {
        let fifth_t = t * 0.2;
        let two_fifths_t = t * 0.4;
        let twentieth_t_2 = t * t * 0.05;

        let p_0 = v_0;
        let p_1 = v_0 + fifth_t * a_0;
        let p_2 = v_0 + two_fifths_t * a_0 + twentieth_t_2 * j_0;
        let p_3 = v_1 - two_fifths_t * a_1 - twentieth_t_2 * j_1;
        let p_4 = v_1 - fifth_t * a_1;
        let p_5 = v_1;

        let a = 5.0 * (p_1 - p_4 + 2.0 * (p_3 - p_2)) + p_5 - p_0;
        let b = 5.0 * (p_0 + p_4 - 4.0 * (p_3 + p_1) + 6.0 * p_2);
        let c = 10.0 * (p_3 - p_0 + 3.0 * (p_1 - p_2));
        let d = 10.0 * (p_0 + p_2 - 2.0 * p_1);
        let e = 5.0 * (p_1 - p_0);

        let h = 1.0 / segments;
        let h_2 = h * h;
        let h_3 = h_2 * h;
        let h_4 = h_3 * h;
        let h_5 = h_4 * h;

        let ah_5 = a * h_5;
        let bh_4 = b * h_4;
        let ch_3 = c * h_3;
        let dh_2 = d * h_2;
        let eh = e * h;

        const C1: f64 = 7.5625; // 121/16
        const C2: f64 = 3.25; // 13/4
        const C3: f64 = 82.5; // 165/2

        self.f5 = C1 * ah_5 + 5.0 * bh_4 + C2 * ch_3 + 2.0 * dh_2 + eh;
        self.f4 = C3 * ah_5 + 29.0 * bh_4 + 9.0 * ch_3 + 2.0 * dh_2;
        self.f3 = 255.0 * ah_5 + 48.0 * bh_4 + 6.0 * ch_3;
        self.f2 = 300.0 * ah_5 + 24.0 * bh_4;
        self.f1 = 120.0 * ah_5;

        // Initial velocity is the curve evaluated at t = h/2.
        let half_h = h * 0.5;
        let half_h_2 = half_h * half_h;
        let half_h_3 = half_h_2 * half_h;
        let half_h_4 = half_h_3 * half_h;
        let half_h_5 = half_h_4 * half_h;

        a * half_h_5 + b * half_h_4 + c * half_h_3 + d * half_h_2 + e * half_h + v_0
    }

    /// Cascade the accumulators after a segment has been emitted.
    pub fn advance(&mut self) {
        self.f5 += self.f4;
        self.f4 += self.f3;
        self.f3 += self.f2;
        self.f2 += self.f1;
    }

    /// Zero the accumulators so `f5` additions become no-ops. Used for
    /// single-segment sections where the velocity is a plain average.
    pub fn clear(&mut self) {
        *self = ForwardDiffs::default();
    }
}
