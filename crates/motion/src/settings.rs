//! Machine settings and the key-value configuration boundary.
//!
//! Settings are owned in typed structs and read once at startup from an
//! external provider keyed by short mnemonic tokens (`xvm`, `1sa`, `ja`,
//! …). Explicit set requests are applied to the live structs and written
//! through to the provider synchronously; the provider itself (file, NVM,
//! whatever) is out of scope.

use stepgen::{MotorConfig, PowerMode, MOTORS};
use tracing::debug;

use crate::{AXES, JUNCTION_AGGRESSION_MAX, JUNCTION_AGGRESSION_MIN};

const AXIS_LETTERS: [char; AXES] = ['x', 'y', 'z', 'a', 'b', 'c'];

/// Errors from the settings layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("unknown settings token: {0}")]
    UnknownToken(String),
    #[error("value {value} out of range for token {token}")]
    OutOfRange { token: String, value: f64 },
    #[error("provider rejected write for token {0}")]
    WriteFailed(String),
}

/// External key-value configuration provider.
pub trait SettingsSource {
    /// Fetch a value by token, if present.
    fn get(&self, token: &str) -> Option<f64>;
    /// Persist a value by token. Must be non-blocking and bounded.
    fn set(&mut self, token: &str, value: f64) -> Result<(), SettingsError>;
}

/// Per-axis kinematic limits.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct AxisSettings {
    /// Maximum axis velocity for traverses, mm/min.
    pub velocity_max: f64,
    /// Maximum axis velocity for feeds, mm/min.
    pub feedrate_max: f64,
    /// Maximum jerk in millions of mm/min³ (the ×1e6 multiplier is
    /// applied when a block's jerk is derived).
    pub jerk_max: f64,
    /// Junction deviation contribution of this axis, mm.
    pub junction_dev: f64,
    /// Soft travel limits, mm.
    pub travel_min: f64,
    pub travel_max: f64,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            velocity_max: 1500.0,
            feedrate_max: 1500.0,
            jerk_max: 1000.0,
            junction_dev: 0.05,
            travel_min: 0.0,
            travel_max: 420.0,
        }
    }
}

/// System-wide planner settings.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemSettings {
    /// Centripetal acceleration budget through corners, mm/min².
    pub junction_acceleration: f64,
    /// Scales the corner budget; clamped to the legal range.
    pub junction_aggression: f64,
    /// Arc flattening tolerance, mm. Consumed by the arc generator
    /// upstream; owned here because it is machine configuration.
    pub chordal_tolerance: f64,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            junction_acceleration: 100_000.0,
            junction_aggression: 1.0,
            chordal_tolerance: 0.01,
        }
    }
}

/// The complete axis/system settings block.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct Settings {
    pub axes: [AxisSettings; AXES],
    pub sys: SystemSettings,
}

impl Settings {
    /// Load from a provider, starting from defaults and overriding every
    /// token the provider knows.
    pub fn load(source: &impl SettingsSource) -> Self {
        let mut settings = Settings::default();
        for token in Self::tokens() {
            if let Some(value) = source.get(&token) {
                if let Err(err) = settings.apply(&token, value) {
                    debug!(%token, value, %err, "ignoring bad config value");
                }
            }
        }
        settings
    }

    /// All tokens this block understands.
    pub fn tokens() -> Vec<String> {
        let mut tokens = Vec::new();
        for letter in AXIS_LETTERS {
            for suffix in ["vm", "fr", "jm", "jd", "tn", "tm"] {
                tokens.push(format!("{letter}{suffix}"));
            }
        }
        tokens.push("ja".to_string());
        tokens.push("jt".to_string());
        tokens.push("ct".to_string());
        tokens
    }

    /// Apply one token to the live structs.
    pub fn apply(&mut self, token: &str, value: f64) -> Result<(), SettingsError> {
        let mut chars = token.chars();
        let (first, rest) = match chars.next() {
            Some(c) => (c, chars.as_str()),
            None => return Err(SettingsError::UnknownToken(token.to_string())),
        };

        if let Some(axis) = AXIS_LETTERS.iter().position(|&l| l == first) {
            let a = &mut self.axes[axis];
            match rest {
                "vm" => a.velocity_max = positive(token, value)?,
                "fr" => a.feedrate_max = positive(token, value)?,
                "jm" => a.jerk_max = positive(token, value)?,
                "jd" => a.junction_dev = positive(token, value)?,
                "tn" => a.travel_min = value,
                "tm" => a.travel_max = value,
                _ => return Err(SettingsError::UnknownToken(token.to_string())),
            }
            return Ok(());
        }
        match token {
            "ja" => self.sys.junction_acceleration = positive(token, value)?,
            "jt" => {
                if !(JUNCTION_AGGRESSION_MIN..=JUNCTION_AGGRESSION_MAX).contains(&value) {
                    return Err(SettingsError::OutOfRange {
                        token: token.to_string(),
                        value,
                    });
                }
                self.sys.junction_aggression = value;
            }
            "ct" => self.sys.chordal_tolerance = positive(token, value)?,
            _ => return Err(SettingsError::UnknownToken(token.to_string())),
        }
        Ok(())
    }

    /// Apply a token and write it through to the provider.
    pub fn set_and_store(
        &mut self,
        source: &mut impl SettingsSource,
        token: &str,
        value: f64,
    ) -> Result<(), SettingsError> {
        self.apply(token, value)?;
        source.set(token, value)
    }
}

fn positive(token: &str, value: f64) -> Result<f64, SettingsError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(SettingsError::OutOfRange {
            token: token.to_string(),
            value,
        })
    }
}

/// Load the motor bank configuration from the same provider.
///
/// Motor tokens are number-prefixed: `1sa` (step angle), `1tr` (travel
/// per rev), `1mi` (microsteps), `1po` (polarity), `1pm` (power mode),
/// `1ma` (axis mapping) for motors 1..=6, plus `crf` for the loader's
/// counter-reset factor.
pub fn load_motor_config(source: &impl SettingsSource) -> MotorConfig {
    let mut config = MotorConfig::new();
    for m in 0..MOTORS {
        let n = m + 1;
        let motor = &mut config.motors[m];
        if let Some(v) = source.get(&format!("{n}ma")) {
            let axis = v as usize;
            if axis < AXES {
                motor.axis = axis;
            }
        }
        if let Some(v) = source.get(&format!("{n}sa")) {
            if v > 0.0 {
                motor.step_angle = v;
            }
        }
        if let Some(v) = source.get(&format!("{n}tr")) {
            if v > 0.0 {
                motor.travel_per_rev = v;
            }
        }
        if let Some(v) = source.get(&format!("{n}mi")) {
            if v >= 1.0 {
                motor.microsteps = v as u32;
            }
        }
        if let Some(v) = source.get(&format!("{n}po")) {
            motor.polarity = v != 0.0;
        }
        if let Some(v) = source.get(&format!("{n}pm")) {
            motor.power_mode = PowerMode::from_config(v);
        }
    }
    if let Some(v) = source.get("crf") {
        if v >= 1.0 {
            config.counter_reset_factor = v as u32;
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapSource(HashMap<String, f64>);

    impl SettingsSource for MapSource {
        fn get(&self, token: &str) -> Option<f64> {
            self.0.get(token).copied()
        }
        fn set(&mut self, token: &str, value: f64) -> Result<(), SettingsError> {
            self.0.insert(token.to_string(), value);
            Ok(())
        }
    }

    #[test]
    fn axis_tokens_resolve() {
        let mut s = Settings::default();
        s.apply("xvm", 2400.0).unwrap();
        s.apply("zjd", 0.02).unwrap();
        s.apply("cjm", 500.0).unwrap();
        assert_eq!(s.axes[0].velocity_max, 2400.0);
        assert_eq!(s.axes[2].junction_dev, 0.02);
        assert_eq!(s.axes[5].jerk_max, 500.0);
    }

    #[test]
    fn unknown_and_out_of_range_tokens_are_rejected() {
        let mut s = Settings::default();
        assert!(matches!(
            s.apply("qq", 1.0),
            Err(SettingsError::UnknownToken(_))
        ));
        assert!(matches!(
            s.apply("jt", 99.0),
            Err(SettingsError::OutOfRange { .. })
        ));
        assert!(matches!(
            s.apply("yvm", -5.0),
            Err(SettingsError::OutOfRange { .. })
        ));
    }

    #[test]
    fn load_overrides_only_present_tokens() {
        let mut src = MapSource::default();
        src.0.insert("xvm".into(), 3000.0);
        src.0.insert("ja".into(), 250_000.0);
        let s = Settings::load(&src);
        assert_eq!(s.axes[0].velocity_max, 3000.0);
        assert_eq!(s.axes[1].velocity_max, AxisSettings::default().velocity_max);
        assert_eq!(s.sys.junction_acceleration, 250_000.0);
    }

    #[test]
    fn set_and_store_writes_through() {
        let mut src = MapSource::default();
        let mut s = Settings::default();
        s.set_and_store(&mut src, "yfr", 1234.0).unwrap();
        assert_eq!(s.axes[1].feedrate_max, 1234.0);
        assert_eq!(src.get("yfr"), Some(1234.0));
    }

    #[test]
    fn motor_tokens_resolve() {
        let mut src = MapSource::default();
        src.0.insert("1sa".into(), 0.9);
        src.0.insert("1mi".into(), 16.0);
        src.0.insert("2po".into(), 1.0);
        src.0.insert("3ma".into(), 2.0);
        src.0.insert("4pm".into(), 3.0);
        let config = load_motor_config(&src);
        assert_eq!(config.motors[0].step_angle, 0.9);
        assert_eq!(config.motors[0].microsteps, 16);
        assert!(config.motors[1].polarity);
        assert_eq!(config.motors[2].axis, 2);
        assert_eq!(config.motors[3].power_mode, PowerMode::PoweredWhenMoving);
    }
}
