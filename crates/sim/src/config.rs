//! INI-backed settings provider.
//!
//! A flat `[settings]` section keyed by the short configuration tokens
//! (`xvm`, `1sa`, `ja`, …) stands in for whatever key-value store a real
//! board uses. Writes go back to the file synchronously.

use std::path::{Path, PathBuf};

use configparser::ini::Ini;
use motion::{SettingsError, SettingsSource};

const SECTION: &str = "settings";

/// File-backed [`SettingsSource`].
pub struct IniSettings {
    ini: Ini,
    path: Option<PathBuf>,
}

impl IniSettings {
    /// Load from a file. Missing tokens fall back to defaults at the
    /// consumer's side.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut ini = Ini::new();
        ini.load(path)
            .map_err(|e| anyhow::anyhow!("failed to load settings file {path:?}: {e}"))?;
        Ok(Self {
            ini,
            path: Some(path.to_path_buf()),
        })
    }

    /// An empty, memory-only provider.
    pub fn in_memory() -> Self {
        Self {
            ini: Ini::new(),
            path: None,
        }
    }
}

impl SettingsSource for IniSettings {
    fn get(&self, token: &str) -> Option<f64> {
        self.ini.getfloat(SECTION, token).ok().flatten()
    }

    fn set(&mut self, token: &str, value: f64) -> Result<(), SettingsError> {
        self.ini
            .set(SECTION, token, Some(format!("{value}")));
        if let Some(path) = &self.path {
            self.ini
                .write(path)
                .map_err(|_| SettingsError::WriteFailed(token.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion::Settings;

    #[test]
    fn tokens_round_trip_in_memory() {
        let mut source = IniSettings::in_memory();
        source.set("xvm", 2500.0).unwrap();
        source.set("ja", 150000.0).unwrap();
        assert_eq!(source.get("xvm"), Some(2500.0));

        let settings = Settings::load(&source);
        assert_eq!(settings.axes[0].velocity_max, 2500.0);
        assert_eq!(settings.sys.junction_acceleration, 150000.0);
    }
}
