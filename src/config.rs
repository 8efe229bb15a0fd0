use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::{info, warn};
use serde::{Deserialize, Deserializer};
use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// Lowest direction threshold the sensitivity controls may reach; below
/// this the classifier would trigger on pixel noise.
pub const MIN_DIRECTION_THRESHOLD: i32 = 5;

/// Smallest stabilization window that still filters single-frame jitter.
pub const MIN_STABILIZATION_WINDOW: usize = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
    #[serde(default)]
    pub allow_commands: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    pub direction_threshold: i32,
    pub cooldown_secs: f32,
    pub repeat_interval_secs: f32,
    pub stabilization_window: usize,
}

impl Thresholds {
    /// Clamp to usable ranges instead of rejecting; a misconfigured profile
    /// must never yield a classifier that cannot converge.
    pub fn normalize(&mut self) {
        if self.direction_threshold < MIN_DIRECTION_THRESHOLD {
            warn!(
                "direction_threshold {} below floor, clamping to {}",
                self.direction_threshold, MIN_DIRECTION_THRESHOLD
            );
            self.direction_threshold = MIN_DIRECTION_THRESHOLD;
        }
        if self.stabilization_window < MIN_STABILIZATION_WINDOW {
            warn!(
                "stabilization_window {} too small, clamping to {}",
                self.stabilization_window, MIN_STABILIZATION_WINDOW
            );
            self.stabilization_window = MIN_STABILIZATION_WINDOW;
        }
        if self.repeat_interval_secs <= self.cooldown_secs {
            // degenerates to plain cooldown gating, which still works
            warn!(
                "repeat_interval_secs ({}) not above cooldown_secs ({}); same-direction \
                 repeats will follow the cooldown alone",
                self.repeat_interval_secs, self.cooldown_secs
            );
        }
    }

    /// Sensitivity up = smaller threshold, floored.
    pub fn increase_sensitivity(&mut self) -> i32 {
        self.direction_threshold = (self.direction_threshold - 1).max(MIN_DIRECTION_THRESHOLD);
        self.direction_threshold
    }

    /// Sensitivity down = larger threshold, no ceiling.
    pub fn decrease_sensitivity(&mut self) -> i32 {
        self.direction_threshold += 1;
        self.direction_threshold
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    pub thresholds: Thresholds,

    // Accept nested/dotted tables and flatten them into "direction.up" -> "key:UP"
    #[serde(default, deserialize_with = "deserialize_bindings_flat")]
    pub bindings: HashMap<String, String>,
}

// --------- custom bindings deserializer (tolerant) ----------
fn deserialize_bindings_flat<'de, D>(
    de: D,
) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = toml::Value::deserialize(de)?;
    let table = match val {
        toml::Value::Table(t) => t,
        other => {
            return Err(serde::de::Error::custom(format!(
                "bindings must be a table, got {:?}",
                other.type_str()
            )));
        }
    };

    let mut out = HashMap::new();
    flatten_table("", &table, &mut out).map_err(serde::de::Error::custom)?;
    Ok(out)
}

fn flatten_table(
    prefix: &str,
    table: &toml::value::Table,
    out: &mut HashMap<String, String>,
) -> std::result::Result<(), String> {
    for (k, v) in table {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            toml::Value::Table(sub) => {
                flatten_table(&key, sub, out)?;
            }
            other => {
                return Err(format!(
                    "binding '{}' value must be a string, got {}",
                    key,
                    other.type_str()
                ));
            }
        }
    }
    Ok(())
}
// ------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
    pub detector_script: PathBuf,
}

fn config_dir() -> PathBuf {
    let home = UserDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".config").join("handctl")
}

fn profiles_dir() -> PathBuf {
    config_dir().join("profiles")
}

fn active_ptr_path() -> PathBuf {
    config_dir().join("active")
}

fn detector_script_path() -> PathBuf {
    config_dir().join("hand_detect.py")
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

fn detector_script_text() -> &'static str {
    include_str!("../detector/hand_detect.py")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let cfgdir = config_dir();
        let profdir = profiles_dir();
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let detector_script = detector_script_path();
        if !detector_script.exists() {
            fs::write(&detector_script, detector_script_text())?;
            info!("installed detector helper at {}", detector_script.display());
        }

        let active_ptr = active_ptr_path();
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = Self::load_profile(&active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
            detector_script,
        })
    }

    pub fn reload(&mut self) -> Result<()> {
        self.profile = Self::load_profile(&self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.reload()?;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                if let Some(ext) = e.path().extension() {
                    if ext == "toml" {
                        if let Some(stem) = e.path().file_stem().and_then(|s| s.to_str()) {
                            v.push(stem.to_string());
                        }
                    }
                }
            }
        }
        v.sort();
        v
    }

    fn load_profile(name: &str) -> Result<Profile> {
        let path = profiles_dir().join(format!("{name}.toml"));
        let txt = fs::read_to_string(&path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        let mut profile: Profile =
            toml::from_str(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))?;
        validate_profile(&profile)?;
        profile.thresholds.normalize();
        Ok(profile)
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        let detector_installed = self.detector_script.exists();
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "detector_script": self.detector_script,
            "detector_script_installed": detector_installed,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input",
                "detector_deps": "python3 -m pip install mediapipe opencv-python"
            }
        })
    }
}

fn validate_profile(p: &Profile) -> Result<()> {
    if p.thresholds.cooldown_secs <= 0.0 || p.thresholds.repeat_interval_secs <= 0.0 {
        return Err(anyhow!("thresholds must be positive durations"));
    }

    for (k, v) in &p.bindings {
        if k.trim().is_empty() {
            return Err(anyhow!("empty binding key"));
        }
        if v.trim().is_empty() {
            return Err(anyhow!("binding '{}' has empty action", k));
        }

        let ok = v.starts_with("key:") || v == "none" || v.starts_with("cmd:");
        if !ok {
            return Err(anyhow!("binding '{}' has invalid action '{}'", k, v));
        }
        if v.starts_with("cmd:") && !p.meta.allow_commands {
            return Err(anyhow!(
                "binding '{}' uses cmd: but allow_commands=false",
                k
            ));
        }
    }
    Ok(())
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:") || line.starts_with("input:x:") {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_thresholds() -> Thresholds {
        Thresholds {
            direction_threshold: 10,
            cooldown_secs: 0.2,
            repeat_interval_secs: 0.5,
            stabilization_window: 2,
        }
    }

    #[test]
    fn normalize_clamps_floors() {
        let mut th = base_thresholds();
        th.direction_threshold = 1;
        th.stabilization_window = 0;
        th.normalize();
        assert_eq!(th.direction_threshold, MIN_DIRECTION_THRESHOLD);
        assert_eq!(th.stabilization_window, MIN_STABILIZATION_WINDOW);
    }

    #[test]
    fn sensitivity_floor_holds() {
        let mut th = base_thresholds();
        th.direction_threshold = MIN_DIRECTION_THRESHOLD;
        assert_eq!(th.increase_sensitivity(), MIN_DIRECTION_THRESHOLD);
        assert_eq!(th.decrease_sensitivity(), MIN_DIRECTION_THRESHOLD + 1);
    }

    #[test]
    fn default_profile_parses_and_validates() {
        let mut p: Profile = toml::from_str(default_profile_text()).unwrap();
        validate_profile(&p).unwrap();
        p.thresholds.normalize();
        assert_eq!(p.bindings.get("direction.up").map(String::as_str), Some("key:UP"));
        assert_eq!(p.bindings.get("direction.right").map(String::as_str), Some("key:RIGHT"));
        assert_eq!(p.thresholds.direction_threshold, 10);
        assert_eq!(p.thresholds.stabilization_window, 2);
    }

    #[test]
    fn cmd_binding_requires_allow_commands() {
        let txt = r#"
            [meta]
            name = "t"

            [thresholds]
            direction_threshold = 10
            cooldown_secs = 0.2
            repeat_interval_secs = 0.5
            stabilization_window = 2

            [bindings.direction]
            up = "cmd:notify-send up"
        "#;
        let p: Profile = toml::from_str(txt).unwrap();
        assert!(validate_profile(&p).is_err());
    }
}
