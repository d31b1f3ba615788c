//! 轴/支架配置
//!
//! TOML 格式，每个 `[[axes]]` 表描述一根轴：
//!
//! ```toml
//! [[axes]]
//! name = "alt"
//! driver_teeth = 1
//! follower_teeth = 1
//! steps_per_degree = 1.8
//! track_speed = 1000
//! settle_delay_us = 10
//! [axes.params]
//! STEP_MODE = 5
//! MAX_SPEED = 0x20
//! ```

use l6470_protocol::Register;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

fn default_teeth() -> u32 {
    1
}

fn default_steps_per_degree() -> f64 {
    1.8
}

fn default_track_speed() -> u32 {
    1000
}

fn default_settle_delay_us() -> u64 {
    10
}

/// 齿轮传动参数
///
/// 电机轴上的主动齿轮带动输出轴上的从动齿轮。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GearTrain {
    pub driver_teeth: u32,
    pub follower_teeth: u32,
    pub steps_per_degree: f64,
}

impl GearTrain {
    /// 输出轴角度 → 微步数（不取整）
    pub fn microsteps(&self, angle: f64, step_mode: u32) -> f64 {
        let microsteps = (1u32 << (step_mode & 7)) as f64;
        angle * microsteps * self.follower_teeth as f64 / self.driver_teeth as f64
            / self.steps_per_degree
    }

    /// 输出轴角度 → 微步数（向零截断）
    pub fn angle_to_microsteps(&self, angle: f64, step_mode: u32) -> f64 {
        self.microsteps(angle, step_mode).trunc()
    }

    /// 微步数 → 输出轴角度
    pub fn microsteps_to_angle(&self, steps: i32, step_mode: u32) -> f64 {
        let microsteps = (1u32 << (step_mode & 7)) as f64;
        self.driver_teeth as f64 / self.follower_teeth as f64 * steps as f64
            * self.steps_per_degree
            / microsteps
    }
}

impl Default for GearTrain {
    fn default() -> Self {
        Self {
            driver_teeth: default_teeth(),
            follower_teeth: default_teeth(),
            steps_per_degree: default_steps_per_degree(),
        }
    }
}

/// 单轴配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub name: String,
    #[serde(default = "default_teeth")]
    pub driver_teeth: u32,
    #[serde(default = "default_teeth")]
    pub follower_teeth: u32,
    #[serde(default = "default_steps_per_degree")]
    pub steps_per_degree: f64,
    /// `track` 请求使用的 Run 速度（SPEED 寄存器单位）
    #[serde(default = "default_track_speed")]
    pub track_speed: u32,
    /// SoftStop 之后、下一条运动指令之前的等待时间
    #[serde(default = "default_settle_delay_us")]
    pub settle_delay_us: u64,
    /// 初始化后写入的寄存器（名字 → 值）
    #[serde(default)]
    pub params: BTreeMap<String, i64>,
}

impl AxisConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver_teeth: default_teeth(),
            follower_teeth: default_teeth(),
            steps_per_degree: default_steps_per_degree(),
            track_speed: default_track_speed(),
            settle_delay_us: default_settle_delay_us(),
            params: BTreeMap::new(),
        }
    }

    pub fn gear(&self) -> GearTrain {
        GearTrain {
            driver_teeth: self.driver_teeth,
            follower_teeth: self.follower_teeth,
            steps_per_degree: self.steps_per_degree,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_micros(self.settle_delay_us)
    }

    /// 寄存器参数，按地址排序
    pub fn register_params(&self) -> Result<Vec<(Register, i64)>, ConfigError> {
        let mut params = self
            .params
            .iter()
            .map(|(name, &value)| {
                name.parse::<Register>()
                    .map(|reg| (reg, value))
                    .map_err(|e| invalid(format!("{}.params.{}", self.name, name), e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        params.sort_by_key(|(reg, _)| reg.address());
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", "axis name cannot be empty"));
        }
        if self.name.contains(':') {
            return Err(invalid(&self.name, "axis name cannot contain ':'"));
        }
        if self.driver_teeth == 0 || self.follower_teeth == 0 {
            return Err(invalid(
                format!("{}.teeth", self.name),
                "gear teeth must be positive",
            ));
        }
        if !self.steps_per_degree.is_finite() || self.steps_per_degree <= 0.0 {
            return Err(invalid(
                format!("{}.steps_per_degree", self.name),
                format!("must be finite and positive, got {}", self.steps_per_degree),
            ));
        }
        self.register_params()?;
        Ok(())
    }
}

/// 支架配置（所有轴）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountConfig {
    #[serde(default)]
    pub axes: Vec<AxisConfig>,
}

impl MountConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MountConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for axis in &self.axes {
            axis.validate()?;
            if !seen.insert(axis.name.as_str()) {
                return Err(invalid(&axis.name, "duplicate axis name"));
            }
        }
        Ok(())
    }

    pub fn axis(&self, name: &str) -> Option<&AxisConfig> {
        self.axes.iter().find(|a| a.name == name)
    }

    /// 原始三轴望远镜支架：高度、方位、调焦
    pub fn telescope() -> Self {
        let axes = ["alt", "azi", "foc"]
            .into_iter()
            .map(|name| {
                let mut axis = AxisConfig::new(name);
                axis.params.insert("STEP_MODE".to_string(), 5);
                axis.params.insert("MAX_SPEED".to_string(), 0x20);
                axis
            })
            .collect();
        Self { axes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[axes]]
name = "alt"
driver_teeth = 1
follower_teeth = 4
steps_per_degree = 1.8
[axes.params]
STEP_MODE = 5
MAX_SPEED = 0x20
ACC = 0x08A

[[axes]]
name = "azi"
"#;

    #[test]
    fn test_parse_sample_with_defaults() {
        let config = MountConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.axes.len(), 2);

        let alt = config.axis("alt").unwrap();
        assert_eq!(alt.follower_teeth, 4);
        assert_eq!(alt.params["MAX_SPEED"], 0x20);

        let azi = config.axis("azi").unwrap();
        assert_eq!(azi.driver_teeth, 1);
        assert_eq!(azi.follower_teeth, 1);
        assert_eq!(azi.steps_per_degree, 1.8);
        assert_eq!(azi.track_speed, 1000);
        assert_eq!(azi.settle_delay(), Duration::from_micros(10));
        assert!(azi.params.is_empty());
    }

    #[test]
    fn test_register_params_sorted_by_address() {
        let config = MountConfig::from_toml_str(SAMPLE).unwrap();
        let params = config.axis("alt").unwrap().register_params().unwrap();
        assert_eq!(
            params,
            vec![
                (Register::Acc, 0x08A),
                (Register::MaxSpeed, 0x20),
                (Register::StepMode, 5)
            ]
        );
    }

    #[test]
    fn test_unknown_param_rejected() {
        let err = MountConfig::from_toml_str(
            r#"
[[axes]]
name = "alt"
[axes.params]
WARP_FACTOR = 9
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "alt.params.WARP_FACTOR"));
    }

    #[test]
    fn test_validation_rules() {
        let mut axis = AxisConfig::new("alt");
        axis.driver_teeth = 0;
        assert!(axis.validate().is_err());

        let mut axis = AxisConfig::new("alt");
        axis.steps_per_degree = f64::NAN;
        assert!(axis.validate().is_err());

        assert!(AxisConfig::new("").validate().is_err());
        assert!(AxisConfig::new("a:b").validate().is_err());

        let config = MountConfig {
            axes: vec![AxisConfig::new("alt"), AxisConfig::new("alt")],
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            MountConfig::from_toml_str("[[axes]]\nname = 3\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = MountConfig::load(file.path()).unwrap();
        assert_eq!(config.axes.len(), 2);

        let missing = MountConfig::load(Path::new("/nonexistent/mount.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_telescope_preset_is_valid() {
        let config = MountConfig::telescope();
        config.validate().unwrap();
        assert_eq!(config.axes.len(), 3);
        assert_eq!(config.axis("foc").unwrap().params["STEP_MODE"], 5);
    }

    #[test]
    fn test_gear_train_conversion() {
        let gear = GearTrain::default();
        assert_eq!(gear.angle_to_microsteps(90.0, 5), 1600.0);
        assert_eq!(gear.angle_to_microsteps(-90.0, 5), -1600.0);
        // STEP_MODE 高位被忽略
        assert_eq!(gear.angle_to_microsteps(90.0, 0x85), 1600.0);
        assert_eq!(gear.microsteps_to_angle(1600, 5), 90.0);

        let reduced = GearTrain {
            driver_teeth: 1,
            follower_teeth: 4,
            steps_per_degree: 1.8,
        };
        assert_eq!(reduced.angle_to_microsteps(90.0, 5), 6400.0);
        assert_eq!(reduced.microsteps_to_angle(6400, 5), 90.0);
    }
}
