use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use ultraviolet::Vec3;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub framing: FramingConfig,
    pub download: DownloadConfig,
    pub service: ServiceConfig,
}

impl Config {
    pub fn from_str(value: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(value)?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect_ratio: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov: 75.0,
            aspect_ratio: 1.0,
            z_near: 0.1,
            z_far: 1000.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FramingConfig {
    pub distance_multiplier: f32,
    pub tiny_model_threshold: f32,
    pub tiny_model_target_size: f32,
    pub large_model_threshold: f32,
    pub large_model_target_size: f32,
    /// Pose used for assets without 3-D bounds.
    pub default_camera_position: Vec3,
    pub default_camera_target: Vec3,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            distance_multiplier: 1.75,
            tiny_model_threshold: 0.3,
            tiny_model_target_size: 1.0,
            large_model_threshold: 15.0,
            large_model_target_size: 7.0,
            default_camera_position: Vec3::new(0.0, 0.0, 5.0),
            default_camera_target: Vec3::zero(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    /// How long a finished download stays listed before it is removed.
    pub completion_grace_ms: u64,
}

impl DownloadConfig {
    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            completion_grace_ms: 2000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub api_base_url: String,
    pub bearer_token: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            bearer_token: None,
        }
    }
}

pub struct ConfigFileLoader {
    pub path: PathBuf,
    config: Option<Config>,
}

impl ConfigFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Reads the config file, or writes the defaults if there is none yet.
    pub fn load_config(&mut self) -> anyhow::Result<&mut Config> {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => Config::from_str(&content)
                .with_context(|| format!("Invalid config file {:?}", self.path))?,
            Err(_) => {
                log::info!("No config at {:?}, writing defaults", self.path);
                self.config = Some(Config::default());
                self.save_config()?;
                Config::default()
            }
        };
        Ok(self.config.insert(config))
    }

    pub fn get_or_load_config(&mut self) -> anyhow::Result<&mut Config> {
        if self.config.is_none() {
            self.load_config()?;
        }
        self.config
            .as_mut()
            .ok_or_else(|| anyhow::format_err!("Config was not loaded"))
    }

    pub fn save_config(&self) -> anyhow::Result<()> {
        if let Some(config) = &self.config {
            let content = serde_json::to_string_pretty(config)?;
            std::fs::write(&self.path, content)
                .with_context(|| format!("Could not write config file {:?}", self.path))?;
        }
        Ok(())
    }
}
