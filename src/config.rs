// 该文件是 Kanjian （看见） 项目的一部分。
// src/config.rs - 流水线配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 流水线配置
//!
//! 配置通过 URL 描述，例如：
//!
//! ```text
//! pipeline:///srv/uploads?size=416&fps=25&max_frames=18000&timeout=600&font=/usr/share/fonts/font.ttf
//! ```
//!
//! - 路径部分为上传根目录，缺省为 `static/uploads`
//! - `size` 推理输入边长（正方形），必须是 32 的倍数，默认 416
//! - `fps` 输出视频帧率，范围 [1, 120]，默认 25
//! - `max_frames` 单个视频最多抽取的帧数，默认 18000
//! - `timeout` 视频抽帧的时间上限（秒），默认 600
//! - `font` 标注文字所用的 TTF 字体，缺省时只绘制边框
//! - `ffmpeg` ffmpeg 可执行文件，默认 `ffmpeg`

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub const DEFAULT_UPLOAD_DIR: &str = "static/uploads";
pub const DEFAULT_INFERENCE_SIZE: u32 = 416;
pub const DEFAULT_FPS: u32 = 25;
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 120;
pub const DEFAULT_MAX_FRAMES: usize = 18_000;
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(600);
const INFERENCE_SIZE_ALIGN: u32 = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数 {key} 的值无效: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}

/// 流水线配置，构造流水线时显式传入，不依赖任何全局状态
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  /// 上传根目录
  pub upload_dir: PathBuf,
  /// 推理输入边长
  pub inference_size: u32,
  /// 输出视频帧率
  pub fps: u32,
  /// 视频抽帧数量上限
  pub max_frames: usize,
  /// 视频抽帧时间上限
  pub extract_timeout: Duration,
  /// 标注字体
  pub font: Option<PathBuf>,
  /// ffmpeg 可执行文件
  pub ffmpeg: PathBuf,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
      inference_size: DEFAULT_INFERENCE_SIZE,
      fps: DEFAULT_FPS,
      max_frames: DEFAULT_MAX_FRAMES,
      extract_timeout: DEFAULT_EXTRACT_TIMEOUT,
      font: None,
      ffmpeg: PathBuf::from("ffmpeg"),
    }
  }
}

impl PipelineConfig {
  pub fn with_upload_dir(mut self, upload_dir: impl Into<PathBuf>) -> Self {
    self.upload_dir = upload_dir.into();
    self
  }

  pub fn with_inference_size(mut self, inference_size: u32) -> Self {
    self.inference_size = inference_size;
    self
  }

  pub fn with_fps(mut self, fps: u32) -> Self {
    self.fps = fps;
    self
  }

  pub fn with_max_frames(mut self, max_frames: usize) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
    self.extract_timeout = timeout;
    self
  }

  pub fn with_font(mut self, font: impl Into<PathBuf>) -> Self {
    self.font = Some(font.into());
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.inference_size == 0 || self.inference_size % INFERENCE_SIZE_ALIGN != 0 {
      return Err(ConfigError::ValidationError(format!(
        "推理尺寸 {} 必须是 {} 的正整数倍",
        self.inference_size, INFERENCE_SIZE_ALIGN
      )));
    }
    if !(MIN_FPS..=MAX_FPS).contains(&self.fps) {
      return Err(ConfigError::ValidationError(format!(
        "FPS {} 超出有效范围 [{}, {}]",
        self.fps, MIN_FPS, MAX_FPS
      )));
    }
    if self.max_frames == 0 {
      return Err(ConfigError::ValidationError(
        "最大帧数必须大于 0".to_string(),
      ));
    }
    if self.extract_timeout.is_zero() {
      return Err(ConfigError::ValidationError(
        "抽帧超时时间必须大于 0".to_string(),
      ));
    }
    Ok(())
  }
}

impl FromUrlWithScheme for PipelineConfig {
  const SCHEME: &'static str = "pipeline";
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse::<T>().map_err(|_| ConfigError::InvalidParameter {
    key: key.to_string(),
    value: value.to_string(),
  })
}

impl FromUrl for PipelineConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut config = PipelineConfig::default();

    let path = urlencoding::decode(url.path()).map_err(|_| ConfigError::InvalidParameter {
      key: "path".to_string(),
      value: url.path().to_string(),
    })?;
    if !path.is_empty() && path != "/" {
      config.upload_dir = PathBuf::from(&*path);
    }

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => config.inference_size = parse_param(&key, &value)?,
        "fps" => config.fps = parse_param(&key, &value)?,
        "max_frames" => config.max_frames = parse_param(&key, &value)?,
        "timeout" => {
          config.extract_timeout = Duration::from_secs(parse_param::<u64>(&key, &value)?)
        }
        "font" => config.font = Some(PathBuf::from(&*value)),
        "ffmpeg" => config.ffmpeg = PathBuf::from(&*value),
        other => debug!("忽略未知的配置参数: {}", other),
      }
    }

    config.validate()?;
    Ok(config)
  }
}
