// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::{
  config::PipelineConfig,
  frame::{Frame, MediaKind},
};

mod read_image_file;
mod video_file;

pub use self::read_image_file::ImageFileInput;
pub use self::video_file::{FrameExtractor, VideoFileInput, frame_path};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法读取媒体 {media}: {reason}")]
  UnreadableMedia { media: String, reason: String },
  #[error("未知的媒体类型: {0}")]
  UnknownKind(String),
  #[error("无法启动解码器: {0}")]
  DecoderSpawn(#[source] std::io::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

impl InputError {
  pub fn unreadable(media: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
    InputError::UnreadableMedia {
      media: media.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// 帧序列，图片只产生一帧，视频按索引顺序逐帧解码
pub enum FrameSource {
  ReadImageFile(ImageFileInput),
  VideoFile(VideoFileInput),
}

impl FrameSource {
  pub fn kind(&self) -> MediaKind {
    match self {
      FrameSource::ReadImageFile(_) => MediaKind::Image,
      FrameSource::VideoFile(_) => MediaKind::Video,
    }
  }
}

impl Iterator for FrameSource {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      FrameSource::ReadImageFile(input) => input.next(),
      FrameSource::VideoFile(input) => input.next(),
    }
  }
}

/// 将输入媒体整理为帧序列
///
/// 视频会先被逐帧抽取到 `frames_dir/<index>.jpg`，再按索引顺序读取。
pub fn normalize(
  source: &str,
  kind: MediaKind,
  frames_dir: &Path,
  config: &PipelineConfig,
) -> Result<FrameSource, InputError> {
  match kind {
    MediaKind::Image => {
      let input = ImageFileInput::open(source)?;
      info!("图片已打开: {} ({}x{})", source, input.width(), input.height());
      Ok(FrameSource::ReadImageFile(input))
    }
    MediaKind::Video => {
      let count = FrameExtractor::from_config(config).extract(source, frames_dir)?;
      info!("视频已抽帧: {} -> {} 帧", source, count);
      Ok(FrameSource::VideoFile(
        VideoFileInput::open(frames_dir)?.with_limit(count),
      ))
    }
  }
}
