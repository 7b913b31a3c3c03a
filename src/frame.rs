// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 帧与媒体类型定义
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

use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::RgbImage;
use serde::Serialize;

use crate::input::InputError;

/// 允许上传的图片扩展名
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
  /// 单张图片
  Image,
  /// 视频（文件或链接）
  Video,
}

impl MediaKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      MediaKind::Image => "image",
      MediaKind::Video => "video",
    }
  }

  /// 文件名是否在图片扩展名白名单中（不区分大小写）
  pub fn is_allowed_image(file_name: &str) -> bool {
    file_name
      .rsplit_once('.')
      .map(|(_, ext)| {
        let ext = ext.to_lowercase();
        IMAGE_EXTENSIONS.contains(&ext.as_str())
      })
      .unwrap_or(false)
  }

  /// 按扩展名判断上传文件的类型，只识别白名单中的图片
  ///
  /// 视频以链接或显式类型提交，不从文件名推断。
  pub fn from_path(path: impl AsRef<Path>) -> Option<MediaKind> {
    path
      .as_ref()
      .file_name()
      .and_then(|name| name.to_str())
      .filter(|name| MediaKind::is_allowed_image(name))
      .map(|_| MediaKind::Image)
  }
}

impl FromStr for MediaKind {
  type Err = InputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "image" => Ok(MediaKind::Image),
      "video" => Ok(MediaKind::Video),
      _ => Err(InputError::UnknownKind(s.to_string())),
    }
  }
}

impl std::fmt::Display for MediaKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引，图片固定为 0，视频从 0 递增
  pub index: usize,
  /// 帧在磁盘上的路径（如果已落盘）
  pub path: Option<PathBuf>,
}

impl Frame {
  pub fn new(index: usize, image: RgbImage) -> Self {
    Self {
      image,
      index,
      path: None,
    }
  }

  pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.path = Some(path.into());
    self
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }
}
