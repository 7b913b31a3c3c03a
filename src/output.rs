// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 输出定义
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

use std::path::PathBuf;

use thiserror::Error;

use crate::{frame::Frame, model::FrameDetections};

/// 将一帧的检测结果绘制并落盘，返回标注文件的路径
pub trait Render {
  type Error;
  fn render_result(&self, frame: &Frame, result: &FrameDetections)
  -> Result<PathBuf, Self::Error>;
}

impl<R: Render + ?Sized> Render for &R {
  type Error = R::Error;

  fn render_result(
    &self,
    frame: &Frame,
    result: &FrameDetections,
  ) -> Result<PathBuf, Self::Error> {
    (**self).render_result(frame, result)
  }
}

pub mod draw;

mod save_image_file;
pub use self::save_image_file::SaveImageFileOutput;

mod save_video_file;
pub use self::save_video_file::{SaveVideoFileOutput, VideoAssembler};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("字体加载错误: {0}")]
  FontLoadError(String),
  #[error("第 {index} 帧尺寸不一致: 期望 {expected:?}, 实际 {actual:?}")]
  InconsistentFrameSize {
    index: usize,
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}
