// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型
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

use image::RgbImage;
use serde::Serialize;

/// 检测模型能力接口
///
/// 输入为已缩放到推理尺寸的正方形图像，输出边框坐标位于该输入图像的像素空间。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: &RgbImage) -> Result<Vec<Detection>, Self::Error>;

  /// 模型要求的固定输入边长，任意尺寸都可接受时为 `None`
  fn input_size(&self) -> Option<u32> {
    None
  }
}

impl<M: Model + ?Sized> Model for &M {
  type Error = M::Error;

  fn infer(&self, input: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    (**self).infer(input)
  }

  fn input_size(&self) -> Option<u32> {
    (**self).input_size()
  }
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Error = M::Error;

  fn infer(&self, input: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    (**self).infer(input)
  }

  fn input_size(&self) -> Option<u32> {
    (**self).input_size()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
}

impl Detection {
  pub fn new(label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
    Self {
      label: label.into(),
      confidence,
      bbox,
    }
  }
}

/// 单帧的检测结果，空结果是正常情况
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameDetections {
  pub items: Box<[Detection]>,
}

impl FrameDetections {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for FrameDetections {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl<'a> IntoIterator for &'a FrameDetections {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

pub mod labels;
mod yolo;
pub use self::labels::Labels;
pub use self::yolo::{TensorBackend, Yolo, YoloBuilder, YoloError};
