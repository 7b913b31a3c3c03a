// 该文件是 Kanjian （看见） 项目的一部分。
// src/detector.rs - 检测适配器
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

use std::time::Instant;

use image::imageops::{self, FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::Frame,
  model::{Detection, FrameDetections, Model},
};

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("第 {index} 帧推理失败: {source}")]
  Inference {
    index: usize,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
  #[error("推理尺寸无效: {0}")]
  InvalidInferenceSize(u32),
}

/// 检测适配器
///
/// 同一次提交中的所有帧都按固定的正方形推理尺寸送入模型，
/// 返回的边框再映射回原始帧的像素坐标。
pub struct Detector<M> {
  model: M,
  inference_size: u32,
}

impl<M: Model> Detector<M> {
  pub fn new(model: M, inference_size: u32) -> Result<Self, DetectError> {
    if inference_size == 0 {
      return Err(DetectError::InvalidInferenceSize(inference_size));
    }
    Ok(Self {
      model,
      inference_size,
    })
  }

  pub fn inference_size(&self) -> u32 {
    self.inference_size
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn detect(&self, frame: &Frame) -> Result<FrameDetections, DetectError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
      return Err(DetectError::Inference {
        index: frame.index,
        source: format!("帧尺寸为空: {}x{}", width, height).into(),
      });
    }

    let size = self.inference_size;
    let input = imageops::resize(&frame.image, size, size, FilterType::Triangle);

    let now = Instant::now();
    let raw = self
      .model
      .infer(&input)
      .map_err(|e| DetectError::Inference {
        index: frame.index,
        source: Box::new(e),
      })?;
    debug!(
      "第 {} 帧推理完成，耗时: {:.2?}，检测到 {} 个对象",
      frame.index,
      now.elapsed(),
      raw.len()
    );

    let scale_x = width as f32 / size as f32;
    let scale_y = height as f32 / size as f32;
    let items: Vec<Detection> = raw
      .into_iter()
      .map(|det| rescale(det, scale_x, scale_y, width as f32, height as f32))
      .collect();

    Ok(FrameDetections::from(items))
  }
}

fn rescale(det: Detection, scale_x: f32, scale_y: f32, width: f32, height: f32) -> Detection {
  let [x_min, y_min, x_max, y_max] = det.bbox;
  let confidence = if det.confidence.is_nan() {
    0.0
  } else {
    det.confidence.clamp(0.0, 1.0)
  };

  Detection {
    label: det.label,
    confidence,
    bbox: [
      (x_min * scale_x).clamp(0.0, width),
      (y_min * scale_y).clamp(0.0, height),
      (x_max * scale_x).clamp(0.0, width),
      (y_max * scale_y).clamp(0.0, height),
    ],
  }
}
