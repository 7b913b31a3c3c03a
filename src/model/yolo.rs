// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/yolo.rs - YOLO 检测头解码
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
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detection, Labels, Model},
};

const YOLO_NUM_OUTPUTS: usize = YOLO_STRIDES.len() * 2;
const YOLO_STRIDES: [u32; 3] = [8, 16, 32];
const YOLO_OBJECT_THRESH: f32 = 0.5;
const YOLO_DEFAULT_INPUT: u32 = 416;

/// 推理运行时，将正方形 RGB 输入映射为各检测头的原始输出张量
///
/// 每个检测头输出两个张量：回归（4 x H x W）与分类（C x H x W），
/// 按检测头顺序排列，头内两者顺序不限。
pub trait TensorBackend {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run(&self, input: &RgbImage) -> Result<Vec<Vec<f32>>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("推理后端错误: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("输入尺寸不匹配: 期望 {expected}x{expected}, 实际 {width}x{height}")]
  InputSize {
    expected: u32,
    width: u32,
    height: u32,
  },
  #[error("模型输出数量不匹配: 期望 {expected}, 实际 {actual}")]
  OutputCount { expected: usize, actual: usize },
  #[error("检测头 {head} 输出大小不匹配: 实际 {actual:?}, 期望回归 {reg_expected}, 期望分类 {cls_expected}")]
  TensorShape {
    head: usize,
    actual: (usize, usize),
    reg_expected: usize,
    cls_expected: usize,
  },
  #[error("标签文件错误: {0}")]
  Labels(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}

pub struct Yolo<B> {
  backend: B,
  labels: Labels,
  input_size: u32,
  object_thresh: f32,
}

pub struct YoloBuilder {
  labels: Labels,
  input_size: u32,
  object_thresh: f32,
}

impl Default for YoloBuilder {
  fn default() -> Self {
    Self {
      labels: Labels::coco(),
      input_size: YOLO_DEFAULT_INPUT,
      object_thresh: YOLO_OBJECT_THRESH,
    }
  }
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = "yolo";
}

/// `yolo:///path/to/labels.txt?size=416&thresh=0.5`，路径为空时使用 COCO 标签
impl FromUrl for YoloBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = YoloBuilder::default();
    let path = url.path();
    if !path.is_empty() && path != "/" {
      let path = urlencoding::decode(path)
        .map_err(|e| YoloError::ValidationError(format!("标签路径无效: {}", e)))?;
      info!("加载标签文件: {}", path);
      builder.labels = Labels::from_file(&*path)?;
    }

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => {
          builder.input_size = value
            .parse()
            .map_err(|_| YoloError::ValidationError(format!("推理尺寸无效: {}", value)))?
        }
        "thresh" => {
          builder.object_thresh = value
            .parse()
            .map_err(|_| YoloError::ValidationError(format!("置信度阈值无效: {}", value)))?
        }
        _ => debug!("忽略未知的模型参数: {}", key),
      }
    }

    Ok(builder)
  }
}

impl YoloBuilder {
  pub fn labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn object_thresh(mut self, object_thresh: f32) -> Self {
    self.object_thresh = object_thresh;
    self
  }

  pub fn build<B: TensorBackend>(self, backend: B) -> Result<Yolo<B>, YoloError> {
    let max_stride = YOLO_STRIDES[YOLO_STRIDES.len() - 1];
    if self.input_size == 0 || self.input_size % max_stride != 0 {
      return Err(YoloError::ValidationError(format!(
        "推理尺寸 {} 必须是 {} 的正整数倍",
        self.input_size, max_stride
      )));
    }
    if self.labels.is_empty() {
      return Err(YoloError::ValidationError("标签表为空".to_string()));
    }
    if !(0.0..1.0).contains(&self.object_thresh) {
      return Err(YoloError::ValidationError(format!(
        "置信度阈值 {} 超出范围 [0, 1)",
        self.object_thresh
      )));
    }

    info!(
      "YOLO 模型就绪: 输入 {}x{}, {} 个类别, 阈值 {}",
      self.input_size,
      self.input_size,
      self.labels.len(),
      self.object_thresh
    );

    Ok(Yolo {
      backend,
      labels: self.labels,
      input_size: self.input_size,
      object_thresh: self.object_thresh,
    })
  }
}

/// 根据张量大小匹配回归和分类输出，返回 (reg, cls)
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
  head_idx: usize,
) -> Result<(&'a [f32], &'a [f32]), YoloError> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Ok((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    debug!("检测头 {}: 输出顺序交换", head_idx);
    Ok((tensor2, tensor1))
  } else {
    error!(
      "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
      head_idx,
      tensor1.len(),
      tensor2.len(),
      reg_expected,
      cls_expected
    );
    Err(YoloError::TensorShape {
      head: head_idx,
      actual: (tensor1.len(), tensor2.len()),
      reg_expected,
      cls_expected,
    })
  }
}

impl<B> Yolo<B> {
  pub fn input_size(&self) -> u32 {
    self.input_size
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  /// 将各检测头的原始输出解码为检测列表，坐标位于输入图像像素空间
  pub fn postprocess(&self, outputs: &[Vec<f32>]) -> Result<Vec<Detection>, YoloError> {
    if outputs.len() != YOLO_NUM_OUTPUTS {
      return Err(YoloError::OutputCount {
        expected: YOLO_NUM_OUTPUTS,
        actual: outputs.len(),
      });
    }

    let class_num = self.labels.len();
    let input = self.input_size as f32;
    let mut items = Vec::new();

    for (head_idx, &stride) in YOLO_STRIDES.iter().enumerate() {
      let map_h = (self.input_size / stride) as usize;
      let map_w = map_h;
      let spatial = map_h * map_w;
      let stride = stride as f32;

      let (reg, cls) = match_reg_cls_tensors(
        &outputs[head_idx * 2],
        &outputs[head_idx * 2 + 1],
        4 * spatial,
        class_num * spatial,
        head_idx,
      )?;

      for h in 0..map_h {
        for w in 0..map_w {
          let idx = h * map_w + w;

          let (score, class_id) = {
            let mut max_logit = f32::MIN;
            let mut cls_idx = 0usize;
            for c in 0..class_num {
              let logit = cls[c * spatial + idx];
              if logit > max_logit {
                max_logit = logit;
                cls_idx = c;
              }
            }
            (sigmoid(max_logit), cls_idx)
          };

          if score <= self.object_thresh {
            continue;
          }

          let grid_x = (w as f32) + 0.5;
          let grid_y = (h as f32) + 0.5;

          let x_min = ((grid_x - reg[idx]) * stride).clamp(0.0, input);
          let y_min = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input);
          let x_max = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input);
          let y_max = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input);

          if x_min < x_max && y_min < y_max {
            items.push(Detection::new(
              self.labels.name(class_id),
              score,
              [x_min, y_min, x_max, y_max],
            ));
          }
        }
      }
    }

    debug!("检测到 {} 个物体", items.len());
    Ok(items)
  }
}

impl<B: TensorBackend> Model for Yolo<B> {
  type Error = YoloError;

  fn infer(&self, input: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    let (width, height) = input.dimensions();
    if width != self.input_size || height != self.input_size {
      return Err(YoloError::InputSize {
        expected: self.input_size,
        width,
        height,
      });
    }

    debug!("执行模型推理");
    let outputs = self
      .backend
      .run(input)
      .map_err(|e| YoloError::Backend(Box::new(e)))?;

    self.postprocess(&outputs)
  }

  fn input_size(&self) -> Option<u32> {
    Some(self.input_size)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
