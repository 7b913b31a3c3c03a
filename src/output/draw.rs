// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::info;

use crate::{
  frame::Frame,
  model::{Detection, FrameDetections},
  output::OutputError,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: u32 = 80;

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
    }
  }
}

impl Draw {
  /// 加载 TTF 字体用于绘制标签文字；未加载字体时只绘制边框
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, OutputError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data)
      .map_err(|e| OutputError::FontLoadError(format!("{}: {}", path.display(), e)))?;
    info!("已加载标注字体: {}", path.display());

    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在帧的副本上绘制全部检测结果
  pub fn draw_detection(&self, frame: &Frame, result: &FrameDetections) -> RgbImage {
    let mut image = frame.image.clone();
    self.draw_detections_on_image(&mut image, result);
    image
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &FrameDetections) {
    for det in result {
      self.draw_bbox_with_label(image, det, label_color(&det.label));
    }
  }

  // 在图像上绘制一个矩形边框，bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, det: &Detection, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (det.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (det.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (det.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (det.bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 绘制边框（加粗为2像素）
    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * thickness;
      let height = y_max - y_min - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    // 创建标签文本
    let label = format!("{} {:.2}", det.label, det.confidence);
    let scale = PxScale::from(self.font_size);
    let text_color = Rgb([255u8, 255u8, 255u8]);

    // 估算文本大小（粗略估计）
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 确定标签背景位置（在边框上方）
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);

    // 确保标签不超出图像边界
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = text_height.min(h - label_y).max(0) as u32;

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        text_color,
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        font,
        &label,
      );
    }
  }
}

/// 同一标签总是得到同一种颜色
fn label_color(label: &str) -> Rgb<u8> {
  let hash = label
    .bytes()
    .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
  let hue = (hash % PALETTE_SIZE) as f32 / PALETTE_SIZE as f32 * 360.0;
  hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h as u32 {
    0..=59 => (c, x, 0.0),
    60..=119 => (x, c, 0.0),
    120..=179 => (0.0, c, x),
    180..=239 => (0.0, x, c),
    240..=299 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn draws_box_outline_only() {
    let frame = Frame::new(0, RgbImage::new(40, 30));
    let result = FrameDetections::from(vec![Detection::new(
      "car",
      0.9,
      [5.0, 5.0, 20.0, 20.0],
    )]);
    let image = Draw::default().draw_detection(&frame, &result);

    let color = label_color("car");
    assert_eq!(*image.get_pixel(5, 5), color);
    assert_eq!(*image.get_pixel(6, 12), color);
    assert_eq!(*image.get_pixel(12, 12), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(30, 25), Rgb([0, 0, 0]));
    // 原帧不被修改
    assert_eq!(*frame.image.get_pixel(5, 5), Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_box_is_skipped() {
    let frame = Frame::new(0, RgbImage::new(10, 10));
    let result = FrameDetections::from(vec![Detection::new("car", 0.9, [4.0, 4.0, 4.0, 9.0])]);
    let image = Draw::default().draw_detection(&frame, &result);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn label_colors_are_stable() {
    assert_eq!(label_color("person"), label_color("person"));
    let Rgb([r, g, b]) = label_color("person");
    assert!(r > 0 || g > 0 || b > 0);
  }

  #[test]
  fn invalid_font_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("font.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    assert!(matches!(
      Draw::with_font_file(&path),
      Err(OutputError::FontLoadError(_))
    ));
  }
}
