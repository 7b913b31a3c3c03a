// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像文件
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

use tracing::info;

use crate::{
  frame::Frame,
  model::FrameDetections,
  output::{OutputError, Render, draw::Draw},
};

/// 把标注后的帧保存到目录中
///
/// 指定了文件名时每次都写入同一文件（单张图片），否则按帧索引命名为 `<index>.jpg`。
pub struct SaveImageFileOutput<'a> {
  directory: PathBuf,
  file_name: Option<String>,
  draw: &'a Draw,
}

impl<'a> SaveImageFileOutput<'a> {
  pub fn new(directory: impl Into<PathBuf>, draw: &'a Draw) -> Self {
    Self {
      directory: directory.into(),
      file_name: None,
      draw,
    }
  }

  pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
    self.file_name = Some(file_name.into());
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 帧对应的输出路径
  pub fn output_path(&self, frame: &Frame) -> PathBuf {
    match &self.file_name {
      Some(name) => self.directory.join(name),
      None => self.directory.join(format!("{}.jpg", frame.index)),
    }
  }

  fn save_image(&self, image: image::RgbImage, path: &Path) -> Result<(), OutputError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(path)?;
    info!("保存标注图像到文件: {}", path.display());

    Ok(())
  }
}

impl Render for SaveImageFileOutput<'_> {
  type Error = OutputError;

  fn render_result(
    &self,
    frame: &Frame,
    result: &FrameDetections,
  ) -> Result<PathBuf, Self::Error> {
    let path = self.output_path(frame);
    let image = self.draw.draw_detection(frame, result);
    self.save_image(image, &path)?;
    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::model::Detection;

  fn detections() -> FrameDetections {
    vec![Detection::new("car", 0.8, [1.0, 1.0, 6.0, 6.0])].into()
  }

  #[test]
  fn writes_indexed_files() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Draw::default();
    let output = SaveImageFileOutput::new(dir.path().join("annotated"), &draw);

    let path = output
      .render_result(&Frame::new(5, RgbImage::new(8, 8)), &detections())
      .unwrap();
    assert_eq!(path, dir.path().join("annotated").join("5.jpg"));
    assert!(path.is_file());
  }

  #[test]
  fn fixed_file_name_is_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Draw::default();
    let output = SaveImageFileOutput::new(dir.path(), &draw).with_file_name("lot.png");

    let first = output
      .render_result(&Frame::new(0, RgbImage::new(8, 8)), &detections())
      .unwrap();
    let second = output
      .render_result(&Frame::new(0, RgbImage::new(12, 8)), &detections())
      .unwrap();
    assert_eq!(first, second);
    assert_eq!(image::image_dimensions(&second).unwrap(), (12, 8));
  }
}
