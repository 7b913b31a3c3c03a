// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_video_file.rs - 保存视频文件
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

//! 视频文件输出模块
//!
//! 有检测结果的帧先被标注并保存为图片，处理结束后按帧索引升序重新编码为 MP4。
//! 帧尺寸以第一帧为准，后续帧尺寸不一致时直接报错，不会生成损坏的视频。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, error, info, warn};

use crate::{
  config::{MAX_FPS, MIN_FPS},
  frame::Frame,
  model::FrameDetections,
  output::{OutputError, Render, SaveImageFileOutput},
};

/// 视频帧缓存
struct FrameBuffer {
  temp_dir: PathBuf,
  frames: usize,
  size: Option<(u32, u32)>,
}

impl FrameBuffer {
  fn new(output_path: &Path) -> Result<Self, OutputError> {
    // 在输出文件旁边创建临时目录
    let mut temp_dir = output_path.as_os_str().to_owned();
    temp_dir.push(".frames");
    let temp_dir = PathBuf::from(temp_dir);
    if temp_dir.exists() {
      std::fs::remove_dir_all(&temp_dir)?;
    }
    std::fs::create_dir_all(&temp_dir)?;

    Ok(FrameBuffer {
      temp_dir,
      frames: 0,
      size: None,
    })
  }

  fn add_frame(&mut self, path: &Path) -> Result<(), OutputError> {
    let image = image::open(path)?.to_rgb8();
    let actual = image.dimensions();

    match self.size {
      None => self.size = Some(actual),
      Some(expected) if expected != actual => {
        error!(
          "帧尺寸不一致: {} 为 {:?}, 首帧为 {:?}",
          path.display(),
          actual,
          expected
        );
        return Err(OutputError::InconsistentFrameSize {
          index: self.frames,
          expected,
          actual,
        });
      }
      Some(_) => {}
    }

    // ffmpeg 的图片序列输入要求编号连续
    let frame_path = self.temp_dir.join(format!("frame_{:06}.png", self.frames));
    image.save(&frame_path)?;
    self.frames += 1;

    Ok(())
  }

  fn encode_to_video(&self, ffmpeg: &Path, output_path: &Path, fps: u32) -> Result<(), OutputError> {
    info!(
      "开始编码视频: {} 帧 @ {} fps -> {}",
      self.frames,
      fps,
      output_path.display()
    );

    if let Some(parent) = output_path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    // 使用 ffmpeg 将帧序列编码为 MP4
    let ffmpeg_result = Command::new(ffmpeg)
      .arg("-nostdin")
      .arg("-y") // 覆盖已存在的文件
      .arg("-loglevel")
      .arg("error")
      .arg("-framerate")
      .arg(fps.to_string())
      .arg("-i")
      .arg(self.temp_dir.join("frame_%06d.png"))
      .arg("-vf")
      .arg("pad=ceil(iw/2)*2:ceil(ih/2)*2") // yuv420p 要求宽高为偶数
      .arg("-c:v")
      .arg("libx264")
      .arg("-pix_fmt")
      .arg("yuv420p")
      .arg("-preset")
      .arg("fast")
      .arg("-crf")
      .arg("23")
      .arg(output_path)
      .stdin(Stdio::null())
      .output();

    match ffmpeg_result {
      Ok(output) if output.status.success() => {
        info!("视频编码成功: {}", output_path.display());
        Ok(())
      }
      Ok(output) => {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("ffmpeg 错误: {}", stderr);
        Err(OutputError::EncodingError(format!("ffmpeg 失败: {}", stderr)))
      }
      Err(e) => {
        error!("无法执行 ffmpeg: {}", e);
        Err(OutputError::EncodingError(format!(
          "无法执行 ffmpeg (请确保已安装): {}",
          e
        )))
      }
    }
  }
}

/// RAII 守卫确保临时帧目录总是被清理
struct CleanupGuard(PathBuf);

impl Drop for CleanupGuard {
  fn drop(&mut self) {
    if let Err(e) = std::fs::remove_dir_all(&self.0) {
      warn!("清理临时目录失败: {}", e);
    }
  }
}

/// 将有序的标注帧重新组装为视频
pub struct VideoAssembler {
  ffmpeg: PathBuf,
  fps: u32,
}

impl VideoAssembler {
  pub fn new(ffmpeg: impl Into<PathBuf>, fps: u32) -> Result<Self, OutputError> {
    if !(MIN_FPS..=MAX_FPS).contains(&fps) {
      return Err(OutputError::ValidationError(format!(
        "FPS {} 超出有效范围 [{}, {}]",
        fps, MIN_FPS, MAX_FPS
      )));
    }

    Ok(Self {
      ffmpeg: ffmpeg.into(),
      fps,
    })
  }

  pub fn fps(&self) -> u32 {
    self.fps
  }

  /// 按给定顺序编码帧，没有帧时不生成视频并返回 `None`
  pub fn assemble(&self, frames: &[PathBuf], output: &Path) -> Result<Option<PathBuf>, OutputError> {
    if frames.is_empty() {
      info!("没有帧可以编码为视频，跳过编码过程");
      return Ok(None);
    }

    let mut buffer = FrameBuffer::new(output)?;
    let _cleanup = CleanupGuard(buffer.temp_dir.clone());

    for path in frames {
      buffer.add_frame(path)?;
    }
    debug!("已缓存 {} 帧: {}", buffer.frames, buffer.temp_dir.display());

    buffer.encode_to_video(&self.ffmpeg, output, self.fps)?;
    Ok(Some(output.to_path_buf()))
  }
}

/// 逐帧保存标注图片，结束时组装为视频
pub struct SaveVideoFileOutput<'a> {
  path: PathBuf,
  frames: SaveImageFileOutput<'a>,
  assembler: VideoAssembler,
  rendered: RefCell<Vec<(usize, PathBuf)>>,
}

impl<'a> SaveVideoFileOutput<'a> {
  pub fn new(
    path: impl Into<PathBuf>,
    frames: SaveImageFileOutput<'a>,
    assembler: VideoAssembler,
  ) -> Self {
    Self {
      path: path.into(),
      frames,
      assembler,
      rendered: RefCell::new(Vec::new()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 已标注的帧，按帧索引升序
  pub fn rendered_frames(&self) -> Vec<PathBuf> {
    let mut rendered = self.rendered.borrow().clone();
    rendered.sort_by_key(|(index, _)| *index);
    rendered.dedup_by_key(|(index, _)| *index);
    rendered.into_iter().map(|(_, path)| path).collect()
  }

  pub fn finish(self) -> Result<Option<PathBuf>, OutputError> {
    let frames = self.rendered_frames();
    self.assembler.assemble(&frames, &self.path)
  }
}

impl Render for SaveVideoFileOutput<'_> {
  type Error = OutputError;

  fn render_result(
    &self,
    frame: &Frame,
    result: &FrameDetections,
  ) -> Result<PathBuf, Self::Error> {
    let path = self.frames.render_result(frame, result)?;
    self.rendered.borrow_mut().push((frame.index, path.clone()));
    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::{model::Detection, output::draw::Draw};

  fn bogus_assembler(dir: &Path) -> VideoAssembler {
    VideoAssembler::new(dir.join("no-such-ffmpeg"), 25).unwrap()
  }

  #[test]
  fn fps_is_validated() {
    assert!(VideoAssembler::new("ffmpeg", 0).is_err());
    assert!(VideoAssembler::new("ffmpeg", 121).is_err());
    assert_eq!(VideoAssembler::new("ffmpeg", 30).unwrap().fps(), 30);
  }

  #[test]
  fn no_frames_means_no_video() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("clip.mp4");
    assert!(bogus_assembler(dir.path()).assemble(&[], &output).unwrap().is_none());
    assert!(!output.exists());
  }

  #[test]
  fn mismatched_frame_size_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("0.jpg");
    let second = dir.path().join("1.jpg");
    RgbImage::new(16, 16).save(&first).unwrap();
    RgbImage::new(32, 16).save(&second).unwrap();

    let output = dir.path().join("clip.mp4");
    let result = bogus_assembler(dir.path()).assemble(&[first, second], &output);
    assert!(matches!(
      result,
      Err(OutputError::InconsistentFrameSize {
        index: 1,
        expected: (16, 16),
        actual: (32, 16),
      })
    ));
    assert!(!dir.path().join("clip.mp4.frames").exists());
  }

  #[test]
  fn missing_encoder_is_an_encoding_error() {
    let dir = tempfile::tempdir().unwrap();
    let frame = dir.path().join("0.jpg");
    RgbImage::new(16, 16).save(&frame).unwrap();

    let output = dir.path().join("clip.mp4");
    assert!(matches!(
      bogus_assembler(dir.path()).assemble(&[frame], &output),
      Err(OutputError::EncodingError(_))
    ));
  }

  #[test]
  fn rendered_frames_are_sorted_by_index() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Draw::default();
    let output = SaveVideoFileOutput::new(
      dir.path().join("clip.mp4"),
      SaveImageFileOutput::new(dir.path().join("frames"), &draw),
      bogus_assembler(dir.path()),
    );

    let result: FrameDetections = vec![Detection::new("car", 0.5, [1.0, 1.0, 5.0, 5.0])].into();
    for index in [5, 2] {
      output
        .render_result(&Frame::new(index, RgbImage::new(8, 8)), &result)
        .unwrap();
    }

    assert_eq!(
      output.rendered_frames(),
      vec![
        dir.path().join("frames").join("2.jpg"),
        dir.path().join("frames").join("5.jpg"),
      ]
    );
  }
}
