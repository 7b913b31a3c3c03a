// 该文件是 Kanjian （看见） 项目的一部分。
// src/pipeline.rs - 检测流水线
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

//! 检测流水线
//!
//! 一次提交（一张图片或一个视频）从头到尾同步处理，文件布局如下：
//!
//! ```text
//! <upload_dir>/<name>                                  原始上传文件
//! <upload_dir>/annotated/<name>                        图片的标注结果
//! <upload_dir>/<stem>/<index>.jpg                      视频抽出的帧
//! <upload_dir>/<stem>/annotated/frames/<index>.jpg     有检测结果的视频帧
//! <upload_dir>/<stem>/annotated/<stem>.mp4             重新组装的标注视频
//! ```
//!
//! 同一提交重复处理时覆盖已有文件。流水线不持有跨提交的可变状态。

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  aggregate::AggregatedResult,
  config::{ConfigError, PipelineConfig},
  detector::{DetectError, Detector},
  frame::MediaKind,
  input::{self, InputError},
  model::Model,
  output::{OutputError, SaveImageFileOutput, SaveVideoFileOutput, VideoAssembler, draw::Draw},
  task::{ImageTask, Task, VideoTask},
};

const ANNOTATED_DIR: &str = "annotated";
const ANNOTATED_FRAMES_DIR: &str = "frames";
const VIDEO_EXTENSION: &str = "mp4";

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("检测错误: {0}")]
  Detect(#[from] DetectError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("提交无效: {0}")]
  InvalidSubmission(String),
}

impl PipelineError {
  /// 媒体本身无法读取，调用方应提示用户“无法处理该媒体”
  pub fn is_unreadable_media(&self) -> bool {
    matches!(
      self,
      PipelineError::Input(InputError::UnreadableMedia { .. } | InputError::UnknownKind(_))
    )
  }
}

/// 一次提交
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
  name: String,
  kind: MediaKind,
  source: Option<String>,
}

impl Submission {
  /// 已保存在上传目录中的图片，`name` 为其文件名
  pub fn image(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: MediaKind::Image,
      source: None,
    }
  }

  /// 视频链接或路径，`name` 决定该提交的工作目录
  pub fn video(name: impl Into<String>, source: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: MediaKind::Video,
      source: Some(source.into()),
    }
  }

  /// 已保存在上传目录中的视频文件
  pub fn uploaded_video(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: MediaKind::Video,
      source: None,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> MediaKind {
    self.kind
  }

  pub fn stem(&self) -> &str {
    Path::new(&self.name)
      .file_stem()
      .and_then(|stem| stem.to_str())
      .unwrap_or(&self.name)
  }

  fn validate(&self) -> Result<(), PipelineError> {
    let name = self.name.as_str();
    if name.is_empty()
      || name == "."
      || name == ".."
      || name.contains(['/', '\\', '\0'])
    {
      return Err(PipelineError::InvalidSubmission(format!(
        "文件名不合法: {:?}",
        name
      )));
    }
    if self.kind == MediaKind::Image && MediaKind::from_path(name).is_none() {
      return Err(PipelineError::InvalidSubmission(format!(
        "不支持的图片格式: {:?}",
        name
      )));
    }
    if self.kind == MediaKind::Video && self.source.is_none() && self.stem() == name {
      return Err(PipelineError::InvalidSubmission(format!(
        "上传的视频缺少扩展名: {:?}",
        name
      )));
    }
    if self.stem() == ANNOTATED_DIR {
      return Err(PipelineError::InvalidSubmission(format!(
        "文件名与输出目录冲突: {:?}",
        name
      )));
    }
    Ok(())
  }
}

/// 流水线的产出
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
  pub kind: MediaKind,
  pub result: AggregatedResult,
  /// 标注图片，按帧索引升序
  pub annotated_images: Vec<PathBuf>,
  pub annotated_video: Option<PathBuf>,
  pub frames_processed: usize,
  pub frames_failed: usize,
  pub detections: usize,
}

/// 检测流水线，持有长期存活的模型句柄
pub struct Pipeline<M> {
  detector: Detector<M>,
  config: PipelineConfig,
  draw: Draw,
}

impl<M: Model> Pipeline<M> {
  pub fn new(model: M, config: PipelineConfig) -> Result<Self, PipelineError> {
    config.validate()?;
    if let Some(size) = model.input_size()
      && size != config.inference_size
    {
      return Err(PipelineError::Config(ConfigError::ValidationError(format!(
        "推理尺寸 {} 与模型输入尺寸 {} 不一致",
        config.inference_size, size
      ))));
    }
    let detector = Detector::new(model, config.inference_size)?;
    let draw = match &config.font {
      Some(font) => Draw::with_font_file(font)?,
      None => Draw::default(),
    };

    info!(
      "流水线就绪: 上传目录 {}, 推理尺寸 {}, 输出帧率 {}",
      config.upload_dir.display(),
      config.inference_size,
      config.fps
    );

    Ok(Self {
      detector,
      config,
      draw,
    })
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn detector(&self) -> &Detector<M> {
    &self.detector
  }

  pub fn original_path(&self, submission: &Submission) -> PathBuf {
    self.config.upload_dir.join(submission.name())
  }

  pub fn frames_dir(&self, submission: &Submission) -> PathBuf {
    self.config.upload_dir.join(submission.stem())
  }

  pub fn annotated_dir(&self, submission: &Submission) -> PathBuf {
    match submission.kind() {
      MediaKind::Image => self.config.upload_dir.join(ANNOTATED_DIR),
      MediaKind::Video => self.frames_dir(submission).join(ANNOTATED_DIR),
    }
  }

  pub fn process(&self, submission: &Submission) -> Result<PipelineOutput, PipelineError> {
    submission.validate()?;
    info!("处理提交: {} ({})", submission.name(), submission.kind());

    match submission.kind() {
      MediaKind::Image => self.process_image(submission),
      MediaKind::Video => self.process_video(submission),
    }
  }

  fn source(&self, submission: &Submission) -> String {
    submission.source.clone().unwrap_or_else(|| {
      self
        .original_path(submission)
        .to_string_lossy()
        .into_owned()
    })
  }

  fn process_image(&self, submission: &Submission) -> Result<PipelineOutput, PipelineError> {
    let source = self.source(submission);
    let input = input::normalize(
      &source,
      MediaKind::Image,
      &self.config.upload_dir,
      &self.config,
    )?;

    let output = SaveImageFileOutput::new(self.annotated_dir(submission), &self.draw)
      .with_file_name(submission.name());

    // 清除上一次处理留下的标注结果
    let stale = self.annotated_dir(submission).join(submission.name());
    if stale.is_file() {
      warn!("删除旧的标注文件: {}", stale.display());
      std::fs::remove_file(&stale).map_err(OutputError::from)?;
    }

    let report = ImageTask.run_task(input, &self.detector, &output)?;

    Ok(PipelineOutput {
      kind: MediaKind::Image,
      result: report.result,
      annotated_images: report.annotated,
      annotated_video: None,
      frames_processed: report.frames,
      frames_failed: report.failed_frames,
      detections: report.detections,
    })
  }

  fn process_video(&self, submission: &Submission) -> Result<PipelineOutput, PipelineError> {
    let source = self.source(submission);
    let frames_dir = self.frames_dir(submission);
    let input = input::normalize(&source, MediaKind::Video, &frames_dir, &self.config)?;

    let annotated_dir = self.annotated_dir(submission);
    let output = SaveVideoFileOutput::new(
      annotated_dir.join(format!("{}.{}", submission.stem(), VIDEO_EXTENSION)),
      SaveImageFileOutput::new(annotated_dir.join(ANNOTATED_FRAMES_DIR), &self.draw),
      VideoAssembler::new(&self.config.ffmpeg, self.config.fps)?,
    );

    let report = VideoTask::default()
      .with_frame_number(Some(self.config.max_frames))
      .run_task(input, &self.detector, &output)?;
    let annotated_video = output.finish()?;

    Ok(PipelineOutput {
      kind: MediaKind::Video,
      result: report.result,
      annotated_images: report.annotated,
      annotated_video,
      frames_processed: report.frames,
      frames_failed: report.failed_frames,
      detections: report.detections,
    })
  }
}
