// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 逐帧检测任务
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
use std::time::Instant;

use tracing::{info, warn};

use crate::{
  aggregate::{AggregatedResult, Aggregator},
  detector::Detector,
  frame::Frame,
  input::InputError,
  model::{FrameDetections, Model},
  output::{OutputError, Render},
  pipeline::PipelineError,
};

/// 一次任务的产出
#[derive(Debug, Clone, Default)]
pub struct TaskReport {
  pub result: AggregatedResult,
  /// 标注图片路径，按帧索引升序
  pub annotated: Vec<PathBuf>,
  /// 参与汇总的帧数
  pub frames: usize,
  /// 推理失败而被跳过的帧数
  pub failed_frames: usize,
  pub detections: usize,
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, detector: &Detector<M>, output: &O) -> Result<TaskReport, Self::Error>;
}

/// 单张图片：推理失败即整个任务失败
pub struct ImageTask;

impl<I, M, O> Task<I, M, O> for ImageTask
where
  I: Iterator<Item = Frame>,
  M: Model,
  O: Render<Error = OutputError>,
{
  type Error = PipelineError;

  fn run_task(self, mut input: I, detector: &Detector<M>, output: &O) -> Result<TaskReport, Self::Error> {
    info!("开始图片任务...");
    let frame = input
      .next()
      .ok_or_else(|| InputError::unreadable("image", "没有输入帧"))?;

    let now = Instant::now();
    let detections = detector.detect(&frame)?;
    info!(
      "推理完成，耗时: {:.2?}，检测到 {} 个对象",
      now.elapsed(),
      detections.len()
    );

    let mut annotated = Vec::new();
    if detections.is_empty() {
      info!("未检测到对象，跳过标注");
    } else {
      annotated.push(output.render_result(&frame, &detections)?);
    }

    let mut aggregator = Aggregator::new();
    aggregator.push(&detections);
    let total = aggregator.detections();

    Ok(TaskReport {
      result: aggregator.finish(),
      annotated,
      frames: 1,
      failed_frames: 0,
      detections: total,
    })
  }
}

/// 视频：逐帧推理，单帧推理失败视为该帧无检测结果并继续
#[derive(Default, Debug)]
pub struct VideoTask {
  frame_number: Option<usize>,
}

impl VideoTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<I, M, O> Task<I, M, O> for VideoTask
where
  I: Iterator<Item = Frame>,
  M: Model,
  O: Render<Error = OutputError>,
{
  type Error = PipelineError;

  fn run_task(self, input: I, detector: &Detector<M>, output: &O) -> Result<TaskReport, Self::Error> {
    info!("开始视频任务...");
    let started = Instant::now();
    let mut aggregator = Aggregator::new();
    let mut annotated = Vec::new();
    let mut failed_frames = 0usize;

    for frame in input {
      if self.frame_number.is_some_and(|n| aggregator.frames() >= n) {
        warn!("达到指定帧数 {}, 退出任务循环", aggregator.frames());
        break;
      }

      let detections = match detector.detect(&frame) {
        Ok(detections) => detections,
        Err(e) => {
          warn!("跳过第 {} 帧: {}", frame.index, e);
          failed_frames += 1;
          FrameDetections::default()
        }
      };

      if !detections.is_empty() {
        info!("帧 {}: 检测到 {} 个对象", frame.index, detections.len());
        annotated.push(output.render_result(&frame, &detections)?);
      }
      aggregator.push(&detections);
    }

    let frames = aggregator.frames();
    let total = aggregator.detections();
    info!(
      "视频任务完成: {} 帧, {} 帧失败, {} 个检测, {} 帧已标注, 耗时 {:.2?}",
      frames,
      failed_frames,
      total,
      annotated.len(),
      started.elapsed()
    );

    Ok(TaskReport {
      result: aggregator.finish(),
      annotated,
      frames,
      failed_frames,
      detections: total,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use image::{Rgb, RgbImage};
  use thiserror::Error;

  use super::*;
  use crate::model::Detection;

  #[derive(Debug, Error)]
  #[error("corrupt frame")]
  struct Corrupt;

  /// 根据帧的填充灰度决定检测结果：10 -> car，20 -> 两个 person，99 -> 推理失败
  struct ByShade;

  impl Model for ByShade {
    type Error = Corrupt;

    fn infer(&self, input: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
      let box_ = [10.0, 10.0, 100.0, 100.0];
      match input.get_pixel(0, 0)[0] {
        10 => Ok(vec![Detection::new("car", 0.9, box_)]),
        20 => Ok(vec![
          Detection::new("person", 0.75, box_),
          Detection::new("person", 0.5, box_),
        ]),
        99 => Err(Corrupt),
        _ => Ok(Vec::new()),
      }
    }
  }

  #[derive(Default)]
  struct Recorder {
    frames: RefCell<Vec<usize>>,
  }

  impl Render for Recorder {
    type Error = OutputError;

    fn render_result(&self, frame: &Frame, _result: &FrameDetections) -> Result<PathBuf, Self::Error> {
      self.frames.borrow_mut().push(frame.index);
      Ok(PathBuf::from(format!("{}.jpg", frame.index)))
    }
  }

  fn shaded(index: usize, shade: u8) -> Frame {
    Frame::new(index, RgbImage::from_pixel(64, 48, Rgb([shade, shade, shade])))
  }

  fn detector() -> Detector<ByShade> {
    Detector::new(ByShade, 416).unwrap()
  }

  #[test]
  fn video_annotates_only_frames_with_detections() {
    let shades = [0, 0, 10, 0, 0, 20, 0];
    let frames = shades.iter().enumerate().map(|(i, &s)| shaded(i, s));
    let recorder = Recorder::default();

    let report = VideoTask::default()
      .run_task(frames, &detector(), &recorder)
      .unwrap();

    assert_eq!(*recorder.frames.borrow(), vec![2, 5]);
    assert_eq!(report.annotated, vec![PathBuf::from("2.jpg"), PathBuf::from("5.jpg")]);
    assert_eq!(report.frames, 7);
    assert_eq!(report.detections, 3);
    assert_eq!(report.result.labels.as_deref(), Some("Car and Person"));
    assert_eq!(report.result.confidences.as_deref(), Some("90%, 75%, and 50%"));
  }

  #[test]
  fn video_skips_failed_frames() {
    let frames = [shaded(0, 99), shaded(1, 10), shaded(2, 99)].into_iter();
    let recorder = Recorder::default();

    let report = VideoTask::default()
      .run_task(frames, &detector(), &recorder)
      .unwrap();

    assert_eq!(report.failed_frames, 2);
    assert_eq!(report.frames, 3);
    assert_eq!(report.result.labels.as_deref(), Some("Car"));
  }

  #[test]
  fn video_frame_limit_stops_early() {
    let frames = (0..10).map(|i| shaded(i, 10));
    let recorder = Recorder::default();

    let report = VideoTask::default()
      .with_frame_number(Some(3))
      .run_task(frames, &detector(), &recorder)
      .unwrap();

    assert_eq!(report.frames, 3);
    assert_eq!(*recorder.frames.borrow(), vec![0, 1, 2]);
  }

  #[test]
  fn image_failure_is_fatal() {
    let recorder = Recorder::default();
    let result = ImageTask.run_task(std::iter::once(shaded(0, 99)), &detector(), &recorder);
    assert!(matches!(result, Err(PipelineError::Detect(_))));
    assert!(recorder.frames.borrow().is_empty());
  }

  #[test]
  fn image_without_detections_is_not_annotated() {
    let recorder = Recorder::default();
    let report = ImageTask
      .run_task(std::iter::once(shaded(0, 0)), &detector(), &recorder)
      .unwrap();
    assert!(!report.result.has_detections);
    assert!(report.annotated.is_empty());
    assert!(recorder.frames.borrow().is_empty());
  }

  #[test]
  fn image_task_needs_a_frame() {
    let recorder = Recorder::default();
    let result = ImageTask.run_task(std::iter::empty::<Frame>(), &detector(), &recorder);
    assert!(matches!(
      result,
      Err(PipelineError::Input(InputError::UnreadableMedia { .. }))
    ));
  }
}
