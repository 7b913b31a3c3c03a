// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/video_file.rs - 视频抽帧输入
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

//! 视频抽帧输入
//!
//! 使用 ffmpeg 命令行工具把视频（本地文件或链接）逐帧解码到
//! `<frames_dir>/<index>.jpg`，索引从 0 开始。之后按索引顺序读取，
//! 遇到缺失或无法解码的帧即停止，已读取的帧照常交给后续处理。
//!
//! 抽帧受两个上限约束：最大帧数与总耗时，触及任一上限时保留已抽取的帧。

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::{config::PipelineConfig, frame::Frame, input::InputError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL_BYTES: usize = 4096;

/// 第 `index` 帧在抽帧目录中的路径
pub fn frame_path(frames_dir: &Path, index: usize) -> PathBuf {
  frames_dir.join(format!("{}.jpg", index))
}

/// 统计从 0 开始连续存在的帧文件数量
fn count_frames(frames_dir: &Path) -> usize {
  (0..)
    .take_while(|&index| frame_path(frames_dir, index).is_file())
    .count()
}

/// 清空并重建目录，保证重复处理同一提交时覆盖而不是累积
pub(crate) fn reset_dir(dir: &Path) -> Result<(), std::io::Error> {
  if dir.exists() {
    std::fs::remove_dir_all(dir)?;
  }
  std::fs::create_dir_all(dir)
}

/// 只保留 stderr 的末尾部分用于日志与错误信息
fn stderr_tail(stderr: &[u8]) -> std::borrow::Cow<'_, str> {
  let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
  String::from_utf8_lossy(&stderr[start..])
}

/// RAII 守卫确保子进程在任何退出路径上都被回收
struct ChildGuard(Child);

impl Drop for ChildGuard {
  fn drop(&mut self) {
    if let Ok(None) = self.0.try_wait() {
      warn!("终止仍在运行的 ffmpeg 进程");
      let _ = self.0.kill();
      let _ = self.0.wait();
    }
  }
}

pub struct FrameExtractor {
  ffmpeg: PathBuf,
  max_frames: usize,
  timeout: Duration,
}

impl FrameExtractor {
  pub fn new(ffmpeg: impl Into<PathBuf>, max_frames: usize, timeout: Duration) -> Self {
    Self {
      ffmpeg: ffmpeg.into(),
      max_frames,
      timeout,
    }
  }

  pub fn from_config(config: &PipelineConfig) -> Self {
    Self::new(&config.ffmpeg, config.max_frames, config.extract_timeout)
  }

  /// 抽取视频帧到 `frames_dir`，返回可用的连续帧数量
  pub fn extract(&self, source: &str, frames_dir: &Path) -> Result<usize, InputError> {
    reset_dir(frames_dir)?;

    info!(
      "开始抽帧: {} -> {} (最多 {} 帧, 超时 {:?})",
      source,
      frames_dir.display(),
      self.max_frames,
      self.timeout
    );

    let child = Command::new(&self.ffmpeg)
      .arg("-nostdin")
      .arg("-y")
      .arg("-loglevel")
      .arg("error")
      .arg("-i")
      .arg(source)
      .arg("-map")
      .arg("0:v:0")
      .arg("-frames:v")
      .arg(self.max_frames.to_string())
      .arg("-start_number")
      .arg("0")
      .arg("-q:v")
      .arg("2")
      .arg(frames_dir.join("%d.jpg"))
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| {
        error!("无法执行 ffmpeg: {}", e);
        InputError::DecoderSpawn(e)
      })?;
    let mut child = ChildGuard(child);

    // 运行期间持续读取 stderr，避免管道写满后 ffmpeg 阻塞
    let stderr_reader = child.0.stderr.take().map(|mut pipe| {
      std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
      })
    });

    let deadline = Instant::now() + self.timeout;
    let status = loop {
      match child.0.try_wait()? {
        Some(status) => break Some(status),
        None if Instant::now() >= deadline => {
          warn!("抽帧超过时间上限 {:?}，保留已抽取的帧", self.timeout);
          let _ = child.0.kill();
          let _ = child.0.wait();
          break None;
        }
        None => std::thread::sleep(POLL_INTERVAL),
      }
    };

    let stderr = stderr_reader
      .and_then(|reader| reader.join().ok())
      .unwrap_or_default();
    let stderr = stderr_tail(&stderr);
    let stderr = stderr.trim();

    let count = count_frames(frames_dir);
    debug!("抽帧目录中共有 {} 帧", count);

    if count == 0 {
      let reason = if stderr.is_empty() {
        "没有可解码的视频帧".to_string()
      } else {
        stderr.to_string()
      };
      return Err(InputError::unreadable(source, reason));
    }

    if let Some(status) = status
      && !status.success()
    {
      warn!(
        "视频解码中途失败 ({})，保留已解码的 {} 帧: {}",
        status, count, stderr
      );
    }
    if count >= self.max_frames {
      warn!("已达到最大帧数限制: {}", self.max_frames);
    }

    Ok(count.min(self.max_frames))
  }
}

/// 按索引顺序读取抽帧目录中的帧
pub struct VideoFileInput {
  frames_dir: PathBuf,
  next_index: usize,
  limit: Option<usize>,
  finished: bool,
}

impl VideoFileInput {
  pub fn open(frames_dir: impl Into<PathBuf>) -> Result<Self, InputError> {
    let frames_dir = frames_dir.into();
    if !frames_dir.is_dir() {
      return Err(InputError::unreadable(
        frames_dir.display(),
        "抽帧目录不存在",
      ));
    }

    Ok(Self {
      frames_dir,
      next_index: 0,
      limit: None,
      finished: false,
    })
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn frames_dir(&self) -> &Path {
    &self.frames_dir
  }
}

impl Iterator for VideoFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished || self.limit.is_some_and(|limit| self.next_index >= limit) {
      return None;
    }

    let index = self.next_index;
    let path = frame_path(&self.frames_dir, index);
    if !path.is_file() {
      self.finished = true;
      return None;
    }

    match image::open(&path) {
      Ok(image) => {
        self.next_index += 1;
        Some(Frame::new(index, image.to_rgb8()).with_path(path))
      }
      Err(e) => {
        warn!("第 {} 帧解码失败，停止读取: {}", index, e);
        self.finished = true;
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;

  fn write_frames(dir: &Path, count: usize) {
    for index in 0..count {
      RgbImage::new(4, 4).save(frame_path(dir, index)).unwrap();
    }
  }

  #[test]
  fn reads_frames_in_index_order() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 12);

    let indices: Vec<usize> = VideoFileInput::open(dir.path())
      .unwrap()
      .map(|frame| frame.index)
      .collect();
    assert_eq!(indices, (0..12).collect::<Vec<_>>());
    assert_eq!(count_frames(dir.path()), 12);
  }

  #[test]
  fn stops_at_first_undecodable_frame() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 5);
    std::fs::write(frame_path(dir.path(), 3), b"truncated").unwrap();

    let frames: Vec<Frame> = VideoFileInput::open(dir.path()).unwrap().collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2].path, Some(frame_path(dir.path(), 2)));
  }

  #[test]
  fn respects_limit() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 5);
    let input = VideoFileInput::open(dir.path()).unwrap().with_limit(2);
    assert_eq!(input.count(), 2);
  }

  #[test]
  fn missing_directory_is_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      VideoFileInput::open(dir.path().join("nope")),
      Err(InputError::UnreadableMedia { .. })
    ));
  }

  #[test]
  fn missing_decoder_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = FrameExtractor::new(
      dir.path().join("no-such-ffmpeg"),
      10,
      Duration::from_secs(1),
    );
    assert!(matches!(
      extractor.extract("clip.mp4", &dir.path().join("clip")),
      Err(InputError::DecoderSpawn(_))
    ));
  }

  /// 用 shell 脚本代替 ffmpeg：脚本把预先生成的帧复制到输出目录
  #[cfg(unix)]
  mod scripted {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn fixture(dir: &Path, count: usize) -> PathBuf {
      let fixture = dir.join("fixture");
      std::fs::create_dir_all(&fixture).unwrap();
      write_frames(&fixture, count);
      fixture
    }

    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
      let path = dir.join("ffmpeg");
      let script = format!(
        "#!/bin/sh\nfor arg; do out=\"$arg\"; done\ndir=$(dirname \"$out\")\n{}\n",
        body
      );
      std::fs::write(&path, script).unwrap();
      std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
      path
    }

    fn copy_frames(fixture: &Path) -> String {
      format!("cp '{}'/*.jpg \"$dir\"/", fixture.display())
    }

    #[test]
    fn extracts_every_frame() {
      let dir = tempfile::tempdir().unwrap();
      let fixture = fixture(dir.path(), 4);
      let ffmpeg = fake_ffmpeg(dir.path(), &copy_frames(&fixture));
      let frames_dir = dir.path().join("clip");

      let count = FrameExtractor::new(ffmpeg, 100, Duration::from_secs(10))
        .extract("clip.mp4", &frames_dir)
        .unwrap();
      assert_eq!(count, 4);

      let indices: Vec<usize> = VideoFileInput::open(&frames_dir)
        .unwrap()
        .with_limit(count)
        .map(|frame| frame.index)
        .collect();
      assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn keeps_frames_decoded_before_failure() {
      let dir = tempfile::tempdir().unwrap();
      let fixture = fixture(dir.path(), 3);
      let body = format!(
        "{}\necho 'Invalid data found when processing input' >&2\nexit 1",
        copy_frames(&fixture)
      );
      let ffmpeg = fake_ffmpeg(dir.path(), &body);

      let count = FrameExtractor::new(ffmpeg, 100, Duration::from_secs(10))
        .extract("clip.mp4", &dir.path().join("clip"))
        .unwrap();
      assert_eq!(count, 3);
    }

    #[test]
    fn noisy_decoder_does_not_stall() {
      let dir = tempfile::tempdir().unwrap();
      let fixture = fixture(dir.path(), 1);
      let body = format!(
        "{}\nhead -c 200000 /dev/zero | tr '\\0' x >&2\nexit 1",
        copy_frames(&fixture)
      );
      let ffmpeg = fake_ffmpeg(dir.path(), &body);

      let started = Instant::now();
      let count = FrameExtractor::new(ffmpeg, 100, Duration::from_secs(20))
        .extract("clip.mp4", &dir.path().join("clip"))
        .unwrap();
      assert_eq!(count, 1);
      assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn frame_count_is_capped() {
      let dir = tempfile::tempdir().unwrap();
      let fixture = fixture(dir.path(), 5);
      let ffmpeg = fake_ffmpeg(dir.path(), &copy_frames(&fixture));

      let count = FrameExtractor::new(ffmpeg, 3, Duration::from_secs(10))
        .extract("clip.mp4", &dir.path().join("clip"))
        .unwrap();
      assert_eq!(count, 3);
    }

    #[test]
    fn slow_decoder_is_killed_at_deadline() {
      let dir = tempfile::tempdir().unwrap();
      let fixture = fixture(dir.path(), 2);
      let body = format!("{}\nexec sleep 30", copy_frames(&fixture));
      let ffmpeg = fake_ffmpeg(dir.path(), &body);

      let started = Instant::now();
      let count = FrameExtractor::new(ffmpeg, 100, Duration::from_millis(500))
        .extract("clip.mp4", &dir.path().join("clip"))
        .unwrap();
      assert_eq!(count, 2);
      assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[test]
    fn decoder_without_frames_is_unreadable() {
      let dir = tempfile::tempdir().unwrap();
      let ffmpeg = fake_ffmpeg(dir.path(), "echo 'clip.mp4: No such file or directory' >&2\nexit 1");

      match FrameExtractor::new(ffmpeg, 100, Duration::from_secs(10))
        .extract("clip.mp4", &dir.path().join("clip"))
      {
        Err(InputError::UnreadableMedia { reason, .. }) => {
          assert!(reason.contains("No such file"));
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
      }
    }
  }

  #[test]
  fn reset_dir_clears_stale_frames() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("clip");
    std::fs::create_dir_all(&frames).unwrap();
    write_frames(&frames, 2);
    reset_dir(&frames).unwrap();
    assert!(frames.is_dir());
    assert_eq!(count_frames(&frames), 0);
  }
}
