// 该文件是 Kanjian （看见） 项目的一部分。
// src/aggregate.rs - 检测结果汇总
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

//! 检测结果汇总
//!
//! 将一帧或多帧的检测结果合并为两段自然语言描述：
//!
//! - 标签：按原始标签去重（保留首次出现的顺序），首字母大写、其余小写
//! - 置信度：不去重，按帧序再按帧内顺序排列，四舍六入五成双取整为百分数
//!
//! 两段描述都使用 [`and_syntax`] 连接。

use serde::Serialize;

use crate::model::FrameDetections;

/// 自然语言列表连接：`A`、`A and B`、`A, B, and C`
///
/// 空列表返回 `None`，而不是空字符串或 `"and"`。
pub fn and_syntax<S: AsRef<str>>(items: &[S]) -> Option<String> {
  match items {
    [] => None,
    [one] => Some(one.as_ref().to_string()),
    [first, second] => Some(format!("{} and {}", first.as_ref(), second.as_ref())),
    [head @ .., last] => {
      let mut parts: Vec<String> = head.iter().map(|s| s.as_ref().to_string()).collect();
      parts.push(format!("and {}", last.as_ref()));
      Some(parts.join(", "))
    }
  }
}

/// 置信度转换为 [0, 100] 的整数百分比，`.5` 时取偶数
pub fn confidence_percent(confidence: f32) -> u32 {
  if confidence.is_nan() {
    return 0;
  }
  let scaled = f64::from(confidence.clamp(0.0, 1.0)) * 100.0;
  scaled.round_ties_even() as u32
}

pub fn format_confidence(confidence: f32) -> String {
  format!("{}%", confidence_percent(confidence))
}

/// 首字母大写，其余字母小写
pub fn capitalize(label: &str) -> String {
  let mut chars = label.chars();
  match chars.next() {
    Some(first) => first
      .to_uppercase()
      .chain(chars.flat_map(char::to_lowercase))
      .collect(),
    None => String::new(),
  }
}

/// 一次提交的汇总结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedResult {
  /// 标签描述，例如 `"Car, Person, and Bus"`
  pub labels: Option<String>,
  /// 置信度描述，例如 `"91%, 88%, and 40%"`
  pub confidences: Option<String>,
  pub has_detections: bool,
  /// 去重并首字母大写后的标签
  pub label_list: Vec<String>,
  /// 格式化后的置信度
  pub confidence_list: Vec<String>,
}

/// 跨帧累积检测结果，帧需按索引升序送入
#[derive(Debug, Default)]
pub struct Aggregator {
  labels: Vec<String>,
  confidences: Vec<f32>,
  frames: usize,
}

impl Aggregator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, detections: &FrameDetections) {
    self.frames += 1;
    for det in detections {
      if !self.labels.iter().any(|label| label == &det.label) {
        self.labels.push(det.label.clone());
      }
      self.confidences.push(det.confidence);
    }
  }

  pub fn frames(&self) -> usize {
    self.frames
  }

  pub fn detections(&self) -> usize {
    self.confidences.len()
  }

  pub fn finish(self) -> AggregatedResult {
    if self.confidences.is_empty() {
      return AggregatedResult::default();
    }

    let label_list: Vec<String> = self.labels.iter().map(|label| capitalize(label)).collect();
    let confidence_list: Vec<String> = self
      .confidences
      .iter()
      .map(|&confidence| format_confidence(confidence))
      .collect();

    AggregatedResult {
      labels: and_syntax(&label_list),
      confidences: and_syntax(&confidence_list),
      has_detections: true,
      label_list,
      confidence_list,
    }
  }
}

/// 按帧序汇总多帧检测结果
pub fn aggregate<'a>(frames: impl IntoIterator<Item = &'a FrameDetections>) -> AggregatedResult {
  let mut aggregator = Aggregator::new();
  for detections in frames {
    aggregator.push(detections);
  }
  aggregator.finish()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Detection;

  fn frame(items: &[(&str, f32)]) -> FrameDetections {
    items
      .iter()
      .map(|&(label, confidence)| Detection::new(label, confidence, [0.0, 0.0, 1.0, 1.0]))
      .collect::<Vec<_>>()
      .into()
  }

  #[test]
  fn and_syntax_joins_like_prose() {
    assert_eq!(and_syntax::<&str>(&[]), None);
    assert_eq!(and_syntax(&["A"]).as_deref(), Some("A"));
    assert_eq!(and_syntax(&["A", "B"]).as_deref(), Some("A and B"));
    assert_eq!(and_syntax(&["A", "B", "C"]).as_deref(), Some("A, B, and C"));
    assert_eq!(
      and_syntax(&["A", "B", "C", "D"]).as_deref(),
      Some("A, B, C, and D")
    );
  }

  #[test]
  fn and_syntax_leaves_input_untouched() {
    let items = vec!["x".to_string(), "y".to_string(), "z".to_string()];
    let _ = and_syntax(&items);
    assert_eq!(items, ["x", "y", "z"]);
  }

  #[test]
  fn confidence_percent_stays_in_range() {
    for step in 0..=1000 {
      let c = step as f32 / 1000.0;
      let formatted = format_confidence(c);
      let parsed: u32 = formatted.trim_end_matches('%').parse().unwrap();
      assert_eq!(parsed, (f64::from(c) * 100.0).round_ties_even() as u32);
      assert!(parsed <= 100);
    }
    assert_eq!(format_confidence(0.876), "88%");
    assert_eq!(format_confidence(1.5), "100%");
    assert_eq!(format_confidence(-0.1), "0%");
    assert_eq!(format_confidence(f32::NAN), "0%");
  }

  #[test]
  fn ties_round_to_even() {
    assert_eq!(confidence_percent(0.125), 12);
    assert_eq!(confidence_percent(0.375), 38);
  }

  #[test]
  fn capitalize_lowercases_the_rest() {
    assert_eq!(capitalize("car"), "Car");
    assert_eq!(capitalize("CAR"), "Car");
    assert_eq!(capitalize("traffic light"), "Traffic light");
    assert_eq!(capitalize(""), "");
  }

  #[test]
  fn labels_deduplicate_but_confidences_do_not() {
    let result = aggregate(&[frame(&[("car", 0.91), ("car", 0.5)])]);
    assert_eq!(result.labels.as_deref(), Some("Car"));
    assert_eq!(result.confidences.as_deref(), Some("91% and 50%"));
    assert_eq!(result.confidence_list.len(), 2);
    assert!(result.has_detections);
  }

  #[test]
  fn order_follows_frames_then_detections() {
    let frames = [
      frame(&[("person", 0.8)]),
      frame(&[]),
      frame(&[("car", 0.7), ("person", 0.6), ("bus", 0.4)]),
    ];
    let result = aggregate(&frames);
    assert_eq!(result.labels.as_deref(), Some("Person, Car, and Bus"));
    assert_eq!(
      result.confidences.as_deref(),
      Some("80%, 70%, 60%, and 40%")
    );
  }

  #[test]
  fn no_detections_yields_empty_result() {
    let mut aggregator = Aggregator::new();
    aggregator.push(&frame(&[]));
    aggregator.push(&frame(&[]));
    assert_eq!(aggregator.frames(), 2);
    let result = aggregator.finish();
    assert!(!result.has_detections);
    assert!(result.labels.is_none());
    assert!(result.confidences.is_none());
  }
}
