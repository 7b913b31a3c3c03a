// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use tracing::error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, input::InputError};

pub struct ImageFileInput {
  image: Option<RgbImage>,
  path: PathBuf,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| InputError::unreadable(url.path(), e))?;
    ImageFileInput::open(&*path)
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)
      .map_err(|e| InputError::unreadable(path.display(), e))?
      .with_guessed_format()
      .map_err(|e| InputError::unreadable(path.display(), e))?
      .decode()
      .map_err(|e| InputError::unreadable(path.display(), e))?
      .to_rgb8();

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(InputError::unreadable(path.display(), "图像尺寸为空"));
    }

    Ok(ImageFileInput {
      image: Some(image),
      path: path.to_path_buf(),
      width,
      height,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    self
      .image
      .take()
      .map(|image| Frame::new(0, image).with_path(self.path.clone()))
  }
}
