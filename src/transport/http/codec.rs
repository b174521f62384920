//! 编解码协商
//!
//! 请求按 `Content-Type`、响应按 `Accept` 选择编解码器，
//! 未知类型一律回退 JSON。具体格式的广度由外部适配，核心只内置 JSON。

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// 编解码器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Json,
}

impl Codec {
    /// 序列化后的 Content-Type
    pub fn content_type(&self) -> &'static str {
        match self {
            Codec::Json => "application/json",
        }
    }

    /// 编码
    pub fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json => serde_json::to_vec(value).map_err(Error::from),
        }
    }

    /// 解码
    pub fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Json => serde_json::from_slice(data).map_err(Error::from),
        }
    }
}

/// 取 MIME 的子类型：`application/json; charset=utf-8` -> `json`
pub fn content_subtype(content_type: &str) -> &str {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((_, subtype)) => {
            // `application/vnd.demo+json` 按后缀归类
            subtype.rsplit_once('+').map(|(_, s)| s).unwrap_or(subtype)
        }
        None => essence,
    }
}

/// 按头部值协商编解码器
pub fn codec_for_header(value: Option<&str>) -> Codec {
    match value.map(content_subtype) {
        Some("json") => Codec::Json,
        _ => Codec::Json,
    }
}
