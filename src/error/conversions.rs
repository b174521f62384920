//! 错误码映射与外部错误转换
//!
//! HTTP 状态码与 gRPC 状态码的双向映射，以及 tonic / IO / 序列化错误
//! 到框架错误的转换。reason 与 metadata 通过 gRPC metadata 透传。

use super::{code::*, Error, UNKNOWN_CODE, UNKNOWN_REASON};
use std::collections::HashMap;
use tonic::metadata::{MetadataKey, MetadataValue};
use tonic::{Code, Status};

/// gRPC metadata 中携带错误 reason 的键
const GRPC_REASON_KEY: &str = "comet-error-reason";
/// gRPC metadata 中携带错误 metadata 的键前缀
const GRPC_METADATA_PREFIX: &str = "comet-error-md-";

/// 将框架错误码映射为 gRPC 状态码
pub fn to_grpc_code(code: i32) -> Code {
    match code {
        200 => Code::Ok,
        CODE_BAD_REQUEST => Code::InvalidArgument,
        CODE_UNAUTHORIZED => Code::Unauthenticated,
        CODE_FORBIDDEN => Code::PermissionDenied,
        CODE_NOT_FOUND => Code::NotFound,
        CODE_CONFLICT => Code::Aborted,
        CODE_TOO_MANY_REQUESTS => Code::ResourceExhausted,
        CODE_CLIENT_CLOSED => Code::Cancelled,
        CODE_INTERNAL_SERVER => Code::Internal,
        CODE_SERVICE_UNAVAILABLE => Code::Unavailable,
        CODE_GATEWAY_TIMEOUT => Code::DeadlineExceeded,
        _ => Code::Unknown,
    }
}

/// 将 gRPC 状态码映射为框架错误码
pub fn from_grpc_code(code: Code) -> i32 {
    match code {
        Code::Ok => 200,
        Code::InvalidArgument | Code::OutOfRange | Code::FailedPrecondition => CODE_BAD_REQUEST,
        Code::Unauthenticated => CODE_UNAUTHORIZED,
        Code::PermissionDenied => CODE_FORBIDDEN,
        Code::NotFound => CODE_NOT_FOUND,
        Code::Aborted | Code::AlreadyExists => CODE_CONFLICT,
        Code::ResourceExhausted => CODE_TOO_MANY_REQUESTS,
        Code::Cancelled => CODE_CLIENT_CLOSED,
        Code::Internal | Code::DataLoss | Code::Unimplemented => CODE_INTERNAL_SERVER,
        Code::Unavailable => CODE_SERVICE_UNAVAILABLE,
        Code::DeadlineExceeded => CODE_GATEWAY_TIMEOUT,
        Code::Unknown => UNKNOWN_CODE,
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let mut status = Status::new(to_grpc_code(err.code), err.message.clone());
        let md = status.metadata_mut();
        if let Ok(value) = MetadataValue::try_from(err.reason.as_str()) {
            md.insert(GRPC_REASON_KEY, value);
        }
        for (k, v) in &err.metadata {
            let key = format!("{}{}", GRPC_METADATA_PREFIX, k.to_ascii_lowercase());
            if let (Ok(key), Ok(value)) =
                (MetadataKey::from_bytes(key.as_bytes()), MetadataValue::try_from(v.as_str()))
            {
                md.insert(key, value);
            }
        }
        status
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        let reason = status
            .metadata()
            .get(GRPC_REASON_KEY)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(UNKNOWN_REASON)
            .to_string();
        let mut metadata = HashMap::new();
        for kv in status.metadata().iter() {
            if let tonic::metadata::KeyAndValueRef::Ascii(key, value) = kv {
                if let Some(name) = key.as_str().strip_prefix(GRPC_METADATA_PREFIX) {
                    if let Ok(v) = value.to_str() {
                        metadata.insert(name.to_string(), v.to_string());
                    }
                }
            }
        }
        Error::new(from_grpc_code(status.code()), reason, status.message().to_string())
            .with_metadata(metadata)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::service_unavailable("NETWORK_ERROR", err.to_string()).with_cause(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::bad_request("CODEC_ERROR", err.to_string()).with_cause(err)
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::internal_server("HTTP_BUILD_ERROR", err.to_string()).with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping_round_trip() {
        for code in [400, 401, 403, 404, 409, 429, 499, 500, 503, 504] {
            assert_eq!(from_grpc_code(to_grpc_code(code)), code);
        }
    }

    #[test]
    fn test_status_round_trip_keeps_reason_and_metadata() {
        let err = Error::service_unavailable("no_available_node", "no node")
            .with_metadata([("zone".to_string(), "sh-a".to_string())].into());
        let status: Status = err.clone().into();
        let back: Error = status.into();
        assert_eq!(back, err);
        assert_eq!(back.metadata.get("zone").unwrap(), "sh-a");
    }
}
