//! 端点 URL 工具
//!
//! 注册中心里的端点格式为 `scheme://host:port?isSecure=<bool>`，
//! scheme 属于 {http, https, grpc, grpcs}，TLS 变体在 scheme 后缀 `s`。
//! 查询参数仅作提示，解析只按 scheme 精确匹配。

/// 根据是否启用 TLS 计算 scheme
pub fn scheme(base: &str, is_secure: bool) -> String {
    if is_secure {
        format!("{}s", base)
    } else {
        base.to_string()
    }
}

/// 构造注册用端点 URL
pub fn new_endpoint(scheme: &str, host: &str, is_secure: bool) -> String {
    format!("{}://{}?isSecure={}", scheme, host, is_secure)
}

/// 从端点列表中解析出首个 scheme 匹配的 `host:port`
///
/// 无法解析的条目返回错误，无匹配返回 None。
pub fn parse_endpoint(endpoints: &[String], scheme: &str) -> crate::error::Result<Option<String>> {
    for endpoint in endpoints {
        let uri: http::Uri = endpoint.parse().map_err(|_| {
            crate::error::Error::internal_server(
                "INVALID_ENDPOINT",
                format!("invalid endpoint uri: {}", endpoint),
            )
        })?;
        if uri.scheme_str() == Some(scheme) {
            if let (Some(host), Some(port)) = (uri.host(), uri.port_u16()) {
                return Ok(Some(format!("{}:{}", host, port)));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_suffix() {
        assert_eq!(scheme("http", false), "http");
        assert_eq!(scheme("http", true), "https");
        assert_eq!(scheme("grpc", true), "grpcs");
    }

    #[test]
    fn test_new_endpoint_format() {
        assert_eq!(
            new_endpoint("grpc", "192.168.0.1:9000", false),
            "grpc://192.168.0.1:9000?isSecure=false"
        );
    }

    #[test]
    fn test_parse_endpoint_matches_scheme_exactly() {
        let endpoints = vec![
            "http://127.0.0.1:8000?isSecure=false".to_string(),
            "grpc://127.0.0.1:9000?isSecure=false".to_string(),
        ];
        assert_eq!(parse_endpoint(&endpoints, "grpc").unwrap().unwrap(), "127.0.0.1:9000");
        assert_eq!(parse_endpoint(&endpoints, "http").unwrap().unwrap(), "127.0.0.1:8000");
        // https 不匹配 http 条目
        assert!(parse_endpoint(&endpoints, "https").unwrap().is_none());
    }

    #[test]
    fn test_parse_endpoint_rejects_garbage() {
        let endpoints = vec!["::not a uri::".to_string()];
        assert!(parse_endpoint(&endpoints, "http").is_err());
    }
}
