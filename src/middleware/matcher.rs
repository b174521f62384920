//! 中间件匹配器
//!
//! 按操作标识把默认中间件与选择器中间件拼接起来。
//! 选择器要么是精确的操作串（`/pkg.Svc/Method`），要么是以 `*` 结尾的前缀
//! （`/pkg.Svc/*`、`/*`）。精确命中优先，其次取能匹配的最长前缀。

use super::Middleware;
use std::collections::HashMap;

/// 中间件匹配器
#[derive(Default, Clone)]
pub struct Matcher {
    /// 前缀选择器，按长度降序保存使匹配确定
    prefix: Vec<String>,
    defaults: Vec<Middleware>,
    matches: HashMap<String, Vec<Middleware>>,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置默认中间件
    pub fn use_default(&mut self, middlewares: Vec<Middleware>) {
        self.defaults = middlewares;
    }

    /// 添加指定选择器的中间件
    pub fn add(&mut self, selector: impl Into<String>, middlewares: Vec<Middleware>) {
        let mut selector = selector.into();
        if let Some(stripped) = selector.strip_suffix('*') {
            selector = stripped.to_string();
            if !self.prefix.contains(&selector) {
                self.prefix.push(selector.clone());
            }
            // 长前缀在前：
            //  - /foo/bar
            //  - /foo
            self.prefix.sort_by(|a, b| b.cmp(a));
        }
        self.matches.insert(selector, middlewares);
    }

    /// 返回操作对应的中间件列表：默认中间件 ++ 首个命中项
    pub fn match_operation(&self, operation: &str) -> Vec<Middleware> {
        let mut result = self.defaults.clone();
        if let Some(exact) = self.matches.get(operation) {
            result.extend(exact.iter().cloned());
            return result;
        }
        for prefix in &self.prefix {
            if operation.starts_with(prefix.as_str()) {
                if let Some(ms) = self.matches.get(prefix) {
                    result.extend(ms.iter().cloned());
                }
                return result;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Handler;
    use std::sync::Arc;

    /// 带标签的空中间件，用于断言匹配结果
    fn tagged(tag: &'static str) -> (Middleware, &'static str) {
        let m: Middleware = Arc::new(move |next: Handler| next);
        (m, tag)
    }

    fn matcher_with_scenario() -> (Matcher, Vec<(Middleware, &'static str)>) {
        let m0 = tagged("M0");
        let m1 = tagged("M1");
        let m2 = tagged("M2");
        let m3 = tagged("M3");

        let mut matcher = Matcher::new();
        matcher.use_default(vec![m0.0.clone()]);
        matcher.add("/foo/bar/*", vec![m1.0.clone()]);
        matcher.add("/foo/*", vec![m2.0.clone()]);
        matcher.add("/foo/bar/baz", vec![m3.0.clone()]);
        (matcher, vec![m0, m1, m2, m3])
    }

    fn tags_of(result: &[Middleware], all: &[(Middleware, &'static str)]) -> Vec<&'static str> {
        result
            .iter()
            .map(|m| {
                all.iter()
                    .find(|(candidate, _)| Arc::ptr_eq(candidate, m))
                    .map(|(_, tag)| *tag)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_exact_beats_prefix() {
        let (matcher, all) = matcher_with_scenario();
        let result = matcher.match_operation("/foo/bar/baz");
        assert_eq!(tags_of(&result, &all), vec!["M0", "M3"]);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let (matcher, all) = matcher_with_scenario();
        let result = matcher.match_operation("/foo/bar/qux");
        assert_eq!(tags_of(&result, &all), vec!["M0", "M1"]);
    }

    #[test]
    fn test_shorter_prefix_fallback() {
        let (matcher, all) = matcher_with_scenario();
        let result = matcher.match_operation("/foo/other");
        assert_eq!(tags_of(&result, &all), vec!["M0", "M2"]);
    }

    #[test]
    fn test_no_match_returns_defaults() {
        let (matcher, all) = matcher_with_scenario();
        let result = matcher.match_operation("/bar/anything");
        assert_eq!(tags_of(&result, &all), vec!["M0"]);
    }

    #[test]
    fn test_match_is_deterministic() {
        let (matcher, all) = matcher_with_scenario();
        for _ in 0..16 {
            let result = matcher.match_operation("/foo/bar/qux");
            assert_eq!(tags_of(&result, &all), vec!["M0", "M1"]);
        }
    }
}
