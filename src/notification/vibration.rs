//! 振动模式编码
//!
//! 线上格式为毫秒数的开/关分段列表，每段两字节小端

/// 设备接受的单段最长时间
pub const MAX_SEGMENT_MS: u64 = 10_000;
/// 超出此数量的分段被丢弃
pub const MAX_SEGMENTS: usize = 20;

/// 振动被抑制时使用的模式
pub fn silent_pattern() -> Vec<u8> {
    vec![0, 0]
}

/// 解析配置的模式，如 `"500, 200, 500"`
///
/// 无法解析的分段会被跳过；结果为空时使用静音模式，描述包至少带一个分段
pub fn parse_pattern(config: &str) -> Vec<u8> {
    let segments: Vec<u64> = config
        .split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .collect();
    encode(&segments)
}

/// 转换平台格式 `[delay, on, off, on, ...]`，去掉开头的延迟
pub fn from_platform_pattern(pattern: &[u64]) -> Vec<u8> {
    encode(pattern.get(1..).unwrap_or(&[]))
}

fn encode(segments: &[u64]) -> Vec<u8> {
    if segments.is_empty() {
        return silent_pattern();
    }

    segments
        .iter()
        .take(MAX_SEGMENTS)
        .flat_map(|ms| ((*ms).min(MAX_SEGMENT_MS) as u16).to_le_bytes())
        .collect()
}
