/// 服务器配置 - 同步节点的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | ENVIRONMENT | development | 运行环境 |
/// | EVENT_QUEUE_CAPACITY | 256 | 事件总线队列容量 |
/// | RELAY_CHANNEL_CAPACITY | 256 | 中继通道容量 |
/// | CACHE_TTL_SECS | 300 | 缓存条目存活时长(秒) |
/// | CACHE_SCAN_BATCH | 100 | 缓存游标扫描单批大小 |
/// | RETRY_MAX_ATTEMPTS | 3 | 冲突重试最大尝试次数 |
/// | RETRY_BASE_DELAY_MS | 25 | 重试退避基准(毫秒) |
/// | RETRY_MAX_DELAY_MS | 500 | 重试退避上限(毫秒) |
/// | HEARTBEAT_INTERVAL_SECS | 30 | 心跳广播间隔(秒) |
/// | SEND_TIMEOUT_MS | 200 | 单连接发送超时(毫秒) |
/// | SHUTDOWN_TIMEOUT_MS | 10000 | 关闭超时(毫秒) |
///
/// # 示例
///
/// ```ignore
/// CACHE_TTL_SECS=60 RETRY_MAX_ATTEMPTS=5 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 运行环境: development | staging | production
    pub environment: String,
    /// 事件总线有界队列容量
    pub event_queue_capacity: usize,
    /// 中继通道容量
    pub relay_channel_capacity: usize,
    /// 缓存条目存活时长 (秒)
    pub cache_ttl_secs: u64,
    /// 缓存游标扫描单批大小
    pub cache_scan_batch: usize,
    /// 冲突重试最大尝试次数 (含首次)
    pub retry_max_attempts: u32,
    /// 重试退避基准 (毫秒)
    pub retry_base_delay_ms: u64,
    /// 重试退避上限 (毫秒)
    pub retry_max_delay_ms: u64,
    /// 心跳广播间隔 (秒)
    pub heartbeat_interval_secs: u64,
    /// 单连接发送超时 (毫秒)
    pub send_timeout_ms: u64,
    /// 关闭超时时间 (毫秒)
    pub shutdown_timeout_ms: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            event_queue_capacity: env_parse("EVENT_QUEUE_CAPACITY", 256),
            relay_channel_capacity: env_parse("RELAY_CHANNEL_CAPACITY", 256),
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", 300),
            cache_scan_batch: env_parse("CACHE_SCAN_BATCH", 100),
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3),
            retry_base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", 25),
            retry_max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", 500),
            heartbeat_interval_secs: env_parse("HEARTBEAT_INTERVAL_SECS", 30),
            send_timeout_ms: env_parse("SEND_TIMEOUT_MS", 200),
            shutdown_timeout_ms: env_parse("SHUTDOWN_TIMEOUT_MS", 10000),
        }
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否开发环境
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// 测试友好的紧凑配置：小队列、快重试、快心跳
    pub fn for_tests() -> Self {
        Self {
            environment: "development".into(),
            event_queue_capacity: 16,
            relay_channel_capacity: 16,
            cache_ttl_secs: 60,
            cache_scan_batch: 10,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            heartbeat_interval_secs: 3600,
            send_timeout_ms: 200,
            shutdown_timeout_ms: 1000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
