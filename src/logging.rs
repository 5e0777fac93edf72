//! tracing 订阅器初始化（宿主进程与 demo 使用；库代码只调用 tracing 宏）

use tracing_subscriber::EnvFilter;

/// 安装全局 fmt 订阅器。`RUST_LOG` 优先，否则使用 `default_filter`（如 `"info"`）。
/// 重复调用是安全的，后续调用被忽略。
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
