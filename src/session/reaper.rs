// 会话回收器
//
// 周期清扫滞留会话：最近活跃时间早于保留期的会话整体丢弃
// （注册表条目 + 暂存目录），同时清理没有对应会话的孤儿暂存目录。
// 先收集到期ID、迭代结束后再逐个取消，清扫不在注册表迭代中持锁跨 await，
// 与进行中的合并互不阻塞。

use crate::session::store::UploadSessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 默认会话保留期：24小时
pub const DEFAULT_RETENTION_SECS: i64 = 24 * 3600;
/// 默认清扫间隔：1小时
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// 会话回收器
pub struct SessionReaper {
    store: Arc<UploadSessionStore>,
    /// 保留期（秒）
    retention_secs: i64,
    /// 清扫间隔
    sweep_interval: Duration,
}

impl SessionReaper {
    pub fn new(
        store: Arc<UploadSessionStore>,
        retention_secs: i64,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            store,
            retention_secs,
            sweep_interval,
        }
    }

    /// 启动后台清扫循环，直到令牌取消
    ///
    /// interval 首次立即触发，进程启动即清理上次崩溃的残留
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                "会话回收器已启动: 保留期 {}s, 清扫间隔 {:?}",
                self.retention_secs, self.sweep_interval
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("会话回收器退出");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
        })
    }

    /// 清扫一轮，返回回收的项数
    pub async fn sweep_once(&self) -> usize {
        let cutoff = chrono::Utc::now().timestamp() - self.retention_secs;

        let expired = self.store.expired_sessions(cutoff);
        let mut reaped = 0;
        for session_id in expired {
            if self.store.cancel(&session_id).await {
                info!("♻️ 回收过期会话: id={}", session_id);
                reaped += 1;
            }
        }

        reaped += self.sweep_orphan_dirs(cutoff).await;

        if reaped > 0 {
            info!("本轮清扫回收 {} 项", reaped);
        } else {
            debug!("本轮清扫无过期会话");
        }
        reaped
    }

    /// 清理暂存根目录下没有对应活动会话的残留目录
    ///
    /// 以目录修改时间判定过期，新鲜的孤儿目录留到下一轮
    async fn sweep_orphan_dirs(&self, cutoff: i64) -> usize {
        let root = self.store.staging_root();
        let mut read_dir = match tokio::fs::read_dir(root).await {
            Ok(read_dir) => read_dir,
            // 根目录尚未创建时无事可做
            Err(_) => return 0,
        };

        let mut removed = 0;
        while let Ok(Some(dir_entry)) = read_dir.next_entry().await {
            let name = dir_entry.file_name().to_string_lossy().to_string();
            if self.store.get(&name).is_ok() {
                continue;
            }

            let metadata = match dir_entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if !metadata.is_dir() {
                continue;
            }
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            if mtime >= cutoff {
                continue;
            }

            match tokio::fs::remove_dir_all(dir_entry.path()).await {
                Ok(()) => {
                    info!("♻️ 清理孤儿暂存目录: {:?}", dir_entry.path());
                    removed += 1;
                }
                Err(e) => {
                    warn!("清理孤儿暂存目录失败: {:?}: {}", dir_entry.path(), e);
                }
            }
        }
        removed
    }
}
