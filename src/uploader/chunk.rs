// 上传分片规划
//
// 分片规则：
// - 纯函数切分：ceil(S/C) 个分片平铺 [0, S)，无缝隙、无重叠
// - 最后一个分片可以比 C 短
// - 空文件（S == 0）产生零个分片，调用方直接进入合并阶段

use anyhow::{Context, Result};
use std::ops::Range;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// 默认上传分片大小: 1MB
pub const DEFAULT_UPLOAD_CHUNK_SIZE: u64 = 1024 * 1024;

/// 上传分片信息
#[derive(Debug, Clone)]
pub struct UploadChunk {
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
    /// 是否已完成
    pub completed: bool,
    /// 重试次数
    pub retries: u32,
}

impl UploadChunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self {
            index,
            range,
            completed: false,
            retries: 0,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 读取分片数据
    ///
    /// # 参数
    /// * `file_path` - 本地文件路径
    ///
    /// # 返回
    /// 分片数据字节数组
    pub async fn read_data(&self, file_path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(file_path).await.context("打开上传文件失败")?;

        // 定位到分片起始位置
        file.seek(std::io::SeekFrom::Start(self.range.start))
            .await
            .context("文件定位失败")?;

        // 读取分片数据
        let chunk_size = self.size() as usize;
        let mut buffer = vec![0u8; chunk_size];
        let bytes_read = file
            .read_exact(&mut buffer)
            .await
            .context("读取分片数据失败")?;

        debug!(
            "分片 #{} 读取完成: 区间 {}..{}, {} bytes",
            self.index, self.range.start, self.range.end, bytes_read
        );

        Ok(buffer)
    }
}

/// 计算分片方案
///
/// # 参数
/// * `total_size` - 文件总大小（可以为 0）
/// * `chunk_size` - 分片大小（必须大于 0，为 0 时返回空方案）
///
/// # 返回
/// 按索引升序排列的分片列表，字节范围恰好平铺 [0, total_size)
pub fn calculate_chunks(total_size: u64, chunk_size: u64) -> Vec<UploadChunk> {
    if chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut offset = 0u64;
    let mut index = 0;

    while offset < total_size {
        let end = std::cmp::min(offset + chunk_size, total_size);
        chunks.push(UploadChunk::new(index, offset..end));
        offset = end;
        index += 1;
    }

    chunks
}

/// 计算分片数量: ceil(total_size / chunk_size)
///
/// 与 [`calculate_chunks`] 同一套切分规则，服务端交叉校验也用它
pub fn chunk_count(total_size: u64, chunk_size: u64) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    total_size.div_ceil(chunk_size) as usize
}

/// 上传分片管理器
///
/// 持有分片方案和完成状态，供协调器做窗口调度与断点续传记账
#[derive(Debug)]
pub struct UploadChunkManager {
    /// 所有分片
    chunks: Vec<UploadChunk>,
    /// 文件总大小
    total_size: u64,
    /// 分片大小
    chunk_size: u64,
}

impl UploadChunkManager {
    /// 创建新的上传分片管理器
    ///
    /// # 参数
    /// * `total_size` - 文件总大小
    /// * `chunk_size` - 分片大小
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        let chunks = calculate_chunks(total_size, chunk_size);

        debug!(
            "分片管理器就绪: 文件 {} bytes, 分片 {} bytes, 共 {} 片",
            total_size,
            chunk_size,
            chunks.len()
        );
        Self {
            chunks,
            total_size,
            chunk_size,
        }
    }

    /// 获取所有分片
    pub fn chunks(&self) -> &[UploadChunk] {
        &self.chunks
    }

    /// 获取待上传的分片（按索引升序）
    pub fn pending_chunks(&self) -> Vec<UploadChunk> {
        self.chunks.iter().filter(|c| !c.completed).cloned().collect()
    }

    /// 获取分片数量
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// 获取已完成的分片数量
    pub fn completed_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.completed).count()
    }

    /// 获取已上传的字节数
    ///
    /// 逐分片求和，末尾短分片按真实大小计入
    pub fn uploaded_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.completed)
            .map(|c| c.size())
            .sum()
    }

    /// 文件总大小
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 分片大小
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// 计算上传进度
    ///
    /// 空方案（空文件）视为 100%，没有任何待传内容
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        (self.uploaded_bytes() as f64 / self.total_size as f64) * 100.0
    }

    /// 是否全部完成
    pub fn is_completed(&self) -> bool {
        self.chunks.iter().all(|c| c.completed)
    }

    /// 标记分片为已完成
    pub fn mark_completed(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.completed = true;
        }
    }

    /// 增加分片重试次数
    pub fn increment_retry(&mut self, index: usize) -> u32 {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.retries += 1;
            chunk.retries
        } else {
            0
        }
    }
}
