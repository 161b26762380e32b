// 分片落盘
//
// 路径规则：<staging_dir>/chunk_{index:06}.part
// 六位零填充让目录的字典序等于索引序。
// 同一索引重复写入是完全覆盖，重传分片不会累积垃圾。

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// 分片文件名
pub fn chunk_file_name(index: usize) -> String {
    format!("chunk_{:06}.part", index)
}

/// 分片在暂存目录中的确定性路径
pub fn chunk_file_path(staging_dir: &Path, index: usize) -> PathBuf {
    staging_dir.join(chunk_file_name(index))
}

/// 写入一个分片（幂等覆盖）
///
/// 暂存目录不存在时补建，写入不依赖目录的生命周期
pub async fn write_chunk(
    staging_dir: &Path,
    index: usize,
    data: &[u8],
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(staging_dir).await?;

    let path = chunk_file_path(staging_dir, index);
    let mut file = tokio::fs::File::create(&path).await?;
    file.write_all(data).await?;
    file.flush().await?;

    debug!("分片落盘: {:?} ({} bytes)", path, data.len());
    Ok(path)
}

/// 读取一个分片
pub async fn read_chunk(staging_dir: &Path, index: usize) -> std::io::Result<Vec<u8>> {
    tokio::fs::read(chunk_file_path(staging_dir, index)).await
}
