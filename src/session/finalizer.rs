// 分片合并
//
// 合并流程：缺片校验 → 按索引升序拼接到输出文件 → 注销会话并清理暂存目录。
// 输出文件名为 <uuid>_<原始文件名>，并发上传同名文件不会互相覆盖。
// 任何中途失败都会删除半成品输出，输出目录里只存在完整文件。

use crate::session::persister;
use crate::session::store::UploadSessionStore;
use crate::session::types::{FinalizedArtifact, SessionEntry, SessionError};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// 分片合并器
pub struct Finalizer {
    /// 最终产物输出目录
    output_dir: PathBuf,
}

impl Finalizer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 合并一个会话的全部分片
    ///
    /// # 参数
    /// * `store` - 会话注册表（成功后从中注销会话）
    /// * `session_id` - 会话ID
    ///
    /// # 返回
    /// 最终产物的绝对路径与原始文件名
    pub async fn finalize(
        &self,
        store: &UploadSessionStore,
        session_id: &str,
    ) -> Result<FinalizedArtifact, SessionError> {
        let entry = store.get(session_id)?;

        // 1. 缺片校验，缺失索引全部列入错误信息
        let missing = entry.missing_indices();
        if !missing.is_empty() {
            warn!(
                "合并被拒绝: session={}, 缺失分片 {:?}",
                session_id, missing
            );
            return Err(SessionError::MissingChunks(missing));
        }

        // 2. 升序拼接
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output_name = format!("{}_{}", Uuid::new_v4(), entry.meta.file_name);
        let output_path = self.output_dir.join(&output_name);

        if let Err(e) = merge_chunks(&entry, &output_path).await {
            // 删除半成品，输出目录不留不完整文件
            let _ = tokio::fs::remove_file(&output_path).await;
            // 合并中途会话被取消/回收时，按会话不存在报告
            if store.get(session_id).is_err() {
                return Err(SessionError::NotFound);
            }
            return Err(e);
        }

        // 3. 注销会话并清理暂存目录（与回收器竞态时目录可能已不在）
        store.remove(session_id);
        if let Err(e) = tokio::fs::remove_dir_all(&entry.meta.staging_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "清理暂存目录失败: {:?}: {}",
                    entry.meta.staging_dir, e
                );
            }
        }

        let file_path = dunce::canonicalize(&output_path)
            .unwrap_or_else(|_| output_path.clone())
            .to_string_lossy()
            .to_string();

        info!(
            "✓ 合并完成: session={}, chunks={}, output={}",
            session_id, entry.meta.total_chunks, file_path
        );
        Ok(FinalizedArtifact {
            file_path,
            file_name: entry.meta.file_name.clone(),
        })
    }
}

/// 按索引升序把所有分片拼接到输出文件
///
/// 零分片会话产生空文件
async fn merge_chunks(entry: &SessionEntry, output_path: &Path) -> Result<(), SessionError> {
    let mut output = tokio::fs::File::create(output_path).await?;
    for index in 0..entry.meta.total_chunks {
        let data = persister::read_chunk(&entry.meta.staging_dir, index).await?;
        output.write_all(&data).await?;
    }
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// 建一个已收到指定分片的会话，返回 (store, finalizer, session_id, 全量数据)
    async fn session_with_chunks(
        root: &Path,
        total_bytes: usize,
        written: &[usize],
    ) -> (UploadSessionStore, Finalizer, String, Vec<u8>) {
        let store = UploadSessionStore::new(root.join("staging"), 1024, 64 * 1024 * 1024);
        let finalizer = Finalizer::new(root.join("uploads"));

        let content: Vec<u8> = (0..total_bytes).map(|i| (i % 251) as u8).collect();
        let total_chunks = crate::uploader::chunk::chunk_count(total_bytes as u64, 1024);
        let entry = store
            .initialize("book.epub", total_bytes as u64, "application/epub+zip", total_chunks)
            .await
            .unwrap();

        for &index in written {
            let start = index * 1024;
            let end = (start + 1024).min(total_bytes);
            persister::write_chunk(&entry.meta.staging_dir, index, &content[start..end])
                .await
                .unwrap();
            entry.record_index(index);
        }

        let id = entry.meta.session_id.clone();
        (store, finalizer, id, content)
    }

    #[tokio::test]
    async fn test_finalize_merges_in_ascending_order() {
        let dir = tempdir().unwrap();
        // 乱序写入，合并结果仍按索引升序
        let (store, finalizer, id, content) =
            session_with_chunks(dir.path(), 2 * 1024 + 512, &[2, 0, 1]).await;

        let staging = store.get(&id).unwrap().meta.staging_dir.clone();
        let artifact = finalizer.finalize(&store, &id).await.unwrap();

        assert_eq!(artifact.file_name, "book.epub");
        let merged = std::fs::read(&artifact.file_path).unwrap();
        assert_eq!(merged, content);

        // 输出名带 uuid 前缀，防同名覆盖
        let output_name = Path::new(&artifact.file_path)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(output_name.ends_with("_book.epub"));
        assert!(output_name.len() > "book.epub".len() + 36);

        // 会话注销、暂存目录清理
        assert!(matches!(store.get(&id).unwrap_err(), SessionError::NotFound));
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_finalize_rejects_missing_chunks_then_succeeds() {
        let dir = tempdir().unwrap();
        // 缺第 2 片
        let (store, finalizer, id, content) =
            session_with_chunks(dir.path(), 3 * 1024 + 100, &[0, 1, 3]).await;

        let err = finalizer.finalize(&store, &id).await.unwrap_err();
        assert!(matches!(err, SessionError::MissingChunks(ref m) if m == &vec![2]));
        assert!(err.to_string().contains("[2]"));

        // 会话仍然活着，输出目录没有半成品
        let entry = store.get(&id).unwrap();
        assert_eq!(
            std::fs::read_dir(dir.path().join("uploads"))
                .map(|d| d.count())
                .unwrap_or(0),
            0
        );

        // 补传缺失分片后合并成功，字节级还原
        persister::write_chunk(&entry.meta.staging_dir, 2, &content[2048..3072])
            .await
            .unwrap();
        entry.record_index(2);

        let artifact = finalizer.finalize(&store, &id).await.unwrap();
        assert_eq!(std::fs::read(&artifact.file_path).unwrap(), content);
    }

    #[tokio::test]
    async fn test_finalize_zero_chunk_session_yields_empty_file() {
        let dir = tempdir().unwrap();
        let (store, finalizer, id, _) = session_with_chunks(dir.path(), 0, &[]).await;

        let artifact = finalizer.finalize(&store, &id).await.unwrap();
        let merged = std::fs::read(&artifact.file_path).unwrap();
        assert!(merged.is_empty());
        // 输出目录按需创建
        assert!(finalizer.output_dir().is_dir());
    }

    #[tokio::test]
    async fn test_finalize_unknown_session() {
        let dir = tempdir().unwrap();
        let store = UploadSessionStore::new(dir.path().join("staging"), 1024, 64 * 1024 * 1024);
        let finalizer = Finalizer::new(dir.path().join("uploads"));

        let err = finalizer.finalize(&store, "ghost").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound));
    }

    #[tokio::test]
    async fn test_finalize_after_duplicate_chunk_uses_last_write() {
        let dir = tempdir().unwrap();
        let (store, finalizer, id, content) =
            session_with_chunks(dir.path(), 2 * 1024, &[0, 1]).await;

        // 重传分片 1：最终内容以最后一次写入为准
        let entry = store.get(&id).unwrap();
        persister::write_chunk(&entry.meta.staging_dir, 1, &vec![0u8; 1024])
            .await
            .unwrap();
        persister::write_chunk(&entry.meta.staging_dir, 1, &content[1024..2048])
            .await
            .unwrap();
        entry.record_index(1);

        let artifact = finalizer.finalize(&store, &id).await.unwrap();
        assert_eq!(std::fs::read(&artifact.file_path).unwrap(), content);
    }

    #[tokio::test]
    async fn test_merge_failure_removes_partial_output() {
        let dir = tempdir().unwrap();
        let (store, finalizer, id, _) =
            session_with_chunks(dir.path(), 3 * 1024, &[0, 1, 2]).await;

        // 模拟分片文件损坏丢失：位图已标记收齐，磁盘上却没有
        let entry = store.get(&id).unwrap();
        tokio::fs::remove_file(persister::chunk_file_path(&entry.meta.staging_dir, 2))
            .await
            .unwrap();

        let err = finalizer.finalize(&store, &id).await.unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));

        // 半成品被删除，会话保留
        assert_eq!(
            std::fs::read_dir(dir.path().join("uploads")).unwrap().count(),
            0
        );
        assert!(store.get(&id).is_ok());
    }
}
