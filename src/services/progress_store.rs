//! 进度存储 - 业务能力层
//!
//! 每个会话一个 JSON 文件：`<目录>/<会话键>_progress.json`。
//! 只负责读写，不修改内容；写入先落到临时文件再改名，保证整文件原子覆盖。

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::ProgressError;
use crate::models::{AcquisitionProgress, ProgressRecord};

const FILE_SUFFIX: &str = "_progress.json";

/// 进度存储
#[derive(Debug, Clone)]
pub struct ProgressStore {
    dir: PathBuf,
}

impl ProgressStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 会话对应的进度文件路径
    pub fn path_for(&self, session_key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", session_key, FILE_SUFFIX))
    }

    /// 读取进度
    ///
    /// 文件不存在返回 `None`；文件损坏时改名为 `.corrupt` 并返回 `None`，会话从头开始
    pub async fn load(&self, session_key: &str) -> Result<Option<AcquisitionProgress>, ProgressError> {
        let path = self.path_for(session_key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ProgressError::Read { path, source }),
        };

        match serde_json::from_str::<AcquisitionProgress>(&content) {
            Ok(progress) => {
                debug!(
                    "读取进度: {} ({} 章)",
                    path.display(),
                    progress.completed_count
                );
                Ok(Some(progress))
            }
            Err(e) => {
                warn!("⚠️ 进度文件已损坏，将重新开始: {} ({})", path.display(), e);
                let aside = path.with_extension("json.corrupt");
                if let Err(rename_err) = fs::rename(&path, &aside).await {
                    warn!("⚠️ 无法移走损坏的进度文件: {}", rename_err);
                }
                Ok(None)
            }
        }
    }

    /// 保存进度（完整覆盖）
    pub async fn save(&self, session_key: &str, record: &ProgressRecord<'_>) -> Result<(), ProgressError> {
        let path = self.path_for(session_key);
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ProgressError::Write {
                path: self.dir.clone(),
                source,
            })?;

        let json = serde_json::to_string_pretty(record).map_err(|source| ProgressError::Parse {
            path: path.clone(),
            source,
        })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .await
            .map_err(|source| ProgressError::Write {
                path: tmp_path.clone(),
                source,
            })?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| ProgressError::Write {
                path: path.clone(),
                source,
            })?;

        debug!("💾 进度已保存: {} 章 → {}", record.completed_count, path.display());
        Ok(())
    }

    /// 删除进度文件，返回文件是否存在
    pub async fn delete(&self, session_key: &str) -> Result<bool, ProgressError> {
        let path = self.path_for(session_key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ProgressError::Delete { path, source }),
        }
    }

    /// 列出有进度记录的会话键
    pub async fn list_sessions(&self) -> Result<Vec<String>, ProgressError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ProgressError::Read {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| ProgressError::Read {
                path: self.dir.clone(),
                source,
            })?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(key) = name.strip_suffix(FILE_SUFFIX) {
                sessions.push(key.to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}
