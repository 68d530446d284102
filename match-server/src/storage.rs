//! 对局归档与等级分存储
//!
//! JSON 文件落盘：`matches/{id}.json` 为单局归档，`ratings.json`
//! 为玩家等级分表。归档文件的存在即"该局已提交"的幂等标记，
//! 写入用临时文件 + 重命名保证不留半成品。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use protocol::{MatchId, MatchRecord, PlayerId, RatingChange, DEFAULT_RATING};

/// 归档存储
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    /// 使用平台默认数据目录
    pub fn new() -> Result<Self> {
        let root = dirs::data_dir()
            .context("Failed to get data directory")?
            .join("chess-match-server");
        Self::with_root(root)
    }

    /// 使用指定根目录（测试用）
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("matches"))
            .with_context(|| format!("Failed to create archive directory: {:?}", root))?;
        Ok(Self { root })
    }

    fn match_path(&self, match_id: MatchId) -> PathBuf {
        self.root.join("matches").join(format!("{}.json", match_id))
    }

    fn ratings_path(&self) -> PathBuf {
        self.root.join("ratings.json")
    }

    /// 该局是否已归档
    pub fn is_archived(&self, match_id: MatchId) -> bool {
        self.match_path(match_id).exists()
    }

    /// 读取已归档的对局记录
    pub fn load_record(&self, match_id: MatchId) -> Result<MatchRecord> {
        let path = self.match_path(match_id);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read match archive: {:?}", path))?;
        MatchRecord::from_json(&json)
            .with_context(|| format!("Failed to parse match archive: {:?}", path))
    }

    /// 读取等级分表（文件不存在视为空表）
    pub fn load_ratings(&self) -> Result<HashMap<PlayerId, u32>> {
        let path = self.ratings_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read ratings: {:?}", path))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse ratings: {:?}", path))
    }

    /// 玩家当前等级分（无记录的玩家用初始分）
    pub fn rating_of(&self, player_id: PlayerId) -> Result<u32> {
        let ratings = self.load_ratings()?;
        Ok(ratings.get(&player_id).copied().unwrap_or(DEFAULT_RATING))
    }

    /// 提交终局记录
    ///
    /// 幂等：归档文件先落盘，它既是幂等标记也携带等级分绝对值
    /// （before/after）；之后才按绝对值更新等级分表。因此唯一可能的
    /// 中间态是"档已落、分未调"，重放走已归档分支，把归档里的绝对值
    /// 重新套用到分表上即可收敛，不会二次计算增量。
    pub fn commit(&self, record: &MatchRecord) -> Result<bool> {
        if self.is_archived(record.match_id) {
            // 以归档为准修复分表
            let archived = self.load_record(record.match_id)?;
            self.apply_ratings(&archived.rating_changes)?;
            debug!("对局 {} 已归档，按归档记录重放等级分", record.match_id);
            return Ok(false);
        }

        let record_json = record.to_json().context("Failed to serialize match record")?;
        write_atomic(&self.match_path(record.match_id), &record_json)?;

        self.apply_ratings(&record.rating_changes)?;

        info!("对局 {} 已归档", record.match_id);
        Ok(true)
    }

    /// 把等级分变动的绝对值写入分表
    fn apply_ratings(&self, changes: &[RatingChange; 2]) -> Result<()> {
        let mut ratings = self.load_ratings()?;
        for change in changes {
            ratings.insert(change.player, change.after);
        }
        let ratings_json =
            serde_json::to_string_pretty(&ratings).context("Failed to serialize ratings")?;
        write_atomic(&self.ratings_path(), &ratings_json)
    }

    /// 列出所有已归档的对局 ID
    pub fn list_archived(&self) -> Result<Vec<MatchId>> {
        let dir = self.root.join("matches");
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to read archive directory: {:?}", dir))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(id) = stem.parse::<MatchId>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

/// 临时文件 + 重命名的原子写入
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).with_context(|| format!("Failed to write temp file: {:?}", tmp))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", tmp, path))?;
    Ok(())
}
