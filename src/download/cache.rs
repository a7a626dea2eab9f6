use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

use super::client::Dump;
use super::payload::Payload;
use crate::error::{Error, Result};

const DUMP_DIR: &str = "eddb";
const DB_FILE: &str = "TradeDangerous.db";
const PARTIAL_SUFFIX: &str = "part";

/// Locations under the data directory
pub struct CacheManager {
    data_dir: PathBuf,
}

impl CacheManager {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => {
                let proj_dirs = ProjectDirs::from("", "", "eddblink-sync").ok_or_else(|| {
                    Error::Configuration("Could not determine data directory".to_string())
                })?;
                proj_dirs.data_dir().to_path_buf()
            }
        };

        fs::create_dir_all(data_dir.join(DUMP_DIR))?;

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Default database path
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    /// Where a payload's last fetched dump is kept
    pub fn dump_path(&self, payload: Payload) -> PathBuf {
        self.data_dir.join(DUMP_DIR).join(payload.file_name())
    }

    /// Persist a dump. Written to a sibling file first so a crash never leaves a
    /// half-written dump under the real name.
    pub fn store_dump(&self, dump: &Dump) -> Result<PathBuf> {
        let dest = self.dump_path(dump.payload);
        let partial = dest.with_extension(PARTIAL_SUFFIX);
        fs::write(&partial, &dump.bytes)?;
        fs::rename(&partial, &dest)?;
        Ok(dest)
    }

    /// Remove partial files left behind by an interrupted run
    pub fn cleanup_partial_dumps(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(self.data_dir.join(DUMP_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(PARTIAL_SUFFIX) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_dump_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(Some(dir.path().to_path_buf())).unwrap();

        let dump = Dump {
            payload: Payload::Modules,
            bytes: b"[]".to_vec(),
            token: None,
            source: "test".into(),
        };
        let path = cache.store_dump(&dump).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"[]");

        fs::write(dir.path().join("eddb").join("stations.part"), b"{").unwrap();
        assert_eq!(cache.cleanup_partial_dumps().unwrap(), 1);
        assert!(path.exists());
        assert_eq!(cache.db_path(), dir.path().join("TradeDangerous.db"));
    }
}
