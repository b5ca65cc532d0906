use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, remove_file, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const META_VERSION: u32 = 1;

/// Sidecar written next to an index artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub num_games: u32,
    pub num_positions: u32,
    pub created_at: String,
    pub version: u32,
}

impl IndexMeta {
    pub fn new(num_games: usize, num_positions: usize) -> Self {
        Self {
            num_games: num_games as u32,
            num_positions: num_positions as u32,
            created_at: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "".into()),
            version: META_VERSION,
        }
    }
}

/// `games.idx` -> `games.idx.meta.json`
pub fn meta_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Opens `path` for writing, removing whatever was there and creating parent
/// directories as needed.
pub fn create_file(path: &Path) -> Result<File> {
    if path.exists() {
        remove_file(path).with_context(|| format!("removing old {}", path.display()))?;
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("creating {}", path.display()))
}

pub fn save_meta(artifact: &Path, meta: &IndexMeta) -> Result<()> {
    let mut f = File::create(meta_path(artifact))?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

/// `Ok(None)` when the artifact has no sidecar.
pub fn load_meta(artifact: &Path) -> Result<Option<IndexMeta>> {
    let path = meta_path(artifact);
    if !path.exists() {
        return Ok(None);
    }
    let mut f = File::open(&path)?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: IndexMeta =
        serde_json::from_str(&buf).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(meta))
}
