use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceFailure;
use crate::model::{Snapshot, SnapshotRow};

const LATEST_SNAPSHOT_POINTER_PATH: &str = "latest-snapshot.ptr";
const SNAPSHOT_PREFIX: &str = "snap_";
const SNAPSHOT_EXT: &str = ".json";

/// On-disk shape: one row per item.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    region: String,
    generated_at: i64,
    rows: Vec<SnapshotRow>,
}

/// Sole owner of persisted price state.
pub struct SnapshotStore {
    root: PathBuf,
    keep: usize,
}

fn io_failure(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceFailure + '_ {
    move |source| PersistenceFailure::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            root: root.into(),
            keep: keep.max(1),
        }
    }

    fn pointer_path(&self) -> PathBuf {
        self.root.join(LATEST_SNAPSHOT_POINTER_PATH)
    }

    /// The last committed snapshot, or an empty one before the first commit.
    pub fn load_previous(&self) -> Result<Snapshot, PersistenceFailure> {
        let pointer = self.pointer_path();
        let snap_name = match fs::read_to_string(&pointer) {
            Ok(name) => name.trim().to_string(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("No previous snapshot in {}, starting fresh", self.root.display());
                return Ok(Snapshot::default());
            }
            Err(err) => return Err(io_failure(&pointer)(err)),
        };

        let snap_path = self.root.join(&snap_name);
        let file = File::open(&snap_path).map_err(io_failure(&snap_path))?;
        let stored: SnapshotFile =
            serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| {
                PersistenceFailure::Corrupt {
                    path: snap_path.clone(),
                    source,
                }
            })?;

        let mut snapshot = Snapshot::new(stored.region, stored.generated_at);
        snapshot.extend(stored.rows);
        debug!("Loaded {} rows from {snap_name}", snapshot.len());
        Ok(snapshot)
    }

    /// Writes `current` as a new snapshot file, then swaps the pointer with a
    /// rename. Until the rename lands the previous snapshot stays authoritative.
    pub fn commit(&self, current: &Snapshot) -> Result<PathBuf, PersistenceFailure> {
        fs::create_dir_all(&self.root).map_err(io_failure(&self.root))?;

        let snap_name = self.unused_snapshot_name(current.generated_at);
        let snap_path = self.root.join(&snap_name);
        let stored = SnapshotFile {
            region: current.region.clone(),
            generated_at: current.generated_at,
            rows: current.rows().cloned().collect(),
        };
        let body = serde_json::to_vec_pretty(&stored).map_err(|source| {
            PersistenceFailure::Corrupt {
                path: snap_path.clone(),
                source,
            }
        })?;
        write_synced(&snap_path, &body)?;

        let pointer = self.pointer_path();
        let staged = pointer.with_extension("ptr.tmp");
        write_synced(&staged, snap_name.as_bytes())?;
        fs::rename(&staged, &pointer).map_err(io_failure(&pointer))?;

        info!("Committed {} rows to {snap_name}", current.len());
        self.prune(&snap_name);
        Ok(snap_path)
    }

    fn unused_snapshot_name(&self, generated_at: i64) -> String {
        let stamp = time_format::strftime_utc("%Y%m%dT%H%M%SZ", generated_at)
            .unwrap_or_else(|_| generated_at.to_string());
        // the sequence keeps same-second commits in name order
        let mut n = 0;
        loop {
            let name = format!("{SNAPSHOT_PREFIX}{stamp}-{n:03}{SNAPSHOT_EXT}");
            if !self.root.join(&name).exists() {
                return name;
            }
            n += 1;
        }
    }

    /// Keeps the newest `keep` snapshots. Best effort.
    fn prune(&self, current: &str) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Couldn't list {} for pruning: {err}", self.root.display());
                return;
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok()?.file_name().into_string().ok())
            .filter(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(SNAPSHOT_EXT))
            .filter(|n| n != current)
            .collect();
        names.sort();

        let excess = (names.len() + 1).saturating_sub(self.keep);
        for name in names.into_iter().take(excess) {
            debug!("Pruning old snapshot {name}");
            if let Err(err) = fs::remove_file(self.root.join(&name)) {
                warn!("Couldn't prune {name}: {err}");
            }
        }
    }
}

fn write_synced(path: &Path, body: &[u8]) -> Result<(), PersistenceFailure> {
    let mut file = File::create(path).map_err(io_failure(path))?;
    file.write_all(body).map_err(io_failure(path))?;
    file.sync_all().map_err(io_failure(path))
}
