use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::mot::{Boundary, CalibratedBoundary};
use crate::session::StoreError;
use crate::utils::{Point, Resolution};

/// Per-device boundary lookup consulted when a session starts
pub trait BoundaryStore: Send + Sync {
    fn get_boundary(&self, device_id: &str) -> Result<Option<CalibratedBoundary>, StoreError>;
    fn set_boundary(&self, device_id: &str, boundary: Option<CalibratedBoundary>) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryBoundaryStore {
    boundaries: RwLock<BTreeMap<String, CalibratedBoundary>>,
}

impl MemoryBoundaryStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_boundary(self, device_id: &str, boundary: CalibratedBoundary) -> Self {
        if let Ok(mut boundaries) = self.boundaries.write() {
            boundaries.insert(device_id.to_string(), boundary);
        }
        self
    }
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::other("boundary store lock poisoned"))
}

impl BoundaryStore for MemoryBoundaryStore {
    fn get_boundary(&self, device_id: &str) -> Result<Option<CalibratedBoundary>, StoreError> {
        let boundaries = self.boundaries.read().map_err(|_| poisoned())?;
        Ok(boundaries.get(device_id).copied())
    }
    fn set_boundary(&self, device_id: &str, boundary: Option<CalibratedBoundary>) -> Result<(), StoreError> {
        let mut boundaries = self.boundaries.write().map_err(|_| poisoned())?;
        match boundary {
            Some(b) => boundaries.insert(device_id.to_string(), b),
            None => boundaries.remove(device_id),
        };
        Ok(())
    }
}

fn default_calib_width() -> u32 {
    640
}

fn default_calib_height() -> u32 {
    480
}

// On-disk form of one device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BoundaryRecord {
    p1: (f32, f32),
    p2: (f32, f32),
    #[serde(default = "default_calib_width")]
    calib_width: u32,
    #[serde(default = "default_calib_height")]
    calib_height: u32,
}

impl BoundaryRecord {
    fn to_boundary(&self, device_id: &str) -> Result<CalibratedBoundary, StoreError> {
        CalibratedBoundary::new(
            Boundary::new(Point::from(self.p1), Point::from(self.p2)),
            Resolution::new(self.calib_width, self.calib_height),
        )
        .map_err(|source| StoreError::Invalid {
            device_id: device_id.to_string(),
            source,
        })
    }
}

impl From<&CalibratedBoundary> for BoundaryRecord {
    fn from(b: &CalibratedBoundary) -> Self {
        BoundaryRecord {
            p1: (b.line.p1.x, b.line.p1.y),
            p2: (b.line.p2.x, b.line.p2.y),
            calib_width: b.calibration.width,
            calib_height: b.calibration.height,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BoundaryDocument {
    #[serde(default)]
    devices: BTreeMap<String, BoundaryRecord>,
}

/// JSON file of the form
///
/// ```json
/// { "devices": { "b8:27:eb:00:11:22": { "p1": [50, 240], "p2": [590, 240], "calib_width": 640, "calib_height": 480 } } }
/// ```
///
/// The file is read once on open and rewritten on every update.
pub struct FileBoundaryStore {
    path: PathBuf,
    cache: MemoryBoundaryStore,
}

impl FileBoundaryStore {
    /// Opens the store. A missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let cache = MemoryBoundaryStore::new();
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let document: BoundaryDocument = serde_json::from_str(&raw)?;
            for (device_id, record) in document.devices.iter() {
                match record.to_boundary(device_id) {
                    Ok(boundary) => cache.set_boundary(device_id, Some(boundary))?,
                    // One bad entry must not disable the others
                    Err(err) => tracing::warn!(%device_id, error = %err, "ignoring invalid boundary"),
                }
            }
        } else {
            tracing::warn!(path = %path.display(), "boundary file not found, starting with no boundaries");
        }
        Ok(FileBoundaryStore {
            path: path.to_path_buf(),
            cache,
        })
    }
    fn persist(&self) -> Result<(), StoreError> {
        let boundaries = self.cache.boundaries.read().map_err(|_| poisoned())?;
        let document = BoundaryDocument {
            devices: boundaries
                .iter()
                .map(|(id, b)| (id.clone(), BoundaryRecord::from(b)))
                .collect(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&document)?)?;
        Ok(())
    }
}

impl BoundaryStore for FileBoundaryStore {
    fn get_boundary(&self, device_id: &str) -> Result<Option<CalibratedBoundary>, StoreError> {
        self.cache.get_boundary(device_id)
    }
    fn set_boundary(&self, device_id: &str, boundary: Option<CalibratedBoundary>) -> Result<(), StoreError> {
        self.cache.set_boundary(device_id, boundary)?;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_defaults_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boundaries.json");
        std::fs::write(
            &path,
            r#"{"devices": {
                "cab-1": {"p1": [50, 240], "p2": [590, 240]},
                "cab-2": {"p1": [10, 10], "p2": [10, 10]}
            }}"#,
        )
        .unwrap();
        let store = FileBoundaryStore::open(&path).unwrap();
        let boundary = store.get_boundary("cab-1").unwrap().unwrap();
        assert_eq!(boundary.calibration, Resolution::new(640, 480));
        assert_eq!(boundary.line.p2, Point::new(590.0, 240.0));
        // Degenerate entry skipped
        assert!(store.get_boundary("cab-2").unwrap().is_none());
        assert!(store.get_boundary("unknown").unwrap().is_none());
    }

    #[test]
    fn test_file_store_persists_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("boundaries.json");
        let store = FileBoundaryStore::open(&path).unwrap();
        let boundary = CalibratedBoundary::new(
            Boundary::new(Point::new(0.0, 100.0), Point::new(320.0, 100.0)),
            Resolution::new(320, 240),
        )
        .unwrap();
        store.set_boundary("cab-9", Some(boundary)).unwrap();

        let reopened = FileBoundaryStore::open(&path).unwrap();
        assert_eq!(reopened.get_boundary("cab-9").unwrap(), Some(boundary));

        reopened.set_boundary("cab-9", None).unwrap();
        let reopened = FileBoundaryStore::open(&path).unwrap();
        assert!(reopened.get_boundary("cab-9").unwrap().is_none());
    }
}
