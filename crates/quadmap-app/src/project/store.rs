use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::snapshot::ProjectSnapshot;

/// Project files on disk (~/.config/quadmap/projects/*.json).
pub struct ProjectStore {
    dir: PathBuf,
    /// Sorted by name.
    pub projects: Vec<String>,
    pub current: Option<usize>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::with_dir(Self::default_dir())
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            projects: Vec::new(),
            current: None,
        }
    }

    pub fn default_dir() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("quadmap").join("projects")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn sanitize_name(name: &str) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | '.') { '_' } else { c })
            .collect();
        sanitized.trim().chars().take(64).collect()
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Rescan the directory for project files.
    pub fn scan(&mut self) {
        self.projects.clear();
        self.current = None;

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => {
                log::info!("No projects directory at {}", self.dir.display());
                return;
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        self.projects = names;

        log::info!(
            "Found {} projects in {}",
            self.projects.len(),
            self.dir.display()
        );
    }

    /// Write a snapshot under `name` and rescan. Returns its index.
    pub fn save(&mut self, name: &str, snapshot: &ProjectSnapshot) -> Result<usize> {
        let name = Self::sanitize_name(name);
        if name.is_empty() {
            anyhow::bail!("Project name cannot be empty");
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&name);
        save_to(&path, snapshot)?;

        self.scan();
        let idx = self.projects.iter().position(|n| n == &name).unwrap_or(0);
        self.current = Some(idx);
        Ok(idx)
    }

    /// Read the project at `index`. Entry-level problems are returned
    /// alongside the snapshot.
    pub fn load(&mut self, index: usize) -> Result<(ProjectSnapshot, Vec<String>)> {
        let name = self
            .projects
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid project index"))?;
        let loaded = load_from(&self.path_for(name))?;
        self.current = Some(index);
        Ok(loaded)
    }

    pub fn delete(&mut self, index: usize) -> Result<()> {
        let name = self
            .projects
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid project index"))?;
        let path = self.path_for(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::info!("Deleted project '{name}'");
        }
        self.scan();
        Ok(())
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current
            .and_then(|i| self.projects.get(i))
            .map(String::as_str)
    }
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a snapshot to an arbitrary path as pretty JSON.
pub fn save_to(path: &Path, snapshot: &ProjectSnapshot) -> Result<()> {
    let json = snapshot.to_json()?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    log::info!("Saved project to {}", path.display());
    Ok(())
}

/// Read a snapshot from an arbitrary path.
pub fn load_from(path: &Path) -> Result<(ProjectSnapshot, Vec<String>)> {
    let json =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let loaded = ProjectSnapshot::from_json(&json)?;
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackMode;
    use crate::project::snapshot::{SNAPSHOT_VERSION, SurfaceEntry};

    fn snap() -> ProjectSnapshot {
        ProjectSnapshot {
            version: SNAPSHOT_VERSION,
            surfaces: vec![SurfaceEntry {
                name: "Surface 1".into(),
                corners: [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]],
                opacity: 0.75,
                media_path: Some("a.mp4".into()),
            }],
            playback_mode: PlaybackMode::Sequential,
            playlist_steps: Vec::new(),
            continuous_surfaces: vec![0],
            sequence_order: None,
        }
    }

    #[test]
    fn sanitize_name_strips_separators_and_dots() {
        assert_eq!(ProjectStore::sanitize_name("a/b\\c.d"), "a_b_c_d");
        assert_eq!(ProjectStore::sanitize_name("  show  "), "show");
        assert_eq!(ProjectStore::sanitize_name(&"x".repeat(100)).len(), 64);
        assert_eq!(ProjectStore::sanitize_name("   "), "");
    }

    #[test]
    fn save_scan_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProjectStore::with_dir(dir.path().join("projects"));
        store.scan();
        assert!(store.projects.is_empty());

        store.save("zeta", &snap()).unwrap();
        let idx = store.save("alpha", &snap()).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(store.projects, vec!["alpha", "zeta"]);
        assert_eq!(store.current_name(), Some("alpha"));

        let (loaded, rejected) = store.load(1).unwrap();
        assert!(rejected.is_empty());
        assert_eq!(loaded, snap());

        store.delete(0).unwrap();
        assert_eq!(store.projects, vec!["zeta"]);
        assert!(store.load(5).is_err());
    }

    #[test]
    fn empty_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProjectStore::with_dir(dir.path());
        assert!(store.save(" ", &snap()).is_err());
    }

    #[test]
    fn load_from_missing_path_fails() {
        assert!(load_from(Path::new("/nope/show.json")).is_err());
    }

    #[test]
    fn scan_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        save_to(&dir.path().join("show.json"), &snap()).unwrap();
        let mut store = ProjectStore::with_dir(dir.path());
        store.scan();
        assert_eq!(store.projects, vec!["show"]);
    }
}
