use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::modules::error::{BuildError, Result};
use crate::modules::schematic::{self, Dimensions, VoxelGrid};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Schem,
    Schematic,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Schem => write!(f, "schem"),
            FileKind::Schematic => write!(f, "schematic"),
        }
    }
}

impl FromStr for FileKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "schem" => Ok(FileKind::Schem),
            "schematic" => Ok(FileKind::Schematic),
            _ => Err(()),
        }
    }
}

/// Catalog entry for one structure file. Contents are parsed on first use.
#[derive(Clone, Debug)]
pub struct StructureDescriptor {
    pub name: String,
    pub display_name: String,
    pub category: String,
    pub path: PathBuf,
    pub kind: FileKind,
    pub file_size: u64,
    pub dimensions: Option<Dimensions>,
    pub materials: Option<BTreeMap<String, u32>>,
    pub loaded: bool,
    grid: Option<Arc<VoxelGrid>>,
}

impl StructureDescriptor {
    pub fn grid(&self) -> Option<Arc<VoxelGrid>> {
        self.grid.clone()
    }

    pub fn block_count(&self) -> Option<u32> {
        self.materials.as_ref().map(|m| m.values().sum())
    }
}

/// Index of structure files under `<root>/<category>/`.
#[derive(Debug)]
pub struct StructureRegistry {
    root: PathBuf,
    categories: Vec<String>,
    entries: Vec<StructureDescriptor>,
    index: HashMap<String, usize>,
}

impl StructureRegistry {
    pub fn new(root: impl Into<PathBuf>, categories: Vec<String>) -> Self {
        Self {
            root: root.into(),
            categories,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the catalog from disk. Returns the number of registered files.
    pub fn scan(&mut self) -> usize {
        self.entries.clear();
        self.index.clear();

        for category in self.categories.clone() {
            let dir = self.root.join(&category);
            let Ok(read) = fs::read_dir(&dir) else {
                debug!(dir = %dir.display(), "category directory missing");
                continue;
            };
            let mut files: Vec<PathBuf> = read
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            files.sort();

            for path in files {
                self.register(&category, path);
            }
        }

        info!(
            root = %self.root.display(),
            count = self.entries.len(),
            "scanned structures"
        );
        self.entries.len()
    }

    fn register(&mut self, category: &str, path: PathBuf) {
        let Some(kind) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| FileKind::from_str(e).ok())
        else {
            return;
        };
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return;
        };

        let name = stem.to_lowercase();
        if self.index.contains_key(&name) {
            warn!(name = %name, path = %path.display(), "duplicate structure name ignored");
            return;
        }

        let file_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(StructureDescriptor {
            display_name: display_name(stem),
            name,
            category: category.to_string(),
            path,
            kind,
            file_size,
            dimensions: None,
            materials: None,
            loaded: false,
            grid: None,
        });
    }

    /// Exact key first, then the first registered key that contains the query
    /// or is contained by it. Not a ranked match.
    pub fn find(&self, query: &str) -> Option<&StructureDescriptor> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }
        if let Some(&i) = self.index.get(&query) {
            return Some(&self.entries[i]);
        }
        self.entries
            .iter()
            .find(|e| e.name.contains(&query) || query.contains(&e.name))
    }

    pub fn list(&self, category: Option<&str>) -> Vec<&StructureDescriptor> {
        self.entries
            .iter()
            .filter(|e| category.is_none_or(|c| e.category.eq_ignore_ascii_case(c)))
            .collect()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the named structure once and cache grid, dimensions and histogram.
    pub fn load_data(&mut self, query: &str) -> Result<Arc<VoxelGrid>> {
        let i = {
            let found = self
                .find(query)
                .ok_or_else(|| BuildError::StructureNotFound(query.to_string()))?;
            self.index[&found.name]
        };

        let entry = &mut self.entries[i];
        if let Some(grid) = &entry.grid {
            return Ok(grid.clone());
        }

        let grid = Arc::new(schematic::load(&entry.path)?);
        entry.dimensions = Some(grid.dimensions());
        entry.materials = Some(grid.histogram());
        entry.loaded = true;
        entry.grid = Some(grid.clone());
        info!(structure = %entry.name, blocks = ?entry.block_count(), "structure loaded");
        Ok(grid)
    }

    pub fn describe(&mut self, query: &str) -> Result<String> {
        self.load_data(query)?;
        let entry = self
            .find(query)
            .ok_or_else(|| BuildError::StructureNotFound(query.to_string()))?;

        let mut out = format!("{} ({}, {})", entry.display_name, entry.category, entry.kind);
        if let Some(d) = entry.dimensions {
            out.push_str(&format!(" | size {}x{}x{}", d.x, d.y, d.z));
        }
        if let Some(materials) = &entry.materials {
            let mut sorted: Vec<_> = materials.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            let listed: Vec<String> = sorted
                .iter()
                .map(|(name, count)| format!("{} x{}", name, count))
                .collect();
            out.push_str(&format!(
                " | {} blocks: {}",
                entry.block_count().unwrap_or(0),
                listed.join(", ")
            ));
        }
        Ok(out)
    }
}

fn display_name(stem: &str) -> String {
    stem.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::schematic::fixtures::{gzip, stone_plus};

    fn registry_with(files: &[(&str, &str, Vec<u8>)]) -> (tempfile::TempDir, StructureRegistry) {
        let dir = tempfile::tempdir().unwrap();
        for (category, file, bytes) in files {
            let cat = dir.path().join(category);
            fs::create_dir_all(&cat).unwrap();
            fs::write(cat.join(file), bytes).unwrap();
        }
        let mut registry = StructureRegistry::new(
            dir.path(),
            vec!["buildings".to_string(), "decorations".to_string()],
        );
        registry.scan();
        (dir, registry)
    }

    #[test]
    fn scan_registers_known_extensions_without_parsing() {
        let (_dir, registry) = registry_with(&[
            ("buildings", "Small_House.schem", stone_plus()),
            ("buildings", "notes.txt", b"hi".to_vec()),
            ("decorations", "fountain.schematic", b"junk".to_vec()),
            ("elsewhere", "ignored.schem", stone_plus()),
        ]);
        assert_eq!(registry.len(), 2);
        let house = registry.find("small_house").unwrap();
        assert_eq!(house.display_name, "Small House");
        assert_eq!(house.category, "buildings");
        assert!(!house.loaded);
        assert!(house.dimensions.is_none());
        assert_eq!(registry.list(Some("decorations")).len(), 1);
    }

    #[test]
    fn substring_find_returns_first_registered() {
        let (_dir, registry) = registry_with(&[
            ("buildings", "small_house.schem", stone_plus()),
            ("decorations", "house_tower.schem", stone_plus()),
        ]);
        assert_eq!(registry.find("house").unwrap().name, "small_house");
        assert_eq!(registry.find("HOUSE_TOWER").unwrap().name, "house_tower");
        assert_eq!(registry.find("a big house_tower please").unwrap().name, "house_tower");
        assert!(registry.find("castle").is_none());
    }

    #[test]
    fn load_data_is_memoized_and_stable() {
        let (_dir, mut registry) =
            registry_with(&[("buildings", "plus.schem", gzip(&stone_plus()))]);
        let first = registry.load_data("plus").unwrap();
        let entry = registry.find("plus").unwrap().clone();
        assert!(entry.loaded);
        assert_eq!(entry.dimensions, Some(Dimensions { x: 3, y: 1, z: 3 }));
        assert_eq!(entry.materials.as_ref().unwrap()["stone"], 5);

        let second = registry.load_data("plus").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let again = registry.find("plus").unwrap();
        assert_eq!(again.dimensions, entry.dimensions);
        assert_eq!(again.materials, entry.materials);
    }

    #[test]
    fn unparseable_file_is_a_format_error() {
        let (_dir, mut registry) =
            registry_with(&[("decorations", "broken.schematic", b"junk".to_vec())]);
        assert!(matches!(
            registry.load_data("broken"),
            Err(BuildError::Format(_))
        ));
        assert!(matches!(
            registry.load_data("missing"),
            Err(BuildError::StructureNotFound(_))
        ));
    }

    #[test]
    fn describe_lists_size_and_materials() {
        let (_dir, mut registry) = registry_with(&[("buildings", "plus.schem", stone_plus())]);
        let text = registry.describe("plus").unwrap();
        assert!(text.contains("3x1x3"), "{text}");
        assert!(text.contains("stone x5"), "{text}");
    }
}
