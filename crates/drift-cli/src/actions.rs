//! What `drift receive` does with each received item.

use drift_core::{HandlerRegistry, Item, ItemHandler};
use drift_files::TypeTree;
use drift_files::metadata::ORIGINAL_FILENAME_KEY;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An [`ItemHandler`] that can act on a received item
pub trait ReceiveAction: ItemHandler {
    /// Act on `item`; returns a one-line summary
    fn apply(&self, item: &Item) -> anyhow::Result<String>;
}

/// Prints text items to stdout
pub struct PrintText {
    types: Vec<String>,
}

impl PrintText {
    pub fn new() -> Self {
        Self {
            types: vec!["public.text".to_string()],
        }
    }
}

impl ItemHandler for PrintText {
    fn name(&self) -> &str {
        "print-text"
    }

    fn handled_types(&self) -> &[String] {
        &self.types
    }
}

impl ReceiveAction for PrintText {
    fn apply(&self, item: &Item) -> anyhow::Result<String> {
        let bytes = item.read_to_vec()?;
        println!("{}", String::from_utf8_lossy(&bytes));
        Ok(format!("printed {} ({} bytes)", item.title(), bytes.len()))
    }
}

/// Moves items into a directory
pub struct SaveToDirectory {
    dir: PathBuf,
}

impl SaveToDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ItemHandler for SaveToDirectory {
    fn name(&self) -> &str {
        "save"
    }

    fn handled_types(&self) -> &[String] {
        &[]
    }
}

impl ReceiveAction for SaveToDirectory {
    fn apply(&self, item: &Item) -> anyhow::Result<String> {
        std::fs::create_dir_all(&self.dir)?;
        let target = unique_path(&self.dir, &file_name_for(item));
        item.adopt(&target)?;
        Ok(format!("saved {}", target.display()))
    }
}

/// Handler registry used by `drift receive`
pub fn receive_handlers(output: &Path, print_text: bool) -> HandlerRegistry<dyn ReceiveAction> {
    let fallback: Arc<dyn ReceiveAction> = Arc::new(SaveToDirectory::new(output));
    let mut registry = HandlerRegistry::new(fallback, Arc::new(TypeTree::with_defaults()));
    if print_text {
        registry.register(Arc::new(PrintText::new()));
    }
    registry
}

/// Bare file name for a received item; never contains a directory part
fn file_name_for(item: &Item) -> String {
    let candidate = item
        .metadata()
        .get(ORIGINAL_FILENAME_KEY)
        .map_or_else(|| item.title(), String::as_str);

    Path::new(candidate)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map_or_else(|| format!("drift-{}", item.id()), str::to_string)
}

/// `dir/name`, or `dir/stem (n).ext` if that already exists
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let first = dir.join(name);
    if !first.exists() {
        return first;
    }

    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = path.extension().and_then(|e| e.to_str());
    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}
