//! Read-only filesystem boundary.
//!
//! Jobs never touch `std::fs` directly; they go through [`ReadOnlyFs`] so tests can run
//! against an in-memory tree and the server can later layer an overlay for open documents.

use std::{
	collections::BTreeMap,
	fmt, io,
	path::{Component, Path, PathBuf},
	sync::RwLock,
};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
	pub name: String,
	pub is_dir: bool,
}

pub trait ReadOnlyFs: fmt::Debug + Send + Sync + 'static {
	fn read_dir(&self, path: &Path) -> io::Result<Vec<FsEntry>>;
	fn read_to_string(&self, path: &Path) -> io::Result<String>;
	fn is_dir(&self, path: &Path) -> bool;
	fn is_file(&self, path: &Path) -> bool;
}

/// Lexically normalizes a path, resolving `.` and `..` components without touching disk.
///
/// Record keys must be comparable: `/root/sub/..` and `/root` refer to the same module
/// directory and must map to the same key.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
	let mut parts: Vec<Component<'_>> = Vec::new();

	for comp in path.components() {
		match comp {
			Component::CurDir => {}
			Component::ParentDir => match parts.last() {
				Some(Component::Normal(_)) => {
					parts.pop();
				}
				Some(Component::RootDir | Component::Prefix(_)) => {}
				_ => parts.push(comp),
			},
			other => parts.push(other),
		}
	}

	parts.iter().map(|comp| comp.as_os_str()).collect()
}

/// The real disk, via `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl ReadOnlyFs for RealFs {
	fn read_dir(&self, path: &Path) -> io::Result<Vec<FsEntry>> {
		let mut entries = Vec::new();
		for entry in std::fs::read_dir(path)? {
			let entry = entry?;
			entries.push(FsEntry {
				name: entry.file_name().to_string_lossy().into_owned(),
				is_dir: entry.file_type()?.is_dir(),
			});
		}
		entries.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(entries)
	}

	fn read_to_string(&self, path: &Path) -> io::Result<String> {
		std::fs::read_to_string(path)
	}

	fn is_dir(&self, path: &Path) -> bool {
		path.is_dir()
	}

	fn is_file(&self, path: &Path) -> bool {
		path.is_file()
	}
}

/// In-memory filesystem keyed by absolute file path, for tests.
///
/// Directories exist implicitly: any path that is a strict prefix of a stored file is a
/// directory.
#[derive(Debug, Default)]
pub struct MemFs {
	files: RwLock<BTreeMap<PathBuf, String>>,
}

const POISONED_LOCK: &str = "memfs lock poisoned";

impl MemFs {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
		self.files
			.write()
			.expect(POISONED_LOCK)
			.insert(normalize_path(&path.into()), content.into());
	}

	pub fn remove_file(&self, path: &Path) {
		self.files
			.write()
			.expect(POISONED_LOCK)
			.remove(&normalize_path(path));
	}
}

impl ReadOnlyFs for MemFs {
	fn read_dir(&self, path: &Path) -> io::Result<Vec<FsEntry>> {
		let path = normalize_path(path);
		let files = self.files.read().expect(POISONED_LOCK);

		let mut entries: BTreeMap<String, bool> = BTreeMap::new();
		for file in files.keys() {
			let Ok(rest) = file.strip_prefix(&path) else {
				continue;
			};
			let mut comps = rest.components();
			let Some(first) = comps.next() else {
				continue;
			};
			let name = first.as_os_str().to_string_lossy().into_owned();
			let is_dir = comps.next().is_some();
			*entries.entry(name).or_insert(false) |= is_dir;
		}

		if entries.is_empty() && !files.keys().any(|f| f.starts_with(&path)) {
			return Err(io::Error::new(
				io::ErrorKind::NotFound,
				format!("no such directory: {}", path.display()),
			));
		}

		Ok(entries
			.into_iter()
			.map(|(name, is_dir)| FsEntry { name, is_dir })
			.collect())
	}

	fn read_to_string(&self, path: &Path) -> io::Result<String> {
		self.files
			.read()
			.expect(POISONED_LOCK)
			.get(&normalize_path(path))
			.cloned()
			.ok_or_else(|| {
				io::Error::new(
					io::ErrorKind::NotFound,
					format!("no such file: {}", path.display()),
				)
			})
	}

	fn is_dir(&self, path: &Path) -> bool {
		let path = normalize_path(path);
		self.files
			.read()
			.expect(POISONED_LOCK)
			.keys()
			.any(|file| file != &path && file.starts_with(&path))
	}

	fn is_file(&self, path: &Path) -> bool {
		self.files
			.read()
			.expect(POISONED_LOCK)
			.contains_key(&normalize_path(path))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalize_resolves_dot_and_dotdot() {
		assert_eq!(
			normalize_path(Path::new("/root/sub/../other/./mod")),
			PathBuf::from("/root/other/mod")
		);
		assert_eq!(normalize_path(Path::new("/root/sub/..")), PathBuf::from("/root"));
		assert_eq!(normalize_path(Path::new("/..")), PathBuf::from("/"));
	}

	#[test]
	fn realfs_lists_entries_and_reads_files() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("main.gwk"), "variable region\n").unwrap();
		std::fs::create_dir(dir.path().join("nested")).unwrap();

		let entries = RealFs.read_dir(dir.path()).unwrap();
		assert_eq!(entries.len(), 2);
		assert!(entries.iter().any(|e| e.name == "main.gwk" && !e.is_dir));
		assert!(entries.iter().any(|e| e.name == "nested" && e.is_dir));

		assert_eq!(
			RealFs.read_to_string(&dir.path().join("main.gwk")).unwrap(),
			"variable region\n"
		);
		assert!(RealFs.is_dir(&dir.path().join("nested")));
	}

	#[test]
	fn memfs_lists_files_and_implicit_dirs() {
		let fs = MemFs::new();
		fs.add_file("/mod/main.gwk", "");
		fs.add_file("/mod/nested/child.gwk", "");

		let entries = fs.read_dir(Path::new("/mod")).unwrap();
		assert_eq!(
			entries,
			vec![
				FsEntry {
					name: "main.gwk".into(),
					is_dir: false
				},
				FsEntry {
					name: "nested".into(),
					is_dir: true
				},
			]
		);

		assert!(fs.is_dir(Path::new("/mod/nested")));
		assert!(!fs.is_dir(Path::new("/mod/main.gwk")));
		assert!(fs.is_file(Path::new("/mod/main.gwk")));
	}
}
