//! In-process deterministic packaging into an uncompressed tar.

use crate::backend::{PackagedArtifact, PublishBackend, PublishSpec};
use crate::PublishError;
use knapsack_schema::ExcludeSet;
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Packages source directories into a deterministic tar.
///
/// The entrypoint directory's contents sit at the archive root; every
/// library directory becomes a top-level subdirectory named by its final
/// path component. Entries are sorted by archive path and headers carry
/// mtime 0 and uid/gid 0 with source modes preserved, so unchanged sources
/// produce byte-identical archives. Symlinks are read through, matching
/// what the identity hash read; an unreadable or dangling entry is an
/// error, never a silent omission.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PublishBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn publish(&self, spec: &PublishSpec) -> Result<PackagedArtifact, PublishError> {
        let staged = stage_sources(&spec.code_paths, &spec.exclude)?;
        let archive = pack_entries(&staged)?;
        debug!(
            cache_key = %spec.cache_key,
            entries = staged.len(),
            bytes = archive.len(),
            "packaged artifact"
        );
        Ok(PackagedArtifact {
            archive,
            entry_count: staged.len() as u64,
        })
    }
}

enum EntryKind {
    Dir,
    File { source: PathBuf },
}

struct StagedEntry {
    archive_path: PathBuf,
    kind: EntryKind,
    mode: u32,
}

struct LevelEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
    mode: u32,
}

/// Flatten the source directories into archive entries. Top-level names are
/// claimed exactly once; a second claim is a staging conflict.
fn stage_sources(
    code_paths: &[PathBuf],
    exclude: &ExcludeSet,
) -> Result<Vec<StagedEntry>, PublishError> {
    let mut entries = Vec::new();
    let mut claimed: HashSet<String> = HashSet::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();

    let Some((entrypoint_dir, library_dirs)) = code_paths.split_first() else {
        return Ok(entries);
    };
    if !entrypoint_dir.is_dir() {
        return Err(PublishError::MissingSource {
            path: entrypoint_dir.clone(),
        });
    }

    mark_visited(entrypoint_dir, &mut visited)?;
    for level in list_level(entrypoint_dir, exclude)? {
        claim(&mut claimed, &level.name)?;
        stage_entry(level, Path::new(""), exclude, &mut entries, &mut visited)?;
    }

    for library in library_dirs {
        if !library.is_dir() {
            return Err(PublishError::MissingSource {
                path: library.clone(),
            });
        }
        let name = library
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| PublishError::MissingSource {
                path: library.clone(),
            })?;
        claim(&mut claimed, &name)?;

        let metadata = fs::metadata(library).map_err(|source| PublishError::Unreadable {
            path: library.clone(),
            source,
        })?;
        let archive_path = PathBuf::from(&name);
        entries.push(StagedEntry {
            archive_path: archive_path.clone(),
            kind: EntryKind::Dir,
            mode: metadata.permissions().mode() & 0o7777,
        });
        if mark_visited(library, &mut visited)? {
            stage_tree(library, &archive_path, exclude, &mut entries, &mut visited)?;
        }
    }

    entries.sort_by(|a, b| a.archive_path.cmp(&b.archive_path));
    Ok(entries)
}

fn stage_tree(
    source: &Path,
    prefix: &Path,
    exclude: &ExcludeSet,
    entries: &mut Vec<StagedEntry>,
    visited: &mut HashSet<PathBuf>,
) -> Result<(), PublishError> {
    for level in list_level(source, exclude)? {
        stage_entry(level, prefix, exclude, entries, visited)?;
    }
    Ok(())
}

fn stage_entry(
    level: LevelEntry,
    prefix: &Path,
    exclude: &ExcludeSet,
    entries: &mut Vec<StagedEntry>,
    visited: &mut HashSet<PathBuf>,
) -> Result<(), PublishError> {
    let archive_path = prefix.join(&level.name);
    if level.is_dir {
        entries.push(StagedEntry {
            archive_path: archive_path.clone(),
            kind: EntryKind::Dir,
            mode: level.mode,
        });
        // Symlink cycles resolve to an already-visited directory; the
        // repeat is dropped the same way the identity hash drops it.
        if mark_visited(&level.path, visited)? {
            stage_tree(&level.path, &archive_path, exclude, entries, visited)?;
        }
    } else {
        entries.push(StagedEntry {
            archive_path,
            kind: EntryKind::File { source: level.path },
            mode: level.mode,
        });
    }
    Ok(())
}

/// One directory level, exclusions applied. Classification follows
/// symlinks, like the identity hash: a link resolving to a directory is
/// staged as a directory, anything else is read as a file.
fn list_level(dir: &Path, exclude: &ExcludeSet) -> Result<Vec<LevelEntry>, PublishError> {
    let read = fs::read_dir(dir).map_err(|source| PublishError::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut level = Vec::new();
    for entry in read {
        let entry = entry.map_err(|source| PublishError::Unreadable {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if exclude.matches(&name) {
            continue;
        }
        let path = entry.path();
        let metadata = fs::metadata(&path).map_err(|source| PublishError::Unreadable {
            path: path.clone(),
            source,
        })?;
        level.push(LevelEntry {
            name,
            path,
            is_dir: metadata.is_dir(),
            mode: metadata.permissions().mode() & 0o7777,
        });
    }
    Ok(level)
}

/// Record a directory as staged; false means it was staged before.
fn mark_visited(dir: &Path, visited: &mut HashSet<PathBuf>) -> Result<bool, PublishError> {
    let resolved = fs::canonicalize(dir).map_err(|source| PublishError::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(visited.insert(resolved))
}

fn claim(claimed: &mut HashSet<String>, name: &str) -> Result<(), PublishError> {
    if !claimed.insert(name.to_owned()) {
        return Err(PublishError::StagingConflict(name.to_owned()));
    }
    Ok(())
}

fn pack_entries(entries: &[StagedEntry]) -> Result<Vec<u8>, PublishError> {
    let mut builder = tar::Builder::new(Vec::new());
    for entry in entries {
        match &entry.kind {
            EntryKind::Dir => {
                let mut header = base_header(entry.mode, 0);
                header.set_entry_type(tar::EntryType::Directory);
                let name = format!("{}/", entry.archive_path.display());
                builder.append_data(&mut header, name, std::io::empty())?;
            }
            EntryKind::File { source } => {
                let data = fs::read(source).map_err(|source_err| PublishError::Unreadable {
                    path: source.clone(),
                    source: source_err,
                })?;
                let mut header = base_header(entry.mode, data.len() as u64);
                header.set_entry_type(tar::EntryType::Regular);
                builder.append_data(&mut header, &entry.archive_path, data.as_slice())?;
            }
        }
    }
    Ok(builder.into_inner()?)
}

fn base_header(mode: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(mode);
    header.set_size(size);
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use knapsack_schema::BuildId;
    use std::os::unix::fs::symlink;

    fn spec(code_paths: Vec<PathBuf>, exclude: &[&str]) -> PublishSpec {
        PublishSpec {
            cache_key: BuildId::new("test-key"),
            code_paths,
            exclude: ExcludeSet::new(exclude),
        }
    }

    /// `app/main.py` plus a `vendor` library next to it.
    fn sample_sources() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        let vendor = dir.path().join("vendor");
        fs::create_dir_all(&app).unwrap();
        fs::create_dir_all(&vendor).unwrap();
        fs::write(app.join("main.py"), "def handler(event): pass\n").unwrap();
        fs::write(vendor.join("util.py"), "x = 1\n").unwrap();
        (dir, app, vendor)
    }

    fn archive_names(artifact: &PackagedArtifact) -> Vec<String> {
        let mut archive = tar::Archive::new(artifact.archive.as_slice());
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let entry = e.unwrap();
                String::from_utf8_lossy(&entry.header().path_bytes()).into_owned()
            })
            .collect()
    }

    fn archive_file(artifact: &PackagedArtifact, name: &str) -> Vec<u8> {
        use std::io::Read;
        let mut archive = tar::Archive::new(artifact.archive.as_slice());
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if String::from_utf8_lossy(&entry.header().path_bytes()) == name {
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                return data;
            }
        }
        panic!("no entry named {name}");
    }

    #[test]
    fn entrypoint_at_root_and_library_as_subdir() {
        let (_dir, app, vendor) = sample_sources();
        let artifact = LocalBackend::new()
            .publish(&spec(vec![app, vendor], &[]))
            .unwrap();
        assert_eq!(
            archive_names(&artifact),
            vec!["main.py".to_owned(), "vendor/".to_owned(), "vendor/util.py".to_owned()]
        );
        assert_eq!(artifact.entry_count, 3);
        assert_eq!(archive_file(&artifact, "vendor/util.py"), b"x = 1\n");
    }

    #[test]
    fn publish_is_deterministic() {
        let (_dir, app, vendor) = sample_sources();
        let backend = LocalBackend::new();
        let request = spec(vec![app, vendor], &[]);
        let first = backend.publish(&request).unwrap();
        let second = backend.publish(&request).unwrap();
        assert_eq!(first.archive, second.archive);
    }

    #[test]
    fn excluded_names_are_not_packaged() {
        let (_dir, app, vendor) = sample_sources();
        fs::write(app.join("main.pyc"), b"\x00bytecode").unwrap();
        fs::create_dir(app.join("__pycache__")).unwrap();
        fs::write(app.join("__pycache__/junk.bin"), "junk").unwrap();

        let artifact = LocalBackend::new()
            .publish(&spec(vec![app, vendor], &["*.pyc", "__pycache__"]))
            .unwrap();
        let names = archive_names(&artifact);
        assert!(names.iter().all(|n| !n.contains("pyc")));
        assert!(names.contains(&"main.py".to_owned()));
    }

    #[test]
    fn nested_directories_keep_structure() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir_all(app.join("pkg/inner")).unwrap();
        fs::write(app.join("main.py"), "m\n").unwrap();
        fs::write(app.join("pkg/inner/deep.py"), "d\n").unwrap();

        let artifact = LocalBackend::new().publish(&spec(vec![app], &[])).unwrap();
        assert_eq!(
            archive_names(&artifact),
            vec![
                "main.py".to_owned(),
                "pkg/".to_owned(),
                "pkg/inner/".to_owned(),
                "pkg/inner/deep.py".to_owned(),
            ]
        );
    }

    #[test]
    fn colliding_top_level_names_conflict() {
        let (_dir, app, _vendor) = sample_sources();
        // The entrypoint tree already has a top-level "vendor" entry.
        fs::create_dir(app.join("vendor")).unwrap();
        let other = app.join("vendor");
        let err = LocalBackend::new()
            .publish(&spec(vec![app.clone(), other], &[]))
            .unwrap_err();
        assert!(matches!(err, PublishError::StagingConflict(name) if name == "vendor"));
    }

    #[test]
    fn two_libraries_with_same_basename_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir(&app).unwrap();
        fs::write(app.join("main.py"), "m\n").unwrap();
        let a = dir.path().join("a/vendor");
        let b = dir.path().join("b/vendor");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();

        let err = LocalBackend::new()
            .publish(&spec(vec![app, a, b], &[]))
            .unwrap_err();
        assert!(matches!(err, PublishError::StagingConflict(_)));
    }

    #[test]
    fn missing_entrypoint_source_fails() {
        let err = LocalBackend::new()
            .publish(&spec(vec![PathBuf::from("/nonexistent/app")], &[]))
            .unwrap_err();
        assert!(matches!(err, PublishError::MissingSource { .. }));
    }

    #[test]
    fn missing_library_source_fails() {
        let (_dir, app, _vendor) = sample_sources();
        let missing = app.join("no_such_dir");
        let err = LocalBackend::new()
            .publish(&spec(vec![app, missing.clone()], &[]))
            .unwrap_err();
        assert!(matches!(err, PublishError::MissingSource { path } if path == missing));
    }

    #[test]
    fn symlinked_file_is_stored_as_regular_content() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir(&app).unwrap();
        let target = dir.path().join("real.txt");
        fs::write(&target, "linked content\n").unwrap();
        symlink(&target, app.join("alias.py")).unwrap();

        let artifact = LocalBackend::new().publish(&spec(vec![app], &[])).unwrap();
        assert_eq!(archive_file(&artifact, "alias.py"), b"linked content\n");
    }

    #[test]
    fn dangling_symlink_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir(&app).unwrap();
        symlink(dir.path().join("gone"), app.join("broken.py")).unwrap();

        let err = LocalBackend::new().publish(&spec(vec![app], &[])).unwrap_err();
        assert!(matches!(err, PublishError::Unreadable { .. }));
    }

    #[test]
    fn symlink_directory_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        let sub = app.join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(app.join("main.py"), "m\n").unwrap();
        symlink(&app, sub.join("loop")).unwrap();

        let artifact = LocalBackend::new().publish(&spec(vec![app], &[])).unwrap();
        let names = archive_names(&artifact);
        assert!(names.contains(&"sub/loop/".to_owned()));
        assert!(!names.contains(&"sub/loop/main.py".to_owned()));
    }

    #[test]
    fn empty_code_paths_pack_an_empty_archive() {
        let artifact = LocalBackend::new().publish(&spec(Vec::new(), &[])).unwrap();
        assert_eq!(artifact.entry_count, 0);
        assert!(archive_names(&artifact).is_empty());
    }
}
