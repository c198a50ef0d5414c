//! Filtered directory mirroring.
//!
//! Walks are depth-first and sorted by file name. The filter sees every entry
//! before the walk descends, so children of an excluded directory are never
//! listed.
//!
//! The copy is not transactional: on error a partial tree is left at the
//! destination. Callers that need all-or-nothing semantics stage into a fresh
//! temporary directory and rename it into place.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};
use walkdir::{DirEntry, WalkDir};

use crate::core::filter::{EntryKind, PathFilter};
use crate::error::PipelineError;

/// Counts of what a synchronization copied and skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub files_copied: usize,
    pub dirs_created: usize,
    pub entries_skipped: usize,
}

/// Mirror `src` into `dest`, skipping whatever `filter` excludes.
#[instrument(skip_all, fields(src = %src.display(), dest = %dest.display()))]
pub fn sync(src: &Path, dest: &Path, filter: &PathFilter) -> Result<SyncStats, PipelineError> {
    if !src.exists() {
        return Err(PipelineError::Io(format!("{} does not exist", src.display())));
    }
    if !src.is_dir() {
        return Err(PipelineError::Io(format!(
            "{} must be a directory",
            src.display()
        )));
    }

    let mut stats = SyncStats::default();
    if !dest.exists() {
        create_dir(dest)?;
        stats.dirs_created += 1;
    }

    let mut skipped = 0;
    for entry in walk_filtered(src, filter, &mut skipped) {
        let (path, kind) = entry?;
        let relative = path
            .strip_prefix(src)
            .map_err(|_| PipelineError::Io(format!("{} escaped the walk", path.display())))?;
        let target = dest.join(relative);
        match kind {
            EntryKind::Dir => {
                if !target.exists() {
                    create_dir(&target)?;
                    stats.dirs_created += 1;
                }
            }
            EntryKind::File => {
                fs::copy(&path, &target).map_err(|err| {
                    PipelineError::Io(format!(
                        "copy {} to {}: {err}",
                        path.display(),
                        target.display()
                    ))
                })?;
                stats.files_copied += 1;
            }
        }
    }
    stats.entries_skipped = skipped;
    debug!(?stats, "synchronized tree");
    Ok(stats)
}

/// Depth-first walk below `root` (the root itself is not yielded), sorted by
/// file name. Entries the filter excludes are counted in `skipped` and, for
/// directories, never descended into. Symlinks are followed and classified
/// by their target.
pub(crate) fn walk_filtered<'a>(
    root: &Path,
    filter: &'a PathFilter,
    skipped: &'a mut usize,
) -> impl Iterator<Item = Result<(PathBuf, EntryKind), PipelineError>> + 'a {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter()
        .filter_entry(move |entry| {
            let kind = entry_kind(entry);
            let excluded = filter.is_excluded(&entry.path().to_string_lossy(), kind);
            if excluded {
                trace!(path = %entry.path().display(), %kind, "skipped");
                *skipped += 1;
            }
            !excluded
        })
        .map(|entry| {
            let entry = entry.map_err(|err| PipelineError::Io(format!("walk: {err}")))?;
            let kind = entry_kind(&entry);
            Ok((entry.into_path(), kind))
        })
}

fn entry_kind(entry: &DirEntry) -> EntryKind {
    if entry.file_type().is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    }
}

#[cfg(unix)]
fn create_dir(path: &Path) -> Result<(), PipelineError> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(|err| PipelineError::Io(format!("create {}: {err}", path.display())))
}

#[cfg(not(unix))]
fn create_dir(path: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(path)
        .map_err(|err| PipelineError::Io(format!("create {}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::RuleSpec;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn excluded_directory_contents_never_reach_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src");
        write(&src.join("lib/a.js"), "a");
        write(&src.join("tests/sentinel.js"), "s");
        write(&src.join("tests/deep/more.js"), "m");

        let filter = PathFilter::compile(&[RuleSpec::typed(r"/tests$", "dir", false)], false)
            .expect("filter");
        let dest = temp.path().join("out/nested");
        let stats = sync(&src, &dest, &filter).expect("sync");

        assert!(dest.join("lib/a.js").exists());
        assert!(!dest.join("tests").exists());
        assert!(!dest.join("tests/sentinel.js").exists());
        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.entries_skipped, 1);
    }

    #[cfg(unix)]
    #[test]
    fn excluded_directory_is_never_listed() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src");
        write(&src.join("keep.js"), "k");
        write(&src.join("locked/secret.js"), "s");
        // An unreadable directory would fail the walk if it were ever listed.
        fs::set_permissions(src.join("locked"), fs::Permissions::from_mode(0o000))
            .expect("chmod");

        let filter = PathFilter::compile(&[RuleSpec::exclude("locked")], false).expect("filter");
        let result = sync(&src, &temp.path().join("dest"), &filter);

        fs::set_permissions(src.join("locked"), fs::Permissions::from_mode(0o755))
            .expect("restore");
        result.expect("sync");
        assert!(temp.path().join("dest/keep.js").exists());
    }

    #[test]
    fn default_exclude_keeps_only_included_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src");
        write(&src.join("a.js"), "a");
        write(&src.join("a.css"), "c");
        write(&src.join("sub/b.json"), "{}");

        let filter = PathFilter::compile(
            &[
                RuleSpec::include(r"\.js$"),
                RuleSpec::include(r"\.json$"),
                RuleSpec::typed(".*", "dir", true),
            ],
            true,
        )
        .expect("filter");
        let dest = temp.path().join("dest");
        sync(&src, &dest, &filter).expect("sync");

        assert_eq!(fs::read_to_string(dest.join("a.js")).expect("read"), "a");
        assert!(dest.join("sub/b.json").exists());
        assert!(!dest.join("a.css").exists());
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let filter = PathFilter::compile(&[RuleSpec::exclude("x")], false).expect("filter");
        let err = sync(&temp.path().join("nope"), &temp.path().join("d"), &filter).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn file_source_is_an_io_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp.path().join("f.txt"), "x");
        let filter = PathFilter::compile(&[RuleSpec::exclude("x")], false).expect("filter");
        let err = sync(&temp.path().join("f.txt"), &temp.path().join("d"), &filter).unwrap_err();
        assert!(err.to_string().contains("must be a directory"));
    }
}
