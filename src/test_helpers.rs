//! Shared unit-test fixtures.

use camino::Utf8PathBuf;
use tempfile::TempDir;

use crate::workdir::WorkDir;

/// Opens a work directory inside a fresh temporary directory.
///
/// The [`TempDir`] must outlive the returned [`WorkDir`].
pub fn temp_workdir() -> (TempDir, WorkDir) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
    let workdir = WorkDir::open(root).unwrap_or_else(|err| panic!("open workdir: {err}"));
    (tmp, workdir)
}
