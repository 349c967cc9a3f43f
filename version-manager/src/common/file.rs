use crate::{
    common::error::{Result, SerializeValues, TempFileCreation, WriteToTempFile, WritingFile},
    model::Values,
};
use snafu::ResultExt;
use std::{io::Write, path::Path};
use tempfile::{Builder, NamedTempFile as TempFile};

/// Writes the values of a release to a new 'values-*.json' file, inside values_dir if one is
/// provided. The file is removed when the returned handle is dropped.
pub(crate) fn write_values_file(
    values_dir: Option<&Path>,
    values: &Values,
    namespace: &str,
    name: &str,
) -> Result<TempFile> {
    let buf = serde_json::to_vec(values).context(SerializeValues { namespace, name })?;

    let mut builder = Builder::new();
    builder.prefix("values-").suffix(".json");
    let mut handle = match values_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .context(TempFileCreation)?;

    handle
        .write_all(buf.as_slice())
        .and_then(|()| handle.flush())
        .context(WriteToTempFile {
            filepath: handle.path().to_path_buf(),
        })?;

    Ok(handle)
}

/// Replaces the file at path with content. The content goes to a temporary file in the same
/// directory first, which is then renamed over path, so readers see either the previous file
/// or the complete new one.
pub(crate) fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut handle = TempFile::new_in(dir).context(TempFileCreation)?;

    handle
        .write_all(content)
        .and_then(|()| handle.as_file().sync_all())
        .context(WriteToTempFile {
            filepath: handle.path().to_path_buf(),
        })?;

    handle
        .persist(path)
        .map_err(|error| error.error)
        .context(WritingFile { filepath: path })?;
    Ok(())
}
