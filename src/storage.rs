use std::{
    io::Write,
    path::{Path, PathBuf},
};

/// Write `data` to a uniquely named sibling of `path`, then rename it over
/// `path`. Readers see the old file or the new file, never a partial one.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    write_atomic_with(path, |file| file.write_all(data))
}

/// Like [`write_atomic`], but lets the caller stream into the temp file.
/// On any error the temp file is removed and `path` is left untouched.
pub fn write_atomic_with<F>(path: &Path, fill: F) -> std::io::Result<()>
where
    F: FnOnce(&mut std::fs::File) -> std::io::Result<()>,
{
    let temp_path = temp_sibling(path);

    let result = (|| {
        let mut file = std::fs::File::create(&temp_path)?;
        fill(&mut file)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }

    result
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    dir.join(format!(
        ".{}-{file_name}",
        rusty_ulid::generate_ulid_string()
    ))
}
