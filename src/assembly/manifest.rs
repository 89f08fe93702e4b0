//! Concat demuxer manifest
//!
//! One `file '<path>'` line per input. Inside the single-quoted path, backslashes
//! are doubled and every `'` becomes `'\''` (close quote, escaped quote, reopen).

use std::path::{Path, PathBuf};

/// Escape a path for use inside a quoted manifest entry
pub fn escape_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace('\'', "'\\''")
}

/// Manifest text for `files`, made absolute against the current directory
pub fn render(files: &[PathBuf]) -> String {
    let mut out = String::new();
    for file in files {
        let absolute = std::path::absolute(file).unwrap_or_else(|_| file.clone());
        out.push_str("file '");
        out.push_str(&escape_path(&absolute));
        out.push_str("'\n");
    }
    out
}

/// Write the manifest for `files` to `path`
pub async fn write(path: &Path, files: &[PathBuf]) -> std::io::Result<()> {
    tokio::fs::write(path, render(files)).await
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path() {
        assert_eq!(
            render(&[PathBuf::from("/tmp/norm_0001_a.mp4")]),
            "file '/tmp/norm_0001_a.mp4'\n"
        );
    }

    #[test]
    fn quotes_and_backslashes_are_escaped() {
        assert_eq!(
            escape_path(Path::new("/videos/it's here.mp4")),
            r"/videos/it'\''s here.mp4"
        );
        assert_eq!(escape_path(Path::new(r"C:\clips\a.mp4")), r"C:\\clips\\a.mp4");
    }

    #[test]
    fn relative_paths_become_absolute() {
        let text = render(&[PathBuf::from("temp/a.mp4")]);
        let cwd = std::env::current_dir().unwrap();
        let expected = format!("file '{}'\n", escape_path(&cwd.join("temp/a.mp4")));
        assert_eq!(text, expected);
    }

    #[test]
    fn one_line_per_file_in_order() {
        let text = render(&[PathBuf::from("/a.mp4"), PathBuf::from("/b.mp4")]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["file '/a.mp4'", "file '/b.mp4'"]);
    }

    #[tokio::test]
    async fn write_creates_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("list.txt");
        write(&path, &[PathBuf::from("/a.mp4")]).await.unwrap();
        assert_eq!(
            tokio::fs::read_to_string(&path).await.unwrap(),
            "file '/a.mp4'\n"
        );
    }
}
