use glob::glob;
use std::fs;
use std::io;
use std::io::Write;
use std::path;

/// Free functions over the `checkpoints/` directory: append-only per-node
/// logs, final checkpoint assembly, and globbing for the latest one.
pub struct FileHelper {}

impl FileHelper {
    /// Writes the content to a file (creates it, and any parent directories,
    /// if they don't exist; overwrites if it does).
    pub fn write_to_file(file_path: &str, content: &str) -> Result<(), io::Error> {
        log::debug!("creating new file: {}", file_path);
        if let Some(parent) = path::Path::new(file_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::File::create(file_path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Appends the content to a file and adds a newline afterwards (creates
    /// the file and its parent directories if they don't exist).
    pub fn append_to_file_ln(file_path: &str, content: &str) -> Result<(), io::Error> {
        log::debug!("appending to file: {}", file_path);
        if let Some(parent) = path::Path::new(file_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(file_path)?;
        file.write_all(content.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Returns paths matching `pattern`, sorted lexicographically (checkpoint
    /// ids are timestamps, so this is also chronological order).
    pub fn glob_sorted(pattern: &str) -> Result<Vec<path::PathBuf>, io::Error> {
        let mut matches: Vec<path::PathBuf> = glob(pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
            .filter_map(Result::ok)
            .collect();
        matches.sort();
        Ok(matches)
    }

    /// Reads the content of a file and returns a String.
    pub fn read_file_to_string(file_path: &str) -> Result<String, io::Error> {
        fs::read_to_string(file_path)
    }

    /// Returns true if the file exists.
    pub fn file_exists(file_path: &str) -> bool {
        path::Path::new(file_path).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("mc_utils_fh_test_{}", std::process::id()));
        let path = dir.join("node_checkpoints.log");
        let path_str = path.to_str().unwrap();
        let _ = fs::remove_file(&path);
        FileHelper::append_to_file_ln(path_str, "first").unwrap();
        FileHelper::append_to_file_ln(path_str, "second").unwrap();
        let contents = FileHelper::read_file_to_string(path_str).unwrap();
        assert_eq!(contents, "first\nsecond\n");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn glob_sorted_orders_matches() {
        let dir = std::env::temp_dir().join(format!("mc_utils_glob_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        FileHelper::write_to_file(dir.join("final_checkpoint_2.log").to_str().unwrap(), "b").unwrap();
        FileHelper::write_to_file(dir.join("final_checkpoint_1.log").to_str().unwrap(), "a").unwrap();
        let pattern = dir.join("final_checkpoint_*.log");
        let matches = FileHelper::glob_sorted(pattern.to_str().unwrap()).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].to_str().unwrap().ends_with("final_checkpoint_1.log"));
        fs::remove_dir_all(&dir).unwrap();
    }
}
