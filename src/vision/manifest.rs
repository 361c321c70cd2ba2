//! Image listings for batch inference.
use crate::error::{BdcnError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Extensions processed by default, matched case-insensitively.
pub const DEFAULT_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Name of the manifest written in the input directory.
pub const DEFAULT_LIST_NAME: &str = "data.lst";

fn has_extension(file_name: &str, extension: &str) -> bool {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.eq_ignore_ascii_case(extension),
        None => false,
    }
}

/// Lists the files of `dir` with one of `extensions` and writes them to
/// `dir/list_name`, one `name name` line per file.
///
/// Files are grouped by extension in the order of `extensions`, and sorted by name
/// within a group. Returns the listed file names in manifest order.
pub fn create_data_list<T: AsRef<Path>>(
    dir: T,
    list_name: &str,
    extensions: &[&str],
) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    if extensions.is_empty() {
        return Err(BdcnError::Config("supported extensions must be set".to_string()));
    }
    if !dir.is_dir() {
        return Err(BdcnError::Config(format!("input directory {} does not exist", dir.display())));
    }
    let mut entries = vec![];
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string())
            }
        }
    }
    entries.sort();
    let mut files = vec![];
    for extension in extensions {
        files.extend(entries.iter().filter(|n| has_extension(n, extension)).cloned());
    }
    let mut out = BufWriter::new(File::create(dir.join(list_name))?);
    for f in files.iter() {
        writeln!(out, "{f} {f}")?;
    }
    out.flush()?;
    Ok(files)
}
