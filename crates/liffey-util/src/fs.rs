use std::fs;
use std::io;
use std::path::Path;

/// Read a file to string, replacing invalid UTF-8 sequences with the replacement character.
///
/// Module sources occasionally carry stray bytes (vendored minified files,
/// BOM-less legacy encodings); serving a lossy string beats failing the request.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
