// src/util.rs
use std::fs;
use std::io;
use std::path::Path;
use uuid::Uuid;

/// Reads a secret mounted as a file, dropping one trailing newline.
pub fn read_secret_file(path: impl AsRef<Path>) -> io::Result<String> {
    let data = fs::read_to_string(path)?;
    Ok(data.strip_suffix('\n').unwrap_or(&data).to_string())
}

/// A v4 UUID cut down to its first `parts` dash-separated groups.
/// `0`, or more groups than a UUID has, returns the full UUID.
pub fn generate_guid(parts: usize) -> String {
    let guid = Uuid::new_v4().to_string();
    let groups: Vec<&str> = guid.split('-').collect();

    if parts == 0 || parts > groups.len() {
        return guid;
    }
    groups[..parts].join("-")
}

pub fn last_part_after_slash(input: &str) -> &str {
    match input.rfind('/') {
        Some(idx) => &input[idx + 1..],
        None => input,
    }
}
