//! Identifier generation for tasks and views.
//!
//! Ids are ten lowercase ascii letters. A task id doubles as its file path:
//! the first two letters name the directory, the remaining eight the file.

use uuid::Uuid;

/// Length of every generated id.
pub const ID_LEN: usize = 10;

/// Length of the directory part of a task path.
pub const DIR_LEN: usize = 2;

const ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Generate a new random id.
pub fn generate_id() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    bytes
        .iter()
        .take(ID_LEN)
        .map(|byte| ALPHABET[(*byte as usize) % ALPHABET.len()] as char)
        .collect()
}

/// Generate an id for which `taken` returns false.
pub fn generate_unique_id(taken: impl Fn(&str) -> bool) -> String {
    loop {
        let id = generate_id();
        if !taken(&id) {
            return id;
        }
        tracing::debug!(id = %id, "generated id already in use, retrying");
    }
}

/// Whether `raw` has the shape of a generated id.
pub fn is_valid_id(raw: &str) -> bool {
    raw.len() == ID_LEN && raw.bytes().all(|b| b.is_ascii_lowercase())
}

/// Split a task id into its directory and file name.
pub fn split_task_id(id: &str) -> Option<(&str, &str)> {
    if id.len() <= DIR_LEN || !id.is_char_boundary(DIR_LEN) {
        return None;
    }
    Some(id.split_at(DIR_LEN))
}
