// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! File-transfer content handling.
//!
//! Each node keeps its transferable files under `content/<node_id>/`.
//! File bodies travel Base64-encoded; the encoding is an application
//! choice layered on top of RTP, which itself carries arbitrary bytes.

use crate::{Error, NodeId, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};

/// Content directory of one node under `root`.
#[must_use]
pub fn content_dir(root: &Path, node_id: NodeId) -> PathBuf {
    root.join(node_id.to_string())
}

/// Create the node's content directory if it is missing.
pub fn ensure_content_dir(root: &Path, node_id: NodeId) -> Result<PathBuf> {
    let dir = content_dir(root, node_id);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Read a named file and return its Base64-encoded bytes.
///
/// # Errors
/// [`Error::FileNotFound`] when the name is unsafe or the file is
/// missing/unreadable.
pub fn load_encoded(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let name = safe_name(name)?;
    let bytes =
        fs::read(dir.join(name)).map_err(|_| Error::FileNotFound(name.to_string()))?;
    Ok(BASE64.encode(bytes).into_bytes())
}

/// Decode Base64 content and write it under the node's content dir.
///
/// Returns the decoded size in bytes.
pub fn store_decoded(dir: &Path, name: &str, encoded: &[u8]) -> Result<usize> {
    let name = safe_name(name)?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|err| Error::InvalidArgument(format!("content not valid base64: {}", err)))?;
    fs::write(dir.join(name), &bytes)?;
    Ok(bytes.len())
}

/// Bare file names only; anything that could walk the tree is rejected.
fn safe_name(name: &str) -> Result<&str> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
        return Err(Error::FileNotFound(name.to_string()));
    }
    Ok(name)
}
