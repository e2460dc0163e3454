//! File reconstruction from chunks.

use crate::types::{Chunk, ChunkType, FileData};

/// Reassemble `file_data` with `chunk_id`'s code replaced by `replacement`.
///
/// If the original chunk ended in a newline and the replacement does not, one
/// is appended so the following chunk still starts on its own line.
pub fn stitch_file(file_data: &FileData, chunk_id: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(file_data.full_code.len() + replacement.len());
    for chunk in &file_data.chunks {
        if chunk.chunk_id == chunk_id {
            out.push_str(replacement);
            if chunk.original_code.ends_with('\n') && !replacement.ends_with('\n') {
                out.push('\n');
            }
        } else {
            out.push_str(&chunk.original_code);
        }
    }
    out
}

/// Class context shown alongside a method: the class header followed by
/// every chunk belonging to that class, in file order.
pub fn class_context(chunk: &Chunk, file_data: &FileData) -> Option<String> {
    if chunk.chunk_type != ChunkType::Method {
        return None;
    }
    let class = chunk.context.parent_class.as_deref()?;

    let mut ctx = chunk.context.class_header.clone().unwrap_or_default();
    for member in file_data
        .chunks
        .iter()
        .filter(|c| c.context.parent_class.as_deref() == Some(class))
    {
        ctx.push_str(&member.original_code);
    }
    Some(ctx)
}
