/// Render one file's patch as a labelled fenced block.
pub fn format_file_diff(filename: &str, patch: &str) -> String {
    format!("\n### {filename}\n```diff\n{patch}\n```\n")
}

/// Pack file diffs, in order, into chunks of at most `max_chars` characters.
///
/// A block that would overflow a non-empty chunk starts the next one. A single block
/// larger than the budget is never split and becomes a chunk of its own.
pub fn chunk_diffs<'a, I>(files: I, max_chars: usize) -> Vec<String>
where I: IntoIterator<Item = (&'a str, &'a str)> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for (filename, patch) in files {
        let block = format_file_diff(filename, patch);
        let block_len = block.chars().count();
        if current_len + block_len > max_chars && current_len > 0 {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(&block);
        current_len += block_len;
    }
    if current_len > 0 {
        chunks.push(current);
    }
    chunks
}
