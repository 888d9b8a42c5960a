use specsmith_model::CodeBlock;

const FENCE: &str = "```";

#[derive(Debug)]
struct OpenBlock {
    language: String,
    lines: Vec<String>,
}

/// Incremental fenced code block finder.
///
/// Feed it arbitrary chunks of a streamed response; it works line by line,
/// so the blocks it reports do not depend on where the chunk boundaries fall.
/// A block opens on a line starting with three backticks (the rest of the line
/// is the language tag) and closes on a line holding only three backticks.
#[derive(Debug, Default)]
pub struct CodeBlockScanner {
    pending: String,
    open: Option<OpenBlock>,
    found: usize,
}

impl CodeBlockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks emitted so far
    #[must_use]
    pub fn found(&self) -> usize {
        self.found
    }

    /// Consume a chunk, returning the blocks it completed
    pub fn feed(&mut self, chunk: &str) -> Vec<CodeBlock> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            if let Some(block) = self.process_line(line.trim_end_matches(['\n', '\r'])) {
                out.push(block);
            }
        }
        out
    }

    /// Flush the trailing partial line. A block still open at the end of the
    /// stream is emitted as-is, since truncated output usually still holds
    /// the bulk of the code.
    pub fn finish(&mut self) -> Vec<CodeBlock> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        if !rest.is_empty()
            && let Some(block) = self.process_line(rest.trim_end_matches('\r'))
        {
            out.push(block);
        }
        if let Some(open) = self.open.take() {
            tracing::debug!(language = %open.language, "emitting unterminated code block");
            out.push(self.close(open));
        }
        out
    }

    fn process_line(&mut self, line: &str) -> Option<CodeBlock> {
        let trimmed = line.trim();
        match self.open.as_mut() {
            None => {
                if let Some(info) = trimmed.strip_prefix(FENCE) {
                    let language = info
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .trim_matches('`')
                        .to_lowercase();
                    self.open = Some(OpenBlock {
                        language,
                        lines: Vec::new(),
                    });
                }
                None
            }
            Some(block) => {
                if trimmed == FENCE {
                    let block = self.open.take()?;
                    Some(self.close(block))
                } else {
                    block.lines.push(line.to_string());
                    None
                }
            }
        }
    }

    fn close(&mut self, block: OpenBlock) -> CodeBlock {
        self.found += 1;
        CodeBlock {
            language: block.language,
            code: block.lines.join("\n"),
        }
    }
}

/// All fenced code blocks of a complete response, in order
#[must_use]
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut scanner = CodeBlockScanner::new();
    let mut blocks = scanner.feed(text);
    blocks.extend(scanner.finish());
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RESPONSE: &str = "Here is the model:\n\n```rust\npub struct Task {\n    pub title: String,\n}\n```\n\nAnd a test:\n\n```\nassert!(true);\n```\n";

    #[test]
    fn test_extracts_blocks_in_order() {
        let blocks = extract_code_blocks(RESPONSE);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language, "rust");
        assert_eq!(blocks[0].code, "pub struct Task {\n    pub title: String,\n}");
        assert_eq!(blocks[1].language, "");
        assert_eq!(blocks[1].code, "assert!(true);");
    }

    #[test]
    fn test_block_reported_when_closing_fence_arrives() {
        let mut scanner = CodeBlockScanner::new();
        assert!(scanner.feed("```py").is_empty());
        assert!(scanner.feed("thon\nprint('hi')\n``").is_empty());
        let blocks = scanner.feed("`\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, "python");
        assert_eq!(scanner.found(), 1);
    }

    #[test]
    fn test_unterminated_block_flushed_on_finish() {
        let mut scanner = CodeBlockScanner::new();
        assert!(scanner.feed("```rust\nfn main() {}\nfn other()").is_empty());
        let blocks = scanner.finish();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, "fn main() {}\nfn other()");
    }

    #[test]
    fn test_no_fences() {
        assert!(extract_code_blocks("just prose, no code").is_empty());
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_blocks(cuts in proptest::collection::vec(0usize..RESPONSE.len(), 0..8)) {
            let mut cuts = cuts;
            cuts.sort_unstable();
            cuts.dedup();

            let mut scanner = CodeBlockScanner::new();
            let mut blocks = Vec::new();
            let mut start = 0;
            for cut in cuts.into_iter().chain(std::iter::once(RESPONSE.len())) {
                blocks.extend(scanner.feed(&RESPONSE[start..cut]));
                start = cut;
            }
            blocks.extend(scanner.finish());

            prop_assert_eq!(blocks, extract_code_blocks(RESPONSE));
        }
    }
}
