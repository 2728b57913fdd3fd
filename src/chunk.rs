//! Overlapping text chunker with a prose and a code strategy.
//!
//! Prose cuts at paragraph boundaries first, sentence boundaries second.
//! Code prefers tree-sitter symbol boundaries (functions, types, classes)
//! and falls back to line boundaries when no grammar applies. Both
//! strategies fall back to a hard split at the target size when no cut
//! point lands inside the window.
//!
//! Every chunk is a verbatim slice of the input and records its byte span
//! plus the start of its unique (non-overlapping) region, so concatenating
//! the unique regions reconstructs the input exactly.

use tree_sitter::{Language as TsLanguage, Parser as TsParser};

use crate::error::{RelayError, RelayResult};

/// Which splitting strategy to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Prose,
    Code,
}

impl ContentKind {
    pub fn parse(value: &str) -> RelayResult<Self> {
        match value {
            "prose" => Ok(Self::Prose),
            "code" => Ok(Self::Code),
            other => Err(RelayError::validation(format!(
                "unknown content kind '{other}' (expected 'prose' or 'code')"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prose => "prose",
            Self::Code => "code",
        }
    }
}

/// Languages the code strategy can parse for symbol boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLanguage {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
}

impl CodeLanguage {
    pub fn from_extension(path: &str) -> Option<Self> {
        let ext = std::path::Path::new(path)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());

        match ext.as_deref() {
            Some("rs") => Some(Self::Rust),
            Some("ts") => Some(Self::TypeScript),
            Some("tsx") => Some(Self::Tsx),
            Some("js" | "jsx") => Some(Self::JavaScript),
            Some("py") => Some(Self::Python),
            _ => None,
        }
    }

    fn grammar(self) -> TsLanguage {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    fn symbol_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "function_item",
                "impl_item",
                "struct_item",
                "enum_item",
                "trait_item",
                "mod_item",
            ],
            Self::TypeScript | Self::Tsx | Self::JavaScript => &[
                "function_declaration",
                "method_definition",
                "class_declaration",
                "arrow_function",
            ],
            Self::Python => &["function_definition", "class_definition"],
        }
    }
}

/// Maximum overlap as a fraction of the target size (1/5 = 20%).
const MAX_OVERLAP_DIVISOR: usize = 5;

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub target_chars: usize,
    pub overlap_chars: usize,
    /// Grammar for the code strategy; `None` falls back to line boundaries.
    pub language: Option<CodeLanguage>,
}

impl ChunkConfig {
    pub fn prose() -> Self {
        Self {
            target_chars: 1000,
            overlap_chars: 200,
            language: None,
        }
    }

    pub fn code(language: Option<CodeLanguage>) -> Self {
        Self {
            target_chars: 800,
            overlap_chars: 100,
            language,
        }
    }

    pub fn for_kind(kind: ContentKind, language: Option<CodeLanguage>) -> Self {
        match kind {
            ContentKind::Prose => Self::prose(),
            ContentKind::Code => Self::code(language),
        }
    }

    fn effective_overlap(&self) -> usize {
        self.overlap_chars
            .min(self.target_chars / MAX_OVERLAP_DIVISOR)
    }
}

/// One chunk: a verbatim slice of the input with its byte span.
///
/// `unique_start` marks where this chunk stops repeating the previous
/// chunk's tail; `text[unique_start..end]` regions concatenate back to the
/// original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub unique_start: usize,
}

impl ChunkSpan {
    /// The non-overlapping portion of this chunk.
    pub fn unique_text(&self) -> &str {
        &self.text[self.unique_start - self.start..]
    }

    /// Overlap carried over from the previous chunk, in bytes.
    pub fn overlap_len(&self) -> usize {
        self.unique_start - self.start
    }
}

/// Split `text` into overlapping chunks using the strategy for `kind`.
///
/// Empty input yields an empty sequence; input no larger than one chunk
/// yields a single chunk with no padding.
pub fn chunk(text: &str, kind: ContentKind, config: &ChunkConfig) -> Vec<ChunkSpan> {
    if text.is_empty() {
        return Vec::new();
    }

    let (primary, secondary) = match kind {
        ContentKind::Prose => (paragraph_cuts(text), sentence_cuts(text)),
        ContentKind::Code => {
            let symbols = config
                .language
                .and_then(|lang| symbol_cuts(text, lang))
                .unwrap_or_default();
            (symbols, line_cuts(text))
        }
    };

    split_windows(text, &primary, &secondary, config)
}

/// Greedy window walk shared by both strategies.
fn split_windows(
    text: &str,
    primary: &[usize],
    secondary: &[usize],
    config: &ChunkConfig,
) -> Vec<ChunkSpan> {
    let len = text.len();
    let target = config.target_chars.max(1);
    let overlap = config.effective_overlap();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;

    loop {
        let ideal = snap_to_char_boundary(text, start.saturating_add(target).min(len));
        let end = if ideal >= len {
            len
        } else {
            pick_cut(primary, prev_end, ideal)
                .or_else(|| pick_cut(secondary, prev_end, ideal))
                .unwrap_or(ideal)
        };
        let end = ensure_progress(text, end, prev_end);

        chunks.push(ChunkSpan {
            text: text[start..end].to_string(),
            start,
            end,
            unique_start: prev_end,
        });

        if end >= len {
            break;
        }

        prev_end = end;
        start = snap_to_char_boundary(text, end.saturating_sub(overlap));
    }

    chunks
}

/// Largest cut point past `min_exclusive` and at most `max_inclusive`.
fn pick_cut(cuts: &[usize], min_exclusive: usize, max_inclusive: usize) -> Option<usize> {
    cuts.iter()
        .rev()
        .copied()
        .find(|&c| c > min_exclusive && c <= max_inclusive)
}

/// Guarantee a non-empty unique region even for degenerate configs.
fn ensure_progress(text: &str, end: usize, prev_end: usize) -> usize {
    if end > prev_end {
        return end;
    }
    let mut e = prev_end + 1;
    while e < text.len() && !text.is_char_boundary(e) {
        e += 1;
    }
    e.min(text.len())
}

fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Cut points at the start of each paragraph (after a run of 2+ newlines).
fn paragraph_cuts(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut cuts = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let run_start = i;
            while i < bytes.len() && bytes[i] == b'\n' {
                i += 1;
            }
            if i - run_start >= 2 {
                cuts.push(i);
            }
        } else {
            i += 1;
        }
    }
    cuts
}

/// Cut points after sentence-ending punctuation followed by whitespace.
fn sentence_cuts(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut cuts = Vec::new();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let mut j = i + 1;
            while j < bytes.len() && matches!(bytes[j], b' ' | b'\n') {
                j += 1;
            }
            if j > i + 1 {
                cuts.push(j);
            }
        }
    }
    cuts
}

/// Cut points at the start of each line.
fn line_cuts(text: &str) -> Vec<usize> {
    text.bytes()
        .enumerate()
        .filter(|(_, b)| *b == b'\n')
        .map(|(i, _)| i + 1)
        .collect()
}

/// Symbol start/end byte offsets from a tree-sitter parse, sorted.
///
/// Returns `None` when the grammar fails to load or the parse produces no
/// symbols, letting the caller fall back to line boundaries.
fn symbol_cuts(text: &str, language: CodeLanguage) -> Option<Vec<usize>> {
    let mut parser = TsParser::new();
    parser.set_language(&language.grammar()).ok()?;
    let tree = parser.parse(text, None)?;

    let kinds = language.symbol_node_kinds();
    let mut cuts = Vec::new();
    let mut stack = vec![tree.root_node()];

    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind()) {
            cuts.push(node.start_byte());
            cuts.push(node.end_byte());
        }
        for idx in 0..node.named_child_count() {
            if let Some(child) = node.named_child(idx) {
                stack.push(child);
            }
        }
    }

    if cuts.is_empty() {
        return None;
    }

    cuts.sort_unstable();
    cuts.dedup();
    Some(cuts)
}
