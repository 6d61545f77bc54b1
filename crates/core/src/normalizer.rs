use crate::error::IndexError;
use regex::Regex;

pub const MAX_TEXT_CHARS: usize = 16_000;
pub const MAX_EXCERPT_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Jsx,
    Markdown,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("jsx") {
            Some(SourceFormat::Jsx)
        } else if ext.eq_ignore_ascii_case("md") {
            Some(SourceFormat::Markdown)
        } else {
            None
        }
    }
}

/// Compiled stripping rules. Build once and reuse across a whole corpus.
pub struct TextNormalizer {
    block_comment: Regex,
    line_comment: Regex,
    import_line: Regex,
    export_line: Regex,
    tag: Regex,
    brace_expr: Regex,
    code_fence: Regex,
    inline_code: Regex,
    heading: Regex,
    bold: Regex,
    italic: Regex,
    link: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self, IndexError> {
        Ok(Self {
            block_comment: Regex::new(r"(?s)/\*.*?\*/")?,
            line_comment: Regex::new(r"(?m)(^|[^:])//[^\n]*")?,
            import_line: Regex::new(r"(?m)^\s*import\s.*$")?,
            export_line: Regex::new(r"(?m)^\s*export\s.*$")?,
            tag: Regex::new(r"<[^>]*>")?,
            brace_expr: Regex::new(r"\{[^{}]*\}")?,
            code_fence: Regex::new(r"(?s)```.*?```")?,
            inline_code: Regex::new(r"`[^`]*`")?,
            heading: Regex::new(r"#+\s*")?,
            bold: Regex::new(r"\*\*|__")?,
            italic: Regex::new(r"[*_]")?,
            link: Regex::new(r"\[([^\]]+)\]\([^)]+\)")?,
        })
    }

    pub fn plain_text(&self, source: &str, format: SourceFormat) -> String {
        match format {
            SourceFormat::Jsx => self.strip_jsx(source),
            SourceFormat::Markdown => self.strip_markdown(source),
        }
    }

    pub fn strip_jsx(&self, source: &str) -> String {
        let text = self.block_comment.replace_all(source, " ");
        let text = self.line_comment.replace_all(&text, "$1 ");
        let text = self.import_line.replace_all(&text, " ");
        let text = self.export_line.replace_all(&text, " ");
        let text = self.tag.replace_all(&text, " ");
        let text = self.brace_expr.replace_all(&text, " ");
        normalize_whitespace(&text)
    }

    pub fn strip_markdown(&self, source: &str) -> String {
        let text = self.code_fence.replace_all(source, " ");
        let text = self.inline_code.replace_all(&text, " ");
        let text = self.heading.replace_all(&text, "");
        let text = self.link.replace_all(&text, "$1");
        let text = self.bold.replace_all(&text, "");
        let text = self.italic.replace_all(&text, "");
        normalize_whitespace(&text)
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"my-first_post"` becomes `"My First Post"`.
pub fn title_from_slug(slug: &str) -> String {
    slug.split(|ch: char| ch == '-' || ch == '_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `max_chars` characters, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
