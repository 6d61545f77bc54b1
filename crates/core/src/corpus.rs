use crate::error::IndexError;
use crate::normalizer::{self, SourceFormat, TextNormalizer};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One blog post after text extraction, ready to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusItem {
    pub id: String,
    pub title: String,
    pub url: String,
    pub text: String,
    pub excerpt: String,
}

impl CorpusItem {
    pub fn from_source(
        normalizer: &TextNormalizer,
        slug: &str,
        source: &str,
        format: SourceFormat,
        max_text_chars: usize,
        max_excerpt_chars: usize,
    ) -> Self {
        let text = normalizer.plain_text(source, format);
        let text = normalizer::truncate_chars(&text, max_text_chars);
        Self {
            id: slug.to_string(),
            title: normalizer::title_from_slug(slug),
            url: format!("/blog/{slug}"),
            excerpt: normalizer::truncate_chars(&text, max_excerpt_chars),
            text,
        }
    }
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct CorpusReport {
    pub items: Vec<CorpusItem>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Post sources directly under `folder`, sorted so rebuilds see a stable order.
pub fn discover_post_files(folder: &Path) -> Result<Vec<PathBuf>, IndexError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(SourceFormat::from_extension)
            .is_some();

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub fn read_corpus(
    folder: &Path,
    max_text_chars: usize,
    max_excerpt_chars: usize,
) -> Result<CorpusReport, IndexError> {
    let files = discover_post_files(folder)?;
    if files.is_empty() {
        return Err(IndexError::EmptyCorpus(format!(
            "no .jsx or .md posts found in {}",
            folder.display()
        )));
    }

    let normalizer = TextNormalizer::new()?;
    let mut items = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        match read_post(&normalizer, &path, max_text_chars, max_excerpt_chars) {
            Ok(item) => items.push(item),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "skipping unreadable post");
                skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(CorpusReport {
        items,
        skipped_files,
    })
}

fn read_post(
    normalizer: &TextNormalizer,
    path: &Path,
    max_text_chars: usize,
    max_excerpt_chars: usize,
) -> Result<CorpusItem, IndexError> {
    let slug = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IndexError::InvalidArgument(format!("unusable file name: {}", path.display())))?;
    let format = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(SourceFormat::from_extension)
        .ok_or_else(|| IndexError::InvalidArgument(format!("unsupported post: {}", path.display())))?;
    let source = fs::read_to_string(path)?;

    Ok(CorpusItem::from_source(
        normalizer,
        slug,
        &source,
        format,
        max_text_chars,
        max_excerpt_chars,
    ))
}

/// Hex sha256 over every item's id and text, in corpus order.
pub fn corpus_digest(items: &[CorpusItem]) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(item.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
