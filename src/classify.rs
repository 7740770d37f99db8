//! Document type classification, feeding the per-type chunk profile in
//! [`crate::config::ChunkingConfig`].
//!
//! Simple structural signals — heading density, a References/Abstract section, bullet density,
//! code-fence density — computed over the document text and an optional filename hint, with
//! deterministic tie-breaking in the order the types are checked below.

use crate::models::SourceType;

/// Classifies `text` (optionally aided by `filename`, e.g. `"lecture.py"`) into one of the five
/// [`SourceType`] variants. Checks are ordered most-specific-first so a document that could match
/// more than one signal (e.g. annotated code with headings) resolves deterministically.
pub fn classify(text: &str, filename: Option<&str>) -> SourceType {
    if let Some(name) = filename {
        if is_code_extension(name) {
            return SourceType::Code;
        }
    }

    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return SourceType::General;
    }

    let code_fence_count = text.matches("```").count() / 2;
    let code_lines = lines.iter().filter(|l| looks_like_code_line(l)).count();
    if code_fence_count >= 2 || code_lines as f32 / lines.len() as f32 > 0.4 {
        return SourceType::Code;
    }

    let lower = text.to_lowercase();
    let has_paper_markers = lower.contains("abstract") && (lower.contains("references") || lower.contains("bibliography"));
    if has_paper_markers {
        return SourceType::Paper;
    }

    let heading_count = lines.iter().filter(|l| crate::chunk::is_heading_line(l)).count();
    let heading_ratio = heading_count as f32 / lines.len() as f32;
    let bullet_count = lines.iter().filter(|l| is_bullet_line(l)).count();
    let bullet_ratio = bullet_count as f32 / lines.len() as f32;

    if heading_ratio > 0.03 && bullet_ratio < 0.15 {
        return SourceType::Textbook;
    }
    if bullet_ratio > 0.2 {
        return SourceType::Notes;
    }

    SourceType::General
}

fn is_code_extension(filename: &str) -> bool {
    const CODE_EXTENSIONS: &[&str] = &[
        "rs", "py", "js", "ts", "jsx", "tsx", "java", "go", "c", "cpp", "h", "hpp", "rb", "cs",
        "swift", "kt", "scala", "sh",
    ];
    filename
        .rsplit_once('.')
        .map(|(_, ext)| CODE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn looks_like_code_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("fn ")
        || trimmed.starts_with("def ")
        || trimmed.starts_with("function ")
        || trimmed.starts_with("class ")
        || trimmed.starts_with("import ")
        || trimmed.starts_with("use ")
        || trimmed.starts_with("#include")
        || trimmed.ends_with('{')
        || trimmed.ends_with(';')
}

fn is_bullet_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("- ") || trimmed.starts_with("* ") || trimmed.starts_with("+ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_extension_wins_outright() {
        assert_eq!(classify("just some prose", Some("main.rs")), SourceType::Code);
    }

    #[test]
    fn fenced_code_blocks_classify_as_code() {
        let text = "Some notes\n```python\ndef f():\n    pass\n```\nMore notes\n```python\nclass X:\n    pass\n```\n";
        assert_eq!(classify(text, None), SourceType::Code);
    }

    #[test]
    fn abstract_and_references_classify_as_paper() {
        let text = "Abstract\nWe study X.\n\nIntroduction\n...\n\nReferences\n[1] Foo et al.";
        assert_eq!(classify(text, None), SourceType::Paper);
    }

    #[test]
    fn headings_without_bullets_classify_as_textbook() {
        let mut text = String::new();
        for i in 0..20 {
            if i % 5 == 0 {
                text.push_str(&format!("# Chapter {i}\n"));
            }
            text.push_str("Some explanatory paragraph text goes here.\n");
        }
        assert_eq!(classify(&text, None), SourceType::Textbook);
    }

    #[test]
    fn heavy_bullets_classify_as_notes() {
        let mut text = String::new();
        for i in 0..20 {
            text.push_str(&format!("- point number {i}\n"));
        }
        assert_eq!(classify(&text, None), SourceType::Notes);
    }

    #[test]
    fn plain_prose_classifies_as_general() {
        let text = "This is a short plain paragraph with no structure at all to speak of.";
        assert_eq!(classify(text, None), SourceType::General);
    }

    #[test]
    fn empty_text_classifies_as_general() {
        assert_eq!(classify("", None), SourceType::General);
    }
}
