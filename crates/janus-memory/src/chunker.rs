//! Markdown chunking: split a file into addressable sections by level-2
//! heading, with a preamble chunk for content before the first heading and
//! blank-line subdivision for oversized sections.

/// Sections longer than this are subdivided on blank-line boundaries.
const MAX_CHUNK_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub heading: String,
    pub content: String,
}

/// Split markdown into chunks keyed by level-2 heading. Content before the
/// first `## ` heading becomes a preamble chunk labelled with the level-1
/// title, or a synthetic label when the file has none.
pub fn chunk_markdown(source: &str, content: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut heading: Option<String> = None;
    let mut title: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();

    let mut flush =
        |heading: &Option<String>, title: &Option<String>, buffer: &mut Vec<&str>, out: &mut Vec<Chunk>| {
            let body = buffer.join("\n").trim().to_string();
            buffer.clear();
            if body.is_empty() {
                return;
            }
            let label = heading
                .clone()
                .or_else(|| title.clone())
                .unwrap_or_else(|| format!("{source} (preamble)"));
            for part in subdivide(&body) {
                out.push(Chunk {
                    heading: label.clone(),
                    content: part,
                });
            }
        };

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("## ") {
            flush(&heading, &title, &mut buffer, &mut chunks);
            heading = Some(rest.trim().to_string());
        } else if heading.is_none() && title.is_none() && line.starts_with("# ") {
            title = Some(line[2..].trim().to_string());
        } else {
            buffer.push(line);
        }
    }
    flush(&heading, &title, &mut buffer, &mut chunks);

    chunks
}

/// Break an oversized section into pieces on blank-line boundaries without
/// splitting inside a paragraph. A single paragraph larger than the cap is
/// kept whole.
fn subdivide(body: &str) -> Vec<String> {
    if body.len() <= MAX_CHUNK_CHARS {
        return vec![body.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    for paragraph in body.split("\n\n") {
        if !current.is_empty() && current.len() + paragraph.len() + 2 > MAX_CHUNK_CHARS {
            parts.push(current.trim().to_string());
            current = String::new();
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_level_two_headings() {
        let md = "# Notes\n\nintro text\n\n## First\n\nalpha\n\n## Second\n\nbeta";
        let chunks = chunk_markdown("NOTES.md", md);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading, "Notes");
        assert_eq!(chunks[0].content, "intro text");
        assert_eq!(chunks[1].heading, "First");
        assert_eq!(chunks[1].content, "alpha");
        assert_eq!(chunks[2].heading, "Second");
        assert_eq!(chunks[2].content, "beta");
    }

    #[test]
    fn preamble_without_title_gets_synthetic_label() {
        let md = "just some loose notes\n\n## Section\n\nbody";
        let chunks = chunk_markdown("loose.md", md);
        assert_eq!(chunks[0].heading, "loose.md (preamble)");
        assert_eq!(chunks[1].heading, "Section");
    }

    #[test]
    fn level_three_headings_stay_inside_their_section() {
        let md = "## Top\n\n### Nested\n\ncontent under nested";
        let chunks = chunk_markdown("x.md", md);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("### Nested"));
    }

    #[test]
    fn oversized_sections_subdivide_on_blank_lines() {
        let paragraph = "word ".repeat(120); // ~600 chars
        let md = format!(
            "## Big\n\n{p}\n\n{p}\n\n{p}\n\n{p}\n\n{p}",
            p = paragraph.trim()
        );
        let chunks = chunk_markdown("big.md", &md);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.heading == "Big"));
        assert!(chunks.iter().all(|c| c.content.len() <= MAX_CHUNK_CHARS));
        // No paragraph was broken apart.
        for chunk in &chunks {
            for para in chunk.content.split("\n\n") {
                assert_eq!(para, paragraph.trim());
            }
        }
    }

    #[test]
    fn empty_input_produces_no_chunks() {
        assert!(chunk_markdown("empty.md", "").is_empty());
        assert!(chunk_markdown("empty.md", "\n\n\n").is_empty());
    }
}
