pub mod tags;

pub use tags::extract_tags;

/// A document split into its frontmatter block and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Split<'a> {
    /// Raw YAML between the `---` fences, if the document has frontmatter.
    pub raw: Option<&'a str>,
    /// Number of lines (fences included) that precede the body.
    pub body_line_offset: usize,
    pub body: &'a str,
}

fn is_fence(line: &str) -> bool {
    line.trim_end() == "---"
}

/// Split frontmatter and body from markdown content.
///
/// Frontmatter only exists when the very first line is `---` and a later line
/// is `---` as well; an unterminated block is treated as body text.
pub fn split(content: &str) -> Split<'_> {
    let no_frontmatter = Split {
        raw: None,
        body_line_offset: 0,
        body: content,
    };

    let first_end = match content.find('\n') {
        Some(idx) => idx,
        None => return no_frontmatter,
    };
    if !is_fence(&content[..first_end]) {
        return no_frontmatter;
    }

    let raw_start = first_end + 1;
    let mut offset = raw_start;
    let mut line_count = 1;
    for line in content[raw_start..].split_inclusive('\n') {
        line_count += 1;
        if is_fence(line.trim_end_matches('\n')) {
            let body_start = offset + line.len();
            return Split {
                raw: Some(&content[raw_start..offset]),
                body_line_offset: line_count,
                body: &content[body_start.min(content.len())..],
            };
        }
        offset += line.len();
    }

    no_frontmatter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_with_frontmatter() {
        let content = "---\ntitle: Test\ntags: [a]\n---\nBody line\nSecond";
        let s = split(content);
        assert_eq!(s.raw, Some("title: Test\ntags: [a]\n"));
        assert_eq!(s.body_line_offset, 4);
        assert_eq!(s.body, "Body line\nSecond");
    }

    #[test]
    fn test_split_without_frontmatter() {
        let content = "Just some markdown content.\n---\n";
        let s = split(content);
        assert!(s.raw.is_none());
        assert_eq!(s.body_line_offset, 0);
        assert_eq!(s.body, content);
    }

    #[test]
    fn test_unterminated_block_is_body() {
        let content = "---\ntitle: nope\nstill going";
        let s = split(content);
        assert!(s.raw.is_none());
        assert_eq!(s.body, content);
    }

    #[test]
    fn test_crlf_fences() {
        let content = "---\r\ntags: x\r\n---\r\nBody";
        let s = split(content);
        assert_eq!(s.raw, Some("tags: x\r\n"));
        assert_eq!(s.body, "Body");
        assert_eq!(s.body_line_offset, 3);
    }

    #[test]
    fn test_frontmatter_at_end_of_file() {
        let s = split("---\ntags: [a]\n---");
        assert_eq!(s.raw, Some("tags: [a]\n"));
        assert_eq!(s.body, "");
    }
}
