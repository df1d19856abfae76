use html_escape::decode_html_entities;

/// Separator placed between segment texts when building the full transcript.
pub const SEGMENT_SEPARATOR: &str = " ";

/// Decodes the HTML entities YouTube leaves in caption text.
///
/// Captions are sometimes double-encoded (`&amp;#39;`), so a single decode
/// pass can leave a literal `&#39;` behind; that one is patched up by hand.
pub fn clean_caption_text(raw: &str) -> String {
    decode_html_entities(raw)
        .replace("&#39;", "'")
        .replace('\n', " ")
        .trim()
        .to_string()
}

/// Joins segment texts in order, skipping segments that are blank.
pub fn join_segment_texts<'a, I>(texts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut full_text = String::new();
    for text in texts {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if !full_text.is_empty() {
            full_text.push_str(SEGMENT_SEPARATOR);
        }
        full_text.push_str(text);
    }
    full_text
}
