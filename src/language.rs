/// Language tried when no default chain is configured at all.
pub const FINAL_DEFAULT_LANGUAGE: &str = "en";

/// Default chain used by the service when nothing else is configured.
pub const DEFAULT_CHAIN: &[&str] = &["pt-BR", "pt", "pt-PT", "en"];

/// Longest tag accepted from callers or configuration.
pub const MAX_LANGUAGE_TAG_LEN: usize = 35;

/// Language tags go out as an `Accept-Language` header, so only BCP-47
/// style characters are allowed.
pub fn is_valid_language_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= MAX_LANGUAGE_TAG_LEN
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Builds the ordered list of languages to try for a request.
#[derive(Debug, Clone)]
pub struct FallbackResolver {
    default_chain: Vec<String>,
}

impl Default for FallbackResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CHAIN.iter().map(|lang| lang.to_string()))
    }
}

impl FallbackResolver {
    /// Blank tags are dropped. An empty chain falls back to
    /// [`FINAL_DEFAULT_LANGUAGE`] so resolution never comes back empty.
    pub fn new<I, S>(default_chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chain = Vec::new();
        for lang in default_chain {
            push_unique(&mut chain, lang.as_ref());
        }
        if chain.is_empty() {
            chain.push(FINAL_DEFAULT_LANGUAGE.to_string());
        }
        Self {
            default_chain: chain,
        }
    }

    pub fn default_chain(&self) -> &[String] {
        &self.default_chain
    }

    /// Preferred language first, then the default chain, without duplicates.
    pub fn resolve_candidates(&self, preferred: Option<&str>) -> Vec<String> {
        let mut candidates = Vec::with_capacity(self.default_chain.len() + 1);
        if let Some(preferred) = preferred {
            push_unique(&mut candidates, preferred);
        }
        for lang in &self.default_chain {
            push_unique(&mut candidates, lang);
        }
        candidates
    }
}

fn push_unique(list: &mut Vec<String>, lang: &str) {
    let lang = lang.trim();
    if lang.is_empty() || list.iter().any(|existing| existing == lang) {
        return;
    }
    list.push(lang.to_string());
}

/// Picks the first candidate the upstream actually has a track for. When none
/// of them is available the first listed track wins, and `None` means the
/// video has no tracks at all.
pub fn select_available(available: &[String], candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .find(|lang| available.contains(lang))
        .or_else(|| available.first())
        .cloned()
}
