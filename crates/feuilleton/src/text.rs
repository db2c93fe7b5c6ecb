//! Small text helpers shared by prompt assembly and persistence.

/// Whitespace-separated word count.
#[must_use]
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Truncate to at most `max_chars` characters, cutting on a char boundary.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// The trailing `max_chars` characters, used as a continuation hint for the
/// sequential beat writer.
#[must_use]
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let skip = total - max_chars;
    match text.char_indices().nth(skip) {
        Some((byte_index, _)) => &text[byte_index..],
        None => text,
    }
}

/// Best-effort JSON object extraction from an LLM reply: parse the whole
/// string, else the outermost `{ … }` slice, else `None`.
#[must_use]
pub fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end])
        .ok()
        .filter(serde_json::Value::is_object)
}

/// Filesystem-safe slug for export file names: lowercase ASCII alphanumerics
/// and dashes, collapsed.
#[must_use]
pub fn safe_title(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for ch in title.chars() {
        let ch = match ch {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        };
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "chapitre".to_string()
    } else {
        slug
    }
}

/// The markdown artifacts the model leaks into prose, in stripping order:
/// HTML tags, code fences, separators, headings, quotes, list markers,
/// images, links, bold/italic/strikethrough marks, inline code, and stray
/// marker runs. Narrative punctuation (dialogue dashes, ellipses) is kept.
fn markdown_rules() -> &'static [(regex::Regex, &'static str)] {
    use std::sync::OnceLock;
    static RULES: OnceLock<Vec<(regex::Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"<[^>]+>", " "),
            (r"```[\s\S]*?```", " "),
            (r"(?m)^```.*$", " "),
            (r"(?m)^[ \t]*[-*_=]{3,}[ \t]*$", " "),
            (r"(?m)^#{1,6}\s+", ""),
            (r"(?m)^>\s+", ""),
            (r"(?m)^[ \t]*[-*+]\s+", ""),
            (r"(?m)^[ \t]*\d+\.\s+", ""),
            (r"!\[[^\]]*\]\([^)]+\)", ""),
            (r"\[([^\]]+)\]\([^)]+\)", "${1}"),
            (r"\*{3}([^*\n]+?)\*{3}", "${1}"),
            (r"_{3}([^_\n]+?)_{3}", "${1}"),
            (r"\*\*([^*\n]+?)\*\*", "${1}"),
            (r"__([^_\n]+?)__", "${1}"),
            // No lookarounds in this regex flavor: the word guards are
            // captured and restored by the replacement.
            (r"(?m)(^|[^\w*])\*([^*\n]+?)\*($|[^\w*])", "${1}${2}${3}"),
            (r"(?m)(^|[^\w_])_([^_\n]+?)_($|[^\w_])", "${1}${2}${3}"),
            (r"~~([^~\n]+?)~~", "${1}"),
            (r"`([^`\n]+)`", "${1}"),
            (r"(?m)(^|[^\w])[*_]+($|[^\w*_])", "${1}${2}"),
        ]
        .iter()
        .map(|(pattern, replacement)| {
            (
                regex::Regex::new(pattern).unwrap_or_else(|_| unreachable!()),
                *replacement,
            )
        })
        .collect()
    })
}

/// Scrub markdown artifacts the model leaks into prose, then drop a leading
/// `Chapitre N` heading (the title is stored separately) and normalize
/// whitespace, keeping paragraph breaks.
#[must_use]
pub fn clean_chapter_markdown(text: &str) -> String {
    use std::sync::OnceLock;

    let mut cleaned = text.to_string();
    for (rule, replacement) in markdown_rules() {
        cleaned = rule.replace_all(&cleaned, *replacement).into_owned();
    }

    static CHAPTER_HEADING: OnceLock<regex::Regex> = OnceLock::new();
    let heading = CHAPTER_HEADING.get_or_init(|| {
        regex::Regex::new(r"(?i)^\s*(chapitre|chapter)\b[^\n]*\n?")
            .unwrap_or_else(|_| unreachable!())
    });
    cleaned = heading.replace(&cleaned, "").into_owned();

    static INLINE_SPACES: OnceLock<regex::Regex> = OnceLock::new();
    let spaces = INLINE_SPACES
        .get_or_init(|| regex::Regex::new(r"[^\S\n]+").unwrap_or_else(|_| unreachable!()));
    cleaned = spaces.replace_all(&cleaned, " ").into_owned();

    static BLANK_RUNS: OnceLock<regex::Regex> = OnceLock::new();
    let blanks = BLANK_RUNS
        .get_or_init(|| regex::Regex::new(r"\n{3,}").unwrap_or_else(|_| unreachable!()));
    cleaned = blanks.replace_all(&cleaned, "\n\n").into_owned();

    cleaned.trim().to_string()
}

/// Dedup while preserving first-seen order, comparing lower-cased trimmed
/// values.
#[must_use]
pub fn dedup_preserving_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let cleaned = item.trim().to_string();
        if cleaned.is_empty() {
            continue;
        }
        if seen.insert(cleaned.to_lowercase()) {
            out.push(cleaned);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héros", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn tail_keeps_last_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }

    #[test]
    fn json_extraction_tolerates_prose_wrapping() {
        let raw = "Voici le resultat:\n{\"score\": 8.0}\nVoila.";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["score"], 8.0);
        assert!(extract_json_object("pas de json").is_none());
        assert!(extract_json_object("[1, 2]").is_none());
    }

    #[test]
    fn safe_title_slugs() {
        assert_eq!(safe_title("La Lettre Volée!"), "la-lettre-volee");
        assert_eq!(safe_title("???"), "chapitre");
    }

    #[test]
    fn markdown_cleanup_strips_heading_and_fences() {
        let raw = "# Chapitre 3\n\n```\nnoise\n```\nLa **pluie** tombait.\n\n## Scene 2\nElle courait.";
        let cleaned = clean_chapter_markdown(raw);
        assert!(!cleaned.contains('#'));
        assert!(!cleaned.contains("**"));
        assert!(!cleaned.to_lowercase().contains("chapitre 3"));
        assert!(cleaned.contains("La pluie tombait."));
        assert!(cleaned.contains("Scene 2"));
    }

    #[test]
    fn markdown_cleanup_strips_inline_marks_lists_and_links() {
        let raw = "Elle lut *la lettre* et _souffla_.\n\
                   - un indice\n\
                   1. deuxieme indice\n\
                   > une citation\n\
                   [le plan](http://example.com/plan) ~~efface~~ `code`\n\
                   ![carte](http://example.com/carte.png)";
        let cleaned = clean_chapter_markdown(raw);
        assert!(cleaned.contains("Elle lut la lettre et souffla."));
        assert!(cleaned.contains("un indice"));
        assert!(!cleaned.contains("- un indice"));
        assert!(cleaned.contains("deuxieme indice"));
        assert!(!cleaned.contains("1. deuxieme"));
        assert!(cleaned.contains("une citation"));
        assert!(!cleaned.contains('>'));
        assert!(cleaned.contains("le plan"));
        assert!(!cleaned.contains("http"));
        assert!(cleaned.contains("efface"));
        assert!(!cleaned.contains("~~"));
        assert!(cleaned.contains("code"));
        assert!(!cleaned.contains('`'));
    }

    #[test]
    fn markdown_cleanup_keeps_dialogue_punctuation() {
        let raw = "« Je pars », dit-elle... — Attends !";
        let cleaned = clean_chapter_markdown(raw);
        assert_eq!(cleaned, raw);
    }

    #[test]
    fn dedup_is_case_insensitive_and_ordered() {
        let out = dedup_preserving_order(vec![
            "Vengeance".to_string(),
            " vengeance ".to_string(),
            "Pardon".to_string(),
        ]);
        assert_eq!(out, vec!["Vengeance", "Pardon"]);
    }
}
