/// Trim whitespace, strip outer quotes if present, and collapse inner runs of
/// whitespace to a single space.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    };
    unquoted.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalised form of a header used for matching: cleaned and case-folded.
pub fn normalize_header(raw: &str) -> String {
    clean_str(raw).to_lowercase()
}

/// Render a numeric cell as text, dropping a zero fractional part so that
/// identifiers stored as numbers (`123456789.0`) read back unchanged.
pub fn number_to_text(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
