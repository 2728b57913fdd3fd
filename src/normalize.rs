//! Text cleaning applied to every input before chunking.
//!
//! The output alphabet is printable ASCII plus `\n` and `\t`: emoji,
//! decorative symbols, and other non-ASCII characters are dropped rather
//! than transliterated. Line endings are normalized to `\n`, trailing
//! whitespace is trimmed per line, and runs of blank lines collapse to a
//! single blank line. The function is pure and idempotent.

/// Clean raw extracted text for ingestion.
pub fn normalize(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    for line in unified.split('\n') {
        let cleaned: String = line.chars().filter(|c| is_kept(*c)).collect();
        let cleaned = cleaned.trim_end();

        if cleaned.is_empty() {
            // At most one blank line, and none before the first content line.
            if matches!(lines.last(), Some(prev) if !prev.is_empty()) {
                lines.push(String::new());
            }
        } else {
            lines.push(cleaned.to_string());
        }
    }

    while matches!(lines.last(), Some(last) if last.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

fn is_kept(c: char) -> bool {
    c == '\t' || (' '..='~').contains(&c)
}
