//! Mention and command scanning for parseable message bodies.
//!
//! Scanning operates on a parsed view of content that has already been
//! broadcast; it never mutates the delivered copy, and a scan failure can
//! never block delivery.

/// Result of scanning one message body.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ContentScan {
    /// Mentioned usernames, in order of appearance, sender excluded,
    /// deduplicated case-insensitively.
    pub mentions: Vec<String>,
    /// Command name and argument tokens, if a `/command` token was found.
    pub command: Option<(String, Vec<String>)>,
}

/// Scan content for `@username` mentions and one `/command arg` invocation.
///
/// The first slash token starts the command; every token after it is an
/// argument, so mentions are only collected from the text before it.
pub fn scan_content(content: &str, sender: &str) -> ContentScan {
    let mut scan = ContentScan::default();
    let sender_key = sender.to_lowercase();
    let mut seen: Vec<String> = Vec::new();

    let mut tokens = content.split_whitespace();
    for token in tokens.by_ref() {
        if let Some(name) = token.strip_prefix('/') {
            if !name.is_empty() {
                let args = tokens.map(|t| t.to_string()).collect();
                scan.command = Some((name.to_lowercase(), args));
                break;
            }
            continue;
        }
        if let Some(raw) = token.strip_prefix('@') {
            let name: &str = raw.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_');
            if name.is_empty() {
                continue;
            }
            let key = name.to_lowercase();
            if key == sender_key || seen.contains(&key) {
                continue;
            }
            seen.push(key);
            scan.mentions.push(name.to_string());
        }
    }
    scan
}
