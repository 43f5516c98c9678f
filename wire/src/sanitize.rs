//! Sanitization rules for user-supplied identifiers and text.
//!
//! Strict on input, safe on output: names and rooms collapse to a small
//! character class, chat text keeps only printable content plus newline and
//! tab, and tokens are masked before they can reach a log line.

/// Fallback display name
pub const DEFAULT_NAME: &str = "anonymous";

/// Fallback room
pub const DEFAULT_ROOM: &str = "lobby";

/// Maximum chat message size in bytes
pub const MAX_TEXT_BYTES: usize = 4096;

const MAX_IDENT_CHARS: usize = 32;
const MAX_FILENAME_CHARS: usize = 256;

/// Normalize a display name: keep `[A-Za-z0-9 _-]`, lowercase, at most 32
/// chars. An empty result becomes `anonymous`.
pub fn sanitize_name(raw: &str) -> String {
    sanitize_ident(raw, true, DEFAULT_NAME)
}

/// Normalize a room id: keep `[A-Za-z0-9_-]` (no spaces), lowercase, at most
/// 32 chars. An empty result becomes `lobby`.
pub fn sanitize_room(raw: &str) -> String {
    sanitize_ident(raw, false, DEFAULT_ROOM)
}

fn sanitize_ident(raw: &str, allow_space: bool, default: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || (allow_space && *c == ' ')
        })
        .flat_map(char::to_lowercase)
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return default.to_string();
    }
    trimmed.chars().take(MAX_IDENT_CHARS).collect()
}

/// Clean a chat message: strip control characters other than newline and tab,
/// cap at [`MAX_TEXT_BYTES`] bytes (on a char boundary).
pub fn sanitize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_TEXT_BYTES));
    for ch in raw.chars() {
        if ch.is_control() && ch != '\n' && ch != '\t' {
            continue;
        }
        if out.len() + ch.len_utf8() > MAX_TEXT_BYTES {
            break;
        }
        out.push(ch);
    }
    out
}

/// Reduce a path to a safe basename for saving a received file.
pub fn sanitize_filename(raw: &str) -> String {
    let basename = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim_matches('.');
    let cleaned: String = basename
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILENAME_CHARS)
        .collect();
    if cleaned.is_empty() {
        "unnamed_file".to_string()
    } else {
        cleaned
    }
}

/// Mask an auth token for logging: `first4…last4`, or `***` when the token
/// is too short to mask meaningfully.
pub fn mask_token(token: &str) -> String {
    if token.is_empty() {
        return "<empty>".to_string();
    }
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
