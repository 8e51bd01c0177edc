use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Display width of a string in terminal columns (CJK and emoji count as 2).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Truncates a string to fit within `max_width` terminal columns.
///
/// Appends "..." when text is cut. Widths of 3 or fewer columns get as many
/// characters as fit, without an ellipsis. Returns `Cow::Borrowed` when the
/// string already fits.
///
/// # Examples
///
/// ```
/// use secwire::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if max_width == 0 {
        return Cow::Borrowed("");
    }
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let (budget, suffix) = if max_width <= ELLIPSIS_WIDTH {
        (max_width, "")
    } else {
        (max_width - ELLIPSIS_WIDTH, ELLIPSIS)
    };

    let mut used = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        end = idx + c.len_utf8();
    }

    Cow::Owned(format!("{}{}", &s[..end], suffix))
}

/// Truncates to at most `max_chars` characters (not bytes), never splitting
/// a code point.
pub fn clamp_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => Cow::Owned(s[..byte_idx].to_string()),
        None => Cow::Borrowed(s),
    }
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences.
///
/// Feed titles and summaries are attacker-controlled and end up on a
/// terminal. Removes C0 controls (except tab, newline, carriage return),
/// DEL, CSI sequences (`ESC [ ... final`), OSC sequences (`ESC ] ...`
/// terminated by BEL or `ESC \`) and bare ESC bytes.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_unsafe = |c: char| c == '\x1b' || c == '\x7f' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_unsafe) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if !is_unsafe(c) {
                out.push(c);
            }
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                for next in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&next) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(next) = chars.next() {
                    if next == '\x07' {
                        break;
                    }
                    if next == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Cow::Owned(out)
}

/// Converts an HTML fragment to plain text for display and search.
///
/// Tags are dropped, `<script>`/`<style>` bodies are skipped, common named
/// entities and numeric entities are decoded, and whitespace runs collapse
/// to single spaces. Block-level tags separate words; inline ones do not, so
/// `ran<b>som</b>ware` stays one word. Unknown entities are kept verbatim.
pub fn strip_markup(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(pos) = rest.find(['<', '&']) {
        text.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if rest.starts_with('<') {
            let Some(close) = rest.find('>') else {
                // Unterminated tag: everything after it is markup noise
                rest = "";
                break;
            };
            let tag = rest[1..close].trim_start().to_ascii_lowercase();
            rest = &rest[close + 1..];

            for skipped in ["script", "style"] {
                if tag.starts_with(skipped) && !tag.ends_with('/') {
                    let end_tag = format!("</{}", skipped);
                    rest = match find_ascii_ci(rest, &end_tag) {
                        Some(end) => rest[end..].find('>').map_or("", |gt| &rest[end + gt + 1..]),
                        None => "",
                    };
                }
            }
            if is_block_tag(&tag) {
                text.push(' ');
            }
        } else {
            // PERF: entities are short, so only the next few bytes can hold the `;`
            match rest.bytes().take(MAX_ENTITY_LEN + 1).position(|b| b == b';') {
                Some(semi) => {
                    let entity = &rest[1..semi];
                    match decode_entity(entity) {
                        Some(decoded) => text.push(decoded),
                        None => text.push_str(&rest[..=semi]),
                    }
                    rest = &rest[semi + 1..];
                }
                None => {
                    text.push('&');
                    rest = &rest[1..];
                }
            }
        }
    }
    text.push_str(rest);

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Longest entity body looked for between `&` and `;`.
const MAX_ENTITY_LEN: usize = 10;

fn is_block_tag(tag: &str) -> bool {
    let name = tag.trim_start_matches('/');
    let end = name
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(name.len());
    matches!(
        &name[..end],
        "p" | "br" | "div" | "li" | "ul" | "ol" | "dl" | "dt" | "dd"
            | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
            | "tr" | "td" | "th" | "table" | "blockquote" | "pre" | "hr"
            | "section" | "article" | "header" | "footer" | "figure" | "figcaption"
    )
}

fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        "hellip" => Some('…'),
        "mdash" => Some('—'),
        "ndash" => Some('–'),
        "rsquo" => Some('’'),
        "lsquo" => Some('‘'),
        "rdquo" => Some('”'),
        "ldquo" => Some('“'),
        _ => {
            let numeric = entity.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
