//! Text normalization primitives for message rendering.
//!
//! Templates arrive from an external store that has historically produced
//! mis-decoded multi-byte text and HTML-entity escapes. The helpers here are
//! pure functions; ordering policy (placeholders, then mojibake repair, then
//! entity decoding) lives with the renderer that composes them.

const ENTITY_MAX_NAME_CHARS: usize = 10;

/// Replaces every ASCII-case-insensitive occurrence of `placeholder` with `value`.
///
/// Placeholders are ASCII-only, so byte-window comparison is safe against
/// arbitrary UTF-8 input: placeholder bytes never match the middle of a
/// multi-byte sequence.
pub fn replace_case_insensitive(text: &str, placeholder: &str, value: &str) -> String {
    if placeholder.is_empty() || placeholder.len() > text.len() {
        return text.to_string();
    }
    let haystack = text.as_bytes();
    let needle = placeholder.as_bytes();
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    while cursor < haystack.len() {
        if cursor + needle.len() <= haystack.len()
            && haystack[cursor..cursor + needle.len()].eq_ignore_ascii_case(needle)
        {
            output.push_str(value);
            cursor += needle.len();
            continue;
        }
        let Some(ch) = text[cursor..].chars().next() else {
            break;
        };
        output.push(ch);
        cursor += ch.len_utf8();
    }
    output
}

/// Substitutes the `<fullname>` and `<kc_username>` template placeholders.
///
/// Missing field values substitute the empty string rather than leaving the
/// placeholder text in the outgoing message.
pub fn substitute_placeholders(
    template: &str,
    full_name: Option<&str>,
    username: Option<&str>,
) -> String {
    let substituted =
        replace_case_insensitive(template, "<fullname>", full_name.unwrap_or_default());
    replace_case_insensitive(&substituted, "<kc_username>", username.unwrap_or_default())
}

/// Repairs text that was decoded one byte per codepoint instead of as UTF-8.
///
/// Applies only when every char fits a single byte and at least one is in the
/// 0x80..=0xFF range; anything already containing codepoints above U+00FF is
/// genuine Unicode and passes through untouched. An invalid re-decode also
/// passes the input through unchanged.
pub fn repair_mojibake(text: &str) -> String {
    let mut has_high_byte = false;
    for ch in text.chars() {
        let code = ch as u32;
        if code > 0xFF {
            return text.to_string();
        }
        if code >= 0x80 {
            has_high_byte = true;
        }
    }
    if !has_high_byte {
        return text.to_string();
    }
    let bytes: Vec<u8> = text.chars().map(|ch| ch as u32 as u8).collect();
    match String::from_utf8(bytes) {
        Ok(repaired) => repaired,
        Err(_) => text.to_string(),
    }
}

fn named_entity(name: &str) -> Option<&'static str> {
    let replacement = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "hellip" => "\u{2026}",
        "copy" => "\u{a9}",
        _ => return None,
    };
    Some(replacement)
}

fn numeric_entity(body: &str) -> Option<char> {
    let digits = body.strip_prefix('#')?;
    let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u32>().ok()?
    };
    char::from_u32(code)
}

/// Decodes the common HTML entity escapes found in stored templates.
///
/// Handles the fixed named set plus `&#NNN;` and `&#xHH;` numeric forms.
/// Unknown or malformed entity sequences are left intact.
pub fn decode_html_entities(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let decoded = candidate[1..]
            .char_indices()
            .take_while(|(index, _)| *index <= ENTITY_MAX_NAME_CHARS)
            .find(|(_, ch)| *ch == ';')
            .and_then(|(end, _)| {
                let body = &candidate[1..=end];
                if let Some(replacement) = named_entity(body) {
                    return Some((replacement.to_string(), end + 2));
                }
                numeric_entity(body).map(|ch| (ch.to_string(), end + 2))
            });
        match decoded {
            Some((replacement, consumed)) => {
                output.push_str(&replacement);
                rest = &candidate[consumed..];
            }
            None => {
                output.push('&');
                rest = &candidate[1..];
            }
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_substitution_is_case_insensitive() {
        let rendered = substitute_placeholders(
            "Hi <FullName>, welcome back <KC_USERNAME>!",
            Some("Ada"),
            Some("ada99"),
        );
        assert_eq!(rendered, "Hi Ada, welcome back ada99!");
    }

    #[test]
    fn missing_fields_substitute_empty_string() {
        let rendered = substitute_placeholders("Hi <fullname>!", None, None);
        assert_eq!(rendered, "Hi !");
    }

    #[test]
    fn mojibake_repair_restores_utf8_text() {
        // "café" decoded one byte per codepoint.
        let broken = "caf\u{c3}\u{a9}";
        assert_eq!(repair_mojibake(broken), "café");
    }

    #[test]
    fn mojibake_repair_leaves_clean_unicode_alone() {
        assert_eq!(repair_mojibake("café"), "café");
        assert_eq!(repair_mojibake("plain ascii"), "plain ascii");
    }

    #[test]
    fn mojibake_repair_leaves_invalid_sequences_alone() {
        // A lone 0xC3 is not a valid UTF-8 sequence.
        let input = "abc\u{c3}";
        assert_eq!(repair_mojibake(input), input);
    }

    #[test]
    fn entity_decoding_handles_named_and_numeric_forms() {
        assert_eq!(decode_html_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_html_entities("&#72;&#105;"), "Hi");
        assert_eq!(decode_html_entities("&#x48;i"), "Hi");
        assert_eq!(decode_html_entities("5 &lt; 6 &gt; 4"), "5 < 6 > 4");
    }

    #[test]
    fn unknown_entities_pass_through() {
        assert_eq!(decode_html_entities("&bogus; &unterminated"), "&bogus; &unterminated");
        assert_eq!(decode_html_entities("AT&T"), "AT&T");
    }
}
