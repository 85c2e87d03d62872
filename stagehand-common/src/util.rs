//! Shared utilities.

fn find_value_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote = None;
    let mut escaped = false;

    for c in s.chars() {
        let char_len = c.len_utf8();

        if escaped {
            escaped = false;
            end += char_len;
            continue;
        }

        if c == '\\' {
            escaped = true;
            end += char_len;
            continue;
        }

        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            end += char_len;
            continue;
        }

        if c == '"' || c == '\'' {
            in_quote = Some(c);
            end += char_len;
            continue;
        }

        if c.is_whitespace() || c == ',' {
            break;
        }

        end += char_len;
    }
    end
}

/// Key prefixes whose values never reach a log line.
const SENSITIVE_KEYS: &[&str] = &[
    "ARM_CLIENT_SECRET=",
    "ARM_ACCESS_KEY=",
    "ARM_SAS_TOKEN=",
    "ARM_CLIENT_CERTIFICATE_PASSWORD=",
    "AZDO_PERSONAL_ACCESS_TOKEN=",
    "client_secret=",
    "password=",
    "PASSWORD=",
    "access_key=",
    "token=",
    "TOKEN=",
    "SECRET=",
];

/// Mask credential values in a command line or variable dump.
///
/// The key is kept, the value up to the next whitespace (or the end of a
/// quoted value) becomes `***`.
pub fn mask_sensitive(text: &str) -> String {
    let mut result = text.to_string();
    for key in SENSITIVE_KEYS {
        let replacement = format!("{key}***");
        let mut search_start = 0;
        while search_start < result.len() {
            let Some(start) = result[search_start..].find(key) else {
                break;
            };
            let abs_start = search_start + start;
            let value_start = abs_start + key.len();
            let value_end = value_start + find_value_end(&result[value_start..]);

            result = format!(
                "{}{}{}",
                &result[..abs_start],
                replacement,
                &result[value_end..]
            );

            // Step past the replacement so it is never matched again.
            search_start = abs_start + replacement.len();
        }
    }
    result
}
