/// Scope every style rule in `css` to elements under the `namespace` class.
///
/// This is a brace scanner, not a CSS parser. Selectors already starting with the
/// namespace class are kept, so rewriting is idempotent. Group at-rules (`@media`,
/// `@supports`, ...) are rewritten recursively; other at-rules and `;` statements pass
/// through unchanged.
pub fn rewrite(css: &str, namespace: &str) -> String {
    if css.is_empty() || namespace.is_empty() {
        return css.to_string();
    }
    let mut out = String::with_capacity(css.len() + 32);
    rewrite_into(css, namespace, &mut out);
    out
}

fn rewrite_into(css: &str, namespace: &str, out: &mut String) {
    for item in scan(css) {
        match item {
            Item::Text(text) | Item::Statement(text) | Item::Unterminated(text) => {
                out.push_str(text)
            }
            Item::Block { prelude, body } => {
                let trimmed = prelude.trim();
                if trimmed.starts_with('@') {
                    out.push_str(prelude);
                    out.push('{');
                    if is_group_at_rule(trimmed) {
                        rewrite_into(body, namespace, out);
                    } else {
                        out.push_str(body);
                    }
                    out.push('}');
                    continue;
                }

                let selectors = scope_selectors(trimmed, namespace);
                if selectors.is_empty() {
                    out.push_str(prelude);
                    out.push('{');
                } else {
                    out.push_str(&prelude[..prelude.len() - prelude.trim_start().len()]);
                    out.push_str(&selectors);
                    out.push_str(" {");
                }
                out.push_str(body);
                out.push('}');
            }
        }
    }
}

/// At-rules whose block holds further style rules.
fn is_group_at_rule(prelude: &str) -> bool {
    let name = prelude[1..]
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    matches!(
        name.as_str(),
        "media" | "supports" | "container" | "layer" | "document" | "-moz-document" | "scope"
    )
}

fn scope_selectors(selector_list: &str, namespace: &str) -> String {
    split_top_level(selector_list)
        .into_iter()
        .map(str::trim)
        .filter(|selector| !selector.is_empty())
        .map(|selector| scope_selector(selector, namespace))
        .collect::<Vec<_>>()
        .join(", ")
}

fn scope_selector(selector: &str, namespace: &str) -> String {
    if starts_with_class(selector, namespace) {
        return selector.to_string();
    }
    for keyword in [":root", "html", "body"] {
        let Some(rest) = selector.strip_prefix(keyword) else {
            continue;
        };
        if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
            continue;
        }
        if starts_with_class(rest.trim_start(), namespace) {
            return selector.to_string();
        }
        return format!("{keyword} .{namespace}{rest}");
    }
    format!(".{namespace} {selector}")
}

fn starts_with_class(selector: &str, namespace: &str) -> bool {
    selector
        .strip_prefix('.')
        .and_then(|rest| rest.strip_prefix(namespace))
        .is_some_and(|rest| {
            !rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

/// Split on commas outside parentheses and brackets, so `:is(a, b)` stays whole.
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts
}

#[derive(Debug, PartialEq, Eq)]
enum Item<'a> {
    /// Text outside any rule, including stray `}`.
    Text(&'a str),
    /// Everything up to and including a top-level `;`.
    Statement(&'a str),
    Block { prelude: &'a str, body: &'a str },
    /// A `{` that is never closed; kept verbatim to the end of input.
    Unterminated(&'a str),
}

fn scan(css: &str) -> Vec<Item<'_>> {
    let bytes = css.as_bytes();
    let mut items = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b';' => {
                items.push(Item::Statement(&css[start..=i]));
                i += 1;
                start = i;
            }
            b'}' => {
                items.push(Item::Text(&css[start..=i]));
                i += 1;
                start = i;
            }
            b'{' => {
                let mut depth = 1usize;
                let mut j = i + 1;
                while j < bytes.len() && depth > 0 {
                    match bytes[j] {
                        b'{' => depth += 1,
                        b'}' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                if depth > 0 {
                    items.push(Item::Unterminated(&css[start..]));
                    return items;
                }
                items.push(Item::Block {
                    prelude: &css[start..i],
                    body: &css[i + 1..j - 1],
                });
                i = j;
                start = j;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        items.push(Item::Text(&css[start..]));
    }
    items
}
