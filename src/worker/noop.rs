//! Semantic no-op detection for JS/TS output.
//!
//! Printers often wrap a rewritten expression in parentheses (`return (\n
//! <div/>\n);`) even when the transform changed nothing else. Such output is
//! not a real change and must not produce an update.

/// Canonicalizes source text so superficial differences compare equal.
pub trait SourceNormalizer: Send + Sync {
    /// Canonical form of `source`, or `None` if it cannot be normalized.
    fn normalize(&self, source: &str) -> Option<String>;

    /// Whether both sources normalize to the same text. Unnormalizable
    /// input is never equivalent.
    fn is_equivalent(&self, left: &str, right: &str) -> bool {
        match (self.normalize(left), self.normalize(right)) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }
}

/// Removes redundant parentheses around expressions that follow `return`,
/// `=` or `=>` and end a statement, list element or block.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParenthesisNormalizer;

impl ParenthesisNormalizer {
    /// Nested redundant pairs unwrap one level per pass.
    const MAX_PASSES: usize = 8;
}

impl SourceNormalizer for ParenthesisNormalizer {
    fn normalize(&self, source: &str) -> Option<String> {
        let mut current = source.to_string();
        for _ in 0..Self::MAX_PASSES {
            let next = strip_redundant_parens(&current)?;
            if next == current {
                break;
            }
            current = next;
        }
        Some(current)
    }
}

fn strip_redundant_parens(source: &str) -> Option<String> {
    let chars: Vec<char> = source.chars().collect();
    let code = code_mask(&chars);

    let mut stack = Vec::new();
    let mut pairs = Vec::new();
    for (i, c) in chars.iter().enumerate() {
        if !code[i] {
            continue;
        }
        match c {
            '(' => stack.push(i),
            ')' => pairs.push((stack.pop()?, i)),
            _ => {}
        }
    }
    if !stack.is_empty() {
        return None;
    }

    let mut removed = vec![false; chars.len()];
    let mut spaced = vec![false; chars.len()];
    for (open, close) in pairs {
        if !follows_expression_slot(&chars, open)
            || !ends_expression(&chars, close)
            || needs_parens(&chars, &code, open, close)
        {
            continue;
        }

        if open > 0 && !chars[open - 1].is_whitespace() {
            spaced[open] = true;
        } else {
            removed[open] = true;
        }
        removed[close] = true;

        let mut i = open + 1;
        while i < close && chars[i].is_whitespace() {
            removed[i] = true;
            i += 1;
        }
        let mut j = close;
        while j > i && chars[j - 1].is_whitespace() {
            j -= 1;
            removed[j] = true;
        }
    }

    let normalized = chars
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            if spaced[i] {
                Some(' ')
            } else if removed[i] {
                None
            } else {
                Some(*c)
            }
        })
        .collect();
    Some(normalized)
}

/// `true` for characters outside string literals and comments.
fn code_mask(chars: &[char]) -> Vec<bool> {
    let len = chars.len();
    let mut mask = vec![true; len];
    let mut i = 0;

    while i < len {
        match chars[i] {
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < len && chars[i] != '\n' {
                    mask[i] = false;
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = i;
                i += 2;
                while i < len && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                let end = (i + 2).min(len);
                mask[start..end].iter_mut().for_each(|m| *m = false);
                i = end;
            }
            quote @ ('"' | '\'' | '`') => {
                mask[i] = false;
                i += 1;
                while i < len {
                    mask[i] = false;
                    if chars[i] == '\\' {
                        if i + 1 < len {
                            mask[i + 1] = false;
                        }
                        i += 2;
                        continue;
                    }
                    i += 1;
                    if chars[i - 1] == quote {
                        break;
                    }
                }
            }
            _ => i += 1,
        }
    }
    mask
}

fn follows_expression_slot(chars: &[char], open: usize) -> bool {
    let Some(k) = (0..open).rev().find(|&k| !chars[k].is_whitespace()) else {
        return false;
    };

    match chars[k] {
        '>' => k > 0 && chars[k - 1] == '=',
        '=' => k == 0 || !matches!(chars[k - 1], '=' | '!' | '<' | '>'),
        'n' => {
            let keyword: Vec<char> = "return".chars().collect();
            k + 1 >= keyword.len()
                && chars[k + 1 - keyword.len()..=k] == keyword[..]
                && (k + 1 == keyword.len() || !is_identifier_char(chars[k - keyword.len()]))
        }
        _ => false,
    }
}

fn ends_expression(chars: &[char], close: usize) -> bool {
    match chars[close + 1..].iter().find(|c| !c.is_whitespace()) {
        None => true,
        Some(c) => matches!(c, ';' | ',' | ')' | '}' | ']'),
    }
}

/// Contents whose meaning depends on the parentheses: a leading `{`
/// (object literal, not a block or label), a leading `function`/`class`
/// (expression, not a declaration) or a top-level comma (sequence, not a
/// list of declarators or arguments).
fn needs_parens(chars: &[char], code: &[bool], open: usize, close: usize) -> bool {
    let Some(start) = (open + 1..close).find(|&i| !chars[i].is_whitespace()) else {
        return false;
    };
    if chars[start] == '{'
        || starts_with_keyword(chars, start, "function")
        || starts_with_keyword(chars, start, "class")
    {
        return true;
    }

    let mut depth = 0usize;
    for i in start..close {
        if !code[i] {
            continue;
        }
        match chars[i] {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

fn starts_with_keyword(chars: &[char], start: usize, keyword: &str) -> bool {
    let mut end = start;
    for expected in keyword.chars() {
        if chars.get(end) != Some(&expected) {
            return false;
        }
        end += 1;
    }
    chars.get(end).map_or(true, |c| !is_identifier_char(*c))
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
