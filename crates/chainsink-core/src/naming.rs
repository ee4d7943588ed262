//! Physical table naming.
//!
//! Entity kinds are PascalCase type names; their table is the snake_case
//! plural. Hot-supported tables materialize as a `{network}_hot_{name}` /
//! `{network}_cold_{name}` pair, regular tables as `{network}_{name}`.

/// Convert a PascalCase kind to its snake_case plural table base name.
///
/// `TokenTransfer` → `token_transfers`, `Entry` → `entries`,
/// `SwapIndex` → `swap_indexes`.
pub fn table_base(kind: &str) -> String {
    pluralize(&to_snake_case(kind))
}

/// PascalCase / camelCase → snake_case. Consecutive capitals are treated as
/// an acronym and kept together (`ERC20Transfer` → `erc20_transfer`).
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if i > 0 && (prev_lower || (chars[i - 1].is_uppercase() && next_lower)) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        let vowel_before = stem
            .chars()
            .last()
            .is_some_and(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'));
        if !vowel_before {
            return format!("{stem}ies");
        }
    }
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }
    format!("{word}s")
}

/// `{network}_hot_{base}` — mutable zone of a hot-supported table.
pub fn hot_table(network: &str, base: &str) -> String {
    format!("{network}_hot_{base}")
}

/// `{network}_cold_{base}` — append-only zone of a hot-supported table.
pub fn cold_table(network: &str, base: &str) -> String {
    format!("{network}_cold_{base}")
}

/// `{network}_{base}` — a regular table, never routed.
pub fn plain_table(network: &str, base: &str) -> String {
    format!("{network}_{base}")
}
