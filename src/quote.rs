//! Identifier and literal quoting for generated SQL

/// NAMEDATALEN - 1
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Cut `name` so that `name + suffix` fits in an identifier, on a char boundary
pub fn fit_identifier(name: &str, suffix: &str) -> String {
    let budget = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len());
    let mut cut = name.len().min(budget);
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &name[..cut], suffix)
}

/// Quote an identifier. Always quoted, embedded `"` doubled.
pub fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."name"`
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", ident(schema), ident(name))
}

/// Quote a string literal, embedded `'` doubled.
pub fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Split a possibly-quoted, possibly-qualified name as PostgreSQL prints it
/// (`public.t`, `"My Schema"."t_id_seq"`, `t_id_seq`).
pub fn parse_qualified(input: &str, default_schema: &str) -> (String, String) {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.trim().chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            '.' if !quoted => parts.push(std::mem::take(&mut current)),
            _ if quoted => current.push(c),
            _ => current.push(c.to_ascii_lowercase()),
        }
    }
    parts.push(current);

    match parts.len() {
        1 => (default_schema.to_string(), parts.remove(0)),
        _ => {
            let name = parts.pop().unwrap_or_default();
            let schema = parts.pop().unwrap_or_default();
            (schema, name)
        }
    }
}
