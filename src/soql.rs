//! SOQL helpers.

/// The object a SOQL statement selects from: the token after the top-level
/// `FROM`. Subqueries in the field list are skipped.
pub fn soql_object_name(soql: &str) -> Option<&str> {
    let mut depth: i32 = 0;
    let mut tokens = soql.split_whitespace();
    while let Some(token) = tokens.next() {
        if depth == 0 && token.eq_ignore_ascii_case("from") {
            return tokens
                .next()
                .map(|name| name.trim_end_matches([';', ')']))
                .filter(|name| !name.is_empty());
        }
        depth += token.matches('(').count() as i32;
        depth -= token.matches(')').count() as i32;
    }
    None
}
