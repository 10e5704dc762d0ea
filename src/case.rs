//! Identifier case conversion: relation names are camelCase, storage names snake_case.

/// Convert a single identifier from snake_case (or a path rule like "/by_name") to camelCase.
/// e.g. "user_id" -> "userId", "/rating" -> "rating"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' || c == '-' || c == '/' {
            capitalize_next = !out.is_empty();
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a single identifier from camelCase to snake_case.
/// e.g. "userId" -> "user_id", "createdAt" -> "created_at"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case() {
        assert_eq!(to_camel_case("user_id"), "userId");
        assert_eq!(to_camel_case("/rating"), "rating");
        assert_eq!(to_camel_case("/by_year/top"), "byYearTop");
        assert_eq!(to_camel_case("instances"), "instances");
    }

    #[test]
    fn snake_case() {
        assert_eq!(to_snake_case("yearPublished"), "year_published");
        assert_eq!(to_snake_case("id"), "id");
    }
}
