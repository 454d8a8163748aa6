/// Replace `${ENV_VAR}` placeholders with values from the process environment.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Replace `${NAME}` placeholders using `lookup`.
pub fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => result.push_str(&value),
                    None => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            // Malformed or empty placeholder: emit literally and move on.
            _ => {
                result.push_str("${");
                rest = after;
            },
        }
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "CHATMAP_TEST_KEY" => Some("hello".into()),
            "REDIS" => Some("db:6379".into()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_with("key=${CHATMAP_TEST_KEY}", lookup),
            "key=hello"
        );
    }

    #[test]
    fn substitutes_several_vars() {
        assert_eq!(
            substitute_with("${CHATMAP_TEST_KEY}@${REDIS}/x", lookup),
            "hello@db:6379/x"
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_with("${CHATMAP_NONEXISTENT_XYZ}", lookup),
            "${CHATMAP_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn malformed_placeholders_are_literal() {
        assert_eq!(substitute_with("a ${ b", lookup), "a ${ b");
        assert_eq!(substitute_with("${}", lookup), "${}");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
