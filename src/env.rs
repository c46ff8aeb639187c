//! `${var}` interpolation for settings values.
//!
//! Debug configurations written for editors refer to `${workspaceFolder}`;
//! the same syntax also reaches into the process environment.

use std::collections::BTreeMap;

/// Expand `${NAME}` references in `s`.
///
/// Names are looked up in `vars` first, then in the process environment.
/// A reference to an unknown name, or an unterminated `${`, is an error.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// let vars = BTreeMap::from([("workspaceFolder".to_string(), "/work".to_string())]);
/// assert_eq!(
///     phpunit_docker::env::interpolate_env_with("${workspaceFolder}/src", &vars).unwrap(),
///     "/work/src"
/// );
/// ```
pub fn interpolate_env_with(s: &str, vars: &BTreeMap<String, String>) -> Result<String, String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();

        let mut name = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(c) => name.push(c),
                None => return Err(format!("Unclosed variable reference: ${{{name}")),
            }
        }

        let value = vars
            .get(&name)
            .cloned()
            .or_else(|| std::env::var(&name).ok())
            .ok_or_else(|| format!("Variable '{name}' is not set"))?;
        result.push_str(&value);
    }

    Ok(result)
}
