//! Container path stripping for user-facing output.

/// Strip every occurrence of `container_prefix` (plus one trailing `/`) from `text`.
///
/// Paths printed by PHPUnit inside the container look like
/// `/var/www/tests/Unit/FooTest.php:12`; after normalization they read
/// `tests/Unit/FooTest.php:12`, relative to the workspace root.
///
/// No path semantics are applied, so a prefix that happens to occur inside an
/// unrelated token is stripped as well. Removal repeats until the text no
/// longer contains the prefix, which keeps the function idempotent even when
/// a removal splices two halves of a new occurrence together.
pub fn normalize(text: &str, container_prefix: &str) -> String {
    if container_prefix.is_empty() {
        return text.to_string();
    }

    let mut current = strip_once(text, container_prefix);
    while current.contains(container_prefix) {
        current = strip_once(&current, container_prefix);
    }
    current
}

fn strip_once(text: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(prefix) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + prefix.len()..];
        if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        }
    }
    out.push_str(rest);
    out
}
