//! Test class and method extraction from PHP source text.
//!
//! This is a line-oriented heuristic, not a PHP parser: it finds the first
//! class declaration, the public `test*` methods inside it, and whether each
//! method is fed by a data provider. Brace matching for ranges skips quoted
//! strings and comments on a best-effort basis; heredocs and strings that
//! span lines can still confuse it.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?:abstract|final|readonly)\s+)*class\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("CLASS_RE regex should compile")
});

static TEST_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<attributes>(?:#\[[^\]]*\]\s*)*)(?:(?:final|static)\s+)*public\s+(?:(?:final|static)\s+)*function\s+(?P<name>test[A-Za-z0-9_]*)\s*\(",
    )
    .expect("TEST_METHOD_RE regex should compile")
});

/// Appended to ids of methods without a data provider: PHPUnit's `--filter`
/// is a regex, so this stops `testFoo` from also selecting `testFooBar`.
pub const EXACT_MATCH_SUFFIX: &str = "$";

/// Appended to ids of methods with a data provider. Matches every generated
/// case, numbered (`with data set #0`) or named (`with data set "empty"`).
pub const DATA_SET_SUFFIX: &str = " with data set .+$";

/// Separator between a file id and a method filter in method node ids.
pub const METHOD_SEPARATOR: &str = "::";

/// A 0-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// A span of source text, start inclusive, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceRange {
    pub start: Position,
    pub end: Position,
}

/// The test class found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedClass {
    pub name: String,
    pub range: SourceRange,
    pub methods: Vec<ExtractedMethod>,
}

/// A test method of an [`ExtractedClass`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMethod {
    /// Node id: `<fileId>::<name>` followed by the filter suffix.
    pub id: String,
    pub name: String,
    pub range: SourceRange,
    pub has_data_provider: bool,
}

/// Build the node id of a test method in file `file_id`.
pub fn method_id(file_id: &str, name: &str, has_data_provider: bool) -> String {
    let suffix = if has_data_provider {
        DATA_SET_SUFFIX
    } else {
        EXACT_MATCH_SUFFIX
    };
    format!("{file_id}{METHOD_SEPARATOR}{name}{suffix}")
}

/// Extract the test class of `text`, which is the content of file `file_id`.
///
/// Returns `None` when the file declares no class.
pub fn extract(text: &str, file_id: &str) -> Option<ExtractedClass> {
    let lines: Vec<&str> = text.lines().collect();

    let (class_line, name) = lines.iter().enumerate().find_map(|(i, line)| {
        CLASS_RE
            .captures(line)
            .map(|caps| (i, caps[1].to_string()))
    })?;

    let class_start = Position {
        line: class_line,
        column: 0,
    };
    let class_end = block_end(&lines, class_start);
    let range = SourceRange {
        start: class_start,
        end: class_end,
    };

    let methods = (class_line..=class_end.line.min(lines.len().saturating_sub(1)))
        .filter_map(|i| {
            // On the class line only text after the body's `{` can declare methods.
            let offset = if i == class_line {
                lines[i].find('{')? + 1
            } else {
                0
            };
            let caps = TEST_METHOD_RE.captures(&lines[i][offset..])?;
            let method_name = caps["name"].to_string();
            let has_data_provider = caps["attributes"].contains("DataProvider")
                || (i > class_line && has_data_provider(&lines, i));
            let start = Position {
                line: i,
                column: lines[i][..offset].chars().count(),
            };
            Some(ExtractedMethod {
                id: method_id(file_id, &method_name, has_data_provider),
                name: method_name,
                range: SourceRange {
                    start,
                    end: block_end(&lines, start),
                },
                has_data_provider,
            })
        })
        .collect();

    Some(ExtractedClass {
        name,
        range,
        methods,
    })
}

/// Whether the comment/attribute block right above `function_line` names a
/// data provider, either as a `@dataProvider` annotation or a
/// `#[DataProvider(...)]` attribute, which may span several lines.
fn has_data_provider(lines: &[&str], function_line: usize) -> bool {
    let mut in_doc_comment = false;
    let mut in_attribute = false;

    for line in lines[..function_line].iter().rev() {
        let trimmed = line.trim();

        if in_doc_comment {
            if trimmed.contains("@dataProvider") {
                return true;
            }
            if trimmed.contains("/*") {
                in_doc_comment = false;
            }
            continue;
        }

        if in_attribute {
            if trimmed.contains("DataProvider") {
                return true;
            }
            if trimmed.starts_with("#[") {
                in_attribute = false;
            }
            continue;
        }

        if trimmed.ends_with("*/") {
            if trimmed.contains("@dataProvider") {
                return true;
            }
            // Single-line `/** @dataProvider x */` opens and closes here.
            in_doc_comment = !trimmed.contains("/*");
            continue;
        }

        if trimmed.starts_with("#[") {
            // Attributes sharing a line with a declaration belong to it.
            if trimmed.contains("function ") {
                return false;
            }
            if trimmed.contains("DataProvider") {
                return true;
            }
            continue;
        }

        // Closing line of an attribute spanning several lines.
        if trimmed.ends_with(']') {
            if trimmed.contains("DataProvider") {
                return true;
            }
            in_attribute = true;
            continue;
        }

        if trimmed.starts_with("//") || trimmed.starts_with('#') {
            if trimmed.contains("@dataProvider") {
                return true;
            }
            continue;
        }

        return false;
    }

    false
}

/// Position just past the brace closing the block opened at or after `start`.
///
/// A declaration ending in `;` before any brace (abstract methods) ends
/// there. An unbalanced block runs to the end of the text.
fn block_end(lines: &[&str], start: Position) -> Position {
    let mut depth = 0usize;
    let mut opened = false;
    let mut in_block_comment = false;

    for (line_no, line) in lines.iter().enumerate().skip(start.line) {
        let mut quote: Option<char> = None;
        let mut chars = line.chars().enumerate().peekable();

        while let Some((column, c)) = chars.next() {
            if line_no == start.line && column < start.column {
                continue;
            }
            if in_block_comment {
                if c == '*' && chars.peek().is_some_and(|&(_, n)| n == '/') {
                    chars.next();
                    in_block_comment = false;
                }
                continue;
            }

            if let Some(q) = quote {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
                continue;
            }

            let next = chars.peek().map(|&(_, n)| n);
            match c {
                '\'' | '"' => quote = Some(c),
                '/' if next == Some('*') => {
                    chars.next();
                    in_block_comment = true;
                }
                '/' if next == Some('/') => break,
                '#' if next != Some('[') => break,
                ';' if !opened => {
                    return Position {
                        line: line_no,
                        column: column + 1,
                    };
                }
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' if opened => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Position {
                            line: line_no,
                            column: column + 1,
                        };
                    }
                }
                _ => {}
            }
        }
    }

    let last = lines.len().saturating_sub(1);
    Position {
        line: last,
        column: lines.get(last).map_or(0, |l| l.chars().count()),
    }
}
