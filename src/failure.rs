//! PHPUnit failure output parsing.
//!
//! Turns the text PHPUnit prints for a failing run into discrete messages,
//! each anchored to the most specific `file.php:line` found in its block.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Numbered failure block marker (`1) FooTest::testBar`).
static BLOCK_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\d+\)").expect("BLOCK_MARKER_RE regex should compile"));

/// Source location evidence inside a block (`/var/www/tests/FooTest.php:42`).
static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\S+\.php):(\d+)").expect("LOCATION_RE regex should compile")
});

/// Separator between a message's one-line summary and its full block.
const SUMMARY_SEPARATOR: &str = "\n\n\n";

/// Used when a failed invocation left no output and no error message.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Test execution failed";

/// A position in a test file. Lines are 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub uri: PathBuf,
    pub line: usize,
}

/// One reported problem from a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureMessage {
    pub text: String,
    pub location: Location,
}

impl FailureMessage {
    /// The short summary line, without the full block that follows it.
    pub fn summary(&self) -> &str {
        self.text
            .split_once(SUMMARY_SEPARATOR)
            .map_or(self.text.as_str(), |(summary, _)| summary)
    }
}

/// Output captured from a remote invocation that did not succeed.
///
/// Any field may be missing: a process that could not be spawned has a
/// message but no streams, a killed one may have partial streams only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecFailure {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub message: Option<String>,
}

/// Collapse a failed invocation into the single text shown to the user.
///
/// stdout comes first, then stderr. A newline is inserted between them only
/// when stdout does not already end with one. Without any stream output the
/// error message is used, and without that a fixed default.
pub fn combine_streams(failure: &ExecFailure) -> String {
    let stdout = failure.stdout.as_deref().unwrap_or_default();
    let stderr = failure.stderr.as_deref().unwrap_or_default();

    let mut output = String::with_capacity(stdout.len() + stderr.len() + 1);
    output.push_str(stdout);
    if !stdout.is_empty() && !stderr.is_empty() && !stdout.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(stderr);

    if output.is_empty() {
        output = failure
            .message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_FAILURE_MESSAGE)
            .to_string();
    }
    output
}

/// Split raw PHPUnit output into failure messages for the test at `test_uri`.
///
/// Always returns at least one message. Locations always point into
/// `test_uri`: the path printed by PHPUnit is container-side and is only used
/// for its line number.
pub fn parse(raw_output: &str, test_uri: &Path) -> Vec<FailureMessage> {
    let mut blocks: Vec<&str> = BLOCK_MARKER_RE
        .split(raw_output)
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .collect();

    // "There were 2 failures:" and similar headers carry no location.
    if blocks.len() > 1 && !LOCATION_RE.is_match(blocks[0]) {
        blocks.remove(0);
    }

    if blocks.is_empty() {
        return vec![FailureMessage {
            text: raw_output.to_string(),
            location: Location {
                uri: test_uri.to_path_buf(),
                line: 0,
            },
        }];
    }

    blocks
        .into_iter()
        .map(|block| parse_block(block, test_uri))
        .collect()
}

fn parse_block(block: &str, test_uri: &Path) -> FailureMessage {
    let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
    // First line names the test, the second is what went wrong.
    let summary = lines.get(1).or(lines.first()).copied().unwrap_or_default();

    FailureMessage {
        text: format!("{summary}{SUMMARY_SEPARATOR}{block}"),
        location: Location {
            uri: test_uri.to_path_buf(),
            line: find_line(block).unwrap_or(0),
        },
    }
}

/// 0-based line of the first `something.php:N` in `block`.
fn find_line(block: &str) -> Option<usize> {
    let caps = LOCATION_RE.captures(block)?;
    let line: usize = caps[2].parse().ok()?;
    Some(line.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> PathBuf {
        PathBuf::from("/path/to/test.php")
    }

    #[test]
    fn parses_numbered_blocks() {
        let output = "
1) TestClass::testMethod
Some error message
/path/to/test.php:25
Some additional context

2) TestClass::anotherTest
Another error occurred
/path/to/test.php:42
More details here
";
        let messages = parse(output, &uri());

        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0].text,
            "Some error message\n\n\nTestClass::testMethod\nSome error message\n/path/to/test.php:25\nSome additional context"
        );
        assert_eq!(
            messages[1].text,
            "Another error occurred\n\n\nTestClass::anotherTest\nAnother error occurred\n/path/to/test.php:42\nMore details here"
        );
        assert_eq!(messages[0].location.line, 24);
        assert_eq!(messages[1].location.line, 41);
        assert_eq!(messages[0].summary(), "Some error message");
    }

    #[test]
    fn output_without_blocks_becomes_one_message() {
        let output = "General error occurred without line numbers";
        let messages = parse(output, &uri());

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, format!("{output}\n\n\n{output}"));
        assert_eq!(messages[0].location.line, 0);
        assert_eq!(messages[0].location.uri, uri());
    }

    #[test]
    fn empty_output_yields_one_empty_message() {
        let messages = parse("", &uri());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "");
        assert_eq!(messages[0].location.line, 0);

        let messages = parse("  \n\n ", &uri());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "  \n\n ");
    }

    #[test]
    fn skips_summary_header() {
        let output = "
There were 2 failures:

1) TestClass::testMethod
Some error message
/path/to/test.php:25

2) TestClass::anotherTest
Another error
/path/to/test.php:42
";
        let messages = parse(output, &uri());

        assert_eq!(messages.len(), 2);
        assert!(messages[0].text.contains("Some error message"));
        assert!(messages[1].text.contains("Another error"));
    }

    #[test]
    fn single_located_failure_after_header() {
        let output = "There was 1 failure:\n\n1) FooTest::testBar\nFailed asserting that false is true.\n\n/path/Test.php:42\n";
        let messages = parse(output, &uri());

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].location.line, 41);
        assert_eq!(messages[0].summary(), "Failed asserting that false is true.");
    }

    #[test]
    fn keeps_header_when_it_has_a_location() {
        let output = "PHP Warning in /var/www/bootstrap.php:3\n1) FooTest::testBar\nboom\n";
        let messages = parse(output, &uri());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].location.line, 2);
        assert_eq!(messages[1].location.line, 0);
    }

    #[test]
    fn location_is_anchored_to_the_test_file() {
        let output = "1) FooTest::testBar\nboom\n/var/www/tests/FooTest.php:7\n";
        let messages = parse(output, Path::new("/home/me/project/tests/FooTest.php"));

        assert_eq!(
            messages[0].location,
            Location {
                uri: PathBuf::from("/home/me/project/tests/FooTest.php"),
                line: 6,
            }
        );
    }

    #[test]
    fn single_line_block_uses_its_only_line() {
        let messages = parse("1) FooTest::testBar\n", &uri());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].summary(), "FooTest::testBar");
    }

    #[test]
    fn line_one_maps_to_zero() {
        let messages = parse("1) A::testB\nfail\n/x/ATest.php:1\n", &uri());
        assert_eq!(messages[0].location.line, 0);
    }

    #[test]
    fn combines_stdout_and_stderr() {
        let failure = ExecFailure {
            stdout: Some("Standard output\n".to_string()),
            stderr: Some("Error output".to_string()),
            message: None,
        };
        assert_eq!(combine_streams(&failure), "Standard output\nError output");
    }

    #[test]
    fn separates_unterminated_stdout_from_stderr() {
        let failure = ExecFailure {
            stdout: Some("A".to_string()),
            stderr: Some("B".to_string()),
            message: Some("ignored".to_string()),
        };
        assert_eq!(combine_streams(&failure), "A\nB");
    }

    #[test]
    fn combines_single_stream() {
        let stdout_only = ExecFailure {
            stdout: Some("Standard output".to_string()),
            ..Default::default()
        };
        assert_eq!(combine_streams(&stdout_only), "Standard output");

        let stderr_only = ExecFailure {
            stderr: Some("Error output".to_string()),
            ..Default::default()
        };
        assert_eq!(combine_streams(&stderr_only), "Error output");
    }

    #[test]
    fn falls_back_to_message_then_default() {
        let message_only = ExecFailure {
            stdout: Some(String::new()),
            message: Some("Error message".to_string()),
            ..Default::default()
        };
        assert_eq!(combine_streams(&message_only), "Error message");

        assert_eq!(
            combine_streams(&ExecFailure::default()),
            "Test execution failed"
        );
    }
}
