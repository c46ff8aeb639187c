//! The discovered test tree.
//!
//! File nodes are keyed by absolute path and hold one method node per test
//! method. Method nodes are rebuilt whenever their file is resolved.

use crate::error::{DiscoveryError, ExtractionError};
use crate::extractor::{self, METHOD_SEPARATOR, SourceRange};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Access to workspace files, provided by the host.
pub trait Workspace {
    /// Files matching `include` and not matching `exclude`, in search order.
    fn find_files(&self, include: &str, exclude: &str) -> Result<Vec<PathBuf>, DiscoveryError>;

    /// Read a whole file as text.
    fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
}

impl<W: Workspace + ?Sized> Workspace for &W {
    fn find_files(&self, include: &str, exclude: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
        (**self).find_files(include, exclude)
    }

    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        (**self).read_to_string(path)
    }
}

/// Whether a node stands for a test file or a single test method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Method,
}

/// One entry of the test tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestNode {
    pub id: String,
    pub label: String,
    pub uri: PathBuf,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<SourceRange>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestNode>,
}

impl TestNode {
    /// A file node with no children yet, labeled with the file name.
    pub fn file(path: &Path) -> Self {
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id: file_id(path),
            label,
            uri: path.to_path_buf(),
            kind: NodeKind::File,
            range: None,
            children: Vec::new(),
        }
    }

    pub fn can_have_children(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// The PHPUnit `--filter` value of a method node, `None` for file nodes.
    pub fn method_filter(&self) -> Option<&str> {
        self.id
            .rsplit_once(METHOD_SEPARATOR)
            .map(|(_, filter)| filter)
    }

    /// Look up a child by id.
    pub fn child(&self, id: &str) -> Option<&TestNode> {
        self.children.iter().find(|child| child.id == id)
    }

    /// Add `child` unless a child with the same id is already present.
    fn add_child(&mut self, child: TestNode) -> bool {
        if self.child(&child.id).is_some() {
            return false;
        }
        self.children.push(child);
        true
    }
}

/// Id of the file node for `path`.
pub fn file_id(path: &Path) -> String {
    path.display().to_string()
}

/// Owns the test tree and keeps it in sync with the workspace.
pub struct TestTreeRegistry<W> {
    workspace: W,
    include: String,
    exclude: String,
    nodes: HashMap<String, TestNode>,
    order: Vec<String>,
}

impl<W: Workspace> TestTreeRegistry<W> {
    pub fn new(workspace: W, include: impl Into<String>, exclude: impl Into<String>) -> Self {
        Self {
            workspace,
            include: include.into(),
            exclude: exclude.into(),
            nodes: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Rebuild the whole tree from a fresh file search.
    ///
    /// Returns the number of file nodes. Files that fail to parse stay in the
    /// tree without children; only a failing search aborts.
    pub fn discover_all(&mut self) -> Result<usize, DiscoveryError> {
        info!("Starting test discovery");
        info!(pattern = %self.include, exclude = %self.exclude, "Using test file pattern");

        self.nodes.clear();
        self.order.clear();

        let files = self.workspace.find_files(&self.include, &self.exclude)?;
        info!("Found {} test files", files.len());

        for file in &files {
            self.add_for_file(file);
        }
        Ok(self.order.len())
    }

    /// Insert a file node for `path` and resolve its methods.
    ///
    /// An existing node with the same id is replaced in place.
    pub fn add_for_file(&mut self, path: &Path) {
        info!(path = %path.display(), "Adding test file");
        let mut node = TestNode::file(path);
        self.resolve(&mut node);

        if !self.nodes.contains_key(&node.id) {
            self.order.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    /// Re-resolve the node for `path`, adding it if it is not known yet.
    pub fn update_for_file(&mut self, path: &Path) {
        info!(path = %path.display(), "Updating test file");
        if !self.resolve_children_of(&file_id(path)) {
            self.add_for_file(path);
        }
    }

    /// Drop the node for `path`. Unknown paths are ignored.
    pub fn remove_for_file(&mut self, path: &Path) {
        info!(path = %path.display(), "Removing test file");
        let id = file_id(path);
        if self.nodes.remove(&id).is_some() {
            self.order.retain(|known| known != &id);
        }
    }

    /// Re-read the file behind node `id` and replace its children.
    ///
    /// Returns `false` when no file node has that id.
    pub fn resolve_children_of(&mut self, id: &str) -> bool {
        let Some(mut node) = self.nodes.remove(id) else {
            return false;
        };
        self.resolve(&mut node);
        self.nodes.insert(id.to_string(), node);
        true
    }

    /// File nodes in discovery order.
    pub fn roots(&self) -> impl Iterator<Item = &TestNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Look up a node by id, at either level.
    pub fn get(&self, id: &str) -> Option<&TestNode> {
        if let Some(node) = self.nodes.get(id) {
            return Some(node);
        }
        let (file, _) = id.rsplit_once(METHOD_SEPARATOR)?;
        self.nodes.get(file)?.child(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Replace `node`'s children with the methods currently in its file.
    fn resolve(&self, node: &mut TestNode) {
        node.children.clear();
        if let Err(e) = self.populate(node) {
            warn!("Error parsing test file: {e}");
        }
    }

    fn populate(&self, node: &mut TestNode) -> Result<(), ExtractionError> {
        debug!(path = %node.uri.display(), "Resolving methods for test file");
        let text = self
            .workspace
            .read_to_string(&node.uri)
            .map_err(|source| ExtractionError::Read {
                path: node.uri.clone(),
                source,
            })?;

        let Some(class) = extractor::extract(&text, &node.id) else {
            debug!(path = %node.uri.display(), "No test class found");
            node.range = None;
            return Ok(());
        };

        debug!("Found test class: {}", class.name);
        node.label = class.name;
        node.range = Some(class.range);

        for method in class.methods {
            debug!("Found test method: {}", method.name);
            let child = TestNode {
                id: method.id,
                label: method.name,
                uri: node.uri.clone(),
                kind: NodeKind::Method,
                range: Some(method.range),
                children: Vec::new(),
            };
            if !node.add_child(child) {
                warn!(path = %node.uri.display(), "Skipping duplicate test method");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// Workspace backed by an in-memory file map.
    #[derive(Default)]
    pub(crate) struct MemoryWorkspace {
        pub files: RefCell<BTreeMap<PathBuf, String>>,
        pub unreadable: RefCell<Vec<PathBuf>>,
    }

    impl MemoryWorkspace {
        pub fn with(files: &[(&str, &str)]) -> Self {
            let ws = Self::default();
            for (path, text) in files {
                ws.write(path, text);
            }
            ws
        }

        pub fn write(&self, path: &str, text: &str) {
            self.files
                .borrow_mut()
                .insert(PathBuf::from(path), text.to_string());
        }
    }

    impl Workspace for MemoryWorkspace {
        fn find_files(&self, _include: &str, _exclude: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
            Ok(self.files.borrow().keys().cloned().collect())
        }

        fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
            if self.unreadable.borrow().iter().any(|p| p == path) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "denied",
                ));
            }
            self.files
                .borrow()
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }

    pub(crate) const FOO_TEST: &str = r#"<?php
class FooTest extends TestCase
{
    public function testOne() {}

    /**
     * @dataProvider cases
     */
    public function testTwo($x) {}
}
"#;

    const BAR_TEST: &str = "<?php\nclass BarTest extends TestCase\n{\n    public function testBar() {}\n}\n";

    fn registry(ws: &MemoryWorkspace) -> TestTreeRegistry<&MemoryWorkspace> {
        TestTreeRegistry::new(ws, "**/*Test.php", "**/vendor/**")
    }

    #[test]
    fn discovers_files_and_methods() {
        let ws = MemoryWorkspace::with(&[
            ("/w/tests/BarTest.php", BAR_TEST),
            ("/w/tests/FooTest.php", FOO_TEST),
        ]);
        let mut tree = registry(&ws);

        assert_eq!(tree.discover_all().unwrap(), 2);

        let roots: Vec<_> = tree.roots().collect();
        assert_eq!(roots[0].label, "BarTest");
        assert_eq!(roots[1].label, "FooTest");
        assert!(roots[1].can_have_children());

        let foo = tree.get("/w/tests/FooTest.php").unwrap();
        let ids: Vec<_> = foo.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "/w/tests/FooTest.php::testOne$",
                "/w/tests/FooTest.php::testTwo with data set .+$",
            ]
        );
        for child in &foo.children {
            assert!(child.id.starts_with(&format!("{}::", foo.id)));
            assert_eq!(child.uri, foo.uri);
            assert!(!child.can_have_children());
        }
        assert_eq!(foo.range.unwrap().start.line, 1);
    }

    #[test]
    fn class_without_tests_keeps_a_childless_node() {
        let ws = MemoryWorkspace::with(&[("/w/FooTest.php", "<?php\nclass Foo\n{\n}\n")]);
        let mut tree = registry(&ws);
        tree.discover_all().unwrap();

        let node = tree.get("/w/FooTest.php").unwrap();
        assert_eq!(node.label, "Foo");
        assert!(node.children.is_empty());
        assert!(node.can_have_children());
    }

    #[test]
    fn file_without_class_keeps_its_file_name() {
        let ws = MemoryWorkspace::with(&[("/w/HelperTest.php", "<?php\nreturn [];\n")]);
        let mut tree = registry(&ws);
        tree.discover_all().unwrap();

        let node = tree.get("/w/HelperTest.php").unwrap();
        assert_eq!(node.label, "HelperTest.php");
        assert!(node.range.is_none());
        assert!(node.children.is_empty());
    }

    #[test]
    fn removing_the_class_clears_children_and_range() {
        let ws = MemoryWorkspace::with(&[("/w/FooTest.php", FOO_TEST)]);
        let mut tree = registry(&ws);
        tree.discover_all().unwrap();
        assert!(tree.get("/w/FooTest.php").unwrap().range.is_some());

        ws.write("/w/FooTest.php", "<?php
return [];
");
        assert!(tree.resolve_children_of("/w/FooTest.php"));

        let node = tree.get("/w/FooTest.php").unwrap();
        assert_eq!(node.label, "FooTest");
        assert!(node.range.is_none());
        assert!(node.children.is_empty());
    }

    #[test]
    fn unreadable_file_does_not_abort_discovery() {
        let ws = MemoryWorkspace::with(&[
            ("/w/ATest.php", BAR_TEST),
            ("/w/BTest.php", FOO_TEST),
        ]);
        ws.unreadable.borrow_mut().push(PathBuf::from("/w/ATest.php"));
        let mut tree = registry(&ws);

        assert_eq!(tree.discover_all().unwrap(), 2);
        assert!(tree.get("/w/ATest.php").unwrap().children.is_empty());
        assert_eq!(tree.get("/w/BTest.php").unwrap().children.len(), 2);
    }

    #[test]
    fn rediscovery_is_stable() {
        let ws = MemoryWorkspace::with(&[
            ("/w/BarTest.php", BAR_TEST),
            ("/w/FooTest.php", FOO_TEST),
        ]);
        let mut tree = registry(&ws);

        tree.discover_all().unwrap();
        let first: Vec<TestNode> = tree.roots().cloned().collect();
        tree.discover_all().unwrap();
        let second: Vec<TestNode> = tree.roots().cloned().collect();

        assert_eq!(first, second);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn update_replaces_children() {
        let ws = MemoryWorkspace::with(&[("/w/FooTest.php", FOO_TEST)]);
        let mut tree = registry(&ws);
        tree.discover_all().unwrap();

        ws.write("/w/FooTest.php", BAR_TEST);
        tree.update_for_file(Path::new("/w/FooTest.php"));

        let node = tree.get("/w/FooTest.php").unwrap();
        assert_eq!(node.label, "BarTest");
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].label, "testBar");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn repeated_resolution_never_duplicates_children() {
        let ws = MemoryWorkspace::with(&[("/w/FooTest.php", FOO_TEST)]);
        let mut tree = registry(&ws);
        tree.discover_all().unwrap();

        assert!(tree.resolve_children_of("/w/FooTest.php"));
        assert!(tree.resolve_children_of("/w/FooTest.php"));
        tree.update_for_file(Path::new("/w/FooTest.php"));

        assert_eq!(tree.get("/w/FooTest.php").unwrap().children.len(), 2);
        assert!(!tree.resolve_children_of("/w/Missing.php"));
    }

    #[test]
    fn update_of_unknown_file_adds_it() {
        let ws = MemoryWorkspace::with(&[("/w/FooTest.php", FOO_TEST)]);
        let mut tree = registry(&ws);

        tree.update_for_file(Path::new("/w/FooTest.php"));

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get("/w/FooTest.php").unwrap().children.len(), 2);
    }

    #[test]
    fn add_and_remove_preserve_order() {
        let ws = MemoryWorkspace::with(&[
            ("/w/ATest.php", BAR_TEST),
            ("/w/BTest.php", BAR_TEST),
        ]);
        let mut tree = registry(&ws);
        tree.discover_all().unwrap();

        ws.write("/w/CTest.php", FOO_TEST);
        tree.add_for_file(Path::new("/w/CTest.php"));
        tree.remove_for_file(Path::new("/w/ATest.php"));
        tree.remove_for_file(Path::new("/w/NotThere.php"));

        let ids: Vec<_> = tree.roots().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["/w/BTest.php", "/w/CTest.php"]);
        assert!(tree.get("/w/ATest.php").is_none());
    }

    #[test]
    fn method_nodes_are_reachable_by_id() {
        let ws = MemoryWorkspace::with(&[("/w/FooTest.php", FOO_TEST)]);
        let mut tree = registry(&ws);
        tree.discover_all().unwrap();

        let method = tree.get("/w/FooTest.php::testOne$").unwrap();
        assert_eq!(method.label, "testOne");
        assert_eq!(method.method_filter(), Some("testOne$"));
        assert_eq!(tree.get("/w/FooTest.php").unwrap().method_filter(), None);
    }
}
