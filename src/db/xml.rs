//! Thin view over the XML tree.
//!
//! The parser only ever sees an element's tag name, source line,
//! attributes and element children, so any conforming tree reader
//! could sit behind this surface. Text, comments and processing
//! instructions never show through.

use roxmltree::{Document, Node};

#[derive(Clone, Copy)]
pub(crate) struct Element<'a, 'input> {
    node: Node<'a, 'input>,
}

impl<'a, 'input> Element<'a, 'input> {
    pub fn root(doc: &'a Document<'input>) -> Element<'a, 'input> {
        Element {
            node: doc.root_element(),
        }
    }

    pub fn name(&self) -> &'a str {
        self.node.tag_name().name()
    }

    /// 1-based source line of the element's start tag.
    pub fn line(&self) -> u32 {
        self.node.document().text_pos_at(self.node.range().start).row
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.node.attributes().map(|attr| (attr.name(), attr.value()))
    }

    pub fn children(&self) -> impl Iterator<Item = Element<'a, 'input>> {
        self.node
            .children()
            .filter(Node::is_element)
            .map(|node| Element { node })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elements_only_with_lines() {
        let doc = Document::parse("<database>\n  <enum name=\"E\"/>\n  text\n  <!-- note -->\n  <domain/>\n</database>").unwrap();
        let root = Element::root(&doc);
        assert_eq!(root.name(), "database");
        assert_eq!(root.line(), 1);

        let children: Vec<_> = root.children().collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name(), "enum");
        assert_eq!(children[0].line(), 2);
        assert_eq!(
            children[0].attributes().collect::<Vec<_>>(),
            vec![("name", "E")]
        );
        assert_eq!(children[1].name(), "domain");
        assert_eq!(children[1].line(), 5);
    }
}
