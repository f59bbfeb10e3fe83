//! Document ingestion: raw enum/bitset/group/domain trees built from
//! the XML surface, merged by name across files.
//!
//! Parsing never aborts. Anything malformed is diagnosed with its
//! `file:line`, latched on the database's sticky flag, and skipped;
//! the rest of the document still loads.

use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::Document;

use crate::db::xml::Element;
use crate::db::{
    Access, Bitfield, Bitset, Database, Delem, Domain, ElementKind, Enum, Group, RegisterWidth,
    TypeInfo, TypeKind, TypeRef, Value, VariantInfo,
};
use crate::error::Error;

impl Database {
    /// Load a database document from disk, following its `<import>`s.
    ///
    /// Loading is idempotent per resolved path, which also breaks
    /// import cycles. Failures are diagnosed and latched; whatever can
    /// be parsed still is.
    pub fn load_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if self.files.iter().any(|f| f == path) {
            return;
        }
        self.files.push(path.to_path_buf());
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                self.report(Error::IoOpen {
                    path: path.to_path_buf(),
                    detail: err.to_string(),
                });
                return;
            }
        };
        self.parse_document(path, &text);
    }

    /// Load a document held in memory. `label` stands in for the file
    /// name in diagnostics and as the base for relative imports.
    pub fn load_str(&mut self, label: impl AsRef<Path>, text: &str) {
        let label = label.as_ref();
        if !self.files.iter().any(|f| f == label) {
            self.files.push(label.to_path_buf());
        }
        self.parse_document(label, text);
    }

    fn parse_document(&mut self, file: &Path, text: &str) {
        let doc = match Document::parse(text) {
            Ok(doc) => doc,
            Err(err) => {
                self.report(Error::IoOpen {
                    path: file.to_path_buf(),
                    detail: err.to_string(),
                });
                return;
            }
        };
        Parser { db: self, file }.document(&doc);
    }
}

struct Parser<'a> {
    db: &'a mut Database,
    file: &'a Path,
}

/// What came out of trying an element as a domain element.
enum DelemOutcome {
    Parsed(Delem),
    /// It was a domain element tag, but invalid; already diagnosed.
    Failed,
    NotDelem,
}

/// Documentation tags are accepted and ignored everywhere.
fn is_doc(el: &Element) -> bool {
    matches!(el.name(), "brief" | "doc")
}

/// Numeric attributes are hexadecimal whenever the literal mentions an
/// `x`, decimal otherwise. Trailing garbage fails the parse.
fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.contains(['x', 'X']) {
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        u64::from_str_radix(digits, 16).ok()
    } else {
        text.parse().ok()
    }
}

impl Parser<'_> {
    fn document(&mut self, doc: &Document) {
        let root = Element::root(doc);
        if root.name() != "database" {
            self.syntax(root.line(), format!("wrong top-level tag <{}>", root.name()));
            return;
        }
        for child in root.children() {
            if !self.try_top(&child) && !is_doc(&child) {
                self.syntax(
                    child.line(),
                    format!("wrong tag in database: <{}>", child.name()),
                );
            }
        }
    }

    fn syntax(&mut self, line: u32, message: String) {
        let context = format!("{}:{line}", self.file.display());
        self.db.report(Error::Syntax { context, message });
    }

    fn schema(&mut self, line: u32, message: String) {
        let context = format!("{}:{line}", self.file.display());
        self.db.report(Error::Schema { context, message });
    }

    fn try_top(&mut self, el: &Element) -> bool {
        match el.name() {
            "enum" => self.parse_enum(el),
            "bitset" => self.parse_bitset(el),
            "group" => self.parse_group(el),
            "domain" => self.parse_domain(el),
            "import" => self.parse_import(el),
            _ => return false,
        }
        true
    }

    fn bool_attr(&mut self, el: &Element, name: &str, text: &str) -> bool {
        match text {
            "yes" | "1" => true,
            "no" | "0" => false,
            _ => {
                self.syntax(
                    el.line(),
                    format!("invalid boolean value \"{text}\" in attribute \"{name}\""),
                );
                false
            }
        }
    }

    fn num_attr(&mut self, el: &Element, name: &str, text: &str) -> u64 {
        match parse_number(text) {
            Some(value) => value,
            None => {
                self.syntax(
                    el.line(),
                    format!("invalid numeric value \"{text}\" in attribute \"{name}\""),
                );
                0
            }
        }
    }

    /// Attributes shared by every type-bearing element.
    fn try_type_attr(&mut self, el: &Element, name: &str, text: &str, ti: &mut TypeInfo) -> bool {
        match name {
            "shr" => ti.shr = self.num_attr(el, name, text),
            "min" => ti.min = Some(self.num_attr(el, name, text)),
            "max" => ti.max = Some(self.num_attr(el, name, text)),
            "align" => ti.align = Some(self.num_attr(el, name, text)),
            "type" => {
                for word in text.split_whitespace() {
                    ti.types.push(TypeRef {
                        name: word.to_string(),
                        kind: TypeKind::Other,
                    });
                }
            }
            _ => return false,
        }
        true
    }

    /// Child tags shared by every type-bearing element.
    fn try_type_tag(&mut self, el: &Element, ti: &mut TypeInfo) -> bool {
        match el.name() {
            "value" => {
                if let Some(val) = self.parse_value(el) {
                    ti.vals.push(val);
                }
            }
            "bitfield" => {
                if let Some(bf) = self.parse_bitfield(el) {
                    ti.bitfields.push(bf);
                }
            }
            _ => return false,
        }
        true
    }

    fn parse_value(&mut self, el: &Element) -> Option<Value> {
        let mut val = Value::default();
        let mut named = false;
        for (name, text) in el.attributes() {
            match name {
                "name" => {
                    val.name = text.to_string();
                    named = true;
                }
                "value" => val.value = Some(self.num_attr(el, name, text)),
                "varset" => val.varinfo.varset_name = Some(text.to_string()),
                "variants" => val.varinfo.variants_expr = Some(text.to_string()),
                _ => self.syntax(el.line(), format!("wrong attribute \"{name}\" for value")),
            }
        }
        for child in el.children() {
            if !self.try_top(&child) && !is_doc(&child) {
                self.syntax(
                    child.line(),
                    format!("wrong tag in {}: <{}>", el.name(), child.name()),
                );
            }
        }
        if !named {
            self.schema(el.line(), "nameless value".to_string());
            return None;
        }
        Some(val)
    }

    fn parse_bitfield(&mut self, el: &Element) -> Option<Bitfield> {
        let mut bf = Bitfield::default();
        let mut named = false;
        let (mut low, mut high) = (None, None);
        for (name, text) in el.attributes() {
            match name {
                "name" => {
                    bf.name = text.to_string();
                    named = true;
                }
                "high" => high = Some(self.num_attr(el, name, text)),
                "low" => low = Some(self.num_attr(el, name, text)),
                "varset" => bf.varinfo.varset_name = Some(text.to_string()),
                "variants" => bf.varinfo.variants_expr = Some(text.to_string()),
                _ => {
                    if !self.try_type_attr(el, name, text, &mut bf.typeinfo) {
                        self.syntax(
                            el.line(),
                            format!("wrong attribute \"{name}\" for bitfield"),
                        );
                    }
                }
            }
        }
        for child in el.children() {
            if !self.try_type_tag(&child, &mut bf.typeinfo)
                && !self.try_top(&child)
                && !is_doc(&child)
            {
                self.syntax(
                    child.line(),
                    format!("wrong tag in {}: <{}>", el.name(), child.name()),
                );
            }
        }
        if !named {
            self.schema(el.line(), "nameless bitfield".to_string());
            return None;
        }
        match (low, high) {
            (Some(low), Some(high)) if low <= high && high <= 63 => {
                bf.low = low as u32;
                bf.high = high as u32;
                Some(bf)
            }
            _ => {
                self.schema(el.line(), format!("bitfield {} has wrong placement", bf.name));
                None
            }
        }
    }

    fn parse_enum(&mut self, el: &Element) {
        let mut name = None;
        let mut is_inline = false;
        let mut bare = false;
        let mut varinfo = VariantInfo::default();
        for (attr, text) in el.attributes() {
            match attr {
                "name" => name = Some(text.to_string()),
                "bare" => bare = self.bool_attr(el, attr, text),
                "inline" => is_inline = self.bool_attr(el, attr, text),
                "prefix" => varinfo.prefix_name = Some(text.to_string()),
                "varset" => varinfo.varset_name = Some(text.to_string()),
                "variants" => varinfo.variants_expr = Some(text.to_string()),
                _ => self.syntax(el.line(), format!("wrong attribute \"{attr}\" for enum")),
            }
        }
        let Some(name) = name else {
            self.schema(el.line(), "nameless enum".to_string());
            return;
        };
        let idx = match self.db.enums.iter().position(|e| e.name == name) {
            Some(idx) => {
                let cur = &self.db.enums[idx];
                if cur.varinfo.prefix_name != varinfo.prefix_name
                    || cur.varinfo.varset_name != varinfo.varset_name
                    || cur.varinfo.variants_expr != varinfo.variants_expr
                    || cur.is_inline != is_inline
                    || cur.bare != bare
                {
                    self.schema(el.line(), format!("merge fail for enum {name}"));
                }
                idx
            }
            None => {
                self.db.enums.push(Enum {
                    name,
                    is_inline,
                    bare,
                    varinfo,
                    ..Default::default()
                });
                self.db.enums.len() - 1
            }
        };
        for child in el.children() {
            if child.name() == "value" {
                if let Some(val) = self.parse_value(&child) {
                    self.db.enums[idx].values.push(val);
                }
            } else if !self.try_top(&child) && !is_doc(&child) {
                self.syntax(
                    child.line(),
                    format!("wrong tag in enum: <{}>", child.name()),
                );
            }
        }
    }

    fn parse_bitset(&mut self, el: &Element) {
        let mut name = None;
        let mut is_inline = false;
        let mut bare = false;
        let mut varinfo = VariantInfo::default();
        for (attr, text) in el.attributes() {
            match attr {
                "name" => name = Some(text.to_string()),
                "bare" => bare = self.bool_attr(el, attr, text),
                "inline" => is_inline = self.bool_attr(el, attr, text),
                "prefix" => varinfo.prefix_name = Some(text.to_string()),
                "varset" => varinfo.varset_name = Some(text.to_string()),
                "variants" => varinfo.variants_expr = Some(text.to_string()),
                _ => self.syntax(el.line(), format!("wrong attribute \"{attr}\" for bitset")),
            }
        }
        let Some(name) = name else {
            self.schema(el.line(), "nameless bitset".to_string());
            return;
        };
        let idx = match self.db.bitsets.iter().position(|b| b.name == name) {
            Some(idx) => {
                let cur = &self.db.bitsets[idx];
                if cur.varinfo.prefix_name != varinfo.prefix_name
                    || cur.varinfo.varset_name != varinfo.varset_name
                    || cur.varinfo.variants_expr != varinfo.variants_expr
                    || cur.is_inline != is_inline
                    || cur.bare != bare
                {
                    self.schema(el.line(), format!("merge fail for bitset {name}"));
                }
                idx
            }
            None => {
                self.db.bitsets.push(Bitset {
                    name,
                    is_inline,
                    bare,
                    varinfo,
                    ..Default::default()
                });
                self.db.bitsets.len() - 1
            }
        };
        for child in el.children() {
            if child.name() == "bitfield" {
                if let Some(bf) = self.parse_bitfield(&child) {
                    self.db.bitsets[idx].bitfields.push(bf);
                }
            } else if !self.try_top(&child) && !is_doc(&child) {
                self.syntax(
                    child.line(),
                    format!("wrong tag in bitset: <{}>", child.name()),
                );
            }
        }
    }

    fn parse_group(&mut self, el: &Element) {
        let mut name = None;
        for (attr, text) in el.attributes() {
            match attr {
                "name" => name = Some(text.to_string()),
                _ => self.syntax(el.line(), format!("wrong attribute \"{attr}\" for group")),
            }
        }
        let Some(name) = name else {
            self.schema(el.line(), "nameless group".to_string());
            return;
        };
        let idx = match self.db.groups.iter().position(|g| g.name == name) {
            Some(idx) => idx,
            None => {
                self.db.groups.push(Group {
                    name,
                    subelems: Vec::new(),
                });
                self.db.groups.len() - 1
            }
        };
        for child in el.children() {
            match self.try_delem(&child) {
                DelemOutcome::Parsed(delem) => self.db.groups[idx].subelems.push(delem),
                DelemOutcome::Failed => {}
                DelemOutcome::NotDelem => {
                    if !self.try_top(&child) && !is_doc(&child) {
                        self.syntax(
                            child.line(),
                            format!("wrong tag in group: <{}>", child.name()),
                        );
                    }
                }
            }
        }
    }

    fn parse_domain(&mut self, el: &Element) {
        let mut name = None;
        let mut size = None;
        let mut width = 8;
        let mut bare = false;
        let mut varinfo = VariantInfo::default();
        for (attr, text) in el.attributes() {
            match attr {
                "name" => name = Some(text.to_string()),
                "bare" => bare = self.bool_attr(el, attr, text),
                "size" => size = Some(self.num_attr(el, attr, text)),
                "width" => width = self.num_attr(el, attr, text),
                "prefix" => varinfo.prefix_name = Some(text.to_string()),
                "varset" => varinfo.varset_name = Some(text.to_string()),
                "variants" => varinfo.variants_expr = Some(text.to_string()),
                _ => self.syntax(el.line(), format!("wrong attribute \"{attr}\" for domain")),
            }
        }
        let Some(name) = name else {
            self.schema(el.line(), "nameless domain".to_string());
            return;
        };
        let idx = match self.db.domains.iter().position(|d| d.name == name) {
            Some(idx) => {
                let cur = &self.db.domains[idx];
                let size_conflict = matches!((size, cur.size), (Some(a), Some(b)) if a != b);
                if cur.varinfo.prefix_name != varinfo.prefix_name
                    || cur.varinfo.varset_name != varinfo.varset_name
                    || cur.varinfo.variants_expr != varinfo.variants_expr
                    || cur.width != width
                    || cur.bare != bare
                    || size_conflict
                {
                    self.schema(el.line(), format!("merge fail for domain {name}"));
                } else if size.is_some() {
                    self.db.domains[idx].size = size;
                }
                idx
            }
            None => {
                self.db.domains.push(Domain {
                    name,
                    size,
                    width,
                    bare,
                    varinfo,
                    ..Default::default()
                });
                self.db.domains.len() - 1
            }
        };
        for child in el.children() {
            match self.try_delem(&child) {
                DelemOutcome::Parsed(delem) => self.db.domains[idx].subelems.push(delem),
                DelemOutcome::Failed => {}
                DelemOutcome::NotDelem => {
                    if !self.try_top(&child) && !is_doc(&child) {
                        self.syntax(
                            child.line(),
                            format!("wrong tag in domain: <{}>", child.name()),
                        );
                    }
                }
            }
        }
    }

    fn try_delem(&mut self, el: &Element) -> DelemOutcome {
        match el.name() {
            "use-group" => self.parse_use_group(el),
            "array" | "stripe" => self.parse_array(el),
            "reg8" | "reg16" | "reg32" | "reg64" => self.parse_register(el),
            _ => DelemOutcome::NotDelem,
        }
    }

    fn parse_use_group(&mut self, el: &Element) -> DelemOutcome {
        let mut delem = Delem::new(ElementKind::UseGroup);
        for (attr, text) in el.attributes() {
            match attr {
                "name" => delem.name = Some(text.to_string()),
                _ => self.syntax(
                    el.line(),
                    format!("wrong attribute \"{attr}\" for {}", el.name()),
                ),
            }
        }
        if delem.name.is_none() {
            self.schema(el.line(), "nameless use-group".to_string());
            return DelemOutcome::Failed;
        }
        DelemOutcome::Parsed(delem)
    }

    fn parse_array(&mut self, el: &Element) -> DelemOutcome {
        let kind = if el.name() == "stripe" {
            ElementKind::Stripe
        } else {
            ElementKind::Array
        };
        let mut delem = Delem::new(kind);
        for (attr, text) in el.attributes() {
            match attr {
                "name" => delem.name = Some(text.to_string()),
                "offset" => delem.offset = self.num_attr(el, attr, text),
                "length" => delem.length = self.num_attr(el, attr, text),
                "stride" => delem.stride = self.num_attr(el, attr, text),
                "prefix" => delem.varinfo.prefix_name = Some(text.to_string()),
                "varset" => delem.varinfo.varset_name = Some(text.to_string()),
                "variants" => delem.varinfo.variants_expr = Some(text.to_string()),
                _ => self.syntax(
                    el.line(),
                    format!("wrong attribute \"{attr}\" for {}", el.name()),
                ),
            }
        }
        for child in el.children() {
            match self.try_delem(&child) {
                DelemOutcome::Parsed(sub) => delem.subelems.push(sub),
                DelemOutcome::Failed => {}
                DelemOutcome::NotDelem => {
                    if !self.try_top(&child) && !is_doc(&child) {
                        self.syntax(
                            child.line(),
                            format!("wrong tag in {}: <{}>", el.name(), child.name()),
                        );
                    }
                }
            }
        }
        DelemOutcome::Parsed(delem)
    }

    fn parse_register(&mut self, el: &Element) -> DelemOutcome {
        let width = match el.name() {
            "reg8" => RegisterWidth::W8,
            "reg16" => RegisterWidth::W16,
            "reg32" => RegisterWidth::W32,
            _ => RegisterWidth::W64,
        };
        let mut delem = Delem::new(ElementKind::Register);
        delem.width = Some(width);
        for (attr, text) in el.attributes() {
            match attr {
                "name" => delem.name = Some(text.to_string()),
                "offset" => delem.offset = self.num_attr(el, attr, text),
                "length" => delem.length = self.num_attr(el, attr, text),
                "stride" => delem.stride = self.num_attr(el, attr, text),
                "varset" => delem.varinfo.varset_name = Some(text.to_string()),
                "variants" => delem.varinfo.variants_expr = Some(text.to_string()),
                "access" => match text.parse::<Access>() {
                    Ok(access) => delem.access = access,
                    Err(_) => self.syntax(
                        el.line(),
                        format!("wrong access type \"{text}\" for register"),
                    ),
                },
                _ => {
                    if !self.try_type_attr(el, attr, text, &mut delem.typeinfo) {
                        self.syntax(
                            el.line(),
                            format!("wrong attribute \"{attr}\" for register"),
                        );
                    }
                }
            }
        }
        for child in el.children() {
            if !self.try_type_tag(&child, &mut delem.typeinfo)
                && !self.try_top(&child)
                && !is_doc(&child)
            {
                self.syntax(
                    child.line(),
                    format!("wrong tag in {}: <{}>", el.name(), child.name()),
                );
            }
        }
        if delem.name.is_none() {
            self.schema(el.line(), "nameless register".to_string());
            return DelemOutcome::Failed;
        }
        DelemOutcome::Parsed(delem)
    }

    fn parse_import(&mut self, el: &Element) {
        let mut target = None;
        for (attr, text) in el.attributes() {
            match attr {
                "file" => target = Some(text.to_string()),
                _ => self.syntax(el.line(), format!("wrong attribute \"{attr}\" for import")),
            }
        }
        match target {
            Some(target) => {
                let path = self.resolve_import(&target);
                self.db.load_file(path);
            }
            None => self.schema(el.line(), "missing \"file\" attribute for import".to_string()),
        }
    }

    /// Relative import targets resolve against the importing document's
    /// directory, so a database tree loads the same from any cwd.
    fn resolve_import(&self, target: &str) -> PathBuf {
        let target = Path::new(target);
        if target.is_absolute() {
            return target.to_path_buf();
        }
        match self.file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(target),
            _ => target.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_decimal_and_hex() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0x1A"), Some(0x1a));
        assert_eq!(parse_number("0X10"), Some(0x10));
        assert_eq!(parse_number(" 7 "), Some(7));
    }

    #[test]
    fn numbers_reject_garbage() {
        assert_eq!(parse_number("12z"), None);
        assert_eq!(parse_number("0xZZ"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("x10"), None);
    }

    #[test]
    fn unknown_root_tag_is_diagnosed() {
        let mut db = Database::new();
        db.load_str("bad.xml", "<registers/>");
        assert!(db.has_errors());
        assert!(db.enums.is_empty());
    }

    #[test]
    fn access_literals() {
        assert_eq!("r".parse::<Access>(), Ok(Access::Read));
        assert_eq!("w".parse::<Access>(), Ok(Access::Write));
        assert_eq!("rw".parse::<Access>(), Ok(Access::ReadWrite));
        assert!("readwrite".parse::<Access>().is_err());
    }
}
