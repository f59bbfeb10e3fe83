//! The preparation pass: runs once after the last document has loaded,
//! over enums, then bitsets, then domains.
//!
//! Preparation resolves prefix and type references, deep-copies inline
//! enum/bitset contents and `use-group` targets into their use sites,
//! computes bit masks and fully qualified names, and prunes definitions
//! that no active variant keeps alive. Each top-level definition is
//! detached from the database while its own subtree is worked on, so
//! lookups against the rest of the database stay available mid-pass.

use std::mem;

use crate::db::{
    Bitfield, Bitset, Database, Delem, Domain, ElementKind, Enum, TypeInfo, TypeKind, VarSet,
    Value, VariantInfo,
};
use crate::error::Error;

/// Slot bit: the value was live in the inherited context.
const INHERITABLE: u8 = 1;
/// Slot bit: the value is named by the current variants expression.
const SELECTED: u8 = 2;

/// Join a name onto an optional prefix with a single underscore. A
/// missing prefix yields the name unchanged.
fn cat_prefix(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}_{name}"),
        None => name.to_string(),
    }
}

/// Mask with exactly the bits `low..=high` set; `high` may be 63.
fn field_mask(low: u32, high: u32) -> u64 {
    if high >= 63 {
        !0u64 << low
    } else {
        (1u64 << (high + 1)) - (1u64 << low)
    }
}

impl Database {
    /// Resolve and finalise every loaded definition. Call exactly once,
    /// after the last `load_file`/`load_str`.
    pub fn prepare(&mut self) {
        for i in 0..self.enums.len() {
            let mut en = mem::take(&mut self.enums[i]);
            self.prepare_enum(&mut en);
            self.enums[i] = en;
        }
        for i in 0..self.bitsets.len() {
            let mut bs = mem::take(&mut self.bitsets[i]);
            self.prepare_bitset(&mut bs);
            self.bitsets[i] = bs;
        }
        for i in 0..self.domains.len() {
            let mut dom = mem::take(&mut self.domains[i]);
            self.prepare_domain(&mut dom);
            self.domains[i] = dom;
        }
    }

    /// Enums prepare at most once: one may already have been visited as
    /// another definition's prefix lookup by the time the main loop
    /// reaches it, and varset inheritance is not required to be acyclic.
    fn prepare_enum(&mut self, en: &mut Enum) {
        if en.prepared {
            return;
        }
        let name = en.name.clone();
        self.prepare_varinfo(&name, &mut en.varinfo, None);
        if en.is_inline {
            return;
        }
        if en.varinfo.dead {
            en.prepared = true;
            return;
        }
        let prefix = (!en.bare).then_some(name.as_str());
        for val in en.values.iter_mut() {
            self.prepare_value(val, prefix, Some(&en.varinfo));
        }
        en.fullname = Some(cat_prefix(en.varinfo.prefix.as_deref(), &name));
        en.prepared = true;
    }

    fn prepare_bitset(&mut self, bs: &mut Bitset) {
        let name = bs.name.clone();
        self.prepare_varinfo(&name, &mut bs.varinfo, None);
        if bs.is_inline {
            return;
        }
        if bs.varinfo.dead {
            return;
        }
        let prefix = (!bs.bare).then_some(name.as_str());
        for bf in bs.bitfields.iter_mut() {
            self.prepare_bitfield(bf, prefix, Some(&bs.varinfo));
        }
        bs.fullname = Some(cat_prefix(bs.varinfo.prefix.as_deref(), &name));
    }

    fn prepare_domain(&mut self, dom: &mut Domain) {
        let name = dom.name.clone();
        self.prepare_varinfo(&name, &mut dom.varinfo, None);
        if dom.varinfo.dead {
            return;
        }
        let prefix = (!dom.bare).then_some(name.as_str());
        for sub in dom.subelems.iter_mut() {
            self.prepare_delem(sub, prefix, Some(&dom.varinfo), dom.width);
        }
        dom.fullname = Some(cat_prefix(dom.varinfo.prefix.as_deref(), &name));
    }

    fn prepare_value(&mut self, val: &mut Value, prefix: Option<&str>, parent: Option<&VariantInfo>) {
        let base = cat_prefix(prefix, &val.name);
        self.prepare_varinfo(&base, &mut val.varinfo, parent);
        if val.varinfo.dead {
            return;
        }
        val.fullname = Some(cat_prefix(val.varinfo.prefix.as_deref(), &base));
    }

    fn prepare_bitfield(
        &mut self,
        bf: &mut Bitfield,
        prefix: Option<&str>,
        parent: Option<&VariantInfo>,
    ) {
        let base = cat_prefix(prefix, &bf.name);
        self.prepare_varinfo(&base, &mut bf.varinfo, parent);
        if bf.varinfo.dead {
            return;
        }
        bf.mask = field_mask(bf.low, bf.high);
        self.prepare_typeinfo(&mut bf.typeinfo, Some(&base), &bf.varinfo);
        bf.fullname = Some(cat_prefix(bf.varinfo.prefix.as_deref(), &base));
    }

    /// Resolve every declared type name, copying inline definitions in,
    /// then prepare the nested bitfields and values (copies included)
    /// under the use site's prefix.
    fn prepare_typeinfo(&mut self, ti: &mut TypeInfo, prefix: Option<&str>, vi: &VariantInfo) {
        for t in ti.types.iter_mut() {
            t.kind = TypeKind::Other;
            if let Some(idx) = self.enum_index(&t.name) {
                if self.enums[idx].is_inline {
                    t.kind = TypeKind::InlineEnum;
                    ti.vals.extend(self.enums[idx].values.iter().cloned());
                } else {
                    t.kind = TypeKind::Enum(idx);
                }
            }
            // A bitset of the same name wins over an enum.
            if let Some(idx) = self.bitset_index(&t.name) {
                if self.bitsets[idx].is_inline {
                    t.kind = TypeKind::InlineBitset;
                    ti.bitfields.extend(self.bitsets[idx].bitfields.iter().cloned());
                } else {
                    t.kind = TypeKind::Bitset(idx);
                }
            }
        }
        for bf in ti.bitfields.iter_mut() {
            self.prepare_bitfield(bf, prefix, Some(vi));
        }
        for val in ti.vals.iter_mut() {
            self.prepare_value(val, prefix, Some(vi));
        }
    }

    fn prepare_delem(
        &mut self,
        elem: &mut Delem,
        prefix: Option<&str>,
        parent: Option<&VariantInfo>,
        domain_width: u64,
    ) {
        if elem.kind == ElementKind::UseGroup {
            let group_name = elem.name.take().unwrap_or_default();
            let copied = self
                .groups
                .iter()
                .find(|g| g.name == group_name)
                .map(|g| g.subelems.clone());
            match copied {
                Some(subs) => elem.subelems.extend(subs),
                None => self.report(Error::Reference {
                    context: group_name.clone(),
                    message: "group not found".to_string(),
                }),
            }
            elem.kind = ElementKind::Stripe;
            elem.length = 1;
        }

        let base = elem.name.as_ref().map(|n| cat_prefix(prefix, n));
        let context = base
            .clone()
            .or_else(|| prefix.map(str::to_string))
            .unwrap_or_default();
        self.prepare_varinfo(&context, &mut elem.varinfo, parent);
        if elem.varinfo.dead {
            return;
        }

        if elem.length != 1 && elem.stride == 0 {
            match (elem.kind, elem.width) {
                (ElementKind::Register, Some(width)) if domain_width != 0 => {
                    elem.stride = width.bits() / domain_width;
                }
                _ => self.report(Error::Schema {
                    context: context.clone(),
                    message: "has non-1 length, but no stride".to_string(),
                }),
            }
        }

        let child_prefix = if base.is_some() { base.as_deref() } else { prefix };
        self.prepare_typeinfo(&mut elem.typeinfo, child_prefix, &elem.varinfo);
        for sub in elem.subelems.iter_mut() {
            self.prepare_delem(sub, child_prefix, Some(&elem.varinfo), domain_width);
        }

        if let Some(base) = base {
            elem.fullname = Some(match elem.varinfo.prefix.as_deref() {
                Some(p) => cat_prefix(Some(p), &base),
                None => base,
            });
        }
    }

    /// Resolve one definition's variant state against its parent's.
    ///
    /// The active varset is the explicit `varset` attribute if present,
    /// the (possibly inherited) prefix enum otherwise. A variants
    /// expression refines the inherited bitmap: every slot starts with
    /// its inherited liveness, matched slots gain the selected bit, and
    /// a slot survives only with both. No surviving slot means the
    /// definition is dead.
    fn prepare_varinfo(
        &mut self,
        context: &str,
        vi: &mut VariantInfo,
        parent: Option<&VariantInfo>,
    ) {
        if let Some(parent) = parent {
            vi.prefix_enum = parent.prefix_enum;
            vi.varsets = parent.varsets.clone();
        }
        match vi.prefix_name.as_deref() {
            Some("none") => vi.prefix_enum = None,
            // Tolerated when unresolved: the name may belong to a
            // database that was deliberately not loaded.
            Some(name) => vi.prefix_enum = self.enum_index(name),
            None => {}
        }

        let mut varset = vi.prefix_enum;
        if let Some(name) = vi.varset_name.clone() {
            varset = self.enum_index(&name);
        }

        if let Some(expr) = vi.variants_expr.clone() {
            let Some(venum) = varset else {
                self.report(Error::Schema {
                    context: context.to_string(),
                    message: "tried to use variants without an active varset".to_string(),
                });
                return;
            };
            let nvars = self.enums[venum].values.len();
            let vs_idx = match vi.varsets.iter().position(|vs| vs.enum_ref == venum) {
                Some(idx) => idx,
                None => {
                    vi.varsets.push(VarSet {
                        enum_ref: venum,
                        variants: vec![INHERITABLE; nvars],
                    });
                    vi.varsets.len() - 1
                }
            };
            self.apply_variants(context, venum, &mut vi.varsets[vs_idx], &expr);
            vi.dead = true;
            for slot in vi.varsets[vs_idx].variants.iter_mut() {
                *slot = u8::from(*slot == (INHERITABLE | SELECTED));
                if *slot != 0 {
                    vi.dead = false;
                }
            }
        }
        if vi.dead {
            return;
        }

        if let Some(pref) = vi.prefix_enum {
            match vi.varsets.iter().find(|vs| vs.enum_ref == pref) {
                Some(vs) => {
                    for (idx, slot) in vs.variants.iter().enumerate() {
                        if *slot != 0 {
                            vi.prefix = self.enums[pref].values.get(idx).map(|v| v.name.clone());
                            break;
                        }
                    }
                }
                None => {
                    vi.prefix = self.enums[pref].values.first().map(|v| v.name.clone());
                }
            }
        }
    }

    /// Mark the slots a variants expression names. Terms are space
    /// separated: `A` selects one value, `A:B` the half-open index
    /// range, `A-B` the inclusive one; either endpoint may be omitted.
    fn apply_variants(&mut self, context: &str, venum: usize, vs: &mut VarSet, expr: &str) {
        let nvars = vs.variants.len();
        for term in expr.split_whitespace() {
            match term.find([':', '-']) {
                None => {
                    if let Some(idx) = self.find_value_index(context, venum, term) {
                        vs.variants[idx] |= SELECTED;
                    }
                }
                Some(split) => {
                    let first = &term[..split];
                    let second = &term[split + 1..];
                    let inclusive = term.as_bytes()[split] == b'-';
                    let lo = if first.is_empty() {
                        Some(0)
                    } else {
                        self.find_value_index(context, venum, first)
                    };
                    let hi = if second.is_empty() {
                        Some(nvars)
                    } else {
                        self.find_value_index(context, venum, second)
                            .map(|idx| if inclusive { idx + 1 } else { idx })
                    };
                    if let (Some(lo), Some(hi)) = (lo, hi) {
                        let hi = hi.min(nvars);
                        if lo < hi {
                            for slot in vs.variants[lo..hi].iter_mut() {
                                *slot |= SELECTED;
                            }
                        }
                    }
                }
            }
        }
    }

    fn find_value_index(&mut self, context: &str, venum: usize, name: &str) -> Option<usize> {
        if let Some(idx) = self.enums[venum].values.iter().position(|v| v.name == name) {
            return Some(idx);
        }
        let enum_name = self.enums[venum].name.clone();
        self.report(Error::Reference {
            context: context.to_string(),
            message: format!("cannot find variant {name} in enum {enum_name}"),
        });
        None
    }
}
