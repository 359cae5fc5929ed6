//! Thin access helpers over the CRDT's XML node kinds.
//!
//! The reconciler and materializers treat "something that holds an ordered
//! child list" uniformly whether it is the root fragment or a named
//! element; [`ContainerRef`] is that view. Everything here is a shallow
//! wrapper over `yrs` reference types, which are cheap to clone and remain
//! valid as long as the document lives.

use std::sync::Arc;

use yrs::branch::{Branch, BranchID};
use yrs::types::Attrs;
use yrs::{
    Any, Out, ReadTxn, TransactionMut, Xml, XmlElementPrelim, XmlElementRef, XmlFragment,
    XmlFragmentRef, XmlOut, XmlTextPrelim, XmlTextRef,
};

/// Branch identifier of any shared ref.
pub(crate) fn branch_id_of<T: AsRef<Branch>>(shared: &T) -> BranchID {
    shared.as_ref().id()
}

/// Branch identifier of an XML child.
pub(crate) fn xml_branch_id(out: &XmlOut) -> BranchID {
    match out {
        XmlOut::Element(el) => branch_id_of(el),
        XmlOut::Fragment(frag) => branch_id_of(frag),
        XmlOut::Text(text) => branch_id_of(text),
    }
}

/// A CRDT node that owns an ordered child list: the root fragment or a
/// named element.
#[derive(Debug, Clone)]
pub(crate) enum ContainerRef {
    Fragment(XmlFragmentRef),
    Element(XmlElementRef),
}

impl ContainerRef {
    /// Tag name, or `None` for the root fragment.
    pub(crate) fn tag(&self) -> Option<String> {
        match self {
            ContainerRef::Fragment(_) => None,
            ContainerRef::Element(el) => Some(el.tag().to_string()),
        }
    }

    pub(crate) fn branch_id(&self) -> BranchID {
        match self {
            ContainerRef::Fragment(frag) => branch_id_of(frag),
            ContainerRef::Element(el) => branch_id_of(el),
        }
    }

    pub(crate) fn len<T: ReadTxn>(&self, txn: &T) -> u32 {
        match self {
            ContainerRef::Fragment(frag) => frag.len(txn),
            ContainerRef::Element(el) => el.len(txn),
        }
    }

    pub(crate) fn get<T: ReadTxn>(&self, txn: &T, index: u32) -> Option<XmlOut> {
        match self {
            ContainerRef::Fragment(frag) => frag.get(txn, index),
            ContainerRef::Element(el) => el.get(txn, index),
        }
    }

    /// Current children, in order.
    pub(crate) fn children<T: ReadTxn>(&self, txn: &T) -> Vec<XmlOut> {
        let len = self.len(txn);
        (0..len).filter_map(|i| self.get(txn, i)).collect()
    }

    pub(crate) fn insert_element(
        &self,
        txn: &mut TransactionMut,
        index: u32,
        prelim: XmlElementPrelim,
    ) -> XmlElementRef {
        match self {
            ContainerRef::Fragment(frag) => frag.insert(txn, index, prelim),
            ContainerRef::Element(el) => el.insert(txn, index, prelim),
        }
    }

    pub(crate) fn insert_text(
        &self,
        txn: &mut TransactionMut,
        index: u32,
        prelim: XmlTextPrelim,
    ) -> XmlTextRef {
        match self {
            ContainerRef::Fragment(frag) => frag.insert(txn, index, prelim),
            ContainerRef::Element(el) => el.insert(txn, index, prelim),
        }
    }

    pub(crate) fn remove_range(&self, txn: &mut TransactionMut, index: u32, len: u32) {
        match self {
            ContainerRef::Fragment(frag) => frag.remove_range(txn, index, len),
            ContainerRef::Element(el) => el.remove_range(txn, index, len),
        }
    }

    /// Position of the child with the given branch id, if still present.
    pub(crate) fn index_of<T: ReadTxn>(&self, txn: &T, id: &BranchID) -> Option<u32> {
        let len = self.len(txn);
        (0..len).find(|i| {
            self.get(txn, *i)
                .map(|child| xml_branch_id(&child) == *id)
                .unwrap_or(false)
        })
    }
}

/// Read an element's attributes into an owned map. Values that are not
/// plain data (nested shared types) are skipped; the binding never writes
/// such attributes.
pub(crate) fn read_attributes<T: ReadTxn>(el: &XmlElementRef, txn: &T) -> Attrs {
    let mut attrs = Attrs::new();
    for (key, value) in el.attributes(txn) {
        if let Out::Any(any) = value {
            attrs.insert(Arc::from(key), any);
        }
    }
    attrs
}

/// Current value of one attribute, if it is plain data.
pub(crate) fn read_attribute<T: ReadTxn>(
    el: &XmlElementRef,
    txn: &T,
    key: &str,
) -> Option<Any> {
    match el.get_attribute(txn, key) {
        Some(Out::Any(any)) => Some(any),
        _ => None,
    }
}

/// Pack an attribute map into a plain `Any` value (the shape mark
/// attributes take inside a text delta).
pub(crate) fn attrs_to_any(attrs: &Attrs) -> Any {
    let map: std::collections::HashMap<String, Any> = attrs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Any::from(map)
}

/// Unpack a delta attribute value into an attribute map. Non-map values
/// yield an empty map.
pub(crate) fn any_to_attrs(value: &Any) -> Attrs {
    match value {
        Any::Map(map) => map
            .iter()
            .map(|(k, v)| (Arc::from(k.as_str()), v.clone()))
            .collect(),
        _ => Attrs::new(),
    }
}
