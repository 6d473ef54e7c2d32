//! Page-to-object mapping.
//!
//! Answers "which indirect objects hold page N's content streams". Two
//! sources are combined: the parsed page tree ([`build_mapping`]) and a raw
//! scan for page objects in the file bytes ([`scan_mapping`]). The raw scan
//! needs nothing but the bytes, so it still works when the tree is missing
//! or untrustworthy.

use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};
use crate::tree::DocumentTree;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

lazy_static! {
    // An object header may follow any whitespace or delimiter, or sit
    // directly after the previous `endobj`.
    static ref RE_OBJ: Regex = Regex::new(r"(?:^|[\s\[\]<>(){}/%]|endobj)(\d+)\s+(\d+)\s+obj\b").unwrap();
    static ref RE_PAGE: Regex = Regex::new(r"/Type\s*/Page\b").unwrap();
    static ref RE_PAGES: Regex = Regex::new(r"/Type\s*/Pages\b").unwrap();
    static ref RE_CATALOG: Regex = Regex::new(r"/Type\s*/Catalog\b").unwrap();
    static ref RE_REF: Regex = Regex::new(r"(\d+)\s+(\d+)\s+R\b").unwrap();
    static ref RE_CONTENTS_ONE: Regex = Regex::new(r"/Contents\s+(\d+)\s+(\d+)\s+R\b").unwrap();
    static ref RE_CONTENTS_ARR: Regex = Regex::new(r"/Contents\s*\[([^\]]*)\]").unwrap();
    static ref RE_KIDS: Regex = Regex::new(r"/Kids\s*\[([^\]]*)\]").unwrap();
    static ref RE_ROOT: Regex = Regex::new(r"/Root\s+(\d+)\s+(\d+)\s+R\b").unwrap();
    static ref RE_INFO: Regex = Regex::new(r"/Info\s+(\d+)\s+(\d+)\s+R\b").unwrap();
    static ref RE_PAGES_REF: Regex = Regex::new(r"/Pages\s+(\d+)\s+(\d+)\s+R\b").unwrap();
}

/// Objects backing one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMapping {
    /// Zero-based page index
    pub page_index: usize,
    /// The page dictionary's own object, when known
    pub page_obj: Option<ObjectRef>,
    /// Content streams in declared order
    pub contents: Vec<ObjectRef>,
}

impl PageMapping {
    fn is_complete(&self) -> bool {
        self.page_obj.is_some() && !self.contents.is_empty()
    }
}

/// Page-ordered mapping for a whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMapping {
    /// One entry per page, index-aligned with page order
    pub pages: Vec<PageMapping>,
    /// Document catalog
    pub root: Option<ObjectRef>,
    /// Information dictionary
    pub info: Option<ObjectRef>,
}

impl DocumentMapping {
    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Content stream `stream` of page `page`.
    pub fn resolve(&self, page: usize, stream: usize) -> Option<ObjectRef> {
        self.pages.get(page)?.contents.get(stream).copied()
    }

    /// Whether `id` is any page's content stream.
    pub fn contains(&self, id: ObjectRef) -> bool {
        self.pages.iter().any(|p| p.contents.contains(&id))
    }

    /// Whether every page has at least one content stream.
    pub fn is_usable(&self) -> bool {
        self.ensure_usable().is_ok()
    }

    /// # Errors
    ///
    /// Returns [`Error::MappingUnresolved`] naming the first page without
    /// content streams, or when there are no pages.
    pub fn ensure_usable(&self) -> Result<()> {
        if self.pages.is_empty() {
            return Err(Error::MappingUnresolved("no pages mapped".to_string()));
        }
        match self.pages.iter().find(|p| p.contents.is_empty()) {
            Some(page) => Err(Error::MappingUnresolved(format!(
                "page {} has no resolved content streams",
                page.page_index + 1
            ))),
            None => Ok(()),
        }
    }

    /// Combine a structural mapping with a byte-scanned one.
    ///
    /// A structural page that has both its object and its contents is kept.
    /// Otherwise missing fields come from the scan. When the page counts
    /// differ the scan decides the count and structural entries are matched
    /// to scanned pages by page object. An empty scan leaves the structural
    /// mapping alone, since object streams hide pages from the byte scan.
    pub fn merge(structural: &DocumentMapping, scanned: &DocumentMapping) -> DocumentMapping {
        let root = structural.root.or(scanned.root);
        let info = structural.info.or(scanned.info);

        if scanned.pages.is_empty() {
            return DocumentMapping {
                pages: structural.pages.clone(),
                root,
                info,
            };
        }

        let aligned = structural.pages.len() == scanned.pages.len();
        if !aligned {
            log::warn!(
                "Page count mismatch: tree has {}, byte scan has {}; using scan",
                structural.pages.len(),
                scanned.pages.len()
            );
        }

        let pages = scanned
            .pages
            .iter()
            .enumerate()
            .map(|(i, scan)| {
                let from_tree = if aligned {
                    structural.pages.get(i)
                } else {
                    scan.page_obj
                        .and_then(|obj| structural.pages.iter().find(|p| p.page_obj == Some(obj)))
                };
                match from_tree {
                    Some(tree) if tree.is_complete() => PageMapping {
                        page_index: i,
                        ..tree.clone()
                    },
                    Some(tree) => PageMapping {
                        page_index: i,
                        page_obj: tree.page_obj.or(scan.page_obj),
                        contents: if tree.contents.is_empty() {
                            scan.contents.clone()
                        } else {
                            tree.contents.clone()
                        },
                    },
                    None => PageMapping {
                        page_index: i,
                        ..scan.clone()
                    },
                }
            })
            .collect();

        DocumentMapping { pages, root, info }
    }
}

/// Build the mapping from the parsed page tree.
///
/// Walks `/Root /Pages` depth-first. A node typed `/Page`, or one without
/// `/Kids`, is a leaf. Leaves reached through a reference record it as
/// their page object.
pub fn build_mapping(tree: &dyn DocumentTree) -> DocumentMapping {
    let mut mapping = DocumentMapping {
        pages: Vec::new(),
        root: tree.root(),
        info: tree.info(),
    };

    let pages_root = tree
        .root()
        .and_then(|r| tree.get(r))
        .and_then(|catalog| catalog.as_dict()?.get("Pages").cloned());

    if let Some(node) = pages_root {
        let mut visited = HashSet::new();
        walk_page_tree(tree, &node, &mut visited, &mut mapping.pages);
    } else {
        log::debug!("Catalog has no /Pages");
    }
    mapping
}

fn walk_page_tree(
    tree: &dyn DocumentTree,
    node: &Object,
    visited: &mut HashSet<ObjectRef>,
    pages: &mut Vec<PageMapping>,
) {
    let own_ref = node.as_reference();
    if let Some(r) = own_ref {
        if !visited.insert(r) {
            log::warn!("Page tree cycle at {}", r);
            return;
        }
    }
    let Some(dict) = tree.resolve(node).and_then(Object::as_dict) else {
        return;
    };

    let kids = dict.get("Kids").and_then(|k| tree.resolve(k)).and_then(Object::as_array);
    match kids {
        Some(kids) if dict.get("Type").and_then(Object::as_name) != Some("Page") => {
            for kid in kids {
                walk_page_tree(tree, kid, visited, pages);
            }
        },
        _ => pages.push(PageMapping {
            page_index: pages.len(),
            page_obj: own_ref,
            contents: dict
                .get("Contents")
                .map(|c| contents_refs(tree, c))
                .unwrap_or_default(),
        }),
    }
}

/// Normalize `/Contents` to a list: one stream reference, an array of
/// references, or a reference to such an array.
fn contents_refs(tree: &dyn DocumentTree, contents: &Object) -> Vec<ObjectRef> {
    match contents {
        Object::Reference(r) => match tree.get(*r) {
            Some(Object::Array(items)) => items.iter().filter_map(Object::as_reference).collect(),
            _ => vec![*r],
        },
        Object::Array(items) => items.iter().filter_map(Object::as_reference).collect(),
        _ => Vec::new(),
    }
}

/// Indirect object bodies found by scanning, newest definition per number.
struct ObjectIndex<'a> {
    bodies: HashMap<u32, (u16, &'a [u8])>,
    order: Vec<u32>,
}

impl<'a> ObjectIndex<'a> {
    fn scan(data: &'a [u8]) -> Self {
        let mut bodies = HashMap::new();
        let mut order = Vec::new();
        for caps in RE_OBJ.captures_iter(data) {
            let (Some(num), Some(gen), Some(whole)) = (caps.get(1), caps.get(2), caps.get(0)) else {
                continue;
            };
            let (Some(num), Some(gen)) = (parse_num::<u32>(num.as_bytes()), parse_num::<u16>(gen.as_bytes()))
            else {
                continue;
            };
            let start = whole.end();
            let end = find(&data[start..], b"endobj").map_or(data.len(), |p| start + p);
            if bodies.insert(num, (gen, &data[start..end])).is_none() {
                order.push(num);
            }
        }
        ObjectIndex { bodies, order }
    }

    fn body(&self, id: ObjectRef) -> Option<&'a [u8]> {
        self.bodies.get(&id.id).map(|(_, body)| *body)
    }

    fn generation(&self, num: u32) -> Option<u16> {
        self.bodies.get(&num).map(|(gen, _)| *gen)
    }
}

fn parse_num<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn ref_from(caps: &regex::bytes::Captures<'_>) -> Option<ObjectRef> {
    Some(ObjectRef::new(
        parse_num(caps.get(1)?.as_bytes())?,
        parse_num(caps.get(2)?.as_bytes())?,
    ))
}

fn refs_in(text: &[u8]) -> Vec<ObjectRef> {
    RE_REF.captures_iter(text).filter_map(|c| ref_from(&c)).collect()
}

fn page_contents(body: &[u8]) -> Vec<ObjectRef> {
    if let Some(one) = RE_CONTENTS_ONE.captures(body).and_then(|c| ref_from(&c)) {
        return vec![one];
    }
    RE_CONTENTS_ARR
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|arr| refs_in(arr.as_bytes()))
        .unwrap_or_default()
}

/// Build the mapping by scanning raw bytes for page objects.
///
/// Page order follows `/Root /Pages /Kids` when those objects can be found
/// in the bytes, otherwise the file order of the page objects.
pub fn scan_mapping(data: &[u8]) -> DocumentMapping {
    let index = ObjectIndex::scan(data);

    let root = RE_ROOT
        .captures_iter(data)
        .last()
        .and_then(|c| ref_from(&c))
        .or_else(|| {
            index.order.iter().find_map(|num| {
                let (gen, body) = index.bodies.get(num)?;
                RE_CATALOG.is_match(body).then(|| ObjectRef::new(*num, *gen))
            })
        });
    let info = RE_INFO.captures_iter(data).last().and_then(|c| ref_from(&c));

    let is_page = |body: &[u8]| RE_PAGE.is_match(body);

    let mut page_refs = Vec::new();
    if let Some(pages_root) = root
        .and_then(|r| index.body(r))
        .and_then(|catalog| RE_PAGES_REF.captures(catalog))
        .and_then(|c| ref_from(&c))
    {
        let mut visited = HashSet::new();
        walk_scanned_pages(&index, pages_root, &mut visited, &mut page_refs);
    }
    if page_refs.is_empty() {
        page_refs = index
            .order
            .iter()
            .filter_map(|num| {
                let (gen, body) = index.bodies.get(num)?;
                is_page(body).then(|| ObjectRef::new(*num, *gen))
            })
            .collect();
    }

    let pages = page_refs
        .into_iter()
        .enumerate()
        .map(|(i, page)| PageMapping {
            page_index: i,
            page_obj: Some(page),
            contents: index.body(page).map(page_contents).unwrap_or_default(),
        })
        .collect();

    DocumentMapping { pages, root, info }
}

fn walk_scanned_pages(
    index: &ObjectIndex<'_>,
    node: ObjectRef,
    visited: &mut HashSet<ObjectRef>,
    out: &mut Vec<ObjectRef>,
) {
    if !visited.insert(node) {
        return;
    }
    let Some(body) = index.body(node) else { return };
    if RE_PAGE.is_match(body) {
        out.push(node);
    } else if RE_PAGES.is_match(body) {
        if let Some(kids) = RE_KIDS.captures(body).and_then(|c| c.get(1)) {
            for kid in refs_in(kids.as_bytes()) {
                walk_scanned_pages(index, kid, visited, out);
            }
        }
    }
}

/// Contents references of specific page objects, by byte scan.
///
/// Pages that cannot be found yield an empty list.
pub fn contents_for_pages(data: &[u8], pages: &[ObjectRef]) -> Vec<(ObjectRef, Vec<ObjectRef>)> {
    let index = ObjectIndex::scan(data);
    pages
        .iter()
        .map(|page| {
            let contents = match index.generation(page.id) {
                Some(gen) if gen == page.gen => index.body(*page).map(page_contents).unwrap_or_default(),
                _ => Vec::new(),
            };
            (*page, contents)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: u32) -> ObjectRef {
        ObjectRef::new(id, 0)
    }

    fn page(i: usize, obj: Option<u32>, contents: &[u32]) -> PageMapping {
        PageMapping {
            page_index: i,
            page_obj: obj.map(r),
            contents: contents.iter().map(|c| r(*c)).collect(),
        }
    }

    const BYTES: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [6 0 R 3 0 R] /Count 2 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /Contents [4 0 R 5 0 R] >>\nendobj\n\
6 0 obj\n<< /Type /Page /Parent 2 0 R /Contents 7 0 R >>\nendobj\n\
trailer\n<< /Size 8 /Root 1 0 R /Info 9 0 R >>\n";

    #[test]
    fn test_scan_mapping_follows_kids_order() {
        let mapping = scan_mapping(BYTES);
        assert_eq!(mapping.root, Some(r(1)));
        assert_eq!(mapping.info, Some(r(9)));
        assert_eq!(mapping.pages, vec![page(0, Some(6), &[7]), page(1, Some(3), &[4, 5])]);
        assert!(mapping.is_usable());
    }

    #[test]
    fn test_scan_mapping_without_catalog_uses_file_order() {
        let bytes = b"3 0 obj\n<< /Type /Page /Contents 4 0 R >>\nendobj\n\
5 0 obj\n<< /Type /Pages /Kids [] >>\nendobj\n\
6 0 obj\n<</Type/Page/Contents[8 0 R]>>\nendobj\n";
        let mapping = scan_mapping(bytes);
        assert_eq!(mapping.pages, vec![page(0, Some(3), &[4]), page(1, Some(6), &[8])]);
    }

    #[test]
    fn test_scan_mapping_newest_definition_wins() {
        let mut bytes = BYTES.to_vec();
        bytes.extend_from_slice(b"6 0 obj\n<< /Type /Page /Contents 11 0 R >>\nendobj\n");
        let mapping = scan_mapping(&bytes);
        assert_eq!(mapping.pages[0].contents, vec![r(11)]);
    }

    #[test]
    fn test_contents_for_pages() {
        let found = contents_for_pages(BYTES, &[r(3), r(40), ObjectRef::new(6, 2)]);
        assert_eq!(found[0], (r(3), vec![r(4), r(5)]));
        assert!(found[1].1.is_empty());
        assert!(found[2].1.is_empty());
    }

    #[test]
    fn test_merge_prefers_complete_structural_pages() {
        let structural = DocumentMapping {
            pages: vec![page(0, Some(6), &[7]), page(1, None, &[])],
            root: Some(r(1)),
            info: None,
        };
        let scanned = DocumentMapping {
            pages: vec![page(0, Some(6), &[70]), page(1, Some(3), &[4, 5])],
            root: Some(r(100)),
            info: Some(r(9)),
        };
        let merged = DocumentMapping::merge(&structural, &scanned);
        assert_eq!(merged.pages, vec![page(0, Some(6), &[7]), page(1, Some(3), &[4, 5])]);
        assert_eq!(merged.root, Some(r(1)));
        assert_eq!(merged.info, Some(r(9)));
    }

    #[test]
    fn test_merge_count_mismatch_uses_scan() {
        let structural = DocumentMapping {
            pages: vec![page(0, Some(3), &[4])],
            ..Default::default()
        };
        let scanned = DocumentMapping {
            pages: vec![page(0, Some(6), &[7]), page(1, Some(3), &[44])],
            ..Default::default()
        };
        let merged = DocumentMapping::merge(&structural, &scanned);
        assert_eq!(merged.pages, vec![page(0, Some(6), &[7]), page(1, Some(3), &[4])]);
    }

    #[test]
    fn test_merge_with_empty_scan_keeps_structure() {
        let structural = DocumentMapping {
            pages: vec![page(0, Some(3), &[4])],
            ..Default::default()
        };
        let merged = DocumentMapping::merge(&structural, &DocumentMapping::default());
        assert_eq!(merged.pages, structural.pages);
    }

    #[test]
    fn test_ensure_usable() {
        let mapping = DocumentMapping {
            pages: vec![page(0, Some(3), &[4]), page(1, Some(5), &[])],
            ..Default::default()
        };
        match mapping.ensure_usable() {
            Err(Error::MappingUnresolved(msg)) => assert!(msg.contains("page 2")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(DocumentMapping::default().ensure_usable().is_err());
    }

    #[test]
    fn test_resolve() {
        let mapping = scan_mapping(BYTES);
        assert_eq!(mapping.resolve(1, 1), Some(r(5)));
        assert_eq!(mapping.resolve(1, 2), None);
        assert_eq!(mapping.resolve(5, 0), None);
        assert!(mapping.contains(r(4)));
    }
}
