//! Fixture documents with exact offsets.

#![allow(dead_code)]

use std::collections::BTreeMap;

/// Object bodies keyed by number; serialized as classic or xref-stream files.
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    objects: BTreeMap<u32, Vec<u8>>,
    root: u32,
    info: Option<u32>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            root: 1,
            ..Default::default()
        }
    }

    /// Add `N 0 obj <body> endobj`.
    pub fn object(mut self, id: u32, body: &str) -> Self {
        self.objects.insert(id, body.as_bytes().to_vec());
        self
    }

    /// Add an unfiltered stream object.
    pub fn stream(mut self, id: u32, extra: &str, data: &[u8]) -> Self {
        let mut body = format!("<< /Length {}{} >>\nstream\n", data.len(), extra).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.objects.insert(id, body);
        self
    }

    pub fn info(mut self, id: u32) -> Self {
        self.info = Some(id);
        self
    }

    fn size(&self) -> u32 {
        self.objects.keys().next_back().map_or(1, |max| max + 1)
    }

    fn write_objects(&self, out: &mut Vec<u8>) -> BTreeMap<u32, usize> {
        let mut offsets = BTreeMap::new();
        for (id, body) in &self.objects {
            offsets.insert(*id, out.len());
            out.extend_from_slice(format!("{} 0 obj\n", id).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }
        offsets
    }

    fn trailer_refs(&self) -> String {
        let mut refs = format!("/Root {} 0 R", self.root);
        if let Some(info) = self.info {
            refs.push_str(&format!(" /Info {} 0 R", info));
        }
        refs
    }

    /// Single revision with a classic xref table.
    pub fn classic(&self) -> Vec<u8> {
        let mut out = b"%PDF-1.4\n".to_vec();
        let offsets = self.write_objects(&mut out);
        let size = self.size();

        let xref_at = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
        for n in 0..size {
            match offsets.get(&n) {
                Some(offset) => out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes()),
                None => out.extend_from_slice(b"0000000000 65535 f \n"),
            }
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} {} >>\nstartxref\n{}\n%%EOF\n",
                size,
                self.trailer_refs(),
                xref_at
            )
            .as_bytes(),
        );
        out
    }

    /// Single revision whose cross-reference section is an uncompressed
    /// xref stream numbered one past the highest object.
    pub fn xref_stream(&self) -> Vec<u8> {
        let mut out = b"%PDF-1.5\n".to_vec();
        let mut offsets = self.write_objects(&mut out);
        let xref_id = self.size();
        let xref_at = out.len();
        offsets.insert(xref_id, xref_at);

        let mut packed = Vec::new();
        for n in 0..=xref_id {
            match offsets.get(&n) {
                Some(offset) => {
                    packed.push(1);
                    packed.extend_from_slice(&(*offset as u32).to_be_bytes());
                    packed.extend_from_slice(&[0, 0]);
                },
                None => packed.extend_from_slice(&[0, 0, 0, 0, 0, 0xFF, 0xFF]),
            }
        }

        out.extend_from_slice(
            format!(
                "{} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] {} /Length {} >>\nstream\n",
                xref_id,
                xref_id + 1,
                self.trailer_refs(),
                packed.len()
            )
            .as_bytes(),
        );
        out.extend_from_slice(&packed);
        out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_at).as_bytes());
        out
    }
}

/// Catalog (1), page tree (2), an image XObject `/Im1` (3), then for each
/// page its page object followed by one object per content stream.
pub fn pages_fixture(pages: &[&[&str]]) -> Fixture {
    let mut fixture = Fixture::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .stream(3, " /Type /XObject /Subtype /Image /Width 1 /Height 1", b"\x00");

    let mut next = 4;
    let mut kids = Vec::new();
    for streams in pages {
        let page_id = next;
        let content_ids: Vec<u32> = (page_id + 1..page_id + 1 + streams.len() as u32).collect();
        next = page_id + 1 + streams.len() as u32;
        kids.push(format!("{} 0 R", page_id));

        let contents = match content_ids.as_slice() {
            [single] => format!("{} 0 R", single),
            many => format!(
                "[{}]",
                many.iter().map(|id| format!("{} 0 R", id)).collect::<Vec<_>>().join(" ")
            ),
        };
        fixture = fixture.object(
            page_id,
            &format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Resources << /XObject << /Im1 3 0 R >> >> /Contents {} >>",
                contents
            ),
        );
        for (id, text) in content_ids.iter().zip(streams.iter()) {
            fixture = fixture.stream(*id, "", text.as_bytes());
        }
    }

    fixture.object(
        2,
        &format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages.len()),
    )
}

/// One page, one content stream.
pub fn single_page(text: &str) -> Vec<u8> {
    pages_fixture(&[&[text]]).classic()
}
