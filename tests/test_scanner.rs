//! Integration tests for content scanning and mutation primitives.

use pdf_patch::config::ScanOptions;
use pdf_patch::content::mutation::{apply_all, bulk_translate_rects, plan};
use pdf_patch::content::operators::{decode_literal, encode_literal};
use pdf_patch::content::{
    group_rects_as_table, scan_page, scan_stream, tokenize, EditableItem, Matrix, Mutation, ScanRequest,
    XObjectKind,
};
use proptest::prelude::*;
use std::collections::HashMap;

fn scan(text: &str) -> pdf_patch::PageItems {
    let mut kinds = HashMap::new();
    kinds.insert("Im1".to_string(), XObjectKind::Image);
    scan_page(&ScanRequest {
        page_index: 0,
        streams: vec![text.to_string()],
        xobject_kinds: kinds,
        options: ScanOptions::default(),
    })
}

mod scenario_tests {
    use super::*;

    #[test]
    fn test_image_draw_with_transform() {
        let page = scan("1 0 0 1 100 200 cm /Im1 Do");
        assert_eq!(page.xobjects.len(), 1);
        let draw = &page.xobjects[0];
        assert_eq!(draw.name, "Im1");
        assert_eq!(draw.kind, XObjectKind::Image);
        let transform = draw.transform.as_ref().unwrap();
        assert_eq!(transform.matrix, Matrix::new(1.0, 0.0, 0.0, 1.0, 100.0, 200.0));
        assert_eq!(transform.range, 0..18);
    }

    #[test]
    fn test_replace_plain_show_text() {
        let src = "(Hello) Tj";
        let page = scan(src);
        assert_eq!(page.text_runs.len(), 1);
        let run = &page.text_runs[0];
        assert_eq!(run.text, "Hello");
        assert!(run.position.is_none());

        let item = EditableItem::TextRun(run.clone());
        let replacement = plan(&item, src, &Mutation::ReplaceText { text: "Hi".into() }, 4).unwrap();
        assert_eq!(replacement.apply(src).unwrap(), "[(Hi)] TJ");
    }

    #[test]
    fn test_rescale_inserts_transform() {
        let src = "10 10 50 20 re S";
        let page = scan(src);
        let rect = page.rects[0].clone();
        assert!(rect.transform.is_none());
        assert_eq!(rect.paint.as_ref().unwrap().operator, "S");

        let item = EditableItem::Rect(rect);
        let replacement = plan(&item, src, &Mutation::Rescale { sx: 2.0, sy: 2.0 }, 4).unwrap();
        assert!(replacement.insertion);
        assert_eq!(replacement.apply(src).unwrap(), "2 0 0 2 0 0 cm 10 10 50 20 re S");
    }
}

mod coalescing_tests {
    use super::*;

    const FORM: &str = "BT /F1 12 Tf 1 0 0 1 72 700 Tm (Name:) Tj 1 0 0 1 74 700 Tm (Jane) Tj \
                        1 0 0 1 72 680 Tm (Date:) Tj 1 0 0 1 300 680 Tm (today) Tj ET";

    #[test]
    fn test_rows_and_gaps_split_runs() {
        let page = scan(FORM);
        let texts: Vec<&str> = page.text_runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Name:Jane", "Date:", "today"]);
        assert_eq!(page.text_runs[0].font.as_ref().unwrap().name, "F1");
        assert_eq!(page.text_runs[0].segments.len(), 2);
    }

    #[test]
    fn test_rescan_is_identical() {
        assert_eq!(scan(FORM), scan(FORM));
    }

    #[test]
    fn test_operators_inside_strings_are_ignored() {
        let page = scan("(1 0 0 1 5 5 cm /Im1 Do) Tj");
        assert!(page.xobjects.is_empty());
        assert_eq!(page.text_runs[0].text, "1 0 0 1 5 5 cm /Im1 Do");
    }

    #[test]
    fn test_malformed_stream_keeps_earlier_items() {
        let page = scan("/Im1 Do (unterminated");
        assert_eq!(page.xobjects.len(), 1);
        assert_eq!(page.truncated_streams, vec![0]);
    }
}

mod table_tests {
    use super::*;

    #[test]
    fn test_grid_of_cells() {
        let src = "10 100 50 20 re 60 100 50 20 re 10 80 50 20 re 60 80 50 20 re S";
        let page = scan(src);
        let table = group_rects_as_table(&page.rects, 2.0, 4.0);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].y, 100.0);
        assert_eq!(table.rows[0].cells.len(), 2);
        assert!(page.rects.iter().all(|r| r.paint.is_some()));
    }

    #[test]
    fn test_move_table_rows() {
        let src = "10 100 50 20 re 60 100 50 20 re S";
        let page = scan(src);
        let replacements = bulk_translate_rects(&page.rects, src, 5.0, -5.0, 4).unwrap();
        assert_eq!(
            apply_all(src, &replacements).unwrap(),
            "15 95 50 20 re 65 95 50 20 re S"
        );
    }
}

mod mutation_tests {
    use super::*;

    #[test]
    fn test_translate_existing_transform() {
        let src = "q 50 0 0 50 300 400 cm /Im1 Do Q";
        let page = scan(src);
        let item = EditableItem::XObjectDraw(page.xobjects[0].clone());
        let replacement = plan(&item, src, &Mutation::Translate { dx: 10.0, dy: -0.5 }, 4).unwrap();
        assert_eq!(replacement.apply(src).unwrap(), "q 50 0 0 50 310 399.5 cm /Im1 Do Q");
    }

    #[test]
    fn test_font_size_rewrites_tf() {
        let src = "BT /F2 9 Tf 1 0 0 1 72 700 Tm (x) Tj ET";
        let page = scan(src);
        let item = EditableItem::TextRun(page.text_runs[0].clone());
        let replacement = plan(&item, src, &Mutation::SetFontSize { size: 14.5 }, 4).unwrap();
        assert_eq!(replacement.apply(src).unwrap(), "BT /F2 14.5 Tf 1 0 0 1 72 700 Tm (x) Tj ET");
    }

    #[test]
    fn test_stale_item_is_rejected() {
        let src = "(Hello) Tj";
        let page = scan(src);
        let item = EditableItem::TextRun(page.text_runs[0].clone());
        let replacement = plan(&item, src, &Mutation::ReplaceText { text: "Hi".into() }, 4).unwrap();
        assert!(replacement.apply("q (Hello) Tj Q").is_err());
    }

    #[test]
    fn test_path_item() {
        let src = "0 0 m 10 0 l 10 10 l h f";
        let page = scan(src);
        assert_eq!(page.paths.len(), 1);
        let path = &page.paths[0];
        assert_eq!(path.segment_count, 4);
        assert_eq!(path.paint.operator, "f");
        assert_eq!(path.preview, src);
    }
}

proptest! {
    #[test]
    fn prop_literal_round_trip(s in "[ -~\u{a0}-\u{ff}]{0,40}") {
        let src = format!("({}) Tj", encode_literal(&s));
        let tokens = tokenize(&src);
        prop_assert_eq!(tokens.len(), 1);
        prop_assert_eq!(&tokens[0].text, &s);
        prop_assert_eq!(decode_literal(&encode_literal(&s)), s);
    }

    #[test]
    fn prop_scan_is_deterministic(ys in proptest::collection::vec(0u16..800, 1..12)) {
        let mut src = String::from("BT ");
        for (i, y) in ys.iter().enumerate() {
            src.push_str(&format!("1 0 0 1 {} {} Tm (t{}) Tj ", i * 3, y, i));
        }
        src.push_str("ET");
        let kinds = HashMap::new();
        let options = ScanOptions::default();
        let first = scan_stream(0, 0, &src, &kinds, &options);
        let second = scan_stream(0, 0, &src, &kinds, &options);
        prop_assert_eq!(first, second);
    }
}
