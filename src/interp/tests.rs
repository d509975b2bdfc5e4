use super::*;
use crate::buffer::{Buffer, BufferId, EditSource, EditType, Modifier};
use crate::caret::{CaretData, CaretSet, Selection};
use crate::encoding::{UTF16LE, UTF8};

fn doc(text: &str) -> (Rc<Buffer>, Rc<Interpretation>) {
    let buffer = Buffer::from_bytes(BufferId::Anonymous(0), text.as_bytes());
    let interp = Interpretation::new(Rc::clone(&buffer), &UTF8);
    (buffer, interp)
}

fn modify(buffer: &Rc<Buffer>, pos: usize, erase: usize, insert: &[u8]) {
    let mut m = Modifier::begin(Rc::clone(buffer), EditSource::default(), EditType::Normal);
    m.modify(pos, erase, insert.to_vec()).unwrap();
    m.end();
}

fn segments(interp: &Interpretation) -> Vec<(usize, LineEnding)> {
    interp
        .linebreaks()
        .iter()
        .map(|seg| (seg.nonbreak, seg.ending))
        .collect()
}

#[test]
fn test_empty_document() {
    let (_, interp) = doc("");
    assert_eq!(interp.num_codepoints(), 0);
    assert_eq!(interp.num_chars(), 0);
    assert_eq!(interp.num_lines(), 1);
    assert_eq!(segments(&interp), vec![(0, LineEnding::None)]);
    assert!(interp.check_integrity());
}

#[test]
fn test_initial_decode_lines() {
    let (buffer, interp) = doc("");
    modify(&buffer, 0, 0, b"hello\nworld");
    assert_eq!(buffer.len(), 11);
    assert_eq!(interp.num_codepoints(), 11);
    assert_eq!(
        segments(&interp),
        vec![(5, LineEnding::Lf), (5, LineEnding::None)]
    );
    let lb = interp.linebreaks();
    let at = lb.line_of_char(6).unwrap();
    assert_eq!(at.line, 1);
    assert_eq!(at.column, 0);
    drop(lb);
    assert!(interp.check_integrity());
}

#[test]
fn test_crlf_merge_on_insert() {
    // insert CR before an existing LF
    let (buffer, interp) = doc("hello\nworld");
    let chars_before = interp.num_chars();
    modify(&buffer, 5, 0, b"\r");
    assert_eq!(
        segments(&interp),
        vec![(5, LineEnding::CrLf), (5, LineEnding::None)]
    );
    // codepoints grew by one, characters did not (CRLF merged)
    assert_eq!(interp.num_codepoints(), 12);
    assert_eq!(interp.num_chars(), chars_before);
    let lb = interp.linebreaks();
    assert_eq!(lb.line_of_char(6).unwrap().line, 1);
    drop(lb);
    assert!(interp.check_integrity());
}

#[test]
fn test_crlf_split_on_erase() {
    // erase the CR of a CRLF
    let (buffer, interp) = doc("hello\r\nworld");
    let seen: Rc<RefCell<Vec<(usize, usize, usize)>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        interp.end_edit.subscribe(move |info| {
            seen.borrow_mut().extend(
                info.character_positions
                    .iter()
                    .map(|p| (p.position, p.removed, p.added)),
            );
        });
    }
    modify(&buffer, 5, 1, b"");
    assert_eq!(
        segments(&interp),
        vec![(5, LineEnding::Lf), (5, LineEnding::None)]
    );
    assert_eq!(interp.num_chars(), 11);
    assert_eq!(*seen.borrow(), vec![(5, 1, 0)]);
    assert!(interp.check_integrity());
}

#[test]
fn test_crlf_split_by_insert_between() {
    let (buffer, interp) = doc("ab\r\ncd");
    let chars_before = interp.num_chars(); // 2 + 1 + 2 = 5
    modify(&buffer, 3, 0, b"x");
    // "ab\rx\ncd": CR and LF are now separate hard breaks
    assert_eq!(
        segments(&interp),
        vec![
            (2, LineEnding::Cr),
            (1, LineEnding::Lf),
            (2, LineEnding::None)
        ]
    );
    assert_eq!(interp.num_chars(), chars_before + 2);
    assert!(interp.check_integrity());
}

#[test]
fn test_erase_between_crlf_grows_char_count() {
    // erasing the bytes between CR and LF splits them; erasing a range that
    // ends between them leaves two separate endings
    let (buffer, interp) = doc("ab\r\ncd");
    modify(&buffer, 1, 2, b""); // erase "b\r" -> "a\ncd"
    assert_eq!(
        segments(&interp),
        vec![(1, LineEnding::Lf), (2, LineEnding::None)]
    );
    assert!(interp.check_integrity());
}

#[test]
fn test_multibyte_utf8_edit_mid_codepoint() {
    let (buffer, interp) = doc("aé b");
    // é is two bytes (0xC3 0xA9) at byte offset 1; erase its second byte
    modify(&buffer, 2, 1, b"");
    // the truncated lead byte decodes as a replacement codepoint
    assert_eq!(interp.num_codepoints(), 4);
    assert!(interp.check_integrity());
}

#[test]
fn test_insert_completing_a_codepoint() {
    let (buffer, interp) = doc("");
    modify(&buffer, 0, 0, &[0xC3]); // truncated lead byte
    assert_eq!(interp.num_codepoints(), 1);
    modify(&buffer, 1, 0, &[0xA9]); // completes "é"
    assert_eq!(interp.num_codepoints(), 1);
    let reader = interp.read();
    let it = reader.codepoint_iter(0).unwrap();
    assert_eq!(it.codepoint(), Some(0xE9));
    assert!(it.is_valid());
    drop(reader);
    assert!(interp.check_integrity());
}

#[test]
fn test_utf16_document_edits() {
    let text: Vec<u8> = "hi\r\nthere"
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    let buffer = Buffer::from_bytes(BufferId::Anonymous(1), &text);
    let interp = Interpretation::new(Rc::clone(&buffer), &UTF16LE);
    assert_eq!(interp.num_codepoints(), 9);
    assert_eq!(
        segments(&interp),
        vec![(2, LineEnding::CrLf), (5, LineEnding::None)]
    );
    // insert "x" (UTF-16LE) after "hi"
    modify(&buffer, 4, 0, &[0x78, 0x00]);
    assert_eq!(interp.num_codepoints(), 10);
    assert_eq!(
        segments(&interp),
        vec![(3, LineEnding::CrLf), (5, LineEnding::None)]
    );
    assert!(interp.check_integrity());
}

#[test]
fn test_undo_redo_restores_interpretation_state() {
    let (buffer, interp) = doc("hello\nworld");
    let before_segments = segments(&interp);
    let before_cps = interp.num_codepoints();
    let before_bytes = buffer.clip(0, buffer.len()).unwrap();

    modify(&buffer, 5, 3, b"\r\nXY");
    assert_ne!(segments(&interp), before_segments);

    assert!(buffer.undo(EditSource::default()));
    assert_eq!(segments(&interp), before_segments);
    assert_eq!(interp.num_codepoints(), before_cps);
    assert_eq!(buffer.clip(0, buffer.len()).unwrap(), before_bytes);
    assert!(interp.check_integrity());
    assert!(buffer.check_integrity());

    assert!(buffer.redo(EditSource::default()));
    let mut expect = b"hello".to_vec();
    expect.extend_from_slice(b"\r\nXY");
    expect.extend_from_slice(b"rld");
    assert_eq!(buffer.clip(0, buffer.len()).unwrap(), expect);
    assert!(interp.check_integrity());
}

#[test]
fn test_event_ordering_across_layers() {
    let (buffer, interp) = doc("abc");
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let log2 = Rc::clone(&log);
        buffer.begin_edit.subscribe(move |_| log2.borrow_mut().push("buffer.begin_edit"));
        let log2 = Rc::clone(&log);
        buffer.end_edit.subscribe(move |_| log2.borrow_mut().push("buffer.end_edit"));
        let log2 = Rc::clone(&log);
        interp
            .modification_decoded
            .subscribe(move |_| log2.borrow_mut().push("interp.modification_decoded"));
        let log2 = Rc::clone(&log);
        interp
            .end_modification
            .subscribe(move |_| log2.borrow_mut().push("interp.end_modification"));
        let log2 = Rc::clone(&log);
        interp
            .end_edit
            .subscribe(move |_| log2.borrow_mut().push("interp.end_edit"));
    }
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(1, 1, b"XY".to_vec()).unwrap();
    m.modify(3, 0, b"Z".to_vec()).unwrap();
    m.end();
    assert_eq!(
        *log.borrow(),
        vec![
            "buffer.begin_edit",
            "interp.modification_decoded",
            "interp.end_modification",
            "interp.modification_decoded",
            "interp.end_modification",
            "buffer.end_edit",
            "interp.end_edit",
        ]
    );
}

#[test]
fn test_modification_decoded_sees_old_registry() {
    let (buffer, interp) = doc("hello\nworld");
    let captured = Rc::new(RefCell::new(None));
    {
        let captured = Rc::clone(&captured);
        let interp2 = Rc::downgrade(&interp);
        interp.modification_decoded.subscribe(move |info| {
            let interp = interp2.upgrade().unwrap();
            // chunk tree and line registry still reflect the old document
            *captured.borrow_mut() =
                Some((info.start_character, info.past_end_character, interp.num_chars()));
        });
    }
    modify(&buffer, 0, 5, b"");
    let (start, past_end, chars_at_event) = captured.borrow().unwrap();
    assert_eq!(start, 0);
    assert_eq!(past_end, 5);
    assert_eq!(chars_at_event, 11);
    assert_eq!(interp.num_chars(), 6);
}

#[test]
fn test_converters_round_trip() {
    let (_, interp) = doc("aé\r\n\u{1F600}z");
    // codepoints: a(1B) é(2B) CR LF emoji(4B) z -> 6 codepoints
    let reader = interp.read();
    let mut cp2b = reader.codepoint_byte_converter();
    assert_eq!(cp2b.codepoint_to_byte(0).unwrap(), 0);
    assert_eq!(cp2b.codepoint_to_byte(1).unwrap(), 1);
    assert_eq!(cp2b.codepoint_to_byte(2).unwrap(), 3);
    assert_eq!(cp2b.codepoint_to_byte(4).unwrap(), 5);
    assert_eq!(cp2b.codepoint_to_byte(5).unwrap(), 9);
    assert_eq!(cp2b.codepoint_to_byte(6).unwrap(), 10);

    // byte -> codepoint -> byte lands on the codepoint's first byte
    for (byte, expect_cp, expect_start) in [
        (0, 0, 0),
        (1, 1, 1),
        (2, 1, 1),
        (3, 2, 3),
        (5, 4, 5),
        (7, 4, 5),
        (9, 5, 9),
    ] {
        let mut fresh = reader.codepoint_byte_converter();
        assert_eq!(fresh.byte_to_codepoint(byte).unwrap(), (expect_cp, expect_start));
    }

    let mut c2cp = reader.char_codepoint_converter();
    // characters: a é CRLF emoji z -> 5 characters
    assert_eq!(c2cp.char_to_codepoint(2).unwrap(), 2);
    assert_eq!(c2cp.char_to_codepoint(3).unwrap(), 4);
    let mut cp2c = reader.char_codepoint_converter();
    assert_eq!(cp2c.codepoint_to_char(2).unwrap(), 2);
    // the LF of the CRLF maps back to the CRLF character
    assert_eq!(cp2c.codepoint_to_char(3).unwrap(), 2);
    assert_eq!(cp2c.codepoint_to_char(4).unwrap(), 3);

    let mut c2b = reader.char_byte_converter();
    assert_eq!(c2b.char_to_byte(3).unwrap(), 5);
    let mut b2c = reader.char_byte_converter();
    assert_eq!(b2c.byte_to_char(7).unwrap(), 3);
}

#[test]
fn test_codepoint_iterator() {
    let (_, interp) = doc("a\u{00E9}b");
    let reader = interp.read();
    let mut it = reader.codepoint_iter(0).unwrap();
    let mut cps = Vec::new();
    while let Some(cp) = it.codepoint() {
        cps.push(cp);
        it.advance();
    }
    assert_eq!(cps, vec!['a' as u32, 0xE9, 'b' as u32]);
    assert!(it.ended());
}

#[test]
fn test_char_iterator_crlf_is_one_character() {
    let (_, interp) = doc("ab\r\ncd");
    let reader = interp.read();
    let mut it = reader.char_iter(0).unwrap();
    let mut chars = Vec::new();
    while !it.ended() {
        if it.is_linebreak() {
            chars.push(('\n' as u32, it.line_ending()));
        } else {
            chars.push((it.codepoints().codepoint().unwrap(), it.line_ending()));
        }
        it.advance();
    }
    assert_eq!(chars.len(), 5);
    assert_eq!(chars[2].1, LineEnding::CrLf);
    assert_eq!(chars[3].0, 'c' as u32);
}

#[test]
fn test_char_iterator_from_middle() {
    let (_, interp) = doc("hello\nworld");
    let reader = interp.read();
    let it = reader.char_iter(6).unwrap();
    assert_eq!(it.line(), 1);
    assert_eq!(it.column(), 0);
    assert_eq!(it.codepoints().codepoint(), Some('w' as u32));
}

#[test]
fn test_edit_insert_multi_caret() {
    let (_, interp) = doc("ab\ncd");
    let mut carets = CaretSet::new();
    carets.add(Selection::cursor(1), CaretData::default());
    carets.add(Selection::cursor(4), CaretData::default());
    let first = carets.begin();
    carets.remove(first).unwrap();
    let text = interp.encode_str("--");
    interp
        .edit_insert(&carets, &text, EditSource::default())
        .unwrap();
    let buffer = interp.buffer();
    assert_eq!(buffer.clip(0, buffer.len()).unwrap(), b"a--b\nc--d");
    assert!(interp.check_integrity());
}

#[test]
fn test_edit_insert_replaces_selections() {
    let (_, interp) = doc("hello world");
    let mut carets = CaretSet::new();
    // merges with the initial bare caret at 0
    carets.add(Selection::range(0, 5), CaretData::default());
    let text = interp.encode_str("bye");
    interp
        .edit_insert(&carets, &text, EditSource::default())
        .unwrap();
    let buffer = interp.buffer();
    assert_eq!(buffer.clip(0, buffer.len()).unwrap(), b"bye world");
}

#[test]
fn test_edit_backspace_and_delete() {
    let (_, interp) = doc("abc");
    let mut carets = CaretSet::new();
    carets.add(Selection::cursor(2), CaretData::default());
    let first = carets.begin();
    carets.remove(first).unwrap();
    interp
        .edit_backspace(&carets, EditSource::default())
        .unwrap();
    let buffer = interp.buffer();
    assert_eq!(buffer.clip(0, buffer.len()).unwrap(), b"ac");

    let carets = CaretSet::new(); // caret at 0
    interp.edit_delete(&carets, EditSource::default()).unwrap();
    assert_eq!(buffer.clip(0, buffer.len()).unwrap(), b"c");
}

#[test]
fn test_backspace_at_document_start_is_noop() {
    let (buffer, interp) = doc("xyz");
    let carets = CaretSet::new(); // single caret at 0
    interp
        .edit_backspace(&carets, EditSource::default())
        .unwrap();
    assert_eq!(buffer.clip(0, buffer.len()).unwrap(), b"xyz");
    assert_eq!(buffer.history_len(), 0);
}

#[test]
fn test_themes_patched_through_edits() {
    use crate::ranges::theme::{ThemeLayer, ThemeSpec};
    let (buffer, interp) = doc("hello world");
    let token = interp.themes_mut().add_provider(ThemeLayer::Approximate);
    let styled = ThemeSpec {
        color: Some([1, 2, 3, 255]),
        ..Default::default()
    };
    interp
        .themes_mut()
        .ranges_mut(token)
        .unwrap()
        .insert(6, 5, styled);
    // insert two characters at the front: the range shifts to [8, 13)
    modify(&buffer, 0, 0, b"##");
    let themes = interp.themes();
    assert_eq!(themes.theme_at(9).0.color, Some([1, 2, 3, 255]));
    assert_eq!(themes.theme_at(7).0.color, None);
    assert_eq!(themes.theme_at(7).1, Some(8));
}

#[test]
fn test_large_document_incremental_edits() {
    let mut text = String::new();
    for i in 0..2000 {
        text.push_str(&format!("line number {}\n", i));
    }
    let (buffer, interp) = doc(&text);
    assert_eq!(interp.num_lines(), 2001);
    // edit deep inside
    let pos = text.len() / 2;
    modify(&buffer, pos, 3, b"@@@@");
    assert_eq!(buffer.len(), text.len() + 1);
    assert!(interp.check_integrity());
    // edit at the very start and very end
    modify(&buffer, 0, 0, b"begin ");
    modify(&buffer, buffer.len(), 0, b" end");
    assert!(interp.check_integrity());
}

#[test]
fn test_chunk_splice_across_chunk_boundary() {
    // force multiple decode chunks, then edit across their boundary
    let text = "x".repeat(2500);
    let (buffer, interp) = doc(&text);
    modify(&buffer, 995, 10, b"ABCDEFGHIJKLMNO");
    assert_eq!(interp.num_codepoints(), 2505);
    assert!(interp.check_integrity());
}

#[test]
fn test_default_line_ending() {
    let (_, interp) = doc("");
    assert_eq!(interp.default_line_ending(), LineEnding::Lf);
    interp.set_default_line_ending(LineEnding::CrLf);
    assert_eq!(interp.default_line_ending(), LineEnding::CrLf);
}
