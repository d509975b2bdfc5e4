use super::*;
use std::cell::RefCell;

fn anon(bytes: &[u8]) -> Rc<Buffer> {
    Buffer::from_bytes(BufferId::Anonymous(0), bytes)
}

fn contents(buffer: &Buffer) -> Vec<u8> {
    buffer.clip(0, buffer.len()).unwrap()
}

#[test]
fn test_empty_buffer() {
    let buffer = anon(b"");
    assert_eq!(buffer.len(), 0);
    assert!(buffer.is_empty());
    assert!(buffer.check_integrity());
}

#[test]
fn test_from_bytes_round_trip() {
    let buffer = anon(b"hello world");
    assert_eq!(buffer.len(), 11);
    assert_eq!(contents(&buffer), b"hello world");
    assert_eq!(buffer.clip(2, 7).unwrap(), b"llo w");
    assert!(buffer.check_integrity());
}

#[test]
fn test_large_contents_split_into_chunks() {
    let bytes: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let buffer = anon(&bytes);
    assert_eq!(buffer.len(), bytes.len());
    assert_eq!(contents(&buffer), bytes);
    assert!(buffer.check_integrity());
}

#[test]
fn test_insert_into_empty() {
    let buffer = anon(b"");
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(0, 0, b"hello".to_vec()).unwrap();
    m.end();
    assert_eq!(contents(&buffer), b"hello");
    assert!(buffer.check_integrity());
}

#[test]
fn test_insert_front_middle_back() {
    let buffer = anon(b"bcd");
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(0, 0, b"a".to_vec()).unwrap();
    m.modify(3, 0, b"X".to_vec()).unwrap();
    m.modify(3, 0, b"Y".to_vec()).unwrap();
    m.end();
    // pre-edit position 3 is the old end, so X and Y land after d
    assert_eq!(contents(&buffer), b"abcdXY");
    assert!(buffer.check_integrity());
}

#[test]
fn test_insert_at_very_end() {
    let buffer = anon(b"ab");
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(2, 0, b"c".to_vec()).unwrap();
    m.end();
    assert_eq!(contents(&buffer), b"abc");
    assert!(buffer.check_integrity());
}

#[test]
fn test_erase_within_and_across_chunks() {
    let bytes: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let buffer = anon(&bytes);
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(100, 9000, Vec::new()).unwrap();
    m.end();
    let mut expect = bytes.clone();
    expect.drain(100..9100);
    assert_eq!(contents(&buffer), expect);
    assert!(buffer.check_integrity());
}

#[test]
fn test_replace() {
    let buffer = anon(b"hello world");
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(6, 5, b"weft".to_vec()).unwrap();
    m.end();
    assert_eq!(contents(&buffer), b"hello weft");
}

#[test]
fn test_out_of_bounds_modify_fails_without_change() {
    let buffer = anon(b"abc");
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    assert!(matches!(
        m.modify(2, 5, Vec::new()),
        Err(Error::BadPosition { .. })
    ));
    m.end();
    assert_eq!(contents(&buffer), b"abc");
    assert_eq!(buffer.history_len(), 1);
}

#[test]
fn test_undo_redo_round_trip() {
    let buffer = anon(b"hello");
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(5, 0, b" world".to_vec()).unwrap();
    m.end();
    assert_eq!(contents(&buffer), b"hello world");
    assert!(buffer.can_undo());

    assert!(buffer.undo(EditSource::default()));
    assert_eq!(contents(&buffer), b"hello");
    assert!(buffer.can_redo());
    assert!(buffer.check_integrity());

    assert!(buffer.redo(EditSource::default()));
    assert_eq!(contents(&buffer), b"hello world");
    assert!(buffer.check_integrity());
}

#[test]
fn test_undo_on_empty_history() {
    let buffer = anon(b"x");
    assert!(!buffer.undo(EditSource::default()));
    assert!(!buffer.redo(EditSource::default()));
}

#[test]
fn test_new_edit_truncates_redo_tail() {
    let buffer = anon(b"");
    for text in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
        let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
        let at = buffer.len();
        m.modify(at, 0, text).unwrap();
        m.end();
    }
    assert_eq!(contents(&buffer), b"abc");
    buffer.undo(EditSource::default());
    buffer.undo(EditSource::default());
    assert_eq!(contents(&buffer), b"a");
    assert_eq!(buffer.history_len(), 3);

    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(1, 0, b"z".to_vec()).unwrap();
    m.end();
    assert_eq!(contents(&buffer), b"az");
    assert_eq!(buffer.history_len(), 2);
    assert!(!buffer.can_redo());
}

#[test]
fn test_multi_modification_undo_reverses_in_order() {
    let buffer = anon(b"aXbXc");
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    // remove both X's, pre-edit positions
    m.modify(1, 1, Vec::new()).unwrap();
    m.modify(3, 1, Vec::new()).unwrap();
    m.end();
    assert_eq!(contents(&buffer), b"abc");
    buffer.undo(EditSource::default());
    assert_eq!(contents(&buffer), b"aXbXc");
    buffer.redo(EditSource::default());
    assert_eq!(contents(&buffer), b"abc");
}

#[test]
fn test_event_order_and_payloads() {
    let buffer = anon(b"abcdef");
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let log2 = Rc::clone(&log);
        buffer.begin_edit.subscribe(move |info| {
            log2.borrow_mut()
                .push(format!("begin_edit:{:?}", info.edit_type));
        });
        let log2 = Rc::clone(&log);
        buffer.begin_modify.subscribe(move |info| {
            log2.borrow_mut()
                .push(format!("begin_modify:{}:{}", info.position, info.erase_len));
        });
        let log2 = Rc::clone(&log);
        buffer.end_modify.subscribe(move |info| {
            log2.borrow_mut().push(format!(
                "end_modify:{}:{}:{}",
                info.position, info.removed_len, info.added_len
            ));
        });
        let log2 = Rc::clone(&log);
        buffer.end_edit.subscribe(move |info| {
            log2.borrow_mut()
                .push(format!("end_edit:{}", info.positions.len()));
        });
    }
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(1, 2, b"Z".to_vec()).unwrap();
    m.modify(4, 0, b"Q".to_vec()).unwrap();
    m.end();
    assert_eq!(
        *log.borrow(),
        vec![
            "begin_edit:Normal".to_string(),
            "begin_modify:1:2".to_string(),
            "end_modify:1:2:1".to_string(),
            "begin_modify:3:0".to_string(),
            "end_modify:3:0:1".to_string(),
            "end_edit:2".to_string(),
        ]
    );
    assert_eq!(contents(&buffer), b"aZdQef");
}

#[test]
fn test_modifier_commits_on_drop() {
    let buffer = anon(b"ab");
    {
        let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
        m.modify(1, 0, b"-".to_vec()).unwrap();
        // dropped without end()
    }
    assert_eq!(contents(&buffer), b"a-b");
    assert_eq!(buffer.history_len(), 1);
}

#[test]
fn test_chunk_boundary_edits_preserve_invariants() {
    let bytes = vec![7u8; MAX_CHUNK_BYTES * 3];
    let buffer = anon(&bytes);
    // edit exactly at the first chunk boundary
    let mut m = Modifier::begin(Rc::clone(&buffer), EditSource::default(), EditType::Normal);
    m.modify(MAX_CHUNK_BYTES, 0, vec![1, 2, 3]).unwrap();
    m.end();
    assert_eq!(buffer.len(), bytes.len() + 3);
    assert!(buffer.check_integrity());
    let clip = buffer
        .clip(MAX_CHUNK_BYTES - 1, MAX_CHUNK_BYTES + 4)
        .unwrap();
    assert_eq!(clip, vec![7, 1, 2, 3, 7]);
}

#[test]
fn test_byte_cursor_walks_chunks() {
    let bytes: Vec<u8> = (0..9000u32).map(|i| (i % 251) as u8).collect();
    let buffer = anon(&bytes);
    let reader = buffer.read();
    let mut cursor = reader.cursor_at(4090).unwrap();
    for expect in bytes[4090..4110].iter() {
        assert_eq!(cursor.next_byte(), Some(*expect));
    }
    let mut tail = reader.cursor_at(bytes.len()).unwrap();
    assert!(tail.is_end());
    assert_eq!(tail.next_byte(), None);
}
