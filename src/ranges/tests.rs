use super::theme::*;
use super::*;

fn registry(ranges: &[(usize, usize)]) -> OverlappingRanges<u32> {
    let mut reg = OverlappingRanges::new();
    for (i, &(start, end)) in ranges.iter().enumerate() {
        reg.insert(start, end - start, i as u32);
    }
    reg
}

fn snapshot(reg: &OverlappingRanges<u32>) -> Vec<(usize, usize)> {
    reg.iter().map(|(s, len, _)| (s, s + len)).collect()
}

#[test]
fn test_insert_keeps_start_order() {
    let reg = registry(&[(4, 9), (2, 5), (10, 12)]);
    assert_eq!(snapshot(&reg), vec![(2, 5), (4, 9), (10, 12)]);
}

#[test]
fn test_overlapping_ranges_coexist() {
    let reg = registry(&[(2, 8), (3, 5), (3, 9)]);
    assert_eq!(snapshot(&reg), vec![(2, 8), (3, 9), (3, 5)]);
}

#[test]
fn test_erase_preserves_later_positions() {
    let mut reg = registry(&[(2, 5), (4, 9), (10, 12)]);
    let q = reg.find_intersecting_range(4, 5);
    reg.erase(q.begin);
    assert_eq!(snapshot(&reg), vec![(2, 5), (10, 12)]);
}

#[test]
fn test_point_query_walk() {
    // ranges [2,5), [4,9), [10,12); point 6 intersects only [4,9)
    let reg = registry(&[(2, 5), (4, 9), (10, 12)]);
    let query = reg.find_intersecting(6);
    let mut hits = Vec::new();
    let mut at = query.begin;
    while !at.is_end() && at.cursor() != query.end.cursor() {
        let start = reg.range_start(at);
        let rec = reg.record(at).unwrap();
        if start <= 6 && 6 < start + rec.length {
            hits.push((start, start + rec.length));
        }
        at = reg.find_next_ending_after(7, at);
    }
    assert_eq!(hits, vec![(4, 9)]);
}

#[test]
fn test_point_query_first_element_is_first_candidate() {
    let reg = registry(&[(2, 5), (4, 9), (10, 12)]);
    let query = reg.find_intersecting(6);
    // the prefix begins at [4,9): [2,5) ends before the point
    assert_eq!(reg.range_start(query.begin), 4);
}

#[test]
fn test_find_next_ending_after_skips_short_ranges() {
    let reg = registry(&[(0, 3), (1, 2), (2, 20), (4, 6), (5, 18)]);
    let mut at = reg.begin_position();
    let mut hits = Vec::new();
    // walk all ranges ending at or after 10
    if reg.range_start(at) + reg.record(at).unwrap().length < 10 {
        at = reg.find_next_ending_after(10, at);
    }
    while !at.is_end() {
        let start = reg.range_start(at);
        let rec = reg.record(at).unwrap();
        hits.push((start, start + rec.length));
        at = reg.find_next_ending_after(10, at);
    }
    assert_eq!(hits, vec![(2, 20), (5, 18)]);
}

#[test]
fn test_on_modification_erase_cases() {
    // erase [3,7) over ranges [2,5), [4,9), [10,12)
    let mut reg = registry(&[(2, 5), (4, 9), (10, 12)]);
    reg.on_modification(3, 4, 0);
    assert_eq!(snapshot(&reg), vec![(2, 3), (3, 5), (6, 8)]);
}

#[test]
fn test_on_modification_drops_fully_erased() {
    let mut reg = registry(&[(2, 5), (4, 6), (10, 12)]);
    reg.on_modification(2, 6, 0);
    // [2,5) and [4,6) lie fully inside the erased region [2,8) and are
    // dropped; [10,12) shifts left by six
    assert_eq!(snapshot(&reg), vec![(4, 6)]);
}

#[test]
fn test_on_modification_pure_insert_shifts() {
    let mut reg = registry(&[(2, 5), (10, 12)]);
    reg.on_modification(6, 0, 3);
    assert_eq!(snapshot(&reg), vec![(2, 5), (13, 15)]);
}

#[test]
fn test_on_modification_insert_inside_range_grows_it() {
    let mut reg = registry(&[(2, 8)]);
    reg.on_modification(4, 0, 3);
    assert_eq!(snapshot(&reg), vec![(2, 11)]);
}

#[test]
fn test_on_modification_outside_region_intersection_invariant() {
    // ranges clipped to the region outside the edit keep their contents,
    // shifted by the edit delta
    let cases: &[(usize, usize, usize)] = &[(3, 4, 0), (3, 4, 2), (0, 1, 5), (8, 3, 3)];
    for &(start, removed, inserted) in cases {
        let mut reg = registry(&[(2, 5), (4, 9), (10, 12), (11, 20)]);
        let before = snapshot(&reg);
        reg.on_modification(start, removed, inserted);
        let after = snapshot(&reg);
        let erase_end = start + removed;
        for (&(ob, oe), &(nb, ne)) in before.iter().zip(after.iter()) {
            // clip old range to [0,start) — that part must survive verbatim
            if ob < start {
                assert_eq!(nb, ob, "case {:?}", (start, removed, inserted));
                assert_eq!(
                    ne.min(start),
                    oe.min(start),
                    "case {:?}",
                    (start, removed, inserted)
                );
            }
            // clip old range to [erase_end, ..) — survives shifted
            if oe > erase_end {
                let old_tail = oe - erase_end;
                let new_tail = ne.saturating_sub(start + inserted);
                assert_eq!(old_tail, new_tail, "case {:?}", (start, removed, inserted));
            }
        }
    }
}

#[test]
fn test_theme_layers_override() {
    let mut themes = ThemeProviders::new();
    let approx = themes.add_provider(ThemeLayer::Approximate);
    let exact = themes.add_provider(ThemeLayer::Exact);
    themes.ranges_mut(approx).unwrap().insert(
        0,
        10,
        ThemeSpec {
            color: Some([1, 1, 1, 255]),
            weight: Some(FontWeight::Bold),
            ..Default::default()
        },
    );
    themes.ranges_mut(exact).unwrap().insert(
        5,
        3,
        ThemeSpec {
            color: Some([9, 9, 9, 255]),
            ..Default::default()
        },
    );
    let (at_2, _) = themes.theme_at(2);
    assert_eq!(at_2.color, Some([1, 1, 1, 255]));
    assert_eq!(at_2.weight, Some(FontWeight::Bold));
    let (at_6, next) = themes.theme_at(6);
    // exact layer wins on color, approximate still supplies weight
    assert_eq!(at_6.color, Some([9, 9, 9, 255]));
    assert_eq!(at_6.weight, Some(FontWeight::Bold));
    assert_eq!(next, Some(8));
}

#[test]
fn test_theme_patched_on_modification() {
    let mut themes = ThemeProviders::new();
    let tok = themes.add_provider(ThemeLayer::Approximate);
    themes.ranges_mut(tok).unwrap().insert(
        10,
        5,
        ThemeSpec {
            style: Some(FontStyle::Italic),
            ..Default::default()
        },
    );
    themes.on_modification(0, 2, 6);
    let (spec, _) = themes.theme_at(16);
    assert_eq!(spec.style, Some(FontStyle::Italic));
    let (spec, _) = themes.theme_at(12);
    assert_eq!(spec.style, None);
}

#[test]
fn test_decoration_providers() {
    let mut decorations = DecorationProviders::new();
    let tok = decorations.add_provider();
    decorations
        .provider_mut(tok)
        .unwrap()
        .decorations
        .insert(4, 3, Decoration { kind: 1, cookie: 2 });
    decorations.on_modification(0, 0, 4);
    let all: Vec<(usize, usize)> = decorations
        .iter()
        .flat_map(|p| p.decorations.iter().map(|(s, l, _)| (s, l)))
        .collect();
    assert_eq!(all, vec![(8, 3)]);
}
