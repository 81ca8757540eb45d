use buildorch::exec::{LineBuffer, TextEncoding};
use proptest::prelude::*;

fn drain(buffer: &mut LineBuffer, finished: bool) -> Vec<String> {
    buffer.next_lines(finished).collect()
}

/// Feed `input` split at `cuts`, collecting lines after every chunk.
fn chunked(input: &[u8], cuts: &[usize], encoding: TextEncoding) -> Vec<String> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (input.len() + 1)).collect();
    points.sort_unstable();
    points.dedup();

    let mut buffer = LineBuffer::new(encoding);
    let mut lines = Vec::new();
    let mut start = 0;
    for point in points {
        buffer.append(&input[start..point]);
        lines.extend(drain(&mut buffer, false));
        start = point;
    }
    buffer.append(&input[start..]);
    lines.extend(drain(&mut buffer, true));
    lines
}

fn whole(input: &[u8], encoding: TextEncoding) -> Vec<String> {
    let mut buffer = LineBuffer::new(encoding);
    buffer.append(input);
    drain(&mut buffer, true)
}

proptest! {
    #[test]
    fn utf8_lines_do_not_depend_on_chunking(
        text in "[ab\u{e9}\n\r]{0,64}",
        cuts in proptest::collection::vec(any::<usize>(), 0..8),
    ) {
        let input = text.as_bytes();
        let expected = whole(input, TextEncoding::Utf8);
        let got = chunked(input, &cuts, TextEncoding::Utf8);
        prop_assert_eq!(&got, &expected);
        prop_assert!(got.iter().all(|l| !l.is_empty()));
        prop_assert!(got.iter().all(|l| !l.contains('\n') && !l.contains('\r')));
    }

    #[test]
    fn utf16_lines_do_not_depend_on_chunking(
        text in "[xy\u{3a9}\n]{0,32}",
        cuts in proptest::collection::vec(any::<usize>(), 0..8),
    ) {
        let input: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let expected: Vec<String> = text
            .split('\n')
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        prop_assert_eq!(whole(&input, TextEncoding::Utf16), expected.clone());
        prop_assert_eq!(chunked(&input, &cuts, TextEncoding::Utf16), expected);
    }
}

#[test]
fn crlf_and_blank_lines_collapse() {
    let mut buffer = LineBuffer::new(TextEncoding::Utf8);
    buffer.append(b"\r\n\r\nfirst\r\n\n\nsecond\rthird");
    assert_eq!(drain(&mut buffer, false), vec!["first", "second"]);
    assert_eq!(drain(&mut buffer, true), vec!["third"]);
    assert_eq!(buffer.pending(), 0);
}
