// Cross-strategy conformance tests
//
// Each scenario runs through every read path that can produce comparable
// output: the streaming reader over whole input, fixed-size chunks, a chunk
// plan with zero-length reads, tiny pooled segments, the async reader, and
// the parallel parser. All of them must agree on every record.

use csvflux::{
    parse_parallel, ChunkedSource, CsvError, CsvReader, CsvWriter, Dialect, FormatErrorKind, Quoting,
    ReaderOptions, SliceSource, VecSink, WriterOptions,
};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Rows = Vec<Vec<Vec<u8>>>;

fn to_strings(rows: Rows) -> Vec<Vec<String>> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|f| String::from_utf8(f).unwrap())
                .collect()
        })
        .collect()
}

fn small_segments() -> ReaderOptions<u8> {
    ReaderOptions {
        buffer_size: 8,
        min_read_size: 4,
        ..Default::default()
    }
}

fn whole(input: &[u8], dialect: &Dialect<u8>) -> Rows {
    CsvReader::new(SliceSource::new(input), dialect.clone(), Default::default())
        .unwrap()
        .read_all()
        .unwrap()
}

fn chunked(input: &[u8], dialect: &Dialect<u8>, plan: &[usize], options: ReaderOptions<u8>) -> Rows {
    CsvReader::new(ChunkedSource::new(input, plan), dialect.clone(), options)
        .unwrap()
        .read_all()
        .unwrap()
}

fn asynchronous(input: &[u8], dialect: &Dialect<u8>) -> Rows {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    runtime.block_on(async {
        CsvReader::new(ChunkedSource::new(input, &[5, 0, 2]), dialect.clone(), small_segments())
            .unwrap()
            .read_all_async()
            .await
            .unwrap()
    })
}

fn write_rows(rows: &[&[&str]], quoting: Quoting) -> String {
    let options = WriterOptions {
        quoting,
        ..Default::default()
    };
    let mut writer = CsvWriter::new(VecSink::new(), Dialect::rfc4180(), options).unwrap();
    for row in rows {
        writer.write_record(row.iter().map(|f| f.as_bytes())).unwrap();
    }
    writer.complete(None).unwrap();
    String::from_utf8(writer.into_inner().into_inner()).unwrap()
}

// ---------------------------------------------------------------------------
// Conformance macro
// ---------------------------------------------------------------------------

macro_rules! conformance {
    ($name:ident, input: $input:expr, dialect: $dialect:expr, expected: $expected:expr) => {
        #[test]
        fn $name() {
            let input: &[u8] = $input;
            let dialect: Dialect<u8> = $dialect;
            let expected: Vec<Vec<&str>> = $expected;
            let expected: Vec<Vec<String>> = expected
                .iter()
                .map(|row| row.iter().map(|s| s.to_string()).collect())
                .collect();

            let reference = to_strings(whole(input, &dialect));
            assert_eq!(reference, expected, "FAILED: whole input");

            let single = to_strings(chunked(input, &dialect, &[1], Default::default()));
            assert_eq!(single, expected, "FAILED: 1-token chunks");

            let odd = to_strings(chunked(input, &dialect, &[17], Default::default()));
            assert_eq!(odd, expected, "FAILED: 17-token chunks");

            let zeros = to_strings(chunked(input, &dialect, &[0, 3, 0, 1], Default::default()));
            assert_eq!(zeros, expected, "FAILED: zero-length chunk plan");

            let small = to_strings(chunked(input, &dialect, &[64], small_segments()));
            assert_eq!(small, expected, "FAILED: small segments");

            let pending = to_strings(asynchronous(input, &dialect));
            assert_eq!(pending, expected, "FAILED: async");

            let parallel = to_strings(parse_parallel(input, &dialect).unwrap());
            assert_eq!(parallel, expected, "FAILED: parallel");
        }
    };
}

// ---------------------------------------------------------------------------
// Scenario: plain LF records
// ---------------------------------------------------------------------------

conformance!(
    plain_lf_records,
    input: b"1,Alice,true\n2,Bob,false\n",
    dialect: Dialect::lf(),
    expected: vec![vec!["1", "Alice", "true"], vec!["2", "Bob", "false"]]
);

// ---------------------------------------------------------------------------
// Scenario: quoted delimiter, CRLF
// ---------------------------------------------------------------------------

conformance!(
    quoted_delimiter_crlf,
    input: b"a,\"b,c\",d\r\n",
    dialect: Dialect::rfc4180(),
    expected: vec![vec!["a", "b,c", "d"]]
);

// ---------------------------------------------------------------------------
// Scenario: escape mode
// ---------------------------------------------------------------------------

conformance!(
    escape_mode_delimiter,
    input: b"a,^,b,c",
    dialect: Dialect::lf().with_escape(Some(b'^')).unwrap(),
    expected: vec![vec!["a", ",b", "c"]]
);

conformance!(
    escape_mode_quoted_newline,
    input: b"\"x^\"y\nz\",w\nlast,^^\n",
    dialect: Dialect::lf().with_escape(Some(b'^')).unwrap(),
    expected: vec![vec!["x\"y\nz", "w"], vec!["last", "^"]]
);

// ---------------------------------------------------------------------------
// Scenario: newline inside quotes
// ---------------------------------------------------------------------------

conformance!(
    crlf_inside_quotes,
    input: b"alpha,\"be\r\nta\",gamma\r\ndelta,epsilon,zeta\r\n",
    dialect: Dialect::rfc4180(),
    expected: vec![vec!["alpha", "be\r\nta", "gamma"], vec!["delta", "epsilon", "zeta"]]
);

// ---------------------------------------------------------------------------
// Scenario: doubled quotes and no trailing newline
// ---------------------------------------------------------------------------

conformance!(
    doubled_quotes_no_trailing_newline,
    input: b"a,\"say \"\"hi\"\"\"\r\nc,\"d\"\"\"",
    dialect: Dialect::rfc4180(),
    expected: vec![vec!["a", "say \"hi\""], vec!["c", "d\""]]
);

// ---------------------------------------------------------------------------
// Scenario: empty input, empty fields, empty lines
// ---------------------------------------------------------------------------

conformance!(
    empty_input,
    input: b"",
    dialect: Dialect::lf(),
    expected: vec![]
);

conformance!(
    empty_fields,
    input: b",,\n\"\",x\n",
    dialect: Dialect::lf(),
    expected: vec![vec!["", "", ""], vec!["", "x"]]
);

conformance!(
    empty_lines,
    input: b"a\n\nb\n",
    dialect: Dialect::lf(),
    expected: vec![vec!["a"], vec![""], vec!["b"]]
);

// ---------------------------------------------------------------------------
// Scenario: newline autodetection
// ---------------------------------------------------------------------------

conformance!(
    autodetected_crlf,
    input: b"a,\"x\ny\"\r\nb,c\r\n",
    dialect: Dialect::autodetect(),
    expected: vec![vec!["a", "x\ny"], vec!["b", "c"]]
);

// ---------------------------------------------------------------------------
// Scenario: many records crossing every segment boundary
// ---------------------------------------------------------------------------

#[test]
fn long_input_agrees_everywhere() {
    let input: String = (0..300).map(|i| format!("{i},\"q\"\"{i}\",\"multi\nline\"\n")).collect();
    let dialect = Dialect::lf();
    let reference = whole(input.as_bytes(), &dialect);
    assert_eq!(reference.len(), 300);
    assert_eq!(reference[7], vec![b"7".to_vec(), b"q\"7".to_vec(), b"multi\nline".to_vec()]);

    let plans: [&[usize]; 4] = [&[1], &[17], &[0, 3, 0, 1], &[4096]];
    for plan in plans {
        assert_eq!(chunked(input.as_bytes(), &dialect, plan, small_segments()), reference, "plan {plan:?}");
    }
    assert_eq!(asynchronous(input.as_bytes(), &dialect), reference);
    assert_eq!(parse_parallel(input.as_bytes(), &dialect).unwrap(), reference);
}

// ---------------------------------------------------------------------------
// Scenario: UTF-16 code units
// ---------------------------------------------------------------------------

#[test]
fn utf16_agrees_with_bytes() {
    let text = "a,\"b,\"\"c\"\"\"\r\n\u{e9},\"d\r\ne\"\r\n";
    let wide: Vec<u16> = text.encode_utf16().collect();
    let dialect = Dialect::<u16>::rfc4180();

    let streamed = CsvReader::new(ChunkedSource::new(&wide, &[3]), dialect.clone(), Default::default())
        .unwrap()
        .read_all()
        .unwrap();
    let parallel = parse_parallel(&wide, &dialect).unwrap();
    assert_eq!(streamed, parallel);

    let decoded: Vec<Vec<String>> = streamed
        .iter()
        .map(|row| row.iter().map(|f| String::from_utf16(f).unwrap()).collect())
        .collect();
    let narrow = to_strings(whole(text.as_bytes(), &Dialect::rfc4180()));
    assert_eq!(decoded, narrow);
    assert_eq!(decoded[1], vec!["\u{e9}".to_string(), "d\r\ne".to_string()]);
}

// ---------------------------------------------------------------------------
// Writer scenarios
// ---------------------------------------------------------------------------

#[test]
fn writer_doubles_quotes() {
    assert_eq!(write_rows(&[&["he said \"hi\""]], Quoting::AUTO), "\"he said \"\"hi\"\"\"\r\n");
}

#[test]
fn writer_never_policy_is_verbatim() {
    assert_eq!(write_rows(&[&[","]], Quoting::NEVER), ",\r\n");
}

#[test]
fn written_output_reads_back() {
    let rows: &[&[&str]] = &[&["plain", "with,comma", ""], &["\"quoted\"", "line\r\nbreak", " pad "]];
    let text = write_rows(rows, Quoting::AUTO | Quoting::LEADING_OR_TRAILING_SPACES);
    let read = to_strings(whole(text.as_bytes(), &Dialect::rfc4180()));
    let expected: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|s| s.to_string()).collect())
        .collect();
    assert_eq!(read, expected);
}

// ---------------------------------------------------------------------------
// Error scenarios
// ---------------------------------------------------------------------------

#[test]
fn autodetect_without_newline_is_a_format_error() {
    let input = vec![b'x'; 10_000];
    let mut reader = CsvReader::new(SliceSource::new(&input), Dialect::autodetect(), Default::default()).unwrap();
    let err = reader.read_record().unwrap_err();
    match err {
        CsvError::Format(e) => assert_eq!(e.kind, FormatErrorKind::NewlineNotFound { limit: 4096 }),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unterminated_quote_fails_in_every_path() {
    let input = b"ok\n\"open,field\n";
    let dialect = Dialect::lf();

    let streamed = CsvReader::new(SliceSource::new(input), dialect.clone(), Default::default())
        .unwrap()
        .read_all()
        .unwrap_err();
    let parallel = parse_parallel(input, &dialect).unwrap_err();

    let (s, p) = (streamed.as_format().unwrap(), parallel.as_format().unwrap());
    assert_eq!(s.kind, p.kind);
    assert_eq!((s.record, s.position), (p.record, p.position));
    assert_eq!(s.record, Some(2));
}
