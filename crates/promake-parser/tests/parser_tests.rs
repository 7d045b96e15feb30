use promake_parser::{DiskProvider, Grammar, Parser, ProFileCache, TextProvider};
use promake_types::{CollectingHandler, Op, ProFileRef, ProKey};
use std::io::Write;
use std::path::Path;

fn compile(text: &str) -> (ProFileRef, CollectingHandler) {
    let handler = CollectingHandler::new();
    let pro = Parser::new(&handler).parse(Path::new("/t/in.pro"), text, 1, Grammar::Full);
    (pro, handler)
}

#[test]
fn parse_file_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.pro");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "TEMPLATE = app").unwrap();
    writeln!(f, "SOURCES += main.cpp").unwrap();
    drop(f);

    let handler = CollectingHandler::new();
    let parser = Parser::new(&handler);
    let pro = parser.parse_file(&DiskProvider, &path).unwrap();
    assert!(pro.is_ok());
    assert_eq!(pro.file_name(), path.as_path());
    assert_eq!(pro.directory(), dir.path());
}

#[test]
fn parse_file_missing_returns_none() {
    let handler = CollectingHandler::new();
    let parser = Parser::new(&handler);
    assert!(parser
        .parse_file(&DiskProvider, Path::new("/no/such/file.pro"))
        .is_none());
}

#[test]
fn cache_serves_compiled_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cached.pro");
    std::fs::write(&path, "CONFIG += release\n").unwrap();

    let cache = ProFileCache::new();
    let handler = CollectingHandler::new();
    let parser = Parser::new(&handler);
    let first = cache
        .pro_file(&path, || parser.parse_file(&DiskProvider, &path))
        .unwrap();

    // Change the file on disk; the cache must keep serving the old stream.
    std::fs::write(&path, "CONFIG += debug\n").unwrap();
    let second = cache
        .pro_file(&path, || panic!("must not re-read"))
        .unwrap();
    assert_eq!(first.words(), second.words());

    cache.discard(&path);
    let third = cache
        .pro_file(&path, || parser.parse_file(&DiskProvider, &path))
        .unwrap();
    assert_ne!(first.words(), third.words());
}

#[test]
fn value_grammar_emits_value_stream_only() {
    let handler = CollectingHandler::new();
    let pro = Parser::new(&handler).parse(Path::new("/t/v"), "a b$$V c", 1, Grammar::Value);
    assert!(pro.is_ok());
    let mut r = pro.reader();
    assert_eq!(r.next_op().unwrap().0, Op::Line);
    r.read_u16();
    let (op, fresh) = r.next_op().unwrap();
    assert_eq!((op, fresh), (Op::HashLiteral, true));
    assert_eq!(r.read_hash_str().as_str(), "a");
    // "b" abuts the expansion, so it stays a plain fragment.
    let (op, fresh) = r.next_op().unwrap();
    assert_eq!((op, fresh), (Op::Literal, true));
    assert_eq!(r.read_str(), "b");
    let (op, fresh) = r.next_op().unwrap();
    assert_eq!((op, fresh), (Op::Variable, false));
    assert_eq!(r.read_hash_str().as_str(), "V");
    let (op, fresh) = r.next_op().unwrap();
    assert_eq!((op, fresh), (Op::HashLiteral, true));
    assert_eq!(r.read_hash_str().as_str(), "c");
    assert_eq!(r.next_op().unwrap().0, Op::ValueTerminator);
    assert!(r.at_end());
}

#[test]
fn whole_value_words_carry_their_hash() {
    let (pro, _) = compile("CONFIG += release\n");
    let mut r = pro.reader();
    assert_eq!(r.next_op().unwrap().0, Op::Line);
    r.read_u16();
    assert_eq!(r.next_op().unwrap().0, Op::Append);
    r.read_hash_str();
    assert_eq!(r.next_op().unwrap().0, Op::HashLiteral);
    let key = r.read_hash_str();
    assert_eq!(key, ProKey::new("release"));
    assert_eq!(key.hash_value(), ProKey::new("release").hash_value());
}

#[test]
fn start_line_offsets_diagnostics() {
    let handler = CollectingHandler::new();
    let pro = Parser::new(&handler).parse(Path::new("/t/s"), "\nX Y = 1", 40, Grammar::Full);
    assert!(!pro.is_ok());
    let msgs = handler.messages();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].line, 41);
    assert_eq!(msgs[0].file.as_deref(), Some("/t/s"));
}

#[test]
fn nested_scopes_and_calls() {
    let (pro, h) = compile(
        "unix {\n\
         !macx:contains(CONFIG, thread) {\n\
         LIBS += -lpthread\n\
         } else: LIBS += -lc\n\
         }\n",
    );
    assert!(pro.is_ok(), "{:?}", h.messages());
}

#[test]
fn quoting_keeps_spaces_in_one_element() {
    let (pro, _) = compile("DEFINES += \"NAME=hello world\"\n");
    let mut r = pro.reader();
    assert_eq!(r.next_op().unwrap().0, Op::Line);
    r.read_u16();
    assert_eq!(r.next_op().unwrap().0, Op::Append);
    r.read_hash_str();
    assert_eq!(r.next_op().unwrap().0, Op::HashLiteral);
    assert_eq!(r.read_hash_str().as_str(), "NAME=hello world");
    assert_eq!(r.next_op().unwrap().0, Op::ValueTerminator);
}

#[test]
fn hash_in_quotes_is_not_a_comment() {
    let (pro, _) = compile("V = \"a#b\"\n");
    let mut r = pro.reader();
    assert_eq!(r.next_op().unwrap().0, Op::Line);
    r.read_u16();
    assert_eq!(r.next_op().unwrap().0, Op::Assign);
    r.read_hash_str();
    assert_eq!(r.next_op().unwrap().0, Op::HashLiteral);
    assert_eq!(r.read_hash_str().as_str(), "a#b");
}

#[test]
fn branch_blocks_can_be_skipped_without_decoding() {
    // A reader that only understands block lengths must be able to hop
    // over the whole conditional in two skips.
    let (pro, _) = compile("win32 {\n  A = 1\n  B = 2\n  C = 3\n} else {\n  D = 4\n}\nE = 5\n");
    let mut r = pro.reader();
    assert_eq!(r.next_op().unwrap().0, Op::Line);
    r.read_u16();
    assert_eq!(r.next_op().unwrap().0, Op::Condition);
    r.read_hash_str();
    assert_eq!(r.next_op().unwrap().0, Op::Branch);
    let then_len = r.read_block_len();
    r.skip(then_len);
    let else_len = r.read_block_len();
    r.skip(else_len);
    // Lands exactly on the statement after the conditional.
    assert_eq!(r.next_op().unwrap().0, Op::Line);
    r.read_u16();
    assert_eq!(r.next_op().unwrap().0, Op::Assign);
    assert_eq!(r.read_hash_str().as_str(), "E");
}

#[test]
fn unbalanced_brace_reported_at_eof() {
    let (pro, h) = compile("unix {\nA = 1\n");
    assert!(!pro.is_ok());
    assert!(h
        .messages()
        .iter()
        .any(|m| m.text.contains("missing closing brace")));
}

#[test]
fn custom_provider_feeds_parser() {
    struct OneFile;
    impl TextProvider for OneFile {
        fn read_text(&self, path: &Path) -> std::io::Result<String> {
            if path == Path::new("/virtual/x.pro") {
                Ok("TARGET = x\n".to_string())
            } else {
                Err(std::io::Error::from(std::io::ErrorKind::NotFound))
            }
        }
        fn exists(&self, path: &Path) -> bool {
            path == Path::new("/virtual/x.pro")
        }
    }
    let handler = CollectingHandler::new();
    let parser = Parser::new(&handler);
    assert!(parser
        .parse_file(&OneFile, Path::new("/virtual/x.pro"))
        .is_some());
    assert!(parser
        .parse_file(&OneFile, Path::new("/virtual/y.pro"))
        .is_none());
}
