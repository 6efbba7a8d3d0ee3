// tests/ingest_normalize.rs
use heat_engine::ingest::normalize_text;

#[test]
fn empty_is_ok() {
    assert_eq!(normalize_text(""), "");
}

#[test]
fn strips_markup_from_feed_descriptions() {
    let s = "<p>Storm&nbsp;<b>closes</b> ports &ldquo;indefinitely&rdquo;</p><br/>";
    assert_eq!(normalize_text(s), r#"Storm closes ports "indefinitely""#);
}

#[test]
fn keeps_non_latin_text_intact() {
    let s = "  <i>東京</i>\u{00A0}株価  上昇 ";
    assert_eq!(normalize_text(s), "東京 株価 上昇");
}

#[test]
fn length_cap_counts_chars_not_bytes() {
    let s = "é".repeat(2_000);
    let n = normalize_text(&s);
    assert_eq!(n.chars().count(), 1_500);
}
