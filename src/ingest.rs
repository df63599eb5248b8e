//! Minimal N-Triples ingest path shared by the index-builder and blob-
//! builder binaries (spec §1 excludes the full RDF ingest parser —
//! Turtle/N-Quads — from this crate's scope; this is the CLI-layer
//! convenience that reads the one format the core engine's on-disk
//! permutations actually need: flat subject/predicate/object triples).

use crate::error::{EngineError, EngineResult};
use crate::value::{Id, Vocabulary};
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One parsed triple term, still a raw lexical string (IRI with angle
/// brackets, blank node, or quoted literal). The vocabulary is keyed on
/// this exact string so re-running the builder over the same input
/// yields the same vocabulary.
pub type Term = String;

/// Splits one N-Triples line into subject/predicate/object terms. This is
/// deliberately minimal: it recognizes `<...>` IRIs, `"..."`-quoted
/// literals (with an optional `^^<...>` or `@lang` suffix kept as part of
/// the term), and `_:...` blank nodes, separated by single spaces, and
/// requires the line end with `.`. It does not resolve relative IRIs,
/// unescape string literals, or allow stray whitespace inside terms —
/// reasonable for a reference index builder, not a general Turtle engine.
pub fn parse_ntriples_line(line: &str) -> Option<(Term, Term, Term)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let body = line.strip_suffix('.')?.trim_end();
    let mut rest = body;
    let subject = take_term(&mut rest)?;
    let predicate = take_term(&mut rest)?;
    let object = take_object_term(rest.trim())?;
    Some((subject, predicate, object))
}

fn take_term(rest: &mut &str) -> Option<Term> {
    let s = rest.trim_start();
    let (term, remainder) = if let Some(stripped) = s.strip_prefix('<') {
        let end = stripped.find('>')?;
        (format!("<{}>", &stripped[..end]), &stripped[end + 1..])
    } else if let Some(stripped) = s.strip_prefix("_:") {
        let end = stripped.find(char::is_whitespace).unwrap_or(stripped.len());
        (format!("_:{}", &stripped[..end]), &stripped[end..])
    } else {
        return None;
    };
    *rest = remainder;
    Some(term)
}

/// The object term may be an IRI/blank node (same as subject/predicate) or
/// a quoted literal, optionally suffixed with `^^<datatype>` or `@lang`.
fn take_object_term(s: &str) -> Option<Term> {
    if s.starts_with('<') || s.starts_with("_:") {
        let mut rest = s;
        return take_term(&mut rest);
    }
    let stripped = s.strip_prefix('"')?;
    let bytes = stripped.as_bytes();
    let mut end = None;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'"' && (i == 0 || bytes[i - 1] != b'\\') {
            end = Some(i);
            break;
        }
        i += 1;
    }
    let end = end?;
    Some(format!("\"{}\"{}", &stripped[..end], &stripped[end + 1..]))
}

/// Read and parse every triple in `path`. A line that is neither blank,
/// a comment, nor a well-formed triple is a hard `EngineError::Parse`.
pub fn read_terms(path: &Path) -> EngineResult<Vec<(Term, Term, Term)>> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut triples = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_ntriples_line(&line) {
            Some(triple) => triples.push(triple),
            None if line.trim().is_empty() || line.trim().starts_with('#') => {}
            None => {
                return Err(EngineError::Parse(format!(
                    "{}:{}: malformed N-Triples line",
                    path.display(),
                    lineno + 1
                )))
            }
        }
    }
    Ok(triples)
}

/// The fixed graph id every triple is assigned by this ingest path. See
/// DESIGN.md: N-Triples has no graph component, so every row uses the
/// same default-graph id rather than allocating a vocabulary entry for it.
pub fn default_graph_id() -> Id {
    Id::from_int(0)
}

/// Build a sorted [`Vocabulary`] over every distinct term in `triples`.
pub fn build_vocabulary(triples: &[(Term, Term, Term)]) -> Vocabulary {
    let mut distinct_terms: BTreeSet<Term> = BTreeSet::new();
    for (s, p, o) in triples {
        distinct_terms.insert(s.clone());
        distinct_terms.insert(p.clone());
        distinct_terms.insert(o.clone());
    }
    Vocabulary::from_sorted_strings(distinct_terms.into_iter().collect())
}

/// Map parsed triples to fixed-width `[s, p, o, g]` `Id` rows against an
/// already-built vocabulary.
pub fn triples_to_rows(triples: &[(Term, Term, Term)], vocabulary: &Vocabulary) -> Vec<Vec<Id>> {
    triples
        .iter()
        .map(|(s, p, o)| {
            let s_id = Id::from_vocab_index(vocabulary.get_id(s).expect("term was inserted into vocabulary above"));
            let p_id = Id::from_vocab_index(vocabulary.get_id(p).expect("term was inserted into vocabulary above"));
            let o_id = Id::from_vocab_index(vocabulary.get_id(o).expect("term was inserted into vocabulary above"));
            vec![s_id, p_id, o_id, default_graph_id()]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_triple_line() {
        let (s, p, o) = parse_ntriples_line("<http://a> <http://p> <http://b> .").unwrap();
        assert_eq!(s, "<http://a>");
        assert_eq!(p, "<http://p>");
        assert_eq!(o, "<http://b>");
    }

    #[test]
    fn parses_a_literal_object() {
        let (_, _, o) = parse_ntriples_line("<http://a> <http://p> \"hello\" .").unwrap();
        assert_eq!(o, "\"hello\"");
    }

    #[test]
    fn parses_a_typed_literal_object() {
        let (_, _, o) = parse_ntriples_line("<http://a> <http://p> \"42\"^^<http://www.w3.org/2001/XMLSchema#int> .").unwrap();
        assert_eq!(o, "\"42\"^^<http://www.w3.org/2001/XMLSchema#int>");
    }

    #[test]
    fn blank_and_comment_lines_parse_to_none() {
        assert!(parse_ntriples_line("").is_none());
        assert!(parse_ntriples_line("# a comment").is_none());
    }

    #[test]
    fn build_vocabulary_dedupes_and_sorts() {
        let triples = vec![
            ("<b>".to_string(), "<p>".to_string(), "<a>".to_string()),
            ("<a>".to_string(), "<p>".to_string(), "<b>".to_string()),
        ];
        let vocab = build_vocabulary(&triples);
        assert_eq!(vocab.len(), 3);
    }
}
