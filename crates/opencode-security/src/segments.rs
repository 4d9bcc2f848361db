//! In-file protected region discovery.
//!
//! Two sources of segments: commented marker pairs (matched across six
//! comment syntaxes, regardless of the file's actual language) and
//! AST nodes supplied by an external parser.

use regex::Regex;
use tracing::warn;

use crate::error::{SecurityError, SecurityResult};
use crate::types::{
    AstRuleConfig, MarkerConfig, Operation, ResolvedSecurityConfig, role_allows,
};

/// A contiguous byte range treated as protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Start offset (inclusive), at the opening marker or node start.
    pub start: usize,
    /// End offset (exclusive), past the closing marker or node end.
    pub end: usize,
    /// Operations denied inside the region.
    pub denied_operations: Vec<Operation>,
    /// Roles exempt from the denial.
    pub allowed_roles: Vec<String>,
}

/// A node handed over by an [`AstProvider`].
#[derive(Debug, Clone)]
pub struct AstNode {
    /// Grammar node type (e.g. `function_declaration`).
    pub node_type: String,
    /// The node's name attribute, when the grammar assigns one.
    pub name: Option<String>,
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

/// External parser capability. The engine never parses source itself;
/// it only filters the nodes a provider yields.
pub trait AstProvider: Send + Sync {
    /// Parse `content` as `language` and return its nodes.
    ///
    /// # Errors
    ///
    /// Returns a provider-specific message when parsing fails.
    fn parse(&self, language: &str, content: &str) -> Result<Vec<AstNode>, String>;
}

/// One marker occurrence found in content.
struct MarkerHit {
    start: usize,
    end: usize,
    rule_idx: usize,
    is_start: bool,
}

/// Find all marker-delimited segments in `content`.
///
/// Each configured marker pair is searched in six comment syntaxes
/// (`//`, `#`, `<!-- -->`, `/* */`, `""" """`, `''' '''`). Matches are
/// paired with a stack walk: nested regions inherit the outer rule and
/// unmatched markers are discarded.
#[must_use]
pub fn find_marker_segments(content: &str, markers: &[MarkerConfig]) -> Vec<Segment> {
    let mut hits: Vec<MarkerHit> = Vec::new();

    for (rule_idx, marker) in markers.iter().enumerate() {
        collect_hits(content, &marker.start, rule_idx, true, &mut hits);
        collect_hits(content, &marker.end, rule_idx, false, &mut hits);
    }

    hits.sort_by_key(|h| (h.start, !h.is_start));
    hits.dedup_by_key(|h| (h.start, h.rule_idx, h.is_start));

    let mut stack: Vec<(usize, usize)> = Vec::new(); // (rule_idx, start offset)
    let mut segments = Vec::new();

    for hit in hits {
        if hit.is_start {
            stack.push((hit.rule_idx, hit.start));
        } else if let Some(pos) = stack.iter().rposition(|(idx, _)| *idx == hit.rule_idx) {
            let (rule_idx, start) = stack.remove(pos);
            let marker = &markers[rule_idx];
            segments.push(Segment {
                start,
                end: hit.end,
                denied_operations: marker.denied_operations.clone(),
                allowed_roles: marker.allowed_roles.clone(),
            });
        }
        // An end with no matching start is discarded.
    }

    segments.sort_by_key(|s| s.start);
    segments
}

/// Position-anchored comment patterns for one marker token.
fn comment_patterns(token: &str) -> Vec<String> {
    let escaped = regex::escape(token);
    vec![
        format!(r"//\s*{escaped}"),
        format!(r"#\s*{escaped}"),
        format!(r"<!--\s*{escaped}\s*-->"),
        format!(r"/\*\s*{escaped}\s*\*/"),
        format!(r#""""\s*{escaped}\s*""""#),
        format!(r"'''\s*{escaped}\s*'''"),
    ]
}

fn collect_hits(
    content: &str,
    token: &str,
    rule_idx: usize,
    is_start: bool,
    hits: &mut Vec<MarkerHit>,
) {
    for pattern in comment_patterns(token) {
        let Ok(regex) = Regex::new(&pattern) else {
            warn!(pattern, "failed to compile marker pattern");
            continue;
        };
        for found in regex.find_iter(content) {
            hits.push(MarkerHit {
                start: found.start(),
                end: found.end(),
                rule_idx,
                is_start,
            });
        }
    }
}

/// Find AST-selected segments in `content`.
///
/// Only rules listing `language` are consulted. The provider parses
/// once; nodes are filtered by type and name pattern.
///
/// # Errors
///
/// Returns [`SecurityError::AstParse`] when the provider fails, and
/// [`SecurityError::InvalidNamePattern`] for an uncompilable pattern.
pub fn find_ast_segments(
    language: &str,
    content: &str,
    rules: &[AstRuleConfig],
    provider: &dyn AstProvider,
) -> SecurityResult<Vec<Segment>> {
    let applicable: Vec<&AstRuleConfig> = rules
        .iter()
        .filter(|r| r.languages.iter().any(|l| l == language))
        .collect();
    if applicable.is_empty() {
        return Ok(Vec::new());
    }

    let nodes = provider
        .parse(language, content)
        .map_err(|message| SecurityError::AstParse {
            language: language.to_owned(),
            message,
        })?;

    let mut segments = Vec::new();
    for rule in applicable {
        let name_regex =
            Regex::new(&rule.name_pattern).map_err(|e| SecurityError::InvalidNamePattern {
                pattern: rule.name_pattern.clone(),
                message: e.to_string(),
            })?;

        for node in &nodes {
            if !rule.node_types.iter().any(|t| t == &node.node_type) {
                continue;
            }
            let Some(name) = &node.name else { continue };
            if name_regex.is_match(name) {
                segments.push(Segment {
                    start: node.start,
                    end: node.end,
                    denied_operations: rule.denied_operations.clone(),
                    allowed_roles: rule.allowed_roles.clone(),
                });
            }
        }
    }

    segments.sort_by_key(|s| s.start);
    Ok(segments)
}

/// Reduce segments to the byte ranges denied for `role` performing
/// `operation`.
#[must_use]
pub fn segments_denied_for(
    segments: &[Segment],
    operation: Operation,
    role: &str,
    config: &ResolvedSecurityConfig,
) -> Vec<(usize, usize)> {
    segments
        .iter()
        .filter(|s| s.denied_operations.contains(&operation))
        .filter(|s| !role_allows(config, role, &s.allowed_roles))
        .map(|s| (s.start, s.end))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(start: &str, end: &str) -> MarkerConfig {
        MarkerConfig {
            start: start.to_owned(),
            end: end.to_owned(),
            denied_operations: vec![Operation::Read],
            allowed_roles: vec![],
        }
    }

    #[test]
    fn test_line_comment_markers() {
        let content = "fn a() {}\n// SECURITY-START\nlet key = \"k\";\n// SECURITY-END\nfn b() {}\n";
        let segments =
            find_marker_segments(content, &[marker("SECURITY-START", "SECURITY-END")]);

        assert_eq!(segments.len(), 1);
        let body = &content[segments[0].start..segments[0].end];
        assert!(body.starts_with("// SECURITY-START"));
        assert!(body.ends_with("// SECURITY-END"));
        assert!(body.contains("let key"));
    }

    #[test]
    fn test_hash_and_block_comment_markers() {
        let content = "# SECURITY-START\nsecret = 1\n# SECURITY-END\n/* SECURITY-START */ x /* SECURITY-END */";
        let segments =
            find_marker_segments(content, &[marker("SECURITY-START", "SECURITY-END")]);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_html_comment_markers() {
        let content = "<p>ok</p>\n<!-- SECURITY-START -->\n<p>hidden</p>\n<!-- SECURITY-END -->\n";
        let segments =
            find_marker_segments(content, &[marker("SECURITY-START", "SECURITY-END")]);
        assert_eq!(segments.len(), 1);
        assert!(content[segments[0].start..segments[0].end].contains("hidden"));
    }

    #[test]
    fn test_unmatched_markers_discarded() {
        let content = "// SECURITY-END\ncode\n// SECURITY-START\n";
        let segments =
            find_marker_segments(content, &[marker("SECURITY-START", "SECURITY-END")]);
        assert!(segments.is_empty());
    }

    #[test]
    fn test_nested_regions() {
        let content = "\
// OUTER-START
a
// INNER-START
b
// INNER-END
c
// OUTER-END
";
        let segments = find_marker_segments(
            content,
            &[marker("OUTER-START", "OUTER-END"), marker("INNER-START", "INNER-END")],
        );
        assert_eq!(segments.len(), 2);
        let outer = segments.iter().find(|s| s.start == 0).unwrap();
        let inner = segments.iter().find(|s| s.start != 0).unwrap();
        assert!(outer.start < inner.start && inner.end < outer.end);
    }

    #[test]
    fn test_multiple_independent_regions() {
        let content = "\
// SECURITY-START
one
// SECURITY-END
open
// SECURITY-START
two
// SECURITY-END
";
        let segments =
            find_marker_segments(content, &[marker("SECURITY-START", "SECURITY-END")]);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].end <= segments[1].start);
    }

    struct StubProvider(Vec<AstNode>);

    impl AstProvider for StubProvider {
        fn parse(&self, _language: &str, _content: &str) -> Result<Vec<AstNode>, String> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    impl AstProvider for FailingProvider {
        fn parse(&self, _language: &str, _content: &str) -> Result<Vec<AstNode>, String> {
            Err("syntax error".to_owned())
        }
    }

    fn ast_rule() -> AstRuleConfig {
        AstRuleConfig {
            languages: vec!["typescript".to_owned()],
            node_types: vec!["function_declaration".to_owned()],
            name_pattern: "^secret".to_owned(),
            denied_operations: vec![Operation::Llm],
            allowed_roles: vec![],
        }
    }

    #[test]
    fn test_ast_segments_filtered_by_type_and_name() {
        let provider = StubProvider(vec![
            AstNode {
                node_type: "function_declaration".to_owned(),
                name: Some("secretHandler".to_owned()),
                start: 10,
                end: 50,
            },
            AstNode {
                node_type: "function_declaration".to_owned(),
                name: Some("publicHandler".to_owned()),
                start: 60,
                end: 90,
            },
            AstNode {
                node_type: "class_declaration".to_owned(),
                name: Some("secretStore".to_owned()),
                start: 100,
                end: 200,
            },
        ]);

        let segments =
            find_ast_segments("typescript", "irrelevant", &[ast_rule()], &provider).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!((segments[0].start, segments[0].end), (10, 50));
    }

    #[test]
    fn test_ast_language_mismatch_skips_parse() {
        let segments =
            find_ast_segments("python", "irrelevant", &[ast_rule()], &FailingProvider).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_ast_parse_failure_is_error() {
        let result = find_ast_segments("typescript", "x", &[ast_rule()], &FailingProvider);
        assert!(matches!(result, Err(SecurityError::AstParse { .. })));
    }

    #[test]
    fn test_segments_denied_for_role_filtering() {
        let config = ResolvedSecurityConfig::new(
            None,
            vec![
                crate::types::Role {
                    name: "admin".to_owned(),
                    level: 10,
                },
                crate::types::Role {
                    name: "viewer".to_owned(),
                    level: 1,
                },
            ],
            vec![],
            vec![],
            vec![],
            None,
            None,
            None,
            vec![],
        );

        let segments = vec![Segment {
            start: 0,
            end: 10,
            denied_operations: vec![Operation::Read],
            allowed_roles: vec!["admin".to_owned()],
        }];

        assert_eq!(
            segments_denied_for(&segments, Operation::Read, "viewer", &config),
            vec![(0, 10)]
        );
        assert!(segments_denied_for(&segments, Operation::Read, "admin", &config).is_empty());
        assert!(segments_denied_for(&segments, Operation::Write, "viewer", &config).is_empty());
    }
}
