use color_eyre::{Report, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt::Write;
use tracing::{debug, warn};
use tree_sitter::{Language, Parser};
use tree_sitter_highlight::{HighlightConfiguration, HighlightEvent, Highlighter};

pub const HIGHLIGHT_CONTAINER_CLASS: &str = "highlight";

const HIGHLIGHT_NAMES: &[&str] = &[
    "attribute",
    "comment",
    "constant",
    "constant.builtin",
    "function.builtin",
    "function",
    "keyword",
    "number",
    "operator",
    "property",
    "punctuation",
    "punctuation.bracket",
    "punctuation.delimiter",
    "string",
    "string.special",
    "tag",
    "type",
    "type.builtin",
    "variable",
    "variable.builtin",
    "variable.parameter",
];

/// Grammars tried, in this order, for code blocks without a language.
const DETECTION_ORDER: &[&str] = &["rust", "python", "javascript", "c", "java", "toml"];
/// Blocks larger than this are not worth parsing several times over.
const DETECTION_LIMIT: usize = 64 * 1024;

pub struct Grammar {
    pub name: &'static str,
    language: Language,
    config: HighlightConfiguration,
}

static GRAMMARS: Lazy<HashMap<&'static str, Grammar>> = Lazy::new(|| {
    let specs: Vec<(&'static str, Language, &str, &str, &str)> = vec![
        ("c", tree_sitter_c::language(), tree_sitter_c::HIGHLIGHT_QUERY, "", ""),
        ("cpp", tree_sitter_cpp::language(), tree_sitter_cpp::HIGHLIGHT_QUERY, "", ""),
        (
            "ts",
            tree_sitter_typescript::language_typescript(),
            tree_sitter_typescript::HIGHLIGHT_QUERY,
            "",
            tree_sitter_typescript::LOCALS_QUERY,
        ),
        (
            "tsx",
            tree_sitter_typescript::language_tsx(),
            tree_sitter_typescript::HIGHLIGHT_QUERY,
            "",
            tree_sitter_typescript::LOCALS_QUERY,
        ),
        (
            "javascript",
            tree_sitter_javascript::language(),
            tree_sitter_javascript::HIGHLIGHT_QUERY,
            tree_sitter_javascript::INJECTION_QUERY,
            tree_sitter_javascript::LOCALS_QUERY,
        ),
        (
            "jsx",
            tree_sitter_javascript::language(),
            tree_sitter_javascript::JSX_HIGHLIGHT_QUERY,
            tree_sitter_javascript::INJECTION_QUERY,
            tree_sitter_javascript::LOCALS_QUERY,
        ),
        ("java", tree_sitter_java::language(), tree_sitter_java::HIGHLIGHT_QUERY, "", ""),
        ("toml", tree_sitter_toml::language(), tree_sitter_toml::HIGHLIGHT_QUERY, "", ""),
        ("rust", tree_sitter_rust::language(), tree_sitter_rust::HIGHLIGHT_QUERY, "", ""),
        ("python", tree_sitter_python::language(), tree_sitter_python::HIGHLIGHT_QUERY, "", ""),
        (
            "ruby",
            tree_sitter_ruby::language(),
            tree_sitter_ruby::HIGHLIGHT_QUERY,
            "",
            tree_sitter_ruby::LOCALS_QUERY,
        ),
    ];

    specs
        .into_iter()
        .filter_map(|(name, language, highlights, injections, locals)| {
            match HighlightConfiguration::new(language, highlights, injections, locals) {
                Ok(mut config) => {
                    config.configure(HIGHLIGHT_NAMES);
                    Some((
                        name,
                        Grammar {
                            name,
                            language,
                            config,
                        },
                    ))
                }
                Err(why) => {
                    warn!(language = name, ?why, "highlight queries rejected, language disabled");
                    None
                }
            }
        })
        .collect()
});

pub fn grammar_by_name(lang: &str) -> Option<&'static Grammar> {
    let lang = lang.trim().to_ascii_lowercase();
    match GRAMMARS.get(lang.as_str()) {
        Some(g) => Some(g),
        None => match lang.as_str() {
            "h" => GRAMMARS.get("c"),
            "c_plus_plus" | "c++" | "cc" | "hpp" => GRAMMARS.get("cpp"),
            "typescript" => GRAMMARS.get("ts"),
            "js" | "ecmascript" | "node" | "mjs" => GRAMMARS.get("javascript"),
            "rs" => GRAMMARS.get("rust"),
            "py" | "python3" | "py3" | "pyw" => GRAMMARS.get("python"),
            "rb" => GRAMMARS.get("ruby"),
            _ => None,
        },
    }
}

/// Picks the first grammar, in a fixed order, that parses `source` cleanly.
pub fn detect_language(source: &str) -> Option<&'static str> {
    if source.trim().is_empty() || source.len() > DETECTION_LIMIT {
        return None;
    }

    let mut parser = Parser::new();
    for name in DETECTION_ORDER {
        let grammar = match GRAMMARS.get(name) {
            Some(g) => g,
            None => continue,
        };
        if parser.set_language(grammar.language).is_err() {
            continue;
        }
        let tree = match parser.parse(source, None) {
            Some(tree) => tree,
            None => continue,
        };
        let root = tree.root_node();
        if !root.has_error() && root.named_child_count() > 0 {
            return Some(grammar.name);
        }
    }
    None
}

fn class_for(highlight: usize) -> String {
    let name = HIGHLIGHT_NAMES.get(highlight).copied().unwrap_or("other");
    format!("hl-{}", name.replace('.', "-"))
}

pub fn parse_highlight_write_code<W>(writer: &mut W, source: &str, grammar: &Grammar) -> Result<()>
where
    W: Write,
{
    let mut highlighter = Highlighter::new();
    let highlights = highlighter.highlight(&grammar.config, source.as_bytes(), None, |injected| {
        grammar_by_name(injected).map(|g| &g.config)
    })
    .map_err(|why| Report::msg(format!("highlighter failed to start: {why:?}")))?;

    for highlight in highlights {
        let highlight =
            highlight.map_err(|why| Report::msg(format!("highlighting aborted: {why:?}")))?;
        match highlight {
            HighlightEvent::Source { start, end } => {
                let text = source
                    .get(start..end)
                    .ok_or_else(|| Report::msg("highlight range splits a character"))?;
                escape_to_writer(writer, text)?;
            }
            HighlightEvent::HighlightStart(start) => {
                write!(writer, r#"<span class="{}">"#, class_for(start.0))?;
            }
            HighlightEvent::HighlightEnd => {
                write!(writer, "</span>")?;
            }
        }
    }

    Ok(())
}

pub fn escape_to_writer<W>(writer: &mut W, code: &str) -> Result<()>
where
    W: Write,
{
    writer.write_str(&html_escape::encode_safe(code))?;
    Ok(())
}

/// Info strings are author controlled; only keep what a language name uses.
fn language_label(lang: &str) -> String {
    lang.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '#' | '.'))
        .take(32)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Writes a complete highlighted block:
/// `<div class="highlight"><pre><code class="language-…">…</code></pre></div>`.
pub fn write_code_block(out: &mut String, source: &str, lang: Option<&str>) {
    let (grammar, label) = match lang.map(language_label).filter(|l| !l.is_empty()) {
        Some(label) => {
            let grammar = grammar_by_name(&label);
            if grammar.is_none() {
                debug!(%label, "no grammar for code block language");
            }
            (grammar, Some(label))
        }
        None => {
            let grammar = detect_language(source).and_then(grammar_by_name);
            (grammar, grammar.map(|g| g.name.to_string()))
        }
    };

    out.push_str(r#"<div class=""#);
    out.push_str(HIGHLIGHT_CONTAINER_CLASS);
    out.push_str(r#""><pre><code"#);
    if let Some(label) = label {
        out.push_str(r#" class="language-"#);
        out.push_str(&label);
        out.push('"');
    }
    out.push('>');

    let mut body = String::with_capacity(source.len() * 2);
    let highlighted = match grammar {
        Some(grammar) => parse_highlight_write_code(&mut body, source, grammar),
        None => Err(Report::msg("no grammar")),
    };
    if let Err(why) = highlighted {
        if grammar.is_some() {
            warn!(?why, "highlighting failed, writing plain code");
        }
        body.clear();
        body.push_str(&html_escape::encode_safe(source));
    }
    out.push_str(&body);
    out.push_str("</code></pre></div>\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_grammars() {
        assert_eq!(grammar_by_name("Rust").map(|g| g.name), Some("rust"));
        assert_eq!(grammar_by_name("rs").map(|g| g.name), Some("rust"));
        assert_eq!(grammar_by_name("py3").map(|g| g.name), Some("python"));
        assert!(grammar_by_name("brainfuck").is_none());
    }

    #[test]
    fn detection_is_deterministic() {
        let source = "fn main() {\n    println!(\"hi\");\n}\n";
        assert_eq!(detect_language(source), Some("rust"));
        assert_eq!(detect_language(source), detect_language(source));
        assert_eq!(detect_language("   \n"), None);
    }

    #[test]
    fn known_language_gets_spans() {
        let mut out = String::new();
        write_code_block(&mut out, "fn main() {}", Some("rust"));
        assert!(out.starts_with(r#"<div class="highlight"><pre><code class="language-rust">"#));
        assert!(out.contains(r#"<span class="hl-keyword">fn</span>"#), "{out}");
        assert!(out.ends_with("</code></pre></div>\n"));
    }

    #[test]
    fn unknown_language_is_escaped_plainly() {
        let mut out = String::new();
        write_code_block(&mut out, "<b>&</b>", Some("klingon\"><script>"));
        assert!(out.contains(r#"class="language-klingonscript""#), "{out}");
        assert!(out.contains("&lt;b&gt;&amp;&lt;"));
        assert!(!out.contains("<span"));
    }
}
