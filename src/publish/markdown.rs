use crate::publish::autolink::FIND_LINKS;
use crate::publish::highlight::write_code_block;
use crate::publish::sanitize::sanitize;
use html_escape::{encode_double_quoted_attribute, encode_text};
use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag};
use pulldown_cmark_toc::TableOfContents;

pub const TOC_MARKER: &str = "[TOC]";
pub const TOC_CONTAINER_CLASS: &str = "toc";

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options
}

/// Markdown to sanitized HTML. Used for both the article page and the
/// editor preview.
pub fn render(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    sanitize(&markdown_to_html(raw))
}

/// Stage before sanitization. The output is NOT safe to embed.
pub fn markdown_to_html(raw: &str) -> String {
    let events = coalesce_text(Parser::new_ext(raw, options()));
    let events = replace_toc_markers(events, raw);

    let mut rewriter = Rewriter::default();
    let mut rewritten = Vec::with_capacity(events.len());
    for event in events {
        rewriter.push(event, &mut rewritten);
    }

    let mut output = String::with_capacity(raw.len() * 2);
    html::push_html(&mut output, rewritten.into_iter());
    output
}

/// The parser splits text at every potential inline delimiter. Link detection
/// and the TOC marker need whole runs.
fn coalesce_text<'a>(parser: impl Iterator<Item = Event<'a>>) -> Vec<Event<'a>> {
    let mut events: Vec<Event<'a>> = Vec::new();
    for event in parser {
        if let (Some(Event::Text(previous)), Event::Text(text)) = (events.last_mut(), &event) {
            let mut joined = previous.to_string();
            joined.push_str(text);
            *previous = CowStr::from(joined);
            continue;
        }
        events.push(event);
    }
    events
}

fn render_toc(raw: &str) -> String {
    let toc = TableOfContents::new(raw).to_cmark();
    let mut out = format!(r#"<div class="{TOC_CONTAINER_CLASS}">"#);
    html::push_html(&mut out, Parser::new(&toc));
    out.push_str("</div>\n");
    out
}

fn replace_toc_markers<'a>(events: Vec<Event<'a>>, raw: &str) -> Vec<Event<'a>> {
    let mut out = Vec::with_capacity(events.len());
    let mut toc: Option<String> = None;
    let mut idx = 0;
    while idx < events.len() {
        let is_marker = matches!(
            events.get(idx..idx + 3),
            Some([Event::Start(Tag::Paragraph), Event::Text(text), Event::End(Tag::Paragraph)])
                if text.trim() == TOC_MARKER
        );
        if is_marker {
            let html = toc.get_or_insert_with(|| render_toc(raw)).clone();
            out.push(Event::Html(html.into()));
            idx += 3;
        } else {
            out.push(events[idx].clone());
            idx += 1;
        }
    }
    out
}

struct Code {
    language: Option<String>,
    source: String,
}

#[derive(Default)]
struct Rewriter {
    code: Option<Code>,
    /// Markdown links and images currently open.
    link_depth: usize,
    /// Raw `<a>` elements currently open.
    html_anchor_depth: usize,
}

impl Rewriter {
    fn push<'a>(&mut self, event: Event<'a>, out: &mut Vec<Event<'a>>) {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info.split_whitespace().next().map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                self.code = Some(Code {
                    language,
                    source: String::new(),
                });
            }
            Event::End(Tag::CodeBlock(_)) => {
                if let Some(code) = self.code.take() {
                    let mut html = String::new();
                    write_code_block(&mut html, &code.source, code.language.as_deref());
                    out.push(Event::Html(html.into()));
                }
            }
            Event::Text(text) if self.code.is_some() => {
                if let Some(code) = self.code.as_mut() {
                    code.source.push_str(&text);
                }
            }
            Event::Start(tag @ (Tag::Link(..) | Tag::Image(..))) => {
                self.link_depth += 1;
                out.push(Event::Start(tag));
            }
            Event::End(tag @ (Tag::Link(..) | Tag::Image(..))) => {
                self.link_depth = self.link_depth.saturating_sub(1);
                out.push(Event::End(tag));
            }
            Event::Html(html) => {
                self.track_raw_anchors(&html);
                out.push(Event::Html(html));
            }
            Event::SoftBreak => out.push(Event::HardBreak),
            Event::Text(text) if self.link_depth == 0 && self.html_anchor_depth == 0 => {
                autolink(text, out)
            }
            event => out.push(event),
        }
    }

    fn track_raw_anchors(&mut self, html: &str) {
        let (opened, closed) = anchor_tags(html);
        self.html_anchor_depth = (self.html_anchor_depth + opened).saturating_sub(closed);
    }
}

/// Counts `<a ...>` and `</a>` tags, ignoring other tags that start with `a`.
fn anchor_tags(html: &str) -> (usize, usize) {
    let bytes = html.as_bytes();
    let (mut opened, mut closed) = (0, 0);
    for (idx, _) in html.match_indices('<') {
        let mut name = idx + 1;
        let closing = bytes.get(name) == Some(&b'/');
        if closing {
            name += 1;
        }
        if !matches!(bytes.get(name), Some(b'a' | b'A')) {
            continue;
        }
        match bytes.get(name + 1) {
            Some(b'>' | b'/') | None => {}
            Some(c) if c.is_ascii_whitespace() => {}
            _ => continue,
        }
        if closing {
            closed += 1;
        } else {
            opened += 1;
        }
    }
    (opened, closed)
}

fn autolink<'a>(text: CowStr<'a>, out: &mut Vec<Event<'a>>) {
    let spans = FIND_LINKS(&text);
    if spans.is_empty() {
        out.push(Event::Text(text));
        return;
    }

    let mut cursor = 0;
    for span in spans {
        if span.start > cursor {
            out.push(Event::Text(text[cursor..span.start].to_string().into()));
        }
        let anchor = format!(
            r#"<a href="{}">{}</a>"#,
            encode_double_quoted_attribute(&span.href),
            encode_text(&text[span.start..span.end]),
        );
        out.push(Event::Html(anchor.into()));
        cursor = span.end;
    }
    if cursor < text.len() {
        out.push(Event::Text(text[cursor..].to_string().into()));
    }
}
