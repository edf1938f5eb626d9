use pulldown_cmark::{CowStr, Event, Parser, Tag};

use crate::{clock, db::{Message, User}, include_res, res::escape_html};

const SAFE_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

/// Relative URLs and the schemes in `SAFE_SCHEMES` pass; anything else becomes `#`.
fn safe_url(url: CowStr<'_>) -> CowStr<'_> {
    // browsers ignore whitespace and control characters inside a scheme
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .collect();
    let scheme = match cleaned.find([':', '/', '?', '#']) {
        Some(at) if cleaned[at..].starts_with(':') => Some(cleaned[..at].to_ascii_lowercase()),
        _ => None,
    };

    match scheme {
        Some(scheme) if !SAFE_SCHEMES.contains(&scheme.as_str()) => CowStr::Borrowed("#"),
        _ => url,
    }
}

/// Markdown to HTML with raw HTML passed through as text and link targets
/// limited to safe schemes.
fn render_markdown(content: &str) -> String {
    let parser = Parser::new(content).map(|event| match event {
        Event::Html(html) | Event::InlineHtml(html) => Event::Text(html),
        Event::Start(Tag::Link { link_type, dest_url, title, id }) => {
            Event::Start(Tag::Link { link_type, dest_url: safe_url(dest_url), title, id })
        }
        Event::Start(Tag::Image { link_type, dest_url, title, id }) => {
            Event::Start(Tag::Image { link_type, dest_url: safe_url(dest_url), title, id })
        }
        _ => event,
    });

    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

pub(crate) fn msg_to_html(message: &Message, me: &User, peer: &User, media_url: &str) -> String {
    let (sender, mine) = if message.sender_id == me.id { (me, "mine") } else { (peer, "theirs") };

    let content = message.content.as_deref().map(render_markdown).unwrap_or_default();
    let file = message
        .file
        .as_deref()
        .map(|file| {
            let url = escape_html(&format!("{media_url}{file}"));
            format!(r#"<a class="file" href="{url}" target="_blank">{url}</a>"#)
        })
        .unwrap_or_default();

    include_res!(str, "/pages/chat/message.html")
        .replace("{id}", &message.id.to_string())
        .replace("{mine}", mine)
        .replace("{read}", if message.is_read { "read" } else { "unread" })
        .replace("{sender}", &escape_html(&sender.email))
        .replace("{timestamp}", &clock::format_micros(message.created_at))
        .replace("{file}", &file)
        .replace("{content}", &content)
}
