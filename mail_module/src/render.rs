use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kuchiki::traits::TendrilSink;
use mailparse::{MailHeaderMap, ParsedMail};
use tracing::debug;

use crate::errors::MailError;

/// Renders a raw RFC 5322 message as self-contained HTML.
///
/// The first `text/html` part wins, with `cid:` image references replaced by
/// inline data URIs taken from the message's own parts. Messages without HTML
/// fall back to their first `text/plain` part wrapped in `<pre>`.
pub fn render_email_html(message_id: &str, raw: &[u8]) -> Result<String, MailError> {
    let parsed = mailparse::parse_mail(raw)?;
    let mut parts = BodyParts::default();
    collect_parts(&parsed, &mut parts)?;

    if let Some(html) = parts.html {
        debug!(
            "rendering html body of {} with {} inline image(s)",
            message_id,
            parts.inline_images.len()
        );
        return Ok(inline_cid_images(&html, &parts.inline_images));
    }
    if let Some(text) = parts.text {
        return Ok(wrap_text_as_html(&text));
    }
    Err(MailError::EmptyBody(message_id.to_string()))
}

#[derive(Default)]
struct BodyParts {
    html: Option<String>,
    text: Option<String>,
    inline_images: HashMap<String, String>,
}

fn collect_parts(part: &ParsedMail<'_>, parts: &mut BodyParts) -> Result<(), MailError> {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_parts(subpart, parts)?;
        }
        return Ok(());
    }

    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    let content_id = part
        .headers
        .get_first_value("Content-ID")
        .filter(|_| !mimetype.starts_with("text/"));
    if let Some(content_id) = content_id {
        let content_id = content_id.trim().trim_start_matches('<').trim_end_matches('>');
        if !content_id.is_empty() {
            let data_uri = format!(
                "data:{};base64,{}",
                mimetype,
                STANDARD.encode(part.get_body_raw()?)
            );
            parts.inline_images.insert(content_id.to_string(), data_uri);
            return Ok(());
        }
    }

    match mimetype.as_str() {
        "text/html" if parts.html.is_none() => parts.html = Some(part.get_body()?),
        "text/plain" if parts.text.is_none() => parts.text = Some(part.get_body()?),
        _ => {}
    }
    Ok(())
}

fn inline_cid_images(html: &str, images: &HashMap<String, String>) -> String {
    if images.is_empty() {
        return html.to_string();
    }
    let document = kuchiki::parse_html().one(html);
    if let Ok(nodes) = document.select("img") {
        for node in nodes {
            let mut attributes = node.attributes.borrow_mut();
            let Some(src) = attributes.get("src").map(str::to_string) else {
                continue;
            };
            let Some(content_id) = src.strip_prefix("cid:") else {
                continue;
            };
            if let Some(data_uri) = images.get(content_id) {
                attributes.insert("src", data_uri.clone());
            }
        }
    }
    document.to_string()
}

fn wrap_text_as_html(input: &str) -> String {
    format!("<pre>{}</pre>", escape_html(input))
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
