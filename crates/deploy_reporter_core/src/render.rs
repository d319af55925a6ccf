use std::collections::BTreeMap;

use html_escape::{decode_html_entities, encode_double_quoted_attribute, encode_text};

use crate::tracker::{TicketRecord, browse_url};

const MACRO_COLUMNS: &str = "key,type,summary,assignee,status,updated,created,예정된 시작";
const TABLE_HEADING: &str = "배포티켓 링크 목록";

/// Build the page body in storage format: a tracker macro bound to `jql`
/// followed by a table pairing each ticket with its linked deploy tickets.
///
/// Linked summaries resolve from the current result set, then the link
/// payload, then `lookup`. Lookups are cached per key for the whole render.
pub fn render_page<F>(jql: &str, tickets: &[TicketRecord], tracker_url: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut summaries: BTreeMap<String, String> = tickets
        .iter()
        .map(|ticket| (ticket.key.clone(), ticket.summary.clone()))
        .collect();

    let mut output = String::new();
    output.push_str("<ac:structured-macro ac:name=\"jira\">\n");
    output.push_str(&format!(
        "  <ac:parameter ac:name=\"columns\">{}</ac:parameter>\n",
        encode_text(MACRO_COLUMNS)
    ));
    output.push_str(&format!(
        "  <ac:parameter ac:name=\"jqlQuery\">{}</ac:parameter>\n",
        encode_text(jql)
    ));
    output.push_str("</ac:structured-macro>\n");
    output.push_str(&format!(
        "<h2 style=\"margin-top: 20px;\">{TABLE_HEADING}</h2>\n"
    ));
    output.push_str("<table style=\"width: 100%; border-collapse: collapse;\">\n");
    output.push_str("<thead><tr><th>Jira Issue</th><th>배포티켓(링크)</th></tr></thead>\n");
    output.push_str("<tbody>\n");

    for ticket in tickets {
        let linked = ticket
            .links
            .iter()
            .map(|link| {
                let summary = match summaries.get(&link.key) {
                    Some(known) => known.clone(),
                    None => {
                        let resolved = Some(link.summary.trim())
                            .filter(|summary| !summary.is_empty())
                            .map(ToString::to_string)
                            .or_else(|| lookup(&link.key))
                            .unwrap_or_default();
                        summaries.insert(link.key.clone(), resolved.clone());
                        resolved
                    }
                };
                ticket_cell(tracker_url, &link.key, &summary)
            })
            .collect::<Vec<_>>();

        output.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            ticket_cell(tracker_url, &ticket.key, &ticket.summary),
            linked.join("<br/>")
        ));
    }

    output.push_str("</tbody></table>");
    output
}

fn ticket_cell(tracker_url: &str, key: &str, summary: &str) -> String {
    format!(
        "<a href=\"{}\" target=\"_blank\">{}</a><br/>: {}",
        encode_double_quoted_attribute(&browse_url(tracker_url, key)),
        encode_text(key),
        encode_text(summary)
    )
}

/// Comparison form of a page body: entities decoded, whitespace runs
/// collapsed to one space, trimmed.
pub fn normalize_html(content: &str) -> String {
    decode_html_entities(content)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
